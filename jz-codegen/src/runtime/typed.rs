//! Typed-array views and the arena.
//!
//! A view is an 8-byte header `[length: i32, data-ptr: i32]` in the arena;
//! `subarray` allocates only a header and shares the data pointer. Element
//! widths are looked up from a packed nibble table keyed on the element
//! code.

pub(crate) const BLOCK: &str = r#"
(func $__typed_shift_of (param $c i32) (result i32)
  (i32.and (i32.shr_u (i32.const 0x32221100) (i32.shl (local.get $c) (i32.const 2))) (i32.const 15)))
(func $__alloc_typed (param $c i32) (param $len i32) (result f64)
  (local $h i32) (local $bytes i32)
  (local.set $h (global.get $__typed))
  (i32.store (local.get $h) (local.get $len))
  (i32.store (i32.add (local.get $h) (i32.const 4)) (i32.add (local.get $h) (i32.const 8)))
  (local.set $bytes (i32.and
    (i32.add (i32.shl (local.get $len) (call $__typed_shift_of (local.get $c))) (i32.const 15))
    (i32.const -16)))
  (global.set $__typed (i32.add (i32.add (local.get $h) (i32.const 8)) (local.get $bytes)))
  (call $__mkptr (i32.const 2) (i32.shl (local.get $c) (i32.const 13)) (local.get $h)))
(func $__mk_typed_view (param $c i32) (param $len i32) (param $data i32) (result f64)
  (local $h i32)
  (local.set $h (global.get $__typed))
  (global.set $__typed (i32.add (local.get $h) (i32.const 16)))
  (i32.store (local.get $h) (local.get $len))
  (i32.store (i32.add (local.get $h) (i32.const 4)) (local.get $data))
  (call $__mkptr (i32.const 2) (i32.shl (local.get $c) (i32.const 13)) (local.get $h)))
(func $__typed_elemtype (param $t f64) (result i32)
  (i32.and (i32.shr_u (call $__ptr_aux (local.get $t)) (i32.const 13)) (i32.const 7)))
(func $__typed_len (param $t f64) (result i32)
  (i32.load (call $__ptr_offset (local.get $t))))
(func $__typed_offset (param $t f64) (result i32)
  (i32.load offset=4 (call $__ptr_offset (local.get $t))))
(func $__mk_typed_subarray (param $t f64) (param $b i32) (param $e i32) (result f64)
  (local $len i32) (local $n i32)
  (local.set $len (call $__typed_len (local.get $t)))
  (if (i32.lt_s (local.get $b) (i32.const 0)) (then (local.set $b (i32.add (local.get $b) (local.get $len)))))
  (if (i32.lt_s (local.get $b) (i32.const 0)) (then (local.set $b (i32.const 0))))
  (if (i32.gt_s (local.get $b) (local.get $len)) (then (local.set $b (local.get $len))))
  (if (i32.lt_s (local.get $e) (i32.const 0)) (then (local.set $e (i32.add (local.get $e) (local.get $len)))))
  (if (i32.lt_s (local.get $e) (i32.const 0)) (then (local.set $e (i32.const 0))))
  (if (i32.gt_s (local.get $e) (local.get $len)) (then (local.set $e (local.get $len))))
  (local.set $n (i32.sub (local.get $e) (local.get $b)))
  (if (i32.lt_s (local.get $n) (i32.const 0)) (then (local.set $n (i32.const 0))))
  (call $__mk_typed_view
    (call $__typed_elemtype (local.get $t))
    (local.get $n)
    (i32.add (call $__typed_offset (local.get $t))
      (i32.shl (local.get $b) (call $__typed_shift_of (call $__typed_elemtype (local.get $t)))))))
(func $__reset_typed_arrays
  (global.set $__typed (i32.add (global.get $__heap_start) (i32.const 1048576))))
"#;
