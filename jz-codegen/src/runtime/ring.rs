//! The ring-buffer array group.
//!
//! A ring array's element storage is preceded by a 16-byte header
//! `[head: f64, length: f64]`; element `i` lives at slot
//! `(head + i) & (capacity - 1)`. Capacity is a power of two whose log2
//! rides in the pointer's aux field next to the ring flag, so resizing
//! returns a fresh pointer and callers rebind.

pub(crate) const BLOCK: &str = r#"
(func $__ring_len (param $r f64) (result f64)
  (call $__ptr_len (local.get $r)))
(func $__ring_cap (param $r f64) (result i32)
  (i32.add (call $__ring_mask (local.get $r)) (i32.const 1)))
(func $__alloc_ring (param $len i32) (param $cap i32) (result f64)
  (local $base i32) (local $off i32)
  (local.set $base (global.get $__heap))
  (local.set $off (i32.add (local.get $base) (i32.const 16)))
  (f64.store (local.get $base) (f64.const 0))
  (f64.store (i32.add (local.get $base) (i32.const 8)) (f64.convert_i32_s (local.get $len)))
  (global.set $__heap (i32.add (local.get $off) (i32.shl (local.get $cap) (i32.const 3))))
  (call $__mkptr (i32.const 1)
    (i32.or (i32.const 0x8000) (i32.sub (i32.const 31) (i32.clz (local.get $cap))))
    (local.get $off)))
(func $__ring_get (param $r f64) (param $i f64) (result f64)
  (f64.load (i32.add (call $__ptr_offset (local.get $r))
    (i32.shl (i32.and (i32.add (call $__ring_head (local.get $r)) (i32.trunc_sat_f64_s (local.get $i)))
                      (call $__ring_mask (local.get $r)))
             (i32.const 3)))))
(func $__ring_set (param $r f64) (param $i f64) (param $v f64) (result f64)
  (f64.store (i32.add (call $__ptr_offset (local.get $r))
    (i32.shl (i32.and (i32.add (call $__ring_head (local.get $r)) (i32.trunc_sat_f64_s (local.get $i)))
                      (call $__ring_mask (local.get $r)))
             (i32.const 3)))
    (local.get $v))
  (local.get $v))
(func $__to_ring (param $a f64) (result f64)
  (local $len i32) (local $r f64) (local $i i32) (local $roff i32) (local $aoff i32)
  (if (call $__is_ring (local.get $a)) (then (return (local.get $a))))
  (local.set $len (i32.trunc_sat_f64_s (call $__ptr_len (local.get $a))))
  (local.set $r (call $__alloc_ring (local.get $len) (call $__pow2 (local.get $len))))
  (local.set $roff (call $__ptr_offset (local.get $r)))
  (local.set $aoff (call $__ptr_offset (local.get $a)))
  (block $done
    (loop $body
      (br_if $done (i32.ge_s (local.get $i) (local.get $len)))
      (f64.store (i32.add (local.get $roff) (i32.shl (local.get $i) (i32.const 3)))
        (f64.load (i32.add (local.get $aoff) (i32.shl (local.get $i) (i32.const 3)))))
      (local.set $i (i32.add (local.get $i) (i32.const 1)))
      (br $body)))
  (local.get $r))
(func $__ring_resize (param $r f64) (param $cap i32) (result f64)
  (local $len i32) (local $n f64) (local $noff i32) (local $i i32)
  (local.set $len (i32.trunc_sat_f64_s (call $__ptr_len (local.get $r))))
  (local.set $n (call $__alloc_ring (local.get $len) (local.get $cap)))
  (local.set $noff (call $__ptr_offset (local.get $n)))
  (block $done
    (loop $body
      (br_if $done (i32.ge_s (local.get $i) (local.get $len)))
      (f64.store (i32.add (local.get $noff) (i32.shl (local.get $i) (i32.const 3)))
        (call $__ring_get (local.get $r) (f64.convert_i32_s (local.get $i))))
      (local.set $i (i32.add (local.get $i) (i32.const 1)))
      (br $body)))
  (local.get $n))
(func $__ring_shift (param $r f64) (result f64)
  (local $off i32) (local $h i32) (local $len i32) (local $v f64)
  (local.set $len (i32.trunc_sat_f64_s (call $__ptr_len (local.get $r))))
  (if (i32.eqz (local.get $len)) (then (return (f64.const nan))))
  (local.set $off (call $__ptr_offset (local.get $r)))
  (local.set $h (call $__ring_head (local.get $r)))
  (local.set $v (f64.load (i32.add (local.get $off) (i32.shl (local.get $h) (i32.const 3)))))
  (f64.store (i32.sub (local.get $off) (i32.const 16))
    (f64.convert_i32_s (i32.and (i32.add (local.get $h) (i32.const 1)) (call $__ring_mask (local.get $r)))))
  (f64.store (i32.sub (local.get $off) (i32.const 8)) (f64.convert_i32_s (i32.sub (local.get $len) (i32.const 1))))
  (local.get $v))
(func $__ring_unshift (param $r f64) (param $v f64) (result f64)
  (local $len i32) (local $h i32) (local $off i32)
  (local.set $len (i32.trunc_sat_f64_s (call $__ptr_len (local.get $r))))
  (if (i32.ge_s (local.get $len) (call $__ring_cap (local.get $r)))
    (then (local.set $r (call $__ring_resize (local.get $r) (i32.shl (call $__ring_cap (local.get $r)) (i32.const 1))))))
  (local.set $off (call $__ptr_offset (local.get $r)))
  (local.set $h (i32.and (i32.sub (call $__ring_head (local.get $r)) (i32.const 1)) (call $__ring_mask (local.get $r))))
  (f64.store (i32.add (local.get $off) (i32.shl (local.get $h) (i32.const 3))) (local.get $v))
  (f64.store (i32.sub (local.get $off) (i32.const 16)) (f64.convert_i32_s (local.get $h)))
  (f64.store (i32.sub (local.get $off) (i32.const 8)) (f64.convert_i32_s (i32.add (local.get $len) (i32.const 1))))
  (local.get $r))
(func $__ring_push (param $r f64) (param $v f64) (result f64)
  (local $len i32)
  (local.set $len (i32.trunc_sat_f64_s (call $__ptr_len (local.get $r))))
  (if (i32.ge_s (local.get $len) (call $__ring_cap (local.get $r)))
    (then (local.set $r (call $__ring_resize (local.get $r) (i32.shl (call $__ring_cap (local.get $r)) (i32.const 1))))))
  (f64.store
    (i32.add (call $__ptr_offset (local.get $r))
      (i32.shl (i32.and (i32.add (call $__ring_head (local.get $r)) (local.get $len)) (call $__ring_mask (local.get $r))) (i32.const 3)))
    (local.get $v))
  (f64.store (i32.sub (call $__ptr_offset (local.get $r)) (i32.const 8)) (f64.convert_i32_s (i32.add (local.get $len) (i32.const 1))))
  (local.get $r))
(func $__ring_pop (param $r f64) (result f64)
  (local $len i32) (local $v f64)
  (local.set $len (i32.trunc_sat_f64_s (call $__ptr_len (local.get $r))))
  (if (i32.eqz (local.get $len)) (then (return (f64.const nan))))
  (local.set $v (call $__ring_get (local.get $r) (f64.convert_i32_s (i32.sub (local.get $len) (i32.const 1)))))
  (f64.store (i32.sub (call $__ptr_offset (local.get $r)) (i32.const 8)) (f64.convert_i32_s (i32.sub (local.get $len) (i32.const 1))))
  (local.get $v))
"#;
