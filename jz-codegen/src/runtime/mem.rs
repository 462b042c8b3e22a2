//! Allocator, NaN-box tag helpers, value equality, and the smart array
//! accessors.

use crate::features::Features;

/// Tag helpers and the bump allocator. The quiet-NaN constant and the field
/// shifts mirror `jz_types::RawValue` exactly.
const TAG_HELPERS: &str = r#"
(func $__is_pointer (param $v f64) (result i32)
  (local $b i64)
  (local.set $b (i64.reinterpret_f64 (local.get $v)))
  (i32.and
    (i64.eq (i64.and (local.get $b) (i64.const 0x7ff8000000000000)) (i64.const 0x7ff8000000000000))
    (i64.ne (i64.and (local.get $b) (i64.const 0x7ffffffffffff)) (i64.const 0))))
(func $__mkptr (param $t i32) (param $a i32) (param $o i32) (result f64)
  (f64.reinterpret_i64
    (i64.or
      (i64.or (i64.const 0x7ff8000000000000)
              (i64.shl (i64.extend_i32_u (local.get $t)) (i64.const 48)))
      (i64.or (i64.shl (i64.extend_i32_u (local.get $a)) (i64.const 32))
              (i64.extend_i32_u (local.get $o))))))
(func $__ptr_type (param $v f64) (result i32)
  (i32.wrap_i64 (i64.and (i64.shr_u (i64.reinterpret_f64 (local.get $v)) (i64.const 48)) (i64.const 7))))
(func $__ptr_aux (param $v f64) (result i32)
  (i32.wrap_i64 (i64.and (i64.shr_u (i64.reinterpret_f64 (local.get $v)) (i64.const 32)) (i64.const 0xffff))))
(func $__ptr_offset (param $v f64) (result i32)
  (i32.wrap_i64 (i64.and (i64.reinterpret_f64 (local.get $v)) (i64.const 0xffffffff))))
(func $__ptr_with_aux (param $v f64) (param $a i32) (result f64)
  (f64.reinterpret_i64
    (i64.or (i64.and (i64.reinterpret_f64 (local.get $v)) (i64.const 0xffff0000ffffffff))
            (i64.shl (i64.extend_i32_u (local.get $a)) (i64.const 32)))))
(func $__ptr_schema (param $v f64) (result i32)
  (call $__ptr_aux (local.get $v)))
(func $__closure_idx (param $v f64) (result i32)
  (i32.and (i32.shr_u (call $__ptr_aux (local.get $v)) (i32.const 8)) (i32.const 255)))
(func $__ptr_len (param $v f64) (result f64)
  (f64.load (i32.sub (call $__ptr_offset (local.get $v)) (i32.const 8))))
(func $__pow2 (param $n i32) (result i32)
  (if (result i32) (i32.le_s (local.get $n) (i32.const 4))
    (then (i32.const 4))
    (else (i32.shl (i32.const 1) (i32.sub (i32.const 32) (i32.clz (i32.sub (local.get $n) (i32.const 1))))))))
(func $__alloc (param $t i32) (param $len i32) (result f64)
  (local $bytes i32) (local $off i32)
  (if (i32.eq (local.get $t) (i32.const 1))
    (then
      (local.set $off (i32.add (global.get $__heap) (i32.const 8)))
      (local.set $bytes (i32.add (i32.shl (call $__pow2 (local.get $len)) (i32.const 3)) (i32.const 8)))
      (f64.store (global.get $__heap) (f64.convert_i32_s (local.get $len))))
    (else
      (if (i32.eq (local.get $t) (i32.const 3))
        (then
          (local.set $off (i32.add (global.get $__heap) (i32.const 8)))
          (local.set $bytes (i32.add (i32.and (i32.add (i32.shl (local.get $len) (i32.const 1)) (i32.const 7)) (i32.const -8)) (i32.const 8)))
          (i32.store (global.get $__heap) (local.get $len)))
        (else
          (local.set $off (global.get $__heap))
          (local.set $bytes (i32.shl (local.get $len) (i32.const 3)))))))
  (global.set $__heap (i32.add (global.get $__heap) (local.get $bytes)))
  (call $__mkptr (local.get $t) (i32.const 0) (local.get $off)))
(func $__ptr_eq (param $a f64) (param $b f64) (result i32)
  (i32.and
    (i32.and (call $__is_pointer (local.get $a)) (call $__is_pointer (local.get $b)))
    (i64.eq (i64.reinterpret_f64 (local.get $a)) (i64.reinterpret_f64 (local.get $b)))))
(func $__f64_ne (param $a f64) (param $b f64) (result i32)
  (i32.eqz (call $__f64_eq (local.get $a) (local.get $b))))
(func $__typeof_code (param $v f64) (result i32)
  (local $t i32)
  (if (result i32) (call $__is_pointer (local.get $v))
    (then
      (local.set $t (call $__ptr_type (local.get $v)))
      (if (result i32) (i32.eqz (local.get $t))
        (then (i32.const 7))
        (else (local.get $t))))
    (else (i32.const 0))))
"#;

/// `__f64_eq` layers pointer bit-equality over `f64.eq`; when strings are
/// compiled in, string pointers compare by content instead of identity.
fn f64_eq(features: Features) -> String {
    let pointer_arm = if features.contains(Features::STRINGS) {
        r#"(if (result i32) (i32.and (i32.eq (call $__ptr_type (local.get $a)) (i32.const 3)) (i32.eq (call $__ptr_type (local.get $b)) (i32.const 3)))
            (then (call $__str_eq (local.get $a) (local.get $b)))
            (else (i64.eq (i64.reinterpret_f64 (local.get $a)) (i64.reinterpret_f64 (local.get $b)))))"#
    } else {
        "(i64.eq (i64.reinterpret_f64 (local.get $a)) (i64.reinterpret_f64 (local.get $b)))"
    };
    format!(
        r#"
(func $__f64_eq (param $a f64) (param $b f64) (result i32)
  (if (result i32) (f64.eq (local.get $a) (local.get $b))
    (then (i32.const 1))
    (else
      (if (result i32) (i32.and (call $__is_pointer (local.get $a)) (call $__is_pointer (local.get $b)))
        (then
          {pointer_arm})
        (else (i32.const 0))))))
"#
    )
}

pub(crate) fn block(features: Features) -> String {
    let mut out = String::from(TAG_HELPERS);
    out.push_str(&f64_eq(features));
    out
}

/// Smart accessors: one entry point per operation, transparently handling
/// ring and flat forms. The ring arithmetic is inlined so this block never
/// depends on the full ring group.
pub(crate) fn array_block(features: Features) -> String {
    let mut out = String::from(
        r#"
(func $__is_ring (param $v f64) (result i32)
  (i32.wrap_i64 (i64.and (i64.shr_u (i64.reinterpret_f64 (local.get $v)) (i64.const 47)) (i64.const 1))))
(func $__ring_mask (param $r f64) (result i32)
  (i32.sub (i32.shl (i32.const 1) (i32.and (call $__ptr_aux (local.get $r)) (i32.const 31))) (i32.const 1)))
(func $__ring_head (param $r f64) (result i32)
  (i32.trunc_sat_f64_s (f64.load (i32.sub (call $__ptr_offset (local.get $r)) (i32.const 16)))))
(func $__arr_get (param $a f64) (param $i f64) (result f64)
  (local $idx i32) (local $off i32)
  (local.set $idx (i32.trunc_sat_f64_s (local.get $i)))
  (local.set $off (call $__ptr_offset (local.get $a)))
  (if (result f64) (call $__is_ring (local.get $a))
    (then (f64.load (i32.add (local.get $off)
      (i32.shl (i32.and (i32.add (call $__ring_head (local.get $a)) (local.get $idx)) (call $__ring_mask (local.get $a))) (i32.const 3)))))
    (else (f64.load (i32.add (local.get $off) (i32.shl (local.get $idx) (i32.const 3)))))))
(func $__arr_set (param $a f64) (param $i f64) (param $v f64) (result f64)
  (local $idx i32) (local $off i32)
  (local.set $idx (i32.trunc_sat_f64_s (local.get $i)))
  (local.set $off (call $__ptr_offset (local.get $a)))
  (if (call $__is_ring (local.get $a))
    (then (f64.store (i32.add (local.get $off)
      (i32.shl (i32.and (i32.add (call $__ring_head (local.get $a)) (local.get $idx)) (call $__ring_mask (local.get $a))) (i32.const 3)))
      (local.get $v)))
    (else (f64.store (i32.add (local.get $off) (i32.shl (local.get $idx) (i32.const 3))) (local.get $v))))
  (local.get $v))
(func $__arr_pop (param $a f64) (result f64)
  (local $len i32) (local $v f64)
  (local.set $len (i32.trunc_sat_f64_s (call $__ptr_len (local.get $a))))
  (if (i32.eqz (local.get $len)) (then (return (f64.const nan))))
  (local.set $v (call $__arr_get (local.get $a) (f64.convert_i32_s (i32.sub (local.get $len) (i32.const 1)))))
  (f64.store (i32.sub (call $__ptr_offset (local.get $a)) (i32.const 8)) (f64.convert_i32_s (i32.sub (local.get $len) (i32.const 1))))
  (local.get $v))
(func $__arr_shift (param $a f64) (result f64)
  (local $len i32) (local $off i32) (local $v f64) (local $i i32) (local $h i32)
  (local.set $len (i32.trunc_sat_f64_s (call $__ptr_len (local.get $a))))
  (if (i32.eqz (local.get $len)) (then (return (f64.const nan))))
  (local.set $off (call $__ptr_offset (local.get $a)))
  (if (call $__is_ring (local.get $a))
    (then
      (local.set $h (call $__ring_head (local.get $a)))
      (local.set $v (f64.load (i32.add (local.get $off) (i32.shl (local.get $h) (i32.const 3)))))
      (f64.store (i32.sub (local.get $off) (i32.const 16))
        (f64.convert_i32_s (i32.and (i32.add (local.get $h) (i32.const 1)) (call $__ring_mask (local.get $a)))))
      (f64.store (i32.sub (local.get $off) (i32.const 8)) (f64.convert_i32_s (i32.sub (local.get $len) (i32.const 1))))
      (return (local.get $v))))
  (local.set $v (f64.load (local.get $off)))
  (block $done
    (loop $body
      (br_if $done (i32.ge_s (local.get $i) (i32.sub (local.get $len) (i32.const 1))))
      (f64.store (i32.add (local.get $off) (i32.shl (local.get $i) (i32.const 3)))
        (f64.load (i32.add (local.get $off) (i32.shl (i32.add (local.get $i) (i32.const 1)) (i32.const 3)))))
      (local.set $i (i32.add (local.get $i) (i32.const 1)))
      (br $body)))
  (f64.store (i32.sub (local.get $off) (i32.const 8)) (f64.convert_i32_s (i32.sub (local.get $len) (i32.const 1))))
  (local.get $v))
"#,
    );
    // The copying unshift; ring-form targets are handled at the call site
    // when the variable can be rebound, or here when the ring group is in.
    let ring_arm = if features.contains(Features::RING) {
        "(if (call $__is_ring (local.get $a)) (then (return (call $__ring_unshift (local.get $a) (local.get $v)))))\n  "
    } else {
        ""
    };
    out.push_str(&format!(
        r#"
(func $__arr_unshift (param $a f64) (param $v f64) (result f64)
  (local $len i32) (local $off i32) (local $dst f64) (local $doff i32) (local $i i32)
  {ring_arm}(local.set $len (i32.trunc_sat_f64_s (call $__ptr_len (local.get $a))))
  (local.set $off (call $__ptr_offset (local.get $a)))
  (local.set $dst (call $__alloc (i32.const 1) (i32.add (local.get $len) (i32.const 1))))
  (local.set $doff (call $__ptr_offset (local.get $dst)))
  (f64.store (local.get $doff) (local.get $v))
  (block $done
    (loop $body
      (br_if $done (i32.ge_s (local.get $i) (local.get $len)))
      (f64.store (i32.add (local.get $doff) (i32.shl (i32.add (local.get $i) (i32.const 1)) (i32.const 3)))
        (call $__arr_get (local.get $a) (f64.convert_i32_s (local.get $i))))
      (local.set $i (i32.add (local.get $i) (i32.const 1)))
      (br $body)))
  (local.get $dst))
"#
    ));
    out
}

/// Fresh runtime symbols: ids are allocated from one, since an ATOM with a
/// zero payload is the canonical NaN.
pub(crate) const SYMBOL_BLOCK: &str = r#"
(func $__mk_symbol (result f64)
  (local $id i32)
  (local.set $id (global.get $__symbols))
  (global.set $__symbols (i32.add (local.get $id) (i32.const 1)))
  (call $__mkptr (i32.const 0) (i32.const 0) (local.get $id)))
"#;
