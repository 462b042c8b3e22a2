//! String helpers, transparent across the heap and SSO forms.
//!
//! SSO strings pack up to six 7-bit code points into the NaN payload with
//! bit 47 set; heap strings keep an i32 length at `offset - 8` and UTF-16
//! code units at `offset`. Every helper reads both forms; concatenation
//! always produces a heap string.

pub(crate) const BLOCK: &str = r#"
(func $__is_sso (param $v f64) (result i32)
  (i32.and
    (i32.eq (call $__ptr_type (local.get $v)) (i32.const 3))
    (i32.wrap_i64 (i64.and (i64.shr_u (i64.reinterpret_f64 (local.get $v)) (i64.const 47)) (i64.const 1)))))
(func $__str_len (param $s f64) (result f64)
  (if (result f64) (call $__is_sso (local.get $s))
    (then (f64.convert_i32_u (i32.wrap_i64 (i64.and (i64.shr_u (i64.reinterpret_f64 (local.get $s)) (i64.const 44)) (i64.const 7)))))
    (else (f64.convert_i32_s (i32.load (i32.sub (call $__ptr_offset (local.get $s)) (i32.const 8)))))))
(func $__str_code_at (param $s f64) (param $i i32) (result i32)
  (if (result i32) (call $__is_sso (local.get $s))
    (then (i32.and
      (i32.wrap_i64 (i64.shr_u (i64.reinterpret_f64 (local.get $s))
        (i64.sub (i64.const 37) (i64.mul (i64.extend_i32_s (local.get $i)) (i64.const 7)))))
      (i32.const 127)))
    (else (i32.load16_u (i32.add (call $__ptr_offset (local.get $s)) (i32.shl (local.get $i) (i32.const 1)))))))
(func $__str_char_at (param $s f64) (param $i f64) (result f64)
  (local $ix i32) (local $c i32) (local $h f64)
  (local.set $ix (i32.trunc_sat_f64_s (local.get $i)))
  (if (i32.or (i32.lt_s (local.get $ix) (i32.const 0))
              (i32.ge_s (local.get $ix) (i32.trunc_sat_f64_s (call $__str_len (local.get $s)))))
    (then (return (f64.reinterpret_i64 (i64.const 0x7ffb800000000000)))))
  (local.set $c (call $__str_code_at (local.get $s) (local.get $ix)))
  (if (result f64) (i32.le_u (local.get $c) (i32.const 127))
    (then (f64.reinterpret_i64
      (i64.or (i64.const 0x7ffb900000000000) (i64.shl (i64.extend_i32_u (local.get $c)) (i64.const 37)))))
    (else
      (local.set $h (call $__alloc (i32.const 3) (i32.const 1)))
      (i32.store16 (call $__ptr_offset (local.get $h)) (local.get $c))
      (local.get $h))))
(func $__str_eq (param $a f64) (param $b f64) (result i32)
  (local $la i32) (local $i i32)
  (if (i64.eq (i64.reinterpret_f64 (local.get $a)) (i64.reinterpret_f64 (local.get $b)))
    (then (return (i32.const 1))))
  (if (i32.or (i32.ne (call $__ptr_type (local.get $a)) (i32.const 3))
              (i32.ne (call $__ptr_type (local.get $b)) (i32.const 3)))
    (then (return (i32.const 0))))
  (local.set $la (i32.trunc_sat_f64_s (call $__str_len (local.get $a))))
  (if (i32.ne (local.get $la) (i32.trunc_sat_f64_s (call $__str_len (local.get $b))))
    (then (return (i32.const 0))))
  (block $done
    (loop $body
      (br_if $done (i32.ge_s (local.get $i) (local.get $la)))
      (if (i32.ne (call $__str_code_at (local.get $a) (local.get $i))
                  (call $__str_code_at (local.get $b) (local.get $i)))
        (then (return (i32.const 0))))
      (local.set $i (i32.add (local.get $i) (i32.const 1)))
      (br $body)))
  (i32.const 1))
(func $__str_copy (param $d i32) (param $s f64) (result i32)
  (local $len i32) (local $i i32)
  (local.set $len (i32.trunc_sat_f64_s (call $__str_len (local.get $s))))
  (block $done
    (loop $body
      (br_if $done (i32.ge_s (local.get $i) (local.get $len)))
      (i32.store16 (i32.add (local.get $d) (i32.shl (local.get $i) (i32.const 1)))
        (call $__str_code_at (local.get $s) (local.get $i)))
      (local.set $i (i32.add (local.get $i) (i32.const 1)))
      (br $body)))
  (local.get $len))
(func $__sso_to_heap (param $s f64) (result f64)
  (local $h f64)
  (if (i32.eqz (call $__is_sso (local.get $s))) (then (return (local.get $s))))
  (local.set $h (call $__alloc (i32.const 3) (i32.trunc_sat_f64_s (call $__str_len (local.get $s)))))
  (drop (call $__str_copy (call $__ptr_offset (local.get $h)) (local.get $s)))
  (local.get $h))
(func $__strcat (param $a f64) (param $b f64) (result f64)
  (local $la i32) (local $s f64) (local $off i32)
  (local.set $la (i32.trunc_sat_f64_s (call $__str_len (local.get $a))))
  (local.set $s (call $__alloc (i32.const 3)
    (i32.add (local.get $la) (i32.trunc_sat_f64_s (call $__str_len (local.get $b))))))
  (local.set $off (call $__ptr_offset (local.get $s)))
  (drop (call $__str_copy (local.get $off) (local.get $a)))
  (drop (call $__str_copy (i32.add (local.get $off) (i32.shl (local.get $la) (i32.const 1))) (local.get $b)))
  (local.get $s))
(func $__strcat3 (param $a f64) (param $b f64) (param $c f64) (result f64)
  (local $la i32) (local $lb i32) (local $s f64) (local $off i32)
  (local.set $la (i32.trunc_sat_f64_s (call $__str_len (local.get $a))))
  (local.set $lb (i32.trunc_sat_f64_s (call $__str_len (local.get $b))))
  (local.set $s (call $__alloc (i32.const 3)
    (i32.add (i32.add (local.get $la) (local.get $lb)) (i32.trunc_sat_f64_s (call $__str_len (local.get $c))))))
  (local.set $off (call $__ptr_offset (local.get $s)))
  (drop (call $__str_copy (local.get $off) (local.get $a)))
  (drop (call $__str_copy (i32.add (local.get $off) (i32.shl (local.get $la) (i32.const 1))) (local.get $b)))
  (drop (call $__str_copy (i32.add (local.get $off) (i32.shl (i32.add (local.get $la) (local.get $lb)) (i32.const 1))) (local.get $c)))
  (local.get $s))
"#;
