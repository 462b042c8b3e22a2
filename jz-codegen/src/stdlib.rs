//! The stdlib table: prewritten WAT snippets with a static dependency
//! table, linked by transitive closure over what the lowerings requested.

use std::collections::BTreeSet;

/// One stdlib entry.
pub(crate) struct StdlibFn {
    pub name: &'static str,
    pub deps: &'static [&'static str],
    pub wat: &'static str,
}

/// The static table. Emission order follows table order, which keeps
/// output deterministic.
pub(crate) const STDLIB: &[StdlibFn] = &[
    StdlibFn {
        name: "sign",
        deps: &[],
        wat: r#"
(func $sign (param $x f64) (result f64)
  (if (result f64) (f64.ne (local.get $x) (local.get $x))
    (then (f64.const nan))
    (else
      (if (result f64) (f64.gt (local.get $x) (f64.const 0))
        (then (f64.const 1))
        (else
          (if (result f64) (f64.lt (local.get $x) (f64.const 0))
            (then (f64.const -1))
            (else (local.get $x))))))))
"#,
    },
    StdlibFn {
        name: "__to_str",
        deps: &["__num_to_str"],
        wat: r#"
(func $__to_str (param $v f64) (result f64)
  (if (result f64) (i32.and (call $__is_pointer (local.get $v)) (i32.eq (call $__ptr_type (local.get $v)) (i32.const 3)))
    (then (local.get $v))
    (else (call $__num_to_str (local.get $v)))))
"#,
    },
    StdlibFn {
        name: "__num_to_str",
        deps: &[],
        // The three nan:0x… literals are the interned "NaN", "Infinity",
        // and "-Infinity" strings at their fixed static offsets.
        wat: r#"
(func $__num_to_str (param $v f64) (result f64)
  (local $s f64) (local $off i32) (local $len i32)
  (local $ip f64) (local $fp f64) (local $digits i32) (local $t f64)
  (local $i i32) (local $d i32)
  (if (f64.ne (local.get $v) (local.get $v))
    (then (return (f64.const nan:0xb000000000018))))
  (if (f64.eq (local.get $v) (f64.const inf))
    (then (return (f64.const nan:0xb000000000028))))
  (if (f64.eq (local.get $v) (f64.const -inf))
    (then (return (f64.const nan:0xb000000000040))))
  (local.set $s (call $__alloc (i32.const 3) (i32.const 32)))
  (local.set $off (call $__ptr_offset (local.get $s)))
  (if (f64.lt (local.get $v) (f64.const 0))
    (then
      (i32.store16 (local.get $off) (i32.const 45))
      (local.set $len (i32.const 1))
      (local.set $v (f64.neg (local.get $v)))))
  (local.set $ip (f64.trunc (local.get $v)))
  (local.set $fp (f64.sub (local.get $v) (local.get $ip)))
  (local.set $digits (i32.const 1))
  (local.set $t (f64.trunc (f64.div (local.get $ip) (f64.const 10))))
  (block $cdone
    (loop $cbody
      (br_if $cdone (f64.lt (local.get $t) (f64.const 1)))
      (local.set $digits (i32.add (local.get $digits) (i32.const 1)))
      (local.set $t (f64.trunc (f64.div (local.get $t) (f64.const 10))))
      (br $cbody)))
  (local.set $i (i32.sub (i32.add (local.get $len) (local.get $digits)) (i32.const 1)))
  (block $wdone
    (loop $wbody
      (local.set $d (i32.trunc_sat_f64_s
        (f64.sub (local.get $ip) (f64.mul (f64.trunc (f64.div (local.get $ip) (f64.const 10))) (f64.const 10)))))
      (i32.store16 (i32.add (local.get $off) (i32.shl (local.get $i) (i32.const 1)))
        (i32.add (local.get $d) (i32.const 48)))
      (local.set $ip (f64.trunc (f64.div (local.get $ip) (f64.const 10))))
      (br_if $wdone (i32.le_s (local.get $i) (local.get $len)))
      (local.set $i (i32.sub (local.get $i) (i32.const 1)))
      (br $wbody)))
  (local.set $len (i32.add (local.get $len) (local.get $digits)))
  (if (f64.gt (local.get $fp) (f64.const 0))
    (then
      (i32.store16 (i32.add (local.get $off) (i32.shl (local.get $len) (i32.const 1))) (i32.const 46))
      (local.set $len (i32.add (local.get $len) (i32.const 1)))
      (local.set $i (i32.const 0))
      (block $fdone
        (loop $fbody
          (br_if $fdone (i32.ge_s (local.get $i) (i32.const 6)))
          (br_if $fdone (f64.eq (local.get $fp) (f64.const 0)))
          (local.set $fp (f64.mul (local.get $fp) (f64.const 10)))
          (local.set $d (i32.trunc_sat_f64_s (f64.trunc (local.get $fp))))
          (local.set $fp (f64.sub (local.get $fp) (f64.trunc (local.get $fp))))
          (i32.store16 (i32.add (local.get $off) (i32.shl (local.get $len) (i32.const 1)))
            (i32.add (local.get $d) (i32.const 48)))
          (local.set $len (i32.add (local.get $len) (i32.const 1)))
          (local.set $i (i32.add (local.get $i) (i32.const 1)))
          (br $fbody)))))
  (i32.store (i32.sub (local.get $off) (i32.const 8)) (local.get $len))
  (local.get $s))
"#,
    },
];

/// The transitive closure of the requested set, in table order.
pub(crate) fn closure(requested: &BTreeSet<&'static str>) -> Vec<&'static StdlibFn> {
    let mut needed: BTreeSet<&'static str> = requested.clone();
    let mut work: Vec<&'static str> = requested.iter().copied().collect();
    while let Some(name) = work.pop() {
        if let Some(entry) = STDLIB.iter().find(|s| s.name == name) {
            for dep in entry.deps {
                if needed.insert(dep) {
                    work.push(dep);
                }
            }
        }
    }
    STDLIB.iter().filter(|s| needed.contains(s.name)).collect()
}

/// Parameter count of a host math import.
pub(crate) fn math_arity(name: &str) -> usize {
    match name {
        "random" => 0,
        "pow" | "atan2" | "hypot" => 2,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts;

    #[test]
    fn closure_pulls_dependencies() {
        let mut requested = BTreeSet::new();
        requested.insert("__to_str");
        let linked = closure(&requested);
        let names: Vec<&str> = linked.iter().map(|s| s.name).collect();
        assert!(names.contains(&"__to_str"));
        assert!(names.contains(&"__num_to_str"));
        assert!(!names.contains(&"sign"));
    }

    #[test]
    fn each_function_emitted_once() {
        let mut requested = BTreeSet::new();
        requested.insert("__to_str");
        requested.insert("__num_to_str");
        let linked = closure(&requested);
        assert_eq!(linked.len(), 2);
    }

    // The nan:0x literals inside __num_to_str must stay in sync with the
    // fixed offsets of the special numeric strings.
    #[test]
    fn special_string_pointers_match_consts() {
        let entry = STDLIB
            .iter()
            .find(|s| s.name == "__num_to_str")
            .expect("table entry");
        assert!(entry.wat.contains(&consts::nan_str_ptr().wat_const()));
        assert!(entry.wat.contains(&consts::inf_str_ptr().wat_const()));
        assert!(entry.wat.contains(&consts::neg_inf_str_ptr().wat_const()));
    }
}
