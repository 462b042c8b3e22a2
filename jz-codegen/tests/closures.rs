//! Closure lowering: capture analysis, environment records, the function
//! table, and the indirect calling convention.

use jz_codegen::{compile_to_wat, CompileError, CompileOptions};

fn wat(src: &str) -> String {
    compile_to_wat(src, &CompileOptions::default()).expect("compiles")
}

#[test]
fn curried_capture_builds_a_two_entry_table() {
    let m = wat("let make = a => b => a + b; let f = make(10); f(5)");
    assert!(m.contains("(table 2 funcref)"), "{m}");
    assert!(m.contains("(elem (i32.const 0) $.lambda"));
    // The outer arrow hoists `a` into its own one-slot environment and
    // copies the parameter in on entry.
    assert!(m.contains("(local $.own i32)"));
    assert!(m.contains("(call $__alloc (i32.const 5) (i32.const 1))"));
    assert!(m.contains(
        "(f64.store (i32.add (local.get $.own) (i32.const 0)) (local.get $a))"
    ));
    // The inner closure is table entry 1 with one capture: aux 0x0101.
    assert!(m.contains("(call $__mkptr (i32.const 5) (i32.const 257)"), "{m}");
    // Both applications go through the table at arity 1.
    assert!(m.contains("(type $.fn1 (func (param i32 f64) (result f64)))"));
    assert!(m.contains("(call_indirect (type $.fn1)"));
    assert!(m.contains("(call $__closure_idx"));
}

#[test]
fn non_capturing_closures_are_constants() {
    let m = wat("let f = () => 1; f()");
    // CLOSURE tag, table index 0, no environment: a pure constant.
    assert!(m.contains("(f64.const nan:0xd000000000000)"), "{m}");
    assert!(m.contains("(type $.fn0 (func (param i32) (result f64)))"));
}

#[test]
fn chained_application_stays_indirect() {
    let m = wat("let make = a => b => a + b; make(1)(2)");
    assert_eq!(m.matches("(call_indirect").count(), 2, "{m}");
}

#[test]
fn direct_calls_bypass_the_table() {
    let m = wat("function add(a, b) { return a + b } add(1, 2)");
    assert!(m.contains("(func $add (param $.env i32) (param $a f64) (param $b f64) (result f64)"));
    assert!(m.contains("(call $add (i32.const 0)"));
    assert!(!m.contains("call_indirect"));
}

#[test]
fn function_references_join_the_table() {
    let m = wat("function twice(x) { return x * 2 } [1, 2, 3].map(f => f).indexOf(twice)");
    // Referencing `twice` as a value assigns it a table slot.
    assert!(m.contains("(elem (i32.const 0)"), "{m}");
    assert!(m.contains("$twice"));
}

#[test]
fn exported_functions_get_wrappers() {
    let m = wat("export function id(x) { return x }");
    assert!(m.contains("(func $.exp_id (export \"id\") (param $a0 f64) (result f64)"));
    assert!(m.contains("(call $id (i32.const 0) (local.get $a0))"));
}

#[test]
fn user_main_gets_a_thin_wrapper() {
    let m = wat("function main(x) { return x + 1 }");
    assert!(m.contains("(func $main (param $.env i32) (param $x f64)"));
    assert!(m.contains("(func $.main (export \"main\") (param $a0 f64)"));
    assert!(m.contains("(call $main (i32.const 0) (local.get $a0))"));
}

#[test]
fn hoisted_locals_read_through_the_environment() {
    // `n` is captured, so the enclosing function reads and writes it
    // through its own environment record rather than a WASM local.
    let m = wat("let f = x => { let n = 0; let g = () => n; n = x; g() }; f(1)");
    assert!(m.contains("(f64.store (i32.add (local.get $.own) (i32.const 0))"), "{m}");
    assert!(m.contains("(f64.load (i32.add (local.get $.own) (i32.const 0))"), "{m}");
}

#[test]
fn captures_through_two_levels_use_the_incoming_environment() {
    let m = wat("let f = a => b => c => a + b + c; f(1)(2)(3)");
    // The innermost closure copies `a` out of the middle closure's
    // incoming environment.
    assert!(m.contains("(f64.load (i32.add (local.get $.env) (i32.const 0))"), "{m}");
    assert!(m.contains("(table 3 funcref)"));
}

#[test]
fn too_many_captures_is_an_error() {
    // 256 distinct locals captured by one arrow.
    let mut src = String::new();
    let mut body = Vec::new();
    src.push_str("let f = x => { ");
    for i in 0..256 {
        src.push_str(&format!("let v{i} = {i}; "));
        body.push(format!("v{i}"));
    }
    src.push_str(&format!("let g = () => {}; g() }}; f(0)", body.join(" + ")));
    let err = compile_to_wat(&src, &CompileOptions::default()).expect_err("should fail");
    assert!(matches!(err, CompileError::TooManyCaptures { got: 256 }));
}
