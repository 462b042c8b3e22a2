//! Module assembly: memory sizing, imports, exports, data segments, the
//! signature section, and the assembler bridge.

use jz_codegen::{compile, compile_to_wat, Assembler, CompileError, CompileOptions};

fn wat(src: &str) -> String {
    compile_to_wat(src, &CompileOptions::default()).expect("compiles")
}

#[test]
fn minimal_module_shape() {
    let m = wat("1 + 1");
    assert!(m.starts_with("(module\n"));
    assert!(m.trim_end().ends_with(')'));
    assert!(m.contains("(memory (export \"memory\") 2)"));
    // Static segment is empty: the heap starts right after the reserved
    // prefix, 16-aligned.
    assert!(m.contains("(global $__heap (mut i32) (i32.const 96))"));
    assert!(m.contains("(global $__heap_start i32 (i32.const 96))"));
    assert!(m.contains("(func $.main (export \"main\")"));
    assert!(m.contains("(@custom \"jz:sig\""));
    // Nothing it does not need.
    assert!(!m.contains("(table "));
    assert!(!m.contains("(tag "));
    assert!(!m.contains("(import "));
    assert!(!m.contains("$__alloc"));
}

#[test]
fn memory_steps_up_with_features() {
    assert!(wat("[1, 2][0]").contains("(memory (export \"memory\") 16)"));
    assert!(wat("new F64([1])[0]").contains("(memory (export \"memory\") 48)"));
}

#[test]
fn memory_pages_can_be_overridden() {
    let opts = CompileOptions {
        memory_pages: Some(7),
        ..CompileOptions::default()
    };
    let m = compile_to_wat("[1, 2][0]", &opts).expect("compiles");
    assert!(m.contains("(memory (export \"memory\") 7)"));
}

#[test]
fn heap_exports_follow_memory_use() {
    let m = wat("[1, 2, 3].slice(1)");
    assert!(m.contains("(export \"_alloc\" (func $__alloc))"));
    assert!(m.contains("(func $_resetHeap (export \"_resetHeap\")"));
    assert!(!m.contains("_resetTypedArrays"));
}

#[test]
fn typed_arena_gets_a_start_function_and_reset() {
    let m = wat("new F64([1, 2]).fill(0)");
    assert!(m.contains("(global $__typed (mut i32) (i32.const 0))"));
    assert!(m.contains(
        "(func $.init (global.set $__typed (i32.add (global.get $__heap_start) (i32.const 1048576))))"
    ));
    assert!(m.contains("(start $.init)"));
    assert!(m.contains("(func $_resetTypedArrays (export \"_resetTypedArrays\")"));
}

#[test]
fn math_imports_request_only_the_used_subset() {
    let m = wat("sin(x) + pow(x, 2)");
    assert!(m.contains("(import \"math\" \"sin\" (func $m_sin (param f64) (result f64)))"));
    assert!(m.contains(
        "(import \"math\" \"pow\" (func $m_pow (param f64) (param f64) (result f64)))"
    ));
    assert!(!m.contains("\"cos\""));
}

#[test]
fn random_imports_as_nullary() {
    let m = wat("random()");
    assert!(m.contains("(import \"math\" \"random\" (func $m_random (result f64)))"));
}

#[test]
fn signature_section_carries_main_arity() {
    let m = wat("x + y");
    assert!(m.contains("jz:sig"));
    // Two f64 parameters on main.
    assert!(m.contains("params"), "{m}");
    let payload = m
        .split("(@custom \"jz:sig\" \"")
        .nth(1)
        .and_then(|rest| rest.split("\")").next())
        .expect("custom section present");
    assert_eq!(payload.matches("f64").count(), 3, "{payload}");
}

#[test]
fn schemas_reach_the_signature_section() {
    let m = wat("let p = { x: 1, y: 2 }; p.x");
    let payload = m
        .split("(@custom \"jz:sig\" \"")
        .nth(1)
        .and_then(|rest| rest.split("\")").next())
        .expect("custom section present");
    assert!(payload.contains("schemas"));
    assert!(payload.contains("\\\"x\\\""), "{payload}");
}

#[test]
fn symbols_get_a_monotonic_counter() {
    let m = wat("Symbol() === Symbol()");
    assert!(m.contains("(global $__symbols (mut i32) (i32.const 1))"));
    assert!(m.contains("(func $__mk_symbol"));
}

#[test]
fn stdlib_closure_links_dependencies_once() {
    let m = wat("[1].join() + [2].join()");
    assert_eq!(m.matches("(func $__num_to_str").count(), 1);
    assert_eq!(m.matches("(func $__to_str").count(), 1);
}

struct OkAssembler;

impl Assembler for OkAssembler {
    fn assemble(&self, wat: &str) -> Result<Vec<u8>, String> {
        Ok(wat.as_bytes().to_vec())
    }
}

struct FailingAssembler;

impl Assembler for FailingAssembler {
    fn assemble(&self, _wat: &str) -> Result<Vec<u8>, String> {
        Err("unexpected token".to_string())
    }
}

#[test]
fn compile_hands_text_to_the_assembler() {
    let bytes = compile("1 + 1", &CompileOptions::default(), &OkAssembler).expect("ok");
    assert!(String::from_utf8(bytes).expect("utf8").contains("(module"));
}

#[test]
fn assembler_failures_attach_the_module_text() {
    let err = compile("1 + 1", &CompileOptions::default(), &FailingAssembler)
        .expect_err("should fail");
    match err {
        CompileError::Assemble { message, wat } => {
            assert_eq!(message, "unexpected token");
            assert!(wat.contains("(module"));
        }
        other => panic!("wrong error: {other}"),
    }
}

#[test]
fn export_all_exports_every_function() {
    let opts = CompileOptions {
        export_all: true,
        ..CompileOptions::default()
    };
    let m = compile_to_wat("function helper(x) { return x } helper(1)", &opts)
        .expect("compiles");
    assert!(m.contains("(export \"helper\")"));
}
