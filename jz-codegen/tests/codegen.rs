//! Expression and statement lowering, observed through the emitted module
//! text.

use jz_codegen::{compile_to_wat, CompileError, CompileOptions};

fn wat(src: &str) -> String {
    compile_to_wat(src, &CompileOptions::default()).expect("compiles")
}

#[test]
fn integer_literals_stay_in_i32_arithmetic() {
    let m = wat("1 + 2");
    assert!(m.contains("(i32.add (i32.const 1) (i32.const 2))"), "{m}");
}

#[test]
fn mixed_arithmetic_promotes_to_f64() {
    let m = wat("1.5 + 2");
    assert!(m.contains("(f64.add (f64.const 1.5) (f64.convert_i32_s (i32.const 2)))"));
}

#[test]
fn free_identifiers_become_main_parameters() {
    let m = wat("x * 2 + 1");
    assert!(m.contains("(func $.main (export \"main\") (param $x f64) (result f64)"));
    assert!(m.contains("f64.mul"));
}

#[test]
fn single_arrow_program_is_main() {
    let m = wat("x => x * 2 + 1");
    assert!(m.contains("(func $.main (export \"main\") (param $x f64) (result f64)"));
    // No closure machinery for the entry arrow itself.
    assert!(!m.contains("call_indirect"));
}

#[test]
fn integer_modulo_uses_rem() {
    assert!(wat("7 % 3").contains("(i32.rem_s (i32.const 7) (i32.const 3))"));
}

#[test]
fn float_modulo_uses_the_trunc_formula() {
    let m = wat("a % b");
    assert!(m.contains("(f64.trunc (f64.div"), "{m}");
    assert!(m.contains("f64.sub"));
}

#[test]
fn shift_counts_are_masked_to_five_bits() {
    let m = wat("a << b");
    assert!(m.contains("(i32.const 31)"));
    assert!(m.contains("i32.shl"));
}

#[test]
fn logical_and_preserves_operand_kind() {
    let m = wat("a && b");
    // Both operands are f64 parameters, so the typed if is f64.
    assert!(m.contains("(if (result f64)"), "{m}");
    assert!(m.contains("(f64.ne (local.get $.t"), "{m}");
}

#[test]
fn nullish_is_keyed_on_zero() {
    let m = wat("a ?? b");
    assert!(m.contains("(f64.eq (local.get $.t"), "{m}");
}

#[test]
fn ternary_coerces_to_a_common_kind() {
    let m = wat("a ? 1 : 2");
    assert!(m.contains("(if (result i32)"), "{m}");
}

#[test]
fn top_level_lets_become_globals() {
    let m = wat("let y = 5; y + 1");
    assert!(m.contains("(global $y (mut f64) (f64.const 0))"));
    assert!(m.contains("(global.set $y"));
}

#[test]
fn locals_compile_as_tees() {
    let m = wat("x => { let y = x + 1; y * 2 }");
    assert!(m.contains("(local $y f64)"));
    assert!(m.contains("(local.tee $y"));
}

#[test]
fn loops_use_the_block_loop_shape() {
    let m = wat("let s = 0; for (let i = 0; i < 3; i += 1) { s += i } s");
    assert!(m.contains("(block $.done"));
    assert!(m.contains("(loop $.body"));
    assert!(m.contains("(br_if $.done"));
    assert!(m.contains("(br $.body"));
}

#[test]
fn while_continue_targets_the_loop_head() {
    let m = wat("let i = 0; while (i < 10) { i += 1; continue } i");
    assert!(m.contains("(br $.body"), "{m}");
}

#[test]
fn exceptions_declare_the_tag() {
    let m = wat("try { throw 7 } catch (e) { e }");
    assert!(m.contains("(tag $.err (param f64))"));
    assert!(m.contains("(throw $.err"));
    assert!(m.contains("(catch $.err"));
}

#[test]
fn short_strings_are_sso_constants() {
    let m = wat("\"hi\"");
    // No interned data needed for an SSO literal.
    assert!(m.contains("(f64.const nan:0x"), "{m}");
    assert!(!m.contains("(data (i32.const 88)"));
}

#[test]
fn long_strings_are_interned() {
    let m = wat("\"hello, world\"");
    assert!(m.contains("(data (i32.const 88)"), "{m}");
}

#[test]
fn string_equality_goes_through_str_eq() {
    let m = wat("\"hi\" === \"hi\"");
    assert!(m.contains("(call $__str_eq"));
    assert!(m.contains("(func $__str_eq"));
}

#[test]
fn general_equality_goes_through_f64_eq() {
    let m = wat("a === b");
    assert!(m.contains("(call $__f64_eq"));
}

#[test]
fn typeof_maps_the_category_code() {
    let m = wat("typeof x");
    assert!(m.contains("(call $__typeof_code"));
    assert!(m.contains("select"));
}

#[test]
fn unknown_identifier_inside_a_closure_fails() {
    let err = compile_to_wat("let f = () => qq1z; f()", &CompileOptions::default())
        .expect_err("should fail");
    assert!(matches!(err, CompileError::UnknownIdentifier(name) if name == "qq1z"));
}

#[test]
fn callback_methods_reject_non_arrows() {
    let err = compile_to_wat("[1, 2, 3].map(5)", &CompileOptions::default())
        .expect_err("should fail");
    assert!(matches!(err, CompileError::CallbackRequired { .. }));
}

#[test]
fn loop_control_outside_a_loop_fails() {
    let err =
        compile_to_wat("break", &CompileOptions::default()).expect_err("should fail");
    assert!(matches!(err, CompileError::LoopControlOutsideLoop));
}

#[test]
fn builtin_arity_is_checked() {
    let err = compile_to_wat("sqrt(1, 2)", &CompileOptions::default())
        .expect_err("should fail");
    assert!(matches!(err, CompileError::WrongArity { .. }));
}

#[test]
fn parse_errors_propagate_unchanged() {
    let err =
        compile_to_wat("let = 3", &CompileOptions::default()).expect_err("should fail");
    assert!(matches!(err, CompileError::Parse(_)));
}

#[test]
fn native_math_lowers_to_instructions() {
    let m = wat("sqrt(abs(x))");
    assert!(m.contains("(f64.sqrt (f64.abs (local.get $x)))"));
    assert!(!m.contains("(import \"math\""));
}

#[test]
fn underscore_names_are_implicit_locals() {
    let m = wat("_acc = 3; _acc");
    assert!(m.contains("(local $_acc f64)"));
}
