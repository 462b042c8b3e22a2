//! Array and typed-array method lowerings: inlined loops, ring conversion,
//! and the SIMD specialization of typed-array `map`.

use jz_codegen::{compile_to_wat, CompileError, CompileOptions};

fn wat(src: &str) -> String {
    compile_to_wat(src, &CompileOptions::default()).expect("compiles")
}

#[test]
fn constant_literals_live_in_the_static_segment() {
    let m = wat("let a = [1, 2, 3]; a");
    assert!(m.contains("(data (i32.const 88)"), "{m}");
    // The pointer to it is a NaN constant, not an allocation.
    assert!(m.contains("(f64.const nan:0x"));
}

#[test]
fn filter_then_reduce_inline_both_loops() {
    let m = wat("[1, -2, 3, -4, 5].filter(x => x > 0).reduce((a, c) => a + c, 0)");
    // filter allocates a maximum-size buffer and rebinds the length header
    // to the kept count.
    assert!(m.contains("(f64.store (i32.sub (local.get $.dbase"), "{m}");
    // reduce folds through an accumulator local.
    assert!(m.contains("(local.set $.acc"));
    // No generic runtime calls: both are loops at the call site.
    assert!(m.contains("(loop $.body"));
}

#[test]
fn map_binds_the_callback_parameter_to_a_loop_local() {
    let m = wat("[1, 2].map(x => x * x)");
    assert!(m.contains("(local.set $.x"), "{m}");
    assert!(m.contains("(f64.mul (local.get $.x"), "{m}");
}

#[test]
fn map_with_index_parameter_refreshes_it() {
    let m = wat("[1, 2].map((x, i) => x + i)");
    assert!(m.contains("(local.set $.xi"), "{m}");
}

#[test]
fn shift_unshift_convert_to_ring_form() {
    let m = wat("let a = [1, 2, 3]; a.shift(); a.unshift(0); a");
    assert!(m.contains("(call $__to_ring"), "{m}");
    assert!(m.contains("(call $__ring_shift"));
    assert!(m.contains("(call $__ring_unshift"));
    // The variable is rebound, since ringness lives in the pointer.
    assert!(m.contains("(global.set $a (call $__to_ring"));
    // The ring helper group is linked in.
    assert!(m.contains("(func $__alloc_ring"));
    assert!(m.contains("(func $__ring_resize"));
}

#[test]
fn pop_on_any_form_uses_the_smart_helper() {
    let m = wat("let a = [1, 2]; a.pop()");
    assert!(m.contains("(call $__arr_pop (global.get $a))"));
}

#[test]
fn push_allocates_one_longer() {
    let m = wat("[1, 2].push(3)");
    assert!(m.contains("(call $__alloc (i32.const 1) (i32.add (local.get $.len"), "{m}");
}

#[test]
fn slice_normalizes_negative_endpoints() {
    let m = wat("[1, 2, 3, 4].slice(-2)");
    assert!(m.contains("(i32.add (local.get $.s"), "{m}");
    assert!(m.contains("(i32.lt_s (local.get $.s"), "{m}");
}

#[test]
fn at_yields_nan_out_of_range() {
    let m = wat("[1, 2].at(-1)");
    assert!(m.contains("(f64.const nan)"));
}

#[test]
fn sort_is_insertion_sort_with_f64_comparator() {
    let m = wat("[3, 1, 2].sort()");
    assert!(m.contains("(f64.gt"), "{m}");
    assert!(m.contains("$.idone"), "{m}");
    assert!(m.contains("(local.set $.key"));
}

#[test]
fn to_sorted_copies_before_sorting() {
    let m = wat("[3, 1, 2].toSorted()");
    assert!(m.contains("(call $__alloc (i32.const 1) (local.get $.len"), "{m}");
    assert!(m.contains("(local.set $.key"));
}

#[test]
fn flat_tests_pointerhood_of_elements() {
    let m = wat("[[1, 2], 3].flat()");
    assert!(m.contains("(call $__is_pointer"), "{m}");
    assert!(m.contains("(call $__ptr_type"));
}

#[test]
fn join_concatenates_textual_representations() {
    let m = wat("[1, 2, 3].join()");
    assert!(m.contains("(call $__strcat"));
    assert!(m.contains("(call $__to_str"));
    assert!(m.contains("(func $__num_to_str"));
    // The special numeric strings ride in the fixed static prefix.
    assert!(m.contains("(data (i32.const 16)"));
}

#[test]
fn typed_map_vectorizes_f64_by_two_lanes() {
    let m = wat("new F64([1, 2, 3, 4, 5]).map(x => x * 2)");
    assert!(m.contains("(v128.load"), "{m}");
    assert!(m.contains("(f64x2.mul"));
    assert!(m.contains("(f64x2.splat (f64.const 2.0))"));
    assert!(m.contains("(v128.store"));
    // Scalar remainder follows the vector loop.
    assert!(m.contains("$.vdone"));
    assert!(m.contains("(f64.store"));
}

#[test]
fn typed_map_vectorizes_integer_bitwise() {
    let m = wat("new I32([1, 2, 3, 4]).map(x => x & 255)");
    assert!(m.contains("(v128.and"), "{m}");
    assert!(m.contains("(i32x4.splat (i32.const 255))"));
}

#[test]
fn index_parameter_disables_simd() {
    let m = wat("new F64([1, 2]).map((x, i) => x * 2)");
    assert!(!m.contains("v128"), "{m}");
}

#[test]
fn float_bitwise_falls_back_to_scalar() {
    let m = wat("new F64([1, 2]).map(x => x & 1)");
    assert!(!m.contains("v128"), "{m}");
}

#[test]
fn simd_can_be_disabled_by_options() {
    let opts = CompileOptions {
        simd: false,
        ..CompileOptions::default()
    };
    let m = compile_to_wat("new F64([1, 2]).map(x => x * 2)", &opts).expect("compiles");
    assert!(!m.contains("v128"));
}

#[test]
fn subarray_shares_the_backing_store() {
    let m = wat("let t = new F64([1, 2, 3, 4]); let v = t.subarray(1, 3); v[0] = 99; t[1]");
    assert!(m.contains("(call $__mk_typed_subarray (global.get $t) (i32.const 1) (i32.const 3))"));
    // Writes through the view and reads through the source both go via
    // their data pointers.
    assert!(m.contains("(call $__typed_offset (global.get $v))"));
    assert!(m.contains("(call $__typed_offset (global.get $t))"));
    assert!(m.contains("(func $__mk_typed_view"));
}

#[test]
fn typed_sort_uses_the_element_comparator() {
    let m = wat("new I32([3, 1]).sort()");
    assert!(m.contains("(i32.gt_s"), "{m}");
    let m = wat("new U32([3, 1]).sort()");
    assert!(m.contains("(i32.gt_u"), "{m}");
    let m = wat("new F32([3, 1]).toSorted()");
    assert!(m.contains("(f32.gt"), "{m}");
}

#[test]
fn typed_arrays_have_no_push() {
    let err = compile_to_wat("new F64([1]).push(2)", &CompileOptions::default())
        .expect_err("should fail");
    assert!(matches!(err, CompileError::InvalidMethod { .. }));
}

#[test]
fn methods_on_non_arrays_fail() {
    let err = compile_to_wat("let f = () => 1; f.map(x => x)", &CompileOptions::default())
        .expect_err("should fail");
    assert!(matches!(err, CompileError::InvalidMethod { .. }));
}

#[test]
fn typed_filter_rebinds_the_view_length() {
    let m = wat("new F64([1, 2, 3]).filter(x => x > 1)");
    assert!(m.contains("(i32.store (call $__ptr_offset (local.get $.tdst"), "{m}");
}

#[test]
fn foreach_drops_the_callback_value() {
    let m = wat("[1, 2].forEach(x => x + 1)");
    assert!(m.contains("(drop"), "{m}");
}
