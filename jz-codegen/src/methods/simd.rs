//! SIMD pattern recognition for the typed-array `map` lowering.
//!
//! Before the scalar loop is emitted, the callback body is matched against a
//! small grammar over the callback parameter `x`: `x*c`, `c*x`, `x+c`,
//! `c+x`, `x-c`, `x/c`, `-x`, `abs(x)`, `sqrt(x)`, `ceil(x)`, `floor(x)`,
//! and for integer element types `x&c`, `x|c`, `x^c`, `x<<c`, `x>>c`,
//! `x>>>c`. Constants fold through unary minus. Anything else falls back to
//! the scalar lowering with identical semantics.

use jz_ast::{Node, Op};
use jz_types::ElementType;

use crate::gen::fmt_f64;

/// A recognized vectorizable callback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum SimdOp {
    Mul(f64),
    Add(f64),
    Sub(f64),
    Div(f64),
    Neg,
    Abs,
    Sqrt,
    Ceil,
    Floor,
    And(f64),
    Or(f64),
    Xor(f64),
    Shl(f64),
    Shr(f64),
    Ushr(f64),
}

fn const_of(node: &Node) -> Option<f64> {
    match node {
        Node::Num(v) => Some(*v),
        Node::Op(Op::Neg, children) => children.first().and_then(const_of).map(|v| -v),
        _ => None,
    }
}

fn is_param(node: &Node, param: &str) -> bool {
    node.as_ident() == Some(param)
}

/// `x ⊕ c`, and also `c ⊕ x` when the operator commutes.
fn with_const(
    children: &[Node],
    param: &str,
    commutes: bool,
) -> Option<f64> {
    let [a, b] = children else { return None };
    if is_param(a, param) {
        return const_of(b);
    }
    if commutes && is_param(b, param) {
        return const_of(a);
    }
    None
}

pub(crate) fn detect(body: &Node, param: &str) -> Option<SimdOp> {
    match body {
        // A single-expression block body vectorizes like the expression.
        Node::Op(Op::Block, children) if children.len() == 1 => {
            detect(&children[0], param)
        }
        Node::Op(Op::Mul, children) => with_const(children, param, true).map(SimdOp::Mul),
        Node::Op(Op::Add, children) => with_const(children, param, true).map(SimdOp::Add),
        Node::Op(Op::Sub, children) => with_const(children, param, false).map(SimdOp::Sub),
        Node::Op(Op::Div, children) => with_const(children, param, false).map(SimdOp::Div),
        Node::Op(Op::BitAnd, children) => {
            with_const(children, param, true).map(SimdOp::And)
        }
        Node::Op(Op::BitOr, children) => with_const(children, param, true).map(SimdOp::Or),
        Node::Op(Op::BitXor, children) => {
            with_const(children, param, true).map(SimdOp::Xor)
        }
        Node::Op(Op::Shl, children) => with_const(children, param, false).map(SimdOp::Shl),
        Node::Op(Op::Shr, children) => with_const(children, param, false).map(SimdOp::Shr),
        Node::Op(Op::Ushr, children) => {
            with_const(children, param, false).map(SimdOp::Ushr)
        }
        Node::Op(Op::Neg, children) => {
            children.first().filter(|c| is_param(c, param)).map(|_| SimdOp::Neg)
        }
        Node::Op(Op::Call, children) => {
            let [callee, arg] = children.as_slice() else {
                return None;
            };
            if !is_param(arg, param) {
                return None;
            }
            match callee.as_ident()? {
                "abs" => Some(SimdOp::Abs),
                "sqrt" => Some(SimdOp::Sqrt),
                "ceil" => Some(SimdOp::Ceil),
                "floor" => Some(SimdOp::Floor),
                _ => None,
            }
        }
        _ => None,
    }
}

fn splat(elem: ElementType, c: f64) -> String {
    match elem {
        ElementType::F64 => format!("(f64x2.splat (f64.const {}))", fmt_f64(c)),
        ElementType::F32 => format!("(f32x4.splat (f32.const {}))", fmt_f64(c)),
        _ => format!("(i32x4.splat (i32.const {}))", c as i64 as i32),
    }
}

/// The vector expression for one lane group, or `None` when the operation
/// is not available for this element type (integer division and rounding,
/// float bitwise).
pub(crate) fn vector_text(op: SimdOp, elem: ElementType, lanes: &str) -> Option<String> {
    let shape = elem.vector_shape()?;
    if elem.is_float() {
        let mn = match op {
            SimdOp::Mul(_) => "mul",
            SimdOp::Add(_) => "add",
            SimdOp::Sub(_) => "sub",
            SimdOp::Div(_) => "div",
            SimdOp::Neg => "neg",
            SimdOp::Abs => "abs",
            SimdOp::Sqrt => "sqrt",
            SimdOp::Ceil => "ceil",
            SimdOp::Floor => "floor",
            _ => return None,
        };
        return Some(match op {
            SimdOp::Mul(c) | SimdOp::Add(c) | SimdOp::Sub(c) | SimdOp::Div(c) => {
                format!("({shape}.{mn} {lanes} {})", splat(elem, c))
            }
            _ => format!("({shape}.{mn} {lanes})"),
        });
    }
    Some(match op {
        SimdOp::Mul(c) => format!("(i32x4.mul {lanes} {})", splat(elem, c)),
        SimdOp::Add(c) => format!("(i32x4.add {lanes} {})", splat(elem, c)),
        SimdOp::Sub(c) => format!("(i32x4.sub {lanes} {})", splat(elem, c)),
        SimdOp::Neg => format!("(i32x4.neg {lanes})"),
        SimdOp::Abs => format!("(i32x4.abs {lanes})"),
        SimdOp::And(c) => format!("(v128.and {lanes} {})", splat(elem, c)),
        SimdOp::Or(c) => format!("(v128.or {lanes} {})", splat(elem, c)),
        SimdOp::Xor(c) => format!("(v128.xor {lanes} {})", splat(elem, c)),
        SimdOp::Shl(c) => format!("(i32x4.shl {lanes} (i32.const {}))", c as i64 as i32),
        SimdOp::Shr(c) => {
            let mn = if elem == ElementType::U32 { "shr_u" } else { "shr_s" };
            format!("(i32x4.{mn} {lanes} (i32.const {}))", c as i64 as i32)
        }
        SimdOp::Ushr(c) => format!("(i32x4.shr_u {lanes} (i32.const {}))", c as i64 as i32),
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use jz_ast::parse;
    use rstest::rstest;

    fn arrow_body(src: &str) -> (Node, String) {
        let program = parse(src).expect("parse");
        let Node::Op(Op::Block, stmts) = program else {
            panic!("not a block");
        };
        let Node::Op(Op::Arrow, children) = stmts.into_iter().next().expect("stmt")
        else {
            panic!("not an arrow");
        };
        let param = children[0]
            .flatten_params()
            .into_iter()
            .next()
            .expect("param");
        (children[1].clone(), param)
    }

    #[rstest]
    #[case("x => x * 2", SimdOp::Mul(2.0))]
    #[case("x => 2 * x", SimdOp::Mul(2.0))]
    #[case("x => x + 1", SimdOp::Add(1.0))]
    #[case("x => 1 + x", SimdOp::Add(1.0))]
    #[case("x => x - 3", SimdOp::Sub(3.0))]
    #[case("x => x / 4", SimdOp::Div(4.0))]
    #[case("x => x * -2", SimdOp::Mul(-2.0))]
    #[case("x => -x", SimdOp::Neg)]
    #[case("x => abs(x)", SimdOp::Abs)]
    #[case("x => sqrt(x)", SimdOp::Sqrt)]
    #[case("x => x & 255", SimdOp::And(255.0))]
    #[case("x => x << 2", SimdOp::Shl(2.0))]
    #[case("x => x >>> 1", SimdOp::Ushr(1.0))]
    fn recognized(#[case] src: &str, #[case] expected: SimdOp) {
        let (body, param) = arrow_body(src);
        assert_eq!(detect(&body, &param), Some(expected));
    }

    #[rstest]
    #[case("x => x * x")]
    #[case("x => 2 - x")]
    #[case("x => 2 / x")]
    #[case("x => x * 2 + 1")]
    #[case("x => sin(x)")]
    #[case("(x, i) => x * i")]
    fn rejected(#[case] src: &str) {
        let (body, param) = arrow_body(src);
        assert_eq!(detect(&body, &param), None);
    }

    #[test]
    fn integer_types_exclude_rounding_and_division() {
        assert!(vector_text(SimdOp::Div(2.0), ElementType::I32, "(v)").is_none());
        assert!(vector_text(SimdOp::Sqrt, ElementType::U32, "(v)").is_none());
        assert!(vector_text(SimdOp::Floor, ElementType::I32, "(v)").is_none());
    }

    #[test]
    fn float_types_exclude_bitwise() {
        assert!(vector_text(SimdOp::And(1.0), ElementType::F64, "(v)").is_none());
        assert!(vector_text(SimdOp::Shl(1.0), ElementType::F32, "(v)").is_none());
    }

    #[test]
    fn narrow_types_never_vectorize() {
        assert!(vector_text(SimdOp::Mul(2.0), ElementType::I16, "(v)").is_none());
        assert!(vector_text(SimdOp::Add(1.0), ElementType::U8, "(v)").is_none());
    }

    #[test]
    fn unsigned_shift_uses_logical_shift() {
        let text = vector_text(SimdOp::Shr(1.0), ElementType::U32, "(v)").expect("text");
        assert!(text.contains("shr_u"));
        let text = vector_text(SimdOp::Shr(1.0), ElementType::I32, "(v)").expect("text");
        assert!(text.contains("shr_s"));
    }
}
