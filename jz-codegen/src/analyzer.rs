//! Closure analysis: free identifiers, per-closure capture lists, and the
//! hoisted-variable set of a function body.

use jz_ast::{Node, Op};
use std::collections::BTreeSet;

/// Names the generator resolves without a surrounding binding.
const BUILTIN_NAMES: &[&str] = &[
    "true", "false", "null", "undefined", "Infinity", "NaN", "PI", "E", "TAU",
    "SQRT2", "LN2", "LN10", "abs", "sqrt", "cbrt", "floor", "ceil", "trunc",
    "round", "sign", "min", "max", "sin", "cos", "tan", "asin", "acos", "atan",
    "atan2", "sinh", "cosh", "tanh", "log", "log2", "log10", "exp", "pow",
    "hypot", "random", "fract", "Symbol", "I8", "U8", "I16", "U16", "I32",
    "U32", "F32", "F64",
];

pub(crate) fn is_builtin_name(name: &str) -> bool {
    BUILTIN_NAMES.contains(&name)
}

/// What one scope level looks like after analysis.
#[derive(Debug, Clone)]
pub struct ScopeInfo {
    /// Identifiers referenced but not defined here: not declared, not a
    /// parameter, not a builtin, and not a leading-underscore local.
    pub free: BTreeSet<String>,
    /// Names defined in this scope: parameters, declarations, and
    /// assignment-as-declaration targets.
    pub defined: BTreeSet<String>,
    /// Directly nested functions, in source order.
    pub inner: Vec<InnerFn>,
}

/// One nested function found during analysis.
#[derive(Debug, Clone)]
pub struct InnerFn {
    /// Declaration name, `None` for arrows.
    pub name: Option<String>,
    /// Flattened parameter names.
    pub params: Vec<String>,
    /// The function body.
    pub body: Node,
    /// Names this function captures from the enclosing scope: its free set
    /// intersected with the enclosing defined set.
    pub captured: Vec<String>,
    /// Functions nested inside this one.
    pub inner: Vec<InnerFn>,
}

/// Analyze a function body against its parameter list.
pub fn analyze(body: &Node, params: &[String]) -> ScopeInfo {
    let mut info = ScopeInfo {
        free: BTreeSet::new(),
        defined: params.iter().cloned().collect(),
        inner: Vec::new(),
    };
    walk(body, &mut info);
    info
}

/// Locals of this function that some descendant closure captures. These
/// must live in a heap environment record rather than WASM locals.
pub fn hoisted_vars(body: &Node, params: &[String]) -> BTreeSet<String> {
    analyze(body, params)
        .inner
        .iter()
        .flat_map(|f| f.captured.iter().cloned())
        .collect()
}

fn mark_use(name: &str, info: &mut ScopeInfo) {
    if !info.defined.contains(name)
        && !is_builtin_name(name)
        && !name.starts_with('_')
    {
        info.free.insert(name.to_string());
    }
}

fn walk(node: &Node, info: &mut ScopeInfo) {
    match node {
        Node::Ident(name) => mark_use(name, info),
        Node::Op(Op::Let, children) => {
            if let Some(init) = children.get(1) {
                walk(init, info);
            }
            if let Some(name) = children.first().and_then(Node::as_ident) {
                info.defined.insert(name.to_string());
            }
        }
        Node::Op(Op::Assign, children) => {
            if let Some(value) = children.get(1) {
                walk(value, info);
            }
            match children.first() {
                // Assignment to a plain name declares it on first use.
                Some(Node::Ident(name)) => {
                    if !is_builtin_name(name) {
                        info.defined.insert(name.clone());
                    }
                }
                Some(target) => walk(target, info),
                None => {}
            }
        }
        Node::Op(Op::Arrow, children) => {
            if let [params, body] = children.as_slice() {
                nested(None, params, body, info);
            }
        }
        Node::Op(Op::Function, children) => {
            if let [name, params, body] = children.as_slice() {
                let name = name.as_ident().map(str::to_string);
                // The declaration name is visible to the body and to
                // subsequent siblings.
                if let Some(name) = &name {
                    info.defined.insert(name.clone());
                }
                nested(name, params, body, info);
            }
        }
        Node::Op(Op::Member, children) => {
            // The member name is not an identifier reference.
            if let Some(object) = children.first() {
                walk(object, info);
            }
        }
        Node::Op(Op::ObjectLit, pairs) => {
            for value in pairs.iter().skip(1).step_by(2) {
                walk(value, info);
            }
        }
        Node::Op(Op::Try, children) => {
            if let [body, name, handler] = children.as_slice() {
                walk(body, info);
                if let Some(name) = name.as_ident() {
                    info.defined.insert(name.to_string());
                }
                walk(handler, info);
            }
        }
        // `for (let x = …; …)` works out naturally: the init clause is
        // walked (and defines) before the condition, update, and body.
        Node::Op(_, children) => {
            for child in children {
                walk(child, info);
            }
        }
        _ => {}
    }
}

fn nested(name: Option<String>, params_node: &Node, body: &Node, info: &mut ScopeInfo) {
    let params = params_node.flatten_params();
    // The nested scope starts from its own parameters only; a declaration
    // name is visible to the function itself.
    let mut seed = params.clone();
    if let Some(name) = &name {
        seed.push(name.clone());
    }
    let sub = analyze(body, &seed);
    let captured: Vec<String> = sub
        .free
        .iter()
        .filter(|n| info.defined.contains(*n))
        .cloned()
        .collect();
    for free in &sub.free {
        if !info.defined.contains(free) {
            info.free.insert(free.clone());
        }
    }
    info.inner.push(InnerFn {
        name,
        params,
        body: body.clone(),
        captured,
        inner: sub.inner,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use jz_ast::parse;

    fn body(src: &str) -> Node {
        parse(src).expect("parse")
    }

    fn names(set: &BTreeSet<String>) -> Vec<&str> {
        set.iter().map(String::as_str).collect()
    }

    #[test]
    fn free_excludes_defined_and_builtins() {
        let info = analyze(&body("let a = b + PI; a + c"), &[]);
        assert_eq!(names(&info.free), ["b", "c"]);
        assert!(info.defined.contains("a"));
    }

    #[test]
    fn params_are_defined() {
        let info = analyze(&body("x + y"), &["x".into()]);
        assert_eq!(names(&info.free), ["y"]);
    }

    #[test]
    fn underscore_names_are_never_free() {
        let info = analyze(&body("_tmp + x"), &[]);
        assert_eq!(names(&info.free), ["x"]);
    }

    #[test]
    fn assignment_declares() {
        let info = analyze(&body("n = 1; n + 2"), &[]);
        assert!(info.free.is_empty());
        assert!(info.defined.contains("n"));
    }

    #[test]
    fn nested_capture_intersects_enclosing_scope() {
        let info = analyze(&body("let a = 1; b => a + b + g"), &[]);
        assert_eq!(info.inner.len(), 1);
        assert_eq!(info.inner[0].captured, ["a"]);
        // `g` is free in the arrow and unresolved here, so it bubbles up.
        assert_eq!(names(&info.free), ["g"]);
    }

    #[test]
    fn curried_arrows_propagate_through_middle_scopes() {
        let info = analyze(&body("a => b => a + b"), &[]);
        let outer = &info.inner[0];
        // The middle arrow captures `a` for the inner one.
        assert_eq!(outer.inner.len(), 1);
        assert_eq!(outer.inner[0].captured, ["a"]);
    }

    #[test]
    fn hoisted_is_the_union_of_direct_captures() {
        let hoisted = hoisted_vars(
            &body("let a = 1; let b = 2; let f = x => a + x; let g = y => b - y; f(g(a))"),
            &[],
        );
        assert_eq!(names(&hoisted), ["a", "b"]);
    }

    #[test]
    fn for_loop_variable_is_in_scope_for_the_clauses() {
        let info = analyze(&body("for (let i = 0; i < n; i += 1) { s = s + i }"), &[]);
        assert_eq!(names(&info.free), ["n", "s"]);

        let hoisted = hoisted_vars(&body("for (let i = 0; i < 3; i += 1) { f = () => i }"), &[]);
        assert_eq!(names(&hoisted), ["i"]);
    }

    #[test]
    fn destructured_params_flatten() {
        let info = analyze(&body("([a, [b]], c) => a + b + c + d"), &[]);
        assert_eq!(info.inner[0].params, ["a", "b", "c"]);
        assert_eq!(names(&info.free), ["d"]);
    }

    #[test]
    fn named_functions_see_themselves_and_siblings_see_them() {
        let info = analyze(
            &body("function fact(n) { return n < 2 ? 1 : n * fact(n - 1) } fact(5)"),
            &[],
        );
        assert!(info.free.is_empty());
        assert!(info.defined.contains("fact"));
    }

    #[test]
    fn member_names_are_not_references() {
        let info = analyze(&body("xs.map(x => x * 2)"), &[]);
        assert_eq!(names(&info.free), ["xs"]);
    }

    #[test]
    fn catch_binding_is_defined() {
        let info = analyze(&body("try { f() } catch (e) { e + 1 }"), &[]);
        assert_eq!(names(&info.free), ["f"]);
    }
}
