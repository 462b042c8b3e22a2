//! Builtin method lowerings.
//!
//! Every method is an inlined loop emitted at the call site; there is no
//! generic runtime call. Dispatch is keyed on the receiver's value kind
//! (regular array vs typed-array view) and the method name; typed-array
//! `map` additionally specializes on the element type for SIMD.

mod array;
mod simd;
mod typed;

use jz_ast::{Node, Op};

use crate::context::Generator;
use crate::error::CompileError;
use crate::fragment::{Fragment, ValueKind};

impl Generator {
    pub(crate) fn gen_method_call(
        &mut self,
        obj: &Node,
        method: &str,
        args: &[&Node],
    ) -> Result<Fragment, CompileError> {
        let target = self.gen(obj)?;
        match target.kind {
            // Values of unknown kind dispatch as arrays; the smart
            // accessors sort out ring and flat forms at runtime.
            ValueKind::Array | ValueKind::F64 => {
                self.array_method(obj, target, method, args)
            }
            ValueKind::TypedArray => self.typed_method(target, method, args),
            kind => Err(CompileError::InvalidMethod {
                method: method.to_string(),
                kind,
            }),
        }
    }

    /// The parameter list and body of a required arrow callback.
    pub(crate) fn callback<'a>(
        &self,
        method: &str,
        node: &'a Node,
    ) -> Result<(Vec<String>, &'a Node), CompileError> {
        match node {
            Node::Op(Op::Arrow, children) if children.len() == 2 => {
                Ok((children[0].flatten_params(), &children[1]))
            }
            other => Err(CompileError::CallbackRequired {
                method: method.to_string(),
                found: other.to_string(),
            }),
        }
    }

    /// Compile a callback body with its parameters bound to the loop's
    /// locals. Callbacks are inlined, never compiled to separate functions.
    pub(crate) fn inline_callback(
        &mut self,
        params: &[String],
        bindings: &[(String, ValueKind)],
        body: &Node,
    ) -> Result<Fragment, CompileError> {
        let bound: Vec<&String> = params.iter().take(bindings.len()).collect();
        for (param, (wat, kind)) in bound.iter().zip(bindings) {
            self.shadow(param, wat.clone(), *kind);
        }
        let result = self.gen(body);
        for param in bound.iter().rev() {
            self.unshadow(param);
        }
        result
    }

    pub(crate) fn expect_args(
        &self,
        method: &str,
        args: &[&Node],
        min: usize,
        max: usize,
    ) -> Result<(), CompileError> {
        if args.len() < min || args.len() > max {
            return Err(CompileError::WrongArity {
                what: method.to_string(),
                expected: min,
                got: args.len(),
            });
        }
        Ok(())
    }
}
