//! Arrow-function lowering, closure construction, and calls.
//!
//! A closure is `[table-index | env-length | env-offset]` packed into the
//! NaN payload. Every closure-called function takes its environment pointer
//! as an explicit i32 first parameter; non-capturing functions follow the
//! same path so any function reference is callable indirectly.

use jz_ast::{Node, Op};
use jz_types::RawValue;

use crate::analyzer::{analyze, hoisted_vars};
use crate::context::{Binding, Frame, Generator};
use crate::error::CompileError;
use crate::features::Features;
use crate::fragment::{Fragment, Schema, ValueKind};

/// Host math imports with one f64 parameter.
pub(crate) const MATH_UNARY: &[&str] = &[
    "sin", "cos", "tan", "asin", "acos", "atan", "sinh", "cosh", "tanh", "log",
    "log2", "log10", "exp", "cbrt", "fract",
];

/// Host math imports with two f64 parameters.
pub(crate) const MATH_BINARY: &[&str] = &["pow", "atan2", "hypot"];

/// How many chained applications a curried arrow admits.
fn arrow_chain(body: &Node) -> u8 {
    match body {
        Node::Op(Op::Arrow, children) if children.len() == 2 => {
            arrow_chain(&children[1]).saturating_add(1)
        }
        _ => 1,
    }
}

impl Generator {
    /// Lower an arrow function: compile the body as a synthetic top-level
    /// function, add it to the function table, and emit the closure value.
    pub(crate) fn gen_arrow(
        &mut self,
        params_node: &Node,
        body: &Node,
    ) -> Result<Fragment, CompileError> {
        let params = params_node.flatten_params();
        let info = analyze(body, &params);
        let mut captured = Vec::new();
        for free in &info.free {
            match self.lookup(free) {
                Some(
                    Binding::Local(_) | Binding::Hoisted(_) | Binding::Captured(_),
                ) => captured.push(free.clone()),
                // Globals and functions resolve directly; names that stay
                // unresolved fail inside the body with better context.
                _ => {}
            }
        }
        if captured.len() > 255 {
            return Err(CompileError::TooManyCaptures {
                got: captured.len(),
            });
        }

        // Capture sources read the creator's frame, so compute them before
        // entering the new one.
        let sources: Vec<String> = captured
            .iter()
            .map(|name| self.capture_source(name))
            .collect::<Result<_, _>>()?;

        let id = self.next_id();
        let fname = format!("$.lambda{id}");
        let index = self.table_entry(fname.clone())?;
        let arity = params.len().min(255) as u8;
        self.arities.insert(arity);
        let hoisted: Vec<String> = hoisted_vars(body, &params).into_iter().collect();
        let text = self.compile_function(
            &fname,
            params,
            hoisted,
            captured.clone(),
            true,
            body,
            None,
        )?;
        self.emitted.push(text);

        let schema = Schema::Arity(arrow_chain(body));
        if captured.is_empty() {
            return Ok(Fragment::new(
                RawValue::closure(index, 0, 0).wat_const(),
                ValueKind::Closure,
            )
            .with_schema(schema));
        }

        self.use_features(Features::MEMORY);
        let n = self.next_id();
        let envp = self.scratch_at("envp", n, "i32");
        let mut text = format!(
            "(block (result f64)\n(local.set {envp} (call $__ptr_offset (call $__alloc (i32.const 5) (i32.const {}))))\n",
            captured.len()
        );
        for (slot, source) in sources.iter().enumerate() {
            text.push_str(&format!(
                "(f64.store (i32.add (local.get {envp}) (i32.const {})) {source})\n",
                slot * 8
            ));
        }
        let aux = ((index as u16) << 8) | captured.len() as u16;
        text.push_str(&format!(
            "(call $__mkptr (i32.const 5) (i32.const {aux}) (local.get {envp})))"
        ));
        Ok(Fragment::new(text, ValueKind::Closure).with_schema(schema))
    }

    /// Where a captured value comes from at closure-creation time: the
    /// creator's own environment, the creator's incoming environment, or a
    /// plain local/global.
    fn capture_source(&mut self, name: &str) -> Result<String, CompileError> {
        match self.lookup(name) {
            Some(Binding::Hoisted(slot)) => Ok(format!(
                "(f64.load (i32.add (local.get $.own) (i32.const {})))",
                slot * 8
            )),
            Some(Binding::Captured(slot)) => Ok(format!(
                "(f64.load (i32.add (local.get $.env) (i32.const {})))",
                slot * 8
            )),
            Some(Binding::Local(local)) => Ok(Fragment::new(
                format!("(local.get {})", local.wat),
                local.kind,
            )
            .as_f64()
            .text),
            Some(Binding::Global(wat, _)) => Ok(format!("(global.get {wat})")),
            Some(Binding::Function(fname)) => {
                let index = self.function_table_index(&fname)?;
                Ok(RawValue::closure(index, 0, 0).wat_const())
            }
            None => Err(CompileError::UnknownIdentifier(name.to_string())),
        }
    }

    /// Compile one function into module text, under a fresh frame.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn compile_function(
        &mut self,
        wat_name: &str,
        params: Vec<String>,
        hoisted: Vec<String>,
        captured: Vec<String>,
        has_env: bool,
        body: &Node,
        export: Option<&str>,
    ) -> Result<String, CompileError> {
        if !hoisted.is_empty() {
            self.use_features(Features::MEMORY);
        }
        self.frames.push(Frame {
            name: wat_name.to_string(),
            params,
            hoisted,
            captured,
            has_env,
            ..Frame::default()
        });
        let body_text = self.gen_body(body)?;
        let frame = self.frames.pop().expect("function frame");

        let mut text = format!("(func {wat_name}");
        if let Some(name) = export {
            text.push_str(&format!(" (export \"{name}\")"));
        }
        if frame.has_env {
            text.push_str(" (param $.env i32)");
        }
        for p in &frame.params {
            text.push_str(&format!(" (param ${p} f64)"));
        }
        text.push_str(" (result f64)\n");
        if !frame.hoisted.is_empty() {
            text.push_str("  (local $.own i32)\n");
        }
        for (_, local) in &frame.locals {
            // Shadow entries alias scratch locals and are declared below.
            if !local.wat.starts_with("$.") {
                text.push_str(&format!("  (local {} f64)\n", local.wat));
            }
        }
        for (name, ty) in &frame.scratch {
            text.push_str(&format!("  (local {name} {ty})\n"));
        }
        if !frame.hoisted.is_empty() {
            text.push_str(&format!(
                "  (local.set $.own (call $__ptr_offset (call $__alloc (i32.const 5) (i32.const {}))))\n",
                frame.hoisted.len()
            ));
            // Hoisted parameters start life in the environment record.
            for (slot, name) in frame.hoisted.iter().enumerate() {
                if frame.params.contains(name) {
                    text.push_str(&format!(
                        "  (f64.store (i32.add (local.get $.own) (i32.const {})) (local.get ${name}))\n",
                        slot * 8
                    ));
                }
            }
        }
        text.push_str(&body_text);
        text.push(')');
        Ok(text)
    }

    pub(crate) fn gen_call(&mut self, children: &[Node]) -> Result<Fragment, CompileError> {
        let [callee, args_node] = children else {
            return Err(CompileError::WrongArity {
                what: "(".into(),
                expected: 2,
                got: children.len(),
            });
        };
        let args = args_node.flatten_args();

        // Method calls dispatch through the array/typed-array tables.
        if let Node::Op(Op::Member, mc) = callee {
            if let [obj, Node::Ident(method)] = mc.as_slice() {
                let method = method.clone();
                return self.gen_method_call(obj, &method, &args);
            }
        }

        if let Node::Ident(name) = callee {
            match self.lookup(name) {
                Some(Binding::Function(fname)) => {
                    return self.gen_direct_call(&fname, &args);
                }
                None => {
                    if let Some(frag) = self.gen_builtin_call(name, &args)? {
                        return Ok(frag);
                    }
                }
                _ => {}
            }
        }

        let callee = self.gen(callee)?;
        self.gen_closure_call(callee, &args)
    }

    fn gen_direct_call(
        &mut self,
        name: &str,
        args: &[&Node],
    ) -> Result<Fragment, CompileError> {
        let (wat, arity) = match self.functions.get(name) {
            Some(info) => (info.wat_name.clone(), info.arity),
            None => return Err(CompileError::UnknownIdentifier(name.to_string())),
        };
        if args.len() != arity {
            return Err(CompileError::WrongArity {
                what: name.to_string(),
                expected: arity,
                got: args.len(),
            });
        }
        let mut text = format!("(call {wat} (i32.const 0)");
        for &arg in args {
            text.push_str(&format!(" {}", self.gen(arg)?.as_f64().text));
        }
        text.push(')');
        Ok(Fragment::new(text, ValueKind::F64))
    }

    /// Call through a closure value: extract the environment offset and the
    /// table index from the payload and `call_indirect` at the exact arity.
    pub(crate) fn gen_closure_call(
        &mut self,
        callee: Fragment,
        args: &[&Node],
    ) -> Result<Fragment, CompileError> {
        self.use_features(Features::FUNC_TABLE | Features::MEMORY);
        let arity = args.len().min(255) as u8;
        self.arities.insert(arity);
        let n = self.next_id();
        let cl = self.scratch_at("cl", n, "f64");
        let mut arg_text = String::new();
        for &arg in args {
            arg_text.push_str(&format!("\n{}", self.gen(arg)?.as_f64().text));
        }
        let text = format!(
            "(block (result f64)\n(local.set {cl} {})\n(call_indirect (type $.fn{arity})\n(call $__ptr_offset (local.get {cl})){arg_text}\n(call $__closure_idx (local.get {cl}))))",
            callee.text
        );
        // A curried closure applied once is known to still be a closure.
        Ok(match callee.arity() {
            Some(remaining) if remaining > 1 => {
                Fragment::new(text, ValueKind::Closure)
                    .with_schema(Schema::Arity(remaining - 1))
            }
            _ => Fragment::new(text, ValueKind::F64),
        })
    }

    /// Builtin free functions: native f64 instructions, host math imports,
    /// the stdlib snippets, and `Symbol()`.
    fn gen_builtin_call(
        &mut self,
        name: &str,
        args: &[&Node],
    ) -> Result<Option<Fragment>, CompileError> {
        let native = match name {
            "abs" => Some("f64.abs"),
            "sqrt" => Some("f64.sqrt"),
            "floor" => Some("f64.floor"),
            "ceil" => Some("f64.ceil"),
            "trunc" => Some("f64.trunc"),
            "round" => Some("f64.nearest"),
            _ => None,
        };
        if let Some(mn) = native {
            let x = self.expect_one(name, args)?;
            return Ok(Some(Fragment::new(
                format!("({mn} {})", x.text),
                ValueKind::F64,
            )));
        }
        if name == "min" || name == "max" {
            let (a, b) = self.expect_two(name, args)?;
            let mn = if name == "min" { "f64.min" } else { "f64.max" };
            return Ok(Some(Fragment::new(
                format!("({mn} {} {})", a.text, b.text),
                ValueKind::F64,
            )));
        }
        if name == "sign" {
            let x = self.expect_one(name, args)?;
            self.request_stdlib("sign");
            return Ok(Some(Fragment::new(
                format!("(call $sign {})", x.text),
                ValueKind::F64,
            )));
        }
        if name == "random" {
            if !args.is_empty() {
                return Err(CompileError::WrongArity {
                    what: name.to_string(),
                    expected: 0,
                    got: args.len(),
                });
            }
            self.request_math("random");
            return Ok(Some(Fragment::new("(call $m_random)", ValueKind::F64)));
        }
        if let Some(mname) = MATH_UNARY.iter().find(|m| **m == name) {
            let x = self.expect_one(name, args)?;
            self.request_math(mname);
            return Ok(Some(Fragment::new(
                format!("(call $m_{mname} {})", x.text),
                ValueKind::F64,
            )));
        }
        if let Some(mname) = MATH_BINARY.iter().find(|m| **m == name) {
            let (a, b) = self.expect_two(name, args)?;
            self.request_math(mname);
            return Ok(Some(Fragment::new(
                format!("(call $m_{mname} {} {})", a.text, b.text),
                ValueKind::F64,
            )));
        }
        if name == "Symbol" {
            self.use_features(Features::SYMBOLS | Features::MEMORY);
            return Ok(Some(Fragment::new("(call $__mk_symbol)", ValueKind::F64)));
        }
        Ok(None)
    }

    fn expect_one(
        &mut self,
        what: &str,
        args: &[&Node],
    ) -> Result<Fragment, CompileError> {
        let &[arg] = args else {
            return Err(CompileError::WrongArity {
                what: what.to_string(),
                expected: 1,
                got: args.len(),
            });
        };
        Ok(self.gen(arg)?.as_f64())
    }

    fn expect_two(
        &mut self,
        what: &str,
        args: &[&Node],
    ) -> Result<(Fragment, Fragment), CompileError> {
        let &[a, b] = args else {
            return Err(CompileError::WrongArity {
                what: what.to_string(),
                expected: 2,
                got: args.len(),
            });
        };
        Ok((self.gen(a)?.as_f64(), self.gen(b)?.as_f64()))
    }
}
