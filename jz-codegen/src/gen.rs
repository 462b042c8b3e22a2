//! Expression lowering: the uniform `gen(node) → fragment` contract and the
//! whole-program driver.

mod closure;
mod control;
mod expr;
pub(crate) mod member;

use jz_ast::{Node, Op};

use crate::analyzer::{analyze, hoisted_vars};
use crate::context::{Frame, FuncInfo, Generator, GlobalInfo};
use crate::error::CompileError;
use crate::fragment::{Fragment, ValueKind};

/// Render an f64 as a WAT constant operand.
pub(crate) fn fmt_f64(v: f64) -> String {
    if v.is_nan() {
        "nan".to_string()
    } else if v == f64::INFINITY {
        "inf".to_string()
    } else if v == f64::NEG_INFINITY {
        "-inf".to_string()
    } else {
        format!("{v:?}")
    }
}

fn is_fn_decl(node: &Node) -> bool {
    node.is_op(Op::Function) || node.is_op(Op::Export)
}

impl Generator {
    /// Lower one AST node to a typed WAT fragment. The fragment's text is a
    /// complete folded expression that evaluates to exactly one value.
    pub(crate) fn gen(&mut self, node: &Node) -> Result<Fragment, CompileError> {
        match node {
            Node::Null => Ok(Fragment::new("(f64.const nan)", ValueKind::F64)),
            Node::Num(v) => Ok(self.gen_number(*v)),
            Node::Bool(b) => Ok(Fragment::new(
                format!("(i32.const {})", *b as i32),
                ValueKind::Bool,
            )),
            Node::Str(s) => Ok(self.gen_string_literal(s)),
            Node::Ident(name) => self.gen_ident(name),
            Node::Op(op, children) => self.gen_op(*op, children, node),
        }
    }

    fn gen_op(
        &mut self,
        op: Op,
        children: &[Node],
        node: &Node,
    ) -> Result<Fragment, CompileError> {
        match op {
            Op::Assign => self.gen_assign_node(children),
            Op::AddAssign
            | Op::SubAssign
            | Op::MulAssign
            | Op::DivAssign
            | Op::RemAssign => self.gen_compound_assign(op, children),
            Op::Let => self.gen_let(children),
            Op::Arrow => {
                let [params, body] = children else {
                    return Err(CompileError::WrongArity {
                        what: "=>".into(),
                        expected: 2,
                        got: children.len(),
                    });
                };
                self.gen_arrow(params, body)
            }
            Op::Function => {
                // A function expression is an arrow with a throwaway name.
                let [_, params, body] = children else {
                    return Err(CompileError::WrongArity {
                        what: "function".into(),
                        expected: 3,
                        got: children.len(),
                    });
                };
                self.gen_arrow(params, body)
            }
            Op::Call => self.gen_call(children),
            Op::New => self.gen_new(children),
            Op::Member => self.gen_member(children),
            Op::Index => self.gen_index(children),
            Op::ArrayLit => self.gen_array_lit(children),
            Op::ObjectLit => self.gen_object_lit(children),
            Op::Ternary => self.gen_ternary(children),
            Op::And | Op::Or | Op::Nullish => self.gen_logic(op, children),
            Op::Not | Op::Neg | Op::BitNot | Op::Typeof => self.gen_unary(op, children),
            Op::Add
            | Op::Sub
            | Op::Mul
            | Op::Div
            | Op::Rem
            | Op::Eq
            | Op::Ne
            | Op::StrictEq
            | Op::StrictNe
            | Op::Lt
            | Op::Le
            | Op::Gt
            | Op::Ge => self.gen_binary(op, children),
            Op::BitAnd | Op::BitOr | Op::BitXor | Op::Shl | Op::Shr | Op::Ushr => {
                self.gen_bitwise(op, children)
            }
            Op::Comma => self.gen_comma(children),
            Op::Block => {
                let text = self.gen_body(node)?;
                Ok(Fragment::new(
                    format!("(block (result f64)\n{text})"),
                    ValueKind::F64,
                ))
            }
            // A statement in expression position evaluates to zero.
            Op::If
            | Op::For
            | Op::While
            | Op::Do
            | Op::Return
            | Op::Break
            | Op::Continue
            | Op::Throw
            | Op::Try
            | Op::Export => {
                let text = self.gen_stmt(node)?;
                Ok(Fragment::new(
                    format!("(block (result f64)\n{text}\n(f64.const 0))"),
                    ValueKind::F64,
                ))
            }
        }
    }

    /// Compile a whole program to module text.
    ///
    /// Top-level `let`s become module globals initialized at the head of
    /// `main`; top-level functions compile to named module functions; the
    /// remaining statements form the body of `main`. A program that is a
    /// single arrow expression becomes `main` itself, adopting the arrow's
    /// parameters. Otherwise the program's free identifiers, in name order,
    /// become `main`'s parameters.
    pub fn compile_program(&mut self, program: &Node) -> Result<String, CompileError> {
        let _span = tracing::debug_span!("codegen").entered();
        let stmts: Vec<Node> = match program {
            Node::Op(Op::Block, children) => children.clone(),
            other => vec![other.clone()],
        };

        // Pass 1: register top-level names so bodies can reference them in
        // any order.
        for stmt in &stmts {
            self.register_top_level(stmt);
        }

        // Pass 2: compile function declarations.
        for stmt in &stmts {
            if is_fn_decl(stmt) {
                self.compile_named_function(stmt)?;
            }
        }

        // Pass 3: the main function.
        let body_stmts: Vec<Node> = stmts
            .iter()
            .filter(|&s| !is_fn_decl(s))
            .cloned()
            .collect();
        let (main_params, main_body) = if body_stmts.len() == 1
            && body_stmts[0].is_op(Op::Arrow)
            && self.globals.is_empty()
        {
            let children = body_stmts[0].children();
            (children[0].flatten_params(), vec![children[1].clone()])
        } else {
            let info = analyze(program, &[]);
            let params: Vec<String> = info
                .free
                .iter()
                .filter(|n| !self.globals.contains_key(*n) && !self.functions.contains_key(*n))
                .cloned()
                .collect();
            (params, body_stmts)
        };

        let main_block = Node::Op(Op::Block, main_body);
        let mut hoisted: Vec<String> = hoisted_vars(&main_block, &main_params)
            .into_iter()
            .collect();
        hoisted.retain(|n| !self.globals.contains_key(n) && !self.functions.contains_key(n));

        let main_text = if self.functions.contains_key("main") {
            self.main_arity = self
                .functions
                .get("main")
                .map(|f| f.arity)
                .unwrap_or_default();
            self.compile_main_wrapper(&main_block)?
        } else {
            self.main_arity = main_params.len();
            self.compile_function(
                "$.main",
                main_params,
                hoisted,
                Vec::new(),
                false,
                &main_block,
                Some("main"),
            )?
        };

        self.finish(main_text)
    }

    fn register_top_level(&mut self, stmt: &Node) {
        let (decl, exported) = match stmt {
            Node::Op(Op::Export, inner) => match inner.first() {
                Some(f) => (f, true),
                None => return,
            },
            other => (other, false),
        };
        match decl {
            Node::Op(Op::Function, children) => {
                if let [name, params, _] = children.as_slice() {
                    if let Some(name) = name.as_ident() {
                        self.functions.insert(
                            name.to_string(),
                            FuncInfo {
                                wat_name: format!("${name}"),
                                arity: params.flatten_params().len(),
                                exported: exported || self.opts.export_all,
                                table_index: None,
                            },
                        );
                    }
                }
            }
            Node::Op(Op::Let, children) => {
                if let Some(name) = children.first().and_then(Node::as_ident) {
                    self.globals.insert(name.to_string(), GlobalInfo::default());
                }
            }
            Node::Op(Op::Block, children) => {
                // A multi-declarator `let` parses to a block of lets.
                for child in children {
                    self.register_top_level(child);
                }
            }
            _ => {}
        }
    }

    fn compile_named_function(&mut self, stmt: &Node) -> Result<(), CompileError> {
        let decl = match stmt {
            Node::Op(Op::Export, inner) => inner.first().unwrap_or(stmt),
            other => other,
        };
        let [name, params, body] = decl.children() else {
            return Ok(());
        };
        let Some(name) = name.as_ident() else {
            return Ok(());
        };
        let params = params.flatten_params();
        let hoisted: Vec<String> = hoisted_vars(body, &params).into_iter().collect();
        let wat_name = format!("${name}");
        let text =
            self.compile_function(&wat_name, params, hoisted, Vec::new(), true, body, None)?;
        self.emitted.push(text);
        Ok(())
    }

    /// When the user declared `main` themselves, the synthesized entry is a
    /// thin export wrapper: remaining top-level statements, then the call.
    fn compile_main_wrapper(&mut self, body: &Node) -> Result<String, CompileError> {
        let arity = self
            .functions
            .get("main")
            .map(|f| f.arity)
            .unwrap_or_default();
        let params: Vec<String> = (0..arity).map(|i| format!("a{i}")).collect();
        self.frames.push(Frame {
            name: "$.main".into(),
            params: params.clone(),
            ..Frame::default()
        });
        let prologue = self.gen_stmt(body)?;
        let frame = self.frames.pop().expect("main wrapper frame");
        let mut text = String::from("(func $.main (export \"main\")");
        for p in &params {
            text.push_str(&format!(" (param ${p} f64)"));
        }
        text.push_str(" (result f64)\n");
        for (name, ty) in &frame.scratch {
            text.push_str(&format!("  (local {name} {ty})\n"));
        }
        for (_, local) in &frame.locals {
            if !local.wat.starts_with("$.") {
                text.push_str(&format!("  (local {} f64)\n", local.wat));
            }
        }
        if !prologue.is_empty() {
            text.push_str(&prologue);
            text.push('\n');
        }
        text.push_str("  (call $main (i32.const 0)");
        for p in &params {
            text.push_str(&format!(" (local.get ${p})"));
        }
        text.push_str("))");
        Ok(text)
    }
}
