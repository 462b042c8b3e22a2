//! Statement lowering: loops, conditionals, exceptions, and bodies.
//!
//! Loops share one shape: a `block $.done` enclosing a `loop $.body`, with a
//! branch-if-done at the top and a branch-to-body at the bottom. `break`
//! targets the block, `continue` the innermost point that re-enters the
//! iteration (the loop head for `while`, a dedicated inner block where an
//! update or condition must still run).

use jz_ast::{Node, Op};

use crate::context::{Generator, LoopLabels};
use crate::error::CompileError;
use crate::features::Features;

fn is_statement(node: &Node) -> bool {
    matches!(
        node,
        Node::Op(
            Op::Block
                | Op::If
                | Op::For
                | Op::While
                | Op::Do
                | Op::Return
                | Op::Break
                | Op::Continue
                | Op::Throw
                | Op::Try
                | Op::Function
                | Op::Export,
            _
        )
    )
}

impl Generator {
    /// Lower a node in statement position: the emitted text leaves nothing
    /// on the operand stack.
    pub(crate) fn gen_stmt(&mut self, node: &Node) -> Result<String, CompileError> {
        match node {
            Node::Op(Op::Block, stmts) => {
                let mut out = Vec::new();
                for stmt in stmts {
                    out.push(self.gen_stmt(stmt)?);
                }
                Ok(out.join("\n"))
            }
            Node::Op(Op::If, children) => self.gen_if(children),
            Node::Op(Op::For, children) => self.gen_for(children),
            Node::Op(Op::While, children) => self.gen_while(children),
            Node::Op(Op::Do, children) => self.gen_do(children),
            Node::Op(Op::Return, children) => {
                let value = match children.first() {
                    Some(Node::Null) | None => "(f64.const 0)".to_string(),
                    Some(v) => self.gen(v)?.as_f64().text,
                };
                Ok(format!("(return {value})"))
            }
            Node::Op(Op::Break, _) => {
                let label = self
                    .loop_stack
                    .last()
                    .map(|l| l.done.clone())
                    .ok_or(CompileError::LoopControlOutsideLoop)?;
                Ok(format!("(br {label})"))
            }
            Node::Op(Op::Continue, _) => {
                let label = self
                    .loop_stack
                    .last()
                    .map(|l| l.cont.clone())
                    .ok_or(CompileError::LoopControlOutsideLoop)?;
                Ok(format!("(br {label})"))
            }
            Node::Op(Op::Throw, children) => {
                self.use_features(Features::EXCEPTIONS);
                let value = match children.first() {
                    Some(v) => self.gen(v)?.as_f64().text,
                    None => "(f64.const nan)".to_string(),
                };
                Ok(format!("(throw $.err {value})"))
            }
            Node::Op(Op::Try, children) => self.gen_try(children),
            Node::Op(Op::Function, children) => {
                // A nested declaration binds its name to a closure value.
                let [name, params, body] = children.as_slice() else {
                    return Ok(String::new());
                };
                // The local exists before the closure is built, so the body
                // compiles even when it names itself.
                if let Some(n) = name.as_ident() {
                    self.declare_local(n);
                }
                let desugared = Node::Op(
                    Op::Let,
                    vec![
                        name.clone(),
                        Node::Op(Op::Arrow, vec![params.clone(), body.clone()]),
                    ],
                );
                let frag = self.gen(&desugared)?;
                Ok(format!("(drop {})", frag.text))
            }
            Node::Op(Op::Export, children) => match children.first() {
                Some(inner) => self.gen_stmt(inner),
                None => Ok(String::new()),
            },
            other => {
                let frag = self.gen(other)?;
                Ok(format!("(drop {})", frag.text))
            }
        }
    }

    /// Lower a function body. The emitted text yields one f64: the value of
    /// the trailing expression, or zero when the body ends in a statement.
    pub(crate) fn gen_body(&mut self, body: &Node) -> Result<String, CompileError> {
        let stmts: Vec<&Node> = match body {
            Node::Op(Op::Block, children) => children.iter().collect(),
            single => return Ok(self.gen(single)?.as_f64().text),
        };
        let Some((&last, rest)) = stmts.split_last() else {
            return Ok("(f64.const 0)".to_string());
        };
        let mut out = Vec::new();
        for &stmt in rest {
            out.push(self.gen_stmt(stmt)?);
        }
        if is_statement(last) {
            out.push(self.gen_stmt(last)?);
            out.push("(f64.const 0)".to_string());
        } else {
            out.push(self.gen(last)?.as_f64().text);
        }
        Ok(out.join("\n"))
    }

    fn gen_if(&mut self, children: &[Node]) -> Result<String, CompileError> {
        let [cond, then, alt] = children else {
            return Err(CompileError::WrongArity {
                what: "if".into(),
                expected: 3,
                got: children.len(),
            });
        };
        let cond = self.gen(cond)?.as_bool();
        let then = self.gen_stmt(then)?;
        if alt.is_null() {
            Ok(format!("(if {} (then\n{then}))", cond.text))
        } else {
            let alt = self.gen_stmt(alt)?;
            Ok(format!(
                "(if {} (then\n{then})\n(else\n{alt}))",
                cond.text
            ))
        }
    }

    fn gen_for(&mut self, children: &[Node]) -> Result<String, CompileError> {
        let [init, cond, update, body] = children else {
            return Err(CompileError::WrongArity {
                what: "for".into(),
                expected: 4,
                got: children.len(),
            });
        };
        let n = self.next_id();
        let done = format!("$.done{n}");
        let body_label = format!("$.body{n}");
        let cont = format!("$.cont{n}");

        let init = if init.is_null() {
            String::new()
        } else {
            self.gen_stmt(init)?
        };
        let test = if cond.is_null() {
            String::new()
        } else {
            let cond = self.gen(cond)?.as_bool();
            format!("(br_if {done} (i32.eqz {}))\n", cond.text)
        };
        self.loop_stack.push(LoopLabels {
            done: done.clone(),
            cont: cont.clone(),
        });
        let body = self.gen_stmt(body)?;
        self.loop_stack.pop();
        let update = if update.is_null() {
            String::new()
        } else {
            format!("{}\n", self.gen_stmt(update)?)
        };
        Ok(format!(
            "{init}\n(block {done}\n(loop {body_label}\n{test}(block {cont}\n{body})\n{update}(br {body_label})))"
        ))
    }

    fn gen_while(&mut self, children: &[Node]) -> Result<String, CompileError> {
        let [cond, body] = children else {
            return Err(CompileError::WrongArity {
                what: "while".into(),
                expected: 2,
                got: children.len(),
            });
        };
        let n = self.next_id();
        let done = format!("$.done{n}");
        let body_label = format!("$.body{n}");
        let cond = self.gen(cond)?.as_bool();
        // `continue` re-enters at the loop head, which re-tests the
        // condition.
        self.loop_stack.push(LoopLabels {
            done: done.clone(),
            cont: body_label.clone(),
        });
        let body = self.gen_stmt(body)?;
        self.loop_stack.pop();
        Ok(format!(
            "(block {done}\n(loop {body_label}\n(br_if {done} (i32.eqz {}))\n{body}\n(br {body_label})))",
            cond.text
        ))
    }

    fn gen_do(&mut self, children: &[Node]) -> Result<String, CompileError> {
        let [body, cond] = children else {
            return Err(CompileError::WrongArity {
                what: "do".into(),
                expected: 2,
                got: children.len(),
            });
        };
        let n = self.next_id();
        let done = format!("$.done{n}");
        let body_label = format!("$.body{n}");
        let cont = format!("$.cont{n}");
        self.loop_stack.push(LoopLabels {
            done: done.clone(),
            cont: cont.clone(),
        });
        let body = self.gen_stmt(body)?;
        self.loop_stack.pop();
        let cond = self.gen(cond)?.as_bool();
        Ok(format!(
            "(block {done}\n(loop {body_label}\n(block {cont}\n{body})\n(br_if {body_label} {})))",
            cond.text
        ))
    }

    fn gen_try(&mut self, children: &[Node]) -> Result<String, CompileError> {
        let [body, name, handler] = children else {
            return Err(CompileError::WrongArity {
                what: "try".into(),
                expected: 3,
                got: children.len(),
            });
        };
        self.use_features(Features::EXCEPTIONS);
        let body = self.gen_stmt(body)?;
        let bind = match name.as_ident() {
            Some(n) => {
                let wat = self.declare_local(n);
                format!("local.set {wat}")
            }
            None => "drop".to_string(),
        };
        let handler = self.gen_stmt(handler)?;
        Ok(format!(
            "(try\n(do\n{body})\n(catch $.err\n{bind}\n{handler}))"
        ))
    }
}
