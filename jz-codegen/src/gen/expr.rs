//! Literals, identifiers, operators, assignment, and the typed logic forms.

use jz_ast::{Node, Op};
use jz_types::RawValue;

use crate::context::{Binding, Generator};
use crate::error::CompileError;
use crate::features::Features;
use crate::fragment::{Fragment, Schema, ValueKind};
use crate::gen::fmt_f64;

/// Mathematical constants the generator resolves without a binding.
fn builtin_const(name: &str) -> Option<f64> {
    Some(match name {
        "Infinity" => f64::INFINITY,
        "NaN" => f64::NAN,
        "PI" => std::f64::consts::PI,
        "E" => std::f64::consts::E,
        "TAU" => std::f64::consts::TAU,
        "SQRT2" => std::f64::consts::SQRT_2,
        "LN2" => std::f64::consts::LN_2,
        "LN10" => std::f64::consts::LN_10,
        _ => return None,
    })
}

/// The kind two operands of a typed `if` settle on.
fn join_kind(a: ValueKind, b: ValueKind) -> ValueKind {
    if a == b {
        a
    } else if a.is_i32() && b.is_i32() {
        ValueKind::I32
    } else {
        ValueKind::F64
    }
}

impl Generator {
    pub(crate) fn gen_number(&mut self, v: f64) -> Fragment {
        // Track small integers as i32 so that loop counters and index
        // arithmetic stay in integer instructions.
        if v.fract() == 0.0
            && v >= i32::MIN as f64
            && v <= i32::MAX as f64
            && !(v == 0.0 && v.is_sign_negative())
        {
            Fragment::new(format!("(i32.const {})", v as i32), ValueKind::I32)
        } else {
            Fragment::new(format!("(f64.const {})", fmt_f64(v)), ValueKind::F64)
        }
    }

    pub(crate) fn gen_string_literal(&mut self, s: &str) -> Fragment {
        self.use_features(Features::STRINGS);
        let ptr = match RawValue::sso(s) {
            Some(v) => v,
            None => {
                self.use_features(Features::MEMORY);
                self.intern_string(s)
            }
        };
        Fragment::new(ptr.wat_const(), ValueKind::String)
    }

    pub(crate) fn gen_ident(&mut self, name: &str) -> Result<Fragment, CompileError> {
        if let Some(binding) = self.lookup(name) {
            return match binding {
                Binding::Local(local) => Ok(Fragment {
                    text: format!("(local.get {})", local.wat),
                    kind: local.kind,
                    schema: local.schema,
                }),
                Binding::Hoisted(slot) => Ok(self.env_load("$.own", slot)),
                Binding::Captured(slot) => Ok(self.env_load("$.env", slot)),
                Binding::Global(wat, info) => Ok(Fragment {
                    text: format!("(global.get {wat})"),
                    kind: info.kind,
                    schema: info.schema,
                }),
                Binding::Function(fname) => {
                    let index = self.function_table_index(&fname)?;
                    Ok(
                        Fragment::new(
                            RawValue::closure(index, 0, 0).wat_const(),
                            ValueKind::Closure,
                        )
                        .with_schema(Schema::Arity(1)),
                    )
                }
            };
        }
        if let Some(v) = builtin_const(name) {
            return Ok(Fragment::new(
                format!("(f64.const {})", fmt_f64(v)),
                ValueKind::F64,
            ));
        }
        // Leading-underscore names are locals by convention, zero until
        // first assignment.
        if name.starts_with('_') {
            let wat = self.declare_local(name);
            return Ok(Fragment::new(format!("(local.get {wat})"), ValueKind::F64));
        }
        Err(CompileError::UnknownIdentifier(name.to_string()))
    }

    fn env_load(&mut self, env: &str, slot: usize) -> Fragment {
        self.use_features(Features::MEMORY);
        Fragment::new(
            format!(
                "(f64.load (i32.add (local.get {env}) (i32.const {})))",
                slot * 8
            ),
            ValueKind::F64,
        )
    }

    fn env_store(&mut self, env: &str, slot: usize, value: Fragment) -> Fragment {
        self.use_features(Features::MEMORY);
        let n = self.next_id();
        let t = self.scratch_at("t", n, "f64");
        Fragment::new(
            format!(
                "(block (result f64)\n(local.set {t} {})\n(f64.store (i32.add (local.get {env}) (i32.const {})) (local.get {t}))\n(local.get {t}))",
                value.as_f64().text,
                slot * 8
            ),
            ValueKind::F64,
        )
    }

    pub(crate) fn gen_let(&mut self, children: &[Node]) -> Result<Fragment, CompileError> {
        let name = children
            .first()
            .and_then(Node::as_ident)
            .ok_or_else(|| CompileError::BadAssignTarget("let".into()))?
            .to_string();
        let init = match children.get(1) {
            Some(Node::Null) | None => Fragment::new("(f64.const 0)", ValueKind::F64),
            Some(node) => self.gen(node)?,
        };
        if let Some(slot) = self.frame().hoisted.iter().position(|h| h == &name) {
            return Ok(self.env_store("$.own", slot, init));
        }
        if self.frames.len() == 1 && self.globals.contains_key(&name) {
            self.retrack_global(&name, init.kind, init.schema);
            return Ok(self.global_store(&name, init));
        }
        let wat = self.declare_local(&name);
        self.retrack_local(&name, init.kind, init.schema);
        Ok(Fragment::new(
            format!("(local.tee {wat} {})", init.as_f64().text),
            ValueKind::F64,
        ))
    }

    fn global_store(&mut self, name: &str, value: Fragment) -> Fragment {
        Fragment::new(
            format!(
                "(block (result f64)\n(global.set ${name} {})\n(global.get ${name}))",
                value.as_f64().text
            ),
            ValueKind::F64,
        )
    }

    pub(crate) fn gen_assign_node(
        &mut self,
        children: &[Node],
    ) -> Result<Fragment, CompileError> {
        let [target, value] = children else {
            return Err(CompileError::BadAssignTarget("=".into()));
        };
        let value = self.gen(value)?;
        self.gen_assign(target, value)
    }

    pub(crate) fn gen_compound_assign(
        &mut self,
        op: Op,
        children: &[Node],
    ) -> Result<Fragment, CompileError> {
        let base = op.compound_base().unwrap_or(Op::Add);
        let [target, value] = children else {
            return Err(CompileError::BadAssignTarget(op.as_str().into()));
        };
        let desugared = Node::Op(
            Op::Assign,
            vec![
                target.clone(),
                Node::Op(base, vec![target.clone(), value.clone()]),
            ],
        );
        self.gen(&desugared)
    }

    /// Assign a computed fragment to a target. Assignments compile as tees:
    /// the expression yields the stored value.
    pub(crate) fn gen_assign(
        &mut self,
        target: &Node,
        value: Fragment,
    ) -> Result<Fragment, CompileError> {
        match target {
            Node::Ident(name) => match self.lookup(name) {
                Some(Binding::Local(local)) => {
                    self.retrack_local(name, value.kind, value.schema);
                    Ok(Fragment::new(
                        format!("(local.tee {} {})", local.wat, value.as_f64().text),
                        ValueKind::F64,
                    ))
                }
                Some(Binding::Hoisted(slot)) => Ok(self.env_store("$.own", slot, value)),
                Some(Binding::Captured(slot)) => Ok(self.env_store("$.env", slot, value)),
                Some(Binding::Global(..)) => {
                    self.retrack_global(name, value.kind, value.schema);
                    Ok(self.global_store(name, value))
                }
                Some(Binding::Function(_)) => {
                    Err(CompileError::BadAssignTarget(name.clone()))
                }
                None => {
                    // Assignment-as-declaration.
                    let wat = self.declare_local(name);
                    self.retrack_local(name, value.kind, value.schema);
                    Ok(Fragment::new(
                        format!("(local.tee {wat} {})", value.as_f64().text),
                        ValueKind::F64,
                    ))
                }
            },
            Node::Op(Op::Index, children) => self.gen_index_store(children, value),
            Node::Op(Op::Member, children) => self.gen_member_store(children, value),
            other => Err(CompileError::BadAssignTarget(other.to_string())),
        }
    }

    pub(crate) fn gen_binary(
        &mut self,
        op: Op,
        children: &[Node],
    ) -> Result<Fragment, CompileError> {
        let [lhs, rhs] = children else {
            return Err(CompileError::WrongArity {
                what: op.as_str().into(),
                expected: 2,
                got: children.len(),
            });
        };
        let a = self.gen(lhs)?;
        let b = self.gen(rhs)?;

        // `+` concatenates as soon as either side is a string.
        if op == Op::Add
            && (a.kind == ValueKind::String || b.kind == ValueKind::String)
        {
            self.use_features(Features::STRINGS | Features::MEMORY);
            let a = self.to_str(a);
            let b = self.to_str(b);
            return Ok(Fragment::new(
                format!("(call $__strcat {} {})", a.text, b.text),
                ValueKind::String,
            ));
        }

        let both_i32 = a.kind.is_i32() && b.kind.is_i32();
        let frag = match op {
            Op::Add | Op::Sub | Op::Mul if both_i32 => {
                let mn = match op {
                    Op::Add => "i32.add",
                    Op::Sub => "i32.sub",
                    _ => "i32.mul",
                };
                Fragment::new(format!("({mn} {} {})", a.text, b.text), ValueKind::I32)
            }
            Op::Add | Op::Sub | Op::Mul | Op::Div => {
                let mn = match op {
                    Op::Add => "f64.add",
                    Op::Sub => "f64.sub",
                    Op::Mul => "f64.mul",
                    _ => "f64.div",
                };
                Fragment::new(
                    format!("({mn} {} {})", a.as_f64().text, b.as_f64().text),
                    ValueKind::F64,
                )
            }
            Op::Rem if both_i32 => Fragment::new(
                format!("(i32.rem_s {} {})", a.text, b.text),
                ValueKind::I32,
            ),
            Op::Rem => self.gen_fmod(a, b),
            Op::Eq | Op::StrictEq => self.gen_equality(a, b, false),
            Op::Ne | Op::StrictNe => self.gen_equality(a, b, true),
            Op::Lt | Op::Le | Op::Gt | Op::Ge => {
                let (imn, fmn) = match op {
                    Op::Lt => ("i32.lt_s", "f64.lt"),
                    Op::Le => ("i32.le_s", "f64.le"),
                    Op::Gt => ("i32.gt_s", "f64.gt"),
                    _ => ("i32.ge_s", "f64.ge"),
                };
                if both_i32 {
                    Fragment::new(format!("({imn} {} {})", a.text, b.text), ValueKind::Bool)
                } else {
                    Fragment::new(
                        format!("({fmn} {} {})", a.as_f64().text, b.as_f64().text),
                        ValueKind::Bool,
                    )
                }
            }
            _ => {
                return Err(CompileError::InvalidOperation {
                    op: op.as_str().into(),
                    kind: a.kind,
                })
            }
        };
        Ok(frag)
    }

    /// Modulo on floats: `a - trunc(a/b) * b`.
    fn gen_fmod(&mut self, a: Fragment, b: Fragment) -> Fragment {
        let n = self.next_id();
        let ta = self.scratch_at("ma", n, "f64");
        let tb = self.scratch_at("mb", n, "f64");
        Fragment::new(
            format!(
                "(block (result f64)\n(local.set {ta} {})\n(local.set {tb} {})\n(f64.sub (local.get {ta}) (f64.mul (f64.trunc (f64.div (local.get {ta}) (local.get {tb}))) (local.get {tb}))))",
                a.as_f64().text,
                b.as_f64().text
            ),
            ValueKind::F64,
        )
    }

    /// Equality per the tag-disjointness invariant: i32 compares directly;
    /// strings compare through `__str_eq`; anything else goes through
    /// `__f64_eq`, which layers pointer bit-equality over `f64.eq`.
    fn gen_equality(&mut self, a: Fragment, b: Fragment, negate: bool) -> Fragment {
        if a.kind.is_i32() && b.kind.is_i32() {
            let mn = if negate { "i32.ne" } else { "i32.eq" };
            return Fragment::new(format!("({mn} {} {})", a.text, b.text), ValueKind::Bool);
        }
        let call = if a.kind == ValueKind::String || b.kind == ValueKind::String {
            self.use_features(Features::STRINGS | Features::MEMORY);
            format!("(call $__str_eq {} {})", a.as_f64().text, b.as_f64().text)
        } else {
            self.use_features(Features::MEMORY);
            format!("(call $__f64_eq {} {})", a.as_f64().text, b.as_f64().text)
        };
        let text = if negate {
            format!("(i32.eqz {call})")
        } else {
            call
        };
        Fragment::new(text, ValueKind::Bool)
    }

    /// Coerce a fragment into a string for concatenation and `join`.
    pub(crate) fn to_str(&mut self, f: Fragment) -> Fragment {
        if f.kind == ValueKind::String {
            return f;
        }
        self.use_features(Features::STRINGS | Features::MEMORY);
        self.request_stdlib("__to_str");
        Fragment::new(
            format!("(call $__to_str {})", f.as_f64().text),
            ValueKind::String,
        )
    }

    pub(crate) fn gen_bitwise(
        &mut self,
        op: Op,
        children: &[Node],
    ) -> Result<Fragment, CompileError> {
        let [lhs, rhs] = children else {
            return Err(CompileError::WrongArity {
                what: op.as_str().into(),
                expected: 2,
                got: children.len(),
            });
        };
        let a = self.gen(lhs)?.as_i32();
        let b = self.gen(rhs)?.as_i32();
        let text = match op {
            Op::BitAnd => format!("(i32.and {} {})", a.text, b.text),
            Op::BitOr => format!("(i32.or {} {})", a.text, b.text),
            Op::BitXor => format!("(i32.xor {} {})", a.text, b.text),
            // Shift counts are masked to five bits to match source
            // semantics.
            Op::Shl => format!(
                "(i32.shl {} (i32.and {} (i32.const 31)))",
                a.text, b.text
            ),
            Op::Shr => format!(
                "(i32.shr_s {} (i32.and {} (i32.const 31)))",
                a.text, b.text
            ),
            _ => format!(
                "(i32.shr_u {} (i32.and {} (i32.const 31)))",
                a.text, b.text
            ),
        };
        Ok(Fragment::new(text, ValueKind::I32))
    }

    pub(crate) fn gen_unary(
        &mut self,
        op: Op,
        children: &[Node],
    ) -> Result<Fragment, CompileError> {
        let value = children.first().ok_or(CompileError::WrongArity {
            what: op.as_str().into(),
            expected: 1,
            got: 0,
        })?;
        let v = self.gen(value)?;
        Ok(match op {
            Op::Neg => {
                if v.kind.is_i32() {
                    Fragment::new(
                        format!("(i32.sub (i32.const 0) {})", v.text),
                        ValueKind::I32,
                    )
                } else {
                    Fragment::new(format!("(f64.neg {})", v.text), ValueKind::F64)
                }
            }
            Op::Not => Fragment::new(
                format!("(i32.eqz {})", v.as_bool().text),
                ValueKind::Bool,
            ),
            Op::BitNot => Fragment::new(
                format!("(i32.xor {} (i32.const -1))", v.as_i32().text),
                ValueKind::I32,
            ),
            _ => self.gen_typeof(v),
        })
    }

    /// `typeof` maps the runtime category code onto short-string constants.
    fn gen_typeof(&mut self, v: Fragment) -> Fragment {
        const NAMES: [&str; 8] = [
            "number", "array", "typed", "string", "object", "fn", "regex", "symbol",
        ];
        self.use_features(Features::STRINGS | Features::MEMORY);
        let n = self.next_id();
        let tc = self.scratch_at("tc", n, "i32");
        let mut sel = RawValue::sso(NAMES[7])
            .expect("typeof names fit the SSO form")
            .wat_const();
        for code in (0..7).rev() {
            let name = RawValue::sso(NAMES[code])
                .expect("typeof names fit the SSO form")
                .wat_const();
            sel = format!(
                "(select {name} {sel} (i32.eq (local.get {tc}) (i32.const {code})))"
            );
        }
        Fragment::new(
            format!(
                "(block (result f64)\n(local.set {tc} (call $__typeof_code {}))\n{sel})",
                v.as_f64().text
            ),
            ValueKind::String,
        )
    }

    /// `&&`, `||`, and `??` compile to a typed `if` that preserves the
    /// common operand kind; `??` is keyed on "is zero".
    pub(crate) fn gen_logic(
        &mut self,
        op: Op,
        children: &[Node],
    ) -> Result<Fragment, CompileError> {
        let [lhs, rhs] = children else {
            return Err(CompileError::WrongArity {
                what: op.as_str().into(),
                expected: 2,
                got: children.len(),
            });
        };
        let a = self.gen(lhs)?;
        let b = self.gen(rhs)?;
        let kind = join_kind(a.kind, b.kind);
        let ty = kind.wat_ty();
        let n = self.next_id();
        let t = self.scratch_at("t", n, ty);
        let a = coerce(a, kind);
        let b = coerce(b, kind);
        let truthy = if ty == "i32" {
            format!("(local.get {t})")
        } else {
            format!("(f64.ne (local.get {t}) (f64.const 0))")
        };
        let zero = if ty == "i32" {
            format!("(i32.eqz (local.get {t}))")
        } else {
            format!("(f64.eq (local.get {t}) (f64.const 0))")
        };
        let (cond, then_arm, else_arm) = match op {
            Op::And => (truthy, b.text, format!("(local.get {t})")),
            Op::Or => (truthy, format!("(local.get {t})"), b.text),
            _ => (zero, b.text, format!("(local.get {t})")),
        };
        Ok(Fragment::new(
            format!(
                "(block (result {ty})\n(local.set {t} {})\n(if (result {ty}) {cond} (then {then_arm}) (else {else_arm})))",
                a.text
            ),
            kind,
        ))
    }

    pub(crate) fn gen_ternary(
        &mut self,
        children: &[Node],
    ) -> Result<Fragment, CompileError> {
        let [cond, then, alt] = children else {
            return Err(CompileError::WrongArity {
                what: "?".into(),
                expected: 3,
                got: children.len(),
            });
        };
        let cond = self.gen(cond)?.as_bool();
        let a = self.gen(then)?;
        let b = self.gen(alt)?;
        let kind = join_kind(a.kind, b.kind);
        let schema = if a.schema == b.schema { a.schema } else { None };
        let a = coerce(a, kind);
        let b = coerce(b, kind);
        let mut frag = Fragment::new(
            format!(
                "(if (result {ty}) {} (then {}) (else {}))",
                cond.text,
                a.text,
                b.text,
                ty = kind.wat_ty()
            ),
            kind,
        );
        frag.schema = schema;
        Ok(frag)
    }

    pub(crate) fn gen_comma(
        &mut self,
        children: &[Node],
    ) -> Result<Fragment, CompileError> {
        let Some((last, rest)) = children.split_last() else {
            return Ok(Fragment::new("(f64.const 0)", ValueKind::F64));
        };
        let mut text = String::new();
        for child in rest {
            let frag = self.gen(child)?;
            text.push_str(&format!("(drop {})\n", frag.text));
        }
        let last = self.gen(last)?;
        let kind = last.kind;
        Ok(Fragment::new(
            format!("(block (result {})\n{text}{})", kind.wat_ty(), last.text),
            kind,
        ))
    }
}

/// Match a fragment's stack type to the joined kind.
fn coerce(f: Fragment, kind: ValueKind) -> Fragment {
    if kind.wat_ty() == "i32" {
        f.as_i32()
    } else {
        f.as_f64()
    }
}
