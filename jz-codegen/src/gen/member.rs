//! Member access, indexing, literals, and typed-array construction.

use jz_ast::{Node, Op};
use jz_types::ElementType;

use crate::context::Generator;
use crate::error::CompileError;
use crate::features::Features;
use crate::fragment::{Fragment, Schema, ValueKind};

/// A numeric literal, folding through unary minus.
fn literal_num(node: &Node) -> Option<f64> {
    match node {
        Node::Num(v) => Some(*v),
        Node::Op(Op::Neg, children) => children.first().and_then(literal_num).map(|v| -v),
        _ => None,
    }
}

impl Generator {
    fn in_main(&self) -> bool {
        self.frames.last().is_some_and(|f| f.name == "$.main")
    }

    pub(crate) fn gen_member(&mut self, children: &[Node]) -> Result<Fragment, CompileError> {
        let [obj, name] = children else {
            return Err(CompileError::WrongArity {
                what: ".".into(),
                expected: 2,
                got: children.len(),
            });
        };
        let Some(field) = name.as_ident() else {
            return Err(CompileError::BadAssignTarget(name.to_string()));
        };
        let target = self.gen(obj)?;
        if field == "length" {
            return match target.kind {
                ValueKind::Array | ValueKind::F64 => {
                    self.use_features(Features::ARRAYS | Features::MEMORY);
                    Ok(Fragment::new(
                        format!("(call $__ptr_len {})", target.text),
                        ValueKind::F64,
                    ))
                }
                ValueKind::String => {
                    self.use_features(Features::STRINGS | Features::MEMORY);
                    Ok(Fragment::new(
                        format!("(call $__str_len {})", target.text),
                        ValueKind::F64,
                    ))
                }
                ValueKind::TypedArray => {
                    self.use_features(Features::TYPED_ARRAYS | Features::MEMORY);
                    Ok(Fragment::new(
                        format!("(f64.convert_i32_s (call $__typed_len {}))", target.text),
                        ValueKind::F64,
                    ))
                }
                kind => Err(CompileError::InvalidOperation {
                    op: ".length".into(),
                    kind,
                }),
            };
        }
        if let Some(Schema::Object(id)) = target.schema {
            if let Some(slot) = self
                .schemas
                .get(id as usize)
                .and_then(|s| s.iter().position(|f| f == field))
            {
                self.use_features(Features::OBJECTS | Features::MEMORY);
                return Ok(Fragment::new(
                    format!(
                        "(f64.load (i32.add (call $__ptr_offset {}) (i32.const {})))",
                        target.text,
                        slot * 8
                    ),
                    ValueKind::F64,
                ));
            }
        }
        Err(CompileError::InvalidOperation {
            op: format!(".{field}"),
            kind: target.kind,
        })
    }

    pub(crate) fn gen_index(&mut self, children: &[Node]) -> Result<Fragment, CompileError> {
        let [obj, index] = children else {
            return Err(CompileError::WrongArity {
                what: "[".into(),
                expected: 2,
                got: children.len(),
            });
        };
        let target = self.gen(obj)?;
        let index = self.gen(index)?;
        match target.kind {
            ValueKind::Array | ValueKind::F64 => {
                self.use_features(Features::ARRAYS | Features::MEMORY);
                Ok(Fragment::new(
                    format!(
                        "(call $__arr_get {} {})",
                        target.text,
                        index.as_f64().text
                    ),
                    ValueKind::F64,
                ))
            }
            ValueKind::String => {
                self.use_features(Features::STRINGS | Features::MEMORY);
                Ok(Fragment::new(
                    format!(
                        "(call $__str_char_at {} {})",
                        target.text,
                        index.as_f64().text
                    ),
                    ValueKind::String,
                ))
            }
            ValueKind::TypedArray => {
                self.use_features(Features::TYPED_ARRAYS | Features::MEMORY);
                let elem = target.elem().unwrap_or(ElementType::F64);
                let load = format!(
                    "({} (i32.add (call $__typed_offset {}) (i32.shl {} (i32.const {}))))",
                    elem.load_op(),
                    target.text,
                    index.as_i32().text,
                    elem.shift()
                );
                let text = match elem.to_f64_op() {
                    Some(conv) => format!("({conv} {load})"),
                    None => load,
                };
                Ok(Fragment::new(text, ValueKind::F64))
            }
            kind => Err(CompileError::InvalidOperation {
                op: "[]".into(),
                kind,
            }),
        }
    }

    pub(crate) fn gen_index_store(
        &mut self,
        children: &[Node],
        value: Fragment,
    ) -> Result<Fragment, CompileError> {
        let [obj, index] = children else {
            return Err(CompileError::BadAssignTarget("[]".into()));
        };
        let target = self.gen(obj)?;
        let index = self.gen(index)?;
        match target.kind {
            ValueKind::Array | ValueKind::F64 => {
                self.use_features(Features::ARRAYS | Features::MEMORY);
                Ok(Fragment::new(
                    format!(
                        "(call $__arr_set {} {} {})",
                        target.text,
                        index.as_f64().text,
                        value.as_f64().text
                    ),
                    ValueKind::F64,
                ))
            }
            ValueKind::TypedArray => {
                self.use_features(Features::TYPED_ARRAYS | Features::MEMORY);
                let elem = target.elem().unwrap_or(ElementType::F64);
                let n = self.next_id();
                let t = self.scratch_at("t", n, "f64");
                let stored = typed_store_value(elem, &format!("(local.get {t})"));
                Ok(Fragment::new(
                    format!(
                        "(block (result f64)\n(local.set {t} {})\n({} (i32.add (call $__typed_offset {}) (i32.shl {} (i32.const {}))) {stored})\n(local.get {t}))",
                        value.as_f64().text,
                        elem.store_op(),
                        target.text,
                        index.as_i32().text,
                        elem.shift()
                    ),
                    ValueKind::F64,
                ))
            }
            kind => Err(CompileError::InvalidOperation {
                op: "[]=".into(),
                kind,
            }),
        }
    }

    pub(crate) fn gen_member_store(
        &mut self,
        children: &[Node],
        value: Fragment,
    ) -> Result<Fragment, CompileError> {
        let [obj, name] = children else {
            return Err(CompileError::BadAssignTarget(".".into()));
        };
        let Some(field) = name.as_ident() else {
            return Err(CompileError::BadAssignTarget(name.to_string()));
        };
        let target = self.gen(obj)?;
        if let Some(Schema::Object(id)) = target.schema {
            if let Some(slot) = self
                .schemas
                .get(id as usize)
                .and_then(|s| s.iter().position(|f| f == field))
            {
                self.use_features(Features::OBJECTS | Features::MEMORY);
                let n = self.next_id();
                let t = self.scratch_at("t", n, "f64");
                return Ok(Fragment::new(
                    format!(
                        "(block (result f64)\n(local.set {t} {})\n(f64.store (i32.add (call $__ptr_offset {}) (i32.const {})) (local.get {t}))\n(local.get {t}))",
                        value.as_f64().text,
                        target.text,
                        slot * 8
                    ),
                    ValueKind::F64,
                ));
            }
        }
        Err(CompileError::InvalidOperation {
            op: format!(".{field}="),
            kind: target.kind,
        })
    }

    /// Array literals: constant top-level literals go to the static
    /// segment; everything else allocates and stores element by element.
    pub(crate) fn gen_array_lit(
        &mut self,
        children: &[Node],
    ) -> Result<Fragment, CompileError> {
        self.use_features(Features::ARRAYS | Features::MEMORY);
        let constants: Option<Vec<f64>> = children.iter().map(literal_num).collect();
        if let Some(values) = constants {
            if self.in_main() {
                let ptr = self.static_array(&values);
                return Ok(Fragment::new(ptr.wat_const(), ValueKind::Array));
            }
        }
        let n = self.next_id();
        let arr = self.scratch_at("arr", n, "f64");
        let base = self.scratch_at("base", n, "i32");
        let mut text = format!(
            "(block (result f64)\n(local.set {arr} (call $__alloc (i32.const 1) (i32.const {})))\n(local.set {base} (call $__ptr_offset (local.get {arr})))\n",
            children.len()
        );
        for (i, child) in children.iter().enumerate() {
            let elem = self.gen(child)?;
            text.push_str(&format!(
                "(f64.store (i32.add (local.get {base}) (i32.const {})) {})\n",
                i * 8,
                elem.as_f64().text
            ));
        }
        text.push_str(&format!("(local.get {arr}))"));
        Ok(Fragment::new(text, ValueKind::Array))
    }

    /// Object literals allocate headerless field blocks; the schema id
    /// rides in the pointer's aux field.
    pub(crate) fn gen_object_lit(
        &mut self,
        pairs: &[Node],
    ) -> Result<Fragment, CompileError> {
        self.use_features(Features::OBJECTS | Features::MEMORY);
        let mut fields = Vec::new();
        let mut values = Vec::new();
        for pair in pairs.chunks(2) {
            let [key, value] = pair else {
                return Err(CompileError::BadAssignTarget("{".into()));
            };
            let Some(key) = key.as_ident() else {
                return Err(CompileError::BadAssignTarget(key.to_string()));
            };
            fields.push(key.to_string());
            values.push(value);
        }
        let schema = self.add_schema(fields);
        let constants: Option<Vec<f64>> = values.iter().map(|&v| literal_num(v)).collect();
        if let Some(constants) = constants {
            if self.in_main() {
                let ptr = self.static_object(schema, &constants);
                return Ok(Fragment::new(ptr.wat_const(), ValueKind::Object)
                    .with_schema(Schema::Object(schema)));
            }
        }
        let n = self.next_id();
        let op = self.scratch_at("obj", n, "i32");
        let mut text = format!(
            "(block (result f64)\n(local.set {op} (call $__ptr_offset (call $__alloc (i32.const 4) (i32.const {}))))\n",
            values.len()
        );
        for (slot, &value) in values.iter().enumerate() {
            let value = self.gen(value)?;
            text.push_str(&format!(
                "(f64.store (i32.add (local.get {op}) (i32.const {})) {})\n",
                slot * 8,
                value.as_f64().text
            ));
        }
        text.push_str(&format!(
            "(call $__mkptr (i32.const 4) (i32.const {schema}) (local.get {op})))"
        ));
        Ok(Fragment::new(text, ValueKind::Object).with_schema(Schema::Object(schema)))
    }

    /// `new F64(…)` and friends: construct a typed-array view over the
    /// arena, from a literal, another array, or a length.
    pub(crate) fn gen_new(&mut self, children: &[Node]) -> Result<Fragment, CompileError> {
        let [ctor, args_node] = children else {
            return Err(CompileError::WrongArity {
                what: "new".into(),
                expected: 2,
                got: children.len(),
            });
        };
        let name = ctor.as_ident().unwrap_or_default();
        let Some(elem) = ElementType::from_ctor(name) else {
            return Err(CompileError::UnknownConstructor(name.to_string()));
        };
        let args = args_node.flatten_args();
        let &[arg] = args.as_slice() else {
            return Err(CompileError::WrongArity {
                what: format!("new {name}"),
                expected: 1,
                got: args.len(),
            });
        };
        self.use_features(Features::TYPED_ARRAYS | Features::MEMORY);
        let code = elem.code();

        if let Node::Op(Op::ArrayLit, elems) = arg {
            let n = self.next_id();
            let tv = self.scratch_at("tv", n, "f64");
            let td = self.scratch_at("td", n, "i32");
            let mut text = format!(
                "(block (result f64)\n(local.set {tv} (call $__alloc_typed (i32.const {code}) (i32.const {})))\n(local.set {td} (call $__typed_offset (local.get {tv})))\n",
                elems.len()
            );
            for (i, child) in elems.iter().enumerate() {
                let value = self.gen(child)?;
                let stored = typed_elem_text(elem, value);
                text.push_str(&format!(
                    "({} (i32.add (local.get {td}) (i32.const {})) {stored})\n",
                    elem.store_op(),
                    i << elem.shift()
                ));
            }
            text.push_str(&format!("(local.get {tv}))"));
            return Ok(Fragment::new(text, ValueKind::TypedArray)
                .with_schema(Schema::Elem(elem)));
        }

        let source = self.gen(arg)?;
        if source.kind == ValueKind::Array {
            self.use_features(Features::ARRAYS);
            let n = self.next_id();
            let src = self.scratch_at("src", n, "f64");
            let tv = self.scratch_at("tv", n, "f64");
            let td = self.scratch_at("td", n, "i32");
            let len = self.scratch_at("len", n, "i32");
            let idx = self.scratch_at("idx", n, "i32");
            let stored = typed_store_value(
                elem,
                &format!(
                    "(call $__arr_get (local.get {src}) (f64.convert_i32_s (local.get {idx})))"
                ),
            );
            let text = format!(
                "(block (result f64)\n(local.set {src} {})\n(local.set {len} (i32.trunc_sat_f64_s (call $__ptr_len (local.get {src}))))\n(local.set {tv} (call $__alloc_typed (i32.const {code}) (local.get {len})))\n(local.set {td} (call $__typed_offset (local.get {tv})))\n(local.set {idx} (i32.const 0))\n(block $.done{n}\n(loop $.body{n}\n(br_if $.done{n} (i32.ge_s (local.get {idx}) (local.get {len})))\n({} (i32.add (local.get {td}) (i32.shl (local.get {idx}) (i32.const {}))) {stored})\n(local.set {idx} (i32.add (local.get {idx}) (i32.const 1)))\n(br $.body{n})))\n(local.get {tv}))",
                source.text,
                elem.store_op(),
                elem.shift()
            );
            return Ok(Fragment::new(text, ValueKind::TypedArray)
                .with_schema(Schema::Elem(elem)));
        }

        Ok(Fragment::new(
            format!(
                "(call $__alloc_typed (i32.const {code}) {})",
                source.as_i32().text
            ),
            ValueKind::TypedArray,
        )
        .with_schema(Schema::Elem(elem)))
    }
}

/// Convert an f64-valued expression into what the element store expects.
pub(crate) fn typed_store_value(elem: ElementType, f64_text: &str) -> String {
    match elem.from_f64_op() {
        Some(conv) => format!("({conv} {f64_text})"),
        None => f64_text.to_string(),
    }
}

/// Store text for a literal element, keeping i32 fragments in integer form.
fn typed_elem_text(elem: ElementType, value: Fragment) -> String {
    if !elem.is_float() && value.kind.is_i32() {
        value.text
    } else {
        typed_store_value(elem, &value.as_f64().text)
    }
}
