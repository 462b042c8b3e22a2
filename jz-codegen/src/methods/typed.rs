//! Inlined loop lowerings for typed-array methods, with SIMD
//! specialization of `map`.
//!
//! Element access goes straight through the view header: the data pointer
//! is loaded once, and every access is a shifted load/store with the
//! element type's mnemonics. `subarray` allocates only a new header and
//! shares the data pointer.

use jz_ast::Node;

use crate::context::Generator;
use crate::error::CompileError;
use crate::features::Features;
use crate::fragment::{Fragment, Schema, ValueKind};
use crate::gen::member::typed_store_value;
use crate::methods::simd;
use jz_types::ElementType;

pub(crate) struct TypedLoop {
    pub n: u32,
    pub src: String,
    pub sd: String,
    pub len: String,
    pub idx: String,
}

fn addr(sd: &str, index: &str, shift: u32) -> String {
    format!("(i32.add (local.get {sd}) (i32.shl {index} (i32.const {shift})))")
}

fn read_raw(l: &TypedLoop, elem: ElementType, index: &str) -> String {
    format!(
        "({} {})",
        elem.load_op(),
        addr(&l.sd, index, elem.shift())
    )
}

fn read_f64(l: &TypedLoop, elem: ElementType, index: &str) -> String {
    let raw = read_raw(l, elem, index);
    match elem.to_f64_op() {
        Some(conv) => format!("({conv} {raw})"),
        None => raw,
    }
}

fn for_loop(n: u32, idx: &str, len: &str, body: &str) -> String {
    format!(
        "(block $.done{n}\n(loop $.body{n}\n(br_if $.done{n} (i32.ge_s (local.get {idx}) (local.get {len})))\n{body}\n(local.set {idx} (i32.add (local.get {idx}) (i32.const 1)))\n(br $.body{n})))"
    )
}

fn clamp(slot: &str, len: &str) -> String {
    format!(
        "(if (i32.lt_s (local.get {slot}) (i32.const 0)) (then (local.set {slot} (i32.add (local.get {slot}) (local.get {len})))))\n(if (i32.lt_s (local.get {slot}) (i32.const 0)) (then (local.set {slot} (i32.const 0))))\n(if (i32.gt_s (local.get {slot}) (local.get {len})) (then (local.set {slot} (local.get {len}))))"
    )
}

impl Generator {
    fn typed_open(&mut self, target: &Fragment) -> (String, TypedLoop) {
        self.use_features(Features::TYPED_ARRAYS | Features::MEMORY);
        let n = self.next_id();
        let src = self.scratch_at("tsrc", n, "f64");
        let sd = self.scratch_at("tsd", n, "i32");
        let len = self.scratch_at("tlen", n, "i32");
        let idx = self.scratch_at("tidx", n, "i32");
        let prelude = format!(
            "(local.set {src} {})\n(local.set {len} (call $__typed_len (local.get {src})))\n(local.set {sd} (call $__typed_offset (local.get {src})))\n(local.set {idx} (i32.const 0))",
            target.text
        );
        (prelude, TypedLoop { n, src, sd, len, idx })
    }

    /// A fresh view (and buffer) of the same element type.
    fn typed_dst(
        &mut self,
        n: u32,
        elem: ElementType,
        len_expr: &str,
    ) -> (String, String, String) {
        let dst = self.scratch_at("tdst", n, "f64");
        let dd = self.scratch_at("tdd", n, "i32");
        let text = format!(
            "(local.set {dst} (call $__alloc_typed (i32.const {}) {len_expr}))\n(local.set {dd} (call $__typed_offset (local.get {dst})))",
            elem.code()
        );
        (text, dst, dd)
    }

    pub(crate) fn typed_method(
        &mut self,
        target: Fragment,
        method: &str,
        args: &[&Node],
    ) -> Result<Fragment, CompileError> {
        let elem = target.elem().unwrap_or(ElementType::F64);
        match method {
            "map" => {
                self.expect_args(method, args, 1, 1)?;
                self.typed_map(target, elem, args[0])
            }
            "filter" => {
                self.expect_args(method, args, 1, 1)?;
                self.typed_filter(target, elem, args[0])
            }
            "reduce" => {
                self.expect_args(method, args, 1, 2)?;
                self.typed_reduce(target, elem, args, false)
            }
            "reduceRight" => {
                self.expect_args(method, args, 1, 2)?;
                self.typed_reduce(target, elem, args, true)
            }
            "find" => {
                self.expect_args(method, args, 1, 1)?;
                self.typed_find(target, elem, args[0], true)
            }
            "findIndex" => {
                self.expect_args(method, args, 1, 1)?;
                self.typed_find(target, elem, args[0], false)
            }
            "indexOf" => {
                self.expect_args(method, args, 1, 1)?;
                self.typed_index_of(target, elem, args[0], false)
            }
            "includes" => {
                self.expect_args(method, args, 1, 1)?;
                self.typed_index_of(target, elem, args[0], true)
            }
            "every" => {
                self.expect_args(method, args, 1, 1)?;
                self.typed_every_some(target, elem, args[0], true)
            }
            "some" => {
                self.expect_args(method, args, 1, 1)?;
                self.typed_every_some(target, elem, args[0], false)
            }
            "forEach" => {
                self.expect_args(method, args, 1, 1)?;
                self.typed_for_each(target, elem, args[0])
            }
            "at" => {
                self.expect_args(method, args, 1, 1)?;
                self.typed_at(target, elem, args[0])
            }
            "slice" => {
                self.expect_args(method, args, 0, 2)?;
                self.typed_slice(target, elem, args)
            }
            "subarray" => {
                self.expect_args(method, args, 2, 2)?;
                let begin = self.gen(args[0])?.as_i32();
                let end = self.gen(args[1])?.as_i32();
                self.use_features(Features::TYPED_ARRAYS | Features::MEMORY);
                Ok(Fragment::new(
                    format!(
                        "(call $__mk_typed_subarray {} {} {})",
                        target.text, begin.text, end.text
                    ),
                    ValueKind::TypedArray,
                )
                .with_schema(Schema::Elem(elem)))
            }
            "set" => {
                self.expect_args(method, args, 1, 2)?;
                self.typed_set_from(target, elem, args)
            }
            "fill" => {
                self.expect_args(method, args, 1, 3)?;
                self.typed_fill(target, elem, args)
            }
            "reverse" => {
                self.expect_args(method, args, 0, 0)?;
                self.typed_reverse(target, elem)
            }
            "toReversed" => {
                self.expect_args(method, args, 0, 0)?;
                self.typed_to_reversed(target, elem)
            }
            "copyWithin" => {
                self.expect_args(method, args, 2, 3)?;
                self.typed_copy_within(target, elem, args)
            }
            "sort" => {
                self.expect_args(method, args, 0, 0)?;
                self.typed_sort(target, elem)
            }
            "toSorted" => {
                self.expect_args(method, args, 0, 0)?;
                self.typed_to_sorted(target, elem)
            }
            "with" => {
                self.expect_args(method, args, 2, 2)?;
                self.typed_with(target, elem, args[0], args[1])
            }
            "join" => {
                self.expect_args(method, args, 0, 1)?;
                self.typed_join(target, elem, args.first().copied())
            }
            _ => Err(CompileError::InvalidMethod {
                method: method.to_string(),
                kind: ValueKind::TypedArray,
            }),
        }
    }

    fn typed_map(
        &mut self,
        target: Fragment,
        elem: ElementType,
        cb: &Node,
    ) -> Result<Fragment, CompileError> {
        let (params, body) = self.callback("map", cb)?;
        // The vector form only applies when the callback ignores the index
        // parameter and matches the pattern grammar.
        if self.opts.simd && params.len() == 1 {
            if let Some(op) = simd::detect(body, &params[0]) {
                // Probe with a placeholder operand: only the op/element
                // combination decides vectorizability.
                if simd::vector_text(op, elem, "v").is_some() {
                    tracing::debug!(?op, %elem, "vectorizing typed-array map");
                    return self.typed_map_simd(target, elem, op, &params, body);
                }
                tracing::debug!(?op, %elem, "pattern not vectorizable for element type");
            }
        }
        let (prelude, l) = self.typed_open(&target);
        let (dst_text, dst, dd) = self.typed_dst(l.n, elem, &format!("(local.get {})", l.len));
        let step = self.typed_map_step(&l, elem, &dd, &params, body)?;
        let text = format!(
            "(block (result f64)\n{prelude}\n{dst_text}\n{}\n(local.get {dst}))",
            for_loop(l.n, &l.idx, &l.len, &step)
        );
        Ok(Fragment::new(text, ValueKind::TypedArray).with_schema(Schema::Elem(elem)))
    }

    /// One scalar `map` iteration: load, run the inlined callback, store.
    /// Shared by the scalar loop and the vector loop's remainder.
    fn typed_map_step(
        &mut self,
        l: &TypedLoop,
        elem: ElementType,
        dd: &str,
        params: &[String],
        body: &Node,
    ) -> Result<String, CompileError> {
        let x = self.scratch_at("x", l.n, "f64");
        let xi = self.scratch_at("xi", l.n, "f64");
        let mapped = self
            .inline_callback(
                params,
                &[(x.clone(), ValueKind::F64), (xi.clone(), ValueKind::F64)],
                body,
            )?
            .as_f64();
        Ok(format!(
            "(local.set {x} {})\n(local.set {xi} (f64.convert_i32_s (local.get {idx})))\n({} {} {})",
            read_f64(l, elem, &format!("(local.get {})", l.idx)),
            elem.store_op(),
            addr(dd, &format!("(local.get {})", l.idx), elem.shift()),
            typed_store_value(elem, &mapped.text),
            idx = l.idx
        ))
    }

    fn typed_map_simd(
        &mut self,
        target: Fragment,
        elem: ElementType,
        op: simd::SimdOp,
        params: &[String],
        body: &Node,
    ) -> Result<Fragment, CompileError> {
        self.use_features(Features::SIMD);
        let (prelude, l) = self.typed_open(&target);
        let (dst_text, dst, dd) = self.typed_dst(l.n, elem, &format!("(local.get {})", l.len));
        let lanes = elem.lanes().unwrap_or(2);
        let load = format!(
            "(v128.load {})",
            addr(&l.sd, &format!("(local.get {})", l.idx), elem.shift())
        );
        let vector = simd::vector_text(op, elem, &load)
            .expect("vectorizability was checked before entry");
        let vn = l.n;
        let vector_loop = format!(
            "(block $.vdone{vn}\n(loop $.vbody{vn}\n(br_if $.vdone{vn} (i32.gt_s (i32.add (local.get {idx}) (i32.const {lanes})) (local.get {len})))\n(v128.store {} {vector})\n(local.set {idx} (i32.add (local.get {idx}) (i32.const {lanes})))\n(br $.vbody{vn})))",
            addr(&dd, &format!("(local.get {})", l.idx), elem.shift()),
            idx = l.idx,
            len = l.len
        );
        // Scalar remainder; bit-identical to the scalar lowering.
        let step = self.typed_map_step(&l, elem, &dd, params, body)?;
        let rest = self.next_id();
        let remainder = format!(
            "(block $.done{rest}\n(loop $.body{rest}\n(br_if $.done{rest} (i32.ge_s (local.get {idx}) (local.get {len})))\n{step}\n(local.set {idx} (i32.add (local.get {idx}) (i32.const 1)))\n(br $.body{rest})))",
            idx = l.idx,
            len = l.len
        );
        let text = format!(
            "(block (result f64)\n{prelude}\n{dst_text}\n{vector_loop}\n{remainder}\n(local.get {dst}))"
        );
        Ok(Fragment::new(text, ValueKind::TypedArray).with_schema(Schema::Elem(elem)))
    }

    /// Maximum-size buffer, then the view's length header is rebound to the
    /// kept count.
    fn typed_filter(
        &mut self,
        target: Fragment,
        elem: ElementType,
        cb: &Node,
    ) -> Result<Fragment, CompileError> {
        let (params, body) = self.callback("filter", cb)?;
        let (prelude, l) = self.typed_open(&target);
        let (dst_text, dst, dd) = self.typed_dst(l.n, elem, &format!("(local.get {})", l.len));
        let cnt = self.scratch_at("cnt", l.n, "i32");
        let x = self.scratch_at("x", l.n, "f64");
        let xi = self.scratch_at("xi", l.n, "f64");
        let keep = self
            .inline_callback(
                &params,
                &[(x.clone(), ValueKind::F64), (xi.clone(), ValueKind::F64)],
                body,
            )?
            .as_bool();
        let step = format!(
            "(local.set {x} {})\n(local.set {xi} (f64.convert_i32_s (local.get {idx})))\n(if {} (then\n({} {} {})\n(local.set {cnt} (i32.add (local.get {cnt}) (i32.const 1)))))",
            read_f64(&l, elem, &format!("(local.get {})", l.idx)),
            keep.text,
            elem.store_op(),
            addr(&dd, &format!("(local.get {cnt})"), elem.shift()),
            typed_store_value(elem, &format!("(local.get {x})")),
            idx = l.idx
        );
        let text = format!(
            "(block (result f64)\n{prelude}\n{dst_text}\n(local.set {cnt} (i32.const 0))\n{}\n(i32.store (call $__ptr_offset (local.get {dst})) (local.get {cnt}))\n(local.get {dst}))",
            for_loop(l.n, &l.idx, &l.len, &step)
        );
        Ok(Fragment::new(text, ValueKind::TypedArray).with_schema(Schema::Elem(elem)))
    }

    fn typed_reduce(
        &mut self,
        target: Fragment,
        elem: ElementType,
        args: &[&Node],
        right: bool,
    ) -> Result<Fragment, CompileError> {
        let (params, body) = self.callback("reduce", args[0])?;
        let (prelude, l) = self.typed_open(&target);
        let acc = self.scratch_at("acc", l.n, "f64");
        let x = self.scratch_at("x", l.n, "f64");
        let xi = self.scratch_at("xi", l.n, "f64");
        let folded = self
            .inline_callback(
                &params,
                &[
                    (acc.clone(), ValueKind::F64),
                    (x.clone(), ValueKind::F64),
                    (xi.clone(), ValueKind::F64),
                ],
                body,
            )?
            .as_f64();
        let first = read_f64(&l, elem, &format!("(local.get {})", l.idx));
        let init = match args.get(1).copied() {
            Some(init) => {
                let init = self.gen(init)?.as_f64();
                if right {
                    format!(
                        "(local.set {acc} {})\n(local.set {idx} (i32.sub (local.get {len}) (i32.const 1)))",
                        init.text,
                        idx = l.idx,
                        len = l.len
                    )
                } else {
                    format!("(local.set {acc} {})", init.text)
                }
            }
            None if right => format!(
                "(local.set {idx} (i32.sub (local.get {len}) (i32.const 1)))\n(local.set {acc} {first})\n(local.set {idx} (i32.sub (local.get {idx}) (i32.const 1)))",
                idx = l.idx,
                len = l.len
            ),
            None => format!(
                "(local.set {acc} {first})\n(local.set {idx} (i32.const 1))",
                idx = l.idx
            ),
        };
        let step = format!(
            "(local.set {x} {first})\n(local.set {xi} (f64.convert_i32_s (local.get {idx})))\n(local.set {acc} {})",
            folded.text,
            idx = l.idx
        );
        let scan = if right {
            format!(
                "(block $.done{n}\n(loop $.body{n}\n(br_if $.done{n} (i32.lt_s (local.get {idx}) (i32.const 0)))\n{step}\n(local.set {idx} (i32.sub (local.get {idx}) (i32.const 1)))\n(br $.body{n})))",
                n = l.n,
                idx = l.idx
            )
        } else {
            for_loop(l.n, &l.idx, &l.len, &step)
        };
        let text =
            format!("(block (result f64)\n{prelude}\n{init}\n{scan}\n(local.get {acc}))");
        Ok(Fragment::new(text, ValueKind::F64))
    }

    fn typed_find(
        &mut self,
        target: Fragment,
        elem: ElementType,
        cb: &Node,
        value: bool,
    ) -> Result<Fragment, CompileError> {
        let (params, body) = self.callback("find", cb)?;
        let (prelude, l) = self.typed_open(&target);
        let res = self.scratch_at("res", l.n, "f64");
        let x = self.scratch_at("x", l.n, "f64");
        let xi = self.scratch_at("xi", l.n, "f64");
        let hit = self
            .inline_callback(
                &params,
                &[(x.clone(), ValueKind::F64), (xi.clone(), ValueKind::F64)],
                body,
            )?
            .as_bool();
        let (miss, found) = if value {
            ("(f64.const nan)", format!("(local.get {x})"))
        } else {
            (
                "(f64.const -1)",
                format!("(f64.convert_i32_s (local.get {}))", l.idx),
            )
        };
        let step = format!(
            "(local.set {x} {})\n(local.set {xi} (f64.convert_i32_s (local.get {idx})))\n(if {} (then (local.set {res} {found}) (br $.done{n})))",
            read_f64(&l, elem, &format!("(local.get {})", l.idx)),
            hit.text,
            idx = l.idx,
            n = l.n
        );
        let text = format!(
            "(block (result f64)\n{prelude}\n(local.set {res} {miss})\n{}\n(local.get {res}))",
            for_loop(l.n, &l.idx, &l.len, &step)
        );
        Ok(Fragment::new(text, ValueKind::F64))
    }

    fn typed_index_of(
        &mut self,
        target: Fragment,
        elem: ElementType,
        needle: &Node,
        includes: bool,
    ) -> Result<Fragment, CompileError> {
        let needle = self.gen(needle)?.as_f64();
        let (prelude, l) = self.typed_open(&target);
        let nv = self.scratch_at("nv", l.n, "f64");
        let cmp = format!(
            "(f64.eq {} (local.get {nv}))",
            read_f64(&l, elem, &format!("(local.get {})", l.idx))
        );
        if includes {
            let res = self.scratch_at("res", l.n, "i32");
            let step = format!(
                "(if {cmp} (then (local.set {res} (i32.const 1)) (br $.done{n})))",
                n = l.n
            );
            let text = format!(
                "(block (result i32)\n{prelude}\n(local.set {nv} {})\n(local.set {res} (i32.const 0))\n{}\n(local.get {res}))",
                needle.text,
                for_loop(l.n, &l.idx, &l.len, &step)
            );
            Ok(Fragment::new(text, ValueKind::Bool))
        } else {
            let res = self.scratch_at("res", l.n, "f64");
            let step = format!(
                "(if {cmp} (then (local.set {res} (f64.convert_i32_s (local.get {idx}))) (br $.done{n})))",
                idx = l.idx,
                n = l.n
            );
            let text = format!(
                "(block (result f64)\n{prelude}\n(local.set {nv} {})\n(local.set {res} (f64.const -1))\n{}\n(local.get {res}))",
                needle.text,
                for_loop(l.n, &l.idx, &l.len, &step)
            );
            Ok(Fragment::new(text, ValueKind::F64))
        }
    }

    fn typed_every_some(
        &mut self,
        target: Fragment,
        elem: ElementType,
        cb: &Node,
        every: bool,
    ) -> Result<Fragment, CompileError> {
        let (params, body) = self.callback("every", cb)?;
        let (prelude, l) = self.typed_open(&target);
        let res = self.scratch_at("res", l.n, "i32");
        let x = self.scratch_at("x", l.n, "f64");
        let xi = self.scratch_at("xi", l.n, "f64");
        let pred = self
            .inline_callback(
                &params,
                &[(x.clone(), ValueKind::F64), (xi.clone(), ValueKind::F64)],
                body,
            )?
            .as_bool();
        let (seed, flip, test) = if every {
            (1, 0, format!("(i32.eqz {})", pred.text))
        } else {
            (0, 1, pred.text.clone())
        };
        let step = format!(
            "(local.set {x} {})\n(local.set {xi} (f64.convert_i32_s (local.get {idx})))\n(if {test} (then (local.set {res} (i32.const {flip})) (br $.done{n})))",
            read_f64(&l, elem, &format!("(local.get {})", l.idx)),
            idx = l.idx,
            n = l.n
        );
        let text = format!(
            "(block (result i32)\n{prelude}\n(local.set {res} (i32.const {seed}))\n{}\n(local.get {res}))",
            for_loop(l.n, &l.idx, &l.len, &step)
        );
        Ok(Fragment::new(text, ValueKind::Bool))
    }

    fn typed_for_each(
        &mut self,
        target: Fragment,
        elem: ElementType,
        cb: &Node,
    ) -> Result<Fragment, CompileError> {
        let (params, body) = self.callback("forEach", cb)?;
        let (prelude, l) = self.typed_open(&target);
        let x = self.scratch_at("x", l.n, "f64");
        let xi = self.scratch_at("xi", l.n, "f64");
        let effect = self.inline_callback(
            &params,
            &[(x.clone(), ValueKind::F64), (xi.clone(), ValueKind::F64)],
            body,
        )?;
        let step = format!(
            "(local.set {x} {})\n(local.set {xi} (f64.convert_i32_s (local.get {idx})))\n(drop {})",
            read_f64(&l, elem, &format!("(local.get {})", l.idx)),
            effect.text,
            idx = l.idx
        );
        let text = format!(
            "(block (result f64)\n{prelude}\n{}\n(f64.const nan))",
            for_loop(l.n, &l.idx, &l.len, &step)
        );
        Ok(Fragment::new(text, ValueKind::F64))
    }

    fn typed_at(
        &mut self,
        target: Fragment,
        elem: ElementType,
        index: &Node,
    ) -> Result<Fragment, CompileError> {
        let index = self.gen(index)?.as_i32();
        let (prelude, l) = self.typed_open(&target);
        let ix = self.scratch_at("ix", l.n, "i32");
        let res = self.scratch_at("res", l.n, "f64");
        let text = format!(
            "(block (result f64)\n{prelude}\n(local.set {ix} {})\n(if (i32.lt_s (local.get {ix}) (i32.const 0)) (then (local.set {ix} (i32.add (local.get {ix}) (local.get {len})))))\n(if (i32.or (i32.lt_s (local.get {ix}) (i32.const 0)) (i32.ge_s (local.get {ix}) (local.get {len})))\n(then (local.set {res} (f64.const nan)))\n(else (local.set {res} {})))\n(local.get {res}))",
            index.text,
            read_f64(&l, elem, &format!("(local.get {ix})")),
            len = l.len
        );
        Ok(Fragment::new(text, ValueKind::F64))
    }

    /// `slice` copies into a fresh buffer; `subarray` is the zero-copy
    /// variant.
    fn typed_slice(
        &mut self,
        target: Fragment,
        elem: ElementType,
        args: &[&Node],
    ) -> Result<Fragment, CompileError> {
        let begin = args.first().copied().map(|a| self.gen(a)).transpose()?;
        let end = args.get(1).copied().map(|a| self.gen(a)).transpose()?;
        let (prelude, l) = self.typed_open(&target);
        let s = self.scratch_at("s", l.n, "i32");
        let e = self.scratch_at("e", l.n, "i32");
        let cnt = self.scratch_at("cnt", l.n, "i32");
        let (dst_text, dst, dd) = self.typed_dst(l.n, elem, &format!("(local.get {cnt})"));
        let begin = match begin {
            Some(b) => b.as_i32().text,
            None => "(i32.const 0)".to_string(),
        };
        let end = match end {
            Some(e) => e.as_i32().text,
            None => format!("(local.get {})", l.len),
        };
        let step = format!(
            "({} {} {})",
            elem.store_op(),
            addr(&dd, &format!("(local.get {})", l.idx), elem.shift()),
            read_raw(
                &l,
                elem,
                &format!("(i32.add (local.get {s}) (local.get {idx}))", idx = l.idx)
            )
        );
        let text = format!(
            "(block (result f64)\n{prelude}\n(local.set {s} {begin})\n(local.set {e} {end})\n{}\n{}\n(local.set {cnt} (i32.sub (local.get {e}) (local.get {s})))\n(if (i32.lt_s (local.get {cnt}) (i32.const 0)) (then (local.set {cnt} (i32.const 0))))\n{dst_text}\n{}\n(local.get {dst}))",
            clamp(&s, &l.len),
            clamp(&e, &l.len),
            for_loop(l.n, &l.idx, &cnt, &step)
        );
        Ok(Fragment::new(text, ValueKind::TypedArray).with_schema(Schema::Elem(elem)))
    }

    /// Copy a typed array or a regular array into this view at an offset.
    fn typed_set_from(
        &mut self,
        target: Fragment,
        elem: ElementType,
        args: &[&Node],
    ) -> Result<Fragment, CompileError> {
        let other = self.gen(args[0])?;
        let offset = args.get(1).copied().map(|a| self.gen(a)).transpose()?;
        let from_array = other.kind == ValueKind::Array;
        let source_elem = other.elem().unwrap_or(elem);
        let (prelude, l) = self.typed_open(&target);
        let off = self.scratch_at("off", l.n, "i32");
        let sv = self.scratch_at("sv", l.n, "f64");
        let sl = self.scratch_at("sl", l.n, "i32");
        let sp = self.scratch_at("sp", l.n, "i32");
        let offset = match offset {
            Some(o) => o.as_i32().text,
            None => "(i32.const 0)".to_string(),
        };
        let (source_len, read) = if from_array {
            self.use_features(Features::ARRAYS);
            (
                format!("(i32.trunc_sat_f64_s (call $__ptr_len (local.get {sv})))"),
                format!(
                    "(call $__arr_get (local.get {sv}) (f64.convert_i32_s (local.get {})))",
                    l.idx
                ),
            )
        } else {
            let raw = format!(
                "({} (i32.add (local.get {sp}) (i32.shl (local.get {}) (i32.const {}))))",
                source_elem.load_op(),
                l.idx,
                source_elem.shift()
            );
            let read = match source_elem.to_f64_op() {
                Some(conv) => format!("({conv} {raw})"),
                None => raw,
            };
            (format!("(call $__typed_len (local.get {sv}))"), read)
        };
        let step = format!(
            "({} {} {})",
            elem.store_op(),
            addr(
                &l.sd,
                &format!("(i32.add (local.get {off}) (local.get {idx}))", idx = l.idx),
                elem.shift()
            ),
            typed_store_value(elem, &read)
        );
        let source_ptr = if from_array {
            String::new()
        } else {
            format!("(local.set {sp} (call $__typed_offset (local.get {sv})))\n")
        };
        let text = format!(
            "(block (result f64)\n{prelude}\n(local.set {sv} {})\n(local.set {sl} {source_len})\n{source_ptr}(local.set {off} {offset})\n{}\n(local.get {src}))",
            other.text,
            for_loop(l.n, &l.idx, &sl, &step),
            src = l.src
        );
        Ok(Fragment::new(text, ValueKind::TypedArray).with_schema(Schema::Elem(elem)))
    }

    fn typed_fill(
        &mut self,
        target: Fragment,
        elem: ElementType,
        args: &[&Node],
    ) -> Result<Fragment, CompileError> {
        let value = self.gen(args[0])?.as_f64();
        let begin = args.get(1).copied().map(|a| self.gen(a)).transpose()?;
        let end = args.get(2).copied().map(|a| self.gen(a)).transpose()?;
        let (prelude, l) = self.typed_open(&target);
        let v = self.scratch_at("v", l.n, "f64");
        let s = self.scratch_at("s", l.n, "i32");
        let e = self.scratch_at("e", l.n, "i32");
        let begin = match begin {
            Some(b) => b.as_i32().text,
            None => "(i32.const 0)".to_string(),
        };
        let end = match end {
            Some(e) => e.as_i32().text,
            None => format!("(local.get {})", l.len),
        };
        let step = format!(
            "({} {} {})",
            elem.store_op(),
            addr(&l.sd, &format!("(local.get {})", l.idx), elem.shift()),
            typed_store_value(elem, &format!("(local.get {v})"))
        );
        let text = format!(
            "(block (result f64)\n{prelude}\n(local.set {v} {})\n(local.set {s} {begin})\n(local.set {e} {end})\n{}\n{}\n(local.set {idx} (local.get {s}))\n{}\n(local.get {src}))",
            value.text,
            clamp(&s, &l.len),
            clamp(&e, &l.len),
            for_loop(l.n, &l.idx, &e, &step),
            idx = l.idx,
            src = l.src
        );
        Ok(Fragment::new(text, ValueKind::TypedArray).with_schema(Schema::Elem(elem)))
    }

    fn typed_reverse(
        &mut self,
        target: Fragment,
        elem: ElementType,
    ) -> Result<Fragment, CompileError> {
        let (prelude, l) = self.typed_open(&target);
        let j = self.scratch_at("j", l.n, "i32");
        let tmp = self.scratch_at("tmp", l.n, elem.wat_ty());
        let text = format!(
            "(block (result f64)\n{prelude}\n(local.set {j} (i32.sub (local.get {len}) (i32.const 1)))\n(block $.done{n}\n(loop $.body{n}\n(br_if $.done{n} (i32.ge_s (local.get {idx}) (local.get {j})))\n(local.set {tmp} {ri})\n({store} {ai} {rj})\n({store} {aj} (local.get {tmp}))\n(local.set {idx} (i32.add (local.get {idx}) (i32.const 1)))\n(local.set {j} (i32.sub (local.get {j}) (i32.const 1)))\n(br $.body{n})))\n(local.get {src}))",
            n = l.n,
            idx = l.idx,
            len = l.len,
            src = l.src,
            store = elem.store_op(),
            ri = read_raw(&l, elem, &format!("(local.get {})", l.idx)),
            rj = read_raw(&l, elem, &format!("(local.get {j})")),
            ai = addr(&l.sd, &format!("(local.get {})", l.idx), elem.shift()),
            aj = addr(&l.sd, &format!("(local.get {j})"), elem.shift())
        );
        Ok(Fragment::new(text, ValueKind::TypedArray).with_schema(Schema::Elem(elem)))
    }

    fn typed_to_reversed(
        &mut self,
        target: Fragment,
        elem: ElementType,
    ) -> Result<Fragment, CompileError> {
        let (prelude, l) = self.typed_open(&target);
        let (dst_text, dst, dd) = self.typed_dst(l.n, elem, &format!("(local.get {})", l.len));
        let step = format!(
            "({} {} {})",
            elem.store_op(),
            addr(&dd, &format!("(local.get {})", l.idx), elem.shift()),
            read_raw(
                &l,
                elem,
                &format!(
                    "(i32.sub (i32.sub (local.get {len}) (i32.const 1)) (local.get {idx}))",
                    len = l.len,
                    idx = l.idx
                )
            )
        );
        let text = format!(
            "(block (result f64)\n{prelude}\n{dst_text}\n{}\n(local.get {dst}))",
            for_loop(l.n, &l.idx, &l.len, &step)
        );
        Ok(Fragment::new(text, ValueKind::TypedArray).with_schema(Schema::Elem(elem)))
    }

    fn typed_copy_within(
        &mut self,
        target: Fragment,
        elem: ElementType,
        args: &[&Node],
    ) -> Result<Fragment, CompileError> {
        let to = self.gen(args[0])?.as_i32();
        let from = self.gen(args[1])?.as_i32();
        let end = args.get(2).copied().map(|a| self.gen(a)).transpose()?;
        let (prelude, l) = self.typed_open(&target);
        let t = self.scratch_at("t", l.n, "i32");
        let s = self.scratch_at("s", l.n, "i32");
        let e = self.scratch_at("e", l.n, "i32");
        let cnt = self.scratch_at("cnt", l.n, "i32");
        let k = self.scratch_at("k", l.n, "i32");
        let end = match end {
            Some(e) => e.as_i32().text,
            None => format!("(local.get {})", l.len),
        };
        let step = format!(
            "({} {} {})",
            elem.store_op(),
            addr(
                &l.sd,
                &format!("(i32.add (local.get {t}) (local.get {k}))"),
                elem.shift()
            ),
            read_raw(
                &l,
                elem,
                &format!("(i32.add (local.get {s}) (local.get {k}))")
            )
        );
        let n2 = self.next_id();
        let forward = format!(
            "(local.set {k} (i32.const 0))\n(block $.done{n2}\n(loop $.body{n2}\n(br_if $.done{n2} (i32.ge_s (local.get {k}) (local.get {cnt})))\n{step}\n(local.set {k} (i32.add (local.get {k}) (i32.const 1)))\n(br $.body{n2})))"
        );
        let n3 = self.next_id();
        let backward = format!(
            "(local.set {k} (i32.sub (local.get {cnt}) (i32.const 1)))\n(block $.done{n3}\n(loop $.body{n3}\n(br_if $.done{n3} (i32.lt_s (local.get {k}) (i32.const 0)))\n{step}\n(local.set {k} (i32.sub (local.get {k}) (i32.const 1)))\n(br $.body{n3})))"
        );
        let text = format!(
            "(block (result f64)\n{prelude}\n(local.set {t} {})\n(local.set {s} {})\n(local.set {e} {end})\n{}\n{}\n{}\n(local.set {cnt} (i32.sub (local.get {e}) (local.get {s})))\n(if (i32.gt_s (local.get {cnt}) (i32.sub (local.get {len}) (local.get {t}))) (then (local.set {cnt} (i32.sub (local.get {len}) (local.get {t})))))\n(if (i32.lt_s (local.get {cnt}) (i32.const 0)) (then (local.set {cnt} (i32.const 0))))\n(if (i32.gt_s (local.get {t}) (local.get {s}))\n(then\n{backward})\n(else\n{forward}))\n(local.get {src}))",
            to.text,
            from.text,
            clamp(&t, &l.len),
            clamp(&s, &l.len),
            clamp(&e, &l.len),
            len = l.len,
            src = l.src
        );
        Ok(Fragment::new(text, ValueKind::TypedArray).with_schema(Schema::Elem(elem)))
    }

    /// Insertion sort with the element-type comparator, on raw values.
    fn typed_sort_body(&mut self, n: u32, l: &TypedLoop, elem: ElementType, sd: &str) -> String {
        let key = self.scratch_at("key", n, elem.wat_ty());
        let j = self.scratch_at("j", n, "i32");
        let i = self.scratch_at("i", n, "i32");
        let read = |index: &str| {
            format!(
                "({} (i32.add (local.get {sd}) (i32.shl {index} (i32.const {}))))",
                elem.load_op(),
                elem.shift()
            )
        };
        let write = |index: &str, value: &str| {
            format!(
                "({} (i32.add (local.get {sd}) (i32.shl {index} (i32.const {}))) {value})",
                elem.store_op(),
                elem.shift()
            )
        };
        let jp1 = format!("(i32.add (local.get {j}) (i32.const 1))");
        format!(
            "(local.set {i} (i32.const 1))\n(block $.done{n}\n(loop $.body{n}\n(br_if $.done{n} (i32.ge_s (local.get {i}) (local.get {len})))\n(local.set {key} {keyget})\n(local.set {j} (i32.sub (local.get {i}) (i32.const 1)))\n(block $.idone{n}\n(loop $.ibody{n}\n(br_if $.idone{n} (i32.lt_s (local.get {j}) (i32.const 0)))\n(br_if $.idone{n} (i32.eqz ({gt} {jget} (local.get {key}))))\n{shift}\n(local.set {j} (i32.sub (local.get {j}) (i32.const 1)))\n(br $.ibody{n})))\n{place}\n(local.set {i} (i32.add (local.get {i}) (i32.const 1)))\n(br $.body{n})))",
            len = l.len,
            gt = elem.gt_op(),
            keyget = read(&format!("(local.get {i})")),
            jget = read(&format!("(local.get {j})")),
            shift = write(&jp1, &read(&format!("(local.get {j})"))),
            place = write(&jp1, &format!("(local.get {key})"))
        )
    }

    fn typed_sort(
        &mut self,
        target: Fragment,
        elem: ElementType,
    ) -> Result<Fragment, CompileError> {
        let (prelude, l) = self.typed_open(&target);
        let sd = l.sd.clone();
        let body = self.typed_sort_body(l.n, &l, elem, &sd);
        let text = format!(
            "(block (result f64)\n{prelude}\n{body}\n(local.get {}))",
            l.src
        );
        Ok(Fragment::new(text, ValueKind::TypedArray).with_schema(Schema::Elem(elem)))
    }

    fn typed_to_sorted(
        &mut self,
        target: Fragment,
        elem: ElementType,
    ) -> Result<Fragment, CompileError> {
        let (prelude, l) = self.typed_open(&target);
        let (dst_text, dst, dd) = self.typed_dst(l.n, elem, &format!("(local.get {})", l.len));
        let copy = format!(
            "({} {} {})",
            elem.store_op(),
            addr(&dd, &format!("(local.get {})", l.idx), elem.shift()),
            read_raw(&l, elem, &format!("(local.get {})", l.idx))
        );
        let n2 = self.next_id();
        let sort = self.typed_sort_body(n2, &l, elem, &dd);
        let text = format!(
            "(block (result f64)\n{prelude}\n{dst_text}\n{}\n{sort}\n(local.get {dst}))",
            for_loop(l.n, &l.idx, &l.len, &copy)
        );
        Ok(Fragment::new(text, ValueKind::TypedArray).with_schema(Schema::Elem(elem)))
    }

    fn typed_with(
        &mut self,
        target: Fragment,
        elem: ElementType,
        index: &Node,
        value: &Node,
    ) -> Result<Fragment, CompileError> {
        let index = self.gen(index)?.as_i32();
        let value = self.gen(value)?.as_f64();
        let (prelude, l) = self.typed_open(&target);
        let ix = self.scratch_at("ix", l.n, "i32");
        let (dst_text, dst, dd) = self.typed_dst(l.n, elem, &format!("(local.get {})", l.len));
        let copy = format!(
            "({} {} {})",
            elem.store_op(),
            addr(&dd, &format!("(local.get {})", l.idx), elem.shift()),
            read_raw(&l, elem, &format!("(local.get {})", l.idx))
        );
        let text = format!(
            "(block (result f64)\n{prelude}\n(local.set {ix} {})\n(if (i32.lt_s (local.get {ix}) (i32.const 0)) (then (local.set {ix} (i32.add (local.get {ix}) (local.get {len})))))\n{dst_text}\n{}\n({} {} {})\n(local.get {dst}))",
            index.text,
            for_loop(l.n, &l.idx, &l.len, &copy),
            elem.store_op(),
            addr(&dd, &format!("(local.get {ix})"), elem.shift()),
            typed_store_value(elem, &value.text),
            len = l.len
        );
        Ok(Fragment::new(text, ValueKind::TypedArray).with_schema(Schema::Elem(elem)))
    }

    fn typed_join(
        &mut self,
        target: Fragment,
        elem: ElementType,
        sep: Option<&Node>,
    ) -> Result<Fragment, CompileError> {
        self.use_features(Features::STRINGS | Features::MEMORY);
        self.request_stdlib("__to_str");
        let sep = match sep {
            Some(node) => {
                let frag = self.gen(node)?;
                self.to_str(frag)
            }
            None => Fragment::new(
                jz_types::RawValue::sso(",")
                    .expect("separator fits SSO")
                    .wat_const(),
                ValueKind::String,
            ),
        };
        let (prelude, l) = self.typed_open(&target);
        let sv = self.scratch_at("sep", l.n, "f64");
        let res = self.scratch_at("res", l.n, "f64");
        let step = format!(
            "(if (i32.gt_s (local.get {idx}) (i32.const 0)) (then (local.set {res} (call $__strcat (local.get {res}) (local.get {sv})))))\n(local.set {res} (call $__strcat (local.get {res}) (call $__to_str {})))",
            read_f64(&l, elem, &format!("(local.get {})", l.idx)),
            idx = l.idx
        );
        let empty = jz_types::RawValue::sso("")
            .expect("empty string fits SSO")
            .wat_const();
        let text = format!(
            "(block (result f64)\n{prelude}\n(local.set {sv} {})\n(local.set {res} {empty})\n{}\n(local.get {res}))",
            sep.text,
            for_loop(l.n, &l.idx, &l.len, &step)
        );
        Ok(Fragment::new(text, ValueKind::String))
    }
}
