//! Inlined loop lowerings for regular-array methods.
//!
//! Reads go through the smart accessor `__arr_get` so ring and flat forms
//! behave alike; freshly allocated result arrays are always flat and are
//! written with direct stores. `shift`/`unshift` on an assignable target
//! convert the array to ring form first and stay O(1) afterwards.

use jz_ast::Node;
use jz_types::RawValue;

use crate::context::{Binding, Generator};
use crate::error::CompileError;
use crate::features::Features;
use crate::fragment::{Fragment, ValueKind};

pub(crate) struct ArrLoop {
    pub n: u32,
    pub src: String,
    pub len: String,
    pub idx: String,
}

/// The current element, ring-aware.
fn get_elem(l: &ArrLoop) -> String {
    format!(
        "(call $__arr_get (local.get {}) (f64.convert_i32_s (local.get {})))",
        l.src, l.idx
    )
}

fn get_at(src: &str, index: &str) -> String {
    format!("(call $__arr_get (local.get {src}) (f64.convert_i32_s {index}))")
}

fn set_at(src: &str, index: &str, value: &str) -> String {
    format!(
        "(drop (call $__arr_set (local.get {src}) (f64.convert_i32_s {index}) {value}))"
    )
}

/// The `block $.done / loop $.body` scaffold with a bound check at the top
/// and the back-branch at the bottom.
fn for_loop(n: u32, idx: &str, len: &str, body: &str) -> String {
    format!(
        "(block $.done{n}\n(loop $.body{n}\n(br_if $.done{n} (i32.ge_s (local.get {idx}) (local.get {len})))\n{body}\n(local.set {idx} (i32.add (local.get {idx}) (i32.const 1)))\n(br $.body{n})))"
    )
}

/// Normalize a slice endpoint: negative indices gain `len`, then both ends
/// clamp into `[0, len]`.
fn clamp(slot: &str, len: &str) -> String {
    format!(
        "(if (i32.lt_s (local.get {slot}) (i32.const 0)) (then (local.set {slot} (i32.add (local.get {slot}) (local.get {len})))))\n(if (i32.lt_s (local.get {slot}) (i32.const 0)) (then (local.set {slot} (i32.const 0))))\n(if (i32.gt_s (local.get {slot}) (local.get {len})) (then (local.set {slot} (local.get {len}))))"
    )
}

impl Generator {
    fn arr_open(&mut self, target: &Fragment) -> (String, ArrLoop) {
        self.use_features(Features::ARRAYS | Features::MEMORY);
        let n = self.next_id();
        let src = self.scratch_at("src", n, "f64");
        let len = self.scratch_at("len", n, "i32");
        let idx = self.scratch_at("idx", n, "i32");
        let prelude = format!(
            "(local.set {src} {})\n(local.set {len} (i32.trunc_sat_f64_s (call $__ptr_len (local.get {src}))))\n(local.set {idx} (i32.const 0))",
            target.text
        );
        (prelude, ArrLoop { n, src, len, idx })
    }

    /// A fresh flat destination array of `len_expr` elements.
    fn arr_dst(&mut self, n: u32, len_expr: &str) -> (String, String, String) {
        let dst = self.scratch_at("dst", n, "f64");
        let dbase = self.scratch_at("dbase", n, "i32");
        let text = format!(
            "(local.set {dst} (call $__alloc (i32.const 1) {len_expr}))\n(local.set {dbase} (call $__ptr_offset (local.get {dst})))"
        );
        (text, dst, dbase)
    }

    pub(crate) fn array_method(
        &mut self,
        obj: &Node,
        target: Fragment,
        method: &str,
        args: &[&Node],
    ) -> Result<Fragment, CompileError> {
        match method {
            "map" => {
                self.expect_args(method, args, 1, 1)?;
                self.arr_map(target, args[0])
            }
            "filter" => {
                self.expect_args(method, args, 1, 1)?;
                self.arr_filter(target, args[0])
            }
            "reduce" => {
                self.expect_args(method, args, 1, 2)?;
                self.arr_reduce(target, args, false)
            }
            "reduceRight" => {
                self.expect_args(method, args, 1, 2)?;
                self.arr_reduce(target, args, true)
            }
            "find" => {
                self.expect_args(method, args, 1, 1)?;
                self.arr_find(target, args[0], FindResult::Value)
            }
            "findIndex" => {
                self.expect_args(method, args, 1, 1)?;
                self.arr_find(target, args[0], FindResult::Index)
            }
            "indexOf" => {
                self.expect_args(method, args, 1, 1)?;
                self.arr_index_of(target, args[0], false)
            }
            "includes" => {
                self.expect_args(method, args, 1, 1)?;
                self.arr_index_of(target, args[0], true)
            }
            "every" => {
                self.expect_args(method, args, 1, 1)?;
                self.arr_every_some(target, args[0], true)
            }
            "some" => {
                self.expect_args(method, args, 1, 1)?;
                self.arr_every_some(target, args[0], false)
            }
            "forEach" => {
                self.expect_args(method, args, 1, 1)?;
                self.arr_for_each(target, args[0])
            }
            "slice" => {
                self.expect_args(method, args, 0, 2)?;
                self.arr_slice(target, args)
            }
            "at" => {
                self.expect_args(method, args, 1, 1)?;
                self.arr_at(target, args[0])
            }
            "push" => {
                self.expect_args(method, args, 1, 1)?;
                self.arr_push(target, args[0])
            }
            "pop" => {
                self.expect_args(method, args, 0, 0)?;
                self.use_features(Features::ARRAYS | Features::MEMORY);
                Ok(Fragment::new(
                    format!("(call $__arr_pop {})", target.text),
                    ValueKind::F64,
                ))
            }
            "shift" => {
                self.expect_args(method, args, 0, 0)?;
                self.arr_shift(obj, target)
            }
            "unshift" => {
                self.expect_args(method, args, 1, 1)?;
                self.arr_unshift(obj, target, args[0])
            }
            "concat" => {
                self.expect_args(method, args, 1, 1)?;
                self.arr_concat(target, args[0])
            }
            "flat" => {
                self.expect_args(method, args, 0, 0)?;
                self.arr_flat(target)
            }
            "flatMap" => {
                self.expect_args(method, args, 1, 1)?;
                let mapped = self.arr_map(target, args[0])?;
                self.arr_flat(mapped)
            }
            "join" => {
                self.expect_args(method, args, 0, 1)?;
                self.arr_join(target, args.first().copied())
            }
            "reverse" => {
                self.expect_args(method, args, 0, 0)?;
                self.arr_reverse(target)
            }
            "toReversed" => {
                self.expect_args(method, args, 0, 0)?;
                self.arr_to_reversed(target)
            }
            "sort" => {
                self.expect_args(method, args, 0, 0)?;
                self.arr_sort(target)
            }
            "toSorted" => {
                self.expect_args(method, args, 0, 0)?;
                self.arr_to_sorted(target)
            }
            "with" => {
                self.expect_args(method, args, 2, 2)?;
                self.arr_with(target, args[0], args[1])
            }
            "fill" => {
                self.expect_args(method, args, 1, 3)?;
                self.arr_fill(target, args)
            }
            "set" => {
                self.expect_args(method, args, 1, 2)?;
                self.arr_set_from(target, args)
            }
            "copyWithin" => {
                self.expect_args(method, args, 2, 3)?;
                self.arr_copy_within(target, args)
            }
            _ => Err(CompileError::InvalidMethod {
                method: method.to_string(),
                kind: ValueKind::Array,
            }),
        }
    }

    fn arr_map(&mut self, target: Fragment, cb: &Node) -> Result<Fragment, CompileError> {
        let (params, body) = self.callback("map", cb)?;
        let (prelude, l) = self.arr_open(&target);
        let (dst_text, dst, dbase) = self.arr_dst(l.n, &format!("(local.get {})", l.len));
        let x = self.scratch_at("x", l.n, "f64");
        let xi = self.scratch_at("xi", l.n, "f64");
        let mapped = self
            .inline_callback(
                &params,
                &[(x.clone(), ValueKind::F64), (xi.clone(), ValueKind::F64)],
                body,
            )?
            .as_f64();
        let step = format!(
            "(local.set {x} {})\n(local.set {xi} (f64.convert_i32_s (local.get {idx})))\n(f64.store (i32.add (local.get {dbase}) (i32.shl (local.get {idx}) (i32.const 3))) {})",
            get_elem(&l),
            mapped.text,
            idx = l.idx
        );
        let text = format!(
            "(block (result f64)\n{prelude}\n{dst_text}\n{}\n(local.get {dst}))",
            for_loop(l.n, &l.idx, &l.len, &step)
        );
        Ok(Fragment::new(text, ValueKind::Array))
    }

    /// Allocate a maximum-size buffer, copy keepers, then rebind the length
    /// header to the actual count.
    fn arr_filter(&mut self, target: Fragment, cb: &Node) -> Result<Fragment, CompileError> {
        let (params, body) = self.callback("filter", cb)?;
        let (prelude, l) = self.arr_open(&target);
        let (dst_text, dst, dbase) = self.arr_dst(l.n, &format!("(local.get {})", l.len));
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
            "(local.set {x} {})\n(local.set {xi} (f64.convert_i32_s (local.get {idx})))\n(if {} (then\n(f64.store (i32.add (local.get {dbase}) (i32.shl (local.get {cnt}) (i32.const 3))) (local.get {x}))\n(local.set {cnt} (i32.add (local.get {cnt}) (i32.const 1)))))",
            get_elem(&l),
            keep.text,
            idx = l.idx
        );
        let text = format!(
            "(block (result f64)\n{prelude}\n{dst_text}\n(local.set {cnt} (i32.const 0))\n{}\n(f64.store (i32.sub (local.get {dbase}) (i32.const 8)) (f64.convert_i32_s (local.get {cnt})))\n(local.get {dst}))",
            for_loop(l.n, &l.idx, &l.len, &step)
        );
        Ok(Fragment::new(text, ValueKind::Array))
    }

    fn arr_reduce(
        &mut self,
        target: Fragment,
        args: &[&Node],
        right: bool,
    ) -> Result<Fragment, CompileError> {
        let (params, body) = self.callback("reduce", args[0])?;
        let (prelude, l) = self.arr_open(&target);
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
            // No seed: fold starts from the boundary element.
            None if right => format!(
                "(local.set {idx} (i32.sub (local.get {len}) (i32.const 1)))\n(local.set {acc} {})\n(local.set {idx} (i32.sub (local.get {idx}) (i32.const 1)))",
                get_elem(&l),
                idx = l.idx,
                len = l.len
            ),
            None => format!(
                "(local.set {acc} {})\n(local.set {idx} (i32.const 1))",
                get_elem(&l),
                idx = l.idx
            ),
        };
        let step = format!(
            "(local.set {x} {})\n(local.set {xi} (f64.convert_i32_s (local.get {idx})))\n(local.set {acc} {})",
            get_elem(&l),
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
        let text = format!(
            "(block (result f64)\n{prelude}\n{init}\n{scan}\n(local.get {acc}))"
        );
        Ok(Fragment::new(text, ValueKind::F64))
    }

    fn arr_find(
        &mut self,
        target: Fragment,
        cb: &Node,
        result: FindResult,
    ) -> Result<Fragment, CompileError> {
        let (params, body) = self.callback("find", cb)?;
        let (prelude, l) = self.arr_open(&target);
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
        let (miss, found) = match result {
            FindResult::Value => ("(f64.const nan)", format!("(local.get {x})")),
            FindResult::Index => (
                "(f64.const -1)",
                format!("(f64.convert_i32_s (local.get {}))", l.idx),
            ),
        };
        let step = format!(
            "(local.set {x} {})\n(local.set {xi} (f64.convert_i32_s (local.get {idx})))\n(if {} (then (local.set {res} {found}) (br $.done{n})))",
            get_elem(&l),
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

    fn arr_index_of(
        &mut self,
        target: Fragment,
        needle: &Node,
        includes: bool,
    ) -> Result<Fragment, CompileError> {
        let needle = self.gen(needle)?.as_f64();
        let (prelude, l) = self.arr_open(&target);
        let nv = self.scratch_at("nv", l.n, "f64");
        if includes {
            let res = self.scratch_at("res", l.n, "i32");
            let step = format!(
                "(if (call $__f64_eq {} (local.get {nv})) (then (local.set {res} (i32.const 1)) (br $.done{n})))",
                get_elem(&l),
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
                "(if (call $__f64_eq {} (local.get {nv})) (then (local.set {res} (f64.convert_i32_s (local.get {idx}))) (br $.done{n})))",
                get_elem(&l),
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

    fn arr_every_some(
        &mut self,
        target: Fragment,
        cb: &Node,
        every: bool,
    ) -> Result<Fragment, CompileError> {
        let (params, body) = self.callback("every", cb)?;
        let (prelude, l) = self.arr_open(&target);
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
            get_elem(&l),
            idx = l.idx,
            n = l.n
        );
        let text = format!(
            "(block (result i32)\n{prelude}\n(local.set {res} (i32.const {seed}))\n{}\n(local.get {res}))",
            for_loop(l.n, &l.idx, &l.len, &step)
        );
        Ok(Fragment::new(text, ValueKind::Bool))
    }

    fn arr_for_each(&mut self, target: Fragment, cb: &Node) -> Result<Fragment, CompileError> {
        let (params, body) = self.callback("forEach", cb)?;
        let (prelude, l) = self.arr_open(&target);
        let x = self.scratch_at("x", l.n, "f64");
        let xi = self.scratch_at("xi", l.n, "f64");
        let effect = self.inline_callback(
            &params,
            &[(x.clone(), ValueKind::F64), (xi.clone(), ValueKind::F64)],
            body,
        )?;
        let step = format!(
            "(local.set {x} {})\n(local.set {xi} (f64.convert_i32_s (local.get {idx})))\n(drop {})",
            get_elem(&l),
            effect.text,
            idx = l.idx
        );
        let text = format!(
            "(block (result f64)\n{prelude}\n{}\n(f64.const nan))",
            for_loop(l.n, &l.idx, &l.len, &step)
        );
        Ok(Fragment::new(text, ValueKind::F64))
    }

    fn arr_slice(&mut self, target: Fragment, args: &[&Node]) -> Result<Fragment, CompileError> {
        let begin = args.first().copied().map(|a| self.gen(a)).transpose()?;
        let end = args.get(1).copied().map(|a| self.gen(a)).transpose()?;
        let (prelude, l) = self.arr_open(&target);
        let s = self.scratch_at("s", l.n, "i32");
        let e = self.scratch_at("e", l.n, "i32");
        let cnt = self.scratch_at("cnt", l.n, "i32");
        let (dst_text, dst, dbase) = self.arr_dst(l.n, &format!("(local.get {cnt})"));
        let begin = match begin {
            Some(b) => b.as_i32().text,
            None => "(i32.const 0)".to_string(),
        };
        let end = match end {
            Some(e) => e.as_i32().text,
            None => format!("(local.get {})", l.len),
        };
        let step = format!(
            "(f64.store (i32.add (local.get {dbase}) (i32.shl (local.get {idx}) (i32.const 3))) {})",
            get_at(&l.src, &format!("(i32.add (local.get {s}) (local.get {idx}))", idx = l.idx)),
            idx = l.idx
        );
        let text = format!(
            "(block (result f64)\n{prelude}\n(local.set {s} {begin})\n(local.set {e} {end})\n{}\n{}\n(local.set {cnt} (i32.sub (local.get {e}) (local.get {s})))\n(if (i32.lt_s (local.get {cnt}) (i32.const 0)) (then (local.set {cnt} (i32.const 0))))\n{dst_text}\n{}\n(local.get {dst}))",
            clamp(&s, &l.len),
            clamp(&e, &l.len),
            for_loop(l.n, &l.idx, &cnt, &step)
        );
        Ok(Fragment::new(text, ValueKind::Array))
    }

    fn arr_at(&mut self, target: Fragment, index: &Node) -> Result<Fragment, CompileError> {
        let index = self.gen(index)?.as_i32();
        let (prelude, l) = self.arr_open(&target);
        let ix = self.scratch_at("ix", l.n, "i32");
        let res = self.scratch_at("res", l.n, "f64");
        let text = format!(
            "(block (result f64)\n{prelude}\n(local.set {ix} {})\n(if (i32.lt_s (local.get {ix}) (i32.const 0)) (then (local.set {ix} (i32.add (local.get {ix}) (local.get {len})))))\n(if (i32.or (i32.lt_s (local.get {ix}) (i32.const 0)) (i32.ge_s (local.get {ix}) (local.get {len})))\n(then (local.set {res} (f64.const nan)))\n(else (local.set {res} {})))\n(local.get {res}))",
            index.text,
            get_at(&l.src, &format!("(local.get {ix})")),
            len = l.len
        );
        Ok(Fragment::new(text, ValueKind::F64))
    }

    /// `push` allocates a copy one element longer; in-place growth is only
    /// available through the ring form.
    fn arr_push(&mut self, target: Fragment, value: &Node) -> Result<Fragment, CompileError> {
        let value = self.gen(value)?.as_f64();
        let (prelude, l) = self.arr_open(&target);
        let v = self.scratch_at("v", l.n, "f64");
        let (dst_text, dst, dbase) = self.arr_dst(
            l.n,
            &format!("(i32.add (local.get {}) (i32.const 1))", l.len),
        );
        let step = format!(
            "(f64.store (i32.add (local.get {dbase}) (i32.shl (local.get {idx}) (i32.const 3))) {})",
            get_elem(&l),
            idx = l.idx
        );
        let text = format!(
            "(block (result f64)\n{prelude}\n(local.set {v} {})\n{dst_text}\n{}\n(f64.store (i32.add (local.get {dbase}) (i32.shl (local.get {len}) (i32.const 3))) (local.get {v}))\n(local.get {dst}))",
            value.text,
            for_loop(l.n, &l.idx, &l.len, &step),
            len = l.len
        );
        Ok(Fragment::new(text, ValueKind::Array))
    }

    fn assignable(&self, obj: &Node) -> bool {
        match obj {
            Node::Ident(name) => !matches!(
                self.lookup(name),
                Some(Binding::Function(_)) | None
            ),
            _ => false,
        }
    }

    /// First `shift` converts the target to ring form (rebinding the
    /// variable, since ringness lives in the pointer) and pops the head in
    /// O(1). Unassignable targets fall back to the O(n) flat helper.
    fn arr_shift(&mut self, obj: &Node, target: Fragment) -> Result<Fragment, CompileError> {
        self.use_features(Features::ARRAYS | Features::MEMORY);
        if self.assignable(obj) {
            self.use_features(Features::RING);
            tracing::debug!(array = %obj, "converting to ring form for shift");
            let ring = Fragment::new(
                format!("(call $__to_ring {})", target.text),
                ValueKind::Array,
            );
            let rebound = self.gen_assign(obj, ring)?;
            return Ok(Fragment::new(
                format!("(call $__ring_shift {})", rebound.text),
                ValueKind::F64,
            ));
        }
        Ok(Fragment::new(
            format!("(call $__arr_shift {})", target.text),
            ValueKind::F64,
        ))
    }

    /// `unshift` evaluates to the resulting array. Ring form may resize, so
    /// the helper returns the (possibly new) pointer and the variable is
    /// rebound to it.
    fn arr_unshift(
        &mut self,
        obj: &Node,
        target: Fragment,
        value: &Node,
    ) -> Result<Fragment, CompileError> {
        self.use_features(Features::ARRAYS | Features::MEMORY);
        let value = self.gen(value)?.as_f64();
        if self.assignable(obj) {
            self.use_features(Features::RING);
            tracing::debug!(array = %obj, "converting to ring form for unshift");
            let pushed = Fragment::new(
                format!(
                    "(call $__ring_unshift (call $__to_ring {}) {})",
                    target.text, value.text
                ),
                ValueKind::Array,
            );
            let rebound = self.gen_assign(obj, pushed)?;
            return Ok(Fragment::new(rebound.text, ValueKind::Array));
        }
        Ok(Fragment::new(
            format!("(call $__arr_unshift {} {})", target.text, value.text),
            ValueKind::Array,
        ))
    }

    fn arr_concat(&mut self, target: Fragment, other: &Node) -> Result<Fragment, CompileError> {
        let other = self.gen(other)?.as_f64();
        let (prelude, l) = self.arr_open(&target);
        let src2 = self.scratch_at("src2", l.n, "f64");
        let len2 = self.scratch_at("len2", l.n, "i32");
        let j = self.scratch_at("j", l.n, "i32");
        let (dst_text, dst, dbase) = self.arr_dst(
            l.n,
            &format!("(i32.add (local.get {}) (local.get {len2}))", l.len),
        );
        let first = format!(
            "(f64.store (i32.add (local.get {dbase}) (i32.shl (local.get {idx}) (i32.const 3))) {})",
            get_elem(&l),
            idx = l.idx
        );
        let second = format!(
            "(f64.store (i32.add (local.get {dbase}) (i32.shl (i32.add (local.get {len}) (local.get {j})) (i32.const 3))) {})",
            get_at(&src2, &format!("(local.get {j})")),
            len = l.len
        );
        let n2 = self.next_id();
        let second_loop = format!(
            "(block $.done{n2}\n(loop $.body{n2}\n(br_if $.done{n2} (i32.ge_s (local.get {j}) (local.get {len2})))\n{second}\n(local.set {j} (i32.add (local.get {j}) (i32.const 1)))\n(br $.body{n2})))"
        );
        let text = format!(
            "(block (result f64)\n{prelude}\n(local.set {src2} {})\n(local.set {len2} (i32.trunc_sat_f64_s (call $__ptr_len (local.get {src2}))))\n{dst_text}\n{}\n(local.set {j} (i32.const 0))\n{second_loop}\n(local.get {dst}))",
            other.text,
            for_loop(l.n, &l.idx, &l.len, &first)
        );
        Ok(Fragment::new(text, ValueKind::Array))
    }

    /// Depth-1 flatten. Nested arrays are recognized by the canonical
    /// pointer test on each element; scalars pass through unchanged. Two
    /// passes: measure, then copy.
    fn arr_flat(&mut self, target: Fragment) -> Result<Fragment, CompileError> {
        let (prelude, l) = self.arr_open(&target);
        let tot = self.scratch_at("tot", l.n, "i32");
        let out = self.scratch_at("out", l.n, "i32");
        let x = self.scratch_at("x", l.n, "f64");
        let j = self.scratch_at("j", l.n, "i32");
        let jl = self.scratch_at("jl", l.n, "i32");
        let (dst_text, dst, dbase) = self.arr_dst(l.n, &format!("(local.get {tot})"));
        let is_nested = format!(
            "(i32.and (call $__is_pointer (local.get {x})) (i32.eq (call $__ptr_type (local.get {x})) (i32.const 1)))"
        );
        let measure = format!(
            "(local.set {x} {})\n(if {is_nested}\n(then (local.set {tot} (i32.add (local.get {tot}) (i32.trunc_sat_f64_s (call $__ptr_len (local.get {x}))))))\n(else (local.set {tot} (i32.add (local.get {tot}) (i32.const 1)))))",
            get_elem(&l)
        );
        let n2 = self.next_id();
        let inner = format!(
            "(local.set {jl} (i32.trunc_sat_f64_s (call $__ptr_len (local.get {x}))))\n(local.set {j} (i32.const 0))\n(block $.done{n2}\n(loop $.body{n2}\n(br_if $.done{n2} (i32.ge_s (local.get {j}) (local.get {jl})))\n(f64.store (i32.add (local.get {dbase}) (i32.shl (local.get {out}) (i32.const 3))) {})\n(local.set {out} (i32.add (local.get {out}) (i32.const 1)))\n(local.set {j} (i32.add (local.get {j}) (i32.const 1)))\n(br $.body{n2})))",
            get_at(&x, &format!("(local.get {j})"))
        );
        let copy = format!(
            "(local.set {x} {})\n(if {is_nested}\n(then\n{inner})\n(else\n(f64.store (i32.add (local.get {dbase}) (i32.shl (local.get {out}) (i32.const 3))) (local.get {x}))\n(local.set {out} (i32.add (local.get {out}) (i32.const 1)))))",
            get_elem(&l)
        );
        let n3 = self.next_id();
        let copy_loop = format!(
            "(block $.done{n3}\n(loop $.body{n3}\n(br_if $.done{n3} (i32.ge_s (local.get {idx}) (local.get {len})))\n{copy}\n(local.set {idx} (i32.add (local.get {idx}) (i32.const 1)))\n(br $.body{n3})))",
            idx = l.idx,
            len = l.len
        );
        let text = format!(
            "(block (result f64)\n{prelude}\n(local.set {tot} (i32.const 0))\n{}\n{dst_text}\n(local.set {out} (i32.const 0))\n(local.set {idx} (i32.const 0))\n{copy_loop}\n(local.get {dst}))",
            for_loop(l.n, &l.idx, &l.len, &measure),
            idx = l.idx
        );
        Ok(Fragment::new(text, ValueKind::Array))
    }

    /// `join` concatenates textual representations through the
    /// number-to-string helper.
    fn arr_join(
        &mut self,
        target: Fragment,
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
                RawValue::sso(",").expect("separator fits SSO").wat_const(),
                ValueKind::String,
            ),
        };
        let (prelude, l) = self.arr_open(&target);
        let sv = self.scratch_at("sep", l.n, "f64");
        let res = self.scratch_at("res", l.n, "f64");
        let step = format!(
            "(if (i32.gt_s (local.get {idx}) (i32.const 0)) (then (local.set {res} (call $__strcat (local.get {res}) (local.get {sv})))))\n(local.set {res} (call $__strcat (local.get {res}) (call $__to_str {})))",
            get_elem(&l),
            idx = l.idx
        );
        let empty = RawValue::sso("").expect("empty string fits SSO").wat_const();
        let text = format!(
            "(block (result f64)\n{prelude}\n(local.set {sv} {})\n(local.set {res} {empty})\n{}\n(local.get {res}))",
            sep.text,
            for_loop(l.n, &l.idx, &l.len, &step)
        );
        Ok(Fragment::new(text, ValueKind::String))
    }

    fn arr_reverse(&mut self, target: Fragment) -> Result<Fragment, CompileError> {
        let (prelude, l) = self.arr_open(&target);
        let j = self.scratch_at("j", l.n, "i32");
        let tmp = self.scratch_at("tmp", l.n, "f64");
        let text = format!(
            "(block (result f64)\n{prelude}\n(local.set {j} (i32.sub (local.get {len}) (i32.const 1)))\n(block $.done{n}\n(loop $.body{n}\n(br_if $.done{n} (i32.ge_s (local.get {idx}) (local.get {j})))\n(local.set {tmp} {geti})\n{seti}\n{setj}\n(local.set {idx} (i32.add (local.get {idx}) (i32.const 1)))\n(local.set {j} (i32.sub (local.get {j}) (i32.const 1)))\n(br $.body{n})))\n(local.get {src}))",
            n = l.n,
            idx = l.idx,
            len = l.len,
            src = l.src,
            geti = get_elem(&l),
            seti = set_at(
                &l.src,
                &format!("(local.get {})", l.idx),
                &get_at(&l.src, &format!("(local.get {j})"))
            ),
            setj = set_at(&l.src, &format!("(local.get {j})"), &format!("(local.get {tmp})"))
        );
        Ok(Fragment::new(text, ValueKind::Array))
    }

    fn arr_to_reversed(&mut self, target: Fragment) -> Result<Fragment, CompileError> {
        let (prelude, l) = self.arr_open(&target);
        let (dst_text, dst, dbase) = self.arr_dst(l.n, &format!("(local.get {})", l.len));
        let step = format!(
            "(f64.store (i32.add (local.get {dbase}) (i32.shl (local.get {idx}) (i32.const 3))) {})",
            get_at(
                &l.src,
                &format!(
                    "(i32.sub (i32.sub (local.get {len}) (i32.const 1)) (local.get {idx}))",
                    len = l.len,
                    idx = l.idx
                )
            ),
            idx = l.idx
        );
        let text = format!(
            "(block (result f64)\n{prelude}\n{dst_text}\n{}\n(local.get {dst}))",
            for_loop(l.n, &l.idx, &l.len, &step)
        );
        Ok(Fragment::new(text, ValueKind::Array))
    }

    /// Insertion sort, in place. Stability follows from the strict
    /// greater-than comparison.
    fn sort_body(&mut self, n: u32, src: &str, len: &str, i: &str) -> String {
        let key = self.scratch_at("key", n, "f64");
        let j = self.scratch_at("j", n, "i32");
        let jp1 = format!("(i32.add (local.get {j}) (i32.const 1))");
        format!(
            "(local.set {i} (i32.const 1))\n(block $.done{n}\n(loop $.body{n}\n(br_if $.done{n} (i32.ge_s (local.get {i}) (local.get {len})))\n(local.set {key} {keyget})\n(local.set {j} (i32.sub (local.get {i}) (i32.const 1)))\n(block $.idone{n}\n(loop $.ibody{n}\n(br_if $.idone{n} (i32.lt_s (local.get {j}) (i32.const 0)))\n(br_if $.idone{n} (i32.eqz (f64.gt {jget} (local.get {key}))))\n{shift}\n(local.set {j} (i32.sub (local.get {j}) (i32.const 1)))\n(br $.ibody{n})))\n{place}\n(local.set {i} (i32.add (local.get {i}) (i32.const 1)))\n(br $.body{n})))",
            keyget = get_at(src, &format!("(local.get {i})")),
            jget = get_at(src, &format!("(local.get {j})")),
            shift = set_at(src, &jp1, &get_at(src, &format!("(local.get {j})"))),
            place = set_at(src, &jp1, &format!("(local.get {key})"))
        )
    }

    fn arr_sort(&mut self, target: Fragment) -> Result<Fragment, CompileError> {
        let (prelude, l) = self.arr_open(&target);
        let body = self.sort_body(l.n, &l.src, &l.len, &l.idx);
        let text = format!(
            "(block (result f64)\n{prelude}\n{body}\n(local.get {}))",
            l.src
        );
        Ok(Fragment::new(text, ValueKind::Array))
    }

    /// `toSorted` copies, then sorts the copy; the input is untouched.
    fn arr_to_sorted(&mut self, target: Fragment) -> Result<Fragment, CompileError> {
        let (prelude, l) = self.arr_open(&target);
        let (dst_text, dst, dbase) = self.arr_dst(l.n, &format!("(local.get {})", l.len));
        let copy = format!(
            "(f64.store (i32.add (local.get {dbase}) (i32.shl (local.get {idx}) (i32.const 3))) {})",
            get_elem(&l),
            idx = l.idx
        );
        let n2 = self.next_id();
        let i2 = self.scratch_at("i", n2, "i32");
        let sort = self.sort_body(n2, &dst, &l.len, &i2);
        let text = format!(
            "(block (result f64)\n{prelude}\n{dst_text}\n{}\n{sort}\n(local.get {dst}))",
            for_loop(l.n, &l.idx, &l.len, &copy)
        );
        Ok(Fragment::new(text, ValueKind::Array))
    }

    fn arr_with(
        &mut self,
        target: Fragment,
        index: &Node,
        value: &Node,
    ) -> Result<Fragment, CompileError> {
        let index = self.gen(index)?.as_i32();
        let value = self.gen(value)?.as_f64();
        let (prelude, l) = self.arr_open(&target);
        let ix = self.scratch_at("ix", l.n, "i32");
        let (dst_text, dst, dbase) = self.arr_dst(l.n, &format!("(local.get {})", l.len));
        let copy = format!(
            "(f64.store (i32.add (local.get {dbase}) (i32.shl (local.get {idx}) (i32.const 3))) {})",
            get_elem(&l),
            idx = l.idx
        );
        let text = format!(
            "(block (result f64)\n{prelude}\n(local.set {ix} {})\n(if (i32.lt_s (local.get {ix}) (i32.const 0)) (then (local.set {ix} (i32.add (local.get {ix}) (local.get {len})))))\n{dst_text}\n{}\n(f64.store (i32.add (local.get {dbase}) (i32.shl (local.get {ix}) (i32.const 3))) {})\n(local.get {dst}))",
            index.text,
            for_loop(l.n, &l.idx, &l.len, &copy),
            value.text,
            len = l.len
        );
        Ok(Fragment::new(text, ValueKind::Array))
    }

    fn arr_fill(&mut self, target: Fragment, args: &[&Node]) -> Result<Fragment, CompileError> {
        let value = self.gen(args[0])?.as_f64();
        let begin = args.get(1).copied().map(|a| self.gen(a)).transpose()?;
        let end = args.get(2).copied().map(|a| self.gen(a)).transpose()?;
        let (prelude, l) = self.arr_open(&target);
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
        let step = set_at(
            &l.src,
            &format!("(local.get {})", l.idx),
            &format!("(local.get {v})"),
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
        Ok(Fragment::new(text, ValueKind::Array))
    }

    /// Copy another array into this one at an offset.
    fn arr_set_from(&mut self, target: Fragment, args: &[&Node]) -> Result<Fragment, CompileError> {
        let other = self.gen(args[0])?.as_f64();
        let offset = args.get(1).copied().map(|a| self.gen(a)).transpose()?;
        let (prelude, l) = self.arr_open(&target);
        let src2 = self.scratch_at("src2", l.n, "f64");
        let len2 = self.scratch_at("len2", l.n, "i32");
        let off = self.scratch_at("off", l.n, "i32");
        let offset = match offset {
            Some(o) => o.as_i32().text,
            None => "(i32.const 0)".to_string(),
        };
        let step = set_at(
            &l.src,
            &format!("(i32.add (local.get {off}) (local.get {idx}))", idx = l.idx),
            &get_at(&src2, &format!("(local.get {})", l.idx)),
        );
        let text = format!(
            "(block (result f64)\n{prelude}\n(local.set {src2} {})\n(local.set {len2} (i32.trunc_sat_f64_s (call $__ptr_len (local.get {src2}))))\n(local.set {off} {offset})\n{}\n(local.get {src}))",
            other.text,
            for_loop(l.n, &l.idx, &len2, &step),
            src = l.src
        );
        Ok(Fragment::new(text, ValueKind::Array))
    }

    /// Overlap-safe block copy within one array: backward when the target
    /// range starts above the source range.
    fn arr_copy_within(
        &mut self,
        target: Fragment,
        args: &[&Node],
    ) -> Result<Fragment, CompileError> {
        let to = self.gen(args[0])?.as_i32();
        let from = self.gen(args[1])?.as_i32();
        let end = args.get(2).copied().map(|a| self.gen(a)).transpose()?;
        let (prelude, l) = self.arr_open(&target);
        let t = self.scratch_at("t", l.n, "i32");
        let s = self.scratch_at("s", l.n, "i32");
        let e = self.scratch_at("e", l.n, "i32");
        let cnt = self.scratch_at("cnt", l.n, "i32");
        let k = self.scratch_at("k", l.n, "i32");
        let end = match end {
            Some(e) => e.as_i32().text,
            None => format!("(local.get {})", l.len),
        };
        let fwd_step = set_at(
            &l.src,
            &format!("(i32.add (local.get {t}) (local.get {k}))"),
            &get_at(&l.src, &format!("(i32.add (local.get {s}) (local.get {k}))")),
        );
        let n2 = self.next_id();
        let forward = format!(
            "(local.set {k} (i32.const 0))\n(block $.done{n2}\n(loop $.body{n2}\n(br_if $.done{n2} (i32.ge_s (local.get {k}) (local.get {cnt})))\n{fwd_step}\n(local.set {k} (i32.add (local.get {k}) (i32.const 1)))\n(br $.body{n2})))"
        );
        let n3 = self.next_id();
        let backward = format!(
            "(local.set {k} (i32.sub (local.get {cnt}) (i32.const 1)))\n(block $.done{n3}\n(loop $.body{n3}\n(br_if $.done{n3} (i32.lt_s (local.get {k}) (i32.const 0)))\n{fwd_step}\n(local.set {k} (i32.sub (local.get {k}) (i32.const 1)))\n(br $.body{n3})))"
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
        Ok(Fragment::new(text, ValueKind::Array))
    }
}

enum FindResult {
    Value,
    Index,
}
