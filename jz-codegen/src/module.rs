//! Module assembly: the complete textual module, in section order.

use itertools::Itertools;

use crate::consts::{PAGES_HEAP, PAGES_PLAIN, PAGES_TYPED, STATIC_POOL_BASE};
use crate::context::Generator;
use crate::error::CompileError;
use crate::features::Features;
use crate::runtime;
use crate::sig::{escape_wat_bytes, ExportSig, SigSection};
use crate::stdlib;
use jz_types::{STATIC_BASE, TYPED_ARENA_GAP};

/// The fixed static-segment prefix: "NaN", "Infinity", "-Infinity" at the
/// offsets the number-to-string helper hardcodes.
fn special_strings_bytes() -> Vec<u8> {
    let mut bytes = Vec::new();
    for (text, base) in [("NaN", 16u32), ("Infinity", 32), ("-Infinity", 56)] {
        while bytes.len() < (base - STATIC_BASE) as usize {
            bytes.push(0);
        }
        bytes.extend((text.len() as i32).to_le_bytes());
        bytes.extend([0u8; 4]);
        for unit in text.encode_utf16() {
            bytes.extend(unit.to_le_bytes());
        }
    }
    bytes
}

impl Generator {
    /// Assemble the final module text around the compiled main function.
    pub(crate) fn finish(&mut self, main_text: String) -> Result<String, CompileError> {
        let features = self.features;
        let linked = stdlib::closure(&self.stdlib);
        let needs_specials = linked.iter().any(|s| s.name == "__num_to_str");
        let heap_start = self.static_end();
        tracing::debug!(
            ?features,
            functions = self.emitted.len(),
            table = self.table.len(),
            stdlib = linked.len(),
            heap_start,
            "assembling module"
        );

        let mut m = String::from("(module\n");

        // 1. Function types for the closure calling convention, and the
        //    error tag.
        for arity in &self.arities {
            let params = (0..*arity).map(|_| " f64").join("");
            m.push_str(&format!(
                "(type $.fn{arity} (func (param i32{params}) (result f64)))\n"
            ));
        }
        if features.contains(Features::EXCEPTIONS) {
            m.push_str("(tag $.err (param f64))\n");
        }

        // Host math imports, the used subset only.
        for name in &self.math_imports {
            let params = (0..stdlib::math_arity(name)).map(|_| "(param f64)").join(" ");
            let sep = if params.is_empty() { "" } else { " " };
            m.push_str(&format!(
                "(import \"math\" \"{name}\" (func $m_{name}{sep}{params} (result f64)))\n"
            ));
        }

        // 2. Function table with closure entries in declaration order.
        if features.contains(Features::FUNC_TABLE) && !self.table.is_empty() {
            m.push_str(&format!(
                "(table {} funcref)\n(elem (i32.const 0) {})\n",
                self.table.len(),
                self.table.iter().join(" ")
            ));
        }

        // 3. Memory from the step table, and the heap globals.
        let pages = self.opts.memory_pages.unwrap_or(
            if features.contains(Features::TYPED_ARRAYS) {
                PAGES_TYPED
            } else if features.touches_memory() {
                PAGES_HEAP
            } else {
                PAGES_PLAIN
            },
        );
        m.push_str(&format!("(memory (export \"memory\") {pages})\n"));
        m.push_str(&format!(
            "(global $__heap (mut i32) (i32.const {heap_start}))\n(global $__heap_start i32 (i32.const {heap_start}))\n"
        ));
        if features.contains(Features::TYPED_ARRAYS) {
            m.push_str("(global $__typed (mut i32) (i32.const 0))\n");
        }
        if features.contains(Features::SYMBOLS) {
            m.push_str("(global $__symbols (mut i32) (i32.const 1))\n");
        }

        // 4. Data segments: special numeric strings, then the pool of
        //    interned strings and static arrays/objects.
        if needs_specials {
            m.push_str(&format!(
                "(data (i32.const {STATIC_BASE}) \"{}\")\n",
                escape_wat_bytes(&special_strings_bytes())
            ));
        }
        if !self.static_buf.is_empty() {
            m.push_str(&format!(
                "(data (i32.const {STATIC_POOL_BASE}) \"{}\")\n",
                escape_wat_bytes(&self.static_buf)
            ));
        }

        // 5. Runtime helper blocks and the arena start function.
        m.push_str(&runtime::helpers(features));
        if features.contains(Features::TYPED_ARRAYS) {
            m.push_str(&format!(
                "(func $.init (global.set $__typed (i32.add (global.get $__heap_start) (i32.const {TYPED_ARENA_GAP}))))\n(start $.init)\n"
            ));
        }
        if features.touches_memory() {
            m.push_str("(export \"_alloc\" (func $__alloc))\n");
            m.push_str(
                "(func $_resetHeap (export \"_resetHeap\") (global.set $__heap (global.get $__heap_start)))\n",
            );
        }
        if features.contains(Features::TYPED_ARRAYS) {
            m.push_str(
                "(func $_resetTypedArrays (export \"_resetTypedArrays\") (call $__reset_typed_arrays))\n",
            );
        }

        // 6. The stdlib dependency closure, each function once.
        for entry in &linked {
            m.push_str(entry.wat);
        }

        // 7. User globals, user functions, synthesized closures.
        for name in self.globals.keys() {
            m.push_str(&format!("(global ${name} (mut f64) (f64.const 0))\n"));
        }
        for func in &self.emitted {
            m.push_str(func);
            m.push('\n');
        }

        // 8. The main function (or the wrapper around a user-defined one).
        m.push_str(&main_text);
        m.push('\n');

        // Export wrappers for user functions; the env parameter stays an
        // internal detail.
        for (name, info) in &self.functions {
            if !info.exported || name == "main" {
                continue;
            }
            let params = (0..info.arity).map(|i| format!("(param $a{i} f64)")).join(" ");
            let args = (0..info.arity).map(|i| format!(" (local.get $a{i})")).join("");
            let sep = if params.is_empty() { "" } else { " " };
            m.push_str(&format!(
                "(func $.exp_{name} (export \"{name}\"){sep}{params} (result f64) (call ${name} (i32.const 0){args}))\n"
            ));
        }

        // 9. The signature descriptor custom section.
        let mut sig = SigSection::default();
        sig.exports
            .insert("main".into(), ExportSig::f64s(self.main_arity));
        for (name, info) in &self.functions {
            if info.exported && name != "main" {
                sig.exports.insert(name.clone(), ExportSig::f64s(info.arity));
            }
        }
        for (id, fields) in self.schemas.iter().enumerate() {
            sig.add_schema(id as u16, fields);
        }
        m.push_str(&sig.render());
        m.push_str("\n)\n");
        Ok(m)
    }
}
