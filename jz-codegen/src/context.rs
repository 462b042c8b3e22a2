//! The mutable compilation context threaded through every lowering.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use jz_types::{RawValue, TypeTag};

use crate::compiler::CompileOptions;
use crate::consts::STATIC_POOL_BASE;
use crate::error::CompileError;
use crate::features::Features;
use crate::fragment::{Schema, ValueKind};

/// The code generator: one instance per compilation, owned by the
/// invocation and threaded by `&mut` through every lowering. No ambient
/// globals.
#[derive(Debug, Default)]
pub struct Generator {
    pub(crate) opts: CompileOptions,
    pub(crate) features: Features,
    /// Monotonic counter behind loop labels and scratch locals.
    counter: u32,
    /// Function frames; the innermost is the one being compiled.
    pub(crate) frames: Vec<Frame>,
    /// Top-level `let` bindings, lowered to module globals.
    pub(crate) globals: BTreeMap<String, GlobalInfo>,
    /// Top-level function declarations by source name.
    pub(crate) functions: BTreeMap<String, FuncInfo>,
    /// Finished function texts, in emission order.
    pub(crate) emitted: Vec<String>,
    /// Function-table entries in declaration order.
    pub(crate) table: Vec<String>,
    /// Closure-call arities that need a function type.
    pub(crate) arities: BTreeSet<u8>,
    /// Interned heap strings.
    strings: HashMap<String, RawValue>,
    /// Static-segment bytes after the fixed prefix.
    pub(crate) static_buf: Vec<u8>,
    /// Requested stdlib functions, before dependency closure.
    pub(crate) stdlib: BTreeSet<&'static str>,
    /// Requested host math imports.
    pub(crate) math_imports: BTreeSet<&'static str>,
    /// Object schemas: id → field names in slot order.
    pub(crate) schemas: Vec<Vec<String>>,
    /// Enclosing loops, for `break`/`continue`.
    pub(crate) loop_stack: Vec<LoopLabels>,
    /// Parameter count of the `main` export, for the signature section.
    pub(crate) main_arity: usize,
}

/// Tracked shape of a module global. Storage is always an f64 slot; the
/// kind and schema are what the initializer was known to produce.
#[derive(Debug, Default, Clone)]
pub(crate) struct GlobalInfo {
    pub kind: ValueKind,
    pub schema: Option<Schema>,
}

/// A registered top-level function.
#[derive(Debug)]
pub(crate) struct FuncInfo {
    pub wat_name: String,
    pub arity: usize,
    pub exported: bool,
    /// Assigned lazily, the first time the function is used as a value.
    pub table_index: Option<u8>,
}

/// Branch targets of one enclosing loop.
#[derive(Debug)]
pub(crate) struct LoopLabels {
    pub done: String,
    pub cont: String,
}

/// One function compilation frame.
#[derive(Debug, Default)]
pub(crate) struct Frame {
    pub name: String,
    /// Source parameter names, in order.
    pub params: Vec<String>,
    /// Locals spilled to the heap environment, in slot order.
    pub hoisted: Vec<String>,
    /// Captures arriving through the environment parameter, in slot order.
    pub captured: Vec<String>,
    /// Whether the function takes the `$.env` i32 first parameter.
    pub has_env: bool,
    /// Declared source locals; later entries shadow earlier ones.
    pub locals: Vec<(String, Local)>,
    /// Generator-owned locals and their WAT types.
    pub scratch: Vec<(String, &'static str)>,
}

/// A source local's WAT name and tracked kind. The slot itself is always
/// f64; kind and schema record what the last assignment was known to hold.
#[derive(Debug, Clone)]
pub(crate) struct Local {
    pub wat: String,
    pub kind: ValueKind,
    pub schema: Option<Schema>,
}

/// How an identifier resolves in the current context.
#[derive(Debug, Clone)]
pub(crate) enum Binding {
    /// A WASM local (parameters included).
    Local(Local),
    /// Slot in the function's own environment record.
    Hoisted(usize),
    /// Slot in the incoming environment record.
    Captured(usize),
    /// A module global and its tracked shape.
    Global(String, GlobalInfo),
    /// A top-level function, by source name.
    Function(String),
}

impl Generator {
    /// A fresh generator for one compilation.
    pub fn new(opts: CompileOptions) -> Self {
        Self {
            opts,
            ..Self::default()
        }
    }

    /// The feature set accumulated so far.
    pub fn features(&self) -> Features {
        self.features
    }

    pub(crate) fn use_features(&mut self, f: Features) {
        self.features |= f;
    }

    /// Next value of the monotonic label counter.
    pub(crate) fn next_id(&mut self) -> u32 {
        self.counter += 1;
        self.counter
    }

    pub(crate) fn frame(&self) -> &Frame {
        self.frames.last().expect("no active compilation frame")
    }

    pub(crate) fn frame_mut(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("no active compilation frame")
    }

    /// Declare (or reuse) a source local in the current frame. All source
    /// locals are f64 slots; kind tracking narrows fragments, not storage.
    pub(crate) fn declare_local(&mut self, name: &str) -> String {
        if let Some((_, local)) = self
            .frame()
            .locals
            .iter()
            .rev()
            .find(|(n, _)| n == name)
        {
            return local.wat.clone();
        }
        if self.frame().params.iter().any(|p| p == name) {
            return format!("${name}");
        }
        let wat = format!("${name}");
        self.frame_mut().locals.push((
            name.to_string(),
            Local {
                wat: wat.clone(),
                kind: ValueKind::F64,
                schema: None,
            },
        ));
        wat
    }

    /// Record what a local now holds. Pointer kinds ride on f64 slots, so
    /// only f64-typed kinds are remembered; i32-class values coerce to f64
    /// at the store and read back as plain numbers.
    pub(crate) fn retrack_local(&mut self, name: &str, kind: ValueKind, schema: Option<Schema>) {
        let (kind, schema) = if kind.is_i32() {
            (ValueKind::F64, None)
        } else {
            (kind, schema)
        };
        let frame = self.frame_mut();
        if let Some(pos) = frame.locals.iter().rposition(|(n, _)| n == name) {
            frame.locals[pos].1.kind = kind;
            frame.locals[pos].1.schema = schema;
        }
    }

    /// Record what a global now holds; same narrowing rule as locals.
    pub(crate) fn retrack_global(&mut self, name: &str, kind: ValueKind, schema: Option<Schema>) {
        let (kind, schema) = if kind.is_i32() {
            (ValueKind::F64, None)
        } else {
            (kind, schema)
        };
        if let Some(info) = self.globals.get_mut(name) {
            info.kind = kind;
            info.schema = schema;
        }
    }

    /// Register a generator-owned local named `$.{base}{id}`. The `.` keeps
    /// scratch names out of the source identifier space.
    pub(crate) fn scratch_at(&mut self, base: &str, id: u32, ty: &'static str) -> String {
        let name = format!("$.{base}{id}");
        self.frame_mut().scratch.push((name.clone(), ty));
        name
    }

    /// Shadow a name with a generator-owned binding (callback parameters).
    pub(crate) fn shadow(&mut self, name: &str, wat: String, kind: ValueKind) {
        self.frame_mut().locals.push((
            name.to_string(),
            Local {
                wat,
                kind,
                schema: None,
            },
        ));
    }

    /// Remove the most recent shadow of `name`.
    pub(crate) fn unshadow(&mut self, name: &str) {
        let frame = self.frame_mut();
        if let Some(pos) = frame.locals.iter().rposition(|(n, _)| n == name) {
            frame.locals.remove(pos);
        }
    }

    /// Resolve an identifier. Shadowing locals win, then environment slots,
    /// then parameters, then globals and top-level functions.
    pub(crate) fn lookup(&self, name: &str) -> Option<Binding> {
        if let Some(frame) = self.frames.last() {
            if let Some((_, local)) =
                frame.locals.iter().rev().find(|(n, _)| n == name)
            {
                return Some(Binding::Local(local.clone()));
            }
            if let Some(slot) = frame.hoisted.iter().position(|h| h == name) {
                return Some(Binding::Hoisted(slot));
            }
            if let Some(slot) = frame.captured.iter().position(|c| c == name) {
                return Some(Binding::Captured(slot));
            }
            if frame.params.iter().any(|p| p == name) {
                return Some(Binding::Local(Local {
                    wat: format!("${name}"),
                    kind: ValueKind::F64,
                    schema: None,
                }));
            }
        }
        if let Some(info) = self.globals.get(name) {
            return Some(Binding::Global(format!("${name}"), info.clone()));
        }
        if self.functions.contains_key(name) {
            return Some(Binding::Function(name.to_string()));
        }
        None
    }

    /// Intern a heap string into the static segment, returning its boxed
    /// pointer. Identical literals share one copy.
    pub(crate) fn intern_string(&mut self, s: &str) -> RawValue {
        if let Some(v) = self.strings.get(s) {
            return *v;
        }
        self.align_static(8);
        let units: Vec<u16> = s.encode_utf16().collect();
        let header = STATIC_POOL_BASE + self.static_buf.len() as u32;
        self.static_buf
            .extend_from_slice(&(units.len() as i32).to_le_bytes());
        self.static_buf.extend_from_slice(&[0; 4]);
        for unit in &units {
            self.static_buf.extend_from_slice(&unit.to_le_bytes());
        }
        let ptr = RawValue::pointer(TypeTag::String, 0, header + 8);
        self.strings.insert(s.to_string(), ptr);
        ptr
    }

    /// Place a constant array in the static segment: f64 length header,
    /// then the elements.
    pub(crate) fn static_array(&mut self, values: &[f64]) -> RawValue {
        self.align_static(8);
        let header = STATIC_POOL_BASE + self.static_buf.len() as u32;
        self.static_buf
            .extend_from_slice(&(values.len() as f64).to_le_bytes());
        for v in values {
            self.static_buf.extend_from_slice(&v.to_le_bytes());
        }
        RawValue::pointer(TypeTag::Array, 0, header + 8)
    }

    /// Place a constant object in the static segment: headerless field
    /// slots; the schema id rides in the pointer's aux.
    pub(crate) fn static_object(&mut self, schema: u16, values: &[f64]) -> RawValue {
        self.align_static(8);
        let base = STATIC_POOL_BASE + self.static_buf.len() as u32;
        for v in values {
            self.static_buf.extend_from_slice(&v.to_le_bytes());
        }
        RawValue::pointer(TypeTag::Object, schema, base)
    }

    fn align_static(&mut self, align: usize) {
        while (STATIC_POOL_BASE as usize + self.static_buf.len()) % align != 0 {
            self.static_buf.push(0);
        }
    }

    /// First byte past the static segment, 16-aligned; the heap starts here.
    pub(crate) fn static_end(&self) -> u32 {
        let end = STATIC_POOL_BASE + self.static_buf.len() as u32;
        end.next_multiple_of(16)
    }

    /// Register an object schema, sharing ids between identical layouts.
    pub(crate) fn add_schema(&mut self, fields: Vec<String>) -> u16 {
        if let Some(id) = self.schemas.iter().position(|s| *s == fields) {
            return id as u16;
        }
        self.schemas.push(fields);
        (self.schemas.len() - 1) as u16
    }

    /// Record a stdlib function as required; dependencies close over the
    /// static table at assembly time.
    pub(crate) fn request_stdlib(&mut self, name: &'static str) {
        self.stdlib.insert(name);
    }

    /// Record a host math import as required.
    pub(crate) fn request_math(&mut self, name: &'static str) {
        self.math_imports.insert(name);
    }

    /// Append a function-table entry, in declaration order.
    pub(crate) fn table_entry(&mut self, wat_name: String) -> Result<u8, CompileError> {
        if self.table.len() >= 256 {
            return Err(CompileError::TooManyClosures);
        }
        self.table.push(wat_name);
        self.use_features(Features::FUNC_TABLE);
        Ok((self.table.len() - 1) as u8)
    }

    /// The table index of a top-level function used as a value, assigning
    /// one on first use.
    pub(crate) fn function_table_index(&mut self, name: &str) -> Result<u8, CompileError> {
        let wat = match self.functions.get(name) {
            Some(info) => {
                if let Some(t) = info.table_index {
                    return Ok(t);
                }
                info.wat_name.clone()
            }
            None => return Err(CompileError::UnknownIdentifier(name.to_string())),
        };
        let t = self.table_entry(wat)?;
        if let Some(info) = self.functions.get_mut(name) {
            info.table_index = Some(t);
        }
        Ok(t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jz_types::STRING_HEADER;

    fn generator_with_frame() -> Generator {
        let mut g = Generator::new(CompileOptions::default());
        g.frames.push(Frame {
            name: "$main".into(),
            params: vec!["p".into()],
            hoisted: vec!["h".into()],
            captured: vec!["c".into()],
            has_env: true,
            ..Frame::default()
        });
        g
    }

    #[test]
    fn lookup_precedence() {
        let mut g = generator_with_frame();
        assert!(matches!(g.lookup("h"), Some(Binding::Hoisted(0))));
        assert!(matches!(g.lookup("c"), Some(Binding::Captured(0))));
        assert!(matches!(g.lookup("p"), Some(Binding::Local(_))));
        assert!(g.lookup("missing").is_none());

        // A shadow out-ranks the environment slot.
        g.shadow("h", "$.x1".into(), ValueKind::F64);
        let Some(Binding::Local(local)) = g.lookup("h") else {
            panic!("shadow did not win");
        };
        assert_eq!(local.wat, "$.x1");
        g.unshadow("h");
        assert!(matches!(g.lookup("h"), Some(Binding::Hoisted(0))));
    }

    #[test]
    fn interning_dedupes() {
        let mut g = Generator::new(CompileOptions::default());
        let a = g.intern_string("hello!!");
        let b = g.intern_string("hello!!");
        assert_eq!(a, b);
        // Header precedes the character data.
        assert_eq!(a.offset(), STATIC_POOL_BASE + STRING_HEADER);
    }

    #[test]
    fn static_arrays_have_length_headers() {
        let mut g = Generator::new(CompileOptions::default());
        let a = g.static_array(&[1.0, 2.0, 3.0]);
        // First 8 bytes of the pool are the f64 length.
        assert_eq!(f64::from_le_bytes(g.static_buf[0..8].try_into().expect("len")), 3.0);
        assert_eq!(a.offset(), STATIC_POOL_BASE + 8);
    }

    #[test]
    fn table_is_bounded() {
        let mut g = Generator::new(CompileOptions::default());
        for i in 0..256 {
            g.table_entry(format!("$.lambda{i}")).expect("entry");
        }
        assert!(matches!(
            g.table_entry("$.overflow".into()),
            Err(CompileError::TooManyClosures)
        ));
    }

    #[test]
    fn schema_ids_are_shared() {
        let mut g = Generator::new(CompileOptions::default());
        let a = g.add_schema(vec!["x".into(), "y".into()]);
        let b = g.add_schema(vec!["x".into(), "y".into()]);
        let c = g.add_schema(vec!["y".into(), "x".into()]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
