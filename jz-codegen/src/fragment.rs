//! Typed WAT fragments, the unit of composition inside the generator.

use core::fmt;
use jz_types::ElementType;

/// The value kind a fragment leaves on the operand stack.
///
/// Advisory for the generator only: at the WASM level everything is `f64`
/// or `i32`, and the runtime carries no type information beyond the NaN
/// payload tag. The kind steers which loads, stores, conversions, and
/// method tables a subsequent lowering picks.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// An f64 number (or any boxed value of statically unknown kind).
    #[default]
    F64,
    /// A small integer held as i32.
    I32,
    /// A 0/1 i32 produced by a comparison or logic op.
    Bool,
    /// A regular array pointer.
    Array,
    /// A string pointer, heap or SSO.
    String,
    /// A typed-array view pointer.
    TypedArray,
    /// A closure pointer.
    Closure,
    /// A fixed-shape object pointer.
    Object,
}

impl ValueKind {
    /// The WAT value type this kind occupies on the stack.
    pub const fn wat_ty(self) -> &'static str {
        match self {
            ValueKind::I32 | ValueKind::Bool => "i32",
            _ => "f64",
        }
    }

    /// Whether the kind lives on the stack as i32.
    pub const fn is_i32(self) -> bool {
        matches!(self, ValueKind::I32 | ValueKind::Bool)
    }

    /// Whether the kind is known to be a heap pointer.
    pub const fn is_pointer(self) -> bool {
        matches!(
            self,
            ValueKind::Array
                | ValueKind::String
                | ValueKind::TypedArray
                | ValueKind::Closure
                | ValueKind::Object
        )
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::F64 => "f64",
            ValueKind::I32 => "i32",
            ValueKind::Bool => "bool",
            ValueKind::Array => "array",
            ValueKind::String => "string",
            ValueKind::TypedArray => "typedarray",
            ValueKind::Closure => "closure",
            ValueKind::Object => "object",
        };
        f.write_str(name)
    }
}

/// Shape information a kind alone cannot carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schema {
    /// Element type of a typed-array view.
    Elem(ElementType),
    /// Remaining application count of a curried closure.
    Arity(u8),
    /// Schema id of a fixed-shape object.
    Object(u16),
}

/// A syntactically complete folded WAT expression that pushes exactly one
/// value, plus what the generator knows about that value.
#[derive(Debug, Clone)]
pub struct Fragment {
    /// The folded WAT text.
    pub text: String,
    /// The value kind on the stack.
    pub kind: ValueKind,
    /// Optional shape information.
    pub schema: Option<Schema>,
}

impl Fragment {
    /// A fragment of the given kind.
    pub fn new(text: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            text: text.into(),
            kind,
            schema: None,
        }
    }

    /// Attach a schema.
    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    /// The fragment promoted to f64 on the stack.
    pub fn as_f64(self) -> Fragment {
        if self.kind.is_i32() {
            Fragment::new(format!("(f64.convert_i32_s {})", self.text), ValueKind::F64)
        } else {
            self
        }
    }

    /// The fragment demoted to i32 on the stack (saturating truncation, so
    /// NaN demotes to zero rather than trapping).
    pub fn as_i32(self) -> Fragment {
        if self.kind.is_i32() {
            self
        } else {
            Fragment::new(
                format!("(i32.trunc_sat_f64_s {})", self.text),
                ValueKind::I32,
            )
        }
    }

    /// The fragment as an i32 truth value. Truthiness is "is not zero";
    /// conditional lowerings all share this definition.
    pub fn as_bool(self) -> Fragment {
        if self.kind.is_i32() {
            Fragment {
                kind: ValueKind::Bool,
                ..self
            }
        } else {
            Fragment::new(
                format!("(f64.ne {} (f64.const 0))", self.text),
                ValueKind::Bool,
            )
        }
    }

    /// Element type, when this is a typed-array fragment with a schema.
    pub fn elem(&self) -> Option<ElementType> {
        match self.schema {
            Some(Schema::Elem(e)) => Some(e),
            _ => None,
        }
    }

    /// Remaining arity, when this is a curried-closure fragment.
    pub fn arity(&self) -> Option<u8> {
        match self.schema {
            Some(Schema::Arity(n)) => Some(n),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn i32_promotes_once() {
        let f = Fragment::new("(i32.const 3)", ValueKind::I32).as_f64();
        assert_eq!(f.text, "(f64.convert_i32_s (i32.const 3))");
        assert_eq!(f.kind, ValueKind::F64);
        // Already f64: unchanged.
        let g = f.clone().as_f64();
        assert_eq!(g.text, f.text);
    }

    #[test]
    fn bool_of_f64_tests_nonzero() {
        let f = Fragment::new("(local.get $x)", ValueKind::F64).as_bool();
        assert_eq!(f.text, "(f64.ne (local.get $x) (f64.const 0))");
        assert_eq!(f.kind, ValueKind::Bool);
    }

    #[test]
    fn bool_of_i32_is_identity_text() {
        let f = Fragment::new("(i32.const 1)", ValueKind::I32).as_bool();
        assert_eq!(f.text, "(i32.const 1)");
        assert_eq!(f.kind, ValueKind::Bool);
    }
}
