use core::fmt;

/// Element type of a typed-array view, carried in the top three bits of the
/// pointer's `aux` field.
///
/// The discriminants are the runtime encoding; the accessors answer the
/// questions the code generator asks while lowering typed-array operations:
/// how wide an element is, which WAT load/store mnemonics move it, and how it
/// converts to and from the uniform f64 value representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[repr(u8)]
pub enum ElementType {
    /// Signed 8-bit integer.
    I8 = 0,
    /// Unsigned 8-bit integer.
    U8 = 1,
    /// Signed 16-bit integer.
    I16 = 2,
    /// Unsigned 16-bit integer.
    U16 = 3,
    /// Signed 32-bit integer.
    I32 = 4,
    /// Unsigned 32-bit integer.
    U32 = 5,
    /// 32-bit float.
    F32 = 6,
    /// 64-bit float.
    F64 = 7,
}

impl ElementType {
    /// Decode an element type from its three-bit encoding.
    pub const fn from_code(code: u8) -> Self {
        match code & 0b111 {
            0 => ElementType::I8,
            1 => ElementType::U8,
            2 => ElementType::I16,
            3 => ElementType::U16,
            4 => ElementType::I32,
            5 => ElementType::U32,
            6 => ElementType::F32,
            _ => ElementType::F64,
        }
    }

    /// The three-bit runtime encoding.
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// The constructor name the source language uses (`new F64(…)`).
    pub fn from_ctor(name: &str) -> Option<Self> {
        Some(match name {
            "I8" => ElementType::I8,
            "U8" => ElementType::U8,
            "I16" => ElementType::I16,
            "U16" => ElementType::U16,
            "I32" => ElementType::I32,
            "U32" => ElementType::U32,
            "F32" => ElementType::F32,
            "F64" => ElementType::F64,
            _ => return None,
        })
    }

    /// log2 of the element width in bytes; the shift used for indexing.
    pub const fn shift(self) -> u32 {
        match self {
            ElementType::I8 | ElementType::U8 => 0,
            ElementType::I16 | ElementType::U16 => 1,
            ElementType::I32 | ElementType::U32 | ElementType::F32 => 2,
            ElementType::F64 => 3,
        }
    }

    /// Element width in bytes.
    pub const fn size(self) -> u32 {
        1 << self.shift()
    }

    /// Whether the element is a float type.
    pub const fn is_float(self) -> bool {
        matches!(self, ElementType::F32 | ElementType::F64)
    }

    /// Whether the element is a signed integer type.
    pub const fn is_signed(self) -> bool {
        matches!(self, ElementType::I8 | ElementType::I16 | ElementType::I32)
    }

    /// The WAT value type elements of this kind occupy on the operand stack.
    pub const fn wat_ty(self) -> &'static str {
        match self {
            ElementType::F32 => "f32",
            ElementType::F64 => "f64",
            _ => "i32",
        }
    }

    /// The WAT load mnemonic for one element.
    pub const fn load_op(self) -> &'static str {
        match self {
            ElementType::I8 => "i32.load8_s",
            ElementType::U8 => "i32.load8_u",
            ElementType::I16 => "i32.load16_s",
            ElementType::U16 => "i32.load16_u",
            ElementType::I32 | ElementType::U32 => "i32.load",
            ElementType::F32 => "f32.load",
            ElementType::F64 => "f64.load",
        }
    }

    /// The WAT store mnemonic for one element.
    pub const fn store_op(self) -> &'static str {
        match self {
            ElementType::I8 | ElementType::U8 => "i32.store8",
            ElementType::I16 | ElementType::U16 => "i32.store16",
            ElementType::I32 | ElementType::U32 => "i32.store",
            ElementType::F32 => "f32.store",
            ElementType::F64 => "f64.store",
        }
    }

    /// Conversion from the loaded stack value to f64, or `None` for f64.
    pub const fn to_f64_op(self) -> Option<&'static str> {
        match self {
            ElementType::U32 => Some("f64.convert_i32_u"),
            ElementType::F32 => Some("f64.promote_f32"),
            ElementType::F64 => None,
            _ => Some("f64.convert_i32_s"),
        }
    }

    /// Conversion from f64 to the stack value a store expects, or `None`.
    pub const fn from_f64_op(self) -> Option<&'static str> {
        match self {
            ElementType::U32 => Some("i32.trunc_sat_f64_u"),
            ElementType::F32 => Some("f32.demote_f64"),
            ElementType::F64 => None,
            _ => Some("i32.trunc_sat_f64_s"),
        }
    }

    /// The strict-greater-than comparator used by the sort lowerings.
    pub const fn gt_op(self) -> &'static str {
        match self {
            ElementType::F64 => "f64.gt",
            ElementType::F32 => "f32.gt",
            ElementType::U8 | ElementType::U16 | ElementType::U32 => "i32.gt_u",
            _ => "i32.gt_s",
        }
    }

    /// The SIMD lane shape for the vectorized `map` lowering, when one
    /// exists for this element type.
    pub const fn vector_shape(self) -> Option<&'static str> {
        match self {
            ElementType::F64 => Some("f64x2"),
            ElementType::F32 => Some("f32x4"),
            ElementType::I32 | ElementType::U32 => Some("i32x4"),
            _ => None,
        }
    }

    /// Lanes per vector for the shape returned by [`Self::vector_shape`].
    pub const fn lanes(self) -> Option<u32> {
        match self {
            ElementType::F64 => Some(2),
            ElementType::F32 => Some(4),
            ElementType::I32 | ElementType::U32 => Some(4),
            _ => None,
        }
    }
}

impl From<u8> for ElementType {
    fn from(code: u8) -> Self {
        Self::from_code(code)
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElementType::I8 => "I8",
            ElementType::U8 => "U8",
            ElementType::I16 => "I16",
            ElementType::U16 => "U16",
            ElementType::I32 => "I32",
            ElementType::U32 => "U32",
            ElementType::F32 => "F32",
            ElementType::F64 => "F64",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use strum::IntoEnumIterator;

    #[test]
    fn code_roundtrip() {
        for ty in ElementType::iter() {
            assert_eq!(ElementType::from_code(ty.code()), ty);
            assert_eq!(ElementType::from_ctor(&ty.to_string()), Some(ty));
        }
    }

    #[rstest]
    #[case(ElementType::I8, 1, "i32.load8_s")]
    #[case(ElementType::U16, 2, "i32.load16_u")]
    #[case(ElementType::U32, 4, "i32.load")]
    #[case(ElementType::F32, 4, "f32.load")]
    #[case(ElementType::F64, 8, "f64.load")]
    fn widths_and_loads(
        #[case] ty: ElementType,
        #[case] size: u32,
        #[case] load: &str,
    ) {
        assert_eq!(ty.size(), size);
        assert_eq!(ty.load_op(), load);
    }

    #[test]
    fn only_wide_types_vectorize() {
        for ty in ElementType::iter() {
            let wide = matches!(
                ty,
                ElementType::F64 | ElementType::F32 | ElementType::I32 | ElementType::U32
            );
            assert_eq!(ty.vector_shape().is_some(), wide);
        }
    }
}
