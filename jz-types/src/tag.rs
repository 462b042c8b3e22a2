use core::fmt;

/// Heap object type tag carried in bits 48..51 of a NaN-boxed pointer.
///
/// The tag is three bits wide; the unused eighth pattern decodes to `Atom`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[repr(u8)]
pub enum TypeTag {
    /// Interned symbol or other payload-only value; `offset` is the id.
    Atom = 0,
    /// Regular array of f64 slots with an f64 length header.
    Array = 1,
    /// Typed-array view; `offset` points at the `[len, data]` header.
    Typed = 2,
    /// String, either heap-backed or short-string-optimized.
    String = 3,
    /// Fixed-shape object; `aux` carries the schema id.
    Object = 4,
    /// Closure; `aux` packs the table index and environment length.
    Closure = 5,
    /// Compiled regular expression.
    Regex = 6,
}

impl TypeTag {
    /// Decode a tag from its three-bit encoding.
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0b111 {
            1 => TypeTag::Array,
            2 => TypeTag::Typed,
            3 => TypeTag::String,
            4 => TypeTag::Object,
            5 => TypeTag::Closure,
            6 => TypeTag::Regex,
            _ => TypeTag::Atom,
        }
    }

    /// The three-bit encoding of the tag.
    pub const fn bits(self) -> u8 {
        self as u8
    }
}

impl From<u8> for TypeTag {
    fn from(bits: u8) -> Self {
        Self::from_bits(bits)
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TypeTag::Atom => "atom",
            TypeTag::Array => "array",
            TypeTag::Typed => "typed",
            TypeTag::String => "string",
            TypeTag::Object => "object",
            TypeTag::Closure => "closure",
            TypeTag::Regex => "regex",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn tag_bits_roundtrip() {
        for tag in TypeTag::iter() {
            assert_eq!(TypeTag::from_bits(tag.bits()), tag);
        }
    }

    #[test]
    fn unused_pattern_decodes_to_atom() {
        assert_eq!(TypeTag::from_bits(7), TypeTag::Atom);
    }
}
