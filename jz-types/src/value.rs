//! The NaN-boxed 64-bit value representation.
//!
//! Every runtime value is an f64. Finite values and the canonical NaN are
//! ordinary numbers; heap references are quiet NaNs with a nonzero payload:
//!
//! ```text
//! bit 63       sign        (never set by pointers)
//! bits 52..63  exponent    (all ones)
//! bit 51       quiet bit   (set)
//! bits 48..51  type tag    (TypeTag, 3 bits)
//! bits 32..48  aux         (per-type metadata, 16 bits)
//! bits  0..32  offset      (byte index into linear memory)
//! ```
//!
//! Short-string-optimized strings reinterpret the aux/offset region as
//! `[sso:1 | len:3 | c0:7 | c1:7 | c2:7 | c3:7 | c4:7 | c5:7]` from bit 47
//! down; bit 47 doubles as the ring flag on array pointers.

use crate::element::ElementType;
use crate::tag::TypeTag;

/// A runtime value as its raw 64-bit pattern.
///
/// Packing and unpacking is pure bit arithmetic; the struct exists so that
/// the code generator and the tests agree on the encoding without sharing
/// magic numbers.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct RawValue(u64);

/// Quiet-NaN bits: exponent all ones plus the quiet bit.
const QUIET_NAN: u64 = 0x7FF8_0000_0000_0000;

/// Everything below the quiet bit.
const PAYLOAD_MASK: u64 = 0x0007_FFFF_FFFF_FFFF;

/// The full mantissa, quiet bit included; what a WAT `nan:0x…` literal sets.
const MANTISSA_MASK: u64 = 0x000F_FFFF_FFFF_FFFF;

const TYPE_SHIFT: u32 = 48;
const AUX_SHIFT: u32 = 32;

/// Bit 47: ring flag on arrays, SSO flag on strings.
const FLAG_BIT: u64 = 1 << 47;

const SSO_LEN_SHIFT: u32 = 44;

const fn u64_from_tag(tag: TypeTag) -> u64 {
    (tag.bits() as u64) << TYPE_SHIFT
}

const fn u64_from_aux(aux: u16) -> u64 {
    (aux as u64) << AUX_SHIFT
}

const fn sso_char_shift(i: u32) -> u32 {
    37 - 7 * i
}

impl RawValue {
    /// The canonical NaN: quiet bits set, payload zero. A number, never a
    /// pointer.
    pub const CANONICAL_NAN: RawValue = RawValue(QUIET_NAN);

    /// Reconstruct from a raw bit pattern.
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// The raw bit pattern.
    pub const fn to_bits(self) -> u64 {
        self.0
    }

    /// View an f64 as a raw value.
    pub fn from_f64(v: f64) -> Self {
        Self(v.to_bits())
    }

    /// The f64 this bit pattern denotes.
    pub fn to_f64(self) -> f64 {
        f64::from_bits(self.0)
    }

    /// Box a pointer from its three fields.
    pub const fn pointer(tag: TypeTag, aux: u16, offset: u32) -> Self {
        Self(QUIET_NAN | u64_from_tag(tag) | u64_from_aux(aux) | offset as u64)
    }

    /// A value is a pointer iff its quiet-NaN bits are set and its payload
    /// is nonzero. The canonical NaN fails the second test.
    pub const fn is_pointer(self) -> bool {
        self.0 & QUIET_NAN == QUIET_NAN && self.0 & PAYLOAD_MASK != 0
    }

    /// Payload bits below the quiet bit.
    pub const fn payload(self) -> u64 {
        self.0 & PAYLOAD_MASK
    }

    /// The type tag field. Meaningful only when [`Self::is_pointer`].
    pub const fn tag(self) -> TypeTag {
        TypeTag::from_bits((self.0 >> TYPE_SHIFT) as u8)
    }

    /// The 16-bit aux field.
    pub const fn aux(self) -> u16 {
        (self.0 >> AUX_SHIFT) as u16
    }

    /// The 32-bit byte offset into linear memory.
    pub const fn offset(self) -> u32 {
        self.0 as u32
    }

    /// The same pointer with a replacement aux field.
    pub const fn with_aux(self, aux: u16) -> Self {
        Self(self.0 & !(0xFFFF << AUX_SHIFT) | u64_from_aux(aux))
    }

    /// Whether bit 47 is set: ring form for arrays, SSO form for strings.
    pub const fn has_flag(self) -> bool {
        self.0 & FLAG_BIT != 0
    }

    /// The same pointer with bit 47 set.
    pub const fn with_flag(self) -> Self {
        Self(self.0 | FLAG_BIT)
    }

    /// The WAT literal that reproduces this exact bit pattern: a `nan:0x…`
    /// f64 constant carrying the full mantissa.
    pub fn wat_const(self) -> String {
        format!("(f64.const nan:0x{:x})", self.0 & MANTISSA_MASK)
    }

    // -- strings ----------------------------------------------------------

    /// Pack a short string into the payload, if it fits: at most six code
    /// points, all at most 0x7F.
    pub fn sso(s: &str) -> Option<Self> {
        let mut packed = QUIET_NAN | u64_from_tag(TypeTag::String) | FLAG_BIT;
        let mut len = 0u64;
        for (i, c) in s.chars().enumerate() {
            if i >= 6 || c as u32 > 0x7F {
                return None;
            }
            packed |= (c as u64) << sso_char_shift(i as u32);
            len += 1;
        }
        Some(Self(packed | len << SSO_LEN_SHIFT))
    }

    /// Whether this is an SSO string pointer.
    pub const fn is_sso(self) -> bool {
        self.is_pointer()
            && matches!(self.tag(), TypeTag::String)
            && self.has_flag()
    }

    /// Code-point count of an SSO string.
    pub const fn sso_len(self) -> u32 {
        (self.0 >> SSO_LEN_SHIFT) as u32 & 0b111
    }

    /// Code point `i` of an SSO string.
    pub const fn sso_char(self, i: u32) -> u32 {
        (self.0 >> sso_char_shift(i)) as u32 & 0x7F
    }

    /// Decode an SSO string back to text.
    pub fn sso_decode(self) -> String {
        (0..self.sso_len())
            .filter_map(|i| char::from_u32(self.sso_char(i)))
            .collect()
    }

    // -- closures ---------------------------------------------------------

    /// Box a closure: function-table index and environment length in aux,
    /// environment byte offset in offset.
    pub const fn closure(table: u8, env_len: u8, env_offset: u32) -> Self {
        Self::pointer(
            TypeTag::Closure,
            (table as u16) << 8 | env_len as u16,
            env_offset,
        )
    }

    /// Function-table index of a closure.
    pub const fn closure_index(self) -> u8 {
        (self.aux() >> 8) as u8
    }

    /// Captured-variable count of a closure.
    pub const fn closure_env_len(self) -> u8 {
        self.aux() as u8
    }

    // -- typed arrays -----------------------------------------------------

    /// Box a typed-array view: element type in the top three aux bits,
    /// view-header byte offset in offset.
    pub const fn typed_view(elem: ElementType, header_offset: u32) -> Self {
        Self::pointer(TypeTag::Typed, (elem.code() as u16) << 13, header_offset)
    }

    /// Element type of a typed-array view.
    pub const fn element_type(self) -> ElementType {
        ElementType::from_code((self.aux() >> 13) as u8)
    }

    // -- symbols ----------------------------------------------------------

    /// Box a symbol. Ids are allocated from 1 upward; id 0 would collapse
    /// the whole payload to zero and decode as the canonical NaN.
    pub fn symbol(id: u32) -> Self {
        debug_assert!(id != 0, "symbol ids start at 1");
        Self::pointer(TypeTag::Atom, 0, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn canonical_nan_is_a_number() {
        assert!(!RawValue::CANONICAL_NAN.is_pointer());
        assert!(RawValue::CANONICAL_NAN.to_f64().is_nan());
    }

    #[test]
    fn ordinary_numbers_are_not_pointers() {
        for v in [0.0, -0.0, 1.5, -1.5, f64::MAX, f64::MIN_POSITIVE, f64::INFINITY] {
            assert!(!RawValue::from_f64(v).is_pointer(), "{v}");
        }
        assert!(!RawValue::from_f64(f64::NAN).is_pointer());
    }

    #[rstest]
    #[case(TypeTag::Array, 0, 64)]
    #[case(TypeTag::String, 0x0012, 0xFFFF_FFF8)]
    #[case(TypeTag::Object, 3, 1024)]
    #[case(TypeTag::Regex, 0, 8)]
    fn pointer_fields_roundtrip(
        #[case] tag: TypeTag,
        #[case] aux: u16,
        #[case] offset: u32,
    ) {
        let p = RawValue::pointer(tag, aux, offset);
        assert!(p.is_pointer());
        assert_eq!(p.tag(), tag);
        assert_eq!(p.aux(), aux);
        assert_eq!(p.offset(), offset);
        // Pointers are NaN at the IEEE level, yet bit-comparable.
        assert!(p.to_f64().is_nan());
        assert_eq!(RawValue::from_f64(p.to_f64()), p);
    }

    #[test]
    fn sso_packs_and_decodes() {
        for s in ["", "a", "hi", "abc", "x_0", "sixsix"] {
            let v = RawValue::sso(s).unwrap();
            assert!(v.is_pointer());
            assert!(v.is_sso());
            assert_eq!(v.sso_len() as usize, s.len());
            assert_eq!(v.sso_decode(), s);
        }
    }

    #[test]
    fn sso_rejects_long_and_wide() {
        assert!(RawValue::sso("sevench").is_none());
        assert!(RawValue::sso("é").is_none());
    }

    #[test]
    fn empty_sso_is_still_a_pointer() {
        // The STRING tag bits alone keep the payload nonzero.
        assert!(RawValue::sso("").unwrap().is_pointer());
    }

    #[test]
    fn closure_fields_roundtrip() {
        let c = RawValue::closure(7, 2, 4096);
        assert_eq!(c.tag(), TypeTag::Closure);
        assert_eq!(c.closure_index(), 7);
        assert_eq!(c.closure_env_len(), 2);
        assert_eq!(c.offset(), 4096);
    }

    #[test]
    fn typed_view_fields_roundtrip() {
        let t = RawValue::typed_view(ElementType::F32, 2048);
        assert_eq!(t.tag(), TypeTag::Typed);
        assert_eq!(t.element_type(), ElementType::F32);
        assert_eq!(t.offset(), 2048);
    }

    #[test]
    fn ring_flag_preserves_fields() {
        let a = RawValue::pointer(TypeTag::Array, 0, 128).with_flag();
        assert!(a.has_flag());
        assert_eq!(a.tag(), TypeTag::Array);
        assert_eq!(a.offset(), 128);
    }

    #[test]
    fn wat_const_carries_the_quiet_bit() {
        // quiet bit | ARRAY << 48 | offset 0x18
        let p = RawValue::pointer(TypeTag::Array, 0, 24);
        assert_eq!(p.wat_const(), "(f64.const nan:0x9000000000018)");
    }
}
