//! Generator parameters and the fixed head of the static segment.

use jz_types::{RawValue, TypeTag, STATIC_BASE};

/// Memory step table, in pages: modules that never touch memory, modules
/// with a heap, modules with a typed-array arena (heap plus 1 MiB gap plus
/// arena headroom).
pub(crate) const PAGES_PLAIN: u32 = 2;
pub(crate) const PAGES_HEAP: u32 = 16;
pub(crate) const PAGES_TYPED: u32 = 48;

/// The three special numeric strings occupy a fixed prefix of the static
/// segment so the prewritten number-to-string helper can name them as
/// immediates. Each entry is an i32 length header, 4 bytes of padding, then
/// UTF-16 code units, 8-aligned.
pub(crate) const NAN_STR_OFFSET: u32 = STATIC_BASE + 8; // "NaN"
pub(crate) const INF_STR_OFFSET: u32 = 40; // "Infinity"
pub(crate) const NEG_INF_STR_OFFSET: u32 = 64; // "-Infinity"

/// First free byte for interned strings and static data.
pub(crate) const STATIC_POOL_BASE: u32 = 88;

pub(crate) fn nan_str_ptr() -> RawValue {
    RawValue::pointer(TypeTag::String, 0, NAN_STR_OFFSET)
}

pub(crate) fn inf_str_ptr() -> RawValue {
    RawValue::pointer(TypeTag::String, 0, INF_STR_OFFSET)
}

pub(crate) fn neg_inf_str_ptr() -> RawValue {
    RawValue::pointer(TypeTag::String, 0, NEG_INF_STR_OFFSET)
}

#[cfg(test)]
mod tests {
    use super::*;

    // The number-to-string helper in the stdlib table embeds these pointers
    // as literal `nan:0x…` constants; keep them in sync with the encoding.
    #[test]
    fn special_string_literals_match_encoding() {
        assert_eq!(nan_str_ptr().wat_const(), "(f64.const nan:0xb000000000018)");
        assert_eq!(inf_str_ptr().wat_const(), "(f64.const nan:0xb000000000028)");
        assert_eq!(
            neg_inf_str_ptr().wat_const(),
            "(f64.const nan:0xb000000000040)"
        );
    }

    #[test]
    fn special_strings_fit_their_slots() {
        // "NaN" ends at 24 + 6, "Infinity" at 40 + 16, "-Infinity" at
        // 64 + 18; the pool base clears all three.
        assert!(NAN_STR_OFFSET + 6 <= INF_STR_OFFSET - 8);
        assert!(INF_STR_OFFSET + 16 <= NEG_INF_STR_OFFSET - 8);
        assert!(NEG_INF_STR_OFFSET + 18 <= STATIC_POOL_BASE);
    }
}
