#![allow(clippy::unwrap_used)]

use crate::*;
use proptest::prelude::*;
use strum::IntoEnumIterator;

proptest! {
    // A boxed pointer round-trips all three fields and always classifies as
    // a pointer, for every tag.
    #[test]
    fn pointer_roundtrip(tag_bits in 0u8..7, aux in any::<u16>(), offset in any::<u32>()) {
        let tag = TypeTag::from_bits(tag_bits);
        let v = RawValue::pointer(tag, aux, offset);
        prop_assert!(v.is_pointer());
        prop_assert_eq!(v.tag(), tag);
        prop_assert_eq!(v.aux(), aux);
        prop_assert_eq!(v.offset(), offset);
    }

    // Arithmetic f64 values never classify as pointers, NaN results
    // included: hardware NaNs carry a zero payload.
    #[test]
    fn numbers_are_never_pointers(a in any::<f64>(), b in any::<f64>()) {
        for v in [a, b, a + b, a * b, a / b, a % b] {
            let canonical = if v.is_nan() { f64::NAN } else { v };
            prop_assert!(!RawValue::from_f64(canonical).is_pointer());
        }
    }

    // Pointer bit-equality is exact: two pointers are bit-equal iff all
    // fields agree.
    #[test]
    fn pointer_bit_equality(
        tag_bits in 0u8..7,
        aux1 in any::<u16>(), off1 in any::<u32>(),
        aux2 in any::<u16>(), off2 in any::<u32>(),
    ) {
        let tag = TypeTag::from_bits(tag_bits);
        let p1 = RawValue::pointer(tag, aux1, off1);
        let p2 = RawValue::pointer(tag, aux2, off2);
        prop_assert_eq!(p1 == p2, aux1 == aux2 && off1 == off2);
    }

    // SSO packing round-trips any eligible string.
    #[test]
    fn sso_roundtrip(s in "[ -~]{0,6}") {
        let v = RawValue::sso(&s).unwrap();
        prop_assert!(v.is_sso());
        prop_assert_eq!(v.sso_decode(), s);
    }

    // Distinct eligible strings pack to distinct bit patterns.
    #[test]
    fn sso_is_injective(a in "[ -~]{0,6}", b in "[ -~]{0,6}") {
        let va = RawValue::sso(&a).unwrap();
        let vb = RawValue::sso(&b).unwrap();
        prop_assert_eq!(va == vb, a == b);
    }

    // The capacity rule: a power of two, at least four, at least the length,
    // and minimal among such.
    #[test]
    fn capacity_rule(len in 0u64..1_000_000) {
        let cap = capacity_for(len);
        prop_assert!(cap.is_power_of_two());
        prop_assert!(cap >= MIN_CAPACITY);
        prop_assert!(cap >= len);
        if cap > MIN_CAPACITY {
            prop_assert!(cap / 2 < len);
        }
    }

    // Closure packing never disturbs neighbouring fields.
    #[test]
    fn closure_roundtrip(table in any::<u8>(), len in any::<u8>(), env in any::<u32>()) {
        let c = RawValue::closure(table, len, env);
        prop_assert_eq!(c.closure_index(), table);
        prop_assert_eq!(c.closure_env_len(), len);
        prop_assert_eq!(c.offset(), env);
        prop_assert_eq!(c.tag(), TypeTag::Closure);
    }
}

#[test]
fn every_tag_with_zero_fields_is_still_tagged() {
    // Only the ATOM tag collapses to a zero payload; that is why symbol ids
    // start at one.
    for tag in TypeTag::iter() {
        let v = RawValue::pointer(tag, 0, 0);
        assert_eq!(v.is_pointer(), tag != TypeTag::Atom);
    }
}
