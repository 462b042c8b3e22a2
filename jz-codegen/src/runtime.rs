//! The prewritten runtime helper library.
//!
//! Helpers are emitted as WAT text blocks selected by the feature flags;
//! everything in a selected block is emitted unconditionally and the
//! assembler's dead-code elimination drops the unreachable ones.

pub(crate) mod mem;
pub(crate) mod ring;
pub(crate) mod string;
pub(crate) mod typed;

use crate::features::Features;

/// All helper blocks the feature set requires, in a stable order.
pub(crate) fn helpers(features: Features) -> String {
    let mut out = String::new();
    if features.touches_memory() {
        out.push_str(&mem::block(features));
    }
    if features.contains(Features::ARRAYS) {
        out.push_str(&mem::array_block(features));
    }
    if features.contains(Features::RING) {
        out.push_str(ring::BLOCK);
    }
    if features.contains(Features::STRINGS) {
        out.push_str(string::BLOCK);
    }
    if features.contains(Features::TYPED_ARRAYS) {
        out.push_str(typed::BLOCK);
    }
    if features.contains(Features::SYMBOLS) {
        out.push_str(mem::SYMBOL_BLOCK);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_follow_features() {
        let none = helpers(Features::default());
        assert!(none.is_empty());

        let mem_only = helpers(Features::MEMORY);
        assert!(mem_only.contains("$__alloc"));
        assert!(!mem_only.contains("$__ring_shift"));
        assert!(!mem_only.contains("$__str_eq"));

        let all = helpers(Features::all());
        for name in [
            "$__alloc",
            "$__mkptr",
            "$__is_pointer",
            "$__arr_get",
            "$__ring_unshift",
            "$__to_ring",
            "$__str_eq",
            "$__strcat",
            "$__alloc_typed",
            "$__mk_typed_subarray",
            "$__mk_symbol",
            "$__typeof_code",
        ] {
            assert!(all.contains(name), "missing {name}");
        }
    }

    #[test]
    fn pointer_equality_routes_through_strings_only_when_present() {
        let without = mem::block(Features::MEMORY);
        assert!(!without.contains("$__str_eq"));
        let with = mem::block(Features::MEMORY | Features::STRINGS);
        assert!(with.contains("$__str_eq"));
    }
}
