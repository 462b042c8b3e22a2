use bitflags::bitflags;

bitflags! {
    /// What the compiled program touched.
    ///
    /// Lowerings set flags as they go; module assembly reads them to pick
    /// the memory size, the runtime helper blocks, and the section set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Features: u16 {
        /// Linear memory is read or written.
        const MEMORY = 1 << 0;
        /// Regular arrays.
        const ARRAYS = 1 << 1;
        /// Strings, heap or SSO.
        const STRINGS = 1 << 2;
        /// Typed-array views and the arena.
        const TYPED_ARRAYS = 1 << 3;
        /// A vectorized loop was emitted.
        const SIMD = 1 << 4;
        /// The function table and `call_indirect`.
        const FUNC_TABLE = 1 << 5;
        /// The exception tag.
        const EXCEPTIONS = 1 << 6;
        /// Ring-buffer arrays.
        const RING = 1 << 7;
        /// Runtime symbols.
        const SYMBOLS = 1 << 8;
        /// Fixed-shape objects.
        const OBJECTS = 1 << 9;
    }
}

impl Features {
    /// Whether any selected group pulls in the base memory helpers (tag
    /// helpers, allocator, equality).
    pub(crate) fn touches_memory(self) -> bool {
        self.intersects(
            Features::MEMORY
                | Features::ARRAYS
                | Features::STRINGS
                | Features::TYPED_ARRAYS
                | Features::RING
                | Features::SYMBOLS
                | Features::OBJECTS,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_accumulate() {
        let mut f = Features::default();
        f |= Features::ARRAYS | Features::MEMORY;
        assert!(f.contains(Features::ARRAYS));
        assert!(!f.contains(Features::SIMD));
    }
}
