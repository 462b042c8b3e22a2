//! Linear-memory layout parameters shared by the generator and the emitted
//! runtime helpers.

/// Length of one value slot, in bytes.
pub const WORD_SIZE: u32 = 8;

/// Array length header: 8 bytes of f64 at `offset - 8`.
pub const ARRAY_HEADER: u32 = 8;

/// String length header: 4 bytes of i32 at `offset - 8`, then 4 bytes of
/// padding so character data stays 8-aligned.
pub const STRING_HEADER: u32 = 8;

/// Ring-buffer header: `[head: f64, length: f64]` at `offset - 16`.
pub const RING_HEADER: u32 = 16;

/// Typed-array view header: `[length: i32, data-ptr: i32]` at the pointer's
/// offset. Element data lives wherever `data-ptr` says.
pub const VIEW_HEADER: u32 = 8;

/// First byte of the static segment. The first slots stay unused so that no
/// live object ever has offset zero and headers never underflow the segment.
pub const STATIC_BASE: u32 = 16;

/// The typed-array arena begins this far above the heap start.
pub const TYPED_ARENA_GAP: u32 = 1024 * 1024;

/// Size of one WebAssembly memory page.
pub const WASM_PAGE: u32 = 65536;

/// Smallest backing capacity of a heap array, in elements.
pub const MIN_CAPACITY: u64 = 4;

/// Backing capacity for an array of `len` elements: the next power of two at
/// or above `max(len, MIN_CAPACITY)`.
pub fn capacity_for(len: u64) -> u64 {
    len.max(MIN_CAPACITY).next_power_of_two()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_floor_is_four() {
        assert_eq!(capacity_for(0), 4);
        assert_eq!(capacity_for(3), 4);
        assert_eq!(capacity_for(4), 4);
    }

    #[test]
    fn capacity_rounds_up() {
        assert_eq!(capacity_for(5), 8);
        assert_eq!(capacity_for(8), 8);
        assert_eq!(capacity_for(9), 16);
        assert_eq!(capacity_for(1000), 1024);
    }
}
