//! Atomic runtime value types of the jz compiler.
//!
//! Everything the generated module and the code generator agree on lives
//! here: the NaN-box encoding of runtime values, the heap object type tags,
//! the typed-array element types, and the linear-memory layout constants.

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![deny(unused_must_use)]

mod element;
mod layout;
mod tag;
mod value;

#[cfg(test)]
mod encoding_tests;

pub use element::ElementType;
pub use layout::{
    capacity_for,
    ARRAY_HEADER,
    MIN_CAPACITY,
    RING_HEADER,
    STATIC_BASE,
    STRING_HEADER,
    TYPED_ARENA_GAP,
    VIEW_HEADER,
    WASM_PAGE,
    WORD_SIZE,
};
pub use tag::TypeTag;
pub use value::RawValue;
