//! WAT code generation for the jz language.
//!
//! The crate is the middle-to-back end of the compiler: closure analysis,
//! the typed-fragment code generator, the inlined array/typed-array method
//! lowerings, the runtime helper library, and module assembly. The front
//! end lives in [`jz_ast`]; the value model in [`jz_types`].

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![deny(unused_must_use)]

mod analyzer;
mod compiler;
mod consts;
mod context;
mod error;
mod features;
mod fragment;
mod gen;
mod methods;
mod module;
mod runtime;
mod sig;
mod stdlib;

pub use analyzer::{analyze, hoisted_vars, InnerFn, ScopeInfo};
pub use compiler::{compile, compile_ast, compile_to_wat, Assembler, CompileOptions};
pub use context::Generator;
pub use error::CompileError;
pub use features::Features;
pub use fragment::{Fragment, Schema, ValueKind};

#[doc(no_inline)]
pub use jz_ast;
#[doc(no_inline)]
pub use jz_types;

/// Required implementations for full functionality.
pub mod prelude {
    #[doc(no_inline)]
    pub use crate::{
        compile,
        compile_ast,
        compile_to_wat,
        Assembler,
        CompileError,
        CompileOptions,
        Features,
        Generator,
    };
    #[doc(no_inline)]
    pub use jz_ast::{parse, Node, Op};
    #[doc(no_inline)]
    pub use jz_types::{ElementType, RawValue, TypeTag};
}
