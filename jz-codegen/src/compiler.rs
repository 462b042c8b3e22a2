//! Public entry points and the assembler bridge.

use jz_ast::{parse, Node};

use crate::context::Generator;
use crate::error::CompileError;

/// Knobs for one compilation.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Export every top-level function, not only `main` and the
    /// `export`-marked ones.
    pub export_all: bool,
    /// Override the memory step table, in 64 KiB pages.
    pub memory_pages: Option<u32>,
    /// Allow the SIMD specialization of typed-array `map`.
    pub simd: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            export_all: false,
            memory_pages: None,
            simd: true,
        }
    }
}

/// The external WAT assembler. The compiler stops at text; turning it into
/// a binary module is the host toolchain's job.
pub trait Assembler {
    /// Assemble module text into binary WASM, or report a diagnostic.
    fn assemble(&self, wat: &str) -> Result<Vec<u8>, String>;
}

/// Compile source text to module text.
pub fn compile_to_wat(source: &str, opts: &CompileOptions) -> Result<String, CompileError> {
    let ast = parse(source)?;
    compile_ast(&ast, opts)
}

/// Compile an already-parsed program to module text.
pub fn compile_ast(ast: &Node, opts: &CompileOptions) -> Result<String, CompileError> {
    let _span = tracing::debug_span!("compile").entered();
    let mut generator = Generator::new(opts.clone());
    let wat = generator.compile_program(ast)?;
    tracing::debug!(features = ?generator.features(), bytes = wat.len(), "compiled");
    Ok(wat)
}

/// The full pipeline: parse, generate, assemble. An assembler failure
/// carries the generated text verbatim so the faulting lowering can be
/// reproduced.
pub fn compile(
    source: &str,
    opts: &CompileOptions,
    assembler: &dyn Assembler,
) -> Result<Vec<u8>, CompileError> {
    let wat = compile_to_wat(source, opts)?;
    assembler
        .assemble(&wat)
        .map_err(|message| CompileError::Assemble { message, wat })
}
