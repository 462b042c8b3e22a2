//! Compilation error taxonomy.

use crate::fragment::ValueKind;

/// A failed compilation. Generator errors abort the compilation immediately;
/// there are no partially-compiled modules.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    /// The front end rejected the source; propagated unchanged.
    #[error(transparent)]
    Parse(#[from] jz_ast::ParseError),

    /// An identifier that is neither a local, global, parameter, hoisted
    /// variable, capture, nor builtin.
    #[error("unknown identifier `{0}`")]
    UnknownIdentifier(String),

    /// A method that inlines its callback received something else.
    #[error("`{method}` expects an arrow-function callback, got `{found}`")]
    CallbackRequired {
        /// The method being lowered.
        method: String,
        /// Rendering of the offending argument.
        found: String,
    },

    /// Wrong argument count for a builtin operator or method.
    #[error("`{what}` takes {expected} argument(s), got {got}")]
    WrongArity {
        /// The builtin or method.
        what: String,
        /// Expected argument count.
        expected: usize,
        /// Observed argument count.
        got: usize,
    },

    /// A method dispatched on a value kind that does not support it.
    #[error("`{method}` is not defined for {kind} values")]
    InvalidMethod {
        /// The method name.
        method: String,
        /// The receiver kind.
        kind: ValueKind,
    },

    /// An operation applied to a value kind it cannot work on.
    #[error("cannot apply `{op}` to {kind} values")]
    InvalidOperation {
        /// The construct being lowered.
        op: String,
        /// The operand kind.
        kind: ValueKind,
    },

    /// The left side of an assignment is not assignable.
    #[error("`{0}` is not an assignable target")]
    BadAssignTarget(String),

    /// `new` with an unrecognized constructor name.
    #[error("unknown constructor `{0}`")]
    UnknownConstructor(String),

    /// `break` or `continue` with no enclosing loop.
    #[error("`break` or `continue` outside a loop")]
    LoopControlOutsideLoop,

    /// The function table is limited to 256 entries by the closure layout.
    #[error("function table is full: a module is limited to 256 closures")]
    TooManyClosures,

    /// A closure environment is limited to 255 captures by the layout.
    #[error("closure captures {got} variables; the limit is 255")]
    TooManyCaptures {
        /// Observed capture count.
        got: usize,
    },

    /// The external assembler rejected the module. The generated text is
    /// attached verbatim so the failing lowering can be reproduced.
    #[error("assembler failed: {message}\n--- generated module ---\n{wat}")]
    Assemble {
        /// The assembler's diagnostic.
        message: String,
        /// The complete module text that failed to assemble.
        wat: String,
    },
}
