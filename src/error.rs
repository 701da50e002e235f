//! Compile-time error surface.
//!
//! Mirrors the `JIT_RESULT_*` codes libjit raises via
//! `jit_exception_builtin(...)` throughout `jit-compile.c` (spec §7):
//! every compile-time failure funnels through one of these variants. The
//! crate-private `CacheFull` variant is always intercepted inside
//! [`crate::context::Context::compile`] and never escapes to a caller —
//! it drives the page-factor-doubling restart loop described in spec
//! §4.7/§9 ("Manual long-jmp restart").

use failure_derive::Fail;

/// Everything that can go wrong while compiling a function.
#[derive(Debug, Fail)]
pub enum CompileError {
    /// A pool or cache allocation failed.
    #[fail(display = "out of memory")]
    OutOfMemory,

    /// A generic internal compile-time error, carrying a short message.
    #[fail(display = "compile error: {}", _0)]
    CompileError(String),

    /// The function passed to the driver has no entry block / is null.
    #[fail(display = "null function")]
    NullFunction,

    /// An instruction referenced a value that does not exist in this
    /// function.
    #[fail(display = "null reference")]
    NullReference,

    /// `Context::compile` was called re-entrantly on the same context.
    #[fail(display = "called nested")]
    CalledNested,

    /// Internal only: the code cache page filled up mid-emission. Always
    /// caught by the driver's retry loop; see spec §4.8/§8 ("cache-full
    /// restart").
    #[fail(display = "cache full")]
    CacheFull,
}

/// Convenient alias for a fallible compile-time result.
pub type CompileResult<T> = Result<T, CompileError>;
