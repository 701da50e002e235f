//! iljit code generation library.
//!
//! This crate implements the engineering core of a just-in-time compiler: an
//! intermediate representation (IR) builder, a control-flow/liveness
//! analysis pass, two register allocators (a local operand-driven allocator
//! and a global graph-coloring allocator), and the code-generation driver
//! that walks a function's blocks and asks a target-specific [`codegen::
//! Backend`] to emit native bytes into a growable [`cache::CodeCache`].
//!
//! Per-ISA instruction encoders, the public C-style function/context/type
//! APIs, the bytecode interpreter, ELF serialization and the `apply`/FFI
//! marshalling layer are all out of scope: this crate only defines the
//! [`codegen::Backend`] trait those pieces would implement.

#![deny(missing_docs, trivial_numeric_casts, unused_extern_crates)]
#![warn(unused_import_braces)]

#[macro_use]
pub mod entity;

pub mod bitset;
pub mod binemit;
pub mod builder;
pub mod cache;
pub mod codegen;
pub mod context;
pub mod error;
pub mod flowgraph;
pub mod fold;
pub mod ir;
pub mod live_range;
pub mod liveness;
pub mod regalloc;
pub mod settings;

#[cfg(feature = "testing_hooks")]
pub mod testing;

pub use crate::context::Context;
pub use crate::error::{CompileError, CompileResult};

/// Version number of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
