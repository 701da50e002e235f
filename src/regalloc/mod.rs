//! Register allocation: two allocators sharing the same type-
//! compatibility matrix (spec §4.5, §4.6).
//!
//! [`local::LocalAllocator`] is a per-instruction, operand-driven
//! allocator with no whole-function view; [`coloring::Coloring`] is a
//! whole-function graph-coloring allocator built on the live ranges
//! [`crate::live_range::build_live_ranges`] constructs. Which one a
//! compile uses is chosen by [`crate::settings::AllocatorKind`].

pub mod coloring;
pub mod local;
pub mod regclass;
pub mod stack;

pub use coloring::Coloring;
pub use local::{LocalAllocator, OperandConstraint, RegisterFile, Spill};
pub use regclass::RegClass;
pub use stack::{apply_binary_form, choose_binary_form, BinaryForm, StackRegisterFile};
