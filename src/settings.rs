//! Compile-time configuration.
//!
//! Grounded on the teacher's `settings` module (referenced throughout
//! `cranelift-codegen`, e.g. `isa.flags().enable_verifier()`) and on
//! libjit's per-function `optimization_level` field (`jit-compile.c`'s
//! `optimize()` checks `func->optimization_level == JIT_OPTLEVEL_NONE`).

use target_lexicon::{PointerWidth, Triple};

/// Optimization level requested for a compile. Mirrors libjit's
/// `JIT_OPTLEVEL_NONE`/`JIT_OPTLEVEL_NORMAL`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OptLevel {
    /// Skip CFG/liveness/live-range construction; values never get global
    /// registers, never interfere, and the local allocator runs alone.
    None,
    /// Run the full optimizer pipeline (CFG, liveness, live ranges, global
    /// register candidacy) before code generation.
    Normal,
}

impl Default for OptLevel {
    fn default() -> Self {
        OptLevel::Normal
    }
}

/// Which register allocator the code-generation driver should use for a
/// given compile (spec §2: "local operand-driven" vs "graph-coloring").
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AllocatorKind {
    /// Per-instruction operand-driven allocator (spec §4.5). Required for
    /// stack-register (x87) targets.
    Local,
    /// Whole-function graph-coloring allocator (spec §4.6).
    GraphColoring,
}

impl Default for AllocatorKind {
    fn default() -> Self {
        AllocatorKind::Local
    }
}

/// Settings shared by every compile on a [`crate::context::Context`].
#[derive(Clone, Debug)]
pub struct Settings {
    /// Optimization level.
    pub opt_level: OptLevel,
    /// Which allocator to run.
    pub allocator: AllocatorKind,
    /// Run [`crate::ir::Function::verify`] before codegen. Defaults to
    /// `true` in debug builds, `false` in release, matching the teacher's
    /// `enable_verifier` flag default.
    pub enable_verifier: bool,
    /// Width in bytes of a native pointer on the target (4 or 8). Drives
    /// `Type::size`/`Type::kind`/register-pair decisions.
    pub pointer_bytes: u32,
    /// Initial code-cache page size in bytes, before any `page_factor`
    /// doubling (spec §4.8/glossary "Page factor").
    pub initial_page_size: u32,
    /// The target triple this compile's `pointer_bytes`/`allocator`
    /// choice was derived from, kept around for diagnostics and so a
    /// `Backend` can re-derive target details it needs beyond pointer
    /// width (teacher idiom: `cranelift-codegen`'s `Flags`/`isa` layer
    /// is always built from a `target_lexicon::Triple`). `None` for
    /// settings constructed directly from a bit width rather than a
    /// triple.
    pub target: Option<Triple>,
}

impl Settings {
    /// Settings tuned for a 64-bit target at normal optimization.
    pub fn for_64bit() -> Self {
        Self {
            opt_level: OptLevel::Normal,
            allocator: AllocatorKind::Local,
            enable_verifier: cfg!(debug_assertions),
            pointer_bytes: 8,
            initial_page_size: 4096,
            target: None,
        }
    }

    /// Settings tuned for a 32-bit target at normal optimization.
    pub fn for_32bit() -> Self {
        Self {
            pointer_bytes: 4,
            ..Self::for_64bit()
        }
    }

    /// Settings derived from a concrete [`Triple`], taking the pointer
    /// width from `triple.pointer_width()` rather than having the
    /// caller state it redundantly. Falls back to 64-bit if the triple's
    /// pointer width is unknown to `target-lexicon`.
    pub fn for_triple(triple: Triple) -> Self {
        let pointer_bytes = match triple.pointer_width() {
            Ok(PointerWidth::U16) => 2,
            Ok(PointerWidth::U32) => 4,
            Ok(PointerWidth::U64) => 8,
            Err(()) => 8,
        };
        Self {
            pointer_bytes,
            target: Some(triple),
            ..Self::for_64bit()
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::for_64bit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_normal_local_64bit() {
        let s = Settings::default();
        assert_eq!(s.opt_level, OptLevel::Normal);
        assert_eq!(s.allocator, AllocatorKind::Local);
        assert_eq!(s.pointer_bytes, 8);
    }

    #[test]
    fn for_32bit_overrides_pointer_width_only() {
        let s = Settings::for_32bit();
        assert_eq!(s.pointer_bytes, 4);
        assert_eq!(s.allocator, AllocatorKind::Local);
    }

    #[test]
    fn for_triple_derives_pointer_width() {
        let triple: Triple = "i686-unknown-linux-gnu".parse().unwrap();
        let s = Settings::for_triple(triple.clone());
        assert_eq!(s.pointer_bytes, 4);
        assert_eq!(s.target, Some(triple));

        let triple64: Triple = "x86_64-unknown-linux-gnu".parse().unwrap();
        let s64 = Settings::for_triple(triple64);
        assert_eq!(s64.pointer_bytes, 8);
    }
}
