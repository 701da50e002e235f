//! Target-specific code generation: the `Backend` trait every ISA plugs
//! into, and the driver that walks a function's blocks emitting native
//! code through it.
//!
//! See spec §6 ("Backend interface") and §4.7 ("Code generation driver").
//! No concrete backend ships in this crate (spec Non-goals: "per-ISA
//! instruction encoders") — [`crate::testing::RecordingBackend`] behind
//! the `testing_hooks` feature is the only implementation, used to
//! exercise the driver's control flow in tests.

pub mod driver;

pub use driver::compile;

use crate::error::CompileResult;
use crate::ir::block::CodeOffset;
use crate::ir::value::PseudoReg;
use crate::ir::{Function, Inst, Opcode, Value, ValueData};
use crate::regalloc::RegClass;

/// A growable byte sink a [`Backend`] emits native code into. Offsets
/// returned by [`Self::offset`] are method-relative: the driver
/// translates them into cache-global addresses only once the whole
/// method has been generated (spec §4.8).
#[derive(Default)]
pub struct CodeBuffer {
    bytes: Vec<u8>,
}

impl CodeBuffer {
    /// An empty buffer.
    pub fn new() -> Self {
        Self { bytes: Vec::new() }
    }

    /// Bytes emitted so far.
    pub fn offset(&self) -> CodeOffset {
        self.bytes.len() as CodeOffset
    }

    /// Append raw bytes.
    pub fn put_bytes(&mut self, data: &[u8]) {
        self.bytes.extend_from_slice(data);
    }

    /// Append one byte.
    pub fn put1(&mut self, b: u8) {
        self.bytes.push(b);
    }

    /// Append a little-endian 32-bit word.
    pub fn put4(&mut self, v: i32) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    /// Reserve 4 bytes for a later [`crate::binemit::patch_relative32`]
    /// fix-up, returning the offset the fix-up list should record.
    pub fn reserve_rel32(&mut self) -> CodeOffset {
        let at = self.offset();
        self.put4(0);
        at
    }

    /// The finished byte stream.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Borrow the bytes emitted so far (for patching already-written
    /// fix-ups in place, spec §6 "Label protocol").
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

/// Everything target-specific about emitting native code for one
/// function (spec §6). Implementations own their own register-file
/// layout, calling convention details and instruction encodings; this
/// crate drives them but never hardcodes an ISA.
pub trait Backend {
    /// Physical registers available per [`RegClass`] (spec §4.5/§4.6:
    /// both allocators size their register files from this).
    fn register_counts(&self) -> Vec<(RegClass, usize)>;

    /// Width in bytes of a native pointer on this target.
    fn pointer_bytes(&self) -> u32;

    /// Emit code to load `value` into register `reg` (spec §6
    /// `load_value`).
    fn load_value(&mut self, buf: &mut CodeBuffer, reg: PseudoReg, value: &ValueData) -> CompileResult<()>;

    /// Emit code to store register `reg`'s contents to `value`'s frame
    /// slot (spec §6 `spill_reg`).
    fn spill_reg(&mut self, buf: &mut CodeBuffer, reg: PseudoReg, value: &ValueData) -> CompileResult<()>;

    /// Release `reg` with no store (its value died or was already
    /// spilled elsewhere; spec §6 `free_reg`). Most backends need no
    /// code for this — it exists so a stack-register target can still
    /// rebalance its stack.
    fn free_reg(&mut self, buf: &mut CodeBuffer, reg: PseudoReg) -> CompileResult<()>;

    /// Emit code to (re)load a whole-function global register from its
    /// permanent frame slot (spec §6 `load_global`, spec §4.7).
    fn load_global(&mut self, buf: &mut CodeBuffer, reg: PseudoReg, value: &ValueData) -> CompileResult<()>;

    /// Emit code to flush a global register back to its permanent frame
    /// slot (spec §6 `spill_global`).
    fn spill_global(&mut self, buf: &mut CodeBuffer, reg: PseudoReg, value: &ValueData) -> CompileResult<()>;

    /// Stack-register (x87) targets only: swap the top of the register
    /// stack with `reg` (spec §6 `exch_top`, spec §4.5 `STACK` flag).
    /// A flat register-file target never calls this.
    fn exch_top(&mut self, buf: &mut CodeBuffer, reg: PseudoReg) -> CompileResult<()>;

    /// Stack-register targets only: move the top of the stack into
    /// `reg`, popping it (spec §6 `move_top`).
    fn move_top(&mut self, buf: &mut CodeBuffer, reg: PseudoReg) -> CompileResult<()>;

    /// Stack-register targets only: spill the top of the stack to
    /// `value`'s frame slot and pop it (spec §6 `spill_top`).
    fn spill_top(&mut self, buf: &mut CodeBuffer, value: &ValueData) -> CompileResult<()>;

    /// Coerce `value`'s current location to whatever its next use
    /// requires (e.g. widen an 8-bit register read to 32 bits; spec §6
    /// `fix_value`).
    fn fix_value(&mut self, buf: &mut CodeBuffer, value: &ValueData) -> CompileResult<()>;

    /// Emit the native encoding of one instruction. Branches to a label
    /// not yet bound to a block address must call
    /// `fixups.record(label, buf.reserve_rel32())` rather than guessing
    /// a displacement (spec §6 "Label protocol").
    fn gen_insn(
        &mut self,
        buf: &mut CodeBuffer,
        func: &Function,
        inst: Inst,
        fixups: &mut crate::binemit::FixupList,
    ) -> CompileResult<()>;

    /// Emit the function prologue (stack frame setup, callee-save
    /// pushes, incoming-argument binding; spec §6 `gen_prolog`).
    fn gen_prolog(&mut self, buf: &mut CodeBuffer, func: &Function) -> CompileResult<()>;

    /// Emit the function epilogue (callee-save restores, stack
    /// teardown, return; spec §6 `gen_epilog`).
    fn gen_epilog(&mut self, buf: &mut CodeBuffer, func: &Function) -> CompileResult<()>;

    /// Emit a redirector stub: a short trampoline at a fixed address
    /// that jumps to `target`, used so a function's published entry
    /// point can be updated after a recompile without patching every
    /// call site (spec §5 "Redirectors", spec §6 `gen_redirector`).
    fn gen_redirector(&mut self, buf: &mut CodeBuffer, target: *const u8) -> CompileResult<()>;

    /// Is `value` eligible to be promoted to a whole-function global
    /// register (spec §4.7, spec §6 `is_global_candidate`)? Typically
    /// false for addressable/volatile values and true for anything with
    /// a high `usage_count` relative to the function's block count.
    fn is_global_candidate(&self, value: &ValueData) -> bool;

    /// Does this backend have an encoding for `opcode` at all (spec §6
    /// `opcode_is_supported`)? The driver rejects a function containing
    /// an unsupported opcode before spending any time on code
    /// generation.
    fn opcode_is_supported(&self, opcode: Opcode) -> bool;
}

/// Shared helper: the default `is_global_candidate` policy (spec §4.7
/// "a value is a global-register candidate if it is not addressable,
/// not volatile, and touched in more than one block"), usable by a
/// `Backend` impl that has no target-specific override.
pub fn default_is_global_candidate(value: &ValueData) -> bool {
    !value.is_addressable && !value.is_volatile && !value.is_constant && value.usage_count > 1
}
