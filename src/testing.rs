//! A fictitious backend for exercising the register allocators and the
//! code-generation driver without a real ISA (spec §6, feature
//! `testing_hooks`).
//!
//! Grounded on the teacher's `TargetIsa` test doubles used throughout
//! `cranelift-codegen`'s own unit tests: a minimal, deliberately simple
//! implementation of the seam every real backend would fill in, good
//! enough to drive control flow but never shipped as a real target.
//! [`RecordingBackend`] has four word registers and two float registers
//! and "encodes" every instruction as a single tagged byte record rather
//! than real machine code, so tests can assert on exactly what the
//! driver asked it to do.

use crate::codegen::{Backend, CodeBuffer};
use crate::error::CompileResult;
use crate::ir::value::PseudoReg;
use crate::ir::{Function, Inst, Opcode, ValueData};
use crate::regalloc::RegClass;

/// One step [`RecordingBackend`] was asked to perform, recorded in
/// order for test assertions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Recorded {
    /// `gen_prolog` ran.
    Prolog,
    /// `gen_epilog` ran.
    Epilog,
    /// `gen_insn` ran for the given opcode.
    Insn(Opcode),
    /// `load_value` loaded into this register.
    Load(PseudoReg),
    /// `spill_reg` spilled this register.
    Spill(PseudoReg),
}

/// A 4-word/2-float toy target. Every `gen_*` call appends one byte
/// (used only so the driver has something non-empty to place in the
/// cache) and one [`Recorded`] entry.
pub struct RecordingBackend {
    /// Every operation performed, in order; inspected by driver/
    /// allocator tests.
    pub log: Vec<Recorded>,
}

impl RecordingBackend {
    /// A fresh backend with an empty log.
    pub fn new() -> Self {
        Self { log: Vec::new() }
    }
}

impl Default for RecordingBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for RecordingBackend {
    fn register_counts(&self) -> Vec<(RegClass, usize)> {
        vec![
            (RegClass::Word, 4),
            (RegClass::Long, 2),
            (RegClass::Float64, 2),
        ]
    }

    fn pointer_bytes(&self) -> u32 {
        8
    }

    fn load_value(&mut self, buf: &mut CodeBuffer, reg: PseudoReg, _value: &ValueData) -> CompileResult<()> {
        self.log.push(Recorded::Load(reg));
        buf.put1(0x01);
        Ok(())
    }

    fn spill_reg(&mut self, buf: &mut CodeBuffer, reg: PseudoReg, _value: &ValueData) -> CompileResult<()> {
        self.log.push(Recorded::Spill(reg));
        buf.put1(0x02);
        Ok(())
    }

    fn free_reg(&mut self, _buf: &mut CodeBuffer, _reg: PseudoReg) -> CompileResult<()> {
        Ok(())
    }

    fn load_global(&mut self, buf: &mut CodeBuffer, reg: PseudoReg, value: &ValueData) -> CompileResult<()> {
        self.load_value(buf, reg, value)
    }

    fn spill_global(&mut self, buf: &mut CodeBuffer, reg: PseudoReg, value: &ValueData) -> CompileResult<()> {
        self.spill_reg(buf, reg, value)
    }

    fn exch_top(&mut self, buf: &mut CodeBuffer, _reg: PseudoReg) -> CompileResult<()> {
        buf.put1(0x03);
        Ok(())
    }

    fn move_top(&mut self, buf: &mut CodeBuffer, _reg: PseudoReg) -> CompileResult<()> {
        buf.put1(0x04);
        Ok(())
    }

    fn spill_top(&mut self, buf: &mut CodeBuffer, _value: &ValueData) -> CompileResult<()> {
        buf.put1(0x05);
        Ok(())
    }

    fn fix_value(&mut self, buf: &mut CodeBuffer, _value: &ValueData) -> CompileResult<()> {
        buf.put1(0x06);
        Ok(())
    }

    fn gen_insn(
        &mut self,
        buf: &mut CodeBuffer,
        func: &Function,
        inst: Inst,
        fixups: &mut crate::binemit::FixupList,
    ) -> CompileResult<()> {
        let opcode = func.instructions[inst].opcode;
        self.log.push(Recorded::Insn(opcode));
        buf.put1(0xf0);
        let label = match func.instructions[inst].branch_info() {
            crate::ir::BranchInfo::Jump(label) => Some(label),
            crate::ir::BranchInfo::CondJump(label) => Some(label),
            _ => None,
        };
        if let Some(label) = label {
            match func.label_block(label).and_then(|b| func.blocks[b].address) {
                Some(target) => buf.put4(target as i32),
                None => {
                    let at = buf.reserve_rel32();
                    fixups.record(label, at);
                }
            }
        }
        Ok(())
    }

    fn gen_prolog(&mut self, buf: &mut CodeBuffer, _func: &Function) -> CompileResult<()> {
        self.log.push(Recorded::Prolog);
        buf.put1(0xaa);
        Ok(())
    }

    fn gen_epilog(&mut self, buf: &mut CodeBuffer, _func: &Function) -> CompileResult<()> {
        self.log.push(Recorded::Epilog);
        buf.put1(0xbb);
        Ok(())
    }

    fn gen_redirector(&mut self, buf: &mut CodeBuffer, _target: *const u8) -> CompileResult<()> {
        buf.put1(0xcc);
        Ok(())
    }

    fn is_global_candidate(&self, value: &ValueData) -> bool {
        crate::codegen::default_is_global_candidate(value)
    }

    fn opcode_is_supported(&self, opcode: Opcode) -> bool {
        // Every opcode except the stack-register-only pseudo-ops, which
        // this flat-register-file toy target never emits.
        !matches!(opcode, Opcode::CallVtablePtr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;
    use crate::ir::{AbiTag, Signature, Type};

    #[test]
    fn gen_prolog_and_epilog_are_logged_once() {
        let mut f = Function::with_signature(Signature::new(Type::I32, vec![], AbiTag::Cdecl));
        let mut b = Builder::new(&mut f);
        b.ret(None);
        drop(b);

        let mut backend = RecordingBackend::new();
        let mut buf = CodeBuffer::new();
        backend.gen_prolog(&mut buf, &f).unwrap();
        backend.gen_epilog(&mut buf, &f).unwrap();
        assert_eq!(backend.log, vec![Recorded::Prolog, Recorded::Epilog]);
    }

    #[test]
    fn unsupported_opcode_is_rejected() {
        let backend = RecordingBackend::new();
        assert!(!backend.opcode_is_supported(Opcode::CallVtablePtr));
        assert!(backend.opcode_is_supported(Opcode::IAdd));
    }
}
