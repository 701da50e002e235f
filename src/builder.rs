//! The function builder.
//!
//! See spec §4.1. Grounded on libjit's incremental block-chaining in
//! `examples/original_source/jit/jit-block.c` (`_jit_block_create`) and
//! its constant-folding dispatch in `jit-opcode-apply.c`'s
//! `_jit_opcode_apply`/`apply_opcode`, which look up an intrinsic
//! descriptor by opcode exactly as [`crate::fold`] does here.

use crate::error::{CompileError, CompileResult};
use crate::fold;
use crate::ir::value::ConstantValue;
use crate::ir::{
    Block, CondCode, Function, Inst, InstructionData, Label, Opcode, OperandFlags, Type, Value,
};
use log::trace;

/// Incrementally appends instructions to a [`Function`], performing
/// algebraic simplification / constant folding on every append (spec
/// §4.1).
///
/// A `Builder` borrows the function it's filling in. Once building is
/// done the borrow ends and the function moves on to optimization/
/// codegen — mirroring the spec's "Lifecycles" note that a `Function`'s
/// `Builder` is "present only while mutable".
pub struct Builder<'f> {
    func: &'f mut Function,
    current: Block,
    /// Set once an allocation failure occurs; subsequent appends are
    /// no-ops (spec §4.1 "Error conditions").
    out_of_memory: bool,
}

impl<'f> Builder<'f> {
    /// Start building into `func`'s entry block.
    pub fn new(func: &'f mut Function) -> Self {
        let current = func.entry_block.expect("Function::with_signature always creates an entry block");
        Self {
            func,
            current,
            out_of_memory: false,
        }
    }

    /// The block instructions are currently being appended to.
    pub fn current_block(&self) -> Block {
        self.current
    }

    /// Borrow the function under construction.
    pub fn function(&self) -> &Function {
        self.func
    }

    /// Mutably borrow the function under construction (for operations,
    /// like label allocation, that don't go through the builder itself).
    pub fn function_mut(&mut self) -> &mut Function {
        self.func
    }

    fn fail_oom(&mut self) -> CompileResult<()> {
        self.out_of_memory = true;
        Err(CompileError::OutOfMemory)
    }

    /// Open a fresh block and make it current. Used both explicitly by
    /// callers (e.g. to land the target of a forward branch) and
    /// implicitly by [`Self::raw_append`] when the current block is
    /// already terminated.
    pub fn start_new_block(&mut self) -> Block {
        let b = self.func.append_block();
        self.current = b;
        b
    }

    /// Allocate a label and immediately bind it to a fresh block, made
    /// current.
    pub fn new_block_with_label(&mut self) -> (Label, Block) {
        let label = self.func.new_label();
        let block = self.start_new_block();
        self.func.bind_label(label, block);
        (label, block)
    }

    fn is_current_terminated(&self) -> bool {
        match self.func.blocks[self.current].last_inst {
            None => false,
            Some(last) => self.func.instructions[last].opcode.is_terminator(),
        }
    }

    /// Append a raw, already-constructed instruction to the current
    /// block (spec §4.1: "appends to the current block unless the
    /// current block is already terminated, in which case a fresh block
    /// is opened implicitly").
    ///
    /// This is the low-level entry point; the typed helpers below
    /// (`iadd`, `br`, ...) build the `InstructionData` and route through
    /// this, applying constant folding first where applicable.
    pub fn raw_append(&mut self, inst: InstructionData) -> Inst {
        if self.is_current_terminated() {
            self.start_new_block();
        }
        let idx = self.func.instructions.push(inst);
        let block = &mut self.func.blocks[self.current];
        if block.first_inst.is_none() {
            block.first_inst = Some(idx);
        }
        block.last_inst = Some(idx);
        idx
    }

    /// Append to a compiled function is a hard error (spec §4.1).
    pub fn check_not_compiled(&self) -> CompileResult<()> {
        if self.func.status.is_compiled {
            return Err(CompileError::CompileError(
                "cannot append to a compiled function".into(),
            ));
        }
        Ok(())
    }

    // -- constant folding helpers --

    fn const_of(&self, v: Value) -> Option<ConstantValue> {
        let data = &self.func.values[v];
        if data.is_constant {
            Some(data.constant)
        } else {
            None
        }
    }

    fn pointer_bytes(&self) -> u32 {
        8
    }

    /// `dest = opcode(a, b)`, folding to a constant when both operands
    /// are constant (spec §4.1 scenario 1).
    pub fn binary(&mut self, opcode: Opcode, ty: Type, a: Value, b: Value) -> Value {
        if let (Some(ca), Some(cb)) = (self.const_of(a), self.const_of(b)) {
            if let Some(folded) = fold::fold_binary(opcode, &ty, &ca, &cb) {
                trace!("fold: {:?}({:?}, {:?}) -> {:?}", opcode, ca, cb, folded);
                return self.push_constant(ty, folded);
            }
        }
        let dest = self.func.make_value(ty);
        self.raw_append(InstructionData::binary(opcode, dest, a, b));
        dest
    }

    /// `(dest, overflowed) = opcode_ovf(a, b)` (spec's `i_piii` checked
    /// arithmetic). Folds when both operands are constant.
    pub fn checked_binary(&mut self, opcode: Opcode, ty: Type, a: Value, b: Value) -> (Value, Value) {
        if let (Some(ca), Some(cb)) = (self.const_of(a), self.const_of(b)) {
            if let Some((result, overflow)) = fold::fold_checked(opcode, &ty, &ca, &cb) {
                let dest = self.push_constant(ty, result);
                let status = self.push_constant(Type::I32, ConstantValue::Int(overflow as i64));
                return (dest, status);
            }
        }
        let dest = self.func.make_value(ty);
        let status = self.func.make_value(Type::I32);
        let mut inst = InstructionData::binary(opcode, dest, a, b);
        inst.extra.stored_value = Some(status);
        self.raw_append(inst);
        (dest, status)
    }

    /// `dest = opcode(a)`.
    pub fn unary(&mut self, opcode: Opcode, ty: Type, a: Value) -> Value {
        if let Some(ca) = self.const_of(a) {
            if let Some(folded) = fold::fold_unary(opcode, &ty, &ca) {
                return self.push_constant(ty, folded);
            }
        }
        let dest = self.func.make_value(ty);
        self.raw_append(InstructionData::unary(opcode, dest, a));
        dest
    }

    /// `dest:i32 = a cc b`, of type `ty`. Folds per spec's `FLAG_NOT`
    /// convention (see [`crate::fold::fold_compare`]).
    pub fn cmp(&mut self, opcode: Opcode, cond: CondCode, ty: Type, a: Value, b: Value) -> Value {
        if let (Some(ca), Some(cb)) = (self.const_of(a), self.const_of(b)) {
            if let Some(r) = fold::fold_compare(cond, &ty, &ca, &cb, self.pointer_bytes()) {
                return self.push_constant(Type::I32, ConstantValue::Int(r as i64));
            }
        }
        let dest = self.func.make_value(Type::I32);
        let mut inst = InstructionData::binary(opcode, dest, a, b);
        inst.cond = Some(cond);
        self.raw_append(inst);
        dest
    }

    /// Signed/float/unsigned integer comparison.
    pub fn icmp(&mut self, cond: CondCode, ty: Type, a: Value, b: Value) -> Value {
        self.cmp(Opcode::ICmp, cond, ty, a, b)
    }

    /// Float comparison.
    pub fn fcmp(&mut self, cond: CondCode, ty: Type, a: Value, b: Value) -> Value {
        self.cmp(Opcode::FCmp, cond, ty, a, b)
    }

    /// Convert `a` (of type `from`) to `to`, honoring the "constant
    /// convert" path (spec §4.1: "Conversion opcodes dispatch through a
    /// dedicated 'constant convert' path that honours overflow-checked
    /// flavours").
    pub fn convert(&mut self, checked: bool, from: Type, to: Type, a: Value) -> Value {
        if let Some(ca) = self.const_of(a) {
            if let Some((folded, overflow)) = fold::fold_convert(checked, &from, &to, &ca) {
                if !checked || !overflow {
                    return self.push_constant(to.clone(), folded);
                }
                // A checked constant conversion that overflows cannot be
                // folded away silently: leave the instruction in place so
                // the emitted code raises `OVERFLOW` at runtime, matching
                // a checked conversion of a non-constant operand.
            }
        }
        let dest = self.func.make_value(to);
        let opcode = if checked { Opcode::ConvertOvf } else { Opcode::Convert };
        self.raw_append(InstructionData::unary(opcode, dest, a));
        dest
    }

    fn push_constant(&mut self, ty: Type, c: ConstantValue) -> Value {
        match c {
            ConstantValue::Int(v) => self.func.make_int_const(ty, v),
            ConstantValue::Float(v) | ConstantValue::NFloat(v) => self.func.make_float_const(ty, v),
        }
    }

    /// Unconditional branch.
    pub fn br(&mut self, label: Label) -> Inst {
        self.raw_append(InstructionData::branch(label))
    }

    /// Conditional branch: jump to `label` iff `cond(a, b)` holds,
    /// otherwise fall through.
    pub fn br_cond(&mut self, cond: CondCode, a: Value, b: Value, label: Label) -> Inst {
        self.raw_append(InstructionData::branch_cond(cond, a, b, label))
    }

    /// Return, optionally with a value.
    pub fn ret(&mut self, value: Option<Value>) -> Inst {
        let mut inst = InstructionData::new(Opcode::Return);
        if let Some(v) = value {
            inst.value1 = Some(v);
            inst.value1_flags = OperandFlags::value(false);
        }
        self.raw_append(inst)
    }

    /// Throw an exception value.
    pub fn throw(&mut self, value: Value) -> Inst {
        let mut inst = InstructionData::new(Opcode::Throw);
        inst.value1 = Some(value);
        inst.value1_flags = OperandFlags::value(false);
        self.raw_append(inst)
    }

    /// Emit a debug-only bytecode-offset marker (spec §4.7 "Mark-offset
    /// opcodes"). Produces no native code, only an entry in the
    /// bytecode-offset map.
    pub fn mark_offset(&mut self, bytecode_offset: u32) -> Inst {
        let mut inst = InstructionData::new(Opcode::MarkOffset);
        inst.extra.bytecode_offset = Some(bytecode_offset);
        self.raw_append(inst)
    }

    /// `dest = &value` (`value` is marked addressable).
    pub fn address_of(&mut self, value: Value) -> Value {
        self.func.values[value].is_addressable = true;
        let dest = self.func.make_value(Type::Ptr);
        self.raw_append(InstructionData::unary(Opcode::AddressOf, dest, value));
        dest
    }

    /// `dest = *(base + offset)`.
    pub fn load_rel(&mut self, ty: Type, base: Value, offset: i32) -> Value {
        let dest = self.func.make_value(ty);
        let mut inst = InstructionData::unary(Opcode::LoadRel, dest, base);
        inst.extra.offset = offset;
        self.raw_append(inst);
        dest
    }

    /// `*(base + offset) = value`.
    pub fn store_rel(&mut self, base: Value, offset: i32, value: Value) -> Inst {
        let mut inst = InstructionData::new(Opcode::StoreRel);
        inst.value1 = Some(base);
        inst.value1_flags = OperandFlags::value(false);
        inst.value2 = Some(value);
        inst.value2_flags = OperandFlags::value(false);
        inst.extra.offset = offset;
        self.raw_append(inst)
    }

    /// `dest = *(base + index * scale)`.
    pub fn load_elem(&mut self, ty: Type, base: Value, index: Value, scale: u8) -> Value {
        let dest = self.func.make_value(ty);
        let mut inst = InstructionData::binary(Opcode::LoadElem, dest, base, index);
        inst.extra.scale = scale;
        self.raw_append(inst);
        dest
    }

    /// `*(base + index * scale) = value`.
    pub fn store_elem(&mut self, base: Value, index: Value, scale: u8, value: Value) -> Inst {
        let mut inst = InstructionData::new(Opcode::StoreElem);
        inst.value1 = Some(base);
        inst.value1_flags = OperandFlags::value(false);
        inst.value2 = Some(index);
        inst.value2_flags = OperandFlags::value(false);
        inst.extra.scale = scale;
        inst.extra.stored_value = Some(value);
        self.raw_append(inst)
    }

    /// Push `value` as the next outgoing call argument.
    pub fn push_arg(&mut self, value: Value) -> Inst {
        let mut inst = InstructionData::new(Opcode::PushArg);
        inst.value1 = Some(value);
        inst.value1_flags = OperandFlags::value(false);
        self.raw_append(inst)
    }

    /// Bind `value` into outgoing physical register `reg` just before a
    /// call.
    pub fn outgoing_reg(&mut self, value: Value, reg: u16) -> Inst {
        let mut inst = InstructionData::new(Opcode::OutgoingReg);
        inst.value1 = Some(value);
        inst.value1_flags = OperandFlags::value(false);
        inst.extra.reg_index = Some(reg);
        self.raw_append(inst)
    }

    /// `dest = CALL target(...)`. Call arguments must already have been
    /// pushed/bound via `push_arg`/`outgoing_reg`.
    pub fn call(&mut self, opcode: Opcode, target: Value, ret_ty: Type) -> Option<Value> {
        debug_assert!(opcode.is_call());
        if matches!(ret_ty, Type::Void) {
            let mut inst = InstructionData::new(opcode);
            inst.value1 = Some(target);
            inst.value1_flags = OperandFlags::value(false);
            self.raw_append(inst);
            None
        } else {
            let dest = self.func.make_value(ret_ty);
            let mut inst = InstructionData::unary(opcode, dest, target);
            let _ = &mut inst;
            self.raw_append(inst);
            Some(dest)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::AbiTag;

    fn new_fn() -> Function {
        Function::with_signature(crate::ir::Signature::new(Type::I32, vec![], AbiTag::Cdecl))
    }

    #[test]
    fn constant_fold_add_i32_scenario() {
        // spec §8 scenario 1
        let mut f = new_fn();
        let mut b = Builder::new(&mut f);
        let v1 = b.func.make_int_const(Type::I32, 3);
        let v2 = b.func.make_int_const(Type::I32, 4);
        let insts_before = b.func.instructions.len();
        let v3 = b.binary(Opcode::IAdd, Type::I32, v1, v2);
        assert_eq!(
            b.func.instructions.len(),
            insts_before,
            "constant-folded add should not append an instruction"
        );
        assert!(b.func.value_is_constant(v3));
        assert_eq!(b.func.values[v3].constant.as_int(), 7);
    }

    #[test]
    fn non_constant_binary_appends_instruction() {
        let mut f = new_fn();
        let v1 = f.make_value(Type::I32);
        let v2 = f.make_value(Type::I32);
        let mut b = Builder::new(&mut f);
        let before = b.func.instructions.len();
        let _v3 = b.binary(Opcode::IAdd, Type::I32, v1, v2);
        assert_eq!(b.func.instructions.len(), before + 1);
    }

    #[test]
    fn append_after_terminator_opens_new_block() {
        let mut f = new_fn();
        let mut b = Builder::new(&mut f);
        let label = b.func.new_label();
        let first_block = b.current_block();
        b.br(label);
        let v = b.func.make_value(Type::I32);
        let _ = b.unary(Opcode::INeg, Type::I32, v);
        assert_ne!(b.current_block(), first_block, "append after a terminator opens a new block");
    }

    #[test]
    fn checked_add_overflow_folds_status() {
        let mut f = new_fn();
        let mut b = Builder::new(&mut f);
        let v1 = b.func.make_int_const(Type::I32, i32::MAX as i64);
        let v2 = b.func.make_int_const(Type::I32, 1);
        let (_dest, status) = b.checked_binary(Opcode::IAddOvf, Type::I32, v1, v2);
        assert_eq!(b.func.values[status].constant.as_int(), 1);
    }

    #[test]
    fn store_rel_carries_the_requested_offset() {
        // `*(base + offset) = value` (spec §6): the offset argument must
        // land in the instruction, not get silently dropped to 0.
        let mut f = new_fn();
        let mut b = Builder::new(&mut f);
        let base = b.func.make_value(Type::Ptr);
        let value = b.func.make_value(Type::I32);
        let inst = b.store_rel(base, 8, value);
        assert_eq!(b.func.instructions[inst].extra.offset, 8);
    }
}
