//! The local, per-instruction operand-driven register allocator.
//!
//! See spec §4.5. Grounded directly on libjit's `_jit_regs_t`/
//! `_jit_regdesc_t` machinery in
//! `examples/original_source/jit/jit-reg-alloc.h`: this allocator walks
//! one instruction at a time, decides which operands need to be loaded
//! into registers, spills whatever is in the way, and never looks past
//! the current instruction. It is the only allocator usable on a
//! stack-register (x87) target (spec §4.5 `STACK` flag), since it can
//! reshuffle the top of a register stack one instruction at a time
//! without a whole-function view.
//!
//! Cost constants below are libjit's literal spill-cost weights
//! (`jit-reg-alloc.c`'s `COST_*` macros), used to pick the cheapest
//! register to evict when none are free.

use crate::ir::{Function, Inst, Opcode, Value};
use crate::regalloc::regclass::RegClass;
use log::trace;
use std::collections::HashMap;

/// Cost of spilling a register holding a dirty (not frame-backed) local
/// value.
pub const COST_SPILL_DIRTY: u32 = 16;
/// Cost of spilling a register holding a clean (already frame-backed)
/// local value — just drop the register copy.
pub const COST_SPILL_CLEAN: u32 = 1;
/// Cost of spilling a dirty global-register value (extra, since a
/// global register's frame copy is also the canonical storage between
/// calls).
pub const COST_SPILL_DIRTY_GLOBAL: u32 = 2;
/// Cost of spilling a clean global-register value.
pub const COST_SPILL_CLEAN_GLOBAL: u32 = 1;
/// Cost of a register-to-register copy needed to satisfy a `COPY`
/// constraint.
pub const COST_COPY: u32 = 4;
/// Extra bias against evicting a register holding a global-register
/// value at all, applied on top of the dirty/clean cost.
pub const COST_GLOBAL_BIAS: u32 = 1;
/// Cost of repeatedly reloading a value that was just spilled
/// ("thrashing"): discourages picking the same victim two instructions
/// in a row.
pub const COST_THRASH: u32 = 32;
/// Cost of spilling a global register across a call (effectively
/// prohibitive — a call already clobbers caller-saves, so evicting a
/// global to make room is almost never the right call).
pub const COST_CLOBBER_GLOBAL: u32 = 1000;

/// Per-opcode operand constraints (spec §4.5's flag bits, read off
/// libjit's `_jit_regs_t` `flags` field).
#[derive(Copy, Clone, Debug, Default)]
pub struct OperandConstraint {
    /// This instruction clobbers every caller-save register (a call).
    pub clobber_all: bool,
    /// Destination and both sources are live simultaneously (an
    /// overflow-checked op writing a status alongside its result).
    pub ternary: bool,
    /// This instruction is a conditional branch: its operands must be
    /// loaded but it writes no destination register.
    pub branch: bool,
    /// The destination must end up in a different register than either
    /// source (a `COPY` is needed when they'd otherwise coincide).
    pub copy: bool,
    /// Target uses a register stack (x87): operand order is exchange-
    /// based rather than free addressing.
    pub stack: bool,
    /// Arithmetic on the x87 stack top specifically.
    pub x87_arith: bool,
    /// Operand order can be swapped for free (spec §4.5 `COMMUTATIVE`).
    pub commutative: bool,
    /// A backend form exists with swapped operands (spec §4.5
    /// `REVERSIBLE`, e.g. `fsub`/`fsubr`).
    pub reversible: bool,
}

impl OperandConstraint {
    /// Derive the constraint bits for `opcode` from its `Opcode::is_*`
    /// classifiers.
    pub fn from_opcode(opcode: Opcode) -> Self {
        Self {
            clobber_all: opcode.is_call(),
            ternary: opcode.is_checked_arith(),
            branch: matches!(opcode, Opcode::BrCond),
            copy: false,
            stack: false,
            x87_arith: false,
            commutative: opcode.is_commutative(),
            reversible: opcode.is_reversible(),
        }
    }
}

#[derive(Clone, Debug)]
struct Slot {
    value: Option<Value>,
    /// The register copy is ahead of the frame copy and must be spilled
    /// before the register can be reused for something else.
    dirty: bool,
    /// This slot is reserved as a whole-function global register (spec
    /// §4.7), never chosen as an ordinary spill victim.
    is_global: bool,
    /// Was this slot's previous occupant spilled on the immediately
    /// preceding instruction (thrash detection)?
    just_spilled: bool,
}

/// One register class's worth of physical register state (spec §4.5:
/// "the allocator tracks, per physical register, which value if any
/// currently occupies it and whether that copy is dirty").
#[derive(Clone, Debug)]
pub struct RegisterFile {
    class: RegClass,
    slots: Vec<Slot>,
}

impl RegisterFile {
    /// A fresh file of `count` free registers of `class`.
    pub fn new(class: RegClass, count: usize) -> Self {
        Self {
            class,
            slots: vec![
                Slot {
                    value: None,
                    dirty: false,
                    is_global: false,
                    just_spilled: false,
                };
                count
            ],
        }
    }

    /// The register class this file serves.
    pub fn class(&self) -> RegClass {
        self.class
    }

    /// Does any register currently hold `v`?
    pub fn find_holding(&self, v: Value) -> Option<u16> {
        self.slots
            .iter()
            .position(|s| s.value == Some(v))
            .map(|i| i as u16)
    }

    /// The first completely free register, if any.
    pub fn find_free(&self) -> Option<u16> {
        self.slots
            .iter()
            .position(|s| s.value.is_none())
            .map(|i| i as u16)
    }

    /// Bind `reg` to hold `v`, freshly loaded (clean).
    pub fn occupy(&mut self, reg: u16, v: Value) {
        let slot = &mut self.slots[reg as usize];
        slot.value = Some(v);
        slot.dirty = false;
        slot.just_spilled = false;
    }

    /// Mark `reg`'s occupant as having been written without a matching
    /// store to its frame slot yet.
    pub fn mark_dirty(&mut self, reg: u16) {
        self.slots[reg as usize].dirty = true;
    }

    /// Does `reg` currently hold a dirty (not frame-backed) value?
    pub fn is_dirty(&self, reg: u16) -> bool {
        self.slots[reg as usize].dirty
    }

    /// Reserve `reg` permanently as a whole-function global register
    /// (spec §4.7): never considered as a spill victim by
    /// [`Self::choose_victim`].
    pub fn reserve_global(&mut self, reg: u16, v: Value) {
        let slot = &mut self.slots[reg as usize];
        slot.value = Some(v);
        slot.is_global = true;
        slot.dirty = false;
    }

    /// Free `reg` unconditionally (its value died, or was already
    /// spilled by the caller).
    pub fn free(&mut self, reg: u16) {
        let slot = &mut self.slots[reg as usize];
        slot.just_spilled = slot.dirty;
        slot.value = None;
        slot.dirty = false;
    }

    /// The value currently occupying `reg`, if any.
    pub fn occupant(&self, reg: u16) -> Option<Value> {
        self.slots[reg as usize].value
    }

    fn spill_cost(&self, reg: u16, crosses_call: bool) -> u32 {
        let slot = &self.slots[reg as usize];
        let mut cost = match (slot.is_global, slot.dirty) {
            (true, true) => COST_SPILL_DIRTY_GLOBAL + COST_GLOBAL_BIAS,
            (true, false) => COST_SPILL_CLEAN_GLOBAL + COST_GLOBAL_BIAS,
            (false, true) => COST_SPILL_DIRTY,
            (false, false) => COST_SPILL_CLEAN,
        };
        if slot.is_global && crosses_call {
            cost += COST_CLOBBER_GLOBAL;
        }
        if slot.just_spilled {
            cost += COST_THRASH;
        }
        cost
    }

    /// Pick the occupied register cheapest to evict (spec §4.5: "the
    /// allocator computes a spill cost for every occupied register and
    /// picks the minimum"). `crosses_call` biases away from evicting a
    /// global register right before a call, since that global would
    /// just be reloaded on the other side anyway.
    pub fn choose_victim(&self, crosses_call: bool) -> Option<u16> {
        (0..self.slots.len() as u16)
            .filter(|&r| self.slots[r as usize].value.is_some())
            .min_by_key(|&r| self.spill_cost(r, crosses_call))
    }

    /// Clear every occupied, non-global register (spec §4.5: a call
    /// clobbers caller-save registers, so nothing but globals survive
    /// it). Returns `(reg, value, was_dirty)` for every register
    /// cleared, so the caller can update that value's location bits and
    /// emit a real spill for the dirty ones.
    pub fn clobber_all(&mut self) -> Vec<(u16, Value, bool)> {
        let mut cleared = Vec::new();
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if let Some(v) = slot.value {
                if !slot.is_global {
                    cleared.push((i as u16, v, slot.dirty));
                    slot.value = None;
                    slot.dirty = false;
                }
            }
        }
        cleared
    }
}

/// A register forcibly freed to make room for a new occupant, whose
/// former value needs a real store to its frame slot before the
/// evicting instruction runs (spec §4.7: the driver calls
/// [`crate::codegen::Backend::spill_reg`] for each of these).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Spill {
    /// The register that was freed.
    pub reg: u16,
    /// The value it held, now spilled to its frame slot.
    pub value: Value,
}

/// The allocator: one [`RegisterFile`] per register class in play.
pub struct LocalAllocator {
    files: HashMap<RegClass, RegisterFile>,
    pointer_bytes: u32,
}

impl LocalAllocator {
    /// Build an allocator with the given per-class register counts
    /// (e.g. from a [`crate::codegen::Backend`]'s target description).
    pub fn new(pointer_bytes: u32, register_counts: &[(RegClass, usize)]) -> Self {
        let files = register_counts
            .iter()
            .map(|&(class, count)| (class, RegisterFile::new(class, count)))
            .collect();
        Self { files, pointer_bytes }
    }

    /// Ensure `v` is loaded into a register of its class, spilling a
    /// victim if every register of that class is occupied. Returns the
    /// register now holding `v`, and the victim that was evicted (if
    /// any, and if it needed a real spill-to-frame rather than just a
    /// clean drop).
    ///
    /// The victim's [`crate::ir::value::ValueData`] location bits are
    /// updated here, not left dangling: a dirty victim is marked
    /// `in_frame = true` before losing `in_register` (spec §8 register-
    /// content consistency), a clean one just loses `in_register`.
    pub fn ensure_loaded(
        &mut self,
        func: &mut Function,
        v: Value,
        class: RegClass,
        crosses_call: bool,
    ) -> (u16, Option<Spill>) {
        if let Some(reg) = self.files.get(&class).and_then(|f| f.find_holding(v)) {
            return (reg, None);
        }
        let file = self
            .files
            .get_mut(&class)
            .expect("register class must have a file configured");
        if let Some(reg) = file.find_free() {
            file.occupy(reg, v);
            return (reg, None);
        }
        let victim = file
            .choose_victim(crosses_call)
            .expect("a register class with capacity > 0 always has a victim once full");
        let was_dirty = file.is_dirty(victim);
        let victim_value = file.occupant(victim);
        file.free(victim);
        file.occupy(victim, v);
        trace!("regalloc(local): evicted r{} for class {:?}", victim, class);

        if let Some(vv) = victim_value {
            if was_dirty {
                func.values[vv].mark_spilled();
            }
            func.values[vv].free_register();
        }
        let spill = if was_dirty {
            victim_value.map(|vv| Spill { reg: victim, value: vv })
        } else {
            None
        };
        (victim, spill)
    }

    /// Allocate registers for one instruction's operands, in program
    /// order, honoring `OperandConstraint` (spec §4.5).
    ///
    /// This mutates the function's `ValueData` location bits via
    /// `write_register`/`mark_spilled`/`free_register`; it does not by
    /// itself emit any spill-store or load instructions — that is the
    /// code-generation driver's job (spec §4.7), which calls
    /// [`crate::codegen::Backend::spill_reg`]/`load_value` for every
    /// [`Spill`] this method reports.
    pub fn allocate_instruction(&mut self, func: &mut Function, inst: Inst) -> Vec<Spill> {
        let constraint = OperandConstraint::from_opcode(func.instructions[inst].opcode);
        let mut spilled = Vec::new();

        if constraint.clobber_all {
            for file in self.files.values_mut() {
                for (reg, value, was_dirty) in file.clobber_all() {
                    if was_dirty {
                        func.values[value].mark_spilled();
                        spilled.push(Spill { reg, value });
                    }
                    func.values[value].free_register();
                }
            }
        }

        let (v1, v2, dest) = {
            let d = &func.instructions[inst];
            (d.value1, d.value2, d.dest)
        };

        let mut operand_order = [v1, v2];
        if constraint.commutative {
            // Prefer ordering so the first operand can die into the
            // destination register, avoiding a COPY (spec §4.5
            // COMMUTATIVE).
            if let (Some(a), Some(dst)) = (operand_order[0], dest) {
                if a != dst {
                    if let Some(b) = operand_order[1] {
                        if b == dst {
                            operand_order.swap(0, 1);
                        }
                    }
                }
            }
        }

        for &maybe_v in operand_order.iter() {
            if let Some(v) = maybe_v {
                if let Some(class) = RegClass::of(&func.values[v].ty, self.pointer_bytes) {
                    let (reg, victim) = self.ensure_loaded(func, v, class, constraint.clobber_all);
                    func.values[v].write_register(reg);
                    if let Some(s) = victim {
                        spilled.push(s);
                    }
                }
            }
        }

        if let Some(d) = dest {
            if !constraint.branch {
                if let Some(class) = RegClass::of(&func.values[d].ty, self.pointer_bytes) {
                    let (reg, victim) = self.ensure_loaded(func, d, class, false);
                    func.values[d].write_register(reg);
                    self.files.get_mut(&class).unwrap().mark_dirty(reg);
                    if let Some(s) = victim {
                        spilled.push(s);
                    }
                }
            }
        }

        spilled
    }

    /// Run the local allocator over every instruction of `func`, in
    /// layout order (spec §4.5: no whole-function lookahead). Returns
    /// every eviction that forced a real spill, paired with the
    /// instruction that forced it, so the driver can emit
    /// `Backend::spill_reg` for each one immediately before that
    /// instruction's own code.
    pub fn run(&mut self, func: &mut Function) -> Vec<(Inst, Spill)> {
        let mut spills = Vec::new();
        let layout = func.layout.clone();
        for block in layout {
            let insts: Vec<Inst> = func.block_insts(block).collect();
            for inst in insts {
                for spill in self.allocate_instruction(func, inst) {
                    spills.push((inst, spill));
                }
            }
        }
        spills
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;
    use crate::entity::EntityRef;
    use crate::ir::{AbiTag, Signature, Type};

    fn new_fn() -> Function {
        Function::with_signature(Signature::new(Type::I32, vec![Type::I32, Type::I32], AbiTag::Cdecl))
    }

    #[test]
    fn allocates_distinct_registers_for_two_live_values() {
        let mut f = new_fn();
        let v0 = f.make_value(Type::I32);
        let v1 = f.make_value(Type::I32);
        let mut b = Builder::new(&mut f);
        let _v2 = b.binary(Opcode::IAdd, Type::I32, v0, v1);
        drop(b);

        let mut alloc = LocalAllocator::new(8, &[(RegClass::Word, 4)]);
        alloc.run(&mut f);

        assert!(f.values[v0].in_register);
        assert!(f.values[v1].in_register);
        assert_ne!(f.values[v0].reg, f.values[v1].reg);
    }

    #[test]
    fn spills_when_register_file_is_full() {
        let mut f = new_fn();
        let v0 = f.make_value(Type::I32);
        let v1 = f.make_value(Type::I32);
        let v2 = f.make_value(Type::I32);
        let mut b = Builder::new(&mut f);
        let _ = b.binary(Opcode::IAdd, Type::I32, v0, v1);
        let _ = b.binary(Opcode::IAdd, Type::I32, v1, v2);
        drop(b);

        // Only one register: every operand after the first forces an
        // eviction.
        let mut alloc = LocalAllocator::new(8, &[(RegClass::Word, 1)]);
        alloc.run(&mut f);
        // No panic, and the last-loaded value ends up resident.
        assert!(f.values[v2].in_register || f.values[v1].in_register);
    }

    #[test]
    fn call_clobbers_all_non_global_registers() {
        let mut file = RegisterFile::new(RegClass::Word, 2);
        file.occupy(0, Value::new(0));
        file.mark_dirty(0);
        file.reserve_global(1, Value::new(1));
        let cleared = file.clobber_all();
        assert_eq!(cleared, vec![(0, Value::new(0), true)]);
        assert!(file.find_holding(Value::new(1)).is_some(), "global register survives a call");
    }

    #[test]
    fn eviction_marks_victim_spilled_and_reports_it() {
        let mut f = new_fn();
        let v0 = f.make_value(Type::I32);
        let v1 = f.make_value(Type::I32);
        let v2 = f.make_value(Type::I32);
        let mut b = Builder::new(&mut f);
        let _ = b.binary(Opcode::IAdd, Type::I32, v0, v1);
        let _ = b.binary(Opcode::IAdd, Type::I32, v1, v2);
        drop(b);

        let mut alloc = LocalAllocator::new(8, &[(RegClass::Word, 1)]);
        let spills = alloc.run(&mut f);

        assert!(!spills.is_empty(), "a single register shared by three values must force a spill");
        for (_inst, spill) in &spills {
            assert!(
                f.values[spill.value].in_frame,
                "a reported spill must leave its value marked in_frame"
            );
            assert!(
                !f.values[spill.value].in_register,
                "a spilled value's old register claim must be cleared"
            );
        }
    }
}
