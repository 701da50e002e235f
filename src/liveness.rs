//! Liveness analysis.
//!
//! See spec §4.3. Computes per-block `UEVar`/`VarKill`, then iterates the
//! `LiveOut` dataflow equation to a fixed point in reverse post-order.
//! Grounded on libjit's `_jit_block_compute_liveness_*` passes in
//! `examples/original_source/jit/jit-reg-alloc.c` (the original computes
//! the same UEVar/VarKill/LiveOut triad, just inline inside the register
//! allocator rather than as a standalone pass).

use crate::bitset::BitSet;
use crate::entity::EntityRef;
use crate::ir::{Block, Function, Opcode};
use log::trace;
use std::collections::HashSet;

/// Compute `UEVar` and `VarKill` for every block (spec §4.3).
///
/// `UEVar(b)`: values used in `b` before any local definition.
/// `VarKill(b)`: values defined somewhere in `b`.
///
/// NOP instructions are skipped. Values that are constant, addressable,
/// or volatile are excluded (spec §4.3), since they never live in a
/// register to begin with.
pub fn compute_uevar_varkill(func: &mut Function) {
    let layout = func.layout.clone();
    for block in layout {
        let mut ue = BitSet::new();
        let mut kill = BitSet::new();
        for inst in func.block_insts(block) {
            let data = func.instructions[inst].clone();
            if data.opcode.is_nop() {
                continue;
            }
            for operand in data.operand_values() {
                if func.values[operand].excluded_from_liveness() {
                    continue;
                }
                let idx = operand.index();
                if !kill.test(idx) {
                    ue.set(idx);
                }
            }
            if let Some(dest) = data.dest {
                if data.dest_flags.is_value && !func.values[dest].excluded_from_liveness() {
                    kill.set(dest.index());
                }
            }
        }
        func.blocks[block].upward_exposed = ue;
        func.blocks[block].var_kills = kill;
    }
}

/// Depth-first post-order over the CFG starting at the entry block,
/// reversed to give reverse-post-order (the iteration order the `LiveOut`
/// fixed point converges fastest in, since predecessors in RPO tend to
/// be visited before their successors' defs propagate back).
fn reverse_post_order(func: &Function) -> Vec<Block> {
    let entry = match func.entry_block {
        Some(e) => e,
        None => return Vec::new(),
    };
    let mut visited = HashSet::new();
    let mut post_order = Vec::new();
    let mut stack = vec![(entry, 0usize)];
    visited.insert(entry);
    while let Some((block, next_succ)) = stack.pop() {
        let succs = &func.blocks[block].successors;
        if next_succ < succs.len() {
            let s = succs[next_succ];
            stack.push((block, next_succ + 1));
            if visited.insert(s) {
                stack.push((s, 0));
            }
        } else {
            post_order.push(block);
        }
    }
    post_order.reverse();
    post_order
}

/// Iterate the `LiveOut` dataflow equation to a fixed point (spec §4.3):
/// `LiveOut(b) = ∪_{s∈succ(b)} (UEVar(s) ∪ (LiveOut(s) − VarKill(s)))`.
///
/// Requires [`compute_uevar_varkill`] (and CFG edges via
/// [`crate::flowgraph::compute_cfg`]) to have already run.
pub fn compute_live_out(func: &mut Function) {
    let rpo = reverse_post_order(func);
    let mut iterations = 0u32;
    loop {
        let mut changed = false;
        for &block in &rpo {
            let mut new_live_out = BitSet::new();
            for &succ in &func.blocks[block].successors {
                new_live_out.union_with(&func.blocks[succ].upward_exposed);
                let mut propagated = func.blocks[succ].live_out.clone();
                propagated.difference_with(&func.blocks[succ].var_kills);
                new_live_out.union_with(&propagated);
            }
            if new_live_out != func.blocks[block].live_out {
                trace!("liveness: block {:?} changed", block);
                func.blocks[block].live_out = new_live_out;
                changed = true;
            }
        }
        iterations += 1;
        if !changed {
            break;
        }
    }
    trace!("liveness: fixed point after {} iterations", iterations);
}

/// Run the full liveness pass: UEVar/VarKill then the LiveOut fixed
/// point.
pub fn analyze(func: &mut Function) {
    compute_uevar_varkill(func);
    compute_live_out(func);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;
    use crate::flowgraph::compute_cfg;
    use crate::ir::{AbiTag, Signature, Type};

    #[test]
    fn liveness_across_branches_scenario_2() {
        // B1: v1 = const 1; br B2; B2: return v1.
        // Note: a constant is excluded from liveness (spec §4.3), so to
        // exercise the UEVar/VarKill/LiveOut triad we use a non-constant
        // value instead, matching the *shape* of spec §8 scenario 2
        // while keeping v1 a live register candidate.
        let mut f = Function::with_signature(Signature::new(Type::I32, vec![Type::I32], AbiTag::Cdecl));
        let label_b2 = f.new_label();
        let mut b = Builder::new(&mut f);
        let v1 = b.function_mut().make_value(Type::I32);
        // Give v1 a def in B1 so VarKill(B1) = {v1}.
        let zero = b.function_mut().make_int_const(Type::I32, 0);
        let _ = b.binary(crate::ir::Opcode::IAdd, Type::I32, v1, zero);
        b.br(label_b2);
        b.start_new_block();
        let b2 = b.current_block();
        b.function_mut().bind_label(label_b2, b2);
        b.ret(Some(v1));
        drop(b);

        compute_cfg(&mut f);
        analyze(&mut f);

        let b1 = f.entry_block.unwrap();
        assert!(f.blocks[b2].upward_exposed.test(v1.index()));
        assert!(f.blocks[b1].live_out.test(v1.index()));
        assert!(f.blocks[b2].live_out.is_empty());
    }

    #[test]
    fn nop_instructions_are_skipped() {
        let mut f = Function::with_signature(Signature::new(Type::Void, vec![], AbiTag::Cdecl));
        let mut b = Builder::new(&mut f);
        let v = b.function_mut().make_value(Type::I32);
        let inst = crate::ir::InstructionData::new(Opcode::Nop);
        b.raw_append(inst);
        b.ret(None);
        drop(b);
        compute_cfg(&mut f);
        compute_uevar_varkill(&mut f);
        let entry = f.entry_block.unwrap();
        assert!(f.blocks[entry].upward_exposed.is_empty());
        assert!(!f.blocks[entry].var_kills.test(v.index()));
    }
}
