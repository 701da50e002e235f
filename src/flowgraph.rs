//! Control-flow graph construction and the branch-threading cleaner.
//!
//! See spec §4.2. Successor/predecessor edges are computed per-block from
//! the block's terminator opcode and stored directly on
//! [`crate::ir::BlockData`] (`predecessors`/`successors`) rather than in a
//! side table, since every block belongs to exactly one function and is
//! never shared — unlike the teacher's `ControlFlowGraph`, which is a
//! reusable side structure because Cranelift EBBs can be shuffled between
//! analyses. Grounded on libjit's `_jit_block_build_cfg`
//! (`examples/original_source/jit/jit-block.c`).

use crate::ir::{BranchInfo, Function};
use log::trace;

/// Bound on unconditional-chain threading (spec §4.2: "bounded at 32 hops
/// to prevent infinite loops in `while true` style IR").
pub const MAX_THREAD_HOPS: u32 = 32;

/// Compute (or recompute) every block's predecessor/successor edge lists
/// from its terminator instruction.
pub fn compute_cfg(func: &mut Function) {
    for b in &func.layout {
        func.blocks[*b].predecessors.clear();
        func.blocks[*b].successors.clear();
    }

    let layout = func.layout.clone();
    for (pos, &block) in layout.iter().enumerate() {
        let last = match func.blocks[block].last_inst {
            Some(i) => i,
            None => continue,
        };
        let info = func.instructions[last].branch_info();
        let mut succs = Vec::new();
        match info {
            BranchInfo::NotABranch => {
                // Falls through to the next block in layout order, if any.
                if let Some(&next) = layout.get(pos + 1) {
                    succs.push(next);
                }
            }
            BranchInfo::Jump(label) => {
                if let Some(target) = func.label_block(label) {
                    succs.push(target);
                }
            }
            BranchInfo::CondJump(label) => {
                if let Some(&next) = layout.get(pos + 1) {
                    succs.push(next);
                }
                if let Some(target) = func.label_block(label) {
                    succs.push(target);
                }
            }
            BranchInfo::Table(labels) => {
                for label in labels {
                    if let Some(target) = func.label_block(label) {
                        succs.push(target);
                    }
                }
            }
            BranchInfo::NoSuccessors => {}
        }
        func.blocks[block].successors = succs.iter().copied().collect();
        for s in succs {
            func.blocks[s].predecessors.push(block);
        }
    }
    trace!("cfg: computed edges for {} blocks", layout.len());
}

/// The branch-threading cleaner (spec §4.2): for each trailing
/// unconditional branch, follow the chain of blocks that themselves are
/// nothing but another unconditional branch, retargeting to the final
/// destination; and elide a branch whose target is the block immediately
/// following it in layout order (spec §8 boundary case: "A branch whose
/// target is the next emission position is elided").
///
/// Must run after [`compute_cfg`]; callers that mutate branch targets
/// should call [`compute_cfg`] again afterward.
pub fn clean_cfg(func: &mut Function) {
    let layout = func.layout.clone();
    for (pos, &block) in layout.iter().enumerate() {
        let last = match func.blocks[block].last_inst {
            Some(i) => i,
            None => continue,
        };
        if func.instructions[last].opcode != crate::ir::Opcode::Br {
            continue;
        }
        let mut label = match func.instructions[last].dest_label {
            Some(l) => l,
            None => continue,
        };
        let mut hops = 0;
        loop {
            hops += 1;
            if hops > MAX_THREAD_HOPS {
                break;
            }
            let target = match func.label_block(label) {
                Some(t) => t,
                None => break,
            };
            // Thread through a target block that is itself nothing but
            // one unconditional branch.
            if func.blocks[target].first_inst == func.blocks[target].last_inst {
                if let Some(only) = func.blocks[target].last_inst {
                    if func.instructions[only].opcode == crate::ir::Opcode::Br {
                        if let Some(next_label) = func.instructions[only].dest_label {
                            if next_label != label {
                                label = next_label;
                                continue;
                            }
                        }
                    }
                }
            }
            break;
        }
        // Drop a branch to the immediately-following block.
        let elide = layout
            .get(pos + 1)
            .map_or(false, |&next| func.label_block(label) == Some(next));
        if elide {
            func.instructions[last].opcode = crate::ir::Opcode::Nop;
            func.instructions[last].dest_label = None;
        } else {
            func.instructions[last].dest_label = Some(label);
        }
    }
    compute_cfg(func);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;
    use crate::ir::{AbiTag, Signature, Type};

    fn new_fn() -> Function {
        Function::with_signature(Signature::new(Type::I32, vec![], AbiTag::Cdecl))
    }

    #[test]
    fn liveness_across_branches_scenario_edges() {
        // spec §8 scenario 2: B1: v1 = const 1; br B2; B2: return v1.
        let mut f = new_fn();
        let label_b2 = f.new_label();
        let mut b = Builder::new(&mut f);
        let v1 = b.function_mut().make_int_const(Type::I32, 1);
        b.br(label_b2);
        b.start_new_block();
        let block_b2 = b.current_block();
        b.function_mut().bind_label(label_b2, block_b2);
        b.ret(Some(v1));
        drop(b);

        compute_cfg(&mut f);
        let entry = f.entry_block.unwrap();
        assert_eq!(&f.blocks[entry].successors[..], [block_b2]);
        assert_eq!(&f.blocks[block_b2].predecessors[..], [entry]);
    }

    #[test]
    fn unconditional_branch_chain_threads_to_final_target() {
        let mut f = new_fn();
        let label_final = f.new_label();
        let label_mid = f.new_label();
        let mut b = Builder::new(&mut f);

        // entry: br mid
        b.br(label_mid);
        // mid: br final
        b.start_new_block();
        let mid_block = b.current_block();
        b.function_mut().bind_label(label_mid, mid_block);
        b.br(label_final);
        // final: ret void
        b.start_new_block();
        let final_block = b.current_block();
        b.function_mut().bind_label(label_final, final_block);
        b.ret(None);
        drop(b);

        compute_cfg(&mut f);
        clean_cfg(&mut f);

        let entry = f.entry_block.unwrap();
        assert_eq!(&f.blocks[entry].successors[..], [final_block]);
    }

    #[test]
    fn branch_to_next_block_is_elided() {
        let mut f = new_fn();
        let label_next = f.new_label();
        let mut b = Builder::new(&mut f);
        b.br(label_next);
        b.start_new_block();
        let next_block = b.current_block();
        b.function_mut().bind_label(label_next, next_block);
        b.ret(None);
        drop(b);

        compute_cfg(&mut f);
        clean_cfg(&mut f);

        let entry = f.entry_block.unwrap();
        let last = f.blocks[entry].last_inst.unwrap();
        assert_eq!(f.instructions[last].opcode, crate::ir::Opcode::Nop);
    }
}
