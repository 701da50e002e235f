//! Live ranges.
//!
//! See spec §3 ("Live range") and §4.4 ("Live-range construction"). A live
//! range groups the def/use points of one value that share a contiguous
//! region of the CFG; a value with disjoint live regions (e.g. reused
//! across two unrelated loops) owns more than one `LiveRangeData`, each
//! with its own entry in `Function::live_ranges`.

use crate::bitset::BitSet;
use crate::ir::value::PseudoReg;
use crate::ir::{Block, Function, Inst, LiveRangeId, Value};
use log::trace;
use std::collections::HashMap;

/// One (block, instruction) occurrence of a def or use.
pub type Occurrence = (Block, Inst);

/// Build every value's live range(s) from its def/use occurrences, then
/// flood-fill the blocks it merely passes through (spec §4.4).
///
/// Requires [`crate::flowgraph::compute_cfg`] and
/// [`crate::liveness::analyze`] to have already run: flood-fill coverage
/// is read straight off each block's `live_out`/`upward_exposed`
/// bitsets rather than recomputed.
///
/// A value with `excluded_from_liveness()` set (constant, addressable,
/// volatile) gets no live range here — those are handled as per-use
/// dummy/spill ranges by the allocators themselves (spec §4.4 "Special
/// cases"), not by this construction pass.
pub fn build_live_ranges(func: &mut Function) {
    let mut range_of: HashMap<Value, LiveRangeId> = HashMap::new();
    let layout = func.layout.clone();

    for &block in &layout {
        let insts: Vec<Inst> = func.block_insts(block).collect();
        for inst in insts {
            let (opcode, value1, value1_is_value, value2, value2_is_value, dest, dest_is_value) = {
                let d = &func.instructions[inst];
                (
                    d.opcode,
                    d.value1,
                    d.value1_flags.is_value,
                    d.value2,
                    d.value2_flags.is_value,
                    d.dest,
                    d.dest_flags.is_value,
                )
            };
            if opcode.is_nop() {
                continue;
            }

            if let Some(v) = value1 {
                if value1_is_value && !func.values[v].excluded_from_liveness() {
                    let id = *range_of.entry(v).or_insert_with(|| func.make_live_range(v));
                    func.live_ranges[id].add_end(block, inst);
                    func.instructions[inst].value1_range = Some(id);
                }
            }
            if let Some(v) = value2 {
                if value2_is_value && !func.values[v].excluded_from_liveness() {
                    let id = *range_of.entry(v).or_insert_with(|| func.make_live_range(v));
                    func.live_ranges[id].add_end(block, inst);
                    func.instructions[inst].value2_range = Some(id);
                }
            }
            if let Some(v) = dest {
                if dest_is_value && !func.values[v].excluded_from_liveness() {
                    let id = *range_of.entry(v).or_insert_with(|| func.make_live_range(v));
                    func.live_ranges[id].add_start(block, inst);
                    func.instructions[inst].dest_range = Some(id);
                }
            }
        }
    }

    for (&value, &id) in &range_of {
        let idx = usize_of_value(value);
        for &block in &layout {
            if func.blocks[block].live_out.test(idx) || func.blocks[block].upward_exposed.test(idx) {
                func.live_ranges[id].add_covered_block(block);
            }
        }
    }

    trace!("live ranges: built {} ranges over {} blocks", range_of.len(), layout.len());
}

fn usize_of_value(v: Value) -> usize {
    use crate::entity::EntityRef;
    v.index()
}

/// Per-live-range data (spec §3).
#[derive(Clone, Debug)]
pub struct LiveRangeData {
    /// The value this range covers. Dummy ranges created for
    /// constants-in-registers or fixed hardware constraints (spec §4.4)
    /// still name the value they shadow, even though that value is
    /// excluded from ordinary liveness.
    pub value: Value,

    /// Every instruction that assigns `value` within this range's
    /// extent (a multiset: one value can be multiply-defined at the
    /// head of a loop carrying distinct live ranges for the same
    /// variable name is not expected here, but re-materialization at
    /// block entry can add more than one start).
    pub starts: Vec<Occurrence>,
    /// Every instruction that uses `value` within this range's extent.
    pub ends: Vec<Occurrence>,

    /// Blocks containing at least one `starts` occurrence.
    pub touched_block_starts: BitSet,
    /// Blocks containing at least one `ends` occurrence.
    pub touched_block_ends: BitSet,
    /// All blocks this range is live through, including ones it only
    /// flows across (flood-filled, spec §4.4). Used by "does this
    /// range's touched-block set reach this block" tests and by the
    /// interference check for non-local ranges (spec §4.6).
    pub covered_blocks: BitSet,

    /// Per-physical-register affinity score; higher is more preferred.
    /// Indexed by `PseudoReg as usize`. Populated by the instructions
    /// this range touches (e.g. an `OUTGOING_REG` constraint raises the
    /// score of its target register).
    pub preferred_colors: Vec<u32>,
    /// Assigned physical register(s): length `register_count` once
    /// colored (1, or 2 for a register pair; spec glossary "Register
    /// pair").
    pub colors: Vec<PseudoReg>,
    /// Number of physical registers this range needs simultaneously.
    pub register_count: u8,

    /// Pre-assigned by a hardware constraint (e.g. `OUTGOING_REG`, a
    /// call's caller-save clobber set) rather than by the allocator's
    /// coloring choice.
    pub is_fixed: bool,
    /// The graph-coloring allocator decided this range lives in memory,
    /// not a register.
    pub is_spilled: bool,
    /// A short-extent range synthesized for a single addressable/
    /// volatile use, or for a constant materialized into a register for
    /// one instruction (spec §4.4 "Special cases").
    pub is_spill_range: bool,

    /// Interference-graph neighbors (spec §4.6), populated by
    /// [`crate::regalloc::coloring::Coloring::build_interference`].
    pub neighbors: Vec<LiveRangeId>,
}

impl LiveRangeData {
    /// A fresh, empty range for `value`.
    pub fn new(value: Value) -> Self {
        Self {
            value,
            starts: Vec::new(),
            ends: Vec::new(),
            touched_block_starts: BitSet::new(),
            touched_block_ends: BitSet::new(),
            covered_blocks: BitSet::new(),
            preferred_colors: Vec::new(),
            colors: Vec::new(),
            register_count: 1,
            is_fixed: false,
            is_spilled: false,
            is_spill_range: false,
            neighbors: Vec::new(),
        }
    }

    /// Record a definition of `value` at `(block, inst)`.
    pub fn add_start(&mut self, block: Block, inst: Inst) {
        self.starts.push((block, inst));
        self.touched_block_starts.set(usize_of(block));
        self.covered_blocks.set(usize_of(block));
    }

    /// Record a use of `value` at `(block, inst)`.
    pub fn add_end(&mut self, block: Block, inst: Inst) {
        self.ends.push((block, inst));
        self.touched_block_ends.set(usize_of(block));
        self.covered_blocks.set(usize_of(block));
    }

    /// Mark `block` as flowed-through (flood fill, no local def/use).
    pub fn add_covered_block(&mut self, block: Block) {
        self.covered_blocks.set(usize_of(block));
    }

    /// Does this range's coverage reach `block` (spec §4.4: "touched-
    /// block set reaches this block")?
    pub fn reaches(&self, block: Block) -> bool {
        self.covered_blocks.test(usize_of(block))
    }

    /// Bump the affinity score of `reg` for this range.
    pub fn prefer(&mut self, reg: PseudoReg, weight: u32) {
        let idx = reg as usize;
        if self.preferred_colors.len() <= idx {
            self.preferred_colors.resize(idx + 1, 0);
        }
        self.preferred_colors[idx] += weight;
    }

    /// Give this range a fixed, pre-assigned color (a hardware
    /// constraint), e.g. a call's clobber set or an `OUTGOING_REG`.
    pub fn fix_to(&mut self, reg: PseudoReg) {
        self.is_fixed = true;
        self.colors = vec![reg];
        self.register_count = 1;
    }

    /// Is this range currently colored (has `register_count` colors
    /// assigned and is not spilled)?
    pub fn is_colored(&self) -> bool {
        !self.is_spilled && self.colors.len() == self.register_count as usize
    }
}

fn usize_of(b: Block) -> usize {
    use crate::entity::EntityRef;
    b.index()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityRef;

    #[test]
    fn start_and_end_mark_touched_and_covered() {
        let mut r = LiveRangeData::new(Value::new(0));
        let b0 = Block::new(0);
        let b1 = Block::new(1);
        r.add_start(b0, Inst::new(0));
        r.add_end(b1, Inst::new(5));
        assert!(r.touched_block_starts.test(0));
        assert!(!r.touched_block_starts.test(1));
        assert!(r.touched_block_ends.test(1));
        assert!(r.reaches(b0));
        assert!(r.reaches(b1));
        assert!(!r.reaches(Block::new(2)));
    }

    #[test]
    fn fixed_color_sets_single_register() {
        let mut r = LiveRangeData::new(Value::new(0));
        r.fix_to(2);
        assert!(r.is_fixed);
        assert!(r.is_colored());
        assert_eq!(r.colors, vec![2]);
    }

    #[test]
    fn prefer_grows_score_table() {
        let mut r = LiveRangeData::new(Value::new(0));
        r.prefer(5, 3);
        r.prefer(5, 2);
        assert_eq!(r.preferred_colors[5], 5);
    }

    #[test]
    fn build_live_ranges_covers_branch_through_block() {
        use crate::builder::Builder;
        use crate::flowgraph::compute_cfg;
        use crate::ir::{AbiTag, Opcode, Signature, Type};
        use crate::liveness;

        // entry: v1 = v0 + v0; br mid
        // mid:   br final            (v1 merely flows through `mid`)
        // final: return v1
        let mut f = crate::ir::Function::with_signature(Signature::new(
            Type::I32,
            vec![Type::I32],
            AbiTag::Cdecl,
        ));
        let label_mid = f.new_label();
        let label_final = f.new_label();
        let mut b = Builder::new(&mut f);
        let v0 = b.function_mut().make_value(Type::I32);
        let v1 = b.binary(Opcode::IAdd, Type::I32, v0, v0);
        b.br(label_mid);

        b.start_new_block();
        let mid = b.current_block();
        b.function_mut().bind_label(label_mid, mid);
        b.br(label_final);

        b.start_new_block();
        let fin = b.current_block();
        b.function_mut().bind_label(label_final, fin);
        b.ret(Some(v1));
        drop(b);

        compute_cfg(&mut f);
        liveness::analyze(&mut f);
        build_live_ranges(&mut f);

        let id = f.values[v1].live_ranges[0];
        assert!(f.live_ranges[id].reaches(mid), "range must flood-fill the block it only passes through");
        assert!(f.live_ranges[id].reaches(fin));
    }
}
