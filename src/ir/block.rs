//! Basic blocks.
//!
//! See spec §3 ("Block"). A block is a linear run of instructions in the
//! function's instruction arena, delimited by a terminator, plus the
//! bookkeeping CFG/liveness/codegen attach to it.

use crate::bitset::BitSet;
use crate::ir::{Inst, Label};
use smallvec::SmallVec;

/// Most blocks have at most two predecessors and two successors (spec
/// §4.2: a conditional branch has exactly two successors, a merge point
/// typically two predecessors); inlining that many avoids a heap
/// allocation per block in the overwhelmingly common case.
pub type BlockList = SmallVec<[crate::ir::Block; 2]>;

/// A forward-reference fix-up: a code-cache offset whose 4-byte relative
/// placeholder needs patching once a target block's address is known
/// (spec glossary "Fix-up list"). The `next` field threads an intrusive
/// linked list through entries sharing the same unresolved target,
/// mirroring libjit's fix-up chain without needing real pointers (arena+
/// index design, spec §9) — here a plain `Vec<CodeOffset>` plays that
/// role per target since blocks are compiled in one pass and don't need
/// the storage to be reclaimed mid-flight.
pub type CodeOffset = u32;

/// A basic block (spec §3's "Block").
#[derive(Clone, Debug)]
pub struct BlockData {
    /// The label bound to this block, if any branch refers to it by
    /// label rather than by `Block` handle directly.
    pub label: Option<Label>,

    /// Index of the first instruction in this block, within the owning
    /// function's instruction layout. `None` for an empty block.
    pub first_inst: Option<Inst>,
    /// Index of the last instruction (the terminator, once the block is
    /// closed).
    pub last_inst: Option<Inst>,

    /// CFG predecessor blocks (spec §4.2).
    pub predecessors: BlockList,
    /// CFG successor blocks.
    pub successors: BlockList,

    /// Upward-exposed uses: values used in this block before any local
    /// definition (spec §4.3).
    pub upward_exposed: BitSet,
    /// Values (re)defined somewhere in this block.
    pub var_kills: BitSet,
    /// Values live on exit from this block, once the liveness fixed
    /// point (spec §4.3) has converged.
    pub live_out: BitSet,

    /// Was this block ever entered by falling through from the textual
    /// previous block (as opposed to only by an explicit branch)?
    pub entered_via_top: bool,
    /// Was this block ever entered by an explicit branch?
    pub entered_via_branch: bool,
    /// Does this block end in an unconditional terminator, making any
    /// code after it (before the next label) dead?
    pub ends_in_dead: bool,

    /// Forward-branch fix-ups still pending against this block's *own*
    /// body (branches emitted earlier in the same block that target a
    /// label not yet bound when they were emitted). Cleared once the
    /// block's label resolves (spec §6 "Label protocol").
    pub pending_fixups: Vec<CodeOffset>,

    /// Free-form textual metadata (debug annotations); unused by the
    /// core passes but threaded through for parity with libjit's
    /// `jit_block`, which carries a `meta` list.
    pub metadata: Option<String>,

    /// Native code address once this block has been compiled.
    pub address: Option<CodeOffset>,
}

impl BlockData {
    /// A fresh, empty, unplaced block.
    pub fn new() -> Self {
        Self {
            label: None,
            first_inst: None,
            last_inst: None,
            predecessors: BlockList::new(),
            successors: BlockList::new(),
            upward_exposed: BitSet::new(),
            var_kills: BitSet::new(),
            live_out: BitSet::new(),
            entered_via_top: false,
            entered_via_branch: false,
            ends_in_dead: false,
            pending_fixups: Vec::new(),
            metadata: None,
            address: None,
        }
    }

    /// Does the block currently have no instructions at all?
    pub fn is_empty(&self) -> bool {
        self.first_inst.is_none()
    }

    /// Reset everything the code-generation driver computes during a
    /// single emission attempt, in preparation for a cache-full restart
    /// (spec §4.7 step 7): clears the block address and any pending
    /// fix-ups, but *not* the CFG/liveness data computed by the
    /// optimizer, which remains valid across a restart.
    pub fn reset_for_restart(&mut self) {
        self.address = None;
        self.pending_fixups.clear();
    }
}

impl Default for BlockData {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_block_is_empty_and_unplaced() {
        let b = BlockData::new();
        assert!(b.is_empty());
        assert!(b.address.is_none());
    }

    #[test]
    fn restart_clears_address_but_keeps_liveness() {
        let mut b = BlockData::new();
        b.address = Some(40);
        b.live_out.set(3);
        b.pending_fixups.push(8);
        b.reset_for_restart();
        assert!(b.address.is_none());
        assert!(b.pending_fixups.is_empty());
        assert!(b.live_out.test(3), "liveness survives a restart");
    }
}
