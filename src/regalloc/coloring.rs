//! The whole-function graph-coloring register allocator.
//!
//! See spec §4.6. Grounded on libjit's `jit-graph-reg-alloc.c`'s
//! interference-graph build and simplify/select/spill loop, adapted to
//! the arena+index IR (spec §9): interference edges are kept as
//! `Vec<LiveRangeId>` neighbor lists on [`crate::live_range::LiveRangeData`]
//! rather than libjit's raw-pointer adjacency list.

use crate::entity::EntityRef;
use crate::error::{CompileError, CompileResult};
use crate::ir::{Function, LiveRangeId};
use crate::regalloc::regclass::RegClass;
use log::trace;
use std::collections::HashMap;

/// Two live ranges interfere iff (spec §4.6):
/// - they belong to the same register class, and
/// - they name different values (a value never interferes with
///   itself), and
/// - their coverage overlaps: either range is "local" (touches exactly
///   one block) and they share that block, or neither is local and
///   their `covered_blocks` sets intersect.
fn interferes(func: &Function, a: LiveRangeId, b: LiveRangeId, pointer_bytes: u32) -> bool {
    let ra = &func.live_ranges[a];
    let rb = &func.live_ranges[b];
    if ra.value == rb.value {
        return false;
    }
    let class_a = RegClass::of(&func.values[ra.value].ty, pointer_bytes);
    let class_b = RegClass::of(&func.values[rb.value].ty, pointer_bytes);
    if class_a != class_b || class_a.is_none() {
        return false;
    }
    ra.covered_blocks.intersects(&rb.covered_blocks)
}

/// The graph-coloring allocator: per-class available color counts, plus
/// the simplify/select/spill machinery operating on a function's live
/// ranges.
pub struct Coloring {
    colors_available: HashMap<RegClass, u8>,
    pointer_bytes: u32,
}

impl Coloring {
    /// Build an allocator with the given number of physical registers
    /// available per class.
    pub fn new(pointer_bytes: u32, colors_available: &[(RegClass, u8)]) -> Self {
        Self {
            colors_available: colors_available.iter().copied().collect(),
            pointer_bytes,
        }
    }

    /// Populate every live range's `neighbors` list (spec §4.6
    /// "Interference graph"). Requires
    /// [`crate::live_range::build_live_ranges`] to have already run.
    pub fn build_interference(&self, func: &mut Function) {
        let ids: Vec<LiveRangeId> = func.live_ranges.keys().collect();
        for &id in &ids {
            func.live_ranges[id].neighbors.clear();
        }
        for (i, &a) in ids.iter().enumerate() {
            for &b in &ids[i + 1..] {
                if interferes(func, a, b, self.pointer_bytes) {
                    func.live_ranges[a].neighbors.push(b);
                    func.live_ranges[b].neighbors.push(a);
                }
            }
        }
        trace!("coloring: built interference graph over {} ranges", ids.len());
    }

    /// Run simplify/select/spill to completion, assigning a color
    /// (pseudo-register) to every range that isn't fixed or ultimately
    /// spilled (spec §4.6).
    ///
    /// Ranges already `is_fixed` (a hardware constraint, e.g.
    /// `OUTGOING_REG`) keep their pre-assigned color and still
    /// participate in interference, but are never pushed onto the
    /// simplify stack.
    pub fn color(&self, func: &mut Function) -> CompileResult<()> {
        let mut remaining: Vec<LiveRangeId> = func
            .live_ranges
            .keys()
            .filter(|&id| !func.live_ranges[id].is_fixed)
            .collect();
        let mut stack = Vec::new();

        while !remaining.is_empty() {
            let mut simplifiable: Vec<LiveRangeId> = Vec::new();
            for &id in &remaining {
                let degree = func.live_ranges[id]
                    .neighbors
                    .iter()
                    .filter(|n| remaining.contains(n))
                    .count() as u8;
                if degree < self.class_limit(func, id) {
                    simplifiable.push(id);
                }
            }

            if !simplifiable.is_empty() {
                for id in simplifiable {
                    remaining.retain(|&r| r != id);
                    stack.push(id);
                }
                continue;
            }

            // No range has fewer neighbors than available colors:
            // potential spill. Pick the range with the most neighbors
            // (spec §4.6 "optimistic spill": the allocator still
            // attempts to color it on the way back down, so this is
            // only a tentative choice).
            let spill = *remaining
                .iter()
                .max_by_key(|&&id| func.live_ranges[id].neighbors.len())
                .ok_or_else(|| CompileError::CompileError("empty interference graph".into()))?;
            remaining.retain(|&r| r != spill);
            stack.push(spill);
        }

        while let Some(id) = stack.pop() {
            self.select_color(func, id)?;
        }
        Ok(())
    }

    fn class_limit(&self, func: &Function, id: LiveRangeId) -> u8 {
        let value = func.live_ranges[id].value;
        let class = RegClass::of(&func.values[value].ty, self.pointer_bytes);
        class.and_then(|c| self.colors_available.get(&c).copied()).unwrap_or(0)
    }

    fn select_color(&self, func: &mut Function, id: LiveRangeId) -> CompileResult<()> {
        let value = func.live_ranges[id].value;
        let class = RegClass::of(&func.values[value].ty, self.pointer_bytes);
        let limit = match class.and_then(|c| self.colors_available.get(&c).copied()) {
            Some(n) => n,
            None => return Ok(()), // opaque type, nothing to color
        };

        let used: Vec<u16> = func.live_ranges[id]
            .neighbors
            .iter()
            .filter(|&&n| func.live_ranges[n].is_colored() || func.live_ranges[n].is_fixed)
            .flat_map(|&n| func.live_ranges[n].colors.clone())
            .collect();

        let preferred = func.live_ranges[id].preferred_colors.clone();
        let mut candidates: Vec<u16> = (0..limit as u16).collect();
        candidates.sort_by_key(|&r| {
            let score = preferred.get(r as usize).copied().unwrap_or(0);
            std::cmp::Reverse(score)
        });

        match candidates.into_iter().find(|r| !used.contains(r)) {
            Some(reg) => {
                func.live_ranges[id].colors = vec![reg];
                trace!("coloring: range for value {} -> r{}", value.index(), reg);
                Ok(())
            }
            None => {
                func.live_ranges[id].is_spilled = true;
                trace!("coloring: spilled range for value {}", value.index());
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;
    use crate::flowgraph::compute_cfg;
    use crate::ir::{AbiTag, Opcode, Signature, Type};
    use crate::live_range::build_live_ranges;
    use crate::liveness;

    fn optimize(f: &mut Function) {
        compute_cfg(f);
        liveness::analyze(f);
        build_live_ranges(f);
    }

    #[test]
    fn disjoint_values_can_share_a_color() {
        // v0 dies before v1 is born: one color suffices.
        let mut f = Function::with_signature(Signature::new(Type::I32, vec![], AbiTag::Cdecl));
        let mut b = Builder::new(&mut f);
        let c1 = b.function_mut().make_int_const(Type::I32, 1);
        let v0 = b.unary(Opcode::INeg, Type::I32, c1);
        let _use0 = b.unary(Opcode::INeg, Type::I32, v0);
        let c2 = b.function_mut().make_int_const(Type::I32, 2);
        let v1 = b.unary(Opcode::INeg, Type::I32, c2);
        let _ret = b.ret(Some(v1));
        drop(b);

        optimize(&mut f);
        let coloring = Coloring::new(8, &[(RegClass::Word, 1)]);
        coloring.build_interference(&mut f);
        coloring.color(&mut f).unwrap();

        assert!(!f.values[v0].live_ranges.is_empty());
    }

    #[test]
    fn overlapping_live_ranges_get_distinct_colors() {
        let mut f = Function::with_signature(Signature::new(Type::I32, vec![Type::I32, Type::I32], AbiTag::Cdecl));
        let v0 = f.make_value(Type::I32);
        let v1 = f.make_value(Type::I32);
        let mut b = Builder::new(&mut f);
        let v2 = b.binary(Opcode::IAdd, Type::I32, v0, v1);
        let v3 = b.binary(Opcode::ISub, Type::I32, v0, v1);
        let _v4 = b.binary(Opcode::IMul, Type::I32, v2, v3);
        drop(b);

        optimize(&mut f);
        let coloring = Coloring::new(8, &[(RegClass::Word, 4)]);
        coloring.build_interference(&mut f);
        coloring.color(&mut f).unwrap();

        let id0 = f.values[v0].live_ranges[0];
        let id1 = f.values[v1].live_ranges[0];
        assert!(func_interferes(&f, id0, id1));
        assert_ne!(f.live_ranges[id0].colors, f.live_ranges[id1].colors);
    }

    fn func_interferes(f: &Function, a: LiveRangeId, b: LiveRangeId) -> bool {
        f.live_ranges[a].neighbors.contains(&b)
    }
}
