//! Native code emission bookkeeping: the bytecode-offset map and the
//! forward-branch fix-up protocol.
//!
//! See spec §4.7/§4.8 and §6 ("Label protocol"). The actual per-
//! instruction instruction selection lives in the target-specific
//! [`crate::codegen::Backend`] implementation (out of scope for this
//! crate, spec "Non-goals": "per-ISA instruction encoders"); this
//! module only provides the offset bookkeeping every backend needs.

pub mod offset_map;

pub use offset_map::{OffsetEntry, OffsetMap};

use crate::ir::block::CodeOffset;
use crate::ir::Label;
use std::collections::HashMap;

/// Patch a 4-byte little-endian PC-relative displacement at
/// `fixup_offset` in `buffer`, so that it points at `target_offset`
/// (spec §6: "A backend's branch encoding leaves a 4-byte placeholder
/// and records the offset; once the label resolves, the driver patches
/// every pending placeholder to a PC-relative displacement").
///
/// The displacement is relative to the first byte *after* the 4-byte
/// placeholder (`fixup_offset + 4`), the usual convention for a direct
/// `jmp rel32`-style encoding.
pub fn patch_relative32(buffer: &mut [u8], fixup_offset: CodeOffset, target_offset: CodeOffset) {
    let rel = target_offset as i64 - (fixup_offset as i64 + 4);
    let rel = rel as i32;
    let at = fixup_offset as usize;
    buffer[at..at + 4].copy_from_slice(&rel.to_le_bytes());
}

/// Tracks, for every label not yet bound to a known native offset, the
/// list of placeholder locations that need patching once it resolves
/// (spec glossary "Fix-up list").
#[derive(Default, Debug)]
pub struct FixupList {
    pending: HashMap<Label, Vec<CodeOffset>>,
}

impl FixupList {
    /// A fresh, empty fix-up list.
    pub fn new() -> Self {
        Self { pending: HashMap::new() }
    }

    /// Record that a branch encoded at `placeholder_offset` still needs
    /// to be patched to point at `label`, because `label`'s target
    /// block hasn't been emitted yet.
    pub fn record(&mut self, label: Label, placeholder_offset: CodeOffset) {
        self.pending.entry(label).or_insert_with(Vec::new).push(placeholder_offset);
    }

    /// Is there at least one placeholder still waiting on `label`?
    pub fn has_pending(&self, label: Label) -> bool {
        self.pending.get(&label).map_or(false, |v| !v.is_empty())
    }

    /// `label`'s target address is now known: patch every placeholder
    /// recorded against it and forget them.
    pub fn resolve(&mut self, buffer: &mut [u8], label: Label, target_offset: CodeOffset) {
        if let Some(offsets) = self.pending.remove(&label) {
            for offset in offsets {
                patch_relative32(buffer, offset, target_offset);
            }
        }
    }

    /// Labels with no binding by the time code generation finished
    /// (spec §6: "a label referenced by a branch but never bound is a
    /// compile-time error", surfaced by the driver as
    /// [`crate::error::CompileError::CompileError`]).
    pub fn unresolved_labels(&self) -> Vec<Label> {
        self.pending
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(&l, _)| l)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityRef;

    #[test]
    fn patch_relative32_writes_correct_displacement() {
        let mut buf = vec![0u8; 16];
        patch_relative32(&mut buf, 4, 20);
        let rel = i32::from_le_bytes(buf[4..8].try_into().unwrap());
        assert_eq!(rel, 20 - 8);
    }

    #[test]
    fn fixup_list_resolves_all_pending_placeholders() {
        let mut list = FixupList::new();
        let label = Label::new(0);
        list.record(label, 0);
        list.record(label, 10);
        assert!(list.has_pending(label));

        let mut buf = vec![0u8; 32];
        list.resolve(&mut buf, label, 100);
        assert!(!list.has_pending(label));
        assert!(list.unresolved_labels().is_empty());
    }

    #[test]
    fn unbound_label_is_reported_unresolved() {
        let mut list = FixupList::new();
        let label = Label::new(3);
        list.record(label, 0);
        assert_eq!(list.unresolved_labels(), vec![label]);
    }
}
