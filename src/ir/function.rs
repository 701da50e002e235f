//! Functions: the top-level IR container.
//!
//! See spec §3 ("Function", "Lifecycles"). A `Function` owns dense arenas
//! for its values, instructions, blocks and live ranges (arena+index
//! design, spec §9), avoiding the reference-counted cyclic graph libjit
//! expresses with raw pointers between `jit_value`/`jit_insn`/`jit_block`/
//! `jit_function`.

use crate::entity::{EntityRef, PrimaryMap};
use crate::ir::block::BlockData;
use crate::ir::instruction::InstructionData;
use crate::ir::value::ValueData;
use crate::ir::{Block, Inst, Label, LiveRangeId, Signature, Type, Value};
use crate::live_range::LiveRangeData;
use std::collections::HashMap;
use std::sync::atomic::AtomicPtr;
use std::sync::Arc;

/// Status bits tracked on a [`Function`] (spec §3).
#[derive(Clone, Debug, Default)]
pub struct FunctionStatus {
    /// Code has been generated and `entry_point` is valid.
    pub is_compiled: bool,
    /// May be compiled again (e.g. after a profiling-triggered
    /// recompile; out of scope here beyond the flag itself).
    pub is_recompilable: bool,
    /// No checked operation in this function can raise an exception.
    pub no_throw: bool,
    /// This function never returns (diverges or tail-calls forever).
    pub no_return: bool,
    /// Contains a `try`/setjmp-protected region; disables global
    /// register allocation (spec §4.7, §9 "Setjmp value").
    pub has_try: bool,
    /// The optimizer (CFG + liveness + live ranges) has already run.
    pub is_optimized: bool,
    /// Contains a tail call, which (like `has_try`) disables ordinary
    /// global register allocation and forces "all-global" touched-
    /// register handling on restart (spec §4.7 step 7).
    pub has_tail_call: bool,
}

/// The published, atomically-swappable entry point of a compiled
/// function (spec §5: "Redirectors"). `None`/null until the first
/// successful compile.
#[derive(Debug, Default)]
pub struct EntryPoint(AtomicPtr<u8>);

impl EntryPoint {
    /// A not-yet-compiled entry point.
    pub fn new() -> Self {
        Self(AtomicPtr::new(std::ptr::null_mut()))
    }

    /// Atomically read the current entry point, or `None` before the
    /// first successful compile / after a restart discarded one.
    pub fn load(&self) -> Option<*const u8> {
        let p = self.0.load(std::sync::atomic::Ordering::Acquire);
        if p.is_null() {
            None
        } else {
            Some(p as *const u8)
        }
    }

    /// Publish a new entry point (spec §5: "atomic store of `entry_point`
    /// is sufficient" for the redirector pattern).
    pub fn store(&self, ptr: *const u8) {
        self.0
            .store(ptr as *mut u8, std::sync::atomic::Ordering::Release);
    }
}

// `*mut u8` is not `Send`/`Sync` by default, but this pointer always
// refers to a page inside the context's code cache, which outlives every
// caller that can observe it (spec §3 "Lifecycles": "the code cache
// outlives the builder and is owned by the context").
unsafe impl Send for EntryPoint {}
unsafe impl Sync for EntryPoint {}

/// A JIT-compiled function (spec §3).
pub struct Function {
    /// Signature (return type, parameters, ABI).
    pub signature: Signature,

    /// Value arena.
    pub values: PrimaryMap<Value, ValueData>,
    /// Instruction arena.
    pub instructions: PrimaryMap<Inst, InstructionData>,
    /// Block arena.
    pub blocks: PrimaryMap<Block, BlockData>,
    /// Live-range arena.
    pub live_ranges: PrimaryMap<LiveRangeId, LiveRangeData>,

    /// Label -> block binding table (spec §4.1).
    pub label_blocks: HashMap<Label, Block>,
    /// Next label to allocate.
    next_label: u32,

    /// Blocks in emission order.
    pub layout: Vec<Block>,
    /// The function's single entry block, once created.
    pub entry_block: Option<Block>,
    /// The function's exit (epilogue) block, set by the driver once
    /// code generation has synthesized it.
    pub exit_block: Option<Block>,

    /// Published entry point (spec §5).
    pub entry_point: Arc<EntryPoint>,
    /// Status bits.
    pub status: FunctionStatus,

    /// A distinguished hidden value representing the `setjmp` context
    /// for a `try`/`catch` region (spec §9 "Setjmp value for try/catch
    /// blocks"), reset on every compile restart.
    pub setjmp_value: Option<Value>,
}

impl Function {
    /// A fresh, empty function with the given signature, with one empty
    /// entry block already created.
    pub fn with_signature(signature: Signature) -> Self {
        let mut f = Self {
            signature,
            values: PrimaryMap::new(),
            instructions: PrimaryMap::new(),
            blocks: PrimaryMap::new(),
            live_ranges: PrimaryMap::new(),
            label_blocks: HashMap::new(),
            next_label: 0,
            layout: Vec::new(),
            entry_block: None,
            exit_block: None,
            entry_point: Arc::new(EntryPoint::new()),
            status: FunctionStatus::default(),
            setjmp_value: None,
        };
        let entry = f.blocks.push(BlockData::new());
        f.layout.push(entry);
        f.entry_block = Some(entry);
        f
    }

    /// Allocate a fresh, unbound label.
    pub fn new_label(&mut self) -> Label {
        let l = Label::new(self.next_label as usize);
        self.next_label += 1;
        l
    }

    /// Bind `label` to `block`. Idempotent if called again with the same
    /// block.
    pub fn bind_label(&mut self, label: Label, block: Block) {
        self.label_blocks.insert(label, block);
        self.blocks[block].label = Some(label);
    }

    /// Look up the block a label is bound to, if any.
    pub fn label_block(&self, label: Label) -> Option<Block> {
        self.label_blocks.get(&label).copied()
    }

    /// Append a fresh empty block to the layout, returning its handle.
    pub fn append_block(&mut self) -> Block {
        let b = self.blocks.push(BlockData::new());
        self.layout.push(b);
        b
    }

    /// Create a fresh value of type `ty` with no location assigned.
    pub fn make_value(&mut self, ty: Type) -> Value {
        self.values.push(ValueData::new(ty))
    }

    /// Create a fresh compile-time integer constant value.
    pub fn make_int_const(&mut self, ty: Type, v: i64) -> Value {
        self.values.push(ValueData::constant_int(ty, v))
    }

    /// Create a fresh compile-time float constant value.
    pub fn make_float_const(&mut self, ty: Type, v: f64) -> Value {
        self.values.push(ValueData::constant_float(ty, v))
    }

    /// Is `v` a compile-time constant?
    pub fn value_is_constant(&self, v: Value) -> bool {
        self.values[v].is_constant
    }

    /// Allocate a fresh, empty live range for `value` and attach it to
    /// both the range arena and the value's range list.
    pub fn make_live_range(&mut self, value: Value) -> LiveRangeId {
        let id = self.live_ranges.push(LiveRangeData::new(value));
        self.values[value].live_ranges.push(id);
        id
    }

    /// Number of blocks currently in the function.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Number of real (non-entry-only) blocks: spec §8's boundary case
    /// "A function with zero blocks other than entry and exit".
    pub fn has_only_entry_exit(&self) -> bool {
        self.block_count() <= 2
    }

    /// Iterate this function's instructions in one block, in layout
    /// order, by walking the block's `first_inst..=last_inst` range over
    /// the shared instruction arena. Since instructions are appended to
    /// `self.instructions` in program order and never reordered across
    /// blocks, a block's body is exactly the contiguous index range
    /// `[first_inst, last_inst]`.
    pub fn block_insts(&self, block: Block) -> impl Iterator<Item = Inst> + '_ {
        let data = &self.blocks[block];
        let (first, last) = match (data.first_inst, data.last_inst) {
            (Some(f), Some(l)) => (f.index(), l.index()),
            _ => (1, 0), // empty range
        };
        (first..=last).filter(move |_| first <= last).map(Inst::new)
    }

    /// Reset every value's location bits and every block's emission-time
    /// state, in preparation for a cache-full restart (spec §4.7 step
    /// 7). CFG/liveness/live-range data computed by the optimizer is
    /// left untouched — only re-run if a restart also invalidates it,
    /// which it does not per spec.
    pub fn reset_locations_for_restart(&mut self, permanent_globals: &[crate::ir::value::PseudoReg]) {
        let permanent: std::collections::HashSet<_> = permanent_globals.iter().copied().collect();
        for (_v, data) in self.values.iter_mut() {
            data.in_register = false;
            data.reg = None;
            data.in_frame = false;
            if !(data.in_global_register && data.global_reg.map_or(false, |r| permanent.contains(&r))) {
                data.in_global_register = false;
                data.global_reg = None;
            }
        }
        for (_b, data) in self.blocks.iter_mut() {
            data.reset_for_restart();
        }
        self.setjmp_value = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::types::AbiTag;

    fn sig() -> Signature {
        Signature::new(Type::I32, vec![Type::I32, Type::I32], AbiTag::Cdecl)
    }

    #[test]
    fn fresh_function_has_one_entry_block() {
        let f = Function::with_signature(sig());
        assert_eq!(f.block_count(), 1);
        assert!(f.entry_block.is_some());
        assert!(f.has_only_entry_exit());
    }

    #[test]
    fn labels_are_monotone_and_bindable() {
        let mut f = Function::with_signature(sig());
        let l0 = f.new_label();
        let l1 = f.new_label();
        assert_ne!(l0, l1);
        let b = f.append_block();
        f.bind_label(l0, b);
        assert_eq!(f.label_block(l0), Some(b));
        assert_eq!(f.label_block(l1), None);
    }

    #[test]
    fn restart_clears_registers_keeps_permanent_globals() {
        let mut f = Function::with_signature(sig());
        let v = f.make_value(Type::I32);
        f.values[v].write_register(2);
        f.values[v].in_global_register = true;
        f.values[v].global_reg = Some(7);
        f.reset_locations_for_restart(&[7]);
        assert!(!f.values[v].in_register);
        assert!(f.values[v].in_global_register);
        assert_eq!(f.values[v].global_reg, Some(7));
    }
}
