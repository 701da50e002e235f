//! IR entity references.
//!
//! Instructions in the IR need to reference other parts of the function:
//! other instructions, basic blocks, values, live ranges. These are not
//! implemented as Rust references — the value/instruction/block/live-range
//! graph is cyclic and 64-bit pointers would bloat every instruction — but
//! as `u32`-wrapping newtypes indexing into tables owned by the owning
//! [`Function`](crate::ir::Function). See [`crate::entity`] for the shared
//! [`crate::entity::EntityRef`] machinery.

use crate::entity::entity_impl;
use std::fmt;

/// An opaque reference to a basic block in a function.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Block(u32);
entity_impl!(Block, "block");

/// An opaque reference to a value in a function.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Value(u32);
entity_impl!(Value, "v");

/// An opaque reference to an instruction in a function.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Inst(u32);
entity_impl!(Inst, "i");

/// An opaque reference to a live range.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LiveRangeId(u32);
entity_impl!(LiveRangeId, "lr");

/// A label: a monotonically-allocated integer that is bound to a block once
/// that block is emitted by the builder. Unlike `Block`, a `Label` can be
/// referenced by a branch instruction before the block it names has been
/// created, which is why the builder keeps a separate label-to-block table
/// rather than letting branch instructions carry `Block` directly.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(u32);
entity_impl!(Label, "L");

/// A reference to any of the entities defined in this module, for
/// diagnostics that need to name "the thing that's wrong" without knowing
/// which kind it is ahead of time.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub enum AnyEntity {
    /// The whole function.
    Function,
    /// A basic block.
    Block(Block),
    /// An instruction.
    Inst(Inst),
    /// A value.
    Value(Value),
    /// A live range.
    LiveRange(LiveRangeId),
}

impl fmt::Display for AnyEntity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            AnyEntity::Function => write!(f, "function"),
            AnyEntity::Block(r) => r.fmt(f),
            AnyEntity::Inst(r) => r.fmt(f),
            AnyEntity::Value(r) => r.fmt(f),
            AnyEntity::LiveRange(r) => r.fmt(f),
        }
    }
}

impl fmt::Debug for AnyEntity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        (self as &dyn fmt::Display).fmt(f)
    }
}

impl From<Block> for AnyEntity {
    fn from(r: Block) -> Self {
        AnyEntity::Block(r)
    }
}

impl From<Inst> for AnyEntity {
    fn from(r: Inst) -> Self {
        AnyEntity::Inst(r)
    }
}

impl From<Value> for AnyEntity {
    fn from(r: Value) -> Self {
        AnyEntity::Value(r)
    }
}

impl From<LiveRangeId> for AnyEntity {
    fn from(r: LiveRangeId) -> Self {
        AnyEntity::LiveRange(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityRef;

    #[test]
    fn display_uses_prefix() {
        assert_eq!(Block::new(3).to_string(), "block3");
        assert_eq!(Value::new(3).to_string(), "v3");
        assert_eq!(Inst::new(3).to_string(), "i3");
        assert_eq!(Label::new(3).to_string(), "L3");
        assert_eq!(LiveRangeId::new(3).to_string(), "lr3");
    }

    #[test]
    fn any_entity_wraps() {
        let e: AnyEntity = Value::new(1).into();
        assert_eq!(e.to_string(), "v1");
        assert_eq!(AnyEntity::Function.to_string(), "function");
    }
}
