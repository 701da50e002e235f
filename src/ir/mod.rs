//! The intermediate representation: types, values, instructions, blocks
//! and functions (spec §3).

pub mod block;
pub mod entities;
pub mod function;
pub mod instruction;
pub mod types;
pub mod value;

pub use block::BlockData;
pub use entities::{AnyEntity, Block, Inst, Label, LiveRangeId, Value};
pub use function::{EntryPoint, Function, FunctionStatus};
pub use instruction::{BranchInfo, CondCode, InstExtra, InstructionData, Opcode, OperandFlags};
pub use types::{AbiParam, AbiTag, Kind, Signature, Type};
pub use value::{ConstantValue, PseudoReg, ValueData};
