//! The type system.
//!
//! Every [`Value`](super::Value) and every [`AbiParam`] carries a [`Type`].
//! Types are normalized kinds with a known size/alignment, used by the
//! builder for constant folding, by liveness to exclude constants, and by
//! the register allocators' type-compatibility matrix (spec §4.6: "a 32-bit
//! int range does not interfere with an f64 range because they cannot share
//! a physical register").

use std::fmt;

/// A normalized IR type.
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Type {
    /// 8-bit signed integer.
    I8,
    /// 8-bit unsigned integer.
    U8,
    /// 16-bit signed integer.
    I16,
    /// 16-bit unsigned integer.
    U16,
    /// 32-bit signed integer.
    I32,
    /// 32-bit unsigned integer.
    U32,
    /// 64-bit signed integer.
    I64,
    /// 64-bit unsigned integer.
    U64,
    /// IEEE single precision float.
    F32,
    /// IEEE double precision float.
    F64,
    /// Native extended-precision float (e.g. x87 80-bit). Distinct from
    /// `F64` because some targets carry extra mantissa bits in registers
    /// that are lost on a store to a `f64`-sized frame slot.
    NFloat,
    /// A pointer-sized integer.
    Ptr,
    /// No value (used for instructions with no destination).
    Void,
    /// A function signature (used only for `SigRef`-typed operands).
    Signature(Box<Signature>),
    /// A struct, with the layout of each field baked into `size`/`align`.
    Struct { size: u32, align: u32 },
    /// A union, similarly pre-sized.
    Union { size: u32, align: u32 },
    /// A tagged type: an arbitrary user-defined "kind" number wrapping an
    /// existing representation type (libjit's `jit_type_create_tagged`,
    /// used for boxed/GC-managed values that carry a type tag alongside
    /// their native representation). Size, alignment and register class
    /// all pass through to `inner` — the tag is metadata the optimizer
    /// never inspects, only the (out of scope) runtime that owns the
    /// tag numbering does.
    Tagged { tag: i32, inner: Box<Type> },
}

/// Coarse dispatch kind for a [`Type`]. Two types share a `Kind` iff they
/// would be handled identically by the opcode tables and the register
/// allocators' type-compatibility matrix.
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    /// `I8`/`U8`/`I16`/`U16`/`I32`/`U32` and `Ptr` on 32-bit targets.
    Word,
    /// `I64`/`U64` and `Ptr` on 64-bit targets.
    Long,
    /// `F32`.
    Float32,
    /// `F64`.
    Float64,
    /// `NFloat`.
    NFloat,
    /// Struct/union/void/signature: never held in a plain register.
    Opaque,
}

impl Type {
    /// Size in bytes of a value of this type.
    pub fn size(&self, pointer_bytes: u32) -> u32 {
        match self {
            Type::I8 | Type::U8 => 1,
            Type::I16 | Type::U16 => 2,
            Type::I32 | Type::U32 => 4,
            Type::I64 | Type::U64 => 8,
            Type::F32 => 4,
            Type::F64 => 8,
            Type::NFloat => 16,
            Type::Ptr => pointer_bytes,
            Type::Void => 0,
            Type::Signature(_) => pointer_bytes,
            Type::Struct { size, .. } | Type::Union { size, .. } => *size,
            Type::Tagged { inner, .. } => inner.size(pointer_bytes),
        }
    }

    /// Required alignment in bytes.
    pub fn align(&self, pointer_bytes: u32) -> u32 {
        match self {
            Type::Struct { align, .. } | Type::Union { align, .. } => *align,
            Type::Tagged { inner, .. } => inner.align(pointer_bytes),
            _ => self.size(pointer_bytes).max(1),
        }
    }

    /// The dispatch [`Kind`] for this type, given the target's pointer
    /// width.
    pub fn kind(&self, pointer_bytes: u32) -> Kind {
        match self {
            Type::I8
            | Type::U8
            | Type::I16
            | Type::U16
            | Type::I32
            | Type::U32 => Kind::Word,
            Type::I64 | Type::U64 => Kind::Long,
            Type::Ptr => {
                if pointer_bytes == 8 {
                    Kind::Long
                } else {
                    Kind::Word
                }
            }
            Type::F32 => Kind::Float32,
            Type::F64 => Kind::Float64,
            Type::NFloat => Kind::NFloat,
            Type::Void | Type::Signature(_) | Type::Struct { .. } | Type::Union { .. } => {
                Kind::Opaque
            }
            Type::Tagged { inner, .. } => inner.kind(pointer_bytes),
        }
    }

    /// Is this an integer type (any width, signed or unsigned)?
    pub fn is_integer(&self) -> bool {
        match self {
            Type::I8
            | Type::U8
            | Type::I16
            | Type::U16
            | Type::I32
            | Type::U32
            | Type::I64
            | Type::U64
            | Type::Ptr => true,
            Type::Tagged { inner, .. } => inner.is_integer(),
            _ => false,
        }
    }

    /// Is this a floating-point type (`F32`/`F64`/`NFloat`)?
    pub fn is_float(&self) -> bool {
        match self {
            Type::F32 | Type::F64 | Type::NFloat => true,
            Type::Tagged { inner, .. } => inner.is_float(),
            _ => false,
        }
    }

    /// Does a value of this type require two pseudo-registers (a register
    /// pair) on a 32-bit target? True for 64-bit integers when the target's
    /// pointer width is 4 bytes.
    pub fn needs_long_pair(&self, pointer_bytes: u32) -> bool {
        match self {
            Type::I64 | Type::U64 => pointer_bytes == 4,
            Type::Tagged { inner, .. } => inner.needs_long_pair(pointer_bytes),
            _ => false,
        }
    }

    /// Is this a struct or union?
    pub fn is_aggregate(&self) -> bool {
        match self {
            Type::Struct { .. } | Type::Union { .. } => true,
            Type::Tagged { inner, .. } => inner.is_aggregate(),
            _ => false,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Type::I8 => write!(f, "i8"),
            Type::U8 => write!(f, "u8"),
            Type::I16 => write!(f, "i16"),
            Type::U16 => write!(f, "u16"),
            Type::I32 => write!(f, "i32"),
            Type::U32 => write!(f, "u32"),
            Type::I64 => write!(f, "i64"),
            Type::U64 => write!(f, "u64"),
            Type::F32 => write!(f, "f32"),
            Type::F64 => write!(f, "f64"),
            Type::NFloat => write!(f, "nfloat"),
            Type::Ptr => write!(f, "ptr"),
            Type::Void => write!(f, "void"),
            Type::Signature(_) => write!(f, "signature"),
            Type::Struct { size, .. } => write!(f, "struct({})", size),
            Type::Union { size, .. } => write!(f, "union({})", size),
            Type::Tagged { tag, inner } => write!(f, "tagged({}, {})", tag, inner),
        }
    }
}

/// The calling-convention tag carried by a [`Signature`].
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AbiTag {
    /// The platform's standard C calling convention.
    Cdecl,
    /// Callee pops its own arguments (x86 `stdcall`).
    Stdcall,
    /// First arguments passed in registers (x86 `fastcall`).
    Fastcall,
    /// A variable-argument call site/signature.
    Vararg,
}

/// A formal parameter or return value's type, used inside a [`Signature`].
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AbiParam {
    /// The parameter's IR type.
    pub value_type: Type,
}

impl AbiParam {
    /// Construct a new parameter of the given type.
    pub fn new(value_type: Type) -> Self {
        Self { value_type }
    }
}

/// The full signature of a function: return type, parameter types, and ABI.
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Signature {
    /// Return type.
    pub return_type: AbiParam,
    /// Parameter types, in declaration order.
    pub params: Vec<AbiParam>,
    /// The calling convention this signature is compiled against.
    pub abi: AbiTag,
}

impl Signature {
    /// Build a new signature.
    pub fn new(return_type: Type, params: Vec<Type>, abi: AbiTag) -> Self {
        Self {
            return_type: AbiParam::new(return_type),
            params: params.into_iter().map(AbiParam::new).collect(),
            abi,
        }
    }

    /// Is the return type passed via a hidden pointer parameter rather than
    /// in registers? True iff the return type is a struct/union whose size
    /// doesn't fit the ABI's register return area (two pointer-sized
    /// registers, conservatively).
    pub fn returns_via_pointer(&self, pointer_bytes: u32) -> bool {
        match &self.return_type.value_type {
            Type::Struct { size, .. } | Type::Union { size, .. } => *size > 2 * pointer_bytes,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_and_kinds_64bit() {
        assert_eq!(Type::I32.size(8), 4);
        assert_eq!(Type::I64.size(8), 8);
        assert_eq!(Type::Ptr.size(8), 8);
        assert_eq!(Type::Ptr.kind(8), Kind::Long);
        assert_eq!(Type::Ptr.kind(4), Kind::Word);
        assert_eq!(Type::F64.kind(8), Kind::Float64);
    }

    #[test]
    fn long_pair_only_on_32_bit() {
        assert!(Type::I64.needs_long_pair(4));
        assert!(!Type::I64.needs_long_pair(8));
        assert!(!Type::I32.needs_long_pair(4));
    }

    #[test]
    fn return_via_pointer_large_struct() {
        let big = Signature::new(
            Type::Struct {
                size: 64,
                align: 8,
            },
            vec![],
            AbiTag::Cdecl,
        );
        assert!(big.returns_via_pointer(8));

        let small = Signature::new(
            Type::Struct { size: 8, align: 8 },
            vec![],
            AbiTag::Cdecl,
        );
        assert!(!small.returns_via_pointer(8));
    }

    #[test]
    fn tagged_delegates_to_inner() {
        let t = Type::Tagged {
            tag: 42,
            inner: Box::new(Type::I64),
        };
        assert_eq!(t.size(8), 8);
        assert_eq!(t.kind(8), Kind::Long);
        assert!(t.is_integer());
        assert!(!t.is_float());
        assert!(t.needs_long_pair(4));
        assert_eq!(t.to_string(), "tagged(42, i64)");
    }
}
