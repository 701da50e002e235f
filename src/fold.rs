//! Algebraic simplification and constant folding.
//!
//! Grounded on spec §4.1 and libjit's opcode-keyed fold dispatch in
//! `examples/original_source/jit/jit-opcode-apply.c`'s `_jit_opcode_apply`/
//! `apply_opcode`: every opcode the builder can fold has an entry
//! describing *how* to fold it (a Rust closure/function here rather than
//! that file's big `switch` over opcode numbers) and an optional
//! [`FoldFlag::Not`] mirroring its `_JIT_INTRINSIC_FLAG_NOT` handling —
//! "compute the canonical condition, then logically negate the `i32`
//! result" (spec §9 open question on `FLAG_NOT`).

use crate::ir::value::ConstantValue;
use crate::ir::{CondCode, Kind, Opcode, Type};

/// How a folded result relates to the intrinsic's raw computation (spec
/// §4.1: "`FLAG_NONE` or `FLAG_NOT`").
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FoldFlag {
    /// Use the intrinsic's result unchanged.
    None,
    /// Logically negate the intrinsic's `i32` result before storing it.
    Not,
}

/// `CondCode` folds as "compute `base`, optionally negate" — every
/// comparison opcode's intrinsic is really one of six primitive
/// comparisons (signed `Eq`/`Lt`/`Gt`, unsigned `Eq`/`LtU`/`GtU`; `Eq` is
/// shared) with the rest derived by `FLAG_NOT`, mirroring libjit's table
/// where e.g. `!=` is folded as "not (`==`)" rather than its own
/// intrinsic.
fn cond_fold_plan(cc: CondCode) -> (CondCode, FoldFlag) {
    match cc {
        CondCode::Eq => (CondCode::Eq, FoldFlag::None),
        CondCode::Ne => (CondCode::Eq, FoldFlag::Not),
        CondCode::Lt => (CondCode::Lt, FoldFlag::None),
        CondCode::Ge => (CondCode::Lt, FoldFlag::Not),
        CondCode::Gt => (CondCode::Gt, FoldFlag::None),
        CondCode::Le => (CondCode::Gt, FoldFlag::Not),
        CondCode::LtU => (CondCode::LtU, FoldFlag::None),
        CondCode::GeU => (CondCode::LtU, FoldFlag::Not),
        CondCode::GtU => (CondCode::GtU, FoldFlag::None),
        CondCode::LeU => (CondCode::GtU, FoldFlag::Not),
    }
}

fn apply_flag(raw: bool, flag: FoldFlag) -> i32 {
    let v = match flag {
        FoldFlag::None => raw,
        FoldFlag::Not => !raw,
    };
    v as i32
}

/// Fold a comparison `a cc b` of type `ty` into an `i32` `0`/`1`, or
/// `None` if the opcode/type combination isn't a constant-foldable
/// comparison (never the case for the `ICmp`/`FCmp` opcodes this crate
/// defines, but kept fallible for symmetry with the other `fold_*`
/// entry points).
pub fn fold_compare(cc: CondCode, ty: &Type, a: &ConstantValue, b: &ConstantValue, pointer_bytes: u32) -> Option<i32> {
    let (base, flag) = cond_fold_plan(cc);
    let raw = if ty.kind(pointer_bytes) == Kind::Float32
        || ty.kind(pointer_bytes) == Kind::Float64
        || ty.kind(pointer_bytes) == Kind::NFloat
    {
        let (x, y) = (a.as_float(), b.as_float());
        match base {
            CondCode::Eq => x == y,
            CondCode::Lt | CondCode::LtU => x < y,
            CondCode::Gt | CondCode::GtU => x > y,
            _ => unreachable!("cond_fold_plan only emits Eq/Lt/Gt/LtU/GtU bases"),
        }
    } else {
        let unsigned = matches!(base, CondCode::LtU | CondCode::GtU) || is_unsigned(ty);
        if unsigned {
            let (x, y) = (a.as_int() as u64, b.as_int() as u64);
            match base {
                CondCode::Eq => x == y,
                CondCode::Lt | CondCode::LtU => x < y,
                CondCode::Gt | CondCode::GtU => x > y,
                _ => unreachable!(),
            }
        } else {
            let (x, y) = (a.as_int(), b.as_int());
            match base {
                CondCode::Eq => x == y,
                CondCode::Lt | CondCode::LtU => x < y,
                CondCode::Gt | CondCode::GtU => x > y,
                _ => unreachable!(),
            }
        }
    };
    Some(apply_flag(raw, flag))
}

fn is_unsigned(ty: &Type) -> bool {
    matches!(ty, Type::U8 | Type::U16 | Type::U32 | Type::U64 | Type::Ptr)
}

/// Fold a unary arithmetic/bitwise opcode over a constant operand.
pub fn fold_unary(opcode: Opcode, ty: &Type, v: &ConstantValue) -> Option<ConstantValue> {
    match opcode {
        Opcode::INeg => Some(wrap_int(ty, v.as_int().wrapping_neg())),
        Opcode::BNot => Some(wrap_int(ty, !v.as_int())),
        Opcode::FNeg => Some(ConstantValue::Float(-v.as_float())),
        _ => None,
    }
}

/// Fold a binary arithmetic/bitwise opcode over two constant operands.
/// Returns `None` for opcodes this function doesn't know how to fold
/// (e.g. calls) and for the checked-arithmetic opcodes, which the
/// builder handles via [`fold_checked`] instead since they also produce
/// a status.
pub fn fold_binary(opcode: Opcode, ty: &Type, a: &ConstantValue, b: &ConstantValue) -> Option<ConstantValue> {
    if ty.is_float() {
        let (x, y) = (a.as_float(), b.as_float());
        let r = match opcode {
            Opcode::FAdd => x + y,
            Opcode::FSub => x - y,
            Opcode::FMul => x * y,
            Opcode::FDiv => x / y,
            _ => return None,
        };
        return Some(ConstantValue::Float(r));
    }

    let unsigned = is_unsigned(ty);
    let (x, y) = (a.as_int(), b.as_int());
    let r = match opcode {
        Opcode::IAdd => x.wrapping_add(y),
        Opcode::ISub => x.wrapping_sub(y),
        Opcode::IMul => x.wrapping_mul(y),
        Opcode::IDiv => {
            if y == 0 {
                return None;
            }
            if unsigned {
                ((x as u64) / (y as u64)) as i64
            } else {
                x.wrapping_div(y)
            }
        }
        Opcode::IRem => {
            if y == 0 {
                return None;
            }
            if unsigned {
                ((x as u64) % (y as u64)) as i64
            } else {
                x.wrapping_rem(y)
            }
        }
        Opcode::BAnd => x & y,
        Opcode::BOr => x | y,
        Opcode::BXor => x ^ y,
        Opcode::Shl => x.wrapping_shl(y as u32),
        Opcode::Shr => {
            if unsigned {
                ((x as u64).wrapping_shr(y as u32)) as i64
            } else {
                x.wrapping_shr(y as u32)
            }
        }
        _ => return None,
    };
    Some(wrap_int(ty, r))
}

/// Fold an overflow-checked binary op. Returns `(result, overflowed)`;
/// spec's `i_piii` signature tag denotes "returns a status" alongside
/// the (possibly garbage when overflowed) result.
pub fn fold_checked(opcode: Opcode, ty: &Type, a: &ConstantValue, b: &ConstantValue) -> Option<(ConstantValue, bool)> {
    let unsigned = is_unsigned(ty);
    let (x, y) = (a.as_int(), b.as_int());
    let (r, overflow) = match (opcode, unsigned) {
        (Opcode::IAddOvf, false) => {
            let (r, o) = x.overflowing_add(y);
            (r, o)
        }
        (Opcode::IAddOvf, true) => {
            let (r, o) = (x as u64).overflowing_add(y as u64);
            (r as i64, o)
        }
        (Opcode::ISubOvf, false) => {
            let (r, o) = x.overflowing_sub(y);
            (r, o)
        }
        (Opcode::ISubOvf, true) => {
            let (r, o) = (x as u64).overflowing_sub(y as u64);
            (r as i64, o)
        }
        (Opcode::IMulOvf, false) => {
            let (r, o) = x.overflowing_mul(y);
            (r, o)
        }
        (Opcode::IMulOvf, true) => {
            let (r, o) = (x as u64).overflowing_mul(y as u64);
            (r as i64, o)
        }
        _ => return None,
    };
    Some((wrap_int(ty, r), overflow))
}

/// Fold a (possibly checked) conversion between two types.
pub fn fold_convert(checked: bool, from: &Type, to: &Type, v: &ConstantValue) -> Option<(ConstantValue, bool)> {
    if to.is_float() {
        return Some((ConstantValue::Float(if from.is_float() { v.as_float() } else { v.as_int() as f64 }), false));
    }
    if from.is_float() {
        let f = v.as_float();
        let truncated = f.trunc();
        let overflow = checked && (truncated != f || !int_fits(to, truncated as i64));
        return Some((wrap_int(to, truncated as i64), overflow));
    }
    let raw = v.as_int();
    let overflow = checked && !int_fits(to, raw);
    Some((wrap_int(to, raw), overflow))
}

fn int_fits(ty: &Type, v: i64) -> bool {
    match ty {
        Type::I8 => v >= i8::MIN as i64 && v <= i8::MAX as i64,
        Type::U8 => v >= 0 && v <= u8::MAX as i64,
        Type::I16 => v >= i16::MIN as i64 && v <= i16::MAX as i64,
        Type::U16 => v >= 0 && v <= u16::MAX as i64,
        Type::I32 => v >= i32::MIN as i64 && v <= i32::MAX as i64,
        Type::U32 => v >= 0 && v <= u32::MAX as i64,
        _ => true,
    }
}

fn wrap_int(ty: &Type, v: i64) -> ConstantValue {
    let wrapped = match ty {
        Type::I8 => v as i8 as i64,
        Type::U8 => v as u8 as i64,
        Type::I16 => v as i16 as i64,
        Type::U16 => v as u16 as i64,
        Type::I32 => v as i32 as i64,
        Type::U32 => v as u32 as i64,
        _ => v,
    };
    ConstantValue::Int(wrapped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_add_i32() {
        let r = fold_binary(Opcode::IAdd, &Type::I32, &ConstantValue::Int(3), &ConstantValue::Int(4)).unwrap();
        assert_eq!(r.as_int(), 7);
    }

    #[test]
    fn fold_ne_is_not_of_eq() {
        let ty = Type::I32;
        let a = ConstantValue::Int(3);
        let b = ConstantValue::Int(4);
        assert_eq!(fold_compare(CondCode::Eq, &ty, &a, &b, 8), Some(0));
        assert_eq!(fold_compare(CondCode::Ne, &ty, &a, &b, 8), Some(1));
        assert_eq!(fold_compare(CondCode::Ne, &ty, &a, &a, 8), Some(0));
    }

    #[test]
    fn unsigned_compare_respects_type() {
        let ty = Type::U32;
        let neg_one = ConstantValue::Int(-1i64);
        let one = ConstantValue::Int(1);
        // As u32, -1 is u32::MAX, so -1 > 1 unsigned.
        assert_eq!(fold_compare(CondCode::Gt, &ty, &neg_one, &one, 8), Some(1));
    }

    #[test]
    fn checked_add_detects_overflow() {
        let ty = Type::I32;
        let a = ConstantValue::Int(i32::MAX as i64);
        let b = ConstantValue::Int(1);
        let (_, overflow) = fold_checked(Opcode::IAddOvf, &ty, &a, &b).unwrap();
        assert!(overflow);
    }

    #[test]
    fn convert_checked_narrowing_detects_overflow() {
        let (_, overflow) = fold_convert(true, &Type::I32, &Type::I8, &ConstantValue::Int(200)).unwrap();
        assert!(overflow);
        let (v, overflow2) = fold_convert(true, &Type::I32, &Type::I8, &ConstantValue::Int(100)).unwrap();
        assert!(!overflow2);
        assert_eq!(v.as_int(), 100);
    }

    #[test]
    fn fold_not_cond_codes_are_involutions_of_their_base() {
        for cc in [CondCode::Ne, CondCode::Ge, CondCode::Le, CondCode::GeU, CondCode::LeU] {
            let (_base, flag) = cond_fold_plan(cc);
            assert_eq!(flag, FoldFlag::Not);
        }
        for cc in [CondCode::Eq, CondCode::Lt, CondCode::Gt, CondCode::LtU, CondCode::GtU] {
            let (_base, flag) = cond_fold_plan(cc);
            assert_eq!(flag, FoldFlag::None);
        }
    }
}
