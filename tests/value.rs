// tests/value.rs
//! Expression emitters: arithmetic, bitwise, comparison, coercion, stores.

mod common;

use anvil::{BuildError, ConstValue, FunctionBuilder, Primitive, Signature};
use common::{apply, assert_int_result, build, int_sig, ints};

// return p0 <op> p1
fn binop(
    op: impl Fn(&mut FunctionBuilder, anvil::Value, anvil::Value) -> anvil::BuildResult<anvil::Value>,
    args: &[i64],
    expected: i64,
) {
    assert_int_result(int_sig(2), args, expected, |f| {
        let a = f.param(0)?;
        let b = f.param(1)?;
        let r = op(f, a, b)?;
        f.ret(r)
    });
}

#[test]
fn test_int_add() {
    binop(|f, a, b| f.add(a, b), &[1, 2], 3);
}

#[test]
fn test_int_sub() {
    binop(|f, a, b| f.sub(a, b), &[3, 2], 1);
}

#[test]
fn test_int_mul() {
    binop(|f, a, b| f.mul(a, b), &[3, 2], 6);
}

#[test]
fn test_int_div() {
    binop(|f, a, b| f.div(a, b), &[6, 2], 3);
    binop(|f, a, b| f.div(a, b), &[-7, 2], -3);
}

#[test]
fn test_int_rem() {
    binop(|f, a, b| f.rem(a, b), &[20, 6], 2);
}

#[test]
fn test_int_bit_and() {
    binop(|f, a, b| f.bit_and(a, b), &[11, 3], 3);
    binop(|f, a, b| f.bit_and(a, b), &[8, 3], 0);
}

#[test]
fn test_int_bit_or() {
    binop(|f, a, b| f.bit_or(a, b), &[10, 3], 11);
}

#[test]
fn test_int_bit_xor() {
    binop(|f, a, b| f.bit_xor(a, b), &[10, 3], 9);
}

#[test]
fn test_int_shl() {
    binop(|f, a, b| f.shl(a, b), &[31, 2], 124);
}

#[test]
fn test_int_shr() {
    binop(|f, a, b| f.shr(a, b), &[31, 2], 7);
    // i32 is signed: arithmetic shift.
    binop(|f, a, b| f.shr(a, b), &[-8, 1], -4);
}

#[test]
fn test_int_lt() {
    binop(|f, a, b| f.lt(a, b), &[1, 2], 1);
    binop(|f, a, b| f.lt(a, b), &[2, 1], 0);
    binop(|f, a, b| f.lt(a, b), &[1, 1], 0);
}

#[test]
fn test_int_gt() {
    binop(|f, a, b| f.gt(a, b), &[1, 2], 0);
    binop(|f, a, b| f.gt(a, b), &[2, 1], 1);
}

#[test]
fn test_int_le() {
    binop(|f, a, b| f.le(a, b), &[1, 2], 1);
    binop(|f, a, b| f.le(a, b), &[2, 1], 0);
    binop(|f, a, b| f.le(a, b), &[1, 1], 1);
}

#[test]
fn test_int_ge() {
    binop(|f, a, b| f.ge(a, b), &[1, 2], 0);
    binop(|f, a, b| f.ge(a, b), &[2, 1], 1);
    binop(|f, a, b| f.ge(a, b), &[1, 1], 1);
}

#[test]
fn test_int_eq() {
    binop(|f, a, b| f.eq(a, b), &[1, 2], 0);
    binop(|f, a, b| f.eq(a, b), &[1, 1], 1);
}

#[test]
fn test_int_ne() {
    binop(|f, a, b| f.ne(a, b), &[1, 2], 1);
    binop(|f, a, b| f.ne(a, b), &[1, 1], 0);
}

#[test]
fn test_neg() {
    assert_int_result(int_sig(1), &[5], -5, |f| {
        let p = f.param(0)?;
        let r = f.neg(p)?;
        f.ret(r)
    });
}

#[test]
fn test_not_is_bitwise_complement() {
    assert_int_result(int_sig(1), &[0], -1, |f| {
        let p = f.param(0)?;
        let r = f.not(p)?;
        f.ret(r)
    });
}

#[test]
fn test_store_roundtrip() {
    assert_int_result(int_sig(0), &[], 42, |f| {
        let v = f.variable(Primitive::I32)?;
        let c = f.constant(Primitive::I32, 42)?;
        f.store(v, c)?;
        f.ret(v)
    });
}

#[test]
fn test_store_coerces_bare_literal() {
    assert_int_result(int_sig(0), &[], 7, |f| {
        let v = f.variable(Primitive::I32)?;
        f.store(v, 7)?;
        f.ret(v)
    });
}

#[test]
fn test_literal_promotes_to_float_operand() {
    let sig = Signature::new([Primitive::F64.into()], Primitive::F64);
    let ir = build(sig, |f| {
        let p = f.param(0)?;
        let r = f.mul(p, 2)?;
        f.ret(r)
    });
    assert_eq!(
        apply(&ir, &[ConstValue::Float(1.5)]),
        Some(ConstValue::Float(3.0))
    );
}

#[test]
fn test_float_arithmetic() {
    let sig = Signature::new(
        [Primitive::F64.into(), Primitive::F64.into()],
        Primitive::F64,
    );
    let ir = build(sig, |f| {
        let a = f.param(0)?;
        let b = f.param(1)?;
        let sum = f.add(a, b)?;
        let prod = f.mul(sum, b)?;
        f.ret(prod)
    });
    assert_eq!(
        apply(&ir, &[ConstValue::Float(1.0), ConstValue::Float(2.0)]),
        Some(ConstValue::Float(6.0))
    );
}

#[test]
fn test_float_comparison_yields_int() {
    let sig = Signature::new(
        [Primitive::F64.into(), Primitive::F64.into()],
        Primitive::I32,
    );
    let ir = build(sig, |f| {
        let a = f.param(0)?;
        let b = f.param(1)?;
        let r = f.lt(a, b)?;
        f.ret(r)
    });
    assert_eq!(
        apply(&ir, &[ConstValue::Float(1.0), ConstValue::Float(2.0)]),
        Some(ConstValue::Int(1))
    );
    assert_eq!(
        apply(&ir, &[ConstValue::Float(2.0), ConstValue::Float(1.0)]),
        Some(ConstValue::Int(0))
    );
}

#[test]
fn test_float_rem_truncates_like_fmod() {
    let sig = Signature::new(
        [Primitive::F64.into(), Primitive::F64.into()],
        Primitive::F64,
    );
    let ir = build(sig, |f| {
        let a = f.param(0)?;
        let b = f.param(1)?;
        let r = f.rem(a, b)?;
        f.ret(r)
    });
    assert_eq!(
        apply(&ir, &[ConstValue::Float(7.5), ConstValue::Float(2.0)]),
        Some(ConstValue::Float(1.5))
    );
}

#[test]
fn test_unsigned_division() {
    let sig = Signature::new(
        [Primitive::U32.into(), Primitive::U32.into()],
        Primitive::U32,
    );
    let ir = build(sig, |f| {
        let a = f.param(0)?;
        let b = f.param(1)?;
        let q = f.div(a, b)?;
        f.ret(q)
    });
    // 0xFFFF_FFFE / 2 unsigned, not -1 / 2.
    assert_eq!(
        apply(&ir, &ints(&[0xFFFF_FFFE, 2])),
        Some(ConstValue::Int(0x7FFF_FFFF))
    );
}

#[test]
fn test_address_of_then_load() {
    assert_int_result(int_sig(0), &[], 41, |f| {
        let v = f.variable(Primitive::I32)?;
        f.store(v, 41)?;
        let p = f.address_of(v)?;
        let loaded = f.load_relative(p, 0, Primitive::I32)?;
        f.ret(loaded)
    });
}

#[test]
fn test_two_bare_literals_rejected() {
    let mut f = FunctionBuilder::new(int_sig(0)).unwrap();
    assert!(matches!(
        f.add(1, 2).unwrap_err(),
        BuildError::AmbiguousLiteral
    ));
}

#[test]
fn test_mixed_operand_types_rejected() {
    let sig = Signature::new(
        [Primitive::I32.into(), Primitive::F64.into()],
        Primitive::I32,
    );
    let mut f = FunctionBuilder::new(sig).unwrap();
    let a = f.param(0).unwrap();
    let b = f.param(1).unwrap();
    assert!(matches!(
        f.add(a, b).unwrap_err(),
        BuildError::TypeMismatch { .. }
    ));
}

#[test]
fn test_i8_roundtrip_through_variable() {
    let sig = Signature::new([Primitive::I8.into()], Primitive::I8);
    let ir = build(sig, |f| {
        let v = f.variable(Primitive::I8)?;
        let p = f.param(0)?;
        f.store(v, p)?;
        f.ret(v)
    });
    assert_eq!(apply(&ir, &ints(&[-7])), Some(ConstValue::Int(-7)));
}

#[test]
fn test_void_return() {
    let sig = Signature::new([Primitive::I32.into()], Primitive::Void);
    let ir = build(sig, |f| f.ret_void());
    assert_eq!(apply(&ir, &ints(&[1])), None);
}
