// tests/jit.rs
//! End-to-end through the native backend.

mod common;

use anvil::{BuildError, ConstValue, JitEngine, Primitive, Signature, StructType, Type};
use common::{build, ints};

fn i64_sig(n: usize) -> Signature {
    Signature::new(
        std::iter::repeat(Primitive::I64.into()).take(n),
        Primitive::I64,
    )
}

// Iterative gcd: while (b != 0) { t = a % b; a = b; b = t }
fn gcd_ir() -> anvil::FunctionIr {
    build(i64_sig(2), |f| {
        let a = f.variable(Primitive::I64)?;
        let b = f.variable(Primitive::I64)?;
        let p0 = f.param(0)?;
        let p1 = f.param(1)?;
        f.store(a, p0)?;
        f.store(b, p1)?;
        f.while_(|f| f.ne(b, 0))?
            .do_(|f| {
                let t = f.rem(a, b)?;
                f.store(a, b)?;
                f.store(b, t)?;
                Ok(())
            })?
            .end()?;
        f.ret(a)
    })
}

#[test]
fn test_gcd_native() {
    let ir = gcd_ir();
    let mut engine = JitEngine::new().unwrap();
    let gcd = engine.compile(&ir).unwrap();
    for (a, b, expected) in [(48, 18, 6), (17, 5, 1), (0, 9, 9), (272, 119, 17)] {
        let out = unsafe { gcd.apply(&ints(&[a, b])) }.unwrap();
        assert_eq!(out, Some(ConstValue::Int(expected)));
    }
}

#[test]
fn test_fib_native() {
    // Iterative fibonacci over a counting loop.
    let ir = build(i64_sig(1), |f| {
        let n = f.param(0)?;
        let a = f.variable(Primitive::I64)?;
        let b = f.variable(Primitive::I64)?;
        let i = f.variable(Primitive::I64)?;
        f.store(a, 0)?;
        f.store(b, 1)?;
        f.store(i, 0)?;
        f.while_(|f| f.lt(i, n))?
            .do_(|f| {
                let next = f.add(a, b)?;
                f.store(a, b)?;
                f.store(b, next)?;
                let bump = f.add(i, 1)?;
                f.store(i, bump)
            })?
            .end()?;
        f.ret(a)
    });
    let mut engine = JitEngine::new().unwrap();
    let fib = engine.compile(&ir).unwrap();
    let out = unsafe { fib.apply(&ints(&[10])) }.unwrap();
    assert_eq!(out, Some(ConstValue::Int(55)));
}

#[test]
fn test_code_ptr_with_known_signature() {
    let ir = gcd_ir();
    let mut engine = JitEngine::new().unwrap();
    let compiled = engine.compile(&ir).unwrap();
    let gcd: extern "C" fn(i64, i64) -> i64 =
        unsafe { std::mem::transmute(compiled.code_ptr()) };
    assert_eq!(gcd(48, 18), 6);
}

#[test]
fn test_compiled_function_outlives_engine_handle() {
    let ir = gcd_ir();
    let compiled = {
        let mut engine = JitEngine::new().unwrap();
        engine.compile(&ir).unwrap()
    };
    let out = unsafe { compiled.apply(&ints(&[21, 14])) }.unwrap();
    assert_eq!(out, Some(ConstValue::Int(7)));
}

#[test]
fn test_many_functions_one_engine() {
    let mut engine = JitEngine::new().unwrap();
    let mut compiled = Vec::new();
    for k in 0..4i64 {
        let ir = build(i64_sig(1), move |f| {
            let p = f.param(0)?;
            let r = f.add(p, k)?;
            f.ret(r)
        });
        compiled.push(engine.compile(&ir).unwrap());
    }
    for (k, func) in compiled.iter().enumerate() {
        let out = unsafe { func.apply(&ints(&[100])) }.unwrap();
        assert_eq!(out, Some(ConstValue::Int(100 + k as i64)));
    }
}

#[test]
fn test_apply_arity_checked() {
    let ir = gcd_ir();
    let mut engine = JitEngine::new().unwrap();
    let compiled = engine.compile(&ir).unwrap();
    let err = unsafe { compiled.apply(&ints(&[1])) }.unwrap_err();
    assert!(matches!(err, BuildError::TypeMismatch { .. }));
}

#[test]
fn test_struct_member_access_native() {
    let s = StructType::new([
        ("count", Type::from(Primitive::I64)),
        ("scale", Type::from(Primitive::F64)),
    ])
    .unwrap();
    let sig = Signature::new([Primitive::I64.into()], Primitive::F64);
    let ir = build(sig, |f| {
        let inst = s.create(f)?;
        let p = f.param(0)?;
        inst.set(f, "count", p)?;
        inst.set(f, "scale", 2.5)?;
        let count = inst.get(f, "count")?;
        let scale = inst.get(f, "scale")?;
        let r = f.mul(scale, 2)?;
        let c_is_four = f.eq(count, 4)?;
        f.if_(c_is_four, |f| f.ret(r))?.end()?;
        let zero = f.constant(Primitive::F64, 0)?;
        f.ret(zero)
    });
    let mut engine = JitEngine::new().unwrap();
    let compiled = engine.compile(&ir).unwrap();
    let out = unsafe { compiled.apply(&ints(&[4])) }.unwrap();
    assert_eq!(out, Some(ConstValue::Float(5.0)));
    let out = unsafe { compiled.apply(&ints(&[3])) }.unwrap();
    assert_eq!(out, Some(ConstValue::Float(0.0)));
}
