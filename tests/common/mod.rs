// tests/common/mod.rs
//! Shared build-and-apply helpers for the integration suites.

#![allow(dead_code)]

use anvil::{
    BuildResult, ConstValue, FunctionBuilder, FunctionIr, JitEngine, Primitive, Signature,
};

/// Build a function, panicking on construction errors.
pub fn build(
    sig: Signature,
    body: impl FnOnce(&mut FunctionBuilder) -> BuildResult<()>,
) -> FunctionIr {
    let mut f = FunctionBuilder::new(sig).expect("signature rejected");
    body(&mut f).expect("construction failed");
    f.seal().expect("seal failed")
}

/// Run through the reference interpreter.
pub fn interp(ir: &FunctionIr, args: &[ConstValue]) -> Option<ConstValue> {
    unsafe { anvil::interp::run(ir, args) }.expect("interpretation failed")
}

/// Run through the native backend.
pub fn jit(ir: &FunctionIr, args: &[ConstValue]) -> Option<ConstValue> {
    let mut engine = JitEngine::new().expect("jit engine unavailable");
    let compiled = engine.compile(ir).expect("compilation failed");
    unsafe { compiled.apply(args) }.expect("native call failed")
}

/// Run through both engines and insist they agree.
pub fn apply(ir: &FunctionIr, args: &[ConstValue]) -> Option<ConstValue> {
    let a = interp(ir, args);
    let b = jit(ir, args);
    assert_eq!(a, b, "interpreter and native backend disagree");
    a
}

/// Signature with `n` i32 parameters returning i32.
pub fn int_sig(n: usize) -> Signature {
    Signature::new(
        std::iter::repeat(Primitive::I32.into()).take(n),
        Primitive::I32,
    )
}

pub fn ints(args: &[i64]) -> Vec<ConstValue> {
    args.iter().map(|&v| ConstValue::Int(v)).collect()
}

/// Build, apply on both engines, and compare against an expected integer.
pub fn assert_int_result(
    sig: Signature,
    args: &[i64],
    expected: i64,
    body: impl FnOnce(&mut FunctionBuilder) -> BuildResult<()>,
) {
    let ir = build(sig, body);
    assert_eq!(apply(&ir, &ints(args)), Some(ConstValue::Int(expected)));
}
