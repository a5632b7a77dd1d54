// src/interp.rs
//! Reference interpreter.
//!
//! Executes a sealed [`FunctionIr`] directly, without involving the native
//! backend. Variables live in a real, aligned stack frame and `address_of`
//! hands out genuine addresses, so wrapped pointers and offset-relative
//! access behave byte-for-byte like compiled code. The test suites run
//! against this engine; it doubles as the executable description of the
//! IR's semantics.

use std::alloc::{self, Layout};
use std::ptr;

use crate::errors::{BuildError, BuildResult};
use crate::ir::{BinOp, ConstValue, FunctionIr, Insn, SlotKind, UnOp, ValueId};
use crate::types::Primitive;

/// Run a function. Arguments are matched against the signature (integer
/// literals promote to float parameters). Returns `None` for void
/// functions.
///
/// # Safety
///
/// The function may load from and store to raw addresses it computed;
/// wrapping bad pointers or indexing past real storage is undefined
/// behavior, exactly as it would be for the natively compiled function.
pub unsafe fn run(ir: &FunctionIr, args: &[ConstValue]) -> BuildResult<Option<ConstValue>> {
    let mut interp = Interp::new(ir)?;
    interp.bind_args(args)?;
    interp.exec()
}

/// Stack frame for the storage slots (parameters and variables).
struct Frame {
    base: *mut u8,
    layout: Option<Layout>,
}

impl Frame {
    fn alloc(size: usize, align: usize) -> BuildResult<Frame> {
        if size == 0 {
            return Ok(Frame {
                base: ptr::NonNull::<u8>::dangling().as_ptr(),
                layout: None,
            });
        }
        let layout = Layout::from_size_align(size, align)
            .map_err(|e| BuildError::backend(format!("frame layout: {e}")))?;
        // Zeroed so reads of uninitialized variables are merely undefined
        // in value, not in behavior.
        let base = unsafe { alloc::alloc_zeroed(layout) };
        if base.is_null() {
            return Err(BuildError::backend("frame allocation failed"));
        }
        Ok(Frame {
            base,
            layout: Some(layout),
        })
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        if let Some(layout) = self.layout {
            unsafe { alloc::dealloc(self.base, layout) };
        }
    }
}

struct Interp<'a> {
    ir: &'a FunctionIr,
    frame: Frame,
    /// Frame offset per slot; `None` for constants and temporaries.
    offsets: Vec<Option<usize>>,
    /// Current value per temporary slot.
    regs: Vec<ConstValue>,
    labels: Vec<usize>,
}

impl<'a> Interp<'a> {
    fn new(ir: &'a FunctionIr) -> BuildResult<Interp<'a>> {
        let mut offsets = Vec::with_capacity(ir.slots.len());
        let mut cursor = 0usize;
        let mut align = 8usize;
        for slot in &ir.slots {
            if slot.is_storage() {
                let a = slot.ty.align().max(1) as usize;
                let size = slot.ty.size() as usize;
                cursor = (cursor + a - 1) & !(a - 1);
                offsets.push(Some(cursor));
                cursor += size;
                align = align.max(a);
            } else {
                offsets.push(None);
            }
        }
        let frame = Frame::alloc(cursor, align)?;
        Ok(Interp {
            ir,
            frame,
            offsets,
            regs: vec![ConstValue::Int(0); ir.slots.len()],
            labels: ir.label_positions(),
        })
    }

    fn bind_args(&mut self, args: &[ConstValue]) -> BuildResult<()> {
        let params = self.ir.signature().params();
        if args.len() != params.len() {
            return Err(BuildError::type_mismatch(
                "apply",
                format!("{} argument(s)", params.len()),
                format!("{}", args.len()),
            ));
        }
        for (index, (ty, arg)) in params.iter().zip(args).enumerate() {
            let prim = ty
                .as_primitive()
                .ok_or_else(|| BuildError::internal("aggregate parameter slot"))?;
            let coerced = match (prim, *arg) {
                (p, ConstValue::Int(v)) if p.is_integer() || p == Primitive::Ptr => {
                    ConstValue::Int(v)
                }
                (p, v) if p.is_float() => ConstValue::Float(v.as_float()),
                (p, v) => {
                    return Err(BuildError::type_mismatch(
                        "apply argument",
                        p.to_string(),
                        format!("{v:?}"),
                    ))
                }
            };
            unsafe { self.write_slot(ValueId(index as u32), coerced) }?;
        }
        Ok(())
    }

    fn exec(&mut self) -> BuildResult<Option<ConstValue>> {
        let insns = self.ir.insns();
        let mut pc = 0usize;
        while pc < insns.len() {
            match &insns[pc] {
                Insn::Place { .. } => {}
                Insn::Jump { target } => {
                    pc = self.labels[target.0 as usize];
                    continue;
                }
                Insn::BranchIf { cond, target } => {
                    if unsafe { self.read_slot(*cond) }?.is_truthy() {
                        pc = self.labels[target.0 as usize];
                        continue;
                    }
                }
                Insn::BranchIfNot { cond, target } => {
                    if !unsafe { self.read_slot(*cond) }?.is_truthy() {
                        pc = self.labels[target.0 as usize];
                        continue;
                    }
                }
                Insn::Binary { op, dst, lhs, rhs } => {
                    let a = unsafe { self.read_slot(*lhs) }?;
                    let b = unsafe { self.read_slot(*rhs) }?;
                    let prim = self.slot_prim(*lhs)?;
                    let result = eval_binary(*op, prim, a, b)?;
                    unsafe { self.write_slot(*dst, result) }?;
                }
                Insn::Unary { op, dst, src } => {
                    let v = unsafe { self.read_slot(*src) }?;
                    let prim = self.slot_prim(*src)?;
                    let result = eval_unary(*op, prim, v);
                    unsafe { self.write_slot(*dst, result) }?;
                }
                Insn::Store { dst, src } => {
                    let v = unsafe { self.read_slot(*src) }?;
                    unsafe { self.write_slot(*dst, v) }?;
                }
                Insn::LoadRelative { dst, base, offset } => {
                    let base = unsafe { self.read_slot(*base) }?.as_int();
                    let prim = self.slot_prim(*dst)?;
                    let addr = (base + offset) as *const u8;
                    let v = unsafe { read_mem(addr, prim) };
                    unsafe { self.write_slot(*dst, v) }?;
                }
                Insn::StoreRelative { base, offset, src } => {
                    let addr = (unsafe { self.read_slot(*base) }?.as_int() + offset) as *mut u8;
                    let prim = self.slot_prim(*src)?;
                    let v = unsafe { self.read_slot(*src) }?;
                    unsafe { write_mem(addr, prim, v) };
                }
                Insn::AddressOf { dst, src } => {
                    let offset = self.offsets[src.0 as usize]
                        .ok_or_else(|| BuildError::internal("address of non-storage slot"))?;
                    let addr = unsafe { self.frame.base.add(offset) } as i64;
                    unsafe { self.write_slot(*dst, ConstValue::Int(addr)) }?;
                }
                Insn::Return { value } => {
                    return match value {
                        Some(v) => Ok(Some(unsafe { self.read_slot(*v) }?)),
                        None => Ok(None),
                    };
                }
            }
            pc += 1;
        }
        // Fell off the end: the engine's defined fallback is a zero return.
        Ok(default_return(self.ir))
    }

    fn slot_prim(&self, id: ValueId) -> BuildResult<Primitive> {
        self.ir
            .slot(id)
            .ty
            .as_primitive()
            .ok_or_else(|| BuildError::internal("aggregate value in scalar position"))
    }

    unsafe fn read_slot(&self, id: ValueId) -> BuildResult<ConstValue> {
        let slot = self.ir.slot(id);
        match slot.kind {
            SlotKind::Const { value } => Ok(value),
            SlotKind::Temp => Ok(self.regs[id.0 as usize]),
            SlotKind::Param { .. } | SlotKind::Var => {
                let prim = self.slot_prim(id)?;
                let offset = self.offsets[id.0 as usize]
                    .ok_or_else(|| BuildError::internal("storage slot without frame offset"))?;
                Ok(read_mem(self.frame.base.add(offset), prim))
            }
        }
    }

    unsafe fn write_slot(&mut self, id: ValueId, v: ConstValue) -> BuildResult<()> {
        let slot = self.ir.slot(id);
        match slot.kind {
            SlotKind::Const { .. } => Err(BuildError::internal("store into constant slot")),
            SlotKind::Temp => {
                self.regs[id.0 as usize] = v;
                Ok(())
            }
            SlotKind::Param { .. } | SlotKind::Var => {
                let prim = self.slot_prim(id)?;
                let offset = self.offsets[id.0 as usize]
                    .ok_or_else(|| BuildError::internal("storage slot without frame offset"))?;
                write_mem(self.frame.base.add(offset), prim, v);
                Ok(())
            }
        }
    }
}

fn default_return(ir: &FunctionIr) -> Option<ConstValue> {
    let ret = ir.signature().ret();
    if ret.is_void() {
        None
    } else if ret.as_primitive().map(Primitive::is_float).unwrap_or(false) {
        Some(ConstValue::Float(0.0))
    } else {
        Some(ConstValue::Int(0))
    }
}

/// Re-normalize an integer to its machine width: truncate, then sign- or
/// zero-extend back into the i64 carrier.
fn normalize(p: Primitive, v: i64) -> i64 {
    match p {
        Primitive::I8 => v as i8 as i64,
        Primitive::U8 => v as u8 as i64,
        Primitive::I16 => v as i16 as i64,
        Primitive::U16 => v as u16 as i64,
        Primitive::I32 => v as i32 as i64,
        Primitive::U32 => v as u32 as i64,
        Primitive::I64 | Primitive::U64 | Primitive::Ptr => v,
        _ => v,
    }
}

fn bits(p: Primitive) -> u32 {
    p.size() * 8
}

fn eval_binary(op: BinOp, p: Primitive, a: ConstValue, b: ConstValue) -> BuildResult<ConstValue> {
    if p.is_float() {
        let (x, y) = (a.as_float(), b.as_float());
        let r = match op {
            BinOp::Add => x + y,
            BinOp::Sub => x - y,
            BinOp::Mul => x * y,
            BinOp::Div => x / y,
            BinOp::Rem => x % y,
            BinOp::Eq => return Ok(ConstValue::Int((x == y) as i64)),
            BinOp::Ne => return Ok(ConstValue::Int((x != y) as i64)),
            BinOp::Lt => return Ok(ConstValue::Int((x < y) as i64)),
            BinOp::Le => return Ok(ConstValue::Int((x <= y) as i64)),
            BinOp::Gt => return Ok(ConstValue::Int((x > y) as i64)),
            BinOp::Ge => return Ok(ConstValue::Int((x >= y) as i64)),
            _ => return Err(BuildError::internal("bitwise opcode on float operands")),
        };
        let r = if p == Primitive::F32 { r as f32 as f64 } else { r };
        return Ok(ConstValue::Float(r));
    }

    let (x, y) = (a.as_int(), b.as_int());
    let signed = p.is_signed() || p == Primitive::Ptr;
    let r = match op {
        BinOp::Add => x.wrapping_add(y),
        BinOp::Sub => x.wrapping_sub(y),
        BinOp::Mul => x.wrapping_mul(y),
        BinOp::Div => {
            if y == 0 {
                return Err(BuildError::backend("division by zero in interpreted code"));
            }
            if signed {
                x.wrapping_div(y)
            } else {
                ((x as u64) / (y as u64)) as i64
            }
        }
        BinOp::Rem => {
            if y == 0 {
                return Err(BuildError::backend("division by zero in interpreted code"));
            }
            if signed {
                x.wrapping_rem(y)
            } else {
                ((x as u64) % (y as u64)) as i64
            }
        }
        BinOp::BitAnd => x & y,
        BinOp::BitOr => x | y,
        BinOp::BitXor => x ^ y,
        BinOp::Shl => x.wrapping_shl(y as u32 & (bits(p) - 1)),
        BinOp::Shr => {
            let s = y as u32 & (bits(p) - 1);
            if p.is_signed() {
                x.wrapping_shr(s)
            } else {
                ((x as u64).wrapping_shr(s)) as i64
            }
        }
        BinOp::Eq => return Ok(ConstValue::Int((x == y) as i64)),
        BinOp::Ne => return Ok(ConstValue::Int((x != y) as i64)),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let r = if p.is_signed() {
                match op {
                    BinOp::Lt => x < y,
                    BinOp::Le => x <= y,
                    BinOp::Gt => x > y,
                    _ => x >= y,
                }
            } else {
                let (ux, uy) = (x as u64, y as u64);
                match op {
                    BinOp::Lt => ux < uy,
                    BinOp::Le => ux <= uy,
                    BinOp::Gt => ux > uy,
                    _ => ux >= uy,
                }
            };
            return Ok(ConstValue::Int(r as i64));
        }
    };
    Ok(ConstValue::Int(normalize(p, r)))
}

fn eval_unary(op: UnOp, p: Primitive, v: ConstValue) -> ConstValue {
    match op {
        UnOp::Neg => {
            if p.is_float() {
                ConstValue::Float(-v.as_float())
            } else {
                ConstValue::Int(normalize(p, v.as_int().wrapping_neg()))
            }
        }
        UnOp::Not => ConstValue::Int(normalize(p, !v.as_int())),
    }
}

unsafe fn read_mem(addr: *const u8, p: Primitive) -> ConstValue {
    match p {
        Primitive::I8 => ConstValue::Int(ptr::read_unaligned(addr as *const i8) as i64),
        Primitive::U8 => ConstValue::Int(ptr::read_unaligned(addr) as i64),
        Primitive::I16 => ConstValue::Int(ptr::read_unaligned(addr as *const i16) as i64),
        Primitive::U16 => ConstValue::Int(ptr::read_unaligned(addr as *const u16) as i64),
        Primitive::I32 => ConstValue::Int(ptr::read_unaligned(addr as *const i32) as i64),
        Primitive::U32 => ConstValue::Int(ptr::read_unaligned(addr as *const u32) as i64),
        Primitive::I64 | Primitive::U64 | Primitive::Ptr => {
            ConstValue::Int(ptr::read_unaligned(addr as *const i64))
        }
        Primitive::F32 => ConstValue::Float(ptr::read_unaligned(addr as *const f32) as f64),
        Primitive::F64 => ConstValue::Float(ptr::read_unaligned(addr as *const f64)),
        Primitive::Void => ConstValue::Int(0),
    }
}

unsafe fn write_mem(addr: *mut u8, p: Primitive, v: ConstValue) {
    match p {
        Primitive::I8 | Primitive::U8 => ptr::write_unaligned(addr, v.as_int() as u8),
        Primitive::I16 | Primitive::U16 => {
            ptr::write_unaligned(addr as *mut u16, v.as_int() as u16)
        }
        Primitive::I32 | Primitive::U32 => {
            ptr::write_unaligned(addr as *mut u32, v.as_int() as u32)
        }
        Primitive::I64 | Primitive::U64 | Primitive::Ptr => {
            ptr::write_unaligned(addr as *mut i64, v.as_int())
        }
        Primitive::F32 => ptr::write_unaligned(addr as *mut f32, v.as_float() as f32),
        Primitive::F64 => ptr::write_unaligned(addr as *mut f64, v.as_float()),
        Primitive::Void => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::FunctionBuilder;
    use crate::ir::Signature;

    fn int2(ret: Primitive) -> FunctionBuilder {
        FunctionBuilder::new(Signature::new(
            [Primitive::I32.into(), Primitive::I32.into()],
            ret,
        ))
        .unwrap()
    }

    #[test]
    fn test_add_params() {
        let mut f = int2(Primitive::I32);
        let a = f.param(0).unwrap();
        let b = f.param(1).unwrap();
        let sum = f.add(a, b).unwrap();
        f.ret(sum).unwrap();
        let ir = f.seal().unwrap();
        let out = unsafe { run(&ir, &[ConstValue::Int(2), ConstValue::Int(3)]) }.unwrap();
        assert_eq!(out, Some(ConstValue::Int(5)));
    }

    #[test]
    fn test_narrow_arithmetic_wraps() {
        let mut f = FunctionBuilder::new(Signature::new(
            [Primitive::U8.into(), Primitive::U8.into()],
            Primitive::U8,
        ))
        .unwrap();
        let a = f.param(0).unwrap();
        let b = f.param(1).unwrap();
        let sum = f.add(a, b).unwrap();
        f.ret(sum).unwrap();
        let ir = f.seal().unwrap();
        let out = unsafe { run(&ir, &[ConstValue::Int(200), ConstValue::Int(100)]) }.unwrap();
        assert_eq!(out, Some(ConstValue::Int(44)));
    }

    #[test]
    fn test_division_by_zero_reports() {
        let mut f = int2(Primitive::I32);
        let a = f.param(0).unwrap();
        let b = f.param(1).unwrap();
        let q = f.div(a, b).unwrap();
        f.ret(q).unwrap();
        let ir = f.seal().unwrap();
        let err = unsafe { run(&ir, &[ConstValue::Int(1), ConstValue::Int(0)]) }.unwrap_err();
        assert!(matches!(err, BuildError::Backend(_)));
    }

    #[test]
    fn test_unsigned_comparison() {
        let mut f = FunctionBuilder::new(Signature::new(
            [Primitive::U32.into(), Primitive::U32.into()],
            Primitive::I32,
        ))
        .unwrap();
        let a = f.param(0).unwrap();
        let b = f.param(1).unwrap();
        let lt = f.lt(a, b).unwrap();
        f.ret(lt).unwrap();
        let ir = f.seal().unwrap();
        // 0xFFFF_FFFF as unsigned is the max, not -1.
        let out =
            unsafe { run(&ir, &[ConstValue::Int(0xFFFF_FFFF), ConstValue::Int(1)]) }.unwrap();
        assert_eq!(out, Some(ConstValue::Int(0)));
    }

    #[test]
    fn test_wrong_arity_rejected() {
        let mut f = int2(Primitive::I32);
        let a = f.param(0).unwrap();
        f.ret(a).unwrap();
        let ir = f.seal().unwrap();
        assert!(unsafe { run(&ir, &[ConstValue::Int(1)]) }.is_err());
    }

    #[test]
    fn test_variable_store_and_address() {
        let mut f = int2(Primitive::I32);
        let v = f.variable(Primitive::I32).unwrap();
        f.store(v, 41).unwrap();
        let p = f.address_of(v).unwrap();
        let loaded = f.load_relative(p, 0, Primitive::I32).unwrap();
        let out = f.add(loaded, 1).unwrap();
        f.ret(out).unwrap();
        let ir = f.seal().unwrap();
        let out = unsafe { run(&ir, &[ConstValue::Int(0), ConstValue::Int(0)]) }.unwrap();
        assert_eq!(out, Some(ConstValue::Int(42)));
    }
}
