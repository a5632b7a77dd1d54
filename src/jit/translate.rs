// src/jit/translate.rs
//! Linear label/branch IR to Cranelift IR.
//!
//! The IR's control flow is a flat instruction stream with labels; Cranelift
//! wants basic blocks. Each label gets a block up front. Placing a label
//! jumps into its block (an explicit fallthrough edge), a conditional branch
//! splits off a fresh continuation block, and instructions emitted after a
//! terminator land in an unreachable scratch block rather than tripping the
//! frontend.
//!
//! Scalar slots become frontend `Variable`s. Slots whose address is taken,
//! and aggregate variables, become explicit stack slots so `address_of` has
//! a real address to hand out.

use cranelift::codegen::ir::StackSlot;
use cranelift::prelude::*;
use rustc_hash::FxHashSet;

use crate::errors::{BuildError, BuildResult};
use crate::ir::{BinOp, ConstValue, FunctionIr, Insn, SlotKind, UnOp, ValueId};
use crate::types as ty;

/// Where a slot's current value lives during translation.
#[derive(Clone, Copy)]
enum SlotBinding {
    Register(Variable),
    Stack(StackSlot),
}

pub(crate) struct FunctionTranslator<'a> {
    ir: &'a FunctionIr,
    ptr_type: Type,
    blocks: Vec<Block>,
    bindings: Vec<SlotBinding>,
    /// Whether the current block already ends in a terminator.
    terminated: bool,
}

impl<'a> FunctionTranslator<'a> {
    pub(crate) fn translate(
        builder: &mut FunctionBuilder,
        ir: &'a FunctionIr,
        ptr_type: Type,
    ) -> BuildResult<()> {
        let mut tr = FunctionTranslator {
            ir,
            ptr_type,
            blocks: Vec::new(),
            bindings: Vec::new(),
            terminated: false,
        };
        tr.prologue(builder)?;
        for insn in ir.insns() {
            tr.translate_insn(builder, insn)?;
        }
        if !tr.terminated {
            tr.default_return(builder)?;
        }
        Ok(())
    }

    fn prologue(&mut self, builder: &mut FunctionBuilder) -> BuildResult<()> {
        for _ in 0..self.ir.label_count() {
            self.blocks.push(builder.create_block());
        }

        let entry_block = builder.create_block();
        builder.append_block_params_for_function_params(entry_block);
        builder.switch_to_block(entry_block);

        // Slots that need real memory: aggregates, and anything whose
        // address is taken.
        let mut addressed = FxHashSet::default();
        for insn in self.ir.insns() {
            if let Insn::AddressOf { src, .. } = insn {
                addressed.insert(src.0);
            }
        }

        for (i, slot) in self.ir.slots.iter().enumerate() {
            let needs_memory =
                slot.is_storage() && (slot.ty.is_aggregate() || addressed.contains(&(i as u32)));
            if needs_memory {
                let size = slot.ty.size().max(1);
                let align_shift = slot.ty.align().max(1).trailing_zeros() as u8;
                let ss = builder.create_sized_stack_slot(StackSlotData::new(
                    StackSlotKind::ExplicitSlot,
                    size,
                    align_shift,
                ));
                self.bindings.push(SlotBinding::Stack(ss));
            } else {
                let clif_ty = self.scalar_type(&slot.ty)?;
                let var = builder.declare_var(clif_ty);
                // Zero-define up front so every use is dominated by a
                // definition, whatever path the branches take. Reads of
                // uninitialized variables see zero, like the interpreter's
                // zeroed frame.
                let zero = if clif_ty == types::F32 {
                    builder.ins().f32const(0.0)
                } else if clif_ty == types::F64 {
                    builder.ins().f64const(0.0)
                } else {
                    builder.ins().iconst(clif_ty, 0)
                };
                builder.def_var(var, zero);
                self.bindings.push(SlotBinding::Register(var));
            }
        }

        // Bind parameters and materialize constants.
        let params = builder.block_params(entry_block).to_vec();
        for (i, slot) in self.ir.slots.iter().enumerate() {
            match slot.kind {
                SlotKind::Param { index } => {
                    let value = params[index as usize];
                    self.write(builder, ValueId(i as u32), value)?;
                }
                SlotKind::Const { value } => {
                    let clif_ty = self.scalar_type(&slot.ty)?;
                    let v = self.materialize_const(builder, clif_ty, value);
                    self.write(builder, ValueId(i as u32), v)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn translate_insn(&mut self, builder: &mut FunctionBuilder, insn: &Insn) -> BuildResult<()> {
        if let Insn::Place { label } = insn {
            let block = self.blocks[label.0 as usize];
            if !self.terminated {
                builder.ins().jump(block, &[]);
            }
            builder.switch_to_block(block);
            self.terminated = false;
            return Ok(());
        }

        self.ensure_open(builder);
        match insn {
            Insn::Place { .. } => unreachable!("handled above"),
            Insn::Jump { target } => {
                builder.ins().jump(self.blocks[target.0 as usize], &[]);
                self.terminated = true;
            }
            Insn::BranchIf { cond, target } => {
                let c = self.read(builder, *cond)?;
                let then_block = self.blocks[target.0 as usize];
                let cont_block = builder.create_block();
                builder.ins().brif(c, then_block, &[], cont_block, &[]);
                builder.switch_to_block(cont_block);
            }
            Insn::BranchIfNot { cond, target } => {
                let c = self.read(builder, *cond)?;
                let else_block = self.blocks[target.0 as usize];
                let cont_block = builder.create_block();
                builder.ins().brif(c, cont_block, &[], else_block, &[]);
                builder.switch_to_block(cont_block);
            }
            Insn::Binary { op, dst, lhs, rhs } => {
                let a = self.read(builder, *lhs)?;
                let b = self.read(builder, *rhs)?;
                let prim = self.slot_prim(*lhs)?;
                let v = self.lower_binary(builder, *op, prim, a, b)?;
                self.write(builder, *dst, v)?;
            }
            Insn::Unary { op, dst, src } => {
                let x = self.read(builder, *src)?;
                let prim = self.slot_prim(*src)?;
                let v = match (op, prim.is_float()) {
                    (UnOp::Neg, true) => builder.ins().fneg(x),
                    (UnOp::Neg, false) => builder.ins().ineg(x),
                    (UnOp::Not, _) => builder.ins().bnot(x),
                };
                self.write(builder, *dst, v)?;
            }
            Insn::Store { dst, src } => {
                let v = self.read(builder, *src)?;
                self.write(builder, *dst, v)?;
            }
            Insn::LoadRelative { dst, base, offset } => {
                let addr = self.read(builder, *base)?;
                let offset = checked_offset(*offset)?;
                let clif_ty = self.scalar_type(&self.ir.slot(*dst).ty)?;
                let v = builder.ins().load(clif_ty, MemFlags::new(), addr, offset);
                self.write(builder, *dst, v)?;
            }
            Insn::StoreRelative { base, offset, src } => {
                let addr = self.read(builder, *base)?;
                let offset = checked_offset(*offset)?;
                let v = self.read(builder, *src)?;
                builder.ins().store(MemFlags::new(), v, addr, offset);
            }
            Insn::AddressOf { dst, src } => {
                let SlotBinding::Stack(ss) = self.bindings[src.0 as usize] else {
                    return Err(BuildError::internal("address of register-bound slot"));
                };
                let v = builder.ins().stack_addr(self.ptr_type, ss, 0);
                self.write(builder, *dst, v)?;
            }
            Insn::Return { value } => {
                match value {
                    Some(v) => {
                        let v = self.read(builder, *v)?;
                        builder.ins().return_(&[v]);
                    }
                    None => {
                        builder.ins().return_(&[]);
                    }
                }
                self.terminated = true;
            }
        }
        Ok(())
    }

    // After a terminator, further instructions (dead code in the source
    // description) go into a fresh unreachable block.
    fn ensure_open(&mut self, builder: &mut FunctionBuilder) {
        if self.terminated {
            let block = builder.create_block();
            builder.switch_to_block(block);
            self.terminated = false;
        }
    }

    fn lower_binary(
        &mut self,
        builder: &mut FunctionBuilder,
        op: BinOp,
        prim: ty::Primitive,
        a: Value,
        b: Value,
    ) -> BuildResult<Value> {
        if prim.is_float() {
            let v = match op {
                BinOp::Add => builder.ins().fadd(a, b),
                BinOp::Sub => builder.ins().fsub(a, b),
                BinOp::Mul => builder.ins().fmul(a, b),
                BinOp::Div => builder.ins().fdiv(a, b),
                // fmod(a, b) = a - trunc(a / b) * b
                BinOp::Rem => {
                    let q = builder.ins().fdiv(a, b);
                    let t = builder.ins().trunc(q);
                    let m = builder.ins().fmul(t, b);
                    builder.ins().fsub(a, m)
                }
                BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                    let cc = float_cc(op);
                    let flag = builder.ins().fcmp(cc, a, b);
                    return Ok(builder.ins().uextend(types::I32, flag));
                }
                _ => return Err(BuildError::internal("bitwise opcode on float operands")),
            };
            return Ok(v);
        }

        let signed = prim.is_signed();
        let v = match op {
            BinOp::Add => builder.ins().iadd(a, b),
            BinOp::Sub => builder.ins().isub(a, b),
            BinOp::Mul => builder.ins().imul(a, b),
            BinOp::Div => {
                if signed {
                    builder.ins().sdiv(a, b)
                } else {
                    builder.ins().udiv(a, b)
                }
            }
            BinOp::Rem => {
                if signed {
                    builder.ins().srem(a, b)
                } else {
                    builder.ins().urem(a, b)
                }
            }
            BinOp::BitAnd => builder.ins().band(a, b),
            BinOp::BitOr => builder.ins().bor(a, b),
            BinOp::BitXor => builder.ins().bxor(a, b),
            BinOp::Shl => builder.ins().ishl(a, b),
            BinOp::Shr => {
                if signed {
                    builder.ins().sshr(a, b)
                } else {
                    builder.ins().ushr(a, b)
                }
            }
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                let cc = int_cc(op, signed);
                let flag = builder.ins().icmp(cc, a, b);
                return Ok(builder.ins().uextend(types::I32, flag));
            }
        };
        Ok(v)
    }

    fn default_return(&mut self, builder: &mut FunctionBuilder) -> BuildResult<()> {
        let ret = self.ir.signature().ret();
        if ret.is_void() {
            builder.ins().return_(&[]);
            return Ok(());
        }
        let prim = ret
            .as_primitive()
            .ok_or_else(|| BuildError::internal("aggregate return type"))?;
        let clif_ty = self.scalar_type(ret)?;
        let zero = if prim.is_float() {
            self.materialize_const(builder, clif_ty, ConstValue::Float(0.0))
        } else {
            builder.ins().iconst(clif_ty, 0)
        };
        builder.ins().return_(&[zero]);
        Ok(())
    }

    fn materialize_const(
        &mut self,
        builder: &mut FunctionBuilder,
        clif_ty: Type,
        value: ConstValue,
    ) -> Value {
        match value {
            ConstValue::Float(v) if clif_ty == types::F32 => builder.ins().f32const(v as f32),
            ConstValue::Float(v) => builder.ins().f64const(v),
            ConstValue::Int(v) => {
                // iconst immediates must be the sign-extended form of the
                // truncated value for narrow types.
                let imm = if clif_ty == types::I8 {
                    v as i8 as i64
                } else if clif_ty == types::I16 {
                    v as i16 as i64
                } else if clif_ty == types::I32 {
                    v as i32 as i64
                } else {
                    v
                };
                builder.ins().iconst(clif_ty, imm)
            }
        }
    }

    fn read(&mut self, builder: &mut FunctionBuilder, id: ValueId) -> BuildResult<Value> {
        let clif_ty = self.scalar_type(&self.ir.slot(id).ty)?;
        match self.bindings[id.0 as usize] {
            SlotBinding::Register(var) => Ok(builder.use_var(var)),
            SlotBinding::Stack(ss) => Ok(builder.ins().stack_load(clif_ty, ss, 0)),
        }
    }

    fn write(&mut self, builder: &mut FunctionBuilder, id: ValueId, v: Value) -> BuildResult<()> {
        match self.bindings[id.0 as usize] {
            SlotBinding::Register(var) => {
                builder.def_var(var, v);
                Ok(())
            }
            SlotBinding::Stack(ss) => {
                builder.ins().stack_store(v, ss, 0);
                Ok(())
            }
        }
    }

    fn slot_prim(&self, id: ValueId) -> BuildResult<ty::Primitive> {
        self.ir
            .slot(id)
            .ty
            .as_primitive()
            .ok_or_else(|| BuildError::internal("aggregate value in scalar position"))
    }

    fn scalar_type(&self, t: &ty::Type) -> BuildResult<Type> {
        let prim = t
            .as_primitive()
            .ok_or_else(|| BuildError::unsupported("aggregate value in a register"))?;
        prim_to_clif(prim, self.ptr_type)
            .ok_or_else(|| BuildError::unsupported("void-typed value"))
    }
}

pub(crate) fn prim_to_clif(p: ty::Primitive, ptr_type: Type) -> Option<Type> {
    match p {
        ty::Primitive::I8 | ty::Primitive::U8 => Some(types::I8),
        ty::Primitive::I16 | ty::Primitive::U16 => Some(types::I16),
        ty::Primitive::I32 | ty::Primitive::U32 => Some(types::I32),
        ty::Primitive::I64 | ty::Primitive::U64 => Some(types::I64),
        ty::Primitive::F32 => Some(types::F32),
        ty::Primitive::F64 => Some(types::F64),
        ty::Primitive::Ptr => Some(ptr_type),
        ty::Primitive::Void => None,
    }
}

fn int_cc(op: BinOp, signed: bool) -> IntCC {
    match (op, signed) {
        (BinOp::Eq, _) => IntCC::Equal,
        (BinOp::Ne, _) => IntCC::NotEqual,
        (BinOp::Lt, true) => IntCC::SignedLessThan,
        (BinOp::Lt, false) => IntCC::UnsignedLessThan,
        (BinOp::Le, true) => IntCC::SignedLessThanOrEqual,
        (BinOp::Le, false) => IntCC::UnsignedLessThanOrEqual,
        (BinOp::Gt, true) => IntCC::SignedGreaterThan,
        (BinOp::Gt, false) => IntCC::UnsignedGreaterThan,
        (BinOp::Ge, true) => IntCC::SignedGreaterThanOrEqual,
        (BinOp::Ge, false) => IntCC::UnsignedGreaterThanOrEqual,
        _ => unreachable!("not a comparison opcode"),
    }
}

fn float_cc(op: BinOp) -> FloatCC {
    match op {
        BinOp::Eq => FloatCC::Equal,
        BinOp::Ne => FloatCC::NotEqual,
        BinOp::Lt => FloatCC::LessThan,
        BinOp::Le => FloatCC::LessThanOrEqual,
        BinOp::Gt => FloatCC::GreaterThan,
        BinOp::Ge => FloatCC::GreaterThanOrEqual,
        _ => unreachable!("not a comparison opcode"),
    }
}

fn checked_offset(offset: i64) -> BuildResult<i32> {
    i32::try_from(offset)
        .map_err(|_| BuildError::unsupported("relative offset beyond 32 bits"))
}
