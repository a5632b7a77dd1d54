// src/function.rs
//! The function-construction session.
//!
//! A [`FunctionBuilder`] owns the append-only instruction sequence and the
//! tables behind every [`Value`] and [`Label`] handed out during one
//! function's construction. Emitters append exactly one instruction each;
//! nothing is reordered or optimized here. [`FunctionBuilder::seal`]
//! verifies label discipline and yields the immutable [`FunctionIr`] for an
//! engine to consume.
//!
//! Construction is single-threaded and synchronous: bodies of control-flow
//! constructs run inline (see `control.rs`), and the only deferred semantics
//! anywhere is forward label placement.

use std::sync::atomic::{AtomicU32, Ordering};

use tracing::debug;

use crate::control::LoopFrame;
use crate::errors::{BuildError, BuildResult};
use crate::ir::{
    BinOp, ConstValue, FunctionIr, Insn, LabelId, Signature, SlotInfo, SlotKind, UnOp, ValueId,
};
use crate::types::{Primitive, Type};
use crate::value::{Operand, Value};

static NEXT_SESSION: AtomicU32 = AtomicU32::new(0);

/// An opaque branch target. Created unbound; placed exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label {
    pub(crate) id: LabelId,
    pub(crate) owner: u32,
}

/// Builder session for a single function.
pub struct FunctionBuilder {
    pub(crate) token: u32,
    sig: Signature,
    slots: Vec<SlotInfo>,
    insns: Vec<Insn>,
    /// Placement position per label; `None` until placed.
    labels: Vec<Option<u32>>,
    pub(crate) loops: Vec<LoopFrame>,
}

impl FunctionBuilder {
    /// Start constructing a function with the given signature. Parameters
    /// and return type must be scalar (or void return); aggregates are
    /// passed by pointer in this convention.
    pub fn new(sig: Signature) -> BuildResult<FunctionBuilder> {
        for ty in sig.params() {
            if ty.as_primitive().map_or(true, |p| p == Primitive::Void) {
                return Err(BuildError::type_mismatch(
                    "signature parameter",
                    "scalar type",
                    ty.to_string(),
                ));
            }
        }
        if !sig.ret().is_void() && sig.ret().as_primitive().is_none() {
            return Err(BuildError::type_mismatch(
                "signature return",
                "scalar type or void",
                sig.ret().to_string(),
            ));
        }

        let token = NEXT_SESSION.fetch_add(1, Ordering::Relaxed);
        let slots = sig
            .params()
            .iter()
            .enumerate()
            .map(|(index, ty)| SlotInfo {
                kind: SlotKind::Param {
                    index: index as u32,
                },
                ty: ty.clone(),
            })
            .collect();
        Ok(FunctionBuilder {
            token,
            sig,
            slots,
            insns: Vec::new(),
            labels: Vec::new(),
            loops: Vec::new(),
        })
    }

    pub fn signature(&self) -> &Signature {
        &self.sig
    }

    /// The `index`-th parameter, as an initialized variable slot.
    pub fn param(&self, index: u32) -> BuildResult<Value> {
        if index as usize >= self.sig.params().len() {
            return Err(BuildError::NoSuchParam {
                index,
                count: self.sig.params().len() as u32,
            });
        }
        Ok(Value {
            id: ValueId(index),
            owner: self.token,
        })
    }

    /// A typed constant. No instruction is emitted; the literal is pooled in
    /// the slot table. Integer literals promote to float types; the reverse
    /// direction is a type error.
    pub fn constant(
        &mut self,
        ty: impl Into<Type>,
        value: impl Into<ConstValue>,
    ) -> BuildResult<Value> {
        let ty = ty.into();
        let value = self.check_literal(&ty, value.into())?;
        Ok(self.push_slot(SlotKind::Const { value }, ty))
    }

    /// An uninitialized variable slot. Reading before the first store is
    /// undefined; this layer does not check it.
    pub fn variable(&mut self, ty: impl Into<Type>) -> BuildResult<Value> {
        let ty = ty.into();
        if ty.is_void() {
            return Err(BuildError::type_mismatch(
                "variable",
                "sized type",
                ty.to_string(),
            ));
        }
        Ok(self.push_slot(SlotKind::Var, ty))
    }

    /// Type of an existing value.
    pub fn type_of(&self, v: Value) -> BuildResult<Type> {
        let id = self.use_value(v)?;
        Ok(self.slots[id.0 as usize].ty.clone())
    }

    // ---- stores and addresses -------------------------------------------

    /// Coerce `source` to `target`'s type and emit a store. Constants are
    /// not storable; parameters, variables, and instruction results are.
    pub fn store(&mut self, target: Value, source: impl Into<Operand>) -> BuildResult<()> {
        let dst = self.use_value(target)?;
        let dst_ty = self.slots[dst.0 as usize].ty.clone();
        if let SlotKind::Const { .. } = self.slots[dst.0 as usize].kind {
            return Err(BuildError::type_mismatch(
                "store target",
                "variable slot",
                "constant",
            ));
        }
        if dst_ty.is_aggregate() {
            return Err(BuildError::unsupported("aggregate copy by store"));
        }
        let src = self.coerce_operand(source.into(), &dst_ty, "store")?.id;
        self.insns.push(Insn::Store { dst, src });
        Ok(())
    }

    /// Address of a variable or parameter slot, as a typed pointer value.
    /// Constants and instruction results have no storage to take the
    /// address of.
    pub fn address_of(&mut self, v: Value) -> BuildResult<Value> {
        let src = self.use_value(v)?;
        let slot = &self.slots[src.0 as usize];
        if !slot.is_storage() {
            return Err(BuildError::type_mismatch(
                "address_of",
                "variable slot",
                match slot.kind {
                    SlotKind::Const { .. } => "constant",
                    _ => "instruction result",
                },
            ));
        }
        let ty = Type::pointer(slot.ty.clone());
        let dst = self.push_slot(SlotKind::Temp, ty);
        self.insns.push(Insn::AddressOf { dst: dst.id, src });
        Ok(dst)
    }

    /// Typed load from `base + offset` bytes.
    pub fn load_relative(
        &mut self,
        base: Value,
        offset: i64,
        ty: impl Into<Type>,
    ) -> BuildResult<Value> {
        let base = self.pointer_operand(base, "load_relative base")?;
        let ty = ty.into();
        if ty.as_primitive().map_or(true, |p| p == Primitive::Void) {
            return Err(BuildError::unsupported("aggregate load"));
        }
        let dst = self.push_slot(SlotKind::Temp, ty);
        let dst_id = dst.id;
        self.insns.push(Insn::LoadRelative {
            dst: dst_id,
            base,
            offset,
        });
        Ok(dst)
    }

    /// Store `src` at `base + offset` bytes.
    pub fn store_relative(&mut self, base: Value, offset: i64, src: Value) -> BuildResult<()> {
        let base = self.pointer_operand(base, "store_relative base")?;
        let src = self.use_value(src)?;
        if self.slots[src.0 as usize].ty.as_primitive().is_none() {
            return Err(BuildError::unsupported("aggregate store"));
        }
        self.insns.push(Insn::StoreRelative { base, offset, src });
        Ok(())
    }

    // ---- arithmetic, bitwise, comparison --------------------------------

    pub fn add(&mut self, a: impl Into<Operand>, b: impl Into<Operand>) -> BuildResult<Value> {
        self.binary(BinOp::Add, a.into(), b.into())
    }

    pub fn sub(&mut self, a: impl Into<Operand>, b: impl Into<Operand>) -> BuildResult<Value> {
        self.binary(BinOp::Sub, a.into(), b.into())
    }

    pub fn mul(&mut self, a: impl Into<Operand>, b: impl Into<Operand>) -> BuildResult<Value> {
        self.binary(BinOp::Mul, a.into(), b.into())
    }

    pub fn div(&mut self, a: impl Into<Operand>, b: impl Into<Operand>) -> BuildResult<Value> {
        self.binary(BinOp::Div, a.into(), b.into())
    }

    pub fn rem(&mut self, a: impl Into<Operand>, b: impl Into<Operand>) -> BuildResult<Value> {
        self.binary(BinOp::Rem, a.into(), b.into())
    }

    pub fn bit_and(&mut self, a: impl Into<Operand>, b: impl Into<Operand>) -> BuildResult<Value> {
        self.binary(BinOp::BitAnd, a.into(), b.into())
    }

    pub fn bit_or(&mut self, a: impl Into<Operand>, b: impl Into<Operand>) -> BuildResult<Value> {
        self.binary(BinOp::BitOr, a.into(), b.into())
    }

    pub fn bit_xor(&mut self, a: impl Into<Operand>, b: impl Into<Operand>) -> BuildResult<Value> {
        self.binary(BinOp::BitXor, a.into(), b.into())
    }

    pub fn shl(&mut self, a: impl Into<Operand>, b: impl Into<Operand>) -> BuildResult<Value> {
        self.binary(BinOp::Shl, a.into(), b.into())
    }

    pub fn shr(&mut self, a: impl Into<Operand>, b: impl Into<Operand>) -> BuildResult<Value> {
        self.binary(BinOp::Shr, a.into(), b.into())
    }

    pub fn lt(&mut self, a: impl Into<Operand>, b: impl Into<Operand>) -> BuildResult<Value> {
        self.binary(BinOp::Lt, a.into(), b.into())
    }

    pub fn le(&mut self, a: impl Into<Operand>, b: impl Into<Operand>) -> BuildResult<Value> {
        self.binary(BinOp::Le, a.into(), b.into())
    }

    pub fn gt(&mut self, a: impl Into<Operand>, b: impl Into<Operand>) -> BuildResult<Value> {
        self.binary(BinOp::Gt, a.into(), b.into())
    }

    pub fn ge(&mut self, a: impl Into<Operand>, b: impl Into<Operand>) -> BuildResult<Value> {
        self.binary(BinOp::Ge, a.into(), b.into())
    }

    pub fn eq(&mut self, a: impl Into<Operand>, b: impl Into<Operand>) -> BuildResult<Value> {
        self.binary(BinOp::Eq, a.into(), b.into())
    }

    pub fn ne(&mut self, a: impl Into<Operand>, b: impl Into<Operand>) -> BuildResult<Value> {
        self.binary(BinOp::Ne, a.into(), b.into())
    }

    /// Arithmetic negation.
    pub fn neg(&mut self, v: Value) -> BuildResult<Value> {
        let src = self.use_value(v)?;
        let ty = self.slots[src.0 as usize].ty.clone();
        self.numeric_primitive(&ty, "neg")?;
        let dst = self.push_slot(SlotKind::Temp, ty);
        self.insns.push(Insn::Unary {
            op: UnOp::Neg,
            dst: dst.id,
            src,
        });
        Ok(dst)
    }

    /// Bitwise complement. Integer operands only.
    pub fn not(&mut self, v: Value) -> BuildResult<Value> {
        let src = self.use_value(v)?;
        let ty = self.slots[src.0 as usize].ty.clone();
        match ty.as_primitive() {
            Some(p) if p.is_integer() => {}
            _ => {
                return Err(BuildError::type_mismatch(
                    "not",
                    "integer operand",
                    ty.to_string(),
                ))
            }
        }
        let dst = self.push_slot(SlotKind::Temp, ty);
        self.insns.push(Insn::Unary {
            op: UnOp::Not,
            dst: dst.id,
            src,
        });
        Ok(dst)
    }

    // ---- label/branch primitives ----------------------------------------

    /// A fresh, unbound label. Every label created must be placed exactly
    /// once before the session seals.
    pub fn new_label(&mut self) -> Label {
        let id = LabelId(self.labels.len() as u32);
        self.labels.push(None);
        Label {
            id,
            owner: self.token,
        }
    }

    /// Bind `label` to the current instruction position.
    pub fn place_label(&mut self, label: Label) -> BuildResult<()> {
        let id = self.use_label(label)?;
        let at = self.insns.len() as u32;
        match &mut self.labels[id.0 as usize] {
            Some(_) => Err(BuildError::LabelRedefined),
            slot => {
                *slot = Some(at);
                self.insns.push(Insn::Place { label: id });
                Ok(())
            }
        }
    }

    /// Unconditional branch. Forward references are fine.
    pub fn branch(&mut self, label: Label) -> BuildResult<()> {
        let target = self.use_label(label)?;
        self.insns.push(Insn::Jump { target });
        Ok(())
    }

    /// Branch when `cond` is non-zero.
    pub fn branch_if(&mut self, cond: Value, label: Label) -> BuildResult<()> {
        let cond = self.condition_operand(cond)?;
        let target = self.use_label(label)?;
        self.insns.push(Insn::BranchIf { cond, target });
        Ok(())
    }

    /// Branch when `cond` is zero.
    pub fn branch_if_not(&mut self, cond: Value, label: Label) -> BuildResult<()> {
        let cond = self.condition_operand(cond)?;
        let target = self.use_label(label)?;
        self.insns.push(Insn::BranchIfNot { cond, target });
        Ok(())
    }

    // ---- returns ---------------------------------------------------------

    /// Return a value, coercing a bare literal to the signature's return
    /// type.
    pub fn ret(&mut self, value: impl Into<Operand>) -> BuildResult<()> {
        let ret_ty = self.sig.ret().clone();
        if ret_ty.is_void() {
            return Err(BuildError::type_mismatch(
                "return",
                "void (use ret_void)",
                "value",
            ));
        }
        let id = self.coerce_operand(value.into(), &ret_ty, "return")?.id;
        self.insns.push(Insn::Return { value: Some(id) });
        Ok(())
    }

    pub fn ret_void(&mut self) -> BuildResult<()> {
        if !self.sig.ret().is_void() {
            return Err(BuildError::type_mismatch(
                "return",
                self.sig.ret().to_string(),
                "void",
            ));
        }
        self.insns.push(Insn::Return { value: None });
        Ok(())
    }

    // ---- seal ------------------------------------------------------------

    /// Finish construction. Fails if any label was created but never placed
    /// (the classic symptom: a control-flow chain dropped without `end`).
    pub fn seal(self) -> BuildResult<FunctionIr> {
        let unplaced = self.labels.iter().filter(|p| p.is_none()).count();
        if unplaced > 0 {
            return Err(BuildError::UnplacedLabel { count: unplaced });
        }
        debug!(
            insns = self.insns.len(),
            labels = self.labels.len(),
            slots = self.slots.len(),
            "sealed function construction"
        );
        Ok(FunctionIr {
            sig: self.sig,
            slots: self.slots,
            insns: self.insns,
            label_count: self.labels.len() as u32,
        })
    }

    // ---- internals -------------------------------------------------------

    fn push_slot(&mut self, kind: SlotKind, ty: Type) -> Value {
        let id = ValueId(self.slots.len() as u32);
        self.slots.push(SlotInfo { kind, ty });
        Value {
            id,
            owner: self.token,
        }
    }

    pub(crate) fn use_value(&self, v: Value) -> BuildResult<ValueId> {
        if v.owner != self.token {
            return Err(BuildError::scope_violation("value"));
        }
        Ok(v.id)
    }

    fn use_label(&self, l: Label) -> BuildResult<LabelId> {
        if l.owner != self.token {
            return Err(BuildError::scope_violation("label"));
        }
        Ok(l.id)
    }

    fn check_literal(&self, ty: &Type, value: ConstValue) -> BuildResult<ConstValue> {
        let prim = ty.as_primitive().ok_or_else(|| {
            BuildError::type_mismatch("constant", "scalar type", ty.to_string())
        })?;
        match (prim, value) {
            (Primitive::Void, _) => Err(BuildError::type_mismatch(
                "constant",
                "sized type",
                "void",
            )),
            (p, ConstValue::Int(v)) if p.is_integer() => {
                if literal_fits(p, v) {
                    Ok(ConstValue::Int(v))
                } else {
                    Err(BuildError::type_mismatch(
                        "constant",
                        p.to_string(),
                        format!("out-of-range literal {v}"),
                    ))
                }
            }
            (Primitive::Ptr, ConstValue::Int(v)) => Ok(ConstValue::Int(v)),
            (p, ConstValue::Int(v)) if p.is_float() => Ok(ConstValue::Float(v as f64)),
            (p, ConstValue::Float(v)) if p.is_float() => Ok(ConstValue::Float(v)),
            (p, ConstValue::Float(v)) => Err(BuildError::type_mismatch(
                "constant",
                p.to_string(),
                format!("float literal {v}"),
            )),
            (p, ConstValue::Int(v)) => Err(BuildError::type_mismatch(
                "constant",
                p.to_string(),
                format!("integer literal {v}"),
            )),
        }
    }

    /// Promote an operand into a value of `ty`, materializing bare literals
    /// as constants.
    pub(crate) fn coerce_operand(
        &mut self,
        op: Operand,
        ty: &Type,
        context: &'static str,
    ) -> BuildResult<Value> {
        match op {
            Operand::Literal(lit) => self.constant(ty.clone(), lit).map_err(|e| match e {
                BuildError::TypeMismatch {
                    expected, found, ..
                } => BuildError::TypeMismatch {
                    context: "literal promotion",
                    expected,
                    found,
                },
                other => other,
            }),
            Operand::Value(v) => {
                let id = self.use_value(v)?;
                let found = &self.slots[id.0 as usize].ty;
                if !ty.accepts(found) {
                    return Err(BuildError::TypeMismatch {
                        context,
                        expected: ty.to_string(),
                        found: found.to_string(),
                    });
                }
                Ok(v)
            }
        }
    }

    fn pointer_operand(&self, v: Value, context: &'static str) -> BuildResult<ValueId> {
        let id = self.use_value(v)?;
        let ty = &self.slots[id.0 as usize].ty;
        if !ty.is_pointer() {
            return Err(BuildError::type_mismatch(
                context,
                "pointer",
                ty.to_string(),
            ));
        }
        Ok(id)
    }

    fn condition_operand(&self, v: Value) -> BuildResult<ValueId> {
        let id = self.use_value(v)?;
        let ty = &self.slots[id.0 as usize].ty;
        let ok = match ty.as_primitive() {
            Some(p) => p.is_integer() || p == Primitive::Ptr,
            None => false,
        };
        if !ok {
            return Err(BuildError::type_mismatch(
                "branch condition",
                "integer or pointer",
                ty.to_string(),
            ));
        }
        Ok(id)
    }

    fn numeric_primitive(&self, ty: &Type, context: &'static str) -> BuildResult<Primitive> {
        match ty.as_primitive() {
            Some(p) if p.is_integer() || p.is_float() => Ok(p),
            _ => Err(BuildError::type_mismatch(
                context,
                "numeric operand",
                ty.to_string(),
            )),
        }
    }

    fn binary(&mut self, op: BinOp, a: Operand, b: Operand) -> BuildResult<Value> {
        // Literal promotion: a bare literal takes the other side's type.
        // Two bare literals have nothing to anchor on.
        let (lhs, rhs, ty) = match (a, b) {
            (Operand::Literal(_), Operand::Literal(_)) => {
                return Err(BuildError::AmbiguousLiteral)
            }
            (Operand::Value(va), Operand::Literal(lb)) => {
                let lhs = self.use_value(va)?;
                let ty = self.slots[lhs.0 as usize].ty.clone();
                let rhs = self.coerce_operand(Operand::Literal(lb), &ty, "operand")?.id;
                (lhs, rhs, ty)
            }
            (Operand::Literal(la), Operand::Value(vb)) => {
                let rhs = self.use_value(vb)?;
                let ty = self.slots[rhs.0 as usize].ty.clone();
                let lhs = self.coerce_operand(Operand::Literal(la), &ty, "operand")?.id;
                (lhs, rhs, ty)
            }
            (Operand::Value(va), Operand::Value(vb)) => {
                let lhs = self.use_value(va)?;
                let rhs = self.use_value(vb)?;
                let lty = self.slots[lhs.0 as usize].ty.clone();
                let rty = &self.slots[rhs.0 as usize].ty;
                if !lty.accepts(rty) {
                    return Err(BuildError::type_mismatch(
                        "operands",
                        lty.to_string(),
                        rty.to_string(),
                    ));
                }
                (lhs, rhs, lty)
            }
        };

        let prim = match ty.as_primitive() {
            Some(p) => p,
            None => {
                return Err(BuildError::type_mismatch(
                    "operands",
                    "scalar type",
                    ty.to_string(),
                ))
            }
        };
        if op.requires_integers() && !prim.is_integer() {
            return Err(BuildError::type_mismatch(
                "operands",
                "integer type",
                prim.to_string(),
            ));
        }
        if !op.is_comparison() && prim == Primitive::Ptr {
            // Pointer arithmetic goes through the layout types, not the
            // scalar emitters.
            return Err(BuildError::type_mismatch(
                "operands",
                "numeric type",
                "ptr",
            ));
        }

        // Comparisons yield int 1/0; there is no boolean type.
        let result_ty = if op.is_comparison() {
            Type::Primitive(Primitive::I32)
        } else {
            ty
        };
        let dst = self.push_slot(SlotKind::Temp, result_ty);
        self.insns.push(Insn::Binary {
            op,
            dst: dst.id,
            lhs,
            rhs,
        });
        Ok(dst)
    }
}

fn literal_fits(p: Primitive, v: i64) -> bool {
    match p {
        Primitive::I8 => i8::try_from(v).is_ok(),
        Primitive::U8 => u8::try_from(v).is_ok(),
        Primitive::I16 => i16::try_from(v).is_ok(),
        Primitive::U16 => u16::try_from(v).is_ok(),
        Primitive::I32 => i32::try_from(v).is_ok(),
        Primitive::U32 => u32::try_from(v).is_ok(),
        Primitive::I64 => true,
        Primitive::U64 => true,
        _ => false,
    }
}
