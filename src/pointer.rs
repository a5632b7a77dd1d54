// src/pointer.rs
//! Typed pointers with element indexing.
//!
//! Pointer indexing models raw address arithmetic: `offset_of(i)` is
//! `i * size_of(pointed)`, computed directly from the pointed-to type's
//! size rather than any aggregate layout table, and negative indices are
//! meaningful. This is deliberately distinct from [`crate::ArrayType`],
//! which models access within a fixed aggregate.

use std::rc::Rc;

use crate::errors::BuildResult;
use crate::function::FunctionBuilder;
use crate::types::{PointerLayout, Type};
use crate::value::{Operand, Value};

/// A typed pointer descriptor.
#[derive(Debug, Clone)]
pub struct PointerType {
    layout: Rc<PointerLayout>,
}

impl PointerType {
    pub fn new(pointed: impl Into<Type>) -> PointerType {
        PointerType {
            layout: Rc::new(PointerLayout {
                pointed: pointed.into(),
            }),
        }
    }

    pub fn pointed_type(&self) -> Type {
        self.layout.pointed.clone()
    }

    /// Byte offset of element `index`: plain pointer arithmetic, negative
    /// indices included.
    pub fn offset_of(&self, index: i64) -> i64 {
        index * self.layout.pointed.size() as i64
    }

    /// Pointed-to type, for any index.
    pub fn type_of(&self, _index: i64) -> Type {
        self.pointed_type()
    }

    pub fn as_type(&self) -> Type {
        Type::Pointer(self.layout.clone())
    }

    /// Bind element accessors to an existing raw pointer. The pointer is
    /// stored into a fresh pointer-typed variable (so the instance is
    /// independently assignable); element access keeps using the original.
    pub fn wrap(&self, f: &mut FunctionBuilder, ptr: Value) -> BuildResult<PointerInstance> {
        let var = f.variable(self.as_type())?;
        f.store(var, ptr)?;
        Ok(PointerInstance {
            ty: self.clone(),
            var,
            base: ptr,
        })
    }
}

impl From<&PointerType> for Type {
    fn from(p: &PointerType) -> Type {
        p.as_type()
    }
}

impl From<PointerType> for Type {
    fn from(p: PointerType) -> Type {
        p.as_type()
    }
}

/// A pointer bound to a base address, indexable by element.
#[derive(Debug, Clone)]
pub struct PointerInstance {
    ty: PointerType,
    var: Value,
    base: Value,
}

impl PointerInstance {
    /// The instance as a value: the pointer variable it was wrapped into.
    pub fn value(&self) -> Value {
        self.var
    }

    pub fn ptr(&self) -> Value {
        self.base
    }

    pub fn pointer_type(&self) -> &PointerType {
        &self.ty
    }

    /// Load the element at `index` (compile-time index; may be negative).
    pub fn get(&self, f: &mut FunctionBuilder, index: i64) -> BuildResult<Value> {
        f.load_relative(self.base, self.ty.offset_of(index), self.ty.pointed_type())
    }

    /// Store into the element at `index`.
    pub fn set(
        &self,
        f: &mut FunctionBuilder,
        index: i64,
        value: impl Into<Operand>,
    ) -> BuildResult<()> {
        let pointed = self.ty.pointed_type();
        let v = f.coerce_operand(value.into(), &pointed, "pointed element")?;
        f.store_relative(self.base, self.ty.offset_of(index), v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Primitive;

    #[test]
    fn test_offset_is_pointer_arithmetic() {
        let p = PointerType::new(Primitive::I32);
        assert_eq!(p.offset_of(0), 0);
        assert_eq!(p.offset_of(1), 4);
        assert_eq!(p.offset_of(3), 12);
    }

    #[test]
    fn test_negative_offsets_are_meaningful() {
        let p = PointerType::new(Primitive::F64);
        assert_eq!(p.offset_of(-2), -16);
    }

    #[test]
    fn test_array_and_pointer_agree_on_stride() {
        // Same formula, different derivations.
        let a = crate::array::ArrayType::new(Primitive::I16, 8);
        let p = PointerType::new(Primitive::I16);
        for i in [0i64, 1, 5, 7] {
            assert_eq!(a.offset_of(i), p.offset_of(i));
        }
    }

    #[test]
    fn test_type_of_any_index() {
        let p = PointerType::new(Primitive::U8);
        assert_eq!(p.type_of(-1), Primitive::U8.into());
        assert_eq!(p.type_of(100), Primitive::U8.into());
    }
}
