// src/array.rs
//! Fixed-length array types.
//!
//! An array is a homogeneous aggregate with a length fixed in the type.
//! Element offsets come from the aggregate's own layout table (stride =
//! element size rounded to element alignment), in contrast to
//! [`crate::PointerType`], which computes raw address arithmetic over
//! unbounded memory. Indexing is not bounds-checked anywhere in this layer;
//! an out-of-range index is a caller error that surfaces, if at all, as
//! undefined behavior in the generated code.

use std::rc::Rc;

use crate::errors::BuildResult;
use crate::function::FunctionBuilder;
use crate::types::{ArrayLayout, Type};
use crate::value::{Operand, Value};

/// A fixed-length array type descriptor.
#[derive(Debug, Clone)]
pub struct ArrayType {
    layout: Rc<ArrayLayout>,
}

impl ArrayType {
    /// Define an array of `len` elements of `elem`. Zero-length arrays are
    /// legal; indexing one is meaningless but defining it is not an error.
    pub fn new(elem: impl Into<Type>, len: u32) -> ArrayType {
        ArrayType {
            layout: ArrayLayout::new(elem.into(), len),
        }
    }

    pub fn elem_type(&self) -> Type {
        self.layout.elem.clone()
    }

    pub fn len(&self) -> u32 {
        self.layout.len
    }

    pub fn is_empty(&self) -> bool {
        self.layout.len == 0
    }

    /// Byte offset of element `index`. Indices at or past `len` (or
    /// negative) are outside the contract: the arithmetic is still done,
    /// the access is undefined.
    pub fn offset_of(&self, index: i64) -> i64 {
        index * self.layout.stride as i64
    }

    /// Element type at `index`; the same for every index.
    pub fn type_of(&self, _index: i64) -> Type {
        self.elem_type()
    }

    pub fn size(&self) -> u32 {
        self.layout.size
    }

    pub fn align(&self) -> u32 {
        self.layout.align
    }

    pub fn as_type(&self) -> Type {
        Type::Array(self.layout.clone())
    }

    /// Allocate an anonymous array of this type on the stack of the
    /// function under construction and wrap its address.
    pub fn create(&self, f: &mut FunctionBuilder) -> BuildResult<ArrayInstance> {
        let slot = f.variable(self.as_type())?;
        let ptr = f.address_of(slot)?;
        self.wrap(f, ptr)
    }

    /// Bind this type's accessors to an existing base pointer. The pointer
    /// is stored into a fresh pointer-typed variable so the instance is
    /// independently assignable; element access keeps using the original
    /// base.
    pub fn wrap(&self, f: &mut FunctionBuilder, ptr: Value) -> BuildResult<ArrayInstance> {
        let var = f.variable(Type::pointer(self.as_type()))?;
        f.store(var, ptr)?;
        Ok(ArrayInstance {
            ty: self.clone(),
            var,
            base: ptr,
        })
    }
}

impl From<&ArrayType> for Type {
    fn from(a: &ArrayType) -> Type {
        a.as_type()
    }
}

impl From<ArrayType> for Type {
    fn from(a: ArrayType) -> Type {
        a.as_type()
    }
}

/// An array bound to a base address.
#[derive(Debug, Clone)]
pub struct ArrayInstance {
    ty: ArrayType,
    /// Pointer-typed variable holding the base; reassignable on its own.
    var: Value,
    /// The base used for element access.
    base: Value,
}

impl ArrayInstance {
    /// The instance as a value: the pointer variable it was wrapped into.
    pub fn value(&self) -> Value {
        self.var
    }

    /// Pointer to the first element.
    pub fn ptr(&self) -> Value {
        self.base
    }

    pub fn array_type(&self) -> &ArrayType {
        &self.ty
    }

    /// Load element `index` (compile-time index).
    pub fn get(&self, f: &mut FunctionBuilder, index: i64) -> BuildResult<Value> {
        f.load_relative(self.base, self.ty.offset_of(index), self.ty.elem_type())
    }

    /// Store into element `index`, coercing a bare literal to the element
    /// type.
    pub fn set(
        &self,
        f: &mut FunctionBuilder,
        index: i64,
        value: impl Into<Operand>,
    ) -> BuildResult<()> {
        let elem = self.ty.elem_type();
        let v = f.coerce_operand(value.into(), &elem, "array element")?;
        f.store_relative(self.base, self.ty.offset_of(index), v)
    }
}
