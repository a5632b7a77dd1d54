// src/structs.rs
//! Struct types: records of heterogeneous named members.
//!
//! A [`StructType`] computes byte offsets for its members once at
//! definition time and exposes typed accessors through an instance bound to
//! a base address. The instance owns no storage; storage is whatever memory
//! the base pointer designates (an on-stack aggregate from
//! [`StructType::create`], or caller-supplied memory via
//! [`StructType::wrap`]).

use std::rc::Rc;

use crate::errors::BuildResult;
use crate::function::FunctionBuilder;
use crate::types::{Member, StructLayout, Type};
use crate::value::{Operand, Value};

/// A struct type descriptor. Cheap to clone; shareable across many function
/// constructions.
#[derive(Debug, Clone)]
pub struct StructType {
    layout: Rc<StructLayout>,
}

impl StructType {
    /// Define a struct from ordered `(name, type)` members. Member names
    /// must be pairwise distinct; a name-to-ordinal index is built here so
    /// every later named access is one lookup.
    pub fn new<S: Into<String>>(
        members: impl IntoIterator<Item = (S, Type)>,
    ) -> BuildResult<StructType> {
        let members = members
            .into_iter()
            .map(|(name, ty)| Member {
                name: name.into(),
                ty,
            })
            .collect();
        Ok(StructType {
            layout: StructLayout::new(members)?,
        })
    }

    /// Member names, in definition order.
    pub fn members(&self) -> impl Iterator<Item = &str> {
        self.layout.members.iter().map(|m| m.name.as_str())
    }

    /// Byte offset of `name` from the struct's base address.
    pub fn offset_of(&self, name: &str) -> BuildResult<u32> {
        let ordinal = self.layout.ordinal(name)?;
        Ok(self.layout.offset(ordinal))
    }

    /// Override the offset of `name`. An escape hatch for hand-tuned
    /// packing: the neighbours and the total size stay where natural layout
    /// put them.
    pub fn set_offset_of(&self, name: &str, offset: u32) -> BuildResult<()> {
        let ordinal = self.layout.ordinal(name)?;
        self.layout.set_offset(ordinal, offset);
        Ok(())
    }

    /// Type of the member called `name`.
    pub fn type_of(&self, name: &str) -> BuildResult<Type> {
        let ordinal = self.layout.ordinal(name)?;
        Ok(self.layout.members[ordinal].ty.clone())
    }

    pub fn size(&self) -> u32 {
        self.layout.size
    }

    pub fn align(&self) -> u32 {
        self.layout.align
    }

    pub fn as_type(&self) -> Type {
        Type::Struct(self.layout.clone())
    }

    /// Allocate an anonymous aggregate of this type on the stack of the
    /// function under construction and wrap its address.
    pub fn create(&self, f: &mut FunctionBuilder) -> BuildResult<StructInstance> {
        let slot = f.variable(self.as_type())?;
        let ptr = f.address_of(slot)?;
        Ok(self.wrap(ptr))
    }

    /// Bind this type's accessors to caller-supplied storage. Emits nothing.
    pub fn wrap(&self, base: Value) -> StructInstance {
        StructInstance {
            ty: self.clone(),
            base,
        }
    }
}

impl From<&StructType> for Type {
    fn from(s: &StructType) -> Type {
        s.as_type()
    }
}

impl From<StructType> for Type {
    fn from(s: StructType) -> Type {
        s.as_type()
    }
}

/// A struct bound to a base address. Member access is an offset-relative
/// load or store against that address.
#[derive(Debug, Clone)]
pub struct StructInstance {
    ty: StructType,
    base: Value,
}

impl StructInstance {
    /// The base address this instance reads and writes through.
    pub fn ptr(&self) -> Value {
        self.base
    }

    pub fn struct_type(&self) -> &StructType {
        &self.ty
    }

    /// Load the member called `name`.
    pub fn get(&self, f: &mut FunctionBuilder, name: &str) -> BuildResult<Value> {
        let offset = self.ty.offset_of(name)?;
        let ty = self.ty.type_of(name)?;
        f.load_relative(self.base, offset as i64, ty)
    }

    /// Store into the member called `name`, coercing a bare literal to the
    /// member's type.
    pub fn set(
        &self,
        f: &mut FunctionBuilder,
        name: &str,
        value: impl Into<Operand>,
    ) -> BuildResult<()> {
        let offset = self.ty.offset_of(name)?;
        let ty = self.ty.type_of(name)?;
        let v = f.coerce_operand(value.into(), &ty, "struct member")?;
        f.store_relative(self.base, offset as i64, v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::BuildError;
    use crate::types::Primitive;

    fn point() -> StructType {
        StructType::new([
            ("x", Primitive::I32.into()),
            ("y", Primitive::F64.into()),
            ("z", Primitive::Ptr.into()),
        ])
        .unwrap()
    }

    #[test]
    fn test_member_names_in_order() {
        let s = point();
        let names: Vec<&str> = s.members().collect();
        assert_eq!(names, ["x", "y", "z"]);
    }

    #[test]
    fn test_offsets_monotone_and_aligned() {
        let s = point();
        assert_eq!(s.offset_of("x").unwrap(), 0);
        assert_eq!(s.offset_of("y").unwrap(), 8);
        assert_eq!(s.offset_of("z").unwrap(), 16);
        assert_eq!(s.size(), 24);
    }

    #[test]
    fn test_type_of() {
        let s = point();
        assert_eq!(s.type_of("y").unwrap(), Primitive::F64.into());
    }

    #[test]
    fn test_unknown_member() {
        let s = point();
        assert!(matches!(
            s.offset_of("w").unwrap_err(),
            BuildError::UnknownMember { .. }
        ));
    }

    #[test]
    fn test_duplicate_member() {
        let err = StructType::new([
            ("x", Type::from(Primitive::I32)),
            ("x", Type::from(Primitive::I32)),
        ])
        .unwrap_err();
        assert!(matches!(err, BuildError::DuplicateMember { .. }));
    }

    #[test]
    fn test_offset_override_is_local() {
        let s = point();
        s.set_offset_of("y", 4).unwrap();
        assert_eq!(s.offset_of("y").unwrap(), 4);
        // Neighbours and total size are untouched.
        assert_eq!(s.offset_of("x").unwrap(), 0);
        assert_eq!(s.offset_of("z").unwrap(), 16);
        assert_eq!(s.size(), 24);
    }

    #[test]
    fn test_offset_override_unknown_member() {
        let s = point();
        assert!(s.set_offset_of("w", 0).is_err());
    }
}
