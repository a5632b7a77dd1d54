// src/value.rs
//! Value handles and operand coercion.
//!
//! A [`Value`] is a small copyable token naming a constant, parameter,
//! variable, or instruction result inside one function construction. All
//! emission goes through the owning [`crate::FunctionBuilder`]; the handle
//! itself carries just enough identity to detect cross-session misuse.
//!
//! [`Operand`] is the argument position of every emitter: either an existing
//! handle or a bare literal. A bare literal is promoted to a constant of the
//! other operand's type at emission time; promoting two bare literals
//! together has no type to anchor on and fails with
//! [`crate::BuildError::AmbiguousLiteral`].

use crate::ir::{ConstValue, ValueId};

/// A typed handle to one value slot of a function under construction.
///
/// Handles are scoped to the session that created them and carry no meaning
/// once that session seals; the generated code, not the handle, survives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Value {
    pub(crate) id: ValueId,
    pub(crate) owner: u32,
}

/// Either a value handle or a bare literal awaiting promotion.
#[derive(Debug, Clone, Copy)]
pub enum Operand {
    Value(Value),
    Literal(ConstValue),
}

impl From<Value> for Operand {
    fn from(v: Value) -> Operand {
        Operand::Value(v)
    }
}

impl From<&Value> for Operand {
    fn from(v: &Value) -> Operand {
        Operand::Value(*v)
    }
}

impl From<ConstValue> for Operand {
    fn from(v: ConstValue) -> Operand {
        Operand::Literal(v)
    }
}

macro_rules! operand_from_literal {
    ($($t:ty),*) => {
        $(impl From<$t> for Operand {
            fn from(v: $t) -> Operand {
                Operand::Literal(v.into())
            }
        })*
    };
}

operand_from_literal!(i8, u8, i16, u16, i32, u32, i64, f32, f64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_conversions() {
        assert!(matches!(
            Operand::from(42i32),
            Operand::Literal(ConstValue::Int(42))
        ));
        assert!(matches!(
            Operand::from(2.5f64),
            Operand::Literal(ConstValue::Float(_))
        ));
    }
}
