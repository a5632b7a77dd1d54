// src/lib.rs
//! anvil: an embedding layer for constructing JIT-compiled functions.
//!
//! Describe a function's computation with structured control flow
//! (`if`/`unless`/`case`/`while`/`until`), typed memory layouts (structs,
//! fixed arrays, pointers), and expression-level emitters; the description
//! lowers to a flat label/branch instruction sequence that a backend turns
//! into native code.
//!
//! ```
//! use anvil::{FunctionBuilder, Primitive, Signature};
//!
//! // fn gcd(a: i64, b: i64) -> i64
//! let sig = Signature::new(
//!     [Primitive::I64.into(), Primitive::I64.into()],
//!     Primitive::I64,
//! );
//! let mut f = FunctionBuilder::new(sig)?;
//! let a = f.variable(Primitive::I64)?;
//! let b = f.variable(Primitive::I64)?;
//! let p0 = f.param(0)?;
//! let p1 = f.param(1)?;
//! f.store(a, p0)?;
//! f.store(b, p1)?;
//! f.while_(|f| f.ne(b, 0))?
//!     .do_(|f| {
//!         let t = f.rem(a, b)?;
//!         f.store(a, b)?;
//!         f.store(b, t)?;
//!         Ok(())
//!     })?
//!     .end()?;
//! f.ret(a)?;
//! let ir = f.seal()?;
//! # let out = unsafe { anvil::interp::run(&ir, &[48i64.into(), 18i64.into()])? };
//! # assert_eq!(out, Some(anvil::ConstValue::Int(6)));
//! # Ok::<(), anvil::BuildError>(())
//! ```
//!
//! Construction is synchronous and single-threaded; handles ([`Value`],
//! [`Label`], instances) belong to exactly one [`FunctionBuilder`] and are
//! meaningless after it seals. Sealing checks label discipline: a chain or
//! loop dropped without its `end` fails with [`BuildError::UnplacedLabel`]
//! instead of compiling to broken code.

pub mod array;
pub mod control;
pub mod errors;
pub mod function;
pub mod interp;
pub mod ir;
pub mod jit;
pub mod pointer;
pub mod structs;
pub mod types;
pub mod value;

pub use array::{ArrayInstance, ArrayType};
pub use control::{CaseBuilder, IfBuilder, LoopBuilder};
pub use errors::{BuildError, BuildResult};
pub use function::{FunctionBuilder, Label};
pub use ir::{BinOp, ConstValue, FunctionIr, Insn, Signature, UnOp};
pub use jit::{CompiledFunction, JitEngine};
pub use pointer::{PointerInstance, PointerType};
pub use structs::{StructInstance, StructType};
pub use types::{Primitive, Type};
pub use value::{Operand, Value};
