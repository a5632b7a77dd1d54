// src/jit/mod.rs
//! Native backend over cranelift-jit.
//!
//! [`JitEngine`] owns a `JITModule` configured for the host ISA and turns
//! sealed [`FunctionIr`] into executable code. Compiled functions keep the
//! module alive through a shared handle, so they stay callable after the
//! engine goes out of scope. [`CompiledFunction::apply`] performs a dynamic
//! call through libffi, matching the signature at runtime; callers that
//! know the signature statically can transmute
//! [`CompiledFunction::code_ptr`] instead.

mod translate;

use std::cell::RefCell;
use std::rc::Rc;

use cranelift::prelude::*;
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{Linkage, Module};
use libffi::middle::{Arg, Cif, CodePtr, Type as FfiType};
use tracing::debug;

use crate::errors::{BuildError, BuildResult};
use crate::ir::{ConstValue, FunctionIr, Signature};
use crate::types::Primitive;

use translate::{prim_to_clif, FunctionTranslator};

struct EngineInner {
    module: JITModule,
    ctx: codegen::Context,
    builder_ctx: FunctionBuilderContext,
    next_fn: u32,
}

/// A JIT compilation engine for the host machine.
pub struct JitEngine {
    inner: Rc<RefCell<EngineInner>>,
}

impl JitEngine {
    pub fn new() -> BuildResult<JitEngine> {
        let mut flag_builder = settings::builder();
        flag_builder
            .set("use_colocated_libcalls", "false")
            .map_err(BuildError::backend)?;
        flag_builder
            .set("is_pic", "false")
            .map_err(BuildError::backend)?;

        let isa_builder = cranelift_native::builder().map_err(BuildError::backend)?;
        let isa = isa_builder
            .finish(settings::Flags::new(flag_builder))
            .map_err(BuildError::backend)?;

        let builder = JITBuilder::with_isa(isa, cranelift_module::default_libcall_names());
        let module = JITModule::new(builder);
        let ctx = module.make_context();
        Ok(JitEngine {
            inner: Rc::new(RefCell::new(EngineInner {
                module,
                ctx,
                builder_ctx: FunctionBuilderContext::new(),
                next_fn: 0,
            })),
        })
    }

    /// Compile a sealed function to native code.
    pub fn compile(&mut self, ir: &FunctionIr) -> BuildResult<CompiledFunction> {
        let inner = &mut *self.inner.borrow_mut();
        let ptr_type = inner.module.target_config().pointer_type();

        let mut sig = inner.module.make_signature();
        for param in ir.signature().params() {
            let prim = param
                .as_primitive()
                .ok_or_else(|| BuildError::unsupported("aggregate parameter"))?;
            let clif_ty = prim_to_clif(prim, ptr_type)
                .ok_or_else(|| BuildError::unsupported("void parameter"))?;
            sig.params.push(AbiParam::new(clif_ty));
        }
        if !ir.signature().ret().is_void() {
            let prim = ir
                .signature()
                .ret()
                .as_primitive()
                .ok_or_else(|| BuildError::unsupported("aggregate return"))?;
            let clif_ty = prim_to_clif(prim, ptr_type)
                .ok_or_else(|| BuildError::unsupported("void-typed value"))?;
            sig.returns.push(AbiParam::new(clif_ty));
        }

        let name = format!("anvil_fn_{}", inner.next_fn);
        inner.next_fn += 1;
        let func_id = inner
            .module
            .declare_function(&name, Linkage::Export, &sig)
            .map_err(BuildError::backend)?;

        inner.ctx.func.signature = sig;
        {
            let mut builder = FunctionBuilder::new(&mut inner.ctx.func, &mut inner.builder_ctx);
            FunctionTranslator::translate(&mut builder, ir, ptr_type)?;
            builder.seal_all_blocks();
            builder.finalize();
        }

        inner
            .module
            .define_function(func_id, &mut inner.ctx)
            .map_err(BuildError::backend)?;
        inner.module.clear_context(&mut inner.ctx);
        inner
            .module
            .finalize_definitions()
            .map_err(BuildError::backend)?;

        let ptr = inner.module.get_finalized_function(func_id);
        debug!(name = %name, insns = ir.insns().len(), "compiled function");

        Ok(CompiledFunction {
            ptr,
            cif: make_cif(ir.signature())?,
            sig: ir.signature().clone(),
            _engine: Rc::clone(&self.inner),
        })
    }
}

/// A natively compiled function.
pub struct CompiledFunction {
    ptr: *const u8,
    cif: Cif,
    sig: Signature,
    _engine: Rc<RefCell<EngineInner>>,
}

impl CompiledFunction {
    /// Raw entry point. Valid for as long as this handle (or its engine)
    /// lives.
    pub fn code_ptr(&self) -> *const u8 {
        self.ptr
    }

    pub fn signature(&self) -> &Signature {
        &self.sig
    }

    /// Call the compiled code with dynamically typed arguments. Integer
    /// literals promote to float parameters; everything else must match the
    /// signature. Returns `None` for void functions.
    ///
    /// # Safety
    ///
    /// Executes generated native code, which performs unchecked loads and
    /// stores through whatever addresses the description computed.
    pub unsafe fn apply(&self, args: &[ConstValue]) -> BuildResult<Option<ConstValue>> {
        let params = self.sig.params();
        if args.len() != params.len() {
            return Err(BuildError::type_mismatch(
                "apply",
                format!("{} argument(s)", params.len()),
                format!("{}", args.len()),
            ));
        }

        // Each argument is staged into an 8-byte cell; libffi reads the
        // low bytes it needs per the CIF's type (little-endian hosts).
        let mut cells: Vec<u64> = Vec::with_capacity(args.len());
        for (ty, arg) in params.iter().zip(args) {
            let prim = ty
                .as_primitive()
                .ok_or_else(|| BuildError::unsupported("aggregate parameter"))?;
            cells.push(encode_arg(prim, *arg)?);
        }
        let ffi_args: Vec<Arg> = cells.iter().map(Arg::new).collect();

        let code = CodePtr(self.ptr as *mut _);
        let ret = self.sig.ret().clone();
        let prim = match ret.as_primitive() {
            None => return Err(BuildError::unsupported("aggregate return")),
            Some(p) => p,
        };
        let result = match prim {
            Primitive::Void => {
                self.cif.call::<()>(code, &ffi_args);
                return Ok(None);
            }
            Primitive::I8 => ConstValue::Int(self.cif.call::<i8>(code, &ffi_args) as i64),
            Primitive::U8 => ConstValue::Int(self.cif.call::<u8>(code, &ffi_args) as i64),
            Primitive::I16 => ConstValue::Int(self.cif.call::<i16>(code, &ffi_args) as i64),
            Primitive::U16 => ConstValue::Int(self.cif.call::<u16>(code, &ffi_args) as i64),
            Primitive::I32 => ConstValue::Int(self.cif.call::<i32>(code, &ffi_args) as i64),
            Primitive::U32 => ConstValue::Int(self.cif.call::<u32>(code, &ffi_args) as i64),
            Primitive::I64 | Primitive::U64 => {
                ConstValue::Int(self.cif.call::<i64>(code, &ffi_args))
            }
            Primitive::Ptr => {
                ConstValue::Int(self.cif.call::<*const u8>(code, &ffi_args) as i64)
            }
            Primitive::F32 => ConstValue::Float(self.cif.call::<f32>(code, &ffi_args) as f64),
            Primitive::F64 => ConstValue::Float(self.cif.call::<f64>(code, &ffi_args)),
        };
        Ok(Some(result))
    }
}

fn make_cif(sig: &Signature) -> BuildResult<Cif> {
    let mut args = Vec::with_capacity(sig.params().len());
    for ty in sig.params() {
        let prim = ty
            .as_primitive()
            .ok_or_else(|| BuildError::unsupported("aggregate parameter"))?;
        args.push(ffi_type(prim)?);
    }
    let ret = match sig.ret().as_primitive() {
        Some(p) => ffi_type(p)?,
        None if sig.ret().is_void() => FfiType::void(),
        None => return Err(BuildError::unsupported("aggregate return")),
    };
    Ok(Cif::new(args, ret))
}

fn ffi_type(p: Primitive) -> BuildResult<FfiType> {
    Ok(match p {
        Primitive::I8 => FfiType::i8(),
        Primitive::U8 => FfiType::u8(),
        Primitive::I16 => FfiType::i16(),
        Primitive::U16 => FfiType::u16(),
        Primitive::I32 => FfiType::i32(),
        Primitive::U32 => FfiType::u32(),
        Primitive::I64 => FfiType::i64(),
        Primitive::U64 => FfiType::u64(),
        Primitive::F32 => FfiType::f32(),
        Primitive::F64 => FfiType::f64(),
        Primitive::Ptr => FfiType::pointer(),
        Primitive::Void => FfiType::void(),
    })
}

fn encode_arg(p: Primitive, v: ConstValue) -> BuildResult<u64> {
    match (p, v) {
        (p, ConstValue::Int(n)) if p.is_integer() || p == Primitive::Ptr => Ok(n as u64),
        (Primitive::F32, v) => Ok((v.as_float() as f32).to_bits() as u64),
        (Primitive::F64, v) => Ok(v.as_float().to_bits()),
        (p, v) => Err(BuildError::type_mismatch(
            "apply argument",
            p.to_string(),
            format!("{v:?}"),
        )),
    }
}
