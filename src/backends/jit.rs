//! JIT backend: native scalar code through Cranelift.
//!
//! This backend compiles scalar expressions into machine code for the host
//! architecture. The compiled callable takes a flat `&[f64]` holding every
//! argument vector's components back to back, in allocation order, and
//! returns one `f64`.
//!
//! Supported operators are the scalar arithmetic set: add, sub, mul, div,
//! neg and pow (with an inlined fast path for integer exponents). Vector
//! and matrix operands, extension operators and signal evaluation are
//! rejected with [`BackendError::Unsupported`]; route those graphs through
//! the interpreter instead.

use std::sync::Arc;

use cranelift::prelude::*;
use cranelift_codegen::{ir::immediates::Offset32, Context as CodegenContext};
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{FuncId, Linkage, Module};
use isa::TargetIsa;

use crate::backends::Backend;
use crate::errors::BackendError;
use crate::ops::Op;

/// A compiled native callable over a flat input slice.
pub type JitFunction = Arc<dyn Fn(&[f64]) -> f64 + Send + Sync>;

/// A scalar expression over input slots.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarExpr {
    Const(f64),
    /// Load of one f64 from the input slice
    Slot(u32),
    Add(Box<ScalarExpr>, Box<ScalarExpr>),
    Sub(Box<ScalarExpr>, Box<ScalarExpr>),
    Mul(Box<ScalarExpr>, Box<ScalarExpr>),
    Div(Box<ScalarExpr>, Box<ScalarExpr>),
    Neg(Box<ScalarExpr>),
    /// Power with a constant integer exponent, inlined at codegen
    PowInt(Box<ScalarExpr>, i64),
    /// Power with an arbitrary exponent, lowered to a libm call
    Pow(Box<ScalarExpr>, Box<ScalarExpr>),
}

impl ScalarExpr {
    fn max_slot(&self) -> Option<u32> {
        match self {
            ScalarExpr::Const(_) => None,
            ScalarExpr::Slot(i) => Some(*i),
            ScalarExpr::Neg(e) => e.max_slot(),
            ScalarExpr::PowInt(e, _) => e.max_slot(),
            ScalarExpr::Add(l, r)
            | ScalarExpr::Sub(l, r)
            | ScalarExpr::Mul(l, r)
            | ScalarExpr::Div(l, r)
            | ScalarExpr::Pow(l, r) => match (l.max_slot(), r.max_slot()) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            },
        }
    }
}

/// Backend term: a scalar expression or an as-yet unprojected argument
/// vector.
#[derive(Debug, Clone)]
pub enum JitExpr {
    Scalar(ScalarExpr),
    Vector {
        base_slot: u32,
        len: usize,
        name: String,
    },
}

/// Cranelift-based scalar compiler.
#[derive(Default)]
pub struct JitBackend {
    next_slot: u32,
}

impl JitBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Backend for JitBackend {
    type Repr = JitExpr;
    type Func = JitFunction;

    fn symbol_vector(&mut self, base: &str, len: usize) -> Result<JitExpr, BackendError> {
        let base_slot = self.next_slot;
        self.next_slot += len as u32;
        Ok(JitExpr::Vector {
            base_slot,
            len,
            name: base.to_string(),
        })
    }

    fn component(&self, vector: &JitExpr, index: usize) -> Result<JitExpr, BackendError> {
        match vector {
            JitExpr::Vector { base_slot, len, .. } if index < *len => {
                Ok(JitExpr::Scalar(ScalarExpr::Slot(base_slot + index as u32)))
            }
            JitExpr::Vector { len, .. } => Err(BackendError::InvalidInput {
                expected: index + 1,
                got: *len,
            }),
            JitExpr::Scalar(_) => Err(BackendError::Unsupported(
                "component projection of a scalar term".to_string(),
            )),
        }
    }

    fn constant(&self, value: &crate::value::Value) -> Result<JitExpr, BackendError> {
        match value.as_scalar() {
            Some(x) => Ok(JitExpr::Scalar(ScalarExpr::Const(x))),
            None => Err(BackendError::Unsupported(format!(
                "non-scalar constant of shape {}",
                value.shape()
            ))),
        }
    }

    fn apply(&mut self, op: Op, args: Vec<JitExpr>) -> Result<JitExpr, BackendError> {
        let mut scalars = Vec::with_capacity(args.len());
        for arg in args {
            match arg {
                JitExpr::Scalar(e) => scalars.push(e),
                JitExpr::Vector { name, .. } => {
                    return Err(BackendError::Unsupported(format!(
                        "vector operand {name} in scalar code"
                    )));
                }
            }
        }
        let expr = match op {
            Op::Neg => {
                if scalars.len() != 1 {
                    return Err(arity_error(op));
                }
                let e = Box::new(scalars.pop().ok_or_else(|| arity_error(op))?);
                ScalarExpr::Neg(e)
            }
            Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Pow => {
                if scalars.len() != 2 {
                    return Err(arity_error(op));
                }
                let r = Box::new(scalars.pop().ok_or_else(|| arity_error(op))?);
                let l = Box::new(scalars.pop().ok_or_else(|| arity_error(op))?);
                match op {
                    Op::Add => ScalarExpr::Add(l, r),
                    Op::Sub => ScalarExpr::Sub(l, r),
                    Op::Mul => ScalarExpr::Mul(l, r),
                    Op::Div => ScalarExpr::Div(l, r),
                    Op::Pow => match *r {
                        // constant whole-number exponents get the inlined
                        // multiply chain
                        ScalarExpr::Const(e) if e.fract() == 0.0 && e.abs() < 64.0 => {
                            ScalarExpr::PowInt(l, e as i64)
                        }
                        _ => ScalarExpr::Pow(l, r),
                    },
                    _ => unreachable!(),
                }
            }
            other => {
                return Err(BackendError::Unsupported(format!(
                    "operator {other:?} in scalar code"
                )));
            }
        };
        Ok(JitExpr::Scalar(expr))
    }

    fn compile(
        &mut self,
        body: JitExpr,
        args: &[JitExpr],
        name: &str,
    ) -> Result<JitFunction, BackendError> {
        let body = match body {
            JitExpr::Scalar(e) => e,
            JitExpr::Vector { name, .. } => {
                return Err(BackendError::Unsupported(format!(
                    "vector-valued body {name}"
                )));
            }
        };

        let slot_count: usize = args
            .iter()
            .map(|arg| match arg {
                JitExpr::Vector { len, .. } => *len,
                JitExpr::Scalar(_) => 0,
            })
            .sum();
        if let Some(max) = body.max_slot() {
            if max as usize >= slot_count {
                return Err(BackendError::UnresolvedSymbol(format!("slot {max}")));
            }
        }

        let isa = create_isa()?;
        let (mut module, mut ctx) = create_module_and_context(isa);
        build_function_body(&mut ctx, &body, &mut module)?;
        let raw_fn = compile_and_finalize(&mut module, &mut ctx, name)?;

        // JITModule keeps its code pages mapped until free_memory is
        // called; letting it drop here leaves the pointer valid for the
        // lifetime of the closure.
        std::mem::forget(module);

        Ok(Arc::new(move |inputs: &[f64]| {
            debug_assert!(
                inputs.len() >= slot_count,
                "input slice shorter than the compiled calling convention"
            );
            raw_fn(inputs.as_ptr())
        }))
    }
}

fn arity_error(op: Op) -> BackendError {
    BackendError::Codegen(format!("wrong argument count for {op:?}"))
}

extern "C" fn pow_f64(base: f64, exponent: f64) -> f64 {
    base.powf(exponent)
}

/// Configures a code generator for the host machine.
fn create_isa() -> Result<Arc<dyn TargetIsa>, BackendError> {
    let mut flag_builder = settings::builder();

    let target_triple = target_lexicon::Triple::host();
    let is_x86 = matches!(
        target_triple.architecture,
        target_lexicon::Architecture::X86_64
    );

    if is_x86 {
        flag_builder.set("use_colocated_libcalls", "true").unwrap();
    } else {
        flag_builder.set("use_colocated_libcalls", "false").unwrap();
    }
    // JITModule rejects position-independent modules at construction
    flag_builder.set("is_pic", "false").unwrap();

    let isa_builder = cranelift_native::builder()
        .map_err(|msg| BackendError::HostMachineNotSupported(msg.to_string()))?;

    isa_builder
        .finish(settings::Flags::new(flag_builder))
        .map_err(|err| BackendError::Codegen(err.to_string()))
}

/// Creates the JIT module and a context with the `fn(*const f64) -> f64`
/// signature.
fn create_module_and_context(isa: Arc<dyn TargetIsa>) -> (JITModule, CodegenContext) {
    let mut builder = JITBuilder::with_isa(isa, cranelift_module::default_libcall_names());
    builder.symbol("pow", pow_f64 as *const u8);

    let module = JITModule::new(builder);
    let mut ctx = module.make_context();

    let mut sig = module.make_signature();
    sig.params.push(AbiParam::new(types::I64));
    sig.returns.push(AbiParam::new(types::F64));
    ctx.func.signature = sig;

    (module, ctx)
}

fn build_function_body(
    ctx: &mut CodegenContext,
    body: &ScalarExpr,
    module: &mut JITModule,
) -> Result<(), BackendError> {
    let mut builder_ctx = FunctionBuilderContext::new();
    let mut func_builder = FunctionBuilder::new(&mut ctx.func, &mut builder_ctx);

    let entry_block = func_builder.create_block();
    func_builder.switch_to_block(entry_block);

    let input_ptr = func_builder.append_block_param(entry_block, types::I64);

    let result = emit(&mut func_builder, module, input_ptr, body)?;
    func_builder.ins().return_(&[result]);

    func_builder.seal_block(entry_block);
    func_builder.finalize();

    Ok(())
}

fn emit(
    builder: &mut FunctionBuilder,
    module: &mut JITModule,
    input_ptr: Value,
    expr: &ScalarExpr,
) -> Result<Value, BackendError> {
    Ok(match expr {
        ScalarExpr::Const(x) => builder.ins().f64const(*x),
        ScalarExpr::Slot(i) => builder.ins().load(
            types::F64,
            MemFlags::new(),
            input_ptr,
            Offset32::new((*i * 8) as i32),
        ),
        ScalarExpr::Add(l, r) => {
            let l = emit(builder, module, input_ptr, l)?;
            let r = emit(builder, module, input_ptr, r)?;
            builder.ins().fadd(l, r)
        }
        ScalarExpr::Sub(l, r) => {
            let l = emit(builder, module, input_ptr, l)?;
            let r = emit(builder, module, input_ptr, r)?;
            builder.ins().fsub(l, r)
        }
        ScalarExpr::Mul(l, r) => {
            let l = emit(builder, module, input_ptr, l)?;
            let r = emit(builder, module, input_ptr, r)?;
            builder.ins().fmul(l, r)
        }
        ScalarExpr::Div(l, r) => {
            let l = emit(builder, module, input_ptr, l)?;
            let r = emit(builder, module, input_ptr, r)?;
            builder.ins().fdiv(l, r)
        }
        ScalarExpr::Neg(e) => {
            let e = emit(builder, module, input_ptr, e)?;
            builder.ins().fneg(e)
        }
        ScalarExpr::PowInt(base, exp) => {
            let base = emit(builder, module, input_ptr, base)?;
            generate_optimized_power(builder, base, *exp)
        }
        ScalarExpr::Pow(base, exponent) => {
            let base = emit(builder, module, input_ptr, base)?;
            let exponent = emit(builder, module, input_ptr, exponent)?;
            let func_id = link_pow(module)?;
            call_pow(builder, module, func_id, base, exponent)
        }
    })
}

/// Declares the external `pow(f64, f64) -> f64` for use in compiled code.
fn link_pow(module: &mut JITModule) -> Result<FuncId, BackendError> {
    let mut sig = module.make_signature();
    sig.params.push(AbiParam::new(types::F64));
    sig.params.push(AbiParam::new(types::F64));
    sig.returns.push(AbiParam::new(types::F64));

    module
        .declare_function("pow", Linkage::Import, &sig)
        .map_err(|err| BackendError::Declaration(err.to_string()))
}

fn call_pow(
    builder: &mut FunctionBuilder,
    module: &mut JITModule,
    func_id: FuncId,
    base: Value,
    exponent: Value,
) -> Value {
    let func = module.declare_func_in_func(func_id, builder.func);
    let call = builder.ins().call(func, &[base, exponent]);
    builder.inst_results(call)[0]
}

/// Inlines small and negative integer exponents; binary exponentiation for
/// the rest.
fn generate_optimized_power(builder: &mut FunctionBuilder, base: Value, exp: i64) -> Value {
    match exp {
        0 => builder.ins().f64const(1.0),
        1 => base,
        2 => builder.ins().fmul(base, base),
        3 => {
            let square = builder.ins().fmul(base, base);
            builder.ins().fmul(square, base)
        }
        4 => {
            let square = builder.ins().fmul(base, base);
            builder.ins().fmul(square, square)
        }
        -1 => {
            let one = builder.ins().f64const(1.0);
            builder.ins().fdiv(one, base)
        }
        -2 => {
            let square = builder.ins().fmul(base, base);
            let one = builder.ins().f64const(1.0);
            builder.ins().fdiv(one, square)
        }
        _ => {
            let abs_exp = exp.abs();
            let mut result = builder.ins().f64const(1.0);
            let mut current_base = base;
            let mut remaining = abs_exp;

            while remaining > 0 {
                if remaining & 1 == 1 {
                    result = builder.ins().fmul(result, current_base);
                }
                if remaining > 1 {
                    current_base = builder.ins().fmul(current_base, current_base);
                }
                remaining >>= 1;
            }

            if exp < 0 {
                let one = builder.ins().f64const(1.0);
                builder.ins().fdiv(one, result)
            } else {
                result
            }
        }
    }
}

fn compile_and_finalize(
    module: &mut JITModule,
    ctx: &mut CodegenContext,
    name: &str,
) -> Result<fn(*const f64) -> f64, BackendError> {
    let func_id = module
        .declare_function(name, Linkage::Local, &ctx.func.signature)
        .map_err(|err| BackendError::Declaration(err.to_string()))?;

    module
        .define_function(func_id, ctx)
        .map_err(|err| BackendError::Codegen(err.to_string()))?;

    module.clear_context(ctx);
    module
        .finalize_definitions()
        .map_err(|err| BackendError::Module(err.to_string()))?;

    // SAFETY: the function was compiled with signature fn(*const f64) -> f64
    // and its code pages stay mapped for the life of the process.
    let func = unsafe {
        std::mem::transmute::<*const u8, fn(*const f64) -> f64>(
            module.get_finalized_function(func_id),
        )
    };
    Ok(func)
}
