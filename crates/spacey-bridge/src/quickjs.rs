// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! QuickJS engine backend
//!
//! Bundles run as classic global scripts in sloppy mode, so top-level `var`
//! and function declarations become globals. Bytecode is the compile-only form
//! of the same global script, evaluated with `JS_EvalFunction`.
//!
//! QuickJS does not validate bytecode it loads, so artifacts are sealed with a
//! header (magic, SHA-256 over engine tag and payload) and anything that does
//! not match is rejected as [`ErrorCode::BadSerializedScript`] before it
//! reaches the engine.

use crate::engine::{EngineContext, EngineFault, ErrorCode, NativeFunction, ScriptEngine, ThrownError};
use crate::marshal::SerializedValue;
use rquickjs::function::{Rest, This};
use rquickjs::{Context, Ctx, Exception, Function, Object, Runtime, Value, qjs};
use sha2::{Digest, Sha256};
use std::ffi::{CString, c_int};

const MAGIC: &[u8; 8] = b"SPCYQJS\0";
const DIGEST_LEN: usize = 32;

/// Identifies the engine build that produced an artifact
const ENGINE_TAG: &str = concat!("rquickjs-0.9/global-script/spacey-bridge-", env!("CARGO_PKG_VERSION"));

/// QuickJS context factory.
#[derive(Debug, Clone, Default)]
pub struct QuickJsEngine {
    /// Heap limit in bytes for each runtime
    pub memory_limit: Option<usize>,
    /// Maximum native stack size in bytes
    pub max_stack_size: Option<usize>,
}

impl QuickJsEngine {
    /// Create an engine with default limits
    pub fn new() -> Self {
        Self::default()
    }
}

impl ScriptEngine for QuickJsEngine {
    type Context = QuickJsContext;

    fn name(&self) -> &str {
        "quickjs"
    }

    fn create_context(&self) -> Result<QuickJsContext, EngineFault> {
        let runtime = Runtime::new().map_err(|e| engine_fault(e, ErrorCode::OutOfMemory))?;
        if let Some(limit) = self.memory_limit {
            runtime.set_memory_limit(limit);
        }
        if let Some(size) = self.max_stack_size {
            runtime.set_max_stack_size(size);
        }
        let context = Context::full(&runtime).map_err(|e| engine_fault(e, ErrorCode::OutOfMemory))?;
        Ok(QuickJsContext { context, runtime })
    }
}

/// One QuickJS runtime with its context.
pub struct QuickJsContext {
    // Field order matters: the context must drop before its runtime.
    context: Context,
    #[allow(dead_code)]
    runtime: Runtime,
}

impl EngineContext for QuickJsContext {
    fn run_source(&mut self, source: &str, source_url: &str) -> Result<(), EngineFault> {
        self.context
            .with(|ctx| eval_global(&ctx, source, source_url, false).map(drop))
    }

    fn run_serialized(&mut self, bytecode: &[u8], _source_url: &str) -> Result<(), EngineFault> {
        let payload = unseal(bytecode)?;
        self.context.with(|ctx| {
            let raw = ctx.as_raw().as_ptr();
            // SAFETY: `unseal` only returns payloads this engine build wrote.
            let function = unsafe {
                qjs::JS_ReadObject(raw, payload.as_ptr(), payload.len() as _, qjs::JS_READ_OBJ_BYTECODE as c_int)
            };
            if unsafe { qjs::JS_IsException(function) } {
                return Err(script_fault(&ctx, rquickjs::Error::Exception, ErrorCode::BadSerializedScript));
            }
            // JS_EvalFunction consumes the function object.
            let result = unsafe { qjs::JS_EvalFunction(raw, function) };
            owned_value(&ctx, result, ErrorCode::ScriptException).map(drop)
        })
    }

    fn serialize(&mut self, source: &str, source_url: &str) -> Result<Vec<u8>, EngineFault> {
        let payload = self.context.with(|ctx| {
            let function = eval_global(&ctx, source, source_url, true)?;
            let raw = ctx.as_raw().as_ptr();
            let mut len = 0;
            // SAFETY: `function` is a live compiled script owned by this context.
            let bytes = unsafe {
                qjs::JS_WriteObject(raw, &mut len, function.as_raw(), qjs::JS_WRITE_OBJ_BYTECODE as c_int)
            };
            if bytes.is_null() {
                return Err(script_fault(&ctx, rquickjs::Error::Exception, ErrorCode::Fatal));
            }
            // SAFETY: QuickJS returned `len` bytes allocated with the context allocator.
            let payload = unsafe { std::slice::from_raw_parts(bytes, len as usize) }.to_vec();
            unsafe { qjs::js_free(raw, bytes.cast()) };
            Ok(payload)
        })?;
        Ok(seal(&payload))
    }

    fn set_global(&mut self, name: &str, value: &SerializedValue) -> Result<(), EngineFault> {
        self.context.with(|ctx| {
            let value = ctx
                .json_parse(value.as_str())
                .map_err(|e| script_fault(&ctx, e, ErrorCode::InvalidArgument))?;
            ctx.globals()
                .set(name, value)
                .map_err(|e| script_fault(&ctx, e, ErrorCode::Fatal))
        })
    }

    fn define_native(&mut self, name: &str, function: NativeFunction) -> Result<(), EngineFault> {
        self.context.with(|ctx| {
            install_native(&ctx, name, function).map_err(|e| script_fault(&ctx, e, ErrorCode::Fatal))
        })
    }

    fn call_member(
        &mut self,
        object: &str,
        member: &str,
        args: &[SerializedValue],
    ) -> Result<Option<String>, EngineFault> {
        self.context.with(|ctx| {
            let target: Object = ctx.globals().get(object).map_err(|_| {
                EngineFault::with_detail(ErrorCode::MissingBinding, format!("{} is not an object", object))
            })?;
            let function: Function = target.get(member).map_err(|_| {
                EngineFault::with_detail(
                    ErrorCode::MissingBinding,
                    format!("{}.{} is not a function", object, member),
                )
            })?;

            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                let value = ctx
                    .json_parse(arg.as_str())
                    .map_err(|e| script_fault(&ctx, e, ErrorCode::InvalidArgument))?;
                values.push(value);
            }

            let result: Value = function
                .call((This(target.clone()), Rest(values)))
                .map_err(|e| script_fault(&ctx, e, ErrorCode::ScriptException))?;

            match ctx.json_stringify(result) {
                Ok(Some(text)) => text
                    .to_string()
                    .map(Some)
                    .map_err(|e| script_fault(&ctx, e, ErrorCode::Fatal)),
                Ok(None) => Ok(None),
                Err(e) => Err(script_fault(&ctx, e, ErrorCode::ScriptException)),
            }
        })
    }

    fn dispose(self) -> Result<(), EngineFault> {
        drop(self);
        Ok(())
    }
}

fn install_native<'js>(ctx: &Ctx<'js>, name: &str, native: NativeFunction) -> rquickjs::Result<()> {
    let function = Function::new(
        ctx.clone(),
        move |ctx: Ctx<'js>, args: Rest<Value<'js>>| -> rquickjs::Result<Value<'js>> {
            let mut encoded = Vec::with_capacity(args.0.len());
            for arg in args.0 {
                encoded.push(encode_argument(&ctx, arg)?);
            }
            match native(&encoded) {
                Ok(result) => ctx.json_parse(result.as_str()),
                Err(message) => Err(Exception::throw_message(&ctx, &message)),
            }
        },
    )?;
    ctx.globals().set(name, function)
}

/// Evaluate (or with `compile_only`, just compile) a sloppy-mode global script
fn eval_global<'js>(
    ctx: &Ctx<'js>,
    source: &str,
    source_url: &str,
    compile_only: bool,
) -> Result<Value<'js>, EngineFault> {
    let input = CString::new(source)
        .map_err(|_| EngineFault::with_detail(ErrorCode::InvalidArgument, "source contains a NUL byte"))?;
    let file_name = CString::new(source_url)
        .map_err(|_| EngineFault::with_detail(ErrorCode::InvalidArgument, "source URL contains a NUL byte"))?;

    let mut flags = qjs::JS_EVAL_TYPE_GLOBAL;
    let mut code = ErrorCode::ScriptException;
    if compile_only {
        flags |= qjs::JS_EVAL_FLAG_COMPILE_ONLY;
        code = ErrorCode::ScriptCompile;
    }

    // SAFETY: both strings are NUL-terminated and outlive the call.
    let value = unsafe {
        qjs::JS_Eval(
            ctx.as_raw().as_ptr(),
            input.as_ptr(),
            source.len() as _,
            file_name.as_ptr(),
            flags as c_int,
        )
    };
    owned_value(ctx, value, code)
}

/// Take ownership of a value returned by a raw QuickJS call
fn owned_value<'js>(ctx: &Ctx<'js>, value: qjs::JSValue, code: ErrorCode) -> Result<Value<'js>, EngineFault> {
    // SAFETY: `value` was just returned by `ctx` and nothing else owns it.
    unsafe {
        if qjs::JS_IsException(value) {
            return Err(script_fault(ctx, rquickjs::Error::Exception, code));
        }
        Ok(Value::from_raw(ctx.clone(), value))
    }
}

fn encode_argument<'js>(ctx: &Ctx<'js>, value: Value<'js>) -> rquickjs::Result<SerializedValue> {
    let text = match ctx.json_stringify(value)? {
        Some(text) => text.to_string()?,
        None => return Ok(SerializedValue::null()),
    };
    SerializedValue::parse(&text).map_err(|e| Exception::throw_type(ctx, &e.to_string()))
}

fn engine_fault(error: rquickjs::Error, code: ErrorCode) -> EngineFault {
    let code = match error {
        rquickjs::Error::Allocation => ErrorCode::OutOfMemory,
        _ => code,
    };
    EngineFault::with_detail(code, error.to_string())
}

/// Turn an rquickjs error into a fault, pulling the pending exception if any
fn script_fault(ctx: &Ctx<'_>, error: rquickjs::Error, code: ErrorCode) -> EngineFault {
    if !matches!(error, rquickjs::Error::Exception) {
        return engine_fault(error, code);
    }

    let thrown = ctx.catch();
    let thrown = match thrown.as_object() {
        Some(object) => ThrownError {
            message: object.get::<_, Option<String>>("message").ok().flatten(),
            stack: object.get::<_, Option<String>>("stack").ok().flatten(),
        },
        None => ThrownError {
            message: primitive_message(ctx, &thrown),
            stack: None,
        },
    };

    let code = match code {
        ErrorCode::BadSerializedScript | ErrorCode::ScriptCompile => code,
        _ => ErrorCode::ScriptException,
    };
    EngineFault {
        code,
        thrown: Some(thrown),
        detail: None,
    }
}

/// Message for a thrown primitive: strings as-is, anything else as JSON
fn primitive_message<'js>(ctx: &Ctx<'js>, thrown: &Value<'js>) -> Option<String> {
    if let Some(text) = thrown.as_string() {
        return text.to_string().ok();
    }
    ctx.json_stringify(thrown.clone())
        .ok()
        .flatten()
        .and_then(|s| s.to_string().ok())
}

fn digest(payload: &[u8]) -> [u8; DIGEST_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(ENGINE_TAG.as_bytes());
    hasher.update(payload);
    hasher.finalize().into()
}

fn seal(payload: &[u8]) -> Vec<u8> {
    let mut sealed = Vec::with_capacity(MAGIC.len() + DIGEST_LEN + payload.len());
    sealed.extend_from_slice(MAGIC);
    sealed.extend_from_slice(&digest(payload));
    sealed.extend_from_slice(payload);
    sealed
}

fn unseal(bytecode: &[u8]) -> Result<&[u8], EngineFault> {
    let header = MAGIC.len() + DIGEST_LEN;
    if bytecode.len() <= header || &bytecode[..MAGIC.len()] != MAGIC {
        return Err(EngineFault::with_detail(
            ErrorCode::BadSerializedScript,
            "missing bytecode header",
        ));
    }
    let payload = &bytecode[header..];
    if bytecode[MAGIC.len()..header] != digest(payload) {
        return Err(EngineFault::with_detail(
            ErrorCode::BadSerializedScript,
            "bytecode was written by another engine build or is corrupt",
        ));
    }
    Ok(payload)
}
