//! Scripted engine for integration tests
//!
//! Scripts are line-based directives instead of JavaScript:
//! - `throw <message>|<stack>` throws an error with that message and stack
//! - `throw` throws a value with no message
//! - `fail-compile` makes `serialize` fail
//! - anything else runs without effect
//!
//! The bridge object answers `callFunctionReturnFlushedQueue`,
//! `invokeCallbackAndReturnFlushedQueue` and `flushedQueue`. A few module
//! names trigger special behaviour:
//! - `Sync` calls `nativeCallSyncHook(1, 2, args)` and queues its result
//! - `Immediate` hands the queue to `nativeFlushQueueImmediate`
//! - `Throw` throws with the method name as message
//! - `Malformed` returns text that is not JSON
//! - `Void` returns `undefined`

#![allow(dead_code)]

use crossbeam::channel::Receiver;
use parking_lot::Mutex;
use serde_json::{Value, json};
use spacey_bridge::{
    EngineContext, EngineFault, ErrorCode, NativeFunction, ScriptEngine, SerializedValue, ThrownError,
};
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

pub const BYTECODE_PREFIX: &[u8] = b"SCRIPTED1\n";
pub const BRIDGE: &str = "__fbBatchedBridge";

/// Everything the engine observed, across all of its contexts
#[derive(Debug, Default)]
pub struct EngineLog {
    pub contexts_created: usize,
    pub contexts_disposed: usize,
    pub sources_run: Vec<String>,
    pub artifacts_run: Vec<String>,
    pub compiles: usize,
    pub engine_calls: usize,
    pub globals: HashMap<String, Value>,
    pub natives: Vec<String>,
}

struct Shared {
    log: Mutex<EngineLog>,
    compile_gate: Option<Receiver<()>>,
    fail_init: bool,
}

#[derive(Clone)]
pub struct ScriptedEngine {
    shared: Arc<Shared>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::build(None, false)
    }

    /// Compilations block until a token arrives on `gate`
    pub fn with_compile_gate(gate: Receiver<()>) -> Self {
        Self::build(Some(gate), false)
    }

    /// Context creation always fails
    pub fn failing() -> Self {
        Self::build(None, true)
    }

    fn build(compile_gate: Option<Receiver<()>>, fail_init: bool) -> Self {
        Self {
            shared: Arc::new(Shared {
                log: Mutex::new(EngineLog::default()),
                compile_gate,
                fail_init,
            }),
        }
    }

    pub fn log(&self) -> parking_lot::MutexGuard<'_, EngineLog> {
        self.shared.log.lock()
    }
}

impl ScriptEngine for ScriptedEngine {
    type Context = ScriptedContext;

    fn name(&self) -> &str {
        "scripted"
    }

    fn create_context(&self) -> Result<ScriptedContext, EngineFault> {
        if self.shared.fail_init {
            return Err(EngineFault::with_detail(ErrorCode::OutOfMemory, "no memory for context"));
        }
        self.shared.log.lock().contexts_created += 1;
        Ok(ScriptedContext {
            shared: Arc::clone(&self.shared),
            natives: HashMap::new(),
            queue: Vec::new(),
        })
    }
}

pub struct ScriptedContext {
    shared: Arc<Shared>,
    natives: HashMap<String, NativeFunction>,
    queue: Vec<Value>,
}

impl ScriptedContext {
    fn execute(&self, source: &str) -> Result<(), EngineFault> {
        for line in source.lines() {
            let line = line.trim();
            if line == "throw" {
                return Err(EngineFault::exception(ThrownError::default()));
            }
            if let Some(rest) = line.strip_prefix("throw ") {
                let (message, stack) = rest.split_once('|').unwrap_or((rest, ""));
                return Err(EngineFault::exception(ThrownError::new(message, stack)));
            }
        }
        Ok(())
    }

    fn call_native(&self, name: &str, args: Vec<Value>) -> Result<Value, EngineFault> {
        let native = self.natives.get(name).ok_or_else(|| {
            EngineFault::with_detail(ErrorCode::MissingBinding, format!("{} is not defined", name))
        })?;
        let args: Vec<SerializedValue> = args
            .iter()
            .map(|a| SerializedValue::from_value(a).unwrap())
            .collect();
        match native(&args) {
            Ok(result) => Ok(result.decode().unwrap()),
            Err(message) => Err(EngineFault::exception(ThrownError {
                message: Some(message),
                stack: None,
            })),
        }
    }

    fn drain(&mut self) -> Option<String> {
        let queue: Vec<Value> = self.queue.drain(..).collect();
        Some(Value::Array(queue).to_string())
    }
}

impl EngineContext for ScriptedContext {
    fn run_source(&mut self, source: &str, source_url: &str) -> Result<(), EngineFault> {
        self.shared.log.lock().sources_run.push(source_url.to_string());
        self.execute(source)
    }

    fn run_serialized(&mut self, bytecode: &[u8], source_url: &str) -> Result<(), EngineFault> {
        let source = bytecode
            .strip_prefix(BYTECODE_PREFIX)
            .and_then(|rest| std::str::from_utf8(rest).ok())
            .ok_or_else(|| EngineFault::new(ErrorCode::BadSerializedScript))?;
        self.shared.log.lock().artifacts_run.push(source_url.to_string());
        self.execute(source)
    }

    fn serialize(&mut self, source: &str, _source_url: &str) -> Result<Vec<u8>, EngineFault> {
        if let Some(gate) = &self.shared.compile_gate {
            let _ = gate.recv();
        }
        self.shared.log.lock().compiles += 1;
        if source.lines().any(|l| l.trim() == "fail-compile") {
            return Err(EngineFault::with_detail(ErrorCode::ScriptCompile, "fail-compile"));
        }
        Ok(artifact_bytes(source))
    }

    fn set_global(&mut self, name: &str, value: &SerializedValue) -> Result<(), EngineFault> {
        let mut log = self.shared.log.lock();
        log.engine_calls += 1;
        log.globals.insert(name.to_string(), value.decode().unwrap());
        Ok(())
    }

    fn define_native(&mut self, name: &str, function: NativeFunction) -> Result<(), EngineFault> {
        self.shared.log.lock().natives.push(name.to_string());
        self.natives.insert(name.to_string(), function);
        Ok(())
    }

    fn call_member(
        &mut self,
        object: &str,
        member: &str,
        args: &[SerializedValue],
    ) -> Result<Option<String>, EngineFault> {
        self.shared.log.lock().engine_calls += 1;
        if object != BRIDGE {
            return Err(EngineFault::new(ErrorCode::MissingBinding));
        }
        let args: Vec<Value> = args.iter().map(|a| a.decode().unwrap()).collect();

        match member {
            "callFunctionReturnFlushedQueue" => {
                let module = args[0].as_str().unwrap_or_default().to_string();
                let method = args[1].as_str().unwrap_or_default().to_string();
                match module.as_str() {
                    "Sync" => {
                        let result =
                            self.call_native("nativeCallSyncHook", vec![json!(1), json!(2), args[2].clone()])?;
                        self.queue.push(json!([module, method, result]));
                    }
                    "Immediate" => {
                        self.queue.push(json!([module, method, args[2]]));
                        let flushed = Value::Array(self.queue.drain(..).collect());
                        self.call_native("nativeFlushQueueImmediate", vec![flushed])?;
                    }
                    "Throw" => {
                        return Err(EngineFault::exception(ThrownError::new(method, "at bridge")));
                    }
                    "Malformed" => return Ok(Some("{not json".to_string())),
                    "Void" => return Ok(None),
                    _ => self.queue.push(json!([module, method, args[2]])),
                }
                Ok(self.drain())
            }
            "invokeCallbackAndReturnFlushedQueue" => {
                self.queue.push(json!(["callback", args[0], args[1]]));
                Ok(self.drain())
            }
            "flushedQueue" => Ok(self.drain()),
            _ => Err(EngineFault::new(ErrorCode::MissingBinding)),
        }
    }

    fn dispose(self) -> Result<(), EngineFault> {
        self.shared.log.lock().contexts_disposed += 1;
        Ok(())
    }
}

/// Bytecode the scripted engine accepts for `source`
pub fn artifact_bytes(source: &str) -> Vec<u8> {
    let mut bytes = BYTECODE_PREFIX.to_vec();
    bytes.extend_from_slice(source.as_bytes());
    bytes
}

pub fn set_mtime(path: &Path, time: SystemTime) {
    File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(time)
        .unwrap();
}
