// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Native hooks the script side calls back into
//!
//! Implements:
//! - `nativeFlushQueueImmediate(queue)` - the engine flushing ahead of an
//!   explicit `flushQueue`
//! - `nativeCallSyncHook(moduleId, methodId, args)` - blocking call into
//!   native code from inside running script
//! - `nativeLoggingHook(message, level)` - script logging routed to `tracing`

use crate::engine::NativeFunction;
use crate::marshal::SerializedValue;
use serde_json::Value;
use std::sync::Arc;

/// Global name of the immediate-flush hook
pub const FLUSH_QUEUE_IMMEDIATE: &str = "nativeFlushQueueImmediate";

/// Global name of the synchronous call hook
pub const CALL_SYNC_HOOK: &str = "nativeCallSyncHook";

/// Global name of the logging hook
pub const LOGGING_HOOK: &str = "nativeLoggingHook";

/// Receives a queue the engine flushed on its own
pub type FlushQueueHook = Arc<dyn Fn(Value) + Send + Sync>;

/// Handles `(moduleId, methodId, args)`; `None` is seen by the script as `null`
pub type CallSyncHook = Arc<dyn Fn(i64, i64, Value) -> Option<Value> + Send + Sync>;

/// The hooks registered on a host.
#[derive(Clone, Default)]
pub struct HostHooks {
    flush_immediate: Option<FlushQueueHook>,
    call_sync: Option<CallSyncHook>,
}

impl HostHooks {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the immediate-flush hook, replacing any previous one
    pub fn set_flush_immediate(&mut self, hook: FlushQueueHook) {
        self.flush_immediate = Some(hook);
    }

    /// Register the synchronous call hook, replacing any previous one
    pub fn set_call_sync(&mut self, hook: CallSyncHook) {
        self.call_sync = Some(hook);
    }

    /// Whether an immediate-flush hook is registered
    pub fn has_flush_immediate(&self) -> bool {
        self.flush_immediate.is_some()
    }

    /// Whether a synchronous call hook is registered
    pub fn has_call_sync(&self) -> bool {
        self.call_sync.is_some()
    }

    /// Every native global to install into a fresh context
    pub fn native_functions(&self) -> Vec<(&'static str, NativeFunction)> {
        let mut natives = vec![(LOGGING_HOOK, logging_native())];
        if let Some(hook) = &self.flush_immediate {
            natives.push((FLUSH_QUEUE_IMMEDIATE, flush_immediate_native(Arc::clone(hook))));
        }
        if let Some(hook) = &self.call_sync {
            natives.push((CALL_SYNC_HOOK, call_sync_native(Arc::clone(hook))));
        }
        natives
    }
}

impl std::fmt::Debug for HostHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostHooks")
            .field("flush_immediate", &self.flush_immediate.is_some())
            .field("call_sync", &self.call_sync.is_some())
            .finish()
    }
}

/// Wrap an immediate-flush hook as an engine native
pub fn flush_immediate_native(hook: FlushQueueHook) -> NativeFunction {
    Box::new(move |args: &[SerializedValue]| -> std::result::Result<SerializedValue, String> {
        let queue = match args.first() {
            Some(arg) => arg.decode().map_err(|e| e.to_string())?,
            None => Value::Null,
        };
        hook(queue);
        Ok(SerializedValue::null())
    })
}

/// Wrap a synchronous call hook as an engine native
pub fn call_sync_native(hook: CallSyncHook) -> NativeFunction {
    Box::new(move |args: &[SerializedValue]| -> std::result::Result<SerializedValue, String> {
        if args.len() < 3 {
            return Err(format!(
                "{} expects (moduleId, methodId, args), got {} arguments",
                CALL_SYNC_HOOK,
                args.len()
            ));
        }
        let module_id = id_argument(&args[0], "moduleId")?;
        let method_id = id_argument(&args[1], "methodId")?;
        let call_args = args[2].decode().map_err(|e| e.to_string())?;

        tracing::trace!(module_id, method_id, "sync call into native");
        let result = hook(module_id, method_id, call_args);
        SerializedValue::from_native(result).map_err(|e| e.to_string())
    })
}

fn id_argument(arg: &SerializedValue, name: &str) -> std::result::Result<i64, String> {
    match arg.decode().map_err(|e| e.to_string())? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| {
                // i64::MAX as f64 rounds up to 2^63, so the upper bound is exclusive.
                n.as_f64()
                    .filter(|f| f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64)
                    .map(|f| f as i64)
            })
            .ok_or_else(|| format!("{} must be an integer, got {}", name, n)),
        other => Err(format!("{} must be a number, got {}", name, other)),
    }
}

/// `nativeLoggingHook(message, level)`; levels follow the script console
pub fn logging_native() -> NativeFunction {
    Box::new(|args: &[SerializedValue]| -> std::result::Result<SerializedValue, String> {
        let message = match args.first().map(|a| a.decode()) {
            Some(Ok(Value::String(s))) => s,
            Some(Ok(other)) => other.to_string(),
            Some(Err(e)) => return Err(e.to_string()),
            None => String::new(),
        };
        let level = args
            .get(1)
            .and_then(|a| a.decode().ok())
            .and_then(|v| v.as_i64())
            .unwrap_or(1);

        match level {
            0 => tracing::trace!(target: "spacey_bridge::script", "{}", message),
            1 => tracing::info!(target: "spacey_bridge::script", "{}", message),
            2 => tracing::warn!(target: "spacey_bridge::script", "{}", message),
            3 => tracing::error!(target: "spacey_bridge::script", "{}", message),
            _ => tracing::debug!(target: "spacey_bridge::script", "{}", message),
        }
        Ok(SerializedValue::null())
    })
}
