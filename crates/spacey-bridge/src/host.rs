// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Script execution host
//!
//! Owns one engine context bound to the thread that initialized it. Every
//! operation checks that binding first, so misuse fails with a clear error
//! instead of reaching the engine from the wrong thread.

use crate::cache::{self, BytecodeCache, ScriptOrigin};
use crate::config::{BridgeConfig, DEFAULT_BRIDGE_OBJECT};
use crate::engine::{EngineContext, ScriptEngine};
use crate::error::{BridgeError, Result};
use crate::hooks::{self, HostHooks};
use crate::marshal::{self, SerializedValue};
use crate::translate::{translate, translate_init};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, LazyLock};
use std::thread::{self, ThreadId};
use tracing::{debug, warn};

/// Threads that currently have an initialized host
static BOUND_THREADS: LazyLock<Mutex<HashSet<ThreadId>>> =
    LazyLock::new(|| Mutex::new(HashSet::new()));

/// Lifecycle of a host's execution context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Constructed, no context yet
    Uninitialized,
    /// Context created and bound to a thread
    Initialized,
    /// Context released
    Disposed,
}

impl LifecycleState {
    fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Uninitialized => "uninitialized",
            LifecycleState::Initialized => "initialized",
            LifecycleState::Disposed => "disposed",
        }
    }
}

/// Identifier of a pending script-side callback, minted by the script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallbackHandle(pub i64);

/// Single-threaded host for one engine context.
pub struct ScriptHost<E: ScriptEngine> {
    /// Engine, shared with background compilation threads
    engine: Arc<E>,
    /// The context, present only while initialized
    context: Option<E::Context>,
    state: LifecycleState,
    /// Thread the context is bound to
    owner: Option<ThreadId>,
    cache: BytecodeCache,
    hooks: HostHooks,
    /// Global holding the script-side bridge functions
    bridge_object: String,
}

impl<E: ScriptEngine> ScriptHost<E> {
    /// Create a host configured from `config`
    pub fn new(engine: E, config: &BridgeConfig) -> Self {
        Self::with_cache(engine, BytecodeCache::from_config(config))
            .with_bridge_object(config.bridge_object.clone())
    }

    /// Create a host with an explicit cache
    pub fn with_cache(engine: E, cache: BytecodeCache) -> Self {
        Self {
            engine: Arc::new(engine),
            context: None,
            state: LifecycleState::Uninitialized,
            owner: None,
            cache,
            hooks: HostHooks::new(),
            bridge_object: DEFAULT_BRIDGE_OBJECT.to_string(),
        }
    }

    /// Use a different global for the script-side bridge
    pub fn with_bridge_object(mut self, name: impl Into<String>) -> Self {
        self.bridge_object = name.into();
        self
    }

    /// The engine
    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    /// Current lifecycle state
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Thread the context is bound to, once initialized
    pub fn owner_thread(&self) -> Option<ThreadId> {
        self.owner
    }

    /// The bytecode cache
    pub fn cache(&self) -> &BytecodeCache {
        &self.cache
    }

    /// Registered hooks
    pub fn hooks(&self) -> &HostHooks {
        &self.hooks
    }

    /// Create the context and bind it to the calling thread.
    pub fn initialize(&mut self) -> Result<()> {
        if self.state != LifecycleState::Uninitialized {
            return Err(BridgeError::invalid_state("initialize", self.state.as_str()));
        }

        let current = thread::current().id();
        if !BOUND_THREADS.lock().insert(current) {
            return Err(BridgeError::EngineInit(
                "another script host is already active on this thread".into(),
            ));
        }

        let mut context = match self.engine.create_context() {
            Ok(context) => context,
            Err(fault) => {
                release_thread(current);
                return Err(translate_init(fault));
            }
        };

        for (name, native) in self.hooks.native_functions() {
            if let Err(fault) = context.define_native(name, native) {
                if let Err(e) = context.dispose() {
                    warn!("Failed to dispose context after init failure: {}", e);
                }
                release_thread(current);
                return Err(translate_init(fault));
            }
        }

        self.context = Some(context);
        self.owner = Some(current);
        self.state = LifecycleState::Initialized;
        debug!(engine = self.engine.name(), "Script host initialized on {:?}", current);
        Ok(())
    }

    /// Run a script file, attributing stack traces to `source_url`.
    pub fn run_script(&mut self, source_path: impl AsRef<Path>, source_url: &str) -> Result<ScriptOrigin> {
        let source_path = source_path.as_ref();
        if source_path.as_os_str().is_empty() {
            return Err(BridgeError::InvalidArgument("source_path"));
        }
        require("source_url", source_url)?;

        self.check_access("run script")?;
        let context = self
            .context
            .as_mut()
            .ok_or(BridgeError::invalid_state("run script", "disposed"))?;

        debug!("Running {} as {}", source_path.display(), source_url);
        if self.cache.is_enabled() {
            self.cache.run_script(&self.engine, context, source_path, source_url)
        } else {
            cache::run_source(context, source_path, source_url)?;
            Ok(ScriptOrigin::Source {
                compile_scheduled: false,
            })
        }
    }

    /// Call `module_name.method_name(args)` and return the flushed queue.
    pub fn call_function(
        &mut self,
        module_name: &str,
        method_name: &str,
        args_json: &str,
    ) -> Result<SerializedValue> {
        require("module_name", module_name)?;
        require("method_name", method_name)?;
        require("args", args_json)?;
        let args = SerializedValue::parse(args_json)?;

        self.call_bridge(
            "call function",
            "callFunctionReturnFlushedQueue",
            &[marshal::encode(module_name)?, marshal::encode(method_name)?, args],
        )
    }

    /// Like [`call_function`](Self::call_function), encoding `args` first
    pub fn call_function_with<T: Serialize + ?Sized>(
        &mut self,
        module_name: &str,
        method_name: &str,
        args: &T,
    ) -> Result<SerializedValue> {
        let args = marshal::encode(args)?;
        self.call_function(module_name, method_name, args.as_str())
    }

    /// Resume the script callback `callback` and return the flushed queue.
    pub fn invoke_callback(&mut self, callback: CallbackHandle, args_json: &str) -> Result<SerializedValue> {
        require("args", args_json)?;
        let args = SerializedValue::parse(args_json)?;

        self.call_bridge(
            "invoke callback",
            "invokeCallbackAndReturnFlushedQueue",
            &[marshal::encode(&callback)?, args],
        )
    }

    /// Drain the queue without running any other script.
    pub fn flush_queue(&mut self) -> Result<SerializedValue> {
        self.call_bridge("flush queue", "flushedQueue", &[])
    }

    /// Define or overwrite the global `name` with the JSON value `value_json`.
    pub fn set_global(&mut self, name: &str, value_json: &str) -> Result<()> {
        require("name", name)?;
        require("value", value_json)?;
        let value = SerializedValue::parse(value_json)?;

        self.check_access("set global")?;
        let context = self
            .context
            .as_mut()
            .ok_or(BridgeError::invalid_state("set global", "disposed"))?;
        context.set_global(name, &value).map_err(translate)
    }

    /// Like [`set_global`](Self::set_global), encoding `value` first
    pub fn set_global_value<T: Serialize + ?Sized>(&mut self, name: &str, value: &T) -> Result<()> {
        let value = marshal::encode(value)?;
        self.set_global(name, value.as_str())
    }

    /// Register the hook receiving queues the engine flushes on its own.
    pub fn set_flush_queue_immediate<F>(&mut self, hook: F) -> Result<()>
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        let hook: hooks::FlushQueueHook = Arc::new(hook);
        self.hooks.set_flush_immediate(Arc::clone(&hook));
        self.install_native(hooks::FLUSH_QUEUE_IMMEDIATE, || hooks::flush_immediate_native(hook))
    }

    /// Register the hook serving synchronous calls from script.
    pub fn set_call_sync_hook<F>(&mut self, hook: F) -> Result<()>
    where
        F: Fn(i64, i64, Value) -> Option<Value> + Send + Sync + 'static,
    {
        let hook: hooks::CallSyncHook = Arc::new(hook);
        self.hooks.set_call_sync(Arc::clone(&hook));
        self.install_native(hooks::CALL_SYNC_HOOK, || hooks::call_sync_native(hook))
    }

    /// Release the context. A second call fails with `InvalidState`.
    pub fn dispose(&mut self) -> Result<()> {
        self.check_access("dispose")?;
        let context = self
            .context
            .take()
            .ok_or(BridgeError::invalid_state("dispose", "disposed"))?;

        self.state = LifecycleState::Disposed;
        if let Some(owner) = self.owner {
            release_thread(owner);
        }
        debug!("Script host disposed");
        context.dispose().map_err(translate_init)
    }

    /// Hooks registered before `initialize` are installed there; afterwards
    /// they go straight into the live context.
    fn install_native(
        &mut self,
        name: &'static str,
        native: impl FnOnce() -> crate::engine::NativeFunction,
    ) -> Result<()> {
        match self.state {
            LifecycleState::Uninitialized => Ok(()),
            LifecycleState::Disposed => Err(BridgeError::invalid_state("register hook", "disposed")),
            LifecycleState::Initialized => {
                self.check_access("register hook")?;
                let context = self
                    .context
                    .as_mut()
                    .ok_or(BridgeError::invalid_state("register hook", "disposed"))?;
                context.define_native(name, native()).map_err(translate)
            }
        }
    }

    fn call_bridge(
        &mut self,
        operation: &'static str,
        member: &str,
        args: &[SerializedValue],
    ) -> Result<SerializedValue> {
        self.check_access(operation)?;
        let context = self
            .context
            .as_mut()
            .ok_or(BridgeError::invalid_state(operation, "disposed"))?;

        let result = context
            .call_member(&self.bridge_object, member, args)
            .map_err(translate)?;
        SerializedValue::from_engine(result)
    }

    fn check_access(&self, operation: &'static str) -> Result<()> {
        if self.state != LifecycleState::Initialized {
            return Err(BridgeError::invalid_state(operation, self.state.as_str()));
        }
        let current = thread::current().id();
        match self.owner {
            Some(owner) if owner != current => Err(BridgeError::ThreadAffinity { owner, current }),
            _ => Ok(()),
        }
    }
}

impl<E: ScriptEngine> Drop for ScriptHost<E> {
    fn drop(&mut self) {
        let Some(context) = self.context.take() else {
            return;
        };
        let owner = self.owner;
        if let Some(owner) = owner {
            release_thread(owner);
        }

        if owner == Some(thread::current().id()) {
            if let Err(e) = context.dispose() {
                warn!("Failed to dispose context on drop: {}", e);
            }
        } else {
            // Tearing down from a foreign thread is undefined for the engine.
            warn!("Script host dropped off its owner thread; leaking the context");
            std::mem::forget(context);
        }
    }
}

impl<E: ScriptEngine> std::fmt::Debug for ScriptHost<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptHost")
            .field("engine", &self.engine.name())
            .field("state", &self.state)
            .field("owner", &self.owner)
            .field("cache", &self.cache)
            .field("hooks", &self.hooks)
            .field("bridge_object", &self.bridge_object)
            .finish()
    }
}

fn require(name: &'static str, value: &str) -> Result<()> {
    if value.is_empty() {
        Err(BridgeError::InvalidArgument(name))
    } else {
        Ok(())
    }
}

fn release_thread(thread: ThreadId) {
    BOUND_THREADS.lock().remove(&thread);
}
