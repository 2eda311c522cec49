// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! # spacey-bridge
//!
//! Hosts an embedded JavaScript engine behind a native bridge.
//!
//! This crate provides:
//! - A single-threaded script host (`ScriptHost`) owning one engine context
//! - Text marshalling of structured values across the native/script boundary
//! - An on-disk bytecode cache with mtime invalidation and background
//!   regeneration
//! - Native hooks the script calls back into (immediate flush, synchronous
//!   calls, logging)
//! - Translation of engine faults into a typed error taxonomy
//!
//! The engine itself sits behind the [`ScriptEngine`] / [`EngineContext`]
//! traits. Enable the `quickjs` feature for a QuickJS backend.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use spacey_bridge::{BridgeConfig, ScriptHost, QuickJsEngine};
//!
//! let config = BridgeConfig::load(None)?;
//! let mut host = ScriptHost::new(QuickJsEngine::default(), &config);
//! host.initialize()?;
//! host.run_script("index.bundle.js", "http://localhost/index.bundle")?;
//! let queue = host.call_function("AppRegistry", "runApplication", "[\"App\",{}]")?;
//! println!("{}", queue);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod hooks;
pub mod host;
pub mod marshal;
#[cfg(feature = "quickjs")]
pub mod quickjs;
pub mod translate;

// Re-exports
pub use cache::{BytecodeCache, CompileReport, Freshness, ScriptOrigin};
pub use config::BridgeConfig;
pub use engine::{EngineContext, EngineFault, ErrorCode, NativeFunction, ScriptEngine, ThrownError};
pub use error::{BridgeError, Result};
pub use hooks::{CallSyncHook, FlushQueueHook, HostHooks};
pub use host::{CallbackHandle, LifecycleState, ScriptHost};
pub use marshal::SerializedValue;
#[cfg(feature = "quickjs")]
pub use quickjs::QuickJsEngine;

/// Version of the spacey-bridge crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
