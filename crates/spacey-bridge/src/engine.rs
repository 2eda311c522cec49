// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Engine seam
//!
//! Everything the host needs from a JavaScript engine. Values cross this seam
//! only as JSON text; the engine is responsible for parsing arguments into its
//! own representation and stringifying results back out.

use crate::marshal::SerializedValue;
use std::fmt;
use thiserror::Error;

/// Engine-native fault codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// An argument handed to the engine was rejected
    InvalidArgument,
    /// The engine could not allocate memory
    OutOfMemory,
    /// A context is already active on this thread
    ContextInUse,
    /// The context was used from a thread it is not bound to
    WrongThread,
    /// A global or member the host relies on does not exist
    MissingBinding,
    /// Script threw and nothing caught it
    ScriptException,
    /// Source failed to compile
    ScriptCompile,
    /// Serialized bytecode was rejected (corrupt or built by another engine)
    BadSerializedScript,
    /// Execution was terminated by the engine
    ScriptTerminated,
    /// Unrecoverable engine failure
    Fatal,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::InvalidArgument => "InvalidArgument",
            ErrorCode::OutOfMemory => "OutOfMemory",
            ErrorCode::ContextInUse => "ContextInUse",
            ErrorCode::WrongThread => "WrongThread",
            ErrorCode::MissingBinding => "MissingBinding",
            ErrorCode::ScriptException => "ScriptException",
            ErrorCode::ScriptCompile => "ScriptCompile",
            ErrorCode::BadSerializedScript => "BadSerializedScript",
            ErrorCode::ScriptTerminated => "ScriptTerminated",
            ErrorCode::Fatal => "Fatal",
        };
        f.write_str(name)
    }
}

/// What the engine could pull out of a thrown value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThrownError {
    /// `error.message`, when the thrown value has one
    pub message: Option<String>,
    /// `error.stack`, when the thrown value has one
    pub stack: Option<String>,
}

impl ThrownError {
    /// Create a thrown error with both message and stack
    pub fn new(message: impl Into<String>, stack: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            stack: Some(stack.into()),
        }
    }
}

/// A fault reported by the engine.
#[derive(Debug, Clone, Error)]
#[error("engine fault {code}{}", detail_suffix(.detail))]
pub struct EngineFault {
    /// Fault code
    pub code: ErrorCode,
    /// The thrown value, for script faults
    pub thrown: Option<ThrownError>,
    /// Free-form engine diagnostic
    pub detail: Option<String>,
}

impl EngineFault {
    /// Fault with a code only
    pub fn new(code: ErrorCode) -> Self {
        Self {
            code,
            thrown: None,
            detail: None,
        }
    }

    /// Fault with an engine diagnostic
    pub fn with_detail(code: ErrorCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            thrown: None,
            detail: Some(detail.into()),
        }
    }

    /// Uncaught script exception carrying the thrown value
    pub fn exception(thrown: ThrownError) -> Self {
        Self {
            code: ErrorCode::ScriptException,
            thrown: Some(thrown),
            detail: None,
        }
    }
}

fn detail_suffix(detail: &Option<String>) -> String {
    detail.as_deref().map(|d| format!(": {}", d)).unwrap_or_default()
}

/// A native function installed as a script global.
///
/// Arguments arrive JSON-encoded, one `SerializedValue` per script argument.
/// An `Err` is thrown into the script as an `Error` with that message.
pub type NativeFunction =
    Box<dyn Fn(&[SerializedValue]) -> std::result::Result<SerializedValue, String> + Send>;

/// Factory for execution contexts.
///
/// Shared between the host thread and background compilation threads, so it
/// must be `Send + Sync`. Contexts themselves never leave the thread that
/// created them.
pub trait ScriptEngine: Send + Sync + 'static {
    /// Execution context type
    type Context: EngineContext;

    /// Engine name for diagnostics
    fn name(&self) -> &str;

    /// Allocate a fresh context on the calling thread
    fn create_context(&self) -> std::result::Result<Self::Context, EngineFault>;
}

/// One isolated script execution environment.
pub trait EngineContext {
    /// Evaluate source, attributing stack frames to `source_url`
    fn run_source(&mut self, source: &str, source_url: &str) -> std::result::Result<(), EngineFault>;

    /// Evaluate previously serialized bytecode
    ///
    /// Bytecode this engine build cannot load must fail with
    /// [`ErrorCode::BadSerializedScript`].
    fn run_serialized(
        &mut self,
        bytecode: &[u8],
        source_url: &str,
    ) -> std::result::Result<(), EngineFault>;

    /// Compile source to bytecode without running it
    fn serialize(&mut self, source: &str, source_url: &str) -> std::result::Result<Vec<u8>, EngineFault>;

    /// Define or overwrite a global binding with a JSON value
    fn set_global(&mut self, name: &str, value: &SerializedValue) -> std::result::Result<(), EngineFault>;

    /// Install a native function as a global
    fn define_native(&mut self, name: &str, function: NativeFunction) -> std::result::Result<(), EngineFault>;

    /// Call `globalThis[object][member](...args)`.
    ///
    /// Returns the JSON text of the result, or `None` when the result has no
    /// JSON form (`undefined`, functions).
    fn call_member(
        &mut self,
        object: &str,
        member: &str,
        args: &[SerializedValue],
    ) -> std::result::Result<Option<String>, EngineFault>;

    /// Tear the context down
    fn dispose(self) -> std::result::Result<(), EngineFault>
    where
        Self: Sized;
}
