// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Error types for the script bridge

use crate::engine::{EngineFault, ErrorCode};
use std::path::PathBuf;
use std::thread::ThreadId;
use thiserror::Error;

/// Result type for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors surfaced by the script bridge
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Context creation or teardown failed
    #[error("Engine initialization failed: {0}")]
    EngineInit(String),

    /// A required parameter was missing
    #[error("Invalid argument: '{0}' must not be empty")]
    InvalidArgument(&'static str),

    /// Operation not allowed in the host's current lifecycle state
    #[error("Cannot {operation} while host is {state}")]
    InvalidState {
        /// Operation that was attempted
        operation: &'static str,
        /// State the host was in
        state: &'static str,
    },

    /// Operation issued from a thread the context is not bound to
    #[error("Context is bound to thread {owner:?}, called from {current:?}")]
    ThreadAffinity {
        /// Thread that owns the context
        owner: ThreadId,
        /// Calling thread
        current: ThreadId,
    },

    /// Structured value text could not be encoded or decoded
    #[error("Marshal error: {0}")]
    Marshal(#[from] serde_json::Error),

    /// Uncaught script exception
    #[error("{message}")]
    ScriptExecution {
        /// `error.message`, or a generic message for the fault code
        message: String,
        /// `error.stack`, when available
        stack: Option<String>,
        /// The engine fault this was translated from
        #[source]
        inner: EngineFault,
    },

    /// Cached bytecode could not be used; never leaves the cache layer
    #[error("Bad bytecode artifact: {}", .0.display())]
    BadCacheArtifact(PathBuf),

    /// Any other engine fault
    #[error("Engine error ({code}): {message}")]
    Engine {
        /// Engine fault code
        code: ErrorCode,
        /// Diagnostic message
        message: String,
    },

    /// File system error
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        /// Path being accessed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl BridgeError {
    /// Create an I/O error for a path
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(operation: &'static str, state: &'static str) -> Self {
        Self::InvalidState { operation, state }
    }

    /// Whether the error came from script code rather than the host
    pub fn is_script_error(&self) -> bool {
        matches!(self, Self::ScriptExecution { .. })
    }

    /// Script stack trace, for script errors that carry one
    pub fn script_stack(&self) -> Option<&str> {
        match self {
            Self::ScriptExecution { stack, .. } => stack.as_deref(),
            _ => None,
        }
    }
}
