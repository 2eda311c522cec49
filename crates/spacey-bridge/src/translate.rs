// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Engine fault translation
//!
//! Every fault an engine reports passes through here before reaching a caller,
//! so no raw fault code leaks out of the host.

use crate::engine::{EngineFault, ErrorCode};
use crate::error::BridgeError;

/// Generic message for a fault code, used when the engine gives nothing better
pub fn generic_message(code: ErrorCode) -> &'static str {
    match code {
        ErrorCode::InvalidArgument => "An argument passed to the engine was invalid",
        ErrorCode::OutOfMemory => "The engine ran out of memory",
        ErrorCode::ContextInUse => "Another context is already active on this thread",
        ErrorCode::WrongThread => "The context was used from the wrong thread",
        ErrorCode::MissingBinding => "A required script binding is not defined",
        ErrorCode::ScriptException => "An exception was thrown by the script",
        ErrorCode::ScriptCompile => "The script failed to compile",
        ErrorCode::BadSerializedScript => "The serialized script is corrupt or incompatible",
        ErrorCode::ScriptTerminated => "Script execution was terminated",
        ErrorCode::Fatal => "The engine encountered a fatal error",
    }
}

/// Translate a fault from any engine call
pub fn translate(fault: EngineFault) -> BridgeError {
    match fault.code {
        ErrorCode::ScriptException | ErrorCode::ScriptCompile | ErrorCode::ScriptTerminated => {
            script_error(fault)
        }
        code => BridgeError::Engine {
            code,
            message: fault
                .detail
                .clone()
                .unwrap_or_else(|| generic_message(code).to_string()),
        },
    }
}

/// Translate a fault from context creation or teardown
pub fn translate_init(fault: EngineFault) -> BridgeError {
    let message = match &fault.detail {
        Some(detail) => format!("{}: {}", generic_message(fault.code), detail),
        None => generic_message(fault.code).to_string(),
    };
    BridgeError::EngineInit(message)
}

fn script_error(fault: EngineFault) -> BridgeError {
    let (message, stack) = match &fault.thrown {
        Some(thrown) => (thrown.message.clone(), thrown.stack.clone()),
        None => (None, None),
    };
    let message = message
        .filter(|m| !m.is_empty())
        .or_else(|| fault.detail.clone())
        .unwrap_or_else(|| generic_message(fault.code).to_string());

    BridgeError::ScriptExecution {
        message,
        stack,
        inner: fault,
    }
}
