// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Value marshalling across the native/script boundary
//!
//! Structured values cross as compact JSON text. Text coming from outside the
//! host (callers, the engine) is parsed in full on arrival so malformed input
//! fails at the boundary instead of somewhere inside the engine.

use crate::error::Result;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

const NULL_ENCODING: &str = "null";

/// Immutable compact JSON text for one structured value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SerializedValue(Arc<str>);

impl SerializedValue {
    /// The encoding of `null`
    pub fn null() -> Self {
        Self(Arc::from(NULL_ENCODING))
    }

    /// Parse and re-encode untrusted text
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(&value)
    }

    /// Encode a structured value
    pub fn from_value(value: &Value) -> Result<Self> {
        encode(value)
    }

    /// Result text handed back by the engine; absent results become `null`
    pub fn from_engine(text: Option<String>) -> Result<Self> {
        match text {
            Some(text) => Self::parse(&text),
            None => Ok(Self::null()),
        }
    }

    /// Result of a native hook; no value becomes `null`
    pub fn from_native(value: Option<Value>) -> Result<Self> {
        match value {
            Some(value) => Self::from_value(&value),
            None => Ok(Self::null()),
        }
    }

    /// The JSON text
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the `null` encoding
    pub fn is_null(&self) -> bool {
        &*self.0 == NULL_ENCODING
    }

    /// Decode into a structured value
    pub fn decode(&self) -> Result<Value> {
        decode(self)
    }

    /// Decode into a typed value
    pub fn decode_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.0)?)
    }
}

impl fmt::Display for SerializedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SerializedValue {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Encode any serializable value to its compact form
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<SerializedValue> {
    let text = serde_json::to_string(value)?;
    Ok(SerializedValue(Arc::from(text)))
}

/// Decode serialized text into a structured value
pub fn decode(value: &SerializedValue) -> Result<Value> {
    Ok(serde_json::from_str(&value.0)?)
}
