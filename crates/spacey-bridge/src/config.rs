// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Bridge configuration
//!
//! Resolved from defaults, then an optional TOML file, then `SPACEY_BRIDGE_*`
//! environment variables.

use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default bytecode artifact file name
pub const DEFAULT_CACHE_FILE: &str = "bundle.jsbc";

/// Default name of the script-side bridge object
pub const DEFAULT_BRIDGE_OBJECT: &str = "__fbBatchedBridge";

/// Configuration for a script host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Writable directory for the bytecode artifact, supplied by the host
    pub cache_dir: Option<PathBuf>,

    /// Whether to use the bytecode cache at all
    pub bytecode_cache: bool,

    /// Artifact file name inside `cache_dir`
    pub cache_file: String,

    /// Global holding the script-side bridge functions
    pub bridge_object: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            bytecode_cache: true,
            cache_file: DEFAULT_CACHE_FILE.to_string(),
            bridge_object: DEFAULT_BRIDGE_OBJECT.to_string(),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from defaults, an optional file and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.load_from_env();
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML config file; missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| BridgeError::io(path, e))?;
        toml::from_str(&content)
            .map_err(|e| BridgeError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Parse TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| BridgeError::Config(e.to_string()))
    }

    /// Whether runs should go through the bytecode cache
    pub fn caching_enabled(&self) -> bool {
        self.bytecode_cache && self.cache_dir.is_some()
    }

    /// Apply `SPACEY_BRIDGE_*` environment overrides
    fn load_from_env(&mut self) {
        if let Ok(dir) = std::env::var("SPACEY_BRIDGE_CACHE_DIR") {
            if !dir.is_empty() {
                self.cache_dir = Some(PathBuf::from(dir));
            }
        }

        if let Ok(flag) = std::env::var("SPACEY_BRIDGE_BYTECODE_CACHE") {
            match parse_flag(&flag) {
                Some(enabled) => self.bytecode_cache = enabled,
                None => tracing::warn!("Ignoring SPACEY_BRIDGE_BYTECODE_CACHE={}", flag),
            }
        }

        if let Ok(file) = std::env::var("SPACEY_BRIDGE_CACHE_FILE") {
            if !file.is_empty() {
                self.cache_file = file;
            }
        }

        if let Ok(object) = std::env::var("SPACEY_BRIDGE_OBJECT") {
            if !object.is_empty() {
                self.bridge_object = object;
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.cache_file.is_empty() || self.cache_file.contains(['/', '\\']) {
            return Err(BridgeError::Config(format!(
                "cache_file must be a plain file name, got '{}'",
                self.cache_file
            )));
        }
        if self.bridge_object.is_empty() {
            return Err(BridgeError::Config("bridge_object must not be empty".into()));
        }
        Ok(())
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::default();
        assert!(config.bytecode_cache);
        assert!(!config.caching_enabled());
        assert_eq!(config.cache_file, "bundle.jsbc");
        assert_eq!(config.bridge_object, "__fbBatchedBridge");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = BridgeConfig::from_toml("cache_dir = \"/tmp/spacey\"\n").unwrap();
        assert_eq!(config.cache_dir.as_deref(), Some(Path::new("/tmp/spacey")));
        assert!(config.caching_enabled());
        assert_eq!(config.cache_file, DEFAULT_CACHE_FILE);
    }

    #[test]
    fn test_disabled_cache() {
        let config =
            BridgeConfig::from_toml("cache_dir = \"/tmp/spacey\"\nbytecode_cache = false\n").unwrap();
        assert!(!config.caching_enabled());
    }

    #[test]
    fn test_bad_toml() {
        assert!(matches!(
            BridgeConfig::from_toml("bytecode_cache = \"maybe\""),
            Err(BridgeError::Config(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.toml");
        std::fs::write(&path, "cache_file = \"app.jsbc\"\nbridge_object = \"__bridge\"\n").unwrap();

        let config = BridgeConfig::from_file(&path).unwrap();
        assert_eq!(config.cache_file, "app.jsbc");
        assert_eq!(config.bridge_object, "__bridge");

        let missing = BridgeConfig::from_file(&dir.path().join("nope.toml"));
        assert!(matches!(missing, Err(BridgeError::Io { .. })));
    }

    #[test]
    fn test_validate_rejects_paths() {
        let config = BridgeConfig {
            cache_file: "../escape.jsbc".into(),
            ..BridgeConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag(" off "), Some(false));
        assert_eq!(parse_flag("sometimes"), None);
    }
}
