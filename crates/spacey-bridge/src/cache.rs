// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Bytecode cache
//!
//! Decides whether a script runs from a cached bytecode artifact or from
//! source. An artifact is valid only while its mtime is strictly newer than the
//! source's. Missing, stale or unusable artifacts are rebuilt by a detached
//! background thread with its own context, while the source runs synchronously
//! on the caller's context. The synchronous path never waits for that thread.

use crate::config::{BridgeConfig, DEFAULT_CACHE_FILE};
use crate::engine::{EngineContext, ErrorCode, ScriptEngine};
use crate::error::{BridgeError, Result};
use crate::translate::{translate, translate_init};
use crossbeam::channel::Sender;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// Per-artifact locks serializing background compilations of the same path
static COMPILE_LOCKS: LazyLock<DashMap<PathBuf, Arc<Mutex<()>>>> = LazyLock::new(DashMap::new);

/// State of the artifact relative to its source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Artifact is strictly newer than the source
    Fresh,
    /// Artifact exists but is not newer than the source
    Stale,
    /// No artifact on disk
    Missing,
}

/// Where a script was run from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptOrigin {
    /// The cached bytecode artifact
    Artifact,
    /// Source text
    Source {
        /// Whether a background compilation was started
        compile_scheduled: bool,
    },
}

/// Outcome of one background compilation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileReport {
    /// Artifact written
    Written(PathBuf),
    /// Another compilation already produced a fresh artifact
    Skipped(PathBuf),
    /// Compilation failed; the artifact was not written
    Failed {
        /// Artifact path
        path: PathBuf,
        /// Why
        reason: String,
    },
}

/// The bytecode artifact cache for one host.
#[derive(Debug, Clone)]
pub struct BytecodeCache {
    dir: Option<PathBuf>,
    file_name: String,
    enabled: bool,
    reports: Option<Sender<CompileReport>>,
}

impl BytecodeCache {
    /// Cache storing its artifact in `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
            file_name: DEFAULT_CACHE_FILE.to_string(),
            enabled: true,
            reports: None,
        }
    }

    /// A cache that always runs source
    pub fn disabled() -> Self {
        Self {
            dir: None,
            file_name: DEFAULT_CACHE_FILE.to_string(),
            enabled: false,
            reports: None,
        }
    }

    /// Build from configuration
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            dir: config.cache_dir.clone(),
            file_name: config.cache_file.clone(),
            enabled: config.caching_enabled(),
            reports: None,
        }
    }

    /// Use a different artifact file name
    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = file_name.into();
        self
    }

    /// Send a report for every finished background compilation
    pub fn with_reports(mut self, reports: Sender<CompileReport>) -> Self {
        self.reports = Some(reports);
        self
    }

    /// Whether runs go through the cache
    pub fn is_enabled(&self) -> bool {
        self.enabled && self.dir.is_some()
    }

    /// Path of the artifact, when a cache directory is set
    pub fn artifact_path(&self) -> Option<PathBuf> {
        self.dir.as_ref().map(|dir| dir.join(&self.file_name))
    }

    /// Compare the artifact against `source_path`.
    ///
    /// A missing source is an error even when the artifact exists.
    pub fn freshness(&self, source_path: &Path) -> Result<Freshness> {
        match self.artifact_path() {
            Some(bin_path) => artifact_freshness(source_path, &bin_path),
            None => {
                modified(source_path)?;
                Ok(Freshness::Missing)
            }
        }
    }

    /// Delete the artifact. Returns whether one existed.
    pub fn clear(&self) -> Result<bool> {
        let Some(bin_path) = self.artifact_path() else {
            return Ok(false);
        };
        match fs::remove_file(&bin_path) {
            Ok(()) => {
                info!("Removed bytecode artifact {}", bin_path.display());
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(BridgeError::io(bin_path, e)),
        }
    }

    /// Run `source_path` on `context`, through the artifact when possible.
    pub fn run_script<E: ScriptEngine>(
        &self,
        engine: &Arc<E>,
        context: &mut E::Context,
        source_path: &Path,
        source_url: &str,
    ) -> Result<ScriptOrigin> {
        let bin_path = match self.artifact_path() {
            Some(path) if self.enabled => path,
            _ => {
                run_source(context, source_path, source_url)?;
                return Ok(ScriptOrigin::Source {
                    compile_scheduled: false,
                });
            }
        };

        match artifact_freshness(source_path, &bin_path)? {
            Freshness::Fresh => match run_artifact(context, &bin_path, source_url) {
                Ok(()) => {
                    debug!("Ran {} from bytecode {}", source_url, bin_path.display());
                    return Ok(ScriptOrigin::Artifact);
                }
                Err(BridgeError::BadCacheArtifact(path)) => {
                    warn!("Bytecode artifact {} is incompatible, discarding", path.display());
                    discard_artifact(&bin_path);
                }
                Err(e) => {
                    warn!("Bytecode artifact {} failed to run, discarding: {}", bin_path.display(), e);
                    discard_artifact(&bin_path);
                }
            },
            Freshness::Stale => debug!("Bytecode artifact {} is stale", bin_path.display()),
            Freshness::Missing => debug!("No bytecode artifact at {}", bin_path.display()),
        }

        let compile_scheduled = schedule_compile(
            Arc::clone(engine),
            source_path.to_path_buf(),
            bin_path,
            source_url.to_string(),
            self.reports.clone(),
        );
        run_source(context, source_path, source_url)?;
        Ok(ScriptOrigin::Source { compile_scheduled })
    }
}

/// Read and run source text on `context`
pub(crate) fn run_source<C: EngineContext>(
    context: &mut C,
    source_path: &Path,
    source_url: &str,
) -> Result<()> {
    let source = fs::read_to_string(source_path).map_err(|e| BridgeError::io(source_path, e))?;
    context.run_source(&source, source_url).map_err(translate)
}

fn run_artifact<C: EngineContext>(context: &mut C, bin_path: &Path, source_url: &str) -> Result<()> {
    let bytecode = fs::read(bin_path).map_err(|e| BridgeError::io(bin_path, e))?;
    context
        .run_serialized(&bytecode, source_url)
        .map_err(|fault| match fault.code {
            ErrorCode::BadSerializedScript => BridgeError::BadCacheArtifact(bin_path.to_path_buf()),
            _ => translate(fault),
        })
}

fn modified(path: &Path) -> Result<SystemTime> {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .map_err(|e| BridgeError::io(path, e))
}

fn artifact_freshness(source_path: &Path, bin_path: &Path) -> Result<Freshness> {
    let source_time = modified(source_path)?;
    let bin_time = match fs::metadata(bin_path).and_then(|meta| meta.modified()) {
        Ok(time) => time,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Freshness::Missing),
        Err(e) => {
            debug!("Cannot stat bytecode artifact {}: {}", bin_path.display(), e);
            return Ok(Freshness::Missing);
        }
    };

    if bin_time > source_time {
        Ok(Freshness::Fresh)
    } else {
        Ok(Freshness::Stale)
    }
}

fn discard_artifact(bin_path: &Path) {
    if let Err(e) = fs::remove_file(bin_path) {
        if e.kind() != ErrorKind::NotFound {
            warn!("Failed to remove bytecode artifact {}: {}", bin_path.display(), e);
        }
    }
}

/// Start the detached compilation thread. Returns whether it was spawned.
fn schedule_compile<E: ScriptEngine>(
    engine: Arc<E>,
    source_path: PathBuf,
    bin_path: PathBuf,
    source_url: String,
    reports: Option<Sender<CompileReport>>,
) -> bool {
    let spawned = std::thread::Builder::new()
        .name("spacey-bytecode-compile".into())
        .spawn(move || {
            let report = compile_artifact(&*engine, &source_path, &bin_path, &source_url);
            match &report {
                CompileReport::Written(path) => info!("Wrote bytecode artifact {}", path.display()),
                CompileReport::Skipped(path) => {
                    debug!("Bytecode artifact {} already fresh", path.display())
                }
                CompileReport::Failed { path, reason } => {
                    warn!("Background compilation of {} failed: {}", path.display(), reason)
                }
            }
            if let Some(reports) = reports {
                let _ = reports.send(report);
            }
        });

    match spawned {
        Ok(_) => true,
        Err(e) => {
            warn!("Could not start background compilation: {}", e);
            false
        }
    }
}

/// Body of the background compilation; never panics on engine or I/O faults.
fn compile_artifact<E: ScriptEngine>(
    engine: &E,
    source_path: &Path,
    bin_path: &Path,
    source_url: &str,
) -> CompileReport {
    with_compile_lock(bin_path, || {
        match artifact_freshness(source_path, bin_path) {
            Ok(Freshness::Fresh) => return CompileReport::Skipped(bin_path.to_path_buf()),
            Ok(_) => {}
            Err(e) => {
                return CompileReport::Failed {
                    path: bin_path.to_path_buf(),
                    reason: e.to_string(),
                };
            }
        }

        match write_artifact(engine, source_path, bin_path, source_url) {
            Ok(()) => CompileReport::Written(bin_path.to_path_buf()),
            Err(e) => CompileReport::Failed {
                path: bin_path.to_path_buf(),
                reason: e.to_string(),
            },
        }
    })
}

/// Run `f` holding the compile lock for `bin_path`.
///
/// The map entry is dropped again once no other task holds or waits on it.
fn with_compile_lock<T>(bin_path: &Path, f: impl FnOnce() -> T) -> T {
    let lock = Arc::clone(COMPILE_LOCKS.entry(bin_path.to_path_buf()).or_default().value());
    let result = {
        let _guard = lock.lock();
        f()
    };
    // Two references left means only the map and this task.
    COMPILE_LOCKS.remove_if(bin_path, |_, entry| Arc::strong_count(entry) == 2);
    result
}

/// Sibling temp file: the artifact's full name plus `.tmp<pid>`
fn temp_path(bin_path: &Path) -> PathBuf {
    let mut name = bin_path.as_os_str().to_owned();
    name.push(format!(".tmp{}", std::process::id()));
    PathBuf::from(name)
}

fn write_artifact<E: ScriptEngine>(
    engine: &E,
    source_path: &Path,
    bin_path: &Path,
    source_url: &str,
) -> Result<()> {
    let source_time = modified(source_path)?;
    let source = fs::read_to_string(source_path).map_err(|e| BridgeError::io(source_path, e))?;

    let mut context = engine.create_context().map_err(translate_init)?;
    let compiled = context.serialize(&source, source_url);
    let disposed = context.dispose();
    let bytecode = compiled.map_err(translate)?;
    disposed.map_err(translate_init)?;

    if let Some(parent) = bin_path.parent() {
        fs::create_dir_all(parent).map_err(|e| BridgeError::io(parent, e))?;
    }

    // Readers only ever see a complete artifact.
    let tmp_path = temp_path(bin_path);
    fs::write(&tmp_path, &bytecode).map_err(|e| BridgeError::io(&tmp_path, e))?;
    if let Err(e) = fs::rename(&tmp_path, bin_path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(BridgeError::io(bin_path, e));
    }

    // Source edited mid-compile: the artifact would look fresh but is not.
    if modified(source_path)? != source_time {
        discard_artifact(bin_path);
        return Err(BridgeError::io(
            source_path,
            std::io::Error::other("source changed during compilation"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::Duration;

    fn set_mtime(path: &Path, time: SystemTime) {
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(time)
            .unwrap();
    }

    #[test]
    fn test_artifact_path() {
        let cache = BytecodeCache::new("/data/cache").with_file_name("app.jsbc");
        assert_eq!(cache.artifact_path(), Some(PathBuf::from("/data/cache/app.jsbc")));
        assert!(cache.is_enabled());
        assert_eq!(BytecodeCache::disabled().artifact_path(), None);
        assert!(!BytecodeCache::disabled().is_enabled());
    }

    #[test]
    fn test_from_config() {
        let config = BridgeConfig {
            cache_dir: Some(PathBuf::from("/data")),
            bytecode_cache: false,
            ..BridgeConfig::default()
        };
        let cache = BytecodeCache::from_config(&config);
        assert!(!cache.is_enabled());
        assert_eq!(cache.artifact_path(), Some(PathBuf::from("/data/bundle.jsbc")));
    }

    #[test]
    fn test_freshness_strictly_newer() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("index.js");
        fs::write(&source, "1").unwrap();
        let cache = BytecodeCache::new(dir.path());
        assert_eq!(cache.freshness(&source).unwrap(), Freshness::Missing);

        let bin = cache.artifact_path().unwrap();
        fs::write(&bin, b"bytecode").unwrap();
        let t = SystemTime::now() - Duration::from_secs(60);

        set_mtime(&source, t);
        set_mtime(&bin, t);
        assert_eq!(cache.freshness(&source).unwrap(), Freshness::Stale);

        set_mtime(&bin, t + Duration::from_secs(1));
        assert_eq!(cache.freshness(&source).unwrap(), Freshness::Fresh);

        set_mtime(&source, t + Duration::from_secs(2));
        assert_eq!(cache.freshness(&source).unwrap(), Freshness::Stale);
    }

    #[test]
    fn test_freshness_missing_source_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = BytecodeCache::new(dir.path());
        fs::write(cache.artifact_path().unwrap(), b"bytecode").unwrap();
        let err = cache.freshness(&dir.path().join("gone.js")).unwrap_err();
        assert!(matches!(err, BridgeError::Io { ref source, .. } if source.kind() == ErrorKind::NotFound));
    }

    #[test]
    fn test_temp_path_keeps_full_name() {
        let pid = std::process::id();
        assert_eq!(
            temp_path(Path::new("/data/bundle.jsbc")),
            PathBuf::from(format!("/data/bundle.jsbc.tmp{}", pid))
        );
        assert_ne!(
            temp_path(Path::new("/data/bundle.jsbc")),
            temp_path(Path::new("/data/bundle.other"))
        );
    }

    #[test]
    fn test_compile_lock_entry_released() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("bundle.jsbc");
        let value = with_compile_lock(&bin, || {
            assert!(COMPILE_LOCKS.contains_key(&bin));
            7
        });
        assert_eq!(value, 7);
        assert!(!COMPILE_LOCKS.contains_key(&bin));
    }

    #[test]
    fn test_clear() {
        let dir = tempfile::tempdir().unwrap();
        let cache = BytecodeCache::new(dir.path());
        assert!(!cache.clear().unwrap());
        fs::write(cache.artifact_path().unwrap(), b"bytecode").unwrap();
        assert!(cache.clear().unwrap());
        assert!(!cache.artifact_path().unwrap().exists());
    }
}
