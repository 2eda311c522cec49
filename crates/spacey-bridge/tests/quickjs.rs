//! QuickJS backend driven through the script host

#![cfg(feature = "quickjs")]

use crossbeam::channel;
use spacey_bridge::{BridgeError, BytecodeCache, CompileReport, QuickJsEngine, ScriptHost, ScriptOrigin};
use std::fs;
use std::time::{Duration, SystemTime};

const BUNDLE: &str = r#"
var queue = [];
var __fbBatchedBridge = {
    callFunctionReturnFlushedQueue: function (module, method, args) {
        queue.push([module, method, args]);
        return this.flushedQueue();
    },
    invokeCallbackAndReturnFlushedQueue: function (id, args) {
        queue.push(["callback", id, args]);
        return this.flushedQueue();
    },
    flushedQueue: function () {
        var flushed = queue;
        queue = [];
        return flushed;
    }
};
started = true;
"#;

#[test]
fn test_classic_bundle_through_host() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("index.bundle.js");
    fs::write(&source, BUNDLE).unwrap();

    let mut host = ScriptHost::with_cache(QuickJsEngine::new(), BytecodeCache::disabled());
    host.initialize().unwrap();
    host.run_script(&source, "index.bundle.js").unwrap();

    let queue = host.call_function("Timing", "tick", "[1]").unwrap();
    assert_eq!(queue.as_str(), r#"[["Timing","tick",[1]]]"#);
    assert_eq!(host.flush_queue().unwrap().as_str(), "[]");
    host.dispose().unwrap();
}

#[test]
fn test_classic_bundle_runs_from_bytecode() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("index.bundle.js");
    fs::write(&source, BUNDLE).unwrap();
    fs::File::options()
        .write(true)
        .open(&source)
        .unwrap()
        .set_modified(SystemTime::now() - Duration::from_secs(60))
        .unwrap();

    let (tx, reports) = channel::unbounded();
    let cache = BytecodeCache::new(dir.path().join("cache")).with_reports(tx);

    let mut host = ScriptHost::with_cache(QuickJsEngine::new(), cache.clone());
    host.initialize().unwrap();
    assert_eq!(
        host.run_script(&source, "index.bundle.js").unwrap(),
        ScriptOrigin::Source {
            compile_scheduled: true
        }
    );
    host.dispose().unwrap();
    assert!(matches!(
        reports.recv_timeout(Duration::from_secs(10)).unwrap(),
        CompileReport::Written(_)
    ));

    let mut host = ScriptHost::with_cache(QuickJsEngine::new(), cache);
    host.initialize().unwrap();
    assert_eq!(host.run_script(&source, "index.bundle.js").unwrap(), ScriptOrigin::Artifact);
    let queue = host.invoke_callback(spacey_bridge::CallbackHandle(3), "[true]").unwrap();
    assert_eq!(queue.as_str(), r#"[["callback",3,[true]]]"#);
}

#[test]
fn test_thrown_string_surfaces_as_message() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("throw.js");
    fs::write(&source, "throw 'plain string';").unwrap();

    let mut host = ScriptHost::with_cache(QuickJsEngine::new(), BytecodeCache::disabled());
    host.initialize().unwrap();
    let err = host.run_script(&source, "throw.js").unwrap_err();
    assert!(matches!(err, BridgeError::ScriptExecution { .. }));
    assert_eq!(err.to_string(), "plain string");
}
