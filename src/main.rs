// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! spacey-host CLI - runs a JavaScript bundle behind the native bridge
//!
//! Loads a bundle into a QuickJS-backed `ScriptHost`, optionally calls into it
//! and prints every queue the script flushes back.

mod repl;

use anyhow::{Context, anyhow};
use clap::Parser;
use owo_colors::OwoColorize;
use serde_json::Value;
use spacey_bridge::{BridgeConfig, BridgeError, QuickJsEngine, ScriptHost, ScriptOrigin, VERSION};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "spacey-host",
    about = "Run a JavaScript bundle behind the spacey native bridge",
    version = VERSION,
    author = "Pegasus Heavy Industries"
)]
struct Cli {
    /// Bundle to run
    bundle: PathBuf,

    /// URL stack traces attribute the bundle to (defaults to the bundle path)
    #[arg(long)]
    source_url: Option<String>,

    /// Directory for the bytecode artifact
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Always run from source
    #[arg(long)]
    no_cache: bool,

    /// TOML configuration file
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Define a global before the bundle runs
    #[arg(long = "global", value_name = "NAME=JSON")]
    globals: Vec<String>,

    /// Call a module method after the bundle runs
    #[arg(long, value_name = "MODULE.METHOD")]
    call: Option<String>,

    /// JSON array of arguments for --call
    #[arg(long, value_name = "JSON", default_value = "[]", requires = "call")]
    args: String,

    /// Drain the queue after the bundle runs
    #[arg(long)]
    flush: bool,

    /// Start the interactive console after the bundle runs
    #[arg(short = 'i', long)]
    interactive: bool,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            print_error(&e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "spacey_bridge=debug,spacey_host=debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    debug!("Configuration: {:?}", config);

    let mut host = ScriptHost::new(QuickJsEngine::new(), &config);
    host.set_flush_queue_immediate(|queue| print_queue("flushed", &queue))?;
    host.set_call_sync_hook(|module_id, method_id, args| {
        debug!(module_id, method_id, "No native module serves sync call with {}", args);
        None
    })?;
    host.initialize().context("Failed to initialize script host")?;

    for global in &cli.globals {
        let (name, value) =
            split_assignment(global).ok_or_else(|| anyhow!("--global expects NAME=JSON, got '{}'", global))?;
        host.set_global(name, value)
            .with_context(|| format!("Failed to set global '{}'", name))?;
    }

    let source_url = cli
        .source_url
        .clone()
        .unwrap_or_else(|| cli.bundle.display().to_string());
    let origin = host.run_script(&cli.bundle, &source_url)?;
    match origin {
        ScriptOrigin::Artifact => debug!("Bundle ran from bytecode"),
        ScriptOrigin::Source { compile_scheduled } => {
            debug!(compile_scheduled, "Bundle ran from source")
        }
    }

    if let Some(target) = &cli.call {
        let (module, method) =
            split_target(target).ok_or_else(|| anyhow!("--call expects MODULE.METHOD, got '{}'", target))?;
        let queue = host.call_function(module, method, &cli.args)?;
        print_queue("queue", &queue.decode()?);
    }

    if cli.flush {
        let queue = host.flush_queue()?;
        print_queue("queue", &queue.decode()?);
    }

    if cli.interactive {
        let mut console = repl::Console::new(host).context("Failed to start console")?;
        console.run()?;
        return Ok(());
    }

    host.dispose()?;
    Ok(())
}

/// Defaults, then the config file and environment, then command-line flags
fn load_config(cli: &Cli) -> anyhow::Result<BridgeConfig> {
    let mut config = BridgeConfig::load(cli.config.as_deref())?;
    if let Some(dir) = &cli.cache_dir {
        config.cache_dir = Some(dir.clone());
    }
    if config.cache_dir.is_none() {
        config.cache_dir = dirs::cache_dir().map(|dir| dir.join("spacey-host"));
    }
    if cli.no_cache {
        config.bytecode_cache = false;
    }
    Ok(config)
}

/// Split `MODULE.METHOD`
pub(crate) fn split_target(target: &str) -> Option<(&str, &str)> {
    match target.split_once('.') {
        Some((module, method)) if !module.is_empty() && !method.is_empty() => Some((module, method)),
        _ => None,
    }
}

/// Split `NAME=JSON`
fn split_assignment(assignment: &str) -> Option<(&str, &str)> {
    match assignment.split_once('=') {
        Some((name, value)) if !name.is_empty() => Some((name, value)),
        _ => None,
    }
}

pub(crate) fn print_queue(label: &str, queue: &Value) {
    let text = serde_json::to_string_pretty(queue).unwrap_or_else(|_| queue.to_string());
    println!("{} {}", format!("{}:", label).cyan().bold(), text);
}

pub(crate) fn print_error(error: &anyhow::Error) {
    eprintln!("{}: {:#}", "Error".red().bold(), error);
    if let Some(stack) = error.downcast_ref::<BridgeError>().and_then(|e| e.script_stack()) {
        eprintln!("{}", stack.dimmed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_target() {
        assert_eq!(split_target("AppRegistry.runApplication"), Some(("AppRegistry", "runApplication")));
        assert_eq!(split_target("AppRegistry"), None);
        assert_eq!(split_target(".run"), None);
        assert_eq!(split_target("Module."), None);
    }

    #[test]
    fn test_split_assignment() {
        assert_eq!(split_assignment("__DEV__=true"), Some(("__DEV__", "true")));
        assert_eq!(split_assignment("config={\"a\":\"=\"}"), Some(("config", "{\"a\":\"=\"}")));
        assert_eq!(split_assignment("=1"), None);
        assert_eq!(split_assignment("flag"), None);
    }

    #[test]
    fn test_cli_flags() {
        let cli = Cli::try_parse_from([
            "spacey-host",
            "index.bundle.js",
            "--no-cache",
            "--global",
            "__DEV__=true",
            "--global",
            "config={}",
            "--call",
            "AppRegistry.runApplication",
            "--args",
            "[\"App\",{}]",
        ])
        .unwrap();
        assert!(cli.no_cache);
        assert_eq!(cli.globals.len(), 2);
        assert_eq!(cli.args, "[\"App\",{}]");

        let config = load_config(&cli).unwrap();
        assert!(!config.caching_enabled());
    }

    #[test]
    fn test_args_requires_call() {
        assert!(Cli::try_parse_from(["spacey-host", "index.bundle.js", "--args", "[]"]).is_err());
    }
}
