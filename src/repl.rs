// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Interactive bridge console
//!
//! Issues bridge calls against a live host one line at a time:
//!
//! ```text
//! call AppRegistry.runApplication ["App", {"rootTag": 1}]
//! invoke 12 [null, "done"]
//! flush
//! global __DEV__ true
//! ```

use crate::{print_error, print_queue, split_target};
use owo_colors::OwoColorize;
use rustyline::completion::{Completer, Pair};
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::history::DefaultHistory;
use rustyline::validate::Validator;
use rustyline::{Config, Editor, Helper};
use spacey_bridge::{CallbackHandle, QuickJsEngine, ScriptHost, SerializedValue};
use std::path::PathBuf;

const HISTORY_FILE: &str = ".spacey_host_history";
const MAX_HISTORY_SIZE: usize = 1000;

/// A parsed console line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand<'a> {
    /// `call MODULE.METHOD [ARGS]`
    Call {
        module: &'a str,
        method: &'a str,
        args: &'a str,
    },
    /// `invoke ID [ARGS]`
    Invoke { callback: CallbackHandle, args: &'a str },
    /// `flush`
    Flush,
    /// `global NAME JSON`
    Global { name: &'a str, value: &'a str },
    /// `.help`
    Help,
    /// `.exit`
    Exit,
}

impl<'a> ConsoleCommand<'a> {
    /// Parse one line; the error is a usage message
    pub fn parse(input: &'a str) -> Result<Self, String> {
        let input = input.trim();
        let (word, rest) = match input.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (input, ""),
        };
        let args_or_empty = |rest: &'a str| -> &'a str { if rest.is_empty() { "[]" } else { rest } };

        match word {
            "call" => {
                let (target, args) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
                let (module, method) =
                    split_target(target).ok_or("usage: call MODULE.METHOD [ARGS]")?;
                Ok(ConsoleCommand::Call {
                    module,
                    method,
                    args: args_or_empty(args.trim()),
                })
            }
            "invoke" => {
                let (id, args) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
                let id = id.parse::<i64>().map_err(|_| "usage: invoke ID [ARGS]")?;
                Ok(ConsoleCommand::Invoke {
                    callback: CallbackHandle(id),
                    args: args_or_empty(args.trim()),
                })
            }
            "flush" => Ok(ConsoleCommand::Flush),
            "global" => match rest.split_once(char::is_whitespace) {
                Some((name, value)) => Ok(ConsoleCommand::Global {
                    name,
                    value: value.trim(),
                }),
                None => Err("usage: global NAME JSON".to_string()),
            },
            ".help" | ".h" | ".?" => Ok(ConsoleCommand::Help),
            ".exit" | ".quit" | ".q" => Ok(ConsoleCommand::Exit),
            other => Err(format!("unknown command '{}', try .help", other)),
        }
    }

    /// Every command with a description, for help and completion
    pub fn all_commands() -> &'static [(&'static str, &'static str)] {
        &[
            ("call MODULE.METHOD [ARGS]", "Call a module method, print the queue"),
            ("invoke ID [ARGS]", "Resume a script callback, print the queue"),
            ("flush", "Drain the queue"),
            ("global NAME JSON", "Define a global"),
            (".help", "Show this help message"),
            (".exit", "Exit the console"),
        ]
    }
}

/// Completes command words
struct ConsoleHelper;

impl Completer for ConsoleHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &rustyline::Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let word = &line[..pos];
        if word.is_empty() || word.contains(char::is_whitespace) {
            return Ok((pos, vec![]));
        }

        let matches = ConsoleCommand::all_commands()
            .iter()
            .filter_map(|(usage, _)| usage.split_whitespace().next())
            .filter(|name| name.starts_with(word))
            .map(|name| Pair {
                display: name.to_string(),
                replacement: format!("{} ", &name[word.len()..]),
            })
            .collect();
        Ok((pos, matches))
    }
}

impl Hinter for ConsoleHelper {
    type Hint = String;
}

impl Highlighter for ConsoleHelper {}

impl Validator for ConsoleHelper {}

impl Helper for ConsoleHelper {}

/// The interactive console
pub struct Console {
    host: ScriptHost<QuickJsEngine>,
    editor: Editor<ConsoleHelper, DefaultHistory>,
    history_path: PathBuf,
}

impl Console {
    /// Take over an initialized host
    pub fn new(host: ScriptHost<QuickJsEngine>) -> rustyline::Result<Self> {
        let config = Config::builder()
            .history_ignore_dups(true)?
            .history_ignore_space(true)
            .max_history_size(MAX_HISTORY_SIZE)?
            .auto_add_history(true)
            .build();

        let mut editor = Editor::with_config(config)?;
        editor.set_helper(Some(ConsoleHelper));

        let history_path = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("spacey")
            .join(HISTORY_FILE);
        if let Some(parent) = history_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let _ = editor.load_history(&history_path);

        Ok(Self {
            host,
            editor,
            history_path,
        })
    }

    /// Run until `.exit` or end of input, then dispose the host
    pub fn run(&mut self) -> anyhow::Result<()> {
        println!(
            "{} {}",
            "spacey-host".bright_cyan().bold(),
            spacey_bridge::VERSION.yellow()
        );
        println!("Type {} for help, {} to exit", ".help".green(), ".exit".green());
        println!();

        loop {
            match self.editor.readline(&format!("{} ", "bridge>".bright_green().bold())) {
                Ok(line) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match ConsoleCommand::parse(line) {
                        Ok(ConsoleCommand::Exit) => break,
                        Ok(command) => self.execute(command),
                        Err(usage) => eprintln!("{}", usage.yellow()),
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    println!("{}", "^C".dimmed());
                }
                Err(ReadlineError::Eof) => break,
                Err(err) => {
                    eprintln!("{}: {:?}", "Error".red().bold(), err);
                    break;
                }
            }
        }

        let _ = self.editor.save_history(&self.history_path);
        self.host.dispose()?;
        Ok(())
    }

    fn execute(&mut self, command: ConsoleCommand<'_>) {
        let result = match command {
            ConsoleCommand::Call { module, method, args } => {
                self.host.call_function(module, method, args).map(Some)
            }
            ConsoleCommand::Invoke { callback, args } => self.host.invoke_callback(callback, args).map(Some),
            ConsoleCommand::Flush => self.host.flush_queue().map(Some),
            ConsoleCommand::Global { name, value } => self.host.set_global(name, value).map(|()| None),
            ConsoleCommand::Help => {
                print_help();
                Ok(None)
            }
            ConsoleCommand::Exit => Ok(None),
        };

        match result {
            Ok(Some(queue)) => show_queue(&queue),
            Ok(None) => {}
            Err(e) => print_error(&e.into()),
        }
    }
}

fn show_queue(queue: &SerializedValue) {
    match queue.decode() {
        Ok(value) => print_queue("queue", &value),
        Err(_) => println!("{}", queue),
    }
}

fn print_help() {
    println!();
    println!("{}", "Console Commands:".white().bold());
    println!();
    for (usage, description) in ConsoleCommand::all_commands() {
        println!("  {:28} {}", usage.cyan(), description.dimmed());
    }
    println!();
    println!("  {}", "ARGS defaults to []".dimmed());
    println!();
}
