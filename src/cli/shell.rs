// src/cli/shell.rs

//! The interactive loop: reads lines, buffers them until a `;`, and hands
//! complete commands to the [`Executor`]. Shell directives are handled here
//! and never reach the DSL parser.

use crate::CancellationToken;
use crate::core::context::SessionContext;
use crate::core::executor::Executor;
use anyhow::{Result, anyhow};
use colored::Colorize;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use rustyline::history::History;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::Ordering;

const EXAMPLES: &[&str] = &[
    r#"CREATE SECRET db WITH user="admin", password="s3cret";"#,
    "CREATE PROJECT shop;",
    "CREATE ENV staging FOR THIS PROJECT DEPENDS ON dev;",
    "USE PROJECT shop ENV staging;",
    r#"CREATE SCRIPT etl TYPE PYTHON WITH CODE="print('hello')";"#,
    r#"EXECUTE SCRIPT etl WITH ARGS (day="mon");"#,
];

/// A shell command that is not part of the DSL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Exit,
    Context,
    Help,
    Status,
    Plugins,
    Debug(String),
    Validate(String),
    LoadPlugin(String),
    UnloadPlugin(String),
    UseNamespace(String),
    ClearContext,
}

impl Directive {
    /// Recognizes a directive, case-insensitively. A trailing `;` is allowed.
    pub fn parse(line: &str) -> Option<Self> {
        let trimmed = line.trim();
        let bare = trimmed.trim_end_matches(';').trim_end();
        let words: Vec<&str> = bare.split_whitespace().collect();
        let lowered: Vec<String> = words.iter().map(|w| w.to_lowercase()).collect();
        let lowered: Vec<&str> = lowered.iter().map(String::as_str).collect();

        match lowered.as_slice() {
            ["exit"] | ["quit"] => Some(Self::Exit),
            ["context"] => Some(Self::Context),
            ["help"] | ["?"] => Some(Self::Help),
            ["status"] => Some(Self::Status),
            ["plugins"] => Some(Self::Plugins),
            ["clear", "context"] => Some(Self::ClearContext),
            ["load", "plugin", _] => words.get(2).map(|n| Self::LoadPlugin(n.to_string())),
            ["unload", "plugin", _] => words.get(2).map(|n| Self::UnloadPlugin(n.to_string())),
            ["use", "namespace", _] => words.get(2).map(|n| Self::UseNamespace(n.to_string())),
            ["debug", _, ..] => Some(Self::Debug(rest_after_first_word(trimmed))),
            ["validate", _, ..] => Some(Self::Validate(rest_after_first_word(trimmed))),
            _ => None,
        }
    }
}

fn rest_after_first_word(line: &str) -> String {
    line.split_once(char::is_whitespace)
        .map(|(_, rest)| rest.trim().to_string())
        .unwrap_or_default()
}

/// Accumulates physical lines into one logical command.
#[derive(Debug, Default)]
pub struct CommandBuffer {
    lines: Vec<String>,
}

impl CommandBuffer {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    /// Adds a line; returns the complete command once it ends with `;`.
    pub fn push(&mut self, line: &str) -> Option<String> {
        let line = line.trim_end();
        if line.trim().is_empty() && self.lines.is_empty() {
            return None;
        }
        self.lines.push(line.to_string());
        if line.ends_with(';') {
            let command = self.lines.join("\n");
            self.lines.clear();
            Some(command)
        } else {
            None
        }
    }
}

/// What the loop does after a directive.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Exit,
}

#[derive(Debug)]
pub struct Shell {
    executor: Executor,
    session: SessionContext,
    buffer: CommandBuffer,
    cancel: CancellationToken,
    history_path: Option<PathBuf>,
}

impl Shell {
    pub fn new(executor: Executor, session: SessionContext, cancel: CancellationToken) -> Self {
        Self {
            executor,
            session,
            buffer: CommandBuffer::default(),
            cancel,
            history_path: None,
        }
    }

    pub fn with_history(mut self, path: PathBuf) -> Self {
        self.history_path = Some(path);
        self
    }

    pub fn run(&mut self) -> Result<()> {
        let mut editor = DefaultEditor::new().map_err(|e| anyhow!(t!("shell.error.editor"), error = e))?;
        if let Some(path) = &self.history_path
            && editor.load_history(path).is_err()
        {
            log::debug!("No history loaded from '{}'.", path.display());
        }

        loop {
            let prompt = if self.buffer.is_empty() {
                self.session.prompt()
            } else {
                self.session.continuation_prompt()
            };

            match editor.readline(&prompt) {
                Ok(line) => {
                    record_history(editor.history_mut(), &line);
                    if self.handle_line(&line) == Flow::Exit {
                        break;
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    if self.buffer.is_empty() {
                        break;
                    }
                    self.buffer.clear();
                    println!("{}", t!("shell.info.buffer_cleared").dimmed());
                }
                Err(ReadlineError::Eof) => break,
                Err(e) => return Err(anyhow!(t!("shell.error.readline"), error = e)),
            }
        }

        if let Some(path) = &self.history_path
            && let Err(e) = editor.save_history(path)
        {
            log::warn!("Could not save history to '{}': {}", path.display(), e);
        }
        println!("{}", t!("shell.info.goodbye").cyan());
        Ok(())
    }

    fn handle_line(&mut self, line: &str) -> Flow {
        if self.buffer.is_empty()
            && let Some(directive) = Directive::parse(line)
        {
            return self.directive(directive);
        }

        if let Some(command) = self.buffer.push(line) {
            self.cancel.store(false, Ordering::SeqCst);
            self.executor.execute(&command, &mut self.session);
        }
        Flow::Continue
    }

    fn directive(&mut self, directive: Directive) -> Flow {
        log::debug!("Shell directive: {:?}", directive);
        match directive {
            Directive::Exit => return Flow::Exit,
            Directive::Context => println!("{}", self.session),
            Directive::Help => self.print_help(),
            Directive::Status => print_json(&self.executor.status()),
            Directive::Debug(text) => print_json(&self.executor.debug(&text)),
            Directive::Validate(text) => {
                let validation = self.executor.validate(&text);
                if validation.valid {
                    println!(
                        "{} {}",
                        t!("common.success").green().bold(),
                        format!(
                            t!("shell.validate.valid"),
                            action = validation.action.unwrap_or_default(),
                            kind = validation.kind.unwrap_or_default()
                        )
                    );
                } else {
                    eprintln!(
                        "{} {}",
                        t!("common.error").red().bold(),
                        validation.error.unwrap_or_default()
                    );
                }
            }
            Directive::Plugins => self.print_plugins(),
            Directive::LoadPlugin(name) => match self.executor.load_plugin(&name) {
                Ok(()) => println!(
                    "{} {}",
                    t!("common.success").green().bold(),
                    format!(t!("shell.plugins.loaded"), name = name)
                ),
                Err(e) => eprintln!("{} {}", t!("common.error").red().bold(), e),
            },
            Directive::UnloadPlugin(name) => match self.executor.unload_plugin(&name) {
                Ok(()) => println!(
                    "{} {}",
                    t!("common.success").green().bold(),
                    format!(t!("shell.plugins.unloaded"), name = name)
                ),
                Err(e) => eprintln!("{} {}", t!("common.error").red().bold(), e),
            },
            Directive::UseNamespace(namespace) => {
                self.session.set_namespace(&namespace);
                println!("{}", format!(t!("shell.info.namespace_set"), namespace = namespace).dimmed());
            }
            Directive::ClearContext => {
                self.session.clear();
                println!("{}", t!("shell.info.context_cleared").dimmed());
            }
        }
        Flow::Continue
    }

    fn print_help(&mut self) {
        println!("\n{}", t!("shell.help.commands").bold());
        for command in self.executor.supported_commands() {
            println!("  {}", command.cyan());
        }
        println!("\n{}", t!("shell.help.examples").bold());
        for example in EXAMPLES {
            println!("  {}", example);
        }
        println!("\n{}", t!("shell.help.directives").bold());
        println!("{}", t!("shell.help.directive_list"));
    }

    fn print_plugins(&self) {
        let plugins = self.executor.plugins();
        println!("\n{}", t!("shell.plugins.header").bold());
        for metadata in plugins.registered() {
            let state = if plugins.is_loaded(&metadata.name) {
                t!("shell.plugins.state_loaded").green()
            } else if plugins.is_disabled(&metadata.name) {
                t!("shell.plugins.state_disabled").yellow()
            } else {
                t!("shell.plugins.state_available").dimmed()
            };
            println!(
                "  {} {} [{}] {}",
                metadata.name.cyan().bold(),
                metadata.version.dimmed(),
                state,
                metadata.description
            );
        }
    }
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("{} {}", t!("common.error").red().bold(), e),
    }
}

/// Adds a non-blank line to `history`. Returns whether it was stored.
fn record_history(history: &mut impl History, line: &str) -> bool {
    if line.trim().is_empty() {
        return false;
    }
    match history.add(line) {
        Ok(added) => added,
        Err(e) => {
            log::debug!("Could not add '{}' to history: {}", line, e);
            false
        }
    }
}
