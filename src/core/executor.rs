// src/core/executor.rs

//! Parses command text, finds the handler registered for it and runs it.
//! Every failure ends up as a printed diagnostic, never as a crash.

use super::command_registry::CommandRegistry;
use super::context::SessionContext;
use super::parser::{DynamicParser, GrammarInfo, ParseError, ParseErrorKind};
use super::plugin::{HandlerContext, PluginSource, Services};
use super::plugin_manager::{LoadSummary, PluginError, PluginManager};
use crate::models::{Command, CommandKey};
use colored::Colorize;
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

const MAX_SYNTAX_SUGGESTIONS: usize = 5;
const MAX_FALLBACK_SUGGESTIONS: usize = 10;

/// Commands offered when no handler matches.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct HandlerSuggestions {
    pub same_action: Vec<String>,
    pub same_kind: Vec<String>,
    /// Only filled when neither group above has entries.
    pub fallback: Vec<String>,
}

#[derive(Error, Debug)]
pub enum ExecuteError {
    #[error("Empty command.")]
    Empty,
    #[error("{source}")]
    Parse {
        source: ParseError,
        suggestions: Vec<String>,
    },
    #[error("No handler found for command: {action} {kind}")]
    NoHandler {
        action: String,
        kind: String,
        suggestions: HandlerSuggestions,
    },
    #[error("Error executing command: {0:#}")]
    Handler(anyhow::Error),
}

/// Result of [`Executor::validate`].
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct Validation {
    pub valid: bool,
    pub action: Option<String>,
    pub kind: Option<String>,
    pub source: Option<String>,
    pub error: Option<String>,
}

/// Result of [`Executor::status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutorStatus {
    pub loaded_plugins: Vec<String>,
    pub rule_count: usize,
    pub handler_count: usize,
    pub constant_count: usize,
    pub handlers_by_plugin: BTreeMap<String, usize>,
    pub rules_by_plugin: BTreeMap<String, usize>,
}

/// Result of [`Executor::debug`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DebugReport {
    pub input: String,
    pub command: Option<Command>,
    pub error: Option<String>,
    pub handler_found: bool,
    pub handler_source: Option<String>,
    pub command_rules: Vec<String>,
}

/// Owns the plugin set, the parser built from it and the handler registry.
#[derive(Debug)]
pub struct Executor {
    plugins: PluginManager,
    parser: DynamicParser,
    commands: CommandRegistry,
    services: Services,
}

impl Executor {
    pub fn new(services: Services) -> Self {
        let disabled = services.settings.disabled_plugins.clone();
        Self {
            plugins: PluginManager::new().with_disabled(disabled),
            parser: DynamicParser::new(),
            commands: CommandRegistry::new(),
            services,
        }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn plugins(&self) -> &PluginManager {
        &self.plugins
    }

    pub fn discover(&mut self, sources: &[PluginSource]) -> usize {
        self.plugins.discover(sources)
    }

    pub fn load_all(&mut self) -> LoadSummary {
        self.plugins.load_all()
    }

    /// Loads a plugin; the parser picks it up before the next command.
    pub fn load_plugin(&mut self, name: &str) -> Result<(), PluginError> {
        self.plugins.load(name)
    }

    pub fn unload_plugin(&mut self, name: &str) -> Result<(), PluginError> {
        self.plugins.unload(name)
    }

    /// Rebuilds the handler registry and parser if the plugin set changed.
    fn refresh(&mut self) {
        if !self.parser.is_stale(&self.plugins) {
            return;
        }

        self.commands.clear();
        for contribution in self.plugins.contributions() {
            if let Err(conflicts) = self
                .commands
                .register(&contribution.source, contribution.command_handlers)
            {
                log::error!("{} handler conflict(s) from '{}'.", conflicts.len(), contribution.source);
            }
        }

        if let Err(e) = self.parser.rebuild(&mut self.plugins) {
            log::error!("Grammar rebuild failed: {}", e);
            eprintln!(
                "{} {}",
                t!("common.error").red().bold(),
                format!(t!("executor.error.rebuild_failed"), error = e)
            );
        }
    }

    /// Runs one command. Returns `false` on any failure, after printing it.
    pub fn execute(&mut self, text: &str, session: &mut SessionContext) -> bool {
        match self.run(text, session) {
            Ok(()) => true,
            Err(e) => {
                report(&e);
                false
            }
        }
    }

    /// Like [`execute`](Self::execute), but returns the failure instead of printing it.
    pub fn run(&mut self, text: &str, session: &mut SessionContext) -> Result<(), ExecuteError> {
        if text.trim().trim_end_matches(';').trim().is_empty() {
            return Err(ExecuteError::Empty);
        }
        self.refresh();

        let command = match self.parser.parse(text) {
            Ok(command) => command,
            Err(ParseError::Empty) => return Err(ExecuteError::Empty),
            Err(e) if e.kind() == ParseErrorKind::Syntax => return Err(self.syntax_failure(text, e)),
            Err(e) => {
                return Err(ExecuteError::Parse {
                    source: e,
                    suggestions: Vec::new(),
                });
            }
        };
        log::debug!("Parsed command: {:?}", command);

        let Some(handler) = self.commands.get(&command.action, &command.kind) else {
            return Err(self.no_handler(&command.key()));
        };
        log::debug!(
            "Dispatching '{}' to '{}'.",
            command.key(),
            self.commands
                .source_of(&command.action, &command.kind)
                .unwrap_or("?")
        );

        let mut context = HandlerContext {
            session,
            services: &self.services,
        };
        handler(&command, &mut context).map_err(|e| {
            log::error!("Handler for '{}' failed: {:?}", command.key(), e);
            ExecuteError::Handler(e)
        })
    }

    /// A syntax error whose first word is no known action is reported as a
    /// missing handler for its first two words.
    fn syntax_failure(&self, text: &str, error: ParseError) -> ExecuteError {
        let mut words = text.split_whitespace().map(|w| w.trim_end_matches(';').to_uppercase());
        let first = words.next().unwrap_or_default();
        let suggestions = self.similar_commands(&first);

        if suggestions.is_empty() && !first.is_empty() && !self.commands.is_empty() {
            let second = words.next().unwrap_or_default();
            let key = CommandKey::new(
                crate::models::Action::parse(&first),
                crate::models::ResourceKind::parse(&second),
            );
            return self.no_handler(&key);
        }
        ExecuteError::Parse {
            source: error,
            suggestions,
        }
    }

    /// Registered commands whose action starts with or contains `word`.
    fn similar_commands(&self, word: &str) -> Vec<String> {
        if word.is_empty() {
            return Vec::new();
        }
        self.commands
            .list()
            .into_iter()
            .filter(|key| {
                let action = key.action.as_str();
                action.starts_with(word) || action.contains(word)
            })
            .map(|key| key.to_string())
            .take(MAX_SYNTAX_SUGGESTIONS)
            .collect()
    }

    fn no_handler(&self, key: &CommandKey) -> ExecuteError {
        let known = self.commands.list();
        let same_action: Vec<String> = known
            .iter()
            .filter(|k| k.action == key.action)
            .map(ToString::to_string)
            .collect();
        let same_kind: Vec<String> = known
            .iter()
            .filter(|k| k.kind == key.kind)
            .map(ToString::to_string)
            .collect();
        let fallback = if same_action.is_empty() && same_kind.is_empty() {
            known
                .iter()
                .take(MAX_FALLBACK_SUGGESTIONS)
                .map(ToString::to_string)
                .collect()
        } else {
            Vec::new()
        };
        ExecuteError::NoHandler {
            action: key.action.to_string(),
            kind: key.kind.to_string(),
            suggestions: HandlerSuggestions {
                same_action,
                same_kind,
                fallback,
            },
        }
    }

    /// Parses `text` and checks that a handler exists, without running it.
    pub fn validate(&mut self, text: &str) -> Validation {
        self.refresh();
        match self.parser.parse(text) {
            Ok(command) => {
                let source = self
                    .commands
                    .source_of(&command.action, &command.kind)
                    .map(str::to_string);
                Validation {
                    valid: source.is_some(),
                    action: Some(command.action.to_string()),
                    kind: Some(command.kind.to_string()),
                    error: source
                        .is_none()
                        .then(|| format!("No handler found for command: {}", command.key())),
                    source,
                }
            }
            Err(e) => Validation {
                error: Some(e.to_string()),
                ..Validation::default()
            },
        }
    }

    /// Everything known about how `text` would be handled.
    pub fn debug(&mut self, text: &str) -> DebugReport {
        self.refresh();
        let parsed = self.parser.parse(text);
        let handler_source = parsed.as_ref().ok().and_then(|c| {
            self.commands
                .source_of(&c.action, &c.kind)
                .map(str::to_string)
        });
        DebugReport {
            input: text.to_string(),
            handler_found: handler_source.is_some(),
            handler_source,
            error: parsed.as_ref().err().map(ToString::to_string),
            command: parsed.ok(),
            command_rules: self.parser.supported_commands(),
        }
    }

    pub fn status(&mut self) -> ExecutorStatus {
        self.refresh();
        let info: GrammarInfo = self.parser.grammar_info();
        ExecutorStatus {
            loaded_plugins: self
                .plugins
                .loaded_plugins()
                .into_iter()
                .map(str::to_string)
                .collect(),
            rule_count: info.rule_count,
            handler_count: self.commands.len(),
            constant_count: self.plugins.constants().len(),
            handlers_by_plugin: self.commands.counts_by_source(),
            rules_by_plugin: info.rules_by_plugin,
        }
    }

    /// Every registered command as a sorted `"ACTION KIND"` string.
    pub fn supported_commands(&mut self) -> Vec<String> {
        self.refresh();
        let mut commands: Vec<String> = self.commands.list().iter().map(ToString::to_string).collect();
        commands.sort();
        commands
    }

    /// The composed grammar text.
    pub fn debug_grammar(&mut self) -> String {
        self.refresh();
        self.parser.debug_grammar()
    }
}

fn print_list(header: String, items: &[String]) {
    if items.is_empty() {
        return;
    }
    println!("{}", header.cyan());
    for item in items {
        println!("   {}", item);
    }
}

/// Prints a failure the way the shell shows it.
pub fn report(error: &ExecuteError) {
    let prefix = t!("common.error").red().bold();
    match error {
        ExecuteError::Empty => eprintln!("{} {}", prefix, t!("executor.error.empty_command")),
        ExecuteError::Parse {
            source,
            suggestions,
        } => {
            let message = match source.kind() {
                ParseErrorKind::Lexical => format!(t!("executor.error.lexical"), error = source),
                ParseErrorKind::Syntax => format!(t!("executor.error.syntax"), error = source),
                ParseErrorKind::Structural => format!(t!("executor.error.structural"), error = source),
                ParseErrorKind::Empty | ParseErrorKind::Grammar => {
                    format!(t!("executor.error.command"), error = source)
                }
            };
            eprintln!("{} {}", prefix, message);
            print_list(t!("executor.hint.did_you_mean").to_string(), suggestions);
        }
        ExecuteError::NoHandler {
            action,
            kind,
            suggestions,
        } => {
            eprintln!(
                "{} {}",
                prefix,
                format!(t!("executor.error.no_handler"), command = format!("{} {}", action, kind))
            );
            print_list(
                format!(t!("executor.hint.same_action"), action = action),
                &suggestions.same_action,
            );
            print_list(format!(t!("executor.hint.same_kind"), kind = kind), &suggestions.same_kind);
            print_list(t!("executor.hint.available").to_string(), &suggestions.fallback);
        }
        ExecuteError::Handler(e) => eprintln!(
            "{} {}",
            prefix,
            format!(t!("executor.error.handler_failed"), error = format!("{:#}", e))
        ),
    }
}
