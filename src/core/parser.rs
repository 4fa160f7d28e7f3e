// src/core/parser.rs

//! The parser front-end: composes the grammar of the loaded plugins, compiles
//! it, and turns command text into normalized [`Command`]s.

use super::engine::{Grammar, MatchFailure};
use super::grammar::GrammarError;
use super::grammar_registry::{GrammarRegistry, RuleConflict};
use super::plugin_manager::PluginManager;
use super::transform::{Transformer, describe};
use crate::models::{Action, Command, Payload, ResourceKind, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Empty command.")]
    Empty,
    #[error("Unrecognized input '{found}' at line {line}, column {column}.")]
    Lexical {
        found: String,
        offset: usize,
        line: usize,
        column: usize,
    },
    #[error("Unexpected '{found}' at line {line}, column {column}.{}", expected_suffix(.expected))]
    Syntax {
        found: String,
        offset: usize,
        line: usize,
        column: usize,
        expected: Vec<String>,
    },
    #[error("Unexpected end of input.{}", expected_suffix(.expected))]
    UnexpectedEnd { expected: Vec<String> },
    #[error("{0}")]
    Structural(String),
    #[error("The command grammar is unavailable: {0}")]
    Grammar(String),
}

fn expected_suffix(expected: &[String]) -> String {
    if expected.is_empty() {
        String::new()
    } else {
        format!(" Expected one of: {}", expected.join(", "))
    }
}

/// The failure categories the executor reports differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    Empty,
    Lexical,
    Syntax,
    Structural,
    Grammar,
}

impl ParseError {
    pub fn kind(&self) -> ParseErrorKind {
        match self {
            Self::Empty => ParseErrorKind::Empty,
            Self::Lexical { .. } => ParseErrorKind::Lexical,
            Self::Syntax { .. } | Self::UnexpectedEnd { .. } => ParseErrorKind::Syntax,
            Self::Structural(_) => ParseErrorKind::Structural,
            Self::Grammar(_) => ParseErrorKind::Grammar,
        }
    }
}

impl From<MatchFailure> for ParseError {
    fn from(failure: MatchFailure) -> Self {
        match failure {
            MatchFailure::Lexical {
                offset,
                line,
                column,
                found,
            } => Self::Lexical {
                found: found.to_string(),
                offset,
                line,
                column,
            },
            MatchFailure::Unexpected {
                offset,
                line,
                column,
                found,
                expected,
            } => Self::Syntax {
                found,
                offset,
                line,
                column,
                expected,
            },
            MatchFailure::UnexpectedEnd { expected } => Self::UnexpectedEnd { expected },
        }
    }
}

/// Summary of the current grammar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrammarInfo {
    pub rule_count: usize,
    pub rules_by_plugin: BTreeMap<String, usize>,
    pub command_rules: Vec<String>,
    pub transform_count: usize,
    pub conflicts: Vec<RuleConflict>,
}

/// Identifies the plugin set a parser was built for.
type BuildStamp = (usize, u64);

fn stamp(manager: &PluginManager) -> BuildStamp {
    (manager.loaded_count(), manager.generation())
}

/// Holds the compiled grammar and the transformer of the current plugin set.
#[derive(Debug, Default)]
pub struct DynamicParser {
    registry: GrammarRegistry,
    grammar: Option<Arc<Grammar>>,
    transformer: Transformer,
    built_for: Option<BuildStamp>,
    conflicts: Vec<RuleConflict>,
}

impl DynamicParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when plugins were loaded or unloaded since the last build.
    pub fn is_stale(&self, manager: &PluginManager) -> bool {
        self.built_for != Some(stamp(manager))
    }

    /// Rebuilds only when stale.
    pub fn ensure_current(&mut self, manager: &mut PluginManager) -> Result<(), GrammarError> {
        if self.is_stale(manager) {
            self.rebuild(manager)
        } else {
            Ok(())
        }
    }

    /// Composes and compiles the grammar of every loaded plugin.
    ///
    /// The new grammar replaces the current one only when it compiles; on
    /// failure the previous grammar stays in use.
    pub fn rebuild(&mut self, manager: &mut PluginManager) -> Result<(), GrammarError> {
        let mut registry = GrammarRegistry::new();
        let mut conflicts = Vec::new();
        for contribution in manager.contributions() {
            if let Err(mut found) = registry.register(&contribution.source, &contribution.grammar_rules) {
                conflicts.append(&mut found);
            }
        }
        let transformer = Transformer::new(manager.transform_callbacks().clone());

        self.built_for = Some(stamp(manager));
        self.conflicts = conflicts;

        registry.check()?;
        let grammar = Grammar::from_text(registry.compose())?;

        log::debug!(
            "Rebuilt parser: {} rules, {} transforms, {} plugins.",
            registry.len(),
            transformer.len(),
            manager.loaded_count()
        );
        self.registry = registry;
        self.grammar = Some(Arc::new(grammar));
        self.transformer = transformer;
        Ok(())
    }

    /// Parses one command into its normalized form.
    pub fn parse(&self, text: &str) -> Result<Command, ParseError> {
        if text.trim().trim_end_matches(';').trim().is_empty() {
            return Err(ParseError::Empty);
        }
        let grammar = self
            .grammar
            .as_ref()
            .ok_or_else(|| ParseError::Grammar("the parser has not been built".to_string()))?;

        let tree = grammar.parse(text.trim())?;
        let value = self
            .transformer
            .transform(&tree)
            .map_err(|e| ParseError::Structural(e.to_string()))?;
        command_from_value(value)
    }

    /// Checks that `text` parses, without keeping the result.
    pub fn validate_syntax(&self, text: &str) -> Result<(), ParseError> {
        self.parse(text).map(|_| ())
    }

    pub fn grammar_info(&self) -> GrammarInfo {
        GrammarInfo {
            rule_count: self.registry.len(),
            rules_by_plugin: self.registry.counts_by_source(),
            command_rules: self.supported_commands(),
            transform_count: self.transformer.len(),
            conflicts: self.conflicts.clone(),
        }
    }

    /// Names of the `*_command` rules of the current grammar.
    pub fn supported_commands(&self) -> Vec<String> {
        self.registry
            .command_rules()
            .into_iter()
            .map(|name| name.trim_start_matches('?').to_string())
            .collect()
    }

    /// The composed grammar text.
    pub fn debug_grammar(&self) -> String {
        self.registry.compose().to_string()
    }

    pub fn registry(&self) -> &GrammarRegistry {
        &self.registry
    }

    /// Rule conflicts found by the last build.
    pub fn conflicts(&self) -> &[RuleConflict] {
        &self.conflicts
    }
}

/// Accepts a transformed [`Command`], or a record carrying non-empty
/// `action` and `resource_type` strings.
fn command_from_value(value: Value) -> Result<Command, ParseError> {
    match value {
        Value::Command(command) if command.key().is_well_formed() => Ok(command),
        Value::Command(command) => Err(ParseError::Structural(format!(
            "Command is missing an action or resource type: '{}'.",
            command.key()
        ))),
        Value::Record(mut record) => {
            let mut take = |key: &str| match record.remove(key) {
                Some(Value::Str(s)) if !s.trim().is_empty() => Some(s),
                _ => None,
            };
            match (take("action"), take("resource_type")) {
                (Some(action), Some(kind)) => Ok(Command::new(
                    Action::parse(&action),
                    ResourceKind::parse(&kind),
                    Payload::Record(record),
                )),
                _ => Err(ParseError::Structural(
                    "Command is missing an action or resource type.".to_string(),
                )),
            }
        }
        other => Err(ParseError::Structural(format!(
            "Expected a command but the input produced {}.",
            describe(&other)
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::plugin::{Handler, Plugin, PluginMetadata, PluginSource, factory};
    use crate::core::transform::{Args, TransformFn, callback};
    use crate::models::CommandKey;
    use std::collections::HashMap;

    /// `SHOW THING name` as a record-building plugin.
    struct ShowPlugin {
        name: &'static str,
        rule_body: &'static str,
    }

    impl Plugin for ShowPlugin {
        fn metadata(&self) -> PluginMetadata {
            PluginMetadata::new(self.name, "0.1", "show things", &[])
        }

        fn grammar_rules(&self) -> BTreeMap<String, String> {
            BTreeMap::from([("show_command".to_string(), self.rule_body.to_string())])
        }

        fn command_handlers(&self) -> BTreeMap<CommandKey, Handler> {
            BTreeMap::new()
        }

        fn constants(&self) -> BTreeMap<String, String> {
            BTreeMap::new()
        }

        fn transforms(&self) -> HashMap<String, TransformFn> {
            HashMap::from([(
                "show_command".to_string(),
                callback(|values| {
                    let mut args = Args::new("show_command", values);
                    let name = args.string()?;
                    Ok(Value::Record(BTreeMap::from([
                        ("action".to_string(), Value::Str("SHOW".to_string())),
                        ("resource_type".to_string(), Value::Str("THING".to_string())),
                        ("name".to_string(), Value::Str(name)),
                    ])))
                }),
            )])
        }
    }

    fn manager_with(plugins: Vec<(&'static str, &'static str)>) -> PluginManager {
        let factories = plugins
            .into_iter()
            .map(|(name, rule_body)| factory(move || Ok(Box::new(ShowPlugin { name, rule_body }) as Box<dyn Plugin>)))
            .collect();
        let mut manager = PluginManager::new();
        manager.discover(&[PluginSource::new("test", factories)]);
        manager.load_all();
        manager
    }

    #[test]
    fn test_empty_input_is_a_user_error() {
        let mut manager = manager_with(vec![("show", "\"SHOW\"i \"THING\"i NAME")]);
        let mut parser = DynamicParser::new();
        parser.ensure_current(&mut manager).unwrap();

        for text in ["", "   ", "\n\t", ";", "  ; "] {
            assert_eq!(parser.parse(text), Err(ParseError::Empty));
        }
    }

    #[test]
    fn test_parse_builds_record_commands() {
        let mut manager = manager_with(vec![("show", "\"SHOW\"i \"THING\"i NAME")]);
        let mut parser = DynamicParser::new();
        parser.ensure_current(&mut manager).unwrap();

        let command = parser.parse("show thing widget;").unwrap();

        assert_eq!(command.action, Action::Custom("SHOW".to_string()));
        assert_eq!(command.kind, ResourceKind::Custom("THING".to_string()));
        assert_eq!(command.name(), Some("widget"));
    }

    #[test]
    fn test_failure_kinds() {
        let mut manager = manager_with(vec![("show", "\"SHOW\"i \"THING\"i NAME")]);
        let mut parser = DynamicParser::new();
        parser.ensure_current(&mut manager).unwrap();

        let lexical = parser.parse("SHOW THING @widget;").unwrap_err();
        assert_eq!(lexical.kind(), ParseErrorKind::Lexical);
        assert!(matches!(lexical, ParseError::Lexical { column: 12, .. }));

        let syntax = parser.parse("SHOW widget THING;").unwrap_err();
        assert_eq!(syntax.kind(), ParseErrorKind::Syntax);

        let end = parser.parse("SHOW THING").unwrap_err();
        assert!(matches!(end, ParseError::UnexpectedEnd { .. }));
    }

    #[test]
    fn test_untransformed_tree_is_structural() {
        let mut manager = PluginManager::new();
        let mut parser = DynamicParser::new();
        parser.ensure_current(&mut manager).unwrap();

        // With no plugins the grammar accepts a single bare name.
        let err = parser.parse("hello;").unwrap_err();
        assert_eq!(err.kind(), ParseErrorKind::Structural);
    }

    #[test]
    fn test_rebuild_follows_plugin_changes() {
        let mut manager = manager_with(vec![("show", "\"SHOW\"i \"THING\"i NAME")]);
        let mut parser = DynamicParser::new();
        parser.ensure_current(&mut manager).unwrap();
        assert!(!parser.is_stale(&manager));
        assert_eq!(parser.supported_commands(), vec!["show_command".to_string()]);

        manager.unload("show").unwrap();
        assert!(parser.is_stale(&manager));
        parser.ensure_current(&mut manager).unwrap();

        assert!(parser.supported_commands().is_empty());
        assert!(parser.debug_grammar().contains("command: NAME"));
        assert_eq!(parser.parse("SHOW THING x").unwrap_err().kind(), ParseErrorKind::Syntax);
    }

    #[test]
    fn test_conflicting_rule_keeps_first_definition() {
        let mut manager = manager_with(vec![("show", "\"SHOW\"i \"THING\"i NAME")]);
        let mut parser = DynamicParser::new();
        parser.ensure_current(&mut manager).unwrap();

        manager
            .register_class(factory(|| {
                Ok(Box::new(ShowPlugin {
                    name: "broken",
                    rule_body: "\"BROKEN\"i undefined_rule",
                }) as Box<dyn Plugin>)
            }))
            .unwrap();
        manager.load("broken").unwrap();

        // Both plugins define show_command; the second is a conflict and the
        // first definition is kept, so the grammar still compiles.
        parser.ensure_current(&mut manager).unwrap();
        assert_eq!(parser.conflicts().len(), 1);
        assert_eq!(parser.registry().rule_source("show_command"), Some("show"));
        assert!(parser.parse("SHOW THING x").is_ok());
        assert_eq!(parser.grammar_info().rules_by_plugin.get("show"), Some(&1));
    }

    #[test]
    fn test_invalid_grammar_is_reported_and_not_swapped_in() {
        let mut manager = manager_with(vec![("show", "\"SHOW\"i undefined_rule")]);
        let mut parser = DynamicParser::new();

        let result = parser.ensure_current(&mut manager);

        assert!(matches!(result, Err(GrammarError::UndefinedSymbol { .. })));
        assert!(!parser.is_stale(&manager));
        assert_eq!(parser.parse("SHOW x").unwrap_err().kind(), ParseErrorKind::Grammar);
    }
}
