// src/core/grammar_registry.rs

use super::grammar::GrammarError;
use crate::constants::{COMMAND_RULE_SUFFIX, RESERVED_RULE_NAMES};
use std::cell::OnceCell;
use std::collections::{BTreeMap, BTreeSet};

/// Generic terminals every composed grammar ends with.
const GRAMMAR_TRAILER: &str = r#"NAME: /[a-zA-Z0-9]([a-zA-Z0-9_.-]*[a-zA-Z0-9_])?|[a-zA-Z0-9]/
%import common.ESCAPED_STRING
%import common.WS
%ignore WS
"#;

const START_RULE: &str = "?start: command [\";\"]";

/// A rule fragment and the source that contributed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrammarRule {
    pub name: String,
    pub body: String,
    pub source: String,
}

/// A rule that could not be registered because another source owns its name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleConflict {
    pub rule: String,
    pub existing_source: String,
    pub attempted_source: String,
}

/// Stores rule fragments by name and composes them into one grammar.
#[derive(Debug, Default)]
pub struct GrammarRegistry {
    rules: BTreeMap<String, GrammarRule>,
    composed: OnceCell<String>,
}

/// A rule name without its `?` inline marker. Rules are keyed by this form.
pub fn bare_rule_name(name: &str) -> &str {
    name.trim_start_matches('?')
}

fn is_reserved(name: &str) -> bool {
    RESERVED_RULE_NAMES.contains(&bare_rule_name(name))
}

impl GrammarRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every rule of `rules` under `source`.
    ///
    /// `?name` and `name` are the same rule. Reserved names are skipped with a warning. Re-registering a rule from the
    /// same source overwrites it; a name owned by another source is reported as
    /// a conflict and the existing rule is kept. Non-conflicting rules from the
    /// same call are registered either way.
    pub fn register(
        &mut self,
        source: &str,
        rules: &BTreeMap<String, String>,
    ) -> Result<usize, Vec<RuleConflict>> {
        let mut conflicts = Vec::new();
        let mut registered = 0;

        for (name, body) in rules {
            if is_reserved(name) {
                log::warn!("Skipping reserved grammar rule '{}' from '{}'.", name, source);
                continue;
            }
            let key = bare_rule_name(name);
            if let Some(existing) = self.rules.get(key)
                && existing.source != source
            {
                log::error!(
                    "Grammar rule '{}' from '{}' conflicts with the definition from '{}'.",
                    name,
                    source,
                    existing.source
                );
                conflicts.push(RuleConflict {
                    rule: key.to_string(),
                    existing_source: existing.source.clone(),
                    attempted_source: source.to_string(),
                });
                continue;
            }
            self.rules.insert(
                key.to_string(),
                GrammarRule {
                    name: name.clone(),
                    body: body.clone(),
                    source: source.to_string(),
                },
            );
            registered += 1;
        }

        self.invalidate();
        log::debug!("Registered {} grammar rules from '{}'.", registered, source);
        if conflicts.is_empty() {
            Ok(registered)
        } else {
            Err(conflicts)
        }
    }

    /// Removes every rule contributed by `source`. Returns how many were removed.
    pub fn unregister(&mut self, source: &str) -> usize {
        let before = self.rules.len();
        self.rules.retain(|_, rule| rule.source != source);
        let removed = before - self.rules.len();
        if removed > 0 {
            self.invalidate();
            log::debug!("Unregistered {} grammar rules from '{}'.", removed, source);
        }
        removed
    }

    pub fn clear(&mut self) {
        self.rules.clear();
        self.invalidate();
    }

    fn invalidate(&mut self) {
        self.composed = OnceCell::new();
    }

    pub fn get(&self, name: &str) -> Option<&GrammarRule> {
        self.rules.get(bare_rule_name(name))
    }

    pub fn rule_source(&self, name: &str) -> Option<&str> {
        self.get(name).map(|r| r.source.as_str())
    }

    pub fn list_rules(&self) -> Vec<&str> {
        self.rules.keys().map(String::as_str).collect()
    }

    pub fn rules_by_source(&self, source: &str) -> Vec<&str> {
        self.rules
            .values()
            .filter(|r| r.source == source)
            .map(|r| r.name.as_str())
            .collect()
    }

    /// Rule counts per contributing source.
    pub fn counts_by_source(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for rule in self.rules.values() {
            *counts.entry(rule.source.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Names of the rules that become alternatives of `command`.
    pub fn command_rules(&self) -> Vec<&str> {
        self.rules
            .keys()
            .map(String::as_str)
            .filter(|name| name.ends_with(COMMAND_RULE_SUFFIX))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// The composed grammar text. Cached until the rule set changes.
    pub fn compose(&self) -> &str {
        self.composed.get_or_init(|| self.build_text())
    }

    fn build_text(&self) -> String {
        let mut text = String::new();
        text.push_str(START_RULE);
        text.push('\n');

        let commands = self.command_rules();
        if commands.is_empty() {
            // Keeps the parser constructible with no plugins loaded.
            text.push_str("command: NAME\n");
        } else {
            text.push_str(&format!("command: {}\n", commands.join(" | ")));
        }

        for rule in self.rules.values() {
            text.push_str(&format!("{}: {}\n", rule.name, rule.body.trim()));
        }

        text.push_str(GRAMMAR_TRAILER);
        text
    }

    /// Structural check of the composed text, run before compiling it.
    pub fn check(&self) -> Result<(), GrammarError> {
        let text = self.compose();
        let defines = |name: &str| {
            text.lines().any(|line| {
                let line = line.trim_start().trim_start_matches('?');
                line.strip_prefix(name)
                    .is_some_and(|rest| rest.trim_start().starts_with(':'))
            })
        };
        if !defines("start") {
            return Err(GrammarError::Invalid("no 'start' rule".to_string()));
        }
        if !defines("command") {
            return Err(GrammarError::Invalid("no 'command' rule".to_string()));
        }
        if count_unescaped_quotes(text) % 2 != 0 {
            return Err(GrammarError::Invalid("unbalanced quotes".to_string()));
        }
        Ok(())
    }

    pub fn validate(&self) -> bool {
        match self.check() {
            Ok(()) => true,
            Err(e) => {
                log::error!("{}", e);
                false
            }
        }
    }

    /// Sources that currently own at least one rule.
    pub fn sources(&self) -> BTreeSet<&str> {
        self.rules.values().map(|r| r.source.as_str()).collect()
    }
}

fn count_unescaped_quotes(text: &str) -> usize {
    let mut count = 0;
    let mut escaped = false;
    for c in text.chars() {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '"' => count += 1,
            _ => {}
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::engine::Grammar;

    fn rules(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_same_source_reregistration_is_idempotent() {
        let mut registry = GrammarRegistry::new();
        let set = rules(&[("greet_command", "\"HELLO\"i NAME")]);

        registry.register("a", &set).unwrap();
        let first = registry.compose().to_string();
        registry.register("a", &set).unwrap();

        assert_eq!(registry.compose(), first);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_cross_source_conflict_keeps_original() {
        let mut registry = GrammarRegistry::new();
        registry
            .register("plugin_a", &rules(&[("create_secret_command", "\"A\"i NAME")]))
            .unwrap();

        let conflicts = registry
            .register(
                "plugin_b",
                &rules(&[
                    ("create_secret_command", "\"B\"i NAME"),
                    ("other_command", "\"OTHER\"i"),
                ]),
            )
            .unwrap_err();

        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].rule, "create_secret_command");
        assert_eq!(conflicts[0].existing_source, "plugin_a");
        assert_eq!(registry.rule_source("create_secret_command"), Some("plugin_a"));
        assert_eq!(registry.get("create_secret_command").unwrap().body, "\"A\"i NAME");
        // The non-conflicting rule from the same call is still registered.
        assert_eq!(registry.rule_source("other_command"), Some("plugin_b"));
    }

    #[test]
    fn test_inline_marker_does_not_make_a_new_rule() {
        let mut registry = GrammarRegistry::new();
        registry
            .register("plugin_a", &rules(&[("?ping_command", "\"PING\"i NAME")]))
            .unwrap();

        let conflicts = registry
            .register("plugin_b", &rules(&[("ping_command", "\"PONG\"i NAME")]))
            .unwrap_err();

        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].rule, "ping_command");
        assert_eq!(conflicts[0].existing_source, "plugin_a");
        assert_eq!(conflicts[0].attempted_source, "plugin_b");
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.rule_source("ping_command"), Some("plugin_a"));
        assert_eq!(registry.get("?ping_command").unwrap().name, "?ping_command");

        let text = registry.compose();
        assert!(text.contains("command: ping_command\n"));
        let grammar = Grammar::from_text(text).unwrap();
        assert!(grammar.parse("ping box;").is_ok());
        assert!(grammar.parse("pong box;").is_err());
    }

    #[test]
    fn test_reserved_names_are_never_overridden() {
        let mut registry = GrammarRegistry::new();
        for source in ["a", "b", "c"] {
            let result = registry.register(
                source,
                &rules(&[
                    ("start", "NAME"),
                    ("?command", "NAME"),
                    ("NAME", "/x/"),
                    ("ESCAPED_STRING", "/y/"),
                    ("WS", "/ /"),
                ]),
            );
            assert_eq!(result, Ok(0));
        }
        assert!(registry.is_empty());
        assert!(registry.compose().contains("NAME: /[a-zA-Z0-9]"));
    }

    #[test]
    fn test_unregister_removes_exactly_the_source_rules() {
        let mut registry = GrammarRegistry::new();
        registry
            .register("a", &rules(&[("a_command", "\"A\"i"), ("a_part", "NAME")]))
            .unwrap();
        registry
            .register("b", &rules(&[("b_command", "\"B\"i")]))
            .unwrap();

        let before: BTreeSet<String> = registry.list_rules().iter().map(|s| s.to_string()).collect();
        assert_eq!(registry.unregister("a"), 2);
        let after: BTreeSet<String> = registry.list_rules().iter().map(|s| s.to_string()).collect();

        let removed: BTreeSet<String> = before.difference(&after).cloned().collect();
        assert_eq!(
            removed,
            ["a_command", "a_part"].iter().map(|s| s.to_string()).collect()
        );
        assert_eq!(registry.rules_by_source("b"), vec!["b_command"]);
    }

    #[test]
    fn test_compose_builds_command_alternation() {
        let mut registry = GrammarRegistry::new();
        registry
            .register(
                "p",
                &rules(&[
                    ("list_things_command", "\"LIST\"i \"THINGS\"i"),
                    ("drop_thing_command", "\"DROP\"i NAME"),
                    ("helper", "NAME"),
                ]),
            )
            .unwrap();

        let text = registry.compose();
        assert!(text.starts_with("?start: command [\";\"]\n"));
        assert!(text.contains("command: drop_thing_command | list_things_command\n"));
        assert!(text.contains("helper: NAME\n"));
        assert!(text.ends_with("%ignore WS\n"));
        assert!(registry.validate());

        let grammar = Grammar::from_text(text).unwrap();
        assert!(grammar.parse("drop widget;").is_ok());
    }

    #[test]
    fn test_empty_registry_composes_minimal_grammar() {
        let registry = GrammarRegistry::new();
        assert!(registry.compose().contains("command: NAME"));
        assert!(registry.validate());

        let grammar = Grammar::from_text(registry.compose()).unwrap();
        assert!(grammar.parse("anything;").is_ok());
    }

    #[test]
    fn test_validate_detects_unbalanced_quotes() {
        let mut registry = GrammarRegistry::new();
        registry
            .register("bad", &rules(&[("broken_command", "\"OPEN NAME")]))
            .unwrap();
        assert!(!registry.validate());
        assert!(matches!(registry.check(), Err(GrammarError::Invalid(_))));
    }
}
