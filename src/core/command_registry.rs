// src/core/command_registry.rs

use super::plugin::Handler;
use crate::models::{Action, CommandKey, ResourceKind};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Clone)]
struct Registration {
    handler: Handler,
    source: String,
}

/// A handler key that could not be registered because another source owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerConflict {
    pub key: CommandKey,
    pub existing_source: String,
    pub attempted_source: String,
}

/// Maps `(action, resource kind)` pairs to handlers.
#[derive(Default)]
pub struct CommandRegistry {
    handlers: BTreeMap<CommandKey, Registration>,
}

impl fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(
                self.handlers
                    .iter()
                    .map(|(key, reg)| (key.to_string(), reg.source.as_str())),
            )
            .finish()
    }
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers handlers under `source`, with the same ownership rules as
    /// grammar rules. Malformed keys are logged and skipped.
    pub fn register(
        &mut self,
        source: &str,
        handlers: BTreeMap<CommandKey, Handler>,
    ) -> Result<usize, Vec<HandlerConflict>> {
        let mut conflicts = Vec::new();
        let mut registered = 0;

        for (key, handler) in handlers {
            if !key.is_well_formed() {
                log::warn!("Skipping malformed handler key '{}' from '{}'.", key, source);
                continue;
            }
            if let Some(existing) = self.handlers.get(&key)
                && existing.source != source
            {
                log::error!(
                    "Handler for '{}' from '{}' conflicts with the one from '{}'.",
                    key,
                    source,
                    existing.source
                );
                conflicts.push(HandlerConflict {
                    key,
                    existing_source: existing.source.clone(),
                    attempted_source: source.to_string(),
                });
                continue;
            }
            self.handlers.insert(
                key,
                Registration {
                    handler,
                    source: source.to_string(),
                },
            );
            registered += 1;
        }

        log::debug!("Registered {} command handlers from '{}'.", registered, source);
        if conflicts.is_empty() {
            Ok(registered)
        } else {
            Err(conflicts)
        }
    }

    pub fn unregister(&mut self, source: &str) -> usize {
        let before = self.handlers.len();
        self.handlers.retain(|_, reg| reg.source != source);
        before - self.handlers.len()
    }

    pub fn clear(&mut self) {
        self.handlers.clear();
    }

    pub fn get(&self, action: &Action, kind: &ResourceKind) -> Option<Handler> {
        self.handlers
            .get(&CommandKey::new(action.clone(), kind.clone()))
            .map(|reg| reg.handler.clone())
    }

    pub fn contains(&self, action: &Action, kind: &ResourceKind) -> bool {
        self.handlers
            .contains_key(&CommandKey::new(action.clone(), kind.clone()))
    }

    /// Every registered key, sorted.
    pub fn list(&self) -> Vec<CommandKey> {
        self.handlers.keys().cloned().collect()
    }

    pub fn source_of(&self, action: &Action, kind: &ResourceKind) -> Option<&str> {
        self.handlers
            .get(&CommandKey::new(action.clone(), kind.clone()))
            .map(|reg| reg.source.as_str())
    }

    pub fn handlers_by_source(&self, source: &str) -> Vec<CommandKey> {
        self.handlers
            .iter()
            .filter(|(_, reg)| reg.source == source)
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn counts_by_source(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for reg in self.handlers.values() {
            *counts.entry(reg.source.clone()).or_insert(0) += 1;
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::plugin::handler;
    use std::collections::BTreeSet;

    fn noop() -> Handler {
        handler(|_, _| Ok(()))
    }

    fn key(action: Action, kind: ResourceKind) -> CommandKey {
        CommandKey::new(action, kind)
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = CommandRegistry::new();
        let mut handlers = BTreeMap::new();
        handlers.insert(key(Action::Create, ResourceKind::Secret), noop());
        handlers.insert(key(Action::Delete, ResourceKind::Secret), noop());

        assert_eq!(registry.register("resources", handlers), Ok(2));
        assert!(registry.get(&Action::Create, &ResourceKind::Secret).is_some());
        assert!(registry.get(&Action::Create, &ResourceKind::Script).is_none());
        assert_eq!(
            registry.source_of(&Action::Delete, &ResourceKind::Secret),
            Some("resources")
        );
        assert_eq!(registry.list().len(), 2);
    }

    #[test]
    fn test_conflicts_keep_original_and_register_the_rest() {
        let mut registry = CommandRegistry::new();
        let mut first = BTreeMap::new();
        first.insert(key(Action::Create, ResourceKind::Secret), noop());
        registry.register("a", first).unwrap();

        let mut second = BTreeMap::new();
        second.insert(key(Action::Create, ResourceKind::Secret), noop());
        second.insert(key(Action::Get, ResourceKind::Secret), noop());
        let conflicts = registry.register("b", second).unwrap_err();

        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].existing_source, "a");
        assert_eq!(registry.source_of(&Action::Create, &ResourceKind::Secret), Some("a"));
        assert_eq!(registry.source_of(&Action::Get, &ResourceKind::Secret), Some("b"));
    }

    #[test]
    fn test_malformed_keys_are_skipped() {
        let mut registry = CommandRegistry::new();
        let mut handlers = BTreeMap::new();
        handlers.insert(key(Action::Custom(String::new()), ResourceKind::Secret), noop());
        handlers.insert(key(Action::List, ResourceKind::Script), noop());

        assert_eq!(registry.register("p", handlers), Ok(1));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unregister_removes_only_that_source() {
        let mut registry = CommandRegistry::new();
        let mut a = BTreeMap::new();
        a.insert(key(Action::Create, ResourceKind::Secret), noop());
        a.insert(key(Action::Delete, ResourceKind::Secret), noop());
        let mut b = BTreeMap::new();
        b.insert(key(Action::List, ResourceKind::Script), noop());
        registry.register("a", a).unwrap();
        registry.register("b", b).unwrap();

        let before: BTreeSet<CommandKey> = registry.list().into_iter().collect();
        assert_eq!(registry.unregister("a"), 2);
        let after: BTreeSet<CommandKey> = registry.list().into_iter().collect();

        let removed: BTreeSet<CommandKey> = before.difference(&after).cloned().collect();
        assert_eq!(
            removed,
            [
                key(Action::Create, ResourceKind::Secret),
                key(Action::Delete, ResourceKind::Secret)
            ]
            .into_iter()
            .collect()
        );
        assert_eq!(
            registry.handlers_by_source("b"),
            vec![key(Action::List, ResourceKind::Script)]
        );
    }
}
