// src/core/plugin_manager.rs

//! Registers plugin factories, loads them in dependency order and merges
//! their contributions.

use super::grammar_registry::bare_rule_name;
use super::plugin::{Handler, Plugin, PluginFactory, PluginMetadata, PluginSource};
use super::transform::TransformFn;
use crate::models::CommandKey;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PluginError {
    #[error("Dependency cycle detected among plugins: {}", .0.join(", "))]
    DependencyCycle(Vec<String>),
    #[error("Plugins skipped because they depend on a dependency cycle: {}", .0.join(", "))]
    BlockedByCycle(Vec<String>),
    #[error("Plugin '{plugin}' depends on unknown plugin '{dependency}'.")]
    UnknownDependency { plugin: String, dependency: String },
    #[error("Plugin '{0}' is not registered.")]
    NotRegistered(String),
    #[error("Plugin '{0}' is not loaded.")]
    NotLoaded(String),
    #[error("Plugin '{0}' is disabled in the configuration.")]
    Disabled(String),
    #[error("Plugin '{plugin}' requires '{dependency}', which is not loaded.")]
    MissingDependency { plugin: String, dependency: String },
    #[error("Plugin '{plugin}' is still required by: {}", .dependents.join(", "))]
    HasDependents {
        plugin: String,
        dependents: Vec<String>,
    },
    #[error("Plugin '{plugin}' failed to initialize: {message}")]
    Init { plugin: String, message: String },
    #[error("Plugin '{plugin}' is invalid: {reason}")]
    Invalid { plugin: String, reason: String },
}

impl PluginError {
    /// Cycle and unknown-dependency errors found while ordering plugins.
    pub fn is_dependency_error(&self) -> bool {
        matches!(
            self,
            Self::DependencyCycle(_) | Self::BlockedByCycle(_) | Self::UnknownDependency { .. }
        )
    }
}

/// Result of [`PluginManager::load_all`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoadSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub dependency_errors: Vec<PluginError>,
}

struct RegisteredPlugin {
    metadata: PluginMetadata,
    factory: PluginFactory,
}

struct LoadedPlugin {
    metadata: PluginMetadata,
    instance: Box<dyn Plugin>,
}

/// Contributions of every loaded plugin, merged in load order.
/// On a duplicate key the first loaded plugin wins.
#[derive(Default)]
pub struct Aggregates {
    pub grammar_rules: BTreeMap<String, String>,
    pub command_handlers: BTreeMap<CommandKey, Handler>,
    pub constants: BTreeMap<String, String>,
    pub transforms: HashMap<String, TransformFn>,
}

impl fmt::Debug for Aggregates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Aggregates")
            .field("grammar_rules", &self.grammar_rules.len())
            .field("command_handlers", &self.command_handlers.len())
            .field("constants", &self.constants.len())
            .field("transforms", &self.transforms.len())
            .finish()
    }
}

/// One loaded plugin's raw contributions, attributed to it.
pub struct Contribution {
    pub source: String,
    pub grammar_rules: BTreeMap<String, String>,
    pub command_handlers: BTreeMap<CommandKey, Handler>,
}

impl fmt::Debug for Contribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Contribution")
            .field("source", &self.source)
            .field("grammar_rules", &self.grammar_rules.keys().collect::<Vec<_>>())
            .field("command_handlers", &self.command_handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Default)]
pub struct PluginManager {
    registered: BTreeMap<String, RegisteredPlugin>,
    loaded: Vec<LoadedPlugin>,
    disabled: BTreeSet<String>,
    generation: u64,
    cache: Option<Aggregates>,
}

impl fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginManager")
            .field("registered", &self.registered.keys().collect::<Vec<_>>())
            .field("loaded", &self.loaded_plugins())
            .field("disabled", &self.disabled)
            .field("generation", &self.generation)
            .finish()
    }
}

/// Checks a probe instance of a plugin against the contribution contract.
fn validate_probe(plugin: &dyn Plugin) -> Result<PluginMetadata, PluginError> {
    let metadata = plugin.metadata();
    let invalid = |reason: String| PluginError::Invalid {
        plugin: if metadata.name.is_empty() {
            "<unnamed>".to_string()
        } else {
            metadata.name.clone()
        },
        reason,
    };

    if metadata.name.trim().is_empty() {
        return Err(invalid("metadata has no name".to_string()));
    }
    if metadata.version.trim().is_empty() {
        return Err(invalid("metadata has no version".to_string()));
    }
    if let Some((name, _)) = plugin
        .grammar_rules()
        .iter()
        .find(|(name, body)| name.trim().is_empty() || body.trim().is_empty())
    {
        return Err(invalid(format!("grammar rule '{}' is empty", name)));
    }
    if let Some(key) = plugin
        .command_handlers()
        .keys()
        .find(|key| !key.is_well_formed())
    {
        return Err(invalid(format!("handler key '{}' is malformed", key)));
    }
    Ok(metadata)
}

impl PluginManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plugins that `load` and `load_all` refuse to load.
    pub fn with_disabled<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.disabled = names.into_iter().map(Into::into).collect();
        self
    }

    /// Registers every factory of every source. Returns how many were accepted.
    pub fn discover(&mut self, sources: &[PluginSource]) -> usize {
        let mut accepted = 0;
        for source in sources {
            let before = accepted;
            for factory in &source.factories {
                if self.register_class(factory.clone()).is_ok() {
                    accepted += 1;
                }
            }
            log::debug!(
                "Discovered {} plugin(s) in source '{}'.",
                accepted - before,
                source.name
            );
        }
        accepted
    }

    /// Validates a factory by building a probe instance, then records it.
    pub fn register_class(&mut self, factory: PluginFactory) -> Result<PluginMetadata, PluginError> {
        let probe = factory().map_err(|e| PluginError::Invalid {
            plugin: "<unknown>".to_string(),
            reason: format!("could not be instantiated: {:#}", e),
        });
        let metadata = match probe.and_then(|p| validate_probe(p.as_ref())) {
            Ok(metadata) => metadata,
            Err(e) => {
                log::warn!("Rejected plugin: {}", e);
                return Err(e);
            }
        };

        if self.registered.contains_key(&metadata.name) {
            log::warn!("Plugin '{}' was registered again; replacing it.", metadata.name);
        }
        log::debug!("Registered plugin '{}' v{}.", metadata.name, metadata.version);
        self.registered.insert(
            metadata.name.clone(),
            RegisteredPlugin {
                metadata: metadata.clone(),
                factory,
            },
        );
        Ok(metadata)
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.loaded.iter().position(|p| p.metadata.name == name)
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn is_disabled(&self, name: &str) -> bool {
        self.disabled.contains(name)
    }

    /// Instantiates and initializes a registered plugin.
    /// Loading an already loaded plugin succeeds without doing anything.
    pub fn load(&mut self, name: &str) -> Result<(), PluginError> {
        if self.is_loaded(name) {
            return Ok(());
        }
        if self.disabled.contains(name) {
            return Err(PluginError::Disabled(name.to_string()));
        }
        let registered = self
            .registered
            .get(name)
            .ok_or_else(|| PluginError::NotRegistered(name.to_string()))?;

        if let Some(missing) = registered
            .metadata
            .dependencies
            .iter()
            .find(|dep| !self.is_loaded(dep))
        {
            return Err(PluginError::MissingDependency {
                plugin: name.to_string(),
                dependency: missing.clone(),
            });
        }

        let init_error = |e: anyhow::Error| PluginError::Init {
            plugin: name.to_string(),
            message: format!("{:#}", e),
        };
        let mut instance = (registered.factory)().map_err(init_error)?;
        instance.initialize().map_err(init_error)?;

        let metadata = registered.metadata.clone();
        log::info!("Loaded plugin '{}' v{}.", metadata.name, metadata.version);
        self.loaded.push(LoadedPlugin { metadata, instance });
        self.touch();
        Ok(())
    }

    /// Cleans up and drops a loaded plugin, unless another loaded plugin depends on it.
    pub fn unload(&mut self, name: &str) -> Result<(), PluginError> {
        let index = self
            .position(name)
            .ok_or_else(|| PluginError::NotLoaded(name.to_string()))?;

        let dependents: Vec<String> = self
            .loaded
            .iter()
            .filter(|p| p.metadata.dependencies.iter().any(|d| d == name))
            .map(|p| p.metadata.name.clone())
            .collect();
        if !dependents.is_empty() {
            return Err(PluginError::HasDependents {
                plugin: name.to_string(),
                dependents,
            });
        }

        let mut plugin = self.loaded.remove(index);
        if let Err(e) = plugin.instance.cleanup() {
            log::warn!("Cleanup of plugin '{}' failed: {:#}", name, e);
        }
        log::info!("Unloaded plugin '{}'.", name);
        self.touch();
        Ok(())
    }

    fn touch(&mut self) {
        self.generation += 1;
        self.cache = None;
    }

    /// Load order of every enabled registered plugin.
    ///
    /// Plugins with an unknown dependency, plugins in a cycle and everything
    /// depending on either are left out and reported.
    fn resolve_load_order(&self) -> (Vec<String>, Vec<String>, Vec<PluginError>) {
        let graph: BTreeMap<&str, BTreeSet<&str>> = self
            .registered
            .iter()
            .filter(|(name, _)| !self.disabled.contains(*name))
            .map(|(name, p)| {
                (
                    name.as_str(),
                    p.metadata.dependencies.iter().map(String::as_str).collect(),
                )
            })
            .collect();

        let mut errors = Vec::new();
        let mut excluded: BTreeSet<&str> = BTreeSet::new();
        for (name, deps) in &graph {
            for dep in deps {
                if !graph.contains_key(dep) {
                    errors.push(PluginError::UnknownDependency {
                        plugin: name.to_string(),
                        dependency: dep.to_string(),
                    });
                    excluded.insert(*name);
                }
            }
        }
        loop {
            let newly: Vec<&str> = graph
                .iter()
                .filter(|(name, deps)| !excluded.contains(*name) && deps.iter().any(|d| excluded.contains(d)))
                .map(|(name, _)| *name)
                .collect();
            if newly.is_empty() {
                break;
            }
            excluded.extend(newly);
        }

        // Kahn's algorithm over what is left. Ties resolve alphabetically.
        let mut pending: BTreeMap<&str, usize> = graph
            .iter()
            .filter(|(name, _)| !excluded.contains(*name))
            .map(|(name, deps)| (*name, deps.len()))
            .collect();
        let mut ready: VecDeque<&str> = pending
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(name, _)| *name)
            .collect();
        let mut order = Vec::new();
        while let Some(name) = ready.pop_front() {
            pending.remove(&name);
            order.push(name.to_string());
            for (other, deps) in &graph {
                if deps.contains(&name)
                    && let Some(count) = pending.get_mut(other)
                {
                    *count -= 1;
                    if *count == 0 {
                        ready.push_back(*other);
                    }
                }
            }
        }

        if !pending.is_empty() {
            let cycle = cycle_members(&graph, pending.keys().copied().collect());
            errors.push(PluginError::DependencyCycle(
                cycle.iter().map(|n| n.to_string()).collect(),
            ));
            let blocked: Vec<String> = pending
                .keys()
                .filter(|n| !cycle.contains(*n))
                .map(|n| n.to_string())
                .collect();
            if !blocked.is_empty() {
                errors.push(PluginError::BlockedByCycle(blocked));
            }
        }
        let skipped = excluded
            .into_iter()
            .chain(pending.into_keys())
            .map(str::to_string)
            .collect();
        (order, skipped, errors)
    }

    /// Loads every enabled registered plugin in dependency order.
    ///
    /// A plugin that fails to load does not stop the others. Dependency
    /// problems are reported in the summary; the affected plugins count as failed.
    pub fn load_all(&mut self) -> LoadSummary {
        let (order, skipped, dependency_errors) = self.resolve_load_order();
        for e in &dependency_errors {
            log::error!("{}", e);
        }

        let mut summary = LoadSummary {
            failed: skipped.len(),
            dependency_errors,
            ..LoadSummary::default()
        };
        for name in order {
            match self.load(&name) {
                Ok(()) => summary.succeeded += 1,
                Err(e) => {
                    log::error!("{}", e);
                    summary.failed += 1;
                }
            }
        }
        log::debug!(
            "Plugin load finished: {} loaded, {} failed.",
            summary.succeeded,
            summary.failed
        );
        summary
    }

    /// Loaded plugin names, in load order.
    pub fn loaded_plugins(&self) -> Vec<&str> {
        self.loaded.iter().map(|p| p.metadata.name.as_str()).collect()
    }

    pub fn loaded_count(&self) -> usize {
        self.loaded.len()
    }

    /// Bumped on every load and unload.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Metadata of every registered plugin, by name.
    pub fn registered(&self) -> Vec<&PluginMetadata> {
        self.registered.values().map(|p| &p.metadata).collect()
    }

    pub fn metadata(&self, name: &str) -> Option<&PluginMetadata> {
        self.registered.get(name).map(|p| &p.metadata)
    }

    /// Each loaded plugin's grammar rules and handlers, in load order.
    pub fn contributions(&self) -> Vec<Contribution> {
        self.loaded
            .iter()
            .map(|p| Contribution {
                source: p.metadata.name.clone(),
                grammar_rules: p.instance.grammar_rules(),
                command_handlers: p.instance.command_handlers(),
            })
            .collect()
    }

    /// The merged contributions, rebuilt after any load or unload.
    pub fn aggregates(&mut self) -> &Aggregates {
        let loaded = &self.loaded;
        self.cache.get_or_insert_with(|| merge(loaded))
    }

    pub fn grammar_rules(&mut self) -> &BTreeMap<String, String> {
        &self.aggregates().grammar_rules
    }

    pub fn command_handlers(&mut self) -> &BTreeMap<CommandKey, Handler> {
        &self.aggregates().command_handlers
    }

    pub fn constants(&mut self) -> &BTreeMap<String, String> {
        &self.aggregates().constants
    }

    pub fn transform_callbacks(&mut self) -> &HashMap<String, TransformFn> {
        &self.aggregates().transforms
    }
}

/// Narrows the plugins left over by Kahn's pass to those on a cycle, by
/// repeatedly dropping the ones no other leftover plugin depends on.
fn cycle_members<'a>(
    graph: &BTreeMap<&'a str, BTreeSet<&'a str>>,
    mut remaining: BTreeSet<&'a str>,
) -> BTreeSet<&'a str> {
    loop {
        let leaves: Vec<&str> = remaining
            .iter()
            .filter(|name| {
                !remaining
                    .iter()
                    .any(|other| graph.get(other).is_some_and(|deps| deps.contains(*name)))
            })
            .copied()
            .collect();
        if leaves.is_empty() {
            return remaining;
        }
        for leaf in leaves {
            remaining.remove(leaf);
        }
    }
}

fn merge(loaded: &[LoadedPlugin]) -> Aggregates {
    let mut merged = Aggregates::default();
    let mut owners: HashMap<String, String> = HashMap::new();
    let mut note = |kind: &str, key: String, plugin: &str| -> bool {
        let entry = format!("{}:{}", kind, key);
        match owners.get(&entry) {
            Some(owner) => {
                log::warn!(
                    "Duplicate {} '{}' from plugin '{}' ignored; '{}' already provides it.",
                    kind,
                    key,
                    plugin,
                    owner
                );
                false
            }
            None => {
                owners.insert(entry, plugin.to_string());
                true
            }
        }
    };

    for plugin in loaded {
        let name = plugin.metadata.name.as_str();
        for (rule, body) in plugin.instance.grammar_rules() {
            if note("grammar rule", bare_rule_name(&rule).to_string(), name) {
                merged.grammar_rules.insert(rule, body);
            }
        }
        for (key, handler) in plugin.instance.command_handlers() {
            if note("handler", key.to_string(), name) {
                merged.command_handlers.insert(key, handler);
            }
        }
        for (constant, value) in plugin.instance.constants() {
            if note("constant", constant.clone(), name) {
                merged.constants.insert(constant, value);
            }
        }
        for (rule, callback) in plugin.instance.transforms() {
            if note("transform", rule.clone(), name) {
                merged.transforms.insert(rule, callback);
            }
        }
    }
    log::debug!("Rebuilt plugin aggregates: {:?}", merged);
    merged
}
