// src/plugins/mod.rs

//! # Built-in Plugins
//!
//! The default command set, split the same way third-party plugins would
//! split it:
//!
//! - **`keywords`** (`core`): keyword terminals shared by the other plugins.
//! - **`resources`**: secrets, config maps and parameters.
//! - **`scripts`**: scripts stored in config maps and executed as Jobs.
//! - **`projects`**: projects and environments backed by labelled namespaces.

pub mod keywords;
pub mod projects;
pub mod resources;
pub mod scripts;

use crate::core::plugin::{Handler, Plugin, PluginSource, factory};
use crate::core::transform::{TransformFn, keyword_callback};
use crate::models::CommandKey;
use std::collections::{BTreeMap, HashMap};

/// Name of the catalogue holding the built-in plugins.
pub const BUILTIN_SOURCE: &str = "builtin";

/// Factories for every built-in plugin.
pub fn builtin_catalogue() -> PluginSource {
    PluginSource::new(
        BUILTIN_SOURCE,
        vec![
            factory(|| Ok(Box::new(keywords::CorePlugin) as Box<dyn Plugin>)),
            factory(|| Ok(Box::new(resources::ResourcesPlugin) as Box<dyn Plugin>)),
            factory(|| Ok(Box::new(scripts::ScriptsPlugin) as Box<dyn Plugin>)),
            factory(|| Ok(Box::new(projects::ProjectsPlugin) as Box<dyn Plugin>)),
        ],
    )
}

pub(crate) fn rule_map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(name, body)| (name.to_string(), body.to_string()))
        .collect()
}

pub(crate) fn constant_map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    rule_map(pairs)
}

/// Upper-cases the tokens of the given keyword terminals.
pub(crate) fn keyword_transforms(terminals: &[&str]) -> HashMap<String, TransformFn> {
    terminals
        .iter()
        .map(|name| (name.to_string(), keyword_callback()))
        .collect()
}

pub(crate) fn handler_map(entries: Vec<(CommandKey, Handler)>) -> BTreeMap<CommandKey, Handler> {
    entries.into_iter().collect()
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Runs DSL text through the built-in plugins against an in-memory cluster.

    use super::builtin_catalogue;
    use crate::core::config::Settings;
    use crate::core::context::SessionContext;
    use crate::core::executor::Executor;
    use crate::core::plugin::Services;
    use crate::system::cluster::MemoryCluster;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    pub(crate) fn settings() -> Settings {
        let mut settings = Settings {
            confirm_destructive: false,
            ..Settings::default()
        };
        settings.jobs.poll_interval_secs = 0;
        settings.jobs.timeout_secs = 1;
        settings
    }

    pub(crate) fn executor_with(cluster: Arc<MemoryCluster>) -> Executor {
        let services = Services::new(cluster, Arc::new(AtomicBool::new(false)), settings());
        let mut executor = Executor::new(services);
        executor.discover(&[builtin_catalogue()]);
        executor.load_all();
        executor
    }

    /// An executor over a fresh cluster, plus that cluster and a session.
    pub(crate) fn harness() -> (Executor, Arc<MemoryCluster>, SessionContext) {
        let cluster = Arc::new(MemoryCluster::new());
        (executor_with(cluster.clone()), cluster, SessionContext::default())
    }
}
