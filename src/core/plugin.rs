// src/core/plugin.rs

//! The contract between the shell core and the plugins that extend its language.

use super::config::Settings;
use super::context::SessionContext;
use super::transform::TransformFn;
use crate::CancellationToken;
use crate::models::{Command, CommandKey};
use crate::system::cluster::ClusterApi;
use anyhow::Result;
use dialoguer::{Confirm, theme::ColorfulTheme};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("The handler for '{0}' received a payload it does not handle.")]
    UnexpectedPayload(CommandKey),
}

/// Collaborators shared by every handler invocation.
pub struct Services {
    pub cluster: Arc<dyn ClusterApi>,
    pub cancel: CancellationToken,
    pub settings: Settings,
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Services")
            .field("cluster", &self.cluster.describe())
            .field("settings", &self.settings)
            .finish()
    }
}

impl Services {
    pub fn new(cluster: Arc<dyn ClusterApi>, cancel: CancellationToken, settings: Settings) -> Self {
        Self {
            cluster,
            cancel,
            settings,
        }
    }

    /// Asks for confirmation, or answers yes when prompts are disabled.
    pub fn confirm(&self, prompt: &str) -> Result<bool> {
        if !self.settings.confirm_destructive {
            return Ok(true);
        }
        Ok(Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(prompt)
            .default(false)
            .interact()?)
    }
}

/// What a handler receives besides the command itself.
#[derive(Debug)]
pub struct HandlerContext<'a> {
    pub session: &'a mut SessionContext,
    pub services: &'a Services,
}

/// A command handler. Errors are reported by the executor and never end the session.
pub type Handler = Arc<dyn Fn(&Command, &mut HandlerContext<'_>) -> Result<()> + Send + Sync>;

/// Wraps a closure as a [`Handler`].
pub fn handler<F>(f: F) -> Handler
where
    F: Fn(&Command, &mut HandlerContext<'_>) -> Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Descriptive data every plugin exposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginMetadata {
    pub name: String,
    pub version: String,
    pub description: String,
    pub dependencies: Vec<String>,
}

impl PluginMetadata {
    pub fn new(name: &str, version: &str, description: &str, dependencies: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            description: description.to_string(),
            dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
        }
    }
}

/// A unit that contributes grammar rules, handlers, constants and transforms.
pub trait Plugin {
    fn metadata(&self) -> PluginMetadata;

    /// Rule name to rule body. Uppercase names define terminals.
    fn grammar_rules(&self) -> BTreeMap<String, String>;

    fn command_handlers(&self) -> BTreeMap<CommandKey, Handler>;

    fn constants(&self) -> BTreeMap<String, String>;

    /// Rule or terminal name to transform callback.
    fn transforms(&self) -> HashMap<String, TransformFn> {
        HashMap::new()
    }

    /// Called once when the plugin is loaded.
    fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called once when the plugin is unloaded.
    fn cleanup(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Constructs a plugin instance.
pub type PluginFactory = Arc<dyn Fn() -> Result<Box<dyn Plugin>> + Send + Sync>;

pub fn factory<F>(f: F) -> PluginFactory
where
    F: Fn() -> Result<Box<dyn Plugin>> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// A named catalogue of plugin factories.
#[derive(Clone)]
pub struct PluginSource {
    pub name: String,
    pub factories: Vec<PluginFactory>,
}

impl fmt::Debug for PluginSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginSource")
            .field("name", &self.name)
            .field("factories", &self.factories.len())
            .finish()
    }
}

impl PluginSource {
    pub fn new(name: &str, factories: Vec<PluginFactory>) -> Self {
        Self {
            name: name.to_string(),
            factories,
        }
    }
}
