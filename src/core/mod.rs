// src/core/mod.rs

//! # Core
//!
//! The front end of the shell: grammar composition, parsing, transforms,
//! plugin lifecycle and command dispatch.

pub mod command_registry;
pub mod config;
pub mod context;
pub mod engine;
pub mod executor;
pub mod grammar;
pub mod grammar_registry;
pub mod parser;
pub mod paths;
pub mod plugin;
pub mod plugin_manager;
pub mod render;
pub mod transform;
