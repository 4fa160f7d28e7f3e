// src/cli/mod.rs

use crate::core::config::Backend;
use clap::Parser;
use std::path::PathBuf;

pub mod shell;

/// kubesol: an interactive SQL-like shell for projects, resources and scripts on Kubernetes.
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about,
    styles = clap::builder::Styles::styled()
        .header(clap::builder::styling::AnsiColor::Yellow.on_default().bold())
        .usage(clap::builder::styling::AnsiColor::Yellow.on_default().bold())
        .literal(clap::builder::styling::AnsiColor::Cyan.on_default().bold())
        .placeholder(clap::builder::styling::AnsiColor::Green.on_default()),
)]
pub struct Cli {
    /// Path to a config file (defaults to the user config directory).
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Namespace the session starts in.
    #[arg(short, long, value_name = "NAMESPACE")]
    pub namespace: Option<String>,

    /// Cluster backend to use.
    #[arg(long, value_enum)]
    pub backend: Option<Backend>,

    /// Enable debug logging.
    #[arg(short, long)]
    pub verbose: bool,
}
