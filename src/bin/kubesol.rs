// src/bin/kubesol.rs

use anyhow::{Context, Result, bail};
use clap::Parser;
use colored::*;
use kubesol::{
    CancellationToken,
    cli::{Cli, shell::Shell},
    core::{
        config::{self, Backend, Settings},
        context::SessionContext,
        executor::Executor,
        paths,
        plugin::Services,
    },
    plugins::builtin_catalogue,
    system::cluster::{ClusterApi, KubectlCluster, MemoryCluster},
    t,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

fn main() {
    let cli = Cli::parse();
    let cancellation_token: CancellationToken = Arc::new(AtomicBool::new(false));

    if let Err(e) = run(cli, cancellation_token) {
        eprintln!("\n{}: {:#}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_logging(settings: &Settings, verbose: bool) {
    let level = if verbose { "debug" } else { settings.log_level.as_str() };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn build_cluster(settings: &Settings, token: &CancellationToken) -> Result<Arc<dyn ClusterApi>> {
    let cluster: Arc<dyn ClusterApi> = match settings.backend {
        Backend::Kubectl => Arc::new(
            KubectlCluster::new(&settings.kubectl_path, token.clone())
                .context(t!("main.error.cluster_client"))?,
        ),
        Backend::Memory => Arc::new(MemoryCluster::new()),
    };
    Ok(cluster)
}

fn run(cli: Cli, cancellation_token: CancellationToken) -> Result<()> {
    // 1. Configuration, with command-line overrides.
    let mut settings = config::load_settings(cli.config.as_deref())?;
    if let Some(namespace) = &cli.namespace {
        settings.default_namespace = namespace.clone();
    }
    if let Some(backend) = cli.backend {
        settings.backend = backend;
    }
    init_logging(&settings, cli.verbose);
    log::debug!("Settings: {:?}", settings);

    // 2. Ctrl+C only flags the token; long-running waits poll it.
    let handler_token = cancellation_token.clone();
    ctrlc::set_handler(move || handler_token.store(true, Ordering::SeqCst))
        .context(t!("main.error.ctrlc"))?;

    // 3. Cluster client and connectivity.
    let cluster = build_cluster(&settings, &cancellation_token)?;
    println!("{}", format!(t!("main.info.connecting"), backend = cluster.describe()).dimmed());
    if let Err(e) = cluster.check_connectivity() {
        bail!(t!("main.error.connectivity"), error = e);
    }

    // 4. Plugins.
    let session = SessionContext::new(&settings.default_namespace);
    let services = Services::new(cluster, cancellation_token.clone(), settings);
    let mut executor = Executor::new(services);
    executor.discover(&[builtin_catalogue()]);
    let summary = executor.load_all();
    for error in &summary.dependency_errors {
        eprintln!("{} {}", t!("common.warning").yellow().bold(), error);
    }
    if summary.succeeded == 0 {
        bail!(t!("main.error.no_plugins"));
    }
    log::info!("Loaded {} plugins ({} failed).", summary.succeeded, summary.failed);

    // 5. Banner and loop.
    println!("\n{}", t!("main.banner.title").cyan().bold());
    println!(
        "{}",
        format!(
            t!("main.banner.plugins"),
            plugins = executor.plugins().loaded_plugins().join(", ")
        )
        .dimmed()
    );
    println!("{}\n", t!("main.banner.hint").dimmed());

    let mut shell = Shell::new(executor, session, cancellation_token);
    match paths::get_history_path() {
        Ok(path) => shell = shell.with_history(path),
        Err(e) => log::warn!("History disabled: {}", e),
    }
    shell.run()
}
