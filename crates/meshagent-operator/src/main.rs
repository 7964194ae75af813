//! mesh-agent - canary, sticky-canary and dark-launch routing for Istio

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use kube::{Client, CustomResourceExt};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use meshagent_common::crd::IstioRoute;
use meshagent_common::{KubeObjectStore, LogNotifier};
use meshagent_desired_state::{DesiredStateSync, Differ};
use meshagent_operator::controller_runner::build_route_controller;
use meshagent_operator::render::render_manifest;
use meshagent_operator::sync_loop::run_sync_loop;
use meshagent_operator::OperatorConfig;

/// mesh-agent - reconciles IstioRoutes into Istio traffic objects
#[derive(Parser, Debug)]
#[command(name = "mesh-agent", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    #[command(flatten)]
    config: OperatorConfig,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as controller (default mode)
    ///
    /// Watches IstioRoutes and the objects they produce, and when a
    /// desired-state URL is configured, periodically converges the
    /// cluster's IstioRoutes onto the published manifest.
    Controller,

    /// Run a single desired-state pass and exit
    SyncOnce,

    /// Print the objects an IstioRoute manifest would produce, without a cluster
    Render {
        /// Path to a YAML file holding one or more IstioRoutes
        #[arg(short = 'f', long)]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&IstioRoute::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    cli.config.validate()?;

    match cli.command {
        Some(Commands::Controller) | None => run_controller(&cli.config).await,
        Some(Commands::SyncOnce) => run_sync_once(&cli.config).await,
        Some(Commands::Render { file }) => {
            let text = std::fs::read_to_string(&file)
                .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", file.display(), e))?;
            print!("{}", render_manifest(&text, &cli.config.synthesis_options())?);
            Ok(())
        }
    }
}

/// Build a desired-state sync against the cluster, if one is configured
fn desired_state_sync(
    client: &Client,
    config: &OperatorConfig,
) -> anyhow::Result<Option<DesiredStateSync>> {
    let Some(source) = config.manifest_source()? else {
        return Ok(None);
    };
    tracing::info!(url = %source.url(), "desired-state sync enabled");
    let differ = Differ::new(
        Arc::new(KubeObjectStore::new(client.clone())),
        Arc::new(LogNotifier),
        config.field_manager.clone(),
    );
    Ok(Some(DesiredStateSync::new(Arc::new(source), differ)))
}

async fn run_sync_once(config: &OperatorConfig) -> anyhow::Result<()> {
    let client = Client::try_default().await?;
    let sync = desired_state_sync(&client, config)?
        .ok_or_else(|| anyhow::anyhow!("sync-once requires --desired-state-url"))?;
    let report = sync.run_once().await?;
    tracing::info!(
        applied = report.applied.len(),
        deleted = report.deleted.len(),
        unchanged = report.unchanged,
        "desired-state pass finished"
    );
    Ok(())
}

async fn run_controller(config: &OperatorConfig) -> anyhow::Result<()> {
    let client = Client::try_default().await?;
    let cancel = CancellationToken::new();

    tracing::info!("Starting mesh-agent controllers:");
    let controller = build_route_controller(client.clone(), config, cancel.clone());

    let sync_task = desired_state_sync(&client, config)?.map(|sync| {
        tokio::spawn(run_sync_loop(sync, config.sync_interval(), cancel.clone()))
    });

    tokio::spawn(cancel_on_signal(cancel.clone()));
    controller.await;
    tracing::info!("IstioRoute controller completed");

    cancel.cancel();
    if let Some(task) = sync_task {
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "desired-state sync task ended abnormally");
        }
    }

    tracing::info!("mesh-agent shutting down");
    Ok(())
}

/// Cancel in-flight work on SIGINT/SIGTERM so reconciles stop between
/// external calls while the controller drains
async fn cancel_on_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    tracing::info!("shutdown signal received");
    cancel.cancel();
}
