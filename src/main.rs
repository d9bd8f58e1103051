// Copyright (c) 2024-2026 Foreman Contributors
//
// SPDX-License-Identifier: Apache-2.0
mod cli;

use std::io::Read;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};
use foreman_config::Config;
use foreman_orchestrator::{
    DockerSpawner, FileLeaseCoordinator, FileQueueSource, KubeLeaseCoordinator, KubeSpawner,
    LeaderCoordinator, Orchestrator, StaticCoordinator, TrackerSource, WorkSource, WorkerSpawner,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match &cli.command {
        Commands::ShowConfig => {
            let config = foreman_config::load(cli.config.as_deref())?;
            println!("{}", serde_yaml::to_string(&config).unwrap_or_default());
            Ok(())
        }
        Commands::ListProviders { json } => list_providers(*json),
        Commands::Agent {
            prompt,
            stream,
            project,
        } => {
            let config = foreman_config::load(cli.config.as_deref())?;
            run_agent(&config, prompt.as_deref(), *stream, project.as_deref()).await
        }
        Commands::Orchestrate => {
            let config = foreman_config::load(cli.config.as_deref())?;
            run_orchestrator(config).await
        }
    }
}

fn list_providers(json: bool) -> anyhow::Result<()> {
    let drivers = foreman_model::list_drivers();
    if json {
        let entries: Vec<serde_json::Value> = drivers
            .iter()
            .map(|d| {
                serde_json::json!({
                    "id": d.id,
                    "name": d.name,
                    "description": d.description,
                    "api_key_env": d.default_api_key_env,
                    "context_window": d.default_context_window,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        for d in drivers {
            println!("{:<12} {:<18} {}", d.id, d.name, d.description);
        }
    }
    Ok(())
}

// ── Agent turn (inside a worker) ──────────────────────────────────────────────

async fn run_agent(
    config: &Config,
    prompt: Option<&str>,
    stream: bool,
    project: Option<&str>,
) -> anyhow::Result<()> {
    let prompt = match prompt {
        Some(p) => p.to_string(),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("reading prompt from stdin")?;
            buf
        }
    };
    if prompt.trim().is_empty() {
        anyhow::bail!("empty prompt; pass text as an argument or on stdin");
    }

    let provider: Arc<dyn foreman_model::ModelProvider> =
        Arc::from(foreman_model::from_config(&config.model)?);
    let project = project.unwrap_or(&config.state.project);
    let store = Arc::new(foreman_agent::StateStore::for_project(
        &config.state.dir,
        project,
    ));
    store
        .initialize(provider.context_window() as u64, provider.model_name())
        .await?;
    let pipeline = foreman_agent::AgentPipeline::new(provider, store, project);

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let response = if stream {
        use std::io::Write;
        let mut stdout = std::io::stdout();
        let mut sink = move |chunk: &str| {
            let _ = stdout.write_all(chunk.as_bytes());
            let _ = stdout.flush();
        };
        let full = pipeline.send_stream(&cancel, &prompt, &mut sink).await?;
        println!();
        full
    } else {
        let full = pipeline.send(&cancel, &prompt).await?;
        println!("{full}");
        full
    };
    info!(chars = response.len(), "agent turn complete");
    Ok(())
}

// ── Control plane ─────────────────────────────────────────────────────────────

async fn run_orchestrator(config: Config) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let mut sources: Vec<Arc<dyn WorkSource>> = Vec::new();
    if let Some(tracker_cfg) = config.sources.tracker.clone() {
        sources.push(Arc::new(TrackerSource::from_config(tracker_cfg)?));
    }
    if let Some(files_cfg) = &config.sources.files {
        sources.push(Arc::new(FileQueueSource::new(&files_cfg.dir)));
    }
    if sources.is_empty() {
        anyhow::bail!("no work sources configured; set sources.tracker or sources.files");
    }

    let identity = if config.orchestrator.identity.is_empty() {
        format!("foreman-{}", uuid_suffix())
    } else {
        config.orchestrator.identity.clone()
    };

    let spawner: Arc<dyn WorkerSpawner> = match config.worker.runtime.as_str() {
        "docker" => Arc::new(DockerSpawner::new(
            config.worker.clone(),
            config.model.clone(),
            identity.clone(),
        )),
        "kubernetes" => {
            let client = kube_client().await?;
            Arc::new(KubeSpawner::new(
                client,
                config.worker.clone(),
                config.model.clone(),
                identity.clone(),
            ))
        }
        other => anyhow::bail!("unknown worker.runtime {other:?} (expected docker or kubernetes)"),
    };

    let leader: Arc<dyn LeaderCoordinator> = match config.leader.mode.as_str() {
        "static" => Arc::new(StaticCoordinator::default()),
        "file" => Arc::new(FileLeaseCoordinator::from_config(
            &config.leader,
            identity.clone(),
        )?),
        "kubernetes" => {
            let client = kube_client().await?;
            Arc::new(KubeLeaseCoordinator::new(
                client,
                &config.worker.namespace,
                &config.leader,
                identity.clone(),
            )?)
        }
        other => anyhow::bail!(
            "unknown leader.mode {other:?} (expected static, file, or kubernetes)"
        ),
    };

    if !config.metrics.listen.is_empty() {
        let listen = config.metrics.listen.clone();
        let metrics_cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = foreman_telemetry::serve(&listen, metrics_cancel).await {
                warn!(error = %e, "metrics endpoint failed");
            }
        });
    }

    let leader_task = {
        let leader = leader.clone();
        let cancel = cancel.clone();
        let on_active: foreman_orchestrator::LeaderCallback =
            Box::new(|| info!("this replica is now the active orchestrator"));
        let on_standby: foreman_orchestrator::LeaderCallback =
            Box::new(|| info!("this replica is now standby"));
        tokio::spawn(async move { leader.run(cancel, on_active, on_standby).await })
    };

    let mut orchestrator_cfg = config.orchestrator.clone();
    orchestrator_cfg.identity = identity.clone();
    let orchestrator = Orchestrator::new(orchestrator_cfg, sources, spawner, leader.clone());
    info!(identity = %orchestrator.identity(), "foreman starting");

    orchestrator.run(cancel.clone()).await;

    // Clean shutdown: release the leader role, then let the final state
    // writes land.
    leader.stop().await;
    let _ = leader_task.await;
    info!("shutdown complete");
    Ok(())
}

async fn kube_client() -> anyhow::Result<kube::Client> {
    kube::Client::try_default()
        .await
        .context("connecting to the Kubernetes API (is kubeconfig or in-cluster config present?)")
}

fn uuid_suffix() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// INT and TERM cancel the root context; the loop drains and exits 0.
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        let interrupted = async {
            let _ = tokio::signal::ctrl_c().await;
        };
        #[cfg(unix)]
        let terminated = async {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    term.recv().await;
                }
                Err(_) => std::future::pending().await,
            }
        };
        #[cfg(not(unix))]
        let terminated = std::future::pending::<()>();

        tokio::select! {
            _ = interrupted => info!("interrupt received, shutting down"),
            _ = terminated => info!("terminate received, shutting down"),
        }
        cancel.cancel();
    });
}

fn init_logging(verbosity: u8) {
    let default_level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,foreman={default_level}")));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .init();
}
