// Copyright (c) 2024-2026 Foreman Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Container-local worker spawner driving the `docker` CLI.
//!
//! One worker = one detached container.  The image is pulled on first use,
//! the container runs to completion, logs are collected, and the container
//! is removed.  The command runner is injectable so tests never need a
//! Docker daemon.

use std::sync::Arc;

use anyhow::{bail, Context};
use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::{debug, warn};

use foreman_config::{ProviderConfig, WorkerConfig};

use crate::source::WorkItem;
use crate::spawn::{worker_env, worker_name, WorkerHandle, WorkerSpawner, WorkerState};

/// `(exit_code, stdout, stderr)` of one `docker …` invocation.
pub type CmdOutput = (i32, String, String);

/// Command runner seam; the default shells out to `docker`.
pub type CmdRunner =
    Arc<dyn Fn(Vec<String>) -> BoxFuture<'static, std::io::Result<CmdOutput>> + Send + Sync>;

pub struct DockerSpawner {
    worker: WorkerConfig,
    model: ProviderConfig,
    identity: String,
    runner: CmdRunner,
}

impl DockerSpawner {
    pub fn new(worker: WorkerConfig, model: ProviderConfig, identity: impl Into<String>) -> Self {
        Self::with_runner(worker, model, identity, Arc::new(run_docker))
    }

    pub fn with_runner(
        worker: WorkerConfig,
        model: ProviderConfig,
        identity: impl Into<String>,
        runner: CmdRunner,
    ) -> Self {
        Self {
            worker,
            model,
            identity: identity.into(),
            runner,
        }
    }

    async fn docker(&self, args: Vec<String>) -> anyhow::Result<CmdOutput> {
        (self.runner)(args.clone())
            .await
            .with_context(|| format!("running docker {}", args.join(" ")))
    }

    async fn ensure_image(&self) -> anyhow::Result<()> {
        let (code, _, _) = self
            .docker(vec!["image".into(), "inspect".into(), self.worker.image.clone()])
            .await?;
        if code == 0 {
            return Ok(());
        }
        debug!(image = %self.worker.image, "pulling worker image");
        let (code, _, stderr) = self
            .docker(vec!["pull".into(), self.worker.image.clone()])
            .await?;
        if code != 0 {
            bail!("docker pull {} failed: {stderr}", self.worker.image);
        }
        Ok(())
    }
}

#[async_trait]
impl WorkerSpawner for DockerSpawner {
    async fn spawn(&self, item: &WorkItem) -> anyhow::Result<WorkerHandle> {
        self.ensure_image().await?;

        let name = worker_name(&item.id);
        let mut args = vec!["run".into(), "-d".into(), "--name".into(), name.clone()];
        for (k, v) in worker_env(&self.worker, &self.model, item, &self.identity) {
            args.push("-e".into());
            args.push(format!("{k}={v}"));
        }
        args.push(self.worker.image.clone());

        let (code, _, stderr) = self.docker(args).await?;
        if code != 0 {
            bail!("docker run for {} failed: {stderr}", item.id);
        }
        debug!(container = %name, item = %item.id, "worker container started");
        Ok(WorkerHandle {
            worker_id: name,
            work_item_id: item.id.clone(),
            started_at: chrono::Utc::now(),
            state: WorkerState::Running,
        })
    }

    async fn wait(&self, handle: &WorkerHandle) -> anyhow::Result<(WorkerState, String)> {
        // `docker wait` blocks until exit and prints the exit code.
        let (code, stdout, stderr) = self
            .docker(vec!["wait".into(), handle.worker_id.clone()])
            .await?;
        if code != 0 {
            bail!("docker wait for {} failed: {stderr}", handle.worker_id);
        }
        let exit_code: i32 = stdout.trim().parse().unwrap_or(-1);

        let (_, logs, log_err) = self
            .docker(vec!["logs".into(), handle.worker_id.clone()])
            .await?;
        let logs = if logs.is_empty() { log_err } else { logs };

        // Container removal is cleanup, not outcome.
        if let Err(e) = self
            .docker(vec!["rm".into(), "-f".into(), handle.worker_id.clone()])
            .await
        {
            warn!(container = %handle.worker_id, error = %e, "container cleanup failed");
        }

        let state = if exit_code == 0 {
            WorkerState::Completed
        } else {
            WorkerState::Failed
        };
        Ok((state, logs))
    }
}

fn run_docker(args: Vec<String>) -> BoxFuture<'static, std::io::Result<CmdOutput>> {
    Box::pin(async move {
        let out = tokio::process::Command::new("docker")
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await?;
        Ok((
            out.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&out.stdout).into_owned(),
            String::from_utf8_lossy(&out.stderr).into_owned(),
        ))
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
