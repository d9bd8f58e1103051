// Copyright (c) 2024-2026 Foreman Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! The poll–claim–spawn loop.
//!
//! Every tick: poll all work sources, de-duplicate, claim eligible items by
//! status transition, and dispatch each claim to the spawner under the
//! worker semaphore.  A failed status transition is a lost claim — another
//! replica or a racing process owns the item — and is skipped, never fatal.
//!
//! Item state machine under orchestrator control:
//! `discovered → claimed ("In Progress") → running → {Done, Failed, Cancelled}`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use foreman_config::OrchestratorConfig;

use crate::leader::LeaderCoordinator;
use crate::source::{dedupe, WorkItem, WorkSource};
use crate::spawn::{WorkerSpawner, WorkerState};

/// Characters of worker log tail carried into a failure comment.
const FAILURE_LOG_TAIL_CHARS: usize = 400;

pub struct Orchestrator {
    cfg: OrchestratorConfig,
    sources: Vec<Arc<dyn WorkSource>>,
    spawner: Arc<dyn WorkerSpawner>,
    leader: Arc<dyn LeaderCoordinator>,
    identity: String,
    semaphore: Arc<Semaphore>,
    /// Local claim attempts by `(source, id)`; items that keep failing to
    /// reach a terminal status are eventually left alone.
    attempts: Mutex<HashMap<(String, String), u32>>,
}

impl Orchestrator {
    pub fn new(
        cfg: OrchestratorConfig,
        sources: Vec<Arc<dyn WorkSource>>,
        spawner: Arc<dyn WorkerSpawner>,
        leader: Arc<dyn LeaderCoordinator>,
    ) -> Self {
        let identity = if cfg.identity.is_empty() {
            format!(
                "foreman-{}",
                &uuid::Uuid::new_v4().simple().to_string()[..8]
            )
        } else {
            cfg.identity.clone()
        };
        let semaphore = Arc::new(Semaphore::new(cfg.max_workers));
        Self {
            cfg,
            sources,
            spawner,
            leader,
            identity,
            semaphore,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Drive the loop until `cancel` fires, then drain in-flight workers.
    pub async fn run(&self, cancel: CancellationToken) {
        let interval = Duration::from_secs(self.cfg.poll_interval_secs.max(1));
        info!(
            identity = %self.identity,
            interval_secs = interval.as_secs(),
            max_workers = self.cfg.max_workers,
            "orchestrator loop started"
        );
        loop {
            if cancel.is_cancelled() {
                break;
            }
            self.tick(&cancel).await;
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        // Drain: wait for every permit, i.e. for every in-flight worker to
        // report its terminal status.
        debug!(identity = %self.identity, "draining in-flight workers");
        let _ = self
            .semaphore
            .acquire_many(self.cfg.max_workers as u32)
            .await;
        info!(identity = %self.identity, "orchestrator loop stopped");
    }

    /// One loop iteration.  Public so the binary and tests can single-step.
    pub async fn tick(&self, cancel: &CancellationToken) {
        // Leader gate: standby replicas poll nothing.
        if !self.leader.is_leader() {
            debug!(identity = %self.identity, "standby, skipping iteration");
            return;
        }

        let mut candidates = Vec::new();
        for source in &self.sources {
            match source.poll().await {
                Ok(items) => candidates.extend(items),
                Err(e) => {
                    warn!(source = source.name(), error = %e, "poll failed");
                    foreman_telemetry::metrics()
                        .errors
                        .with_label_values(&["poll_failed"])
                        .inc();
                }
            }
        }

        let eligible: Vec<WorkItem> = dedupe(candidates)
            .into_iter()
            .filter(|item| !self.cfg.skip_statuses.contains(&item.status))
            .collect();
        foreman_telemetry::metrics()
            .tasks_pending
            .set(eligible.len() as i64);

        for mut item in eligible {
            if cancel.is_cancelled() {
                return;
            }
            let attempts = self.record_attempt(&item);
            if attempts > self.cfg.max_attempts {
                debug!(item = %item.id, attempts, "attempt budget exhausted, leaving item alone");
                continue;
            }
            item.attempts = attempts;

            // Back-pressure: with all permits in flight, no further claims
            // are attempted this iteration.
            let permit = match self.semaphore.clone().try_acquire_owned() {
                Ok(p) => p,
                Err(_) => {
                    debug!("worker capacity reached, deferring remaining candidates");
                    return;
                }
            };

            let Some(source) = self.source_named(&item.source) else {
                warn!(item = %item.id, source = %item.source, "item from unknown source");
                continue;
            };

            // Claim by status transition; losing the transition means
            // another replica owns the item.
            let claim_comment = format!("claimed by {}", self.identity);
            if let Err(e) = source
                .update_status(&item, &self.cfg.claimed_status, Some(&claim_comment))
                .await
            {
                warn!(item = %item.id, error = %e, "claim lost, skipping");
                foreman_telemetry::metrics()
                    .errors
                    .with_label_values(&["claim_lost"])
                    .inc();
                drop(permit);
                continue;
            }
            info!(item = %item.id, source = source.name(), "claimed");

            let spawner = self.spawner.clone();
            let cfg = self.cfg.clone();
            let identity = self.identity.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let metrics = foreman_telemetry::metrics();
                metrics.workers_active.inc();
                drive_worker(spawner, source, item, cfg, identity, cancel).await;
                metrics.workers_active.dec();
                // The permit is released only after the terminal status is
                // reported.
                drop(permit);
            });
        }
    }

    fn source_named(&self, name: &str) -> Option<Arc<dyn WorkSource>> {
        self.sources.iter().find(|s| s.name() == name).cloned()
    }

    fn record_attempt(&self, item: &WorkItem) -> u32 {
        let mut attempts = self.attempts.lock().unwrap();
        let entry = attempts
            .entry((item.source.clone(), item.id.clone()))
            .or_insert(0);
        *entry += 1;
        *entry
    }
}

/// Spawn one worker for a claimed item, wait for its terminal state, and
/// report the outcome back to the work source.
async fn drive_worker(
    spawner: Arc<dyn WorkerSpawner>,
    source: Arc<dyn WorkSource>,
    item: WorkItem,
    cfg: OrchestratorConfig,
    identity: String,
    cancel: CancellationToken,
) {
    let metrics = foreman_telemetry::metrics();
    let outcome = async {
        let handle = spawner.spawn(&item).await?;
        tokio::select! {
            _ = cancel.cancelled() => Ok((WorkerState::Cancelled, String::new())),
            r = spawner.wait(&handle) => r,
        }
    }
    .await;

    match outcome {
        Ok((WorkerState::Completed, _logs)) => {
            info!(item = %item.id, "worker completed");
            metrics.tasks_completed.inc();
            let comment = format!("completed by {identity}");
            if let Err(e) = source
                .update_status(&item, &cfg.done_status, Some(&comment))
                .await
            {
                warn!(item = %item.id, error = %e, "done transition failed");
            }
        }
        Ok((WorkerState::Cancelled, _)) => {
            // Shutdown: release without a status change so the item is
            // re-claimable by the next leader.
            info!(item = %item.id, "worker cancelled, releasing without status change");
        }
        Ok((state, logs)) => {
            warn!(item = %item.id, %state, "worker failed");
            metrics.errors.with_label_values(&["worker_failed"]).inc();
            let tail: String = logs
                .chars()
                .rev()
                .take(FAILURE_LOG_TAIL_CHARS)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            let comment = format!("failed ({identity}): {tail}");
            if let Err(e) = source
                .update_status(&item, &cfg.failed_status, Some(&comment))
                .await
            {
                warn!(item = %item.id, error = %e, "failed transition failed");
            }
        }
        Err(e) => {
            warn!(item = %item.id, error = %e, "worker spawn failed");
            metrics.errors.with_label_values(&["worker_failed"]).inc();
            let comment = format!("failed to start worker ({identity}): {e}");
            if let Err(e) = source
                .update_status(&item, &cfg.failed_status, Some(&comment))
                .await
            {
                warn!(item = %item.id, error = %e, "failed transition failed");
            }
        }
    }
}
