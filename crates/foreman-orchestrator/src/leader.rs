// Copyright (c) 2024-2026 Foreman Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Leader coordination: at most one orchestrator replica is the active
//! driver at any time.
//!
//! Implementations share the same shape: a background acquire/renew loop
//! against a shared coordination record, a cheap `is_leader()` read, and a
//! clean release on shutdown.  Callbacks fire on every transition and are
//! totally ordered — the loop is a single task, so `on_standby` always
//! completes before a later `on_active` starts.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use foreman_config::LeaderConfig;

pub type LeaderCallback = Box<dyn Fn() + Send + Sync>;

#[async_trait]
pub trait LeaderCoordinator: Send + Sync {
    /// Drive the acquire/renew loop until `cancel` fires.
    ///
    /// `on_active` / `on_standby` fire on every leadership transition.  When
    /// the loop exits while leading, a final `on_standby` fires before the
    /// call returns.
    async fn run(
        &self,
        cancel: CancellationToken,
        on_active: LeaderCallback,
        on_standby: LeaderCallback,
    );

    /// Cheap read of the current role.
    fn is_leader(&self) -> bool;

    /// Release the role cleanly (shutdown path).
    async fn stop(&self);
}

fn set_leader_gauge(active: bool) {
    foreman_telemetry::metrics()
        .leader_state
        .set(if active { 1 } else { 0 });
}

// ─── Static (single replica) ──────────────────────────────────────────────────

/// Always-leader coordinator for single-replica deployments.
#[derive(Default)]
pub struct StaticCoordinator {
    active: AtomicBool,
}

#[async_trait]
impl LeaderCoordinator for StaticCoordinator {
    async fn run(
        &self,
        cancel: CancellationToken,
        on_active: LeaderCallback,
        on_standby: LeaderCallback,
    ) {
        self.active.store(true, Ordering::SeqCst);
        set_leader_gauge(true);
        on_active();
        cancel.cancelled().await;
        self.active.store(false, Ordering::SeqCst);
        set_leader_gauge(false);
        on_standby();
    }

    fn is_leader(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    async fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

// ─── File lease ───────────────────────────────────────────────────────────────

/// The shared lease record.  Writers land through an atomic rename; the
/// verified re-read after writing decides who actually holds the lease.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LeaseRecord {
    holder: String,
    renewed_at: DateTime<Utc>,
    lease_ms: u64,
}

impl LeaseRecord {
    fn expired(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.renewed_at)
            > chrono::Duration::milliseconds(self.lease_ms as i64)
    }
}

/// Lease coordinator over a shared file (NFS volume, bind mount).
///
/// Timing: lease duration `L`, renewal interval `R < L`, acquisition retry
/// `A < L − R`.  A replica that stops renewing loses the lease within `L`.
pub struct FileLeaseCoordinator {
    path: PathBuf,
    identity: String,
    lease: Duration,
    renew: Duration,
    retry: Duration,
    active: AtomicBool,
}

impl FileLeaseCoordinator {
    pub fn new(
        path: impl Into<PathBuf>,
        identity: impl Into<String>,
        lease: Duration,
        renew: Duration,
        retry: Duration,
    ) -> Self {
        Self {
            path: path.into(),
            identity: identity.into(),
            lease,
            renew,
            retry,
            active: AtomicBool::new(false),
        }
    }

    pub fn from_config(cfg: &LeaderConfig, identity: impl Into<String>) -> anyhow::Result<Self> {
        cfg.validate()?;
        if cfg.lease_path.is_empty() {
            anyhow::bail!("leader.mode = file requires leader.lease_path");
        }
        Ok(Self::new(
            &cfg.lease_path,
            identity,
            Duration::from_secs(cfg.lease_secs),
            Duration::from_secs(cfg.renew_secs),
            Duration::from_secs(cfg.retry_secs),
        ))
    }

    fn read_record(&self) -> Option<LeaseRecord> {
        let text = std::fs::read_to_string(&self.path).ok()?;
        serde_json::from_str(&text).ok()
    }

    fn write_record(&self) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let record = LeaseRecord {
            holder: self.identity.clone(),
            renewed_at: Utc::now(),
            lease_ms: self.lease.as_millis() as u64,
        };
        // Per-replica scratch name so two writers never collide on the tmp
        // file itself; the rename is the contended step.
        let scratch = self.path.with_extension(format!("{}.tmp", sanitize(&self.identity)));
        std::fs::write(&scratch, serde_json::to_vec(&record)?)?;
        std::fs::rename(&scratch, &self.path)?;
        Ok(())
    }

    /// One acquire/renew round.  Returns whether this replica holds the
    /// lease afterwards.
    fn try_acquire(&self) -> bool {
        let now = Utc::now();
        let takeable = match self.read_record() {
            // Absent or unreadable — treat as up for grabs.
            None => true,
            Some(rec) => rec.holder == self.identity || rec.expired(now),
        };
        if !takeable {
            return false;
        }
        if let Err(e) = self.write_record() {
            warn!(path = %self.path.display(), error = %e, "lease write failed");
            return false;
        }
        // Last-writer-wins on the rename; the re-read decides who won.
        self.read_record()
            .map(|rec| rec.holder == self.identity)
            .unwrap_or(false)
    }

    fn release(&self) {
        if let Some(rec) = self.read_record() {
            if rec.holder == self.identity {
                if let Err(e) = std::fs::remove_file(&self.path) {
                    warn!(path = %self.path.display(), error = %e, "lease release failed");
                }
            }
        }
        self.active.store(false, Ordering::SeqCst);
        set_leader_gauge(false);
    }
}

fn sanitize(identity: &str) -> String {
    identity
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

#[async_trait]
impl LeaderCoordinator for FileLeaseCoordinator {
    async fn run(
        &self,
        cancel: CancellationToken,
        on_active: LeaderCallback,
        on_standby: LeaderCallback,
    ) {
        let mut leading = false;
        loop {
            let holds = self.try_acquire();
            if holds && !leading {
                leading = true;
                self.active.store(true, Ordering::SeqCst);
                set_leader_gauge(true);
                info!(identity = %self.identity, "became leader");
                on_active();
            } else if !holds && leading {
                leading = false;
                self.active.store(false, Ordering::SeqCst);
                set_leader_gauge(false);
                info!(identity = %self.identity, "lost leadership");
                on_standby();
            }

            let wait = if leading { self.renew } else { self.retry };
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }
        if leading {
            self.active.store(false, Ordering::SeqCst);
            set_leader_gauge(false);
            debug!(identity = %self.identity, "standing down");
            on_standby();
        }
    }

    fn is_leader(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    async fn stop(&self) {
        self.release();
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn coordinator(dir: &tempfile::TempDir, identity: &str) -> Arc<FileLeaseCoordinator> {
        Arc::new(FileLeaseCoordinator::new(
            dir.path().join("leader.lease"),
            identity,
            Duration::from_millis(300),
            Duration::from_millis(100),
            Duration::from_millis(50),
        ))
    }

    fn noop() -> LeaderCallback {
        Box::new(|| {})
    }

    fn notifier() -> (LeaderCallback, std::sync::mpsc::Receiver<()>) {
        let (tx, rx) = std::sync::mpsc::channel();
        (Box::new(move || { let _ = tx.send(()); }), rx)
    }

    #[test]
    fn fresh_record_is_not_expired() {
        let rec = LeaseRecord {
            holder: "a".into(),
            renewed_at: Utc::now(),
            lease_ms: 1000,
        };
        assert!(!rec.expired(Utc::now()));
        assert!(rec.expired(Utc::now() + chrono::Duration::seconds(2)));
    }

    #[tokio::test]
    async fn single_replica_acquires_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let a = coordinator(&dir, "replica-a");
        assert!(a.try_acquire());
        assert!(a.try_acquire(), "renewal by the holder keeps the lease");
    }

    #[tokio::test]
    async fn second_replica_cannot_steal_fresh_lease() {
        let dir = tempfile::tempdir().unwrap();
        let a = coordinator(&dir, "replica-a");
        let b = coordinator(&dir, "replica-b");
        assert!(a.try_acquire());
        assert!(!b.try_acquire());
    }

    #[tokio::test]
    async fn expired_lease_is_taken_over() {
        let dir = tempfile::tempdir().unwrap();
        let a = coordinator(&dir, "replica-a");
        let b = coordinator(&dir, "replica-b");
        assert!(a.try_acquire());
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(b.try_acquire(), "lease older than L is up for grabs");
        assert!(!a.try_acquire(), "previous holder sees the new owner");
    }

    #[tokio::test]
    async fn run_fires_active_then_standby_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let a = coordinator(&dir, "replica-a");
        let (on_active, active_rx) = notifier();
        let (on_standby, standby_rx) = notifier();

        let cancel = CancellationToken::new();
        let runner = {
            let a = a.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { a.run(cancel, on_active, on_standby).await })
        };

        active_rx
            .recv_timeout(std::time::Duration::from_secs(2))
            .expect("on_active fires");
        assert!(a.is_leader());

        cancel.cancel();
        runner.await.unwrap();
        standby_rx
            .recv_timeout(std::time::Duration::from_secs(2))
            .expect("on_standby fires on shutdown");
        assert!(!a.is_leader());
    }

    #[tokio::test]
    async fn leadership_hands_off_after_holder_dies() {
        let dir = tempfile::tempdir().unwrap();
        let a = coordinator(&dir, "replica-a");
        let b = coordinator(&dir, "replica-b");

        // A runs and acquires.
        let cancel_a = CancellationToken::new();
        let runner_a = {
            let a = a.clone();
            let cancel = cancel_a.clone();
            tokio::spawn(async move { a.run(cancel, noop(), noop()).await })
        };
        tokio::time::timeout(Duration::from_secs(2), async {
            while !a.is_leader() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        // B runs on the same record and stays standby while A renews.
        let (on_active_b, active_b_rx) = notifier();
        let cancel_b = CancellationToken::new();
        let runner_b = {
            let b = b.clone();
            let cancel = cancel_b.clone();
            tokio::spawn(async move { b.run(cancel, on_active_b, noop()).await })
        };
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!b.is_leader(), "standby while the holder renews");

        // Kill A without a clean release: the lease must expire first.
        cancel_a.cancel();
        runner_a.await.unwrap();
        active_b_rx
            .recv_timeout(std::time::Duration::from_secs(2))
            .expect("B takes over within the lease duration");
        assert!(b.is_leader());

        // Never two leaders at once.
        assert!(!a.is_leader());

        cancel_b.cancel();
        runner_b.await.unwrap();
    }

    #[tokio::test]
    async fn stop_releases_the_record() {
        let dir = tempfile::tempdir().unwrap();
        let a = coordinator(&dir, "replica-a");
        let b = coordinator(&dir, "replica-b");
        assert!(a.try_acquire());
        a.stop().await;
        assert!(
            b.try_acquire(),
            "released lease is immediately claimable without waiting for expiry"
        );
    }

    #[tokio::test]
    async fn static_coordinator_is_always_leader_while_running() {
        let c = Arc::new(StaticCoordinator::default());
        let cancel = CancellationToken::new();
        let runner = {
            let c = c.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { c.run(cancel, noop(), noop()).await })
        };
        tokio::time::timeout(Duration::from_secs(1), async {
            while !c.is_leader() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        cancel.cancel();
        runner.await.unwrap();
        assert!(!c.is_leader());
    }

    #[tokio::test]
    async fn garbage_lease_file_is_treated_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leader.lease");
        std::fs::write(&path, "not json").unwrap();
        let a = Arc::new(FileLeaseCoordinator::new(
            &path,
            "replica-a",
            Duration::from_millis(300),
            Duration::from_millis(100),
            Duration::from_millis(50),
        ));
        assert!(a.try_acquire());
    }
}
