// Copyright (c) 2024-2026 Foreman Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Kubernetes-native leader coordination over a `coordination.k8s.io/v1`
//! Lease object.
//!
//! The apiserver's optimistic concurrency is the consensus point: every
//! renewal is a `replace` carrying the `resourceVersion` of the record just
//! read, so two replicas racing for the same lease cannot both win — the
//! loser gets a 409 and stays standby.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use kube::api::{Api, ObjectMeta, PostParams};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use foreman_config::LeaderConfig;

use crate::leader::{LeaderCallback, LeaderCoordinator};

pub struct KubeLeaseCoordinator {
    api: Api<Lease>,
    name: String,
    identity: String,
    lease: Duration,
    renew: Duration,
    retry: Duration,
    active: AtomicBool,
}

impl KubeLeaseCoordinator {
    pub fn new(
        client: kube::Client,
        namespace: &str,
        cfg: &LeaderConfig,
        identity: impl Into<String>,
    ) -> anyhow::Result<Self> {
        cfg.validate()?;
        Ok(Self {
            api: Api::namespaced(client, namespace),
            name: cfg.lease_name.clone(),
            identity: identity.into(),
            lease: Duration::from_secs(cfg.lease_secs),
            renew: Duration::from_secs(cfg.renew_secs),
            retry: Duration::from_secs(cfg.retry_secs),
            active: AtomicBool::new(false),
        })
    }

    fn fresh_lease(&self) -> Lease {
        Lease {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: Some(self.identity.clone()),
                lease_duration_seconds: Some(self.lease.as_secs() as i32),
                acquire_time: Some(MicroTime(Utc::now())),
                renew_time: Some(MicroTime(Utc::now())),
                ..Default::default()
            }),
        }
    }

    /// One acquire/renew round against the apiserver.
    async fn try_acquire(&self) -> kube::Result<bool> {
        let existing = self.api.get_opt(&self.name).await?;
        let Some(mut lease) = existing else {
            return match self.api.create(&PostParams::default(), &self.fresh_lease()).await {
                Ok(_) => Ok(true),
                // Another replica created it first.
                Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(false),
                Err(e) => Err(e),
            };
        };

        let spec = lease.spec.get_or_insert_with(Default::default);
        let holder = spec.holder_identity.clone().unwrap_or_default();
        let duration = spec
            .lease_duration_seconds
            .map(|s| chrono::Duration::seconds(s as i64))
            .unwrap_or_else(|| chrono::Duration::seconds(self.lease.as_secs() as i64));
        let expired = spec
            .renew_time
            .as_ref()
            .map(|t| Utc::now().signed_duration_since(t.0) > duration)
            .unwrap_or(true);

        if !(holder.is_empty() || holder == self.identity || expired) {
            return Ok(false);
        }

        if holder != self.identity {
            spec.acquire_time = Some(MicroTime(Utc::now()));
            spec.lease_transitions = Some(spec.lease_transitions.unwrap_or(0) + 1);
        }
        spec.holder_identity = Some(self.identity.clone());
        spec.lease_duration_seconds = Some(self.lease.as_secs() as i32);
        spec.renew_time = Some(MicroTime(Utc::now()));

        match self.api.replace(&self.name, &PostParams::default(), &lease).await {
            Ok(_) => Ok(true),
            // Lost the optimistic-concurrency race.
            Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn release(&self) {
        let held = match self.api.get_opt(&self.name).await {
            Ok(Some(mut lease)) => {
                let spec = lease.spec.get_or_insert_with(Default::default);
                if spec.holder_identity.as_deref() == Some(self.identity.as_str()) {
                    spec.holder_identity = None;
                    spec.renew_time = None;
                    Some(lease)
                } else {
                    None
                }
            }
            _ => None,
        };
        if let Some(lease) = held {
            if let Err(e) = self.api.replace(&self.name, &PostParams::default(), &lease).await {
                warn!(lease = %self.name, error = %e, "lease release failed");
            }
        }
        self.active.store(false, Ordering::SeqCst);
        foreman_telemetry::metrics().leader_state.set(0);
    }
}

#[async_trait]
impl LeaderCoordinator for KubeLeaseCoordinator {
    async fn run(
        &self,
        cancel: CancellationToken,
        on_active: LeaderCallback,
        on_standby: LeaderCallback,
    ) {
        let mut leading = false;
        loop {
            let holds = match self.try_acquire().await {
                Ok(h) => h,
                Err(e) => {
                    // Apiserver hiccups demote conservatively: better a tick
                    // without a leader than two leaders.
                    warn!(lease = %self.name, error = %e, "lease round failed");
                    false
                }
            };

            if holds && !leading {
                leading = true;
                self.active.store(true, Ordering::SeqCst);
                foreman_telemetry::metrics().leader_state.set(1);
                info!(identity = %self.identity, lease = %self.name, "became leader");
                on_active();
            } else if !holds && leading {
                leading = false;
                self.active.store(false, Ordering::SeqCst);
                foreman_telemetry::metrics().leader_state.set(0);
                info!(identity = %self.identity, lease = %self.name, "lost leadership");
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
            foreman_telemetry::metrics().leader_state.set(0);
            debug!(identity = %self.identity, "standing down");
            on_standby();
        }
    }

    fn is_leader(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    async fn stop(&self) {
        self.release().await;
    }
}
