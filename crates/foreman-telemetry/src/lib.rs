// Copyright (c) 2024-2026 Foreman Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Process-wide metrics registry.
//!
//! All counters live behind a [`once_cell::sync::Lazy`] singleton: the first
//! access registers everything, later accesses are no-ops.  Components update
//! metrics through [`metrics()`]; the scrape endpoint renders the registry in
//! Prometheus text exposition format.

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub struct Metrics {
    pub registry: Registry,
    /// Agent pipeline turns started.
    pub agent_iterations: IntCounter,
    /// Wall-clock latency of successful pipeline turns.
    pub agent_latency: Histogram,
    /// Grand-total tokens accounted per project.
    pub tokens_total: IntGaugeVec,
    /// Workers currently running.
    pub workers_active: IntGauge,
    /// Candidate items observed in the last poll that are not yet claimed.
    pub tasks_pending: IntGauge,
    /// Items driven to a successful terminal status.
    pub tasks_completed: IntCounter,
    /// Errors by kind label.
    pub errors: IntCounterVec,
    /// 1 when this replica holds the leader lease, 0 otherwise.
    pub leader_state: IntGauge,
}

impl Metrics {
    fn new() -> Self {
        let registry = Registry::new();

        let agent_iterations = IntCounter::with_opts(Opts::new(
            "foreman_agent_iterations_total",
            "Agent pipeline turns started",
        ))
        .unwrap();
        let agent_latency = Histogram::with_opts(
            HistogramOpts::new(
                "foreman_agent_latency_seconds",
                "Latency of successful agent turns",
            )
            .buckets(vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]),
        )
        .unwrap();
        let tokens_total = IntGaugeVec::new(
            Opts::new("foreman_tokens_total", "Grand-total tokens per project"),
            &["project"],
        )
        .unwrap();
        let workers_active =
            IntGauge::with_opts(Opts::new("foreman_workers_active", "Workers currently running"))
                .unwrap();
        let tasks_pending = IntGauge::with_opts(Opts::new(
            "foreman_tasks_pending",
            "Unclaimed candidate items from the last poll",
        ))
        .unwrap();
        let tasks_completed = IntCounter::with_opts(Opts::new(
            "foreman_tasks_completed_total",
            "Items completed successfully",
        ))
        .unwrap();
        let errors = IntCounterVec::new(
            Opts::new("foreman_errors_total", "Errors by kind"),
            &["kind"],
        )
        .unwrap();
        let leader_state = IntGauge::with_opts(Opts::new(
            "foreman_leader_state",
            "1 when this replica is the active leader",
        ))
        .unwrap();

        registry.register(Box::new(agent_iterations.clone())).unwrap();
        registry.register(Box::new(agent_latency.clone())).unwrap();
        registry.register(Box::new(tokens_total.clone())).unwrap();
        registry.register(Box::new(workers_active.clone())).unwrap();
        registry.register(Box::new(tasks_pending.clone())).unwrap();
        registry.register(Box::new(tasks_completed.clone())).unwrap();
        registry.register(Box::new(errors.clone())).unwrap();
        registry.register(Box::new(leader_state.clone())).unwrap();

        Self {
            registry,
            agent_iterations,
            agent_latency,
            tokens_total,
            workers_active,
            tasks_pending,
            tasks_completed,
            errors,
            leader_state,
        }
    }
}

static METRICS: Lazy<Metrics> = Lazy::new(Metrics::new);

/// The process-wide metrics handle.
pub fn metrics() -> &'static Metrics {
    &METRICS
}

/// Render the registry in Prometheus text exposition format.
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    if let Err(e) = encoder.encode(&metrics().registry.gather(), &mut buf) {
        warn!(error = %e, "metrics encode failed");
    }
    String::from_utf8(buf).unwrap_or_default()
}

/// Serve `/metrics` on `addr` until `cancel` fires.
///
/// Deliberately minimal: every request gets the full exposition dump, which
/// is all a Prometheus scraper needs.
pub async fn serve(addr: &str, cancel: CancellationToken) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    debug!(%addr, "metrics endpoint listening");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            accepted = listener.accept() => {
                let (mut stream, _) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "metrics accept failed");
                        continue;
                    }
                };
                tokio::spawn(async move {
                    // Drain the request head; the path is irrelevant.
                    let mut buf = [0u8; 1024];
                    let _ = stream.read(&mut buf).await;
                    let body = render();
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = stream.write_all(response.as_bytes()).await;
                });
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_singleton_is_stable() {
        let a = metrics() as *const Metrics;
        let b = metrics() as *const Metrics;
        assert_eq!(a, b);
    }

    #[test]
    fn counters_accumulate() {
        let before = metrics().tasks_completed.get();
        metrics().tasks_completed.inc();
        assert_eq!(metrics().tasks_completed.get(), before + 1);
    }

    #[test]
    fn render_contains_registered_families() {
        metrics().agent_iterations.inc();
        metrics().errors.with_label_values(&["transient_network"]).inc();
        let text = render();
        assert!(text.contains("foreman_agent_iterations_total"));
        assert!(text.contains("foreman_errors_total"));
        assert!(text.contains("transient_network"));
    }

    #[test]
    fn token_gauge_is_labelled_by_project() {
        metrics().tokens_total.with_label_values(&["demo"]).set(42);
        assert_eq!(metrics().tokens_total.with_label_values(&["demo"]).get(), 42);
    }

    #[tokio::test]
    async fn serve_stops_on_cancel() {
        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();
        let handle = tokio::spawn(async move { serve("127.0.0.1:0", cancel2).await });
        // Give the listener a moment to bind, then cancel.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        cancel.cancel();
        let res = tokio::time::timeout(std::time::Duration::from_secs(1), handle).await;
        assert!(res.is_ok(), "serve must return promptly after cancel");
    }
}
