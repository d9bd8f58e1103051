// Copyright (c) 2024-2026 Foreman Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Worker spawners: materialise a claimed [`WorkItem`] as an isolated
//! process and wait for its terminal state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use foreman_config::{ProviderConfig, WorkerConfig};

use crate::source::WorkItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkerState::Pending => "pending",
            WorkerState::Running => "running",
            WorkerState::Completed => "completed",
            WorkerState::Failed => "failed",
            WorkerState::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone)]
pub struct WorkerHandle {
    /// Runtime-level identifier (container name, job name).
    pub worker_id: String,
    pub work_item_id: String,
    pub started_at: DateTime<Utc>,
    pub state: WorkerState,
}

#[async_trait]
pub trait WorkerSpawner: Send + Sync {
    /// Start an isolated worker for `item`.
    async fn spawn(&self, item: &WorkItem) -> anyhow::Result<WorkerHandle>;

    /// Wait for the worker to reach a terminal state; returns it together
    /// with the collected logs.
    async fn wait(&self, handle: &WorkerHandle) -> anyhow::Result<(WorkerState, String)>;
}

/// The environment contract every worker receives, regardless of runtime.
///
/// Carries the provider/model selection, the work item, the clone URL, the
/// orchestrator identity (for commit attribution and status comments), and
/// any forwarded credential variables.
pub fn worker_env(
    worker: &WorkerConfig,
    model: &ProviderConfig,
    item: &WorkItem,
    identity: &str,
) -> Vec<(String, String)> {
    let mut env = vec![
        ("FOREMAN_PROVIDER".into(), model.kind.clone()),
        ("FOREMAN_MODEL".into(), model.model.clone()),
        ("FOREMAN_WORK_ITEM".into(), item.id.clone()),
        ("FOREMAN_WORK_TITLE".into(), item.title.clone()),
        ("FOREMAN_CLONE_URL".into(), worker.clone_url.clone()),
        ("FOREMAN_IDENTITY".into(), identity.to_string()),
    ];
    for name in &worker.forward_env {
        if let Ok(value) = std::env::var(name) {
            env.push((name.clone(), value));
        }
    }
    env
}

/// Worker id safe for container and Kubernetes object names.
pub fn worker_name(item_id: &str) -> String {
    let slug: String = item_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    let slug = slug.trim_matches('-').to_string();
    let short = uuid::Uuid::new_v4().simple().to_string();
    // RFC 1123 label limit is 63 chars; leave room for the 8-char suffix.
    let slug: String = slug.chars().take(40).collect();
    format!("foreman-{slug}-{}", &short[..8])
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn demo_item() -> WorkItem {
        WorkItem::new("BOT-7", "fix login", "tracker")
    }

    #[test]
    fn env_carries_the_worker_contract() {
        let worker = WorkerConfig {
            clone_url: "https://git.example.com/app.git".into(),
            ..WorkerConfig::default()
        };
        let model = ProviderConfig {
            kind: "openrouter".into(),
            model: "openai/gpt-4o".into(),
            ..ProviderConfig::default()
        };
        let env = worker_env(&worker, &model, &demo_item(), "foreman-a");

        let get = |k: &str| {
            env.iter()
                .find(|(name, _)| name == k)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(get("FOREMAN_PROVIDER"), Some("openrouter"));
        assert_eq!(get("FOREMAN_MODEL"), Some("openai/gpt-4o"));
        assert_eq!(get("FOREMAN_WORK_ITEM"), Some("BOT-7"));
        assert_eq!(get("FOREMAN_CLONE_URL"), Some("https://git.example.com/app.git"));
        assert_eq!(get("FOREMAN_IDENTITY"), Some("foreman-a"));
    }

    #[test]
    fn unset_forwarded_vars_are_skipped() {
        let worker = WorkerConfig {
            forward_env: vec!["FOREMAN_TEST_UNSET_VAR_XYZ".into()],
            ..WorkerConfig::default()
        };
        let env = worker_env(
            &worker,
            &ProviderConfig::default(),
            &demo_item(),
            "id",
        );
        assert!(!env.iter().any(|(k, _)| k == "FOREMAN_TEST_UNSET_VAR_XYZ"));
    }

    #[test]
    fn worker_names_are_unique_and_dns_safe() {
        let a = worker_name("BOT-7");
        let b = worker_name("BOT-7");
        assert_ne!(a, b);
        assert!(a.starts_with("foreman-bot-7-"));
        assert!(a.len() <= 63);
        assert!(a.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
    }

    #[test]
    fn worker_name_handles_odd_item_ids() {
        let n = worker_name("task file (v2).md");
        assert!(n.len() <= 63);
        assert!(!n.contains(' '));
        assert!(!n.contains('('));
    }
}
