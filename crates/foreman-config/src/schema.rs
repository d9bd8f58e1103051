// Copyright (c) 2024-2026 Foreman Contributors
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ProviderConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub leader: LeaderConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Model provider configuration.
///
/// Immutable after construction — adapters copy what they need and never
/// write back.  Run `foreman list-providers` for the recognised driver ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Driver identifier.  Common values: "openrouter" | "google" | "ollama" |
    /// "claude-cli" | "gemini-cli" | "mock"
    pub kind: String,
    /// Model name forwarded to the provider API
    pub model: String,
    /// Environment variable that holds the API key (read at runtime)
    pub api_key_env: Option<String>,
    /// Explicit API key; prefer api_key_env in config files to avoid secrets
    /// in version-controlled files
    pub api_key: Option<String>,
    /// Base URL override.  Useful for local proxies or self-hosted gateways.
    /// For hosted providers the correct default is auto-selected.
    pub base_url: Option<String>,
    /// Context window in tokens.  When unset the driver registry default is
    /// used (clamped to 4096 in CI environments to preserve credits).
    pub context_window: Option<u32>,
    /// Per-request timeout in seconds (0 = no limit)
    #[serde(default = "default_request_timeout_secs")]
    pub timeout_secs: u64,
    /// Additional HTTP headers sent on every request as `name: value` pairs
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    /// Working directory for CLI-subprocess drivers.  Defaults to the
    /// process working directory.
    pub workdir: Option<String>,
}

fn default_request_timeout_secs() -> u64 {
    300
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: "openrouter".into(),
            model: "openai/gpt-4o".into(),
            // api_key_env is intentionally None here: key resolution falls
            // through to the driver registry, which knows the canonical
            // env-var name for each driver (OPENROUTER_API_KEY, GEMINI_API_KEY,
            // ...).  Hard-coding one here would shadow the registry lookup
            // whenever the driver is overridden at runtime.
            api_key_env: None,
            api_key: None,
            base_url: None,
            context_window: None,
            timeout_secs: default_request_timeout_secs(),
            headers: Vec::new(),
            workdir: None,
        }
    }
}

/// Control-plane loop parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Seconds between poll iterations
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Maximum number of concurrently running workers
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Identity string used in claim comments and commit attribution.
    /// Defaults to `foreman-<hostname>` when empty.
    #[serde(default)]
    pub identity: String,
    /// Status written when an item is claimed
    #[serde(default = "default_claimed_status")]
    pub claimed_status: String,
    /// Status written on successful worker completion
    #[serde(default = "default_done_status")]
    pub done_status: String,
    /// Status written when a worker fails
    #[serde(default = "default_failed_status")]
    pub failed_status: String,
    /// Statuses treated as already claimed or terminal; items carrying one
    /// of these are never re-claimed
    #[serde(default = "default_terminal_statuses")]
    pub skip_statuses: Vec<String>,
    /// Claim attempts per item before it is left alone (spawn failures that
    /// never reached a terminal status)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_poll_interval_secs() -> u64 {
    60
}
fn default_max_workers() -> usize {
    2
}
fn default_claimed_status() -> String {
    "In Progress".into()
}
fn default_done_status() -> String {
    "Done".into()
}
fn default_failed_status() -> String {
    "Failed".into()
}
fn default_terminal_statuses() -> Vec<String> {
    ["In Progress", "Done", "Resolved", "Signed Off", "Failed"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            max_workers: default_max_workers(),
            identity: String::new(),
            claimed_status: default_claimed_status(),
            done_status: default_done_status(),
            failed_status: default_failed_status(),
            skip_statuses: default_terminal_statuses(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// Work sources.  Every configured block becomes one poller; at least one
/// must be present for `foreman orchestrate` to do anything useful.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourcesConfig {
    /// REST issue tracker (Jira-compatible API surface)
    pub tracker: Option<TrackerConfig>,
    /// Filesystem task queue
    pub files: Option<FileQueueConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Tracker base URL, e.g. `https://issues.example.com`
    pub base_url: String,
    /// Environment variable holding the API token
    #[serde(default = "default_tracker_token_env")]
    pub token_env: String,
    /// Search query selecting candidate issues (JQL or the tracker's
    /// equivalent), combined with the ready-status constraint on poll
    pub query: String,
    /// Status an issue must carry to be eligible for claiming
    #[serde(default = "default_ready_status")]
    pub ready_status: String,
    /// Only issues carrying all of these labels are returned
    #[serde(default)]
    pub labels: Vec<String>,
}

fn default_tracker_token_env() -> String {
    "FOREMAN_TRACKER_TOKEN".into()
}
fn default_ready_status() -> String {
    "Ready".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileQueueConfig {
    /// Queue root; task files live in per-status subdirectories
    /// (`ready/`, `in-progress/`, `done/`, `failed/`)
    pub dir: String,
}

/// Worker materialisation settings, shared by the Docker and Kubernetes
/// spawners.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// How workers are materialised: "docker" | "kubernetes"
    #[serde(default = "default_worker_runtime")]
    pub runtime: String,
    /// Worker container image
    #[serde(default = "default_worker_image")]
    pub image: String,
    /// Kubernetes namespace for worker jobs
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Repository clone URL handed to the worker
    #[serde(default)]
    pub clone_url: String,
    /// Environment variable names forwarded from the orchestrator's
    /// environment into the worker (credentials, tokens)
    #[serde(default)]
    pub forward_env: Vec<String>,
    /// Seconds to wait for a worker before treating it as failed (0 = no limit)
    #[serde(default)]
    pub timeout_secs: u64,
}

fn default_worker_runtime() -> String {
    "docker".into()
}
fn default_worker_image() -> String {
    "foreman-worker:latest".into()
}
fn default_namespace() -> String {
    "default".into()
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            runtime: default_worker_runtime(),
            image: default_worker_image(),
            namespace: default_namespace(),
            clone_url: String::new(),
            forward_env: Vec::new(),
            timeout_secs: 0,
        }
    }
}

/// Leader-election settings for high-availability deployments.
///
/// `renew_secs` must be smaller than `lease_secs`, and `retry_secs` smaller
/// than `lease_secs - renew_secs`; `validate()` enforces both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderConfig {
    /// Coordination backend: "static" (single replica, always leader) |
    /// "file" (shared lease file) | "kubernetes" (coordination.k8s.io Lease)
    #[serde(default = "default_leader_mode")]
    pub mode: String,
    /// Lease file path (mode = "file"); typically on shared storage
    #[serde(default)]
    pub lease_path: String,
    /// Lease object name (mode = "kubernetes")
    #[serde(default = "default_lease_name")]
    pub lease_name: String,
    /// Lease duration L in seconds
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,
    /// Renewal interval R in seconds (must satisfy R < L)
    #[serde(default = "default_renew_secs")]
    pub renew_secs: u64,
    /// Acquisition retry interval A in seconds (must satisfy A < L - R)
    #[serde(default = "default_retry_secs")]
    pub retry_secs: u64,
}

fn default_leader_mode() -> String {
    "static".into()
}
fn default_lease_name() -> String {
    "foreman-leader".into()
}
fn default_lease_secs() -> u64 {
    15
}
fn default_renew_secs() -> u64 {
    5
}
fn default_retry_secs() -> u64 {
    2
}

impl Default for LeaderConfig {
    fn default() -> Self {
        Self {
            mode: default_leader_mode(),
            lease_path: String::new(),
            lease_name: default_lease_name(),
            lease_secs: default_lease_secs(),
            renew_secs: default_renew_secs(),
            retry_secs: default_retry_secs(),
        }
    }
}

impl LeaderConfig {
    /// Check the R < L and A < L - R timing constraints.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.renew_secs >= self.lease_secs {
            anyhow::bail!(
                "leader.renew_secs ({}) must be smaller than leader.lease_secs ({})",
                self.renew_secs,
                self.lease_secs
            );
        }
        if self.retry_secs >= self.lease_secs - self.renew_secs {
            anyhow::bail!(
                "leader.retry_secs ({}) must be smaller than lease_secs - renew_secs ({})",
                self.retry_secs,
                self.lease_secs - self.renew_secs
            );
        }
        Ok(())
    }
}

/// Durable session state location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// Directory holding one session file per project
    #[serde(default = "default_state_dir")]
    pub dir: String,
    /// Project label; selects the session file inside `dir`
    #[serde(default = "default_project")]
    pub project: String,
}

fn default_state_dir() -> String {
    ".foreman/state".into()
}
fn default_project() -> String {
    "default".into()
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            dir: default_state_dir(),
            project: default_project(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Scrape listen address; empty disables the endpoint
    #[serde(default = "default_metrics_listen")]
    pub listen: String,
}

fn default_metrics_listen() -> String {
    "127.0.0.1:9464".into()
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            listen: default_metrics_listen(),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_deserialises_from_empty_mapping() {
        let cfg: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(cfg.model.kind, "openrouter");
        assert_eq!(cfg.orchestrator.max_workers, 2);
    }

    #[test]
    fn skip_statuses_default_covers_terminal_set() {
        let cfg = OrchestratorConfig::default();
        for s in ["In Progress", "Done", "Resolved", "Signed Off", "Failed"] {
            assert!(cfg.skip_statuses.iter().any(|x| x == s), "missing {s}");
        }
    }

    #[test]
    fn leader_defaults_satisfy_timing_constraints() {
        LeaderConfig::default().validate().unwrap();
    }

    #[test]
    fn leader_validate_rejects_renew_not_below_lease() {
        let cfg = LeaderConfig {
            lease_secs: 10,
            renew_secs: 10,
            ..LeaderConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn leader_validate_rejects_retry_too_large() {
        let cfg = LeaderConfig {
            lease_secs: 10,
            renew_secs: 8,
            retry_secs: 5,
            ..LeaderConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn tracker_config_parses_from_yaml() {
        let yaml = r#"
sources:
  tracker:
    base_url: https://issues.example.com
    query: "project = COREBOT AND labels = agent"
    ready_status: "To Do"
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        let tracker = cfg.sources.tracker.unwrap();
        assert_eq!(tracker.base_url, "https://issues.example.com");
        assert_eq!(tracker.ready_status, "To Do");
        assert_eq!(tracker.token_env, "FOREMAN_TRACKER_TOKEN");
    }

    #[test]
    fn provider_config_round_trips() {
        let cfg = ProviderConfig {
            kind: "google".into(),
            model: "gemini-2.0-flash".into(),
            ..ProviderConfig::default()
        };
        let yaml = serde_yaml::to_string(&cfg).unwrap();
        let back: ProviderConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.kind, "google");
        assert_eq!(back.model, "gemini-2.0-flash");
    }
}
