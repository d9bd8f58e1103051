// Copyright (c) 2024-2026 Foreman Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Issue-tracker work source over a Jira-compatible REST surface.
//!
//! Endpoints used: search-by-query (`/rest/api/2/search`), get-one, create,
//! transitions (list + apply), and comment.  Status names are site-specific
//! configuration; only the semantic categories (ready, in-progress, done,
//! failed) are fixed.

use std::collections::BTreeSet;

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use foreman_config::TrackerConfig;

use crate::source::{WorkItem, WorkSource};

/// One issue as returned by the tracker API.
#[derive(Debug, Clone, PartialEq)]
pub struct Issue {
    pub key: String,
    pub summary: String,
    pub description: String,
    pub labels: BTreeSet<String>,
    pub status: String,
}

/// Thin REST client; pure parsing lives in free functions below.
pub struct TrackerClient {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

impl TrackerClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn check(resp: reqwest::Response, what: &str) -> anyhow::Result<Value> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("tracker {what} failed ({status}): {}", body.chars().take(200).collect::<String>());
        }
        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }
        resp.json().await.with_context(|| format!("decoding tracker {what} response"))
    }

    /// Search issues by query string.
    pub async fn search(&self, jql: &str) -> anyhow::Result<Vec<Issue>> {
        let resp = self
            .client
            .get(self.url("/rest/api/2/search"))
            .bearer_auth(&self.token)
            .query(&[
                ("jql", jql),
                ("fields", "summary,description,labels,status"),
            ])
            .send()
            .await
            .context("tracker search request")?;
        let v = Self::check(resp, "search").await?;
        Ok(parse_search_response(&v))
    }

    /// Fetch a single issue by key.
    pub async fn get(&self, key: &str) -> anyhow::Result<Issue> {
        let resp = self
            .client
            .get(self.url(&format!("/rest/api/2/issue/{key}")))
            .bearer_auth(&self.token)
            .send()
            .await
            .context("tracker get request")?;
        let v = Self::check(resp, "get").await?;
        parse_issue(&v).context("issue payload missing key")
    }

    /// Create an issue; returns the new key.
    pub async fn create(
        &self,
        project: &str,
        summary: &str,
        description: &str,
        labels: &[String],
    ) -> anyhow::Result<String> {
        let body = json!({
            "fields": {
                "project": { "key": project },
                "summary": summary,
                "description": description,
                "labels": labels,
                "issuetype": { "name": "Task" },
            }
        });
        let resp = self
            .client
            .post(self.url("/rest/api/2/issue"))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .context("tracker create request")?;
        let v = Self::check(resp, "create").await?;
        v["key"]
            .as_str()
            .map(String::from)
            .context("create response missing key")
    }

    /// Transition an issue to the named status.
    ///
    /// The workflow transition id is resolved by listing the available
    /// transitions and matching the target status name case-insensitively.
    pub async fn transition(&self, key: &str, target_status: &str) -> anyhow::Result<()> {
        let resp = self
            .client
            .get(self.url(&format!("/rest/api/2/issue/{key}/transitions")))
            .bearer_auth(&self.token)
            .send()
            .await
            .context("tracker transitions request")?;
        let v = Self::check(resp, "transitions").await?;
        let id = find_transition_id(&v, target_status)
            .with_context(|| format!("no workflow transition to {target_status:?} for {key}"))?;

        let resp = self
            .client
            .post(self.url(&format!("/rest/api/2/issue/{key}/transitions")))
            .bearer_auth(&self.token)
            .json(&json!({ "transition": { "id": id } }))
            .send()
            .await
            .context("tracker transition request")?;
        Self::check(resp, "transition").await?;
        Ok(())
    }

    /// Add a comment to an issue.
    pub async fn comment(&self, key: &str, body: &str) -> anyhow::Result<()> {
        let resp = self
            .client
            .post(self.url(&format!("/rest/api/2/issue/{key}/comment")))
            .bearer_auth(&self.token)
            .json(&json!({ "body": body }))
            .send()
            .await
            .context("tracker comment request")?;
        Self::check(resp, "comment").await?;
        Ok(())
    }
}

/// Decode a search payload into issues; malformed entries are skipped.
pub(crate) fn parse_search_response(v: &Value) -> Vec<Issue> {
    v["issues"]
        .as_array()
        .map(|arr| arr.iter().filter_map(parse_issue).collect())
        .unwrap_or_default()
}

pub(crate) fn parse_issue(v: &Value) -> Option<Issue> {
    let key = v["key"].as_str()?.to_string();
    let fields = &v["fields"];
    Some(Issue {
        key,
        summary: fields["summary"].as_str().unwrap_or_default().to_string(),
        description: fields["description"].as_str().unwrap_or_default().to_string(),
        labels: fields["labels"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|l| l.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default(),
        status: fields["status"]["name"].as_str().unwrap_or_default().to_string(),
    })
}

/// Match a target status name (case-insensitive) against the `to.name` of
/// each available transition.
pub(crate) fn find_transition_id(v: &Value, target_status: &str) -> Option<String> {
    v["transitions"].as_array()?.iter().find_map(|t| {
        let to_name = t["to"]["name"].as_str()?;
        if to_name.eq_ignore_ascii_case(target_status) {
            t["id"].as_str().map(String::from)
        } else {
            None
        }
    })
}

/// Work source wrapping a [`TrackerClient`] with the configured query.
pub struct TrackerSource {
    name: String,
    client: TrackerClient,
    cfg: TrackerConfig,
}

impl TrackerSource {
    /// Build from config; the API token is read from the configured
    /// environment variable.
    pub fn from_config(cfg: TrackerConfig) -> anyhow::Result<Self> {
        let token = std::env::var(&cfg.token_env)
            .with_context(|| format!("tracker token env var {} not set", cfg.token_env))?;
        Ok(Self {
            name: "tracker".into(),
            client: TrackerClient::new(cfg.base_url.clone(), token),
            cfg,
        })
    }

    pub fn with_client(cfg: TrackerConfig, client: TrackerClient) -> Self {
        Self {
            name: "tracker".into(),
            client,
            cfg,
        }
    }
}

#[async_trait]
impl WorkSource for TrackerSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn poll(&self) -> anyhow::Result<Vec<WorkItem>> {
        let jql = format!(
            "{} AND status = \"{}\"",
            self.cfg.query, self.cfg.ready_status
        );
        debug!(%jql, "polling tracker");
        let issues = self.client.search(&jql).await?;
        let items = issues
            .into_iter()
            .filter(|issue| {
                self.cfg
                    .labels
                    .iter()
                    .all(|required| issue.labels.contains(required))
            })
            .map(|issue| WorkItem {
                id: issue.key,
                title: issue.summary,
                body: issue.description,
                labels: issue.labels,
                source: self.name.clone(),
                status: issue.status,
                attempts: 0,
                discovered_at: chrono::Utc::now(),
            })
            .collect();
        Ok(items)
    }

    async fn update_status(
        &self,
        item: &WorkItem,
        new_status: &str,
        comment: Option<&str>,
    ) -> anyhow::Result<()> {
        self.client.transition(&item.id, new_status).await?;
        if let Some(text) = comment {
            // A lost comment is cosmetic; a lost transition is a lost claim.
            if let Err(e) = self.client.comment(&item.id, text).await {
                warn!(item = %item.id, error = %e, "tracker comment failed");
            }
        }
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
