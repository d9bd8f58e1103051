// Copyright (c) 2024-2026 Foreman Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Work sources: pluggable producers of [`WorkItem`]s with a status-update
//! side-effect.
//!
//! A `poll` is a pure observation — claiming is the orchestrator's job.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One unit of schedulable work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Stable external identifier (issue key, queue file name).
    pub id: String,
    pub title: String,
    pub body: String,
    pub labels: BTreeSet<String>,
    /// Name of the producing work source.
    pub source: String,
    /// External status string as last observed.
    pub status: String,
    /// Local claim attempts by this orchestrator.
    pub attempts: u32,
    pub discovered_at: DateTime<Utc>,
}

impl WorkItem {
    pub fn new(id: impl Into<String>, title: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            body: String::new(),
            labels: BTreeSet::new(),
            source: source.into(),
            status: String::new(),
            attempts: 0,
            discovered_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait WorkSource: Send + Sync {
    /// Source tag stamped into every produced item.
    fn name(&self) -> &str;

    /// Current candidate set.  The source applies its own query/label/status
    /// filtering; the orchestrator applies claiming semantics on top.
    async fn poll(&self) -> anyhow::Result<Vec<WorkItem>>;

    /// Reflect a claim, progress, or terminal outcome in the external system.
    async fn update_status(
        &self,
        item: &WorkItem,
        new_status: &str,
        comment: Option<&str>,
    ) -> anyhow::Result<()>;
}

/// De-duplicate by `(source, id)`, preserving first-seen order.
pub fn dedupe(items: Vec<WorkItem>) -> Vec<WorkItem> {
    let mut seen = std::collections::HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert((item.source.clone(), item.id.clone())))
        .collect()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedupe_drops_repeats_keeps_order() {
        let items = vec![
            WorkItem::new("A-1", "first", "tracker"),
            WorkItem::new("A-2", "second", "tracker"),
            WorkItem::new("A-1", "first again", "tracker"),
        ];
        let out = dedupe(items);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].id, "A-1");
        assert_eq!(out[0].title, "first");
        assert_eq!(out[1].id, "A-2");
    }

    #[test]
    fn dedupe_distinguishes_sources() {
        let items = vec![
            WorkItem::new("task-1", "t", "tracker"),
            WorkItem::new("task-1", "t", "files"),
        ];
        assert_eq!(dedupe(items).len(), 2);
    }

    #[test]
    fn work_item_serialises() {
        let mut item = WorkItem::new("A-7", "fix login", "tracker");
        item.labels.insert("agent".into());
        let json = serde_json::to_string(&item).unwrap();
        let back: WorkItem = serde_json::from_str(&json).unwrap();
        assert_eq!(back, item);
    }
}
