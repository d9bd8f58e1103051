// Copyright (c) 2024-2026 Foreman Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Filesystem work source: a queue directory with one subdirectory per
//! status.
//!
//! ```text
//! queue/
//!   ready/fix-login.md        ← poll() scans here
//!   in-progress/…             ← update_status() moves files between dirs
//!   done/…
//!   failed/…
//! ```
//!
//! Task files are Markdown: an optional `labels:` line, a `#` heading as the
//! title, and the remainder as the body.  The file name is the item id, so a
//! rename is an atomic claim — a second orchestrator moving the same file
//! loses with a filesystem error.

use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;
use tracing::debug;
use walkdir::WalkDir;

use crate::source::{WorkItem, WorkSource};

/// Subdirectory scanned for claimable items.
pub const READY_DIR: &str = "ready";

pub struct FileQueueSource {
    name: String,
    root: PathBuf,
}

impl FileQueueSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            name: "files".into(),
            root: root.into(),
        }
    }

    fn locate(&self, file_name: &str) -> Option<PathBuf> {
        WalkDir::new(&self.root)
            .max_depth(2)
            .into_iter()
            .filter_map(|e| e.ok())
            .find(|e| e.file_type().is_file() && e.file_name().to_string_lossy() == file_name)
            .map(|e| e.into_path())
    }
}

/// Directory name for a status: lowercase, spaces become dashes
/// (`"In Progress"` → `"in-progress"`).
pub fn status_slug(status: &str) -> String {
    status
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}

/// Status presented for items found in a directory slug (`"in-progress"` →
/// `"In Progress"`).
fn slug_status(slug: &str) -> String {
    slug.split('-')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Split a task file into `(title, labels, body)`.
pub(crate) fn parse_task_file(text: &str, fallback_title: &str) -> (String, BTreeSet<String>, String) {
    let mut title = fallback_title.to_string();
    let mut labels = BTreeSet::new();
    let mut body_lines: Vec<&str> = Vec::new();
    let mut seen_title = false;

    for line in text.lines() {
        let trimmed = line.trim();
        if !seen_title && trimmed.is_empty() && body_lines.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("labels:") {
            labels.extend(
                rest.split(',')
                    .map(|l| l.trim().to_string())
                    .filter(|l| !l.is_empty()),
            );
            continue;
        }
        if !seen_title {
            if let Some(heading) = trimmed.strip_prefix("# ") {
                title = heading.trim().to_string();
                seen_title = true;
                continue;
            }
        }
        body_lines.push(line);
    }

    (title, labels, body_lines.join("\n").trim().to_string())
}

#[async_trait]
impl WorkSource for FileQueueSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn poll(&self) -> anyhow::Result<Vec<WorkItem>> {
        let ready = self.root.join(READY_DIR);
        if !ready.is_dir() {
            return Ok(Vec::new());
        }

        let mut paths: Vec<PathBuf> = std::fs::read_dir(&ready)
            .with_context(|| format!("reading queue dir {}", ready.display()))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().map(|e| e == "md").unwrap_or(false))
            .collect();
        // Deterministic per-source order.
        paths.sort();

        let mut items = Vec::new();
        for path in paths {
            let file_name = match path.file_name().and_then(|n| n.to_str()) {
                Some(n) => n.to_string(),
                None => continue,
            };
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading task file {}", path.display()))?;
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or(&file_name);
            let (title, labels, body) = parse_task_file(&text, stem);
            items.push(WorkItem {
                id: file_name,
                title,
                body,
                labels,
                source: self.name.clone(),
                status: slug_status(READY_DIR),
                attempts: 0,
                discovered_at: chrono::Utc::now(),
            });
        }
        debug!(count = items.len(), "file queue polled");
        Ok(items)
    }

    async fn update_status(
        &self,
        item: &WorkItem,
        new_status: &str,
        _comment: Option<&str>,
    ) -> anyhow::Result<()> {
        let current = self
            .locate(&item.id)
            .with_context(|| format!("task file {} not found in queue", item.id))?;
        let target_dir = self.root.join(status_slug(new_status));
        std::fs::create_dir_all(&target_dir)
            .with_context(|| format!("creating {}", target_dir.display()))?;
        let target = target_dir.join(&item.id);
        std::fs::rename(&current, &target).with_context(|| {
            format!("moving {} to {}", current.display(), target.display())
        })?;
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn seed_queue(dir: &tempfile::TempDir, name: &str, text: &str) {
        let ready = dir.path().join(READY_DIR);
        std::fs::create_dir_all(&ready).unwrap();
        std::fs::write(ready.join(name), text).unwrap();
    }

    #[test]
    fn status_slug_lowercases_and_dashes() {
        assert_eq!(status_slug("In Progress"), "in-progress");
        assert_eq!(status_slug("Done"), "done");
        assert_eq!(status_slug("Signed Off"), "signed-off");
    }

    #[test]
    fn parse_extracts_title_labels_and_body() {
        let text = "labels: agent, backend\n# Fix the login flow\n\nUsers cannot sign in.\nSee BOT-77.";
        let (title, labels, body) = parse_task_file(text, "fallback");
        assert_eq!(title, "Fix the login flow");
        assert_eq!(labels.len(), 2);
        assert!(labels.contains("agent"));
        assert_eq!(body, "Users cannot sign in.\nSee BOT-77.");
    }

    #[test]
    fn parse_without_heading_uses_fallback_title() {
        let (title, labels, body) = parse_task_file("just a body", "task-3");
        assert_eq!(title, "task-3");
        assert!(labels.is_empty());
        assert_eq!(body, "just a body");
    }

    #[tokio::test]
    async fn poll_returns_ready_items_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        seed_queue(&dir, "b-second.md", "# Second task");
        seed_queue(&dir, "a-first.md", "# First task");
        // Non-markdown files are ignored.
        std::fs::write(dir.path().join(READY_DIR).join("notes.txt"), "skip").unwrap();

        let source = FileQueueSource::new(dir.path());
        let items = source.poll().await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, "a-first.md");
        assert_eq!(items[0].title, "First task");
        assert_eq!(items[0].status, "Ready");
        assert_eq!(items[1].id, "b-second.md");
    }

    #[tokio::test]
    async fn poll_on_missing_queue_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileQueueSource::new(dir.path().join("nope"));
        assert!(source.poll().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_status_moves_file_between_state_dirs() {
        let dir = tempfile::tempdir().unwrap();
        seed_queue(&dir, "task.md", "# A task");
        let source = FileQueueSource::new(dir.path());
        let items = source.poll().await.unwrap();

        source
            .update_status(&items[0], "In Progress", Some("claimed by test"))
            .await
            .unwrap();
        assert!(dir.path().join("in-progress/task.md").is_file());
        assert!(!dir.path().join("ready/task.md").exists());

        // Second transition finds the file in its new home.
        source.update_status(&items[0], "Done", None).await.unwrap();
        assert!(dir.path().join("done/task.md").is_file());
    }

    #[tokio::test]
    async fn claimed_items_disappear_from_the_next_poll() {
        let dir = tempfile::tempdir().unwrap();
        seed_queue(&dir, "task.md", "# A task");
        let source = FileQueueSource::new(dir.path());
        let items = source.poll().await.unwrap();
        source
            .update_status(&items[0], "In Progress", None)
            .await
            .unwrap();
        assert!(source.poll().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_status_for_unknown_item_fails() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(READY_DIR)).unwrap();
        let source = FileQueueSource::new(dir.path());
        let ghost = WorkItem::new("ghost.md", "ghost", "files");
        assert!(source.update_status(&ghost, "Done", None).await.is_err());
    }
}
