// Copyright (c) 2024-2026 Foreman Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Durable per-project session state.
//!
//! One JSON file per project.  Writers hold the store's write lock and land
//! through an atomic temp-file + rename so readers only ever observe the
//! last complete write.  The rename itself is synchronous: cancellation can
//! interrupt a turn, never a half-written state file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{RwLock, RwLockWriteGuard};

/// History entries retained per session.
pub const HISTORY_RETAIN: usize = 64;

/// Characters of unparseable content carried inside a corrupt-state error.
const CORRUPT_SNIPPET_CHARS: usize = 40;

/// Metadata key counting successful model turns.
pub const ITERATION_KEY: &str = "iteration";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One conversation turn in the durable history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub truncation_count: u64,
}

impl TokenUsage {
    /// Restore the `total = prompt + completion` invariant after either side
    /// moved.
    pub fn recompute_total(&mut self) {
        self.total_tokens = self.prompt_tokens + self.completion_tokens;
    }
}

/// Durable per-project conversational and accounting state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub model: String,
    pub max_tokens: u64,
    pub current_tokens: u64,
    pub token_usage: TokenUsage,
    pub history: Vec<Turn>,
    pub memory: Vec<String>,
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub updated_at: DateTime<Utc>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            model: String::new(),
            max_tokens: 0,
            current_tokens: 0,
            token_usage: TokenUsage::default(),
            history: Vec::new(),
            memory: Vec::new(),
            metadata: BTreeMap::new(),
            updated_at: Utc::now(),
        }
    }
}

impl SessionState {
    /// Successful-turn counter, 0 when never set.
    pub fn iteration(&self) -> u64 {
        self.metadata
            .get(ITERATION_KEY)
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
    }

    /// Advance the successful-turn counter by one.
    pub fn bump_iteration(&mut self) {
        let next = self.iteration() + 1;
        self.metadata
            .insert(ITERATION_KEY.into(), serde_json::json!(next));
    }

    pub fn push_turn(&mut self, role: Role, content: impl Into<String>) {
        self.history.push(Turn::new(role, content));
    }
}

#[derive(Debug, Error)]
pub enum StateError {
    /// The serialized session failed to parse.  The message leads with a
    /// bounded excerpt of whatever was found in the file.
    #[error("failed to unmarshal state (content starts with: {snippet:?})")]
    Corrupt { snippet: String },

    #[error("state io: {0}")]
    Io(#[from] std::io::Error),

    #[error("state encode: {0}")]
    Encode(#[from] serde_json::Error),
}

/// File-backed session store with reader–writer locking.
pub struct StateStore {
    path: PathBuf,
    lock: RwLock<()>,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: RwLock::new(()),
        }
    }

    /// Store for `project` under `dir` (one file per project).
    pub fn for_project(dir: impl AsRef<Path>, project: &str) -> Self {
        Self::new(dir.as_ref().join(format!("{project}.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Hold the write lock for a multi-step turn (load → mutate → save).
    pub(crate) async fn write_guard(&self) -> RwLockWriteGuard<'_, ()> {
        self.lock.write().await
    }

    /// Load the stored session, or a fresh one when the file is absent.
    pub async fn load(&self) -> Result<SessionState, StateError> {
        let _guard = self.lock.read().await;
        self.load_unlocked()
    }

    /// Serialize and write atomically; trims history and stamps `updated_at`.
    pub async fn save(&self, state: &mut SessionState) -> Result<(), StateError> {
        let _guard = self.lock.write().await;
        self.save_unlocked(state)
    }

    /// Append a memory entry as one load-modify-save under the write lock.
    pub async fn add_memory(&self, text: impl Into<String>) -> Result<(), StateError> {
        let _guard = self.lock.write().await;
        let mut state = self.load_unlocked()?;
        state.memory.push(text.into());
        self.save_unlocked(&mut state)
    }

    /// Set `max_tokens` and `model` only when currently unset; once set,
    /// later calls are no-ops.
    pub async fn initialize(&self, max_tokens: u64, model: &str) -> Result<(), StateError> {
        let _guard = self.lock.write().await;
        let mut state = self.load_unlocked()?;
        let mut changed = false;
        if state.max_tokens == 0 && max_tokens > 0 {
            state.max_tokens = max_tokens;
            changed = true;
        }
        if state.model.is_empty() && !model.is_empty() {
            state.model = model.to_string();
            changed = true;
        }
        if changed {
            self.save_unlocked(&mut state)?;
        }
        Ok(())
    }

    pub(crate) fn load_unlocked(&self) -> Result<SessionState, StateError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(SessionState::default());
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&text).map_err(|_| StateError::Corrupt {
            snippet: text.chars().take(CORRUPT_SNIPPET_CHARS).collect(),
        })
    }

    pub(crate) fn save_unlocked(&self, state: &mut SessionState) -> Result<(), StateError> {
        if state.history.len() > HISTORY_RETAIN {
            let excess = state.history.len() - HISTORY_RETAIN;
            state.history.drain(..excess);
        }
        state.updated_at = Utc::now();

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        // Scratch file in the same directory so the rename stays on one
        // filesystem.  std::fs keeps the write+rename free of await points.
        let mut scratch = self.path.as_os_str().to_owned();
        scratch.push(".tmp");
        let scratch = PathBuf::from(scratch);
        std::fs::write(&scratch, serde_json::to_vec_pretty(state)?)?;
        std::fs::rename(&scratch, &self.path)?;
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
