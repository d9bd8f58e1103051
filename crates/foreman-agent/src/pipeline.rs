// Copyright (c) 2024-2026 Foreman Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! The agent pipeline: retry, truncation, token accounting, durable state.
//!
//! Sits in front of every model driver.  One `send` is one conversation
//! turn: the session is owned exclusively for the whole
//! load → attempt(s) → save cycle via the store's write lock.

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use foreman_model::{ChunkSink, ModelProvider, ProviderError};

use crate::state::{Role, SessionState, StateError, StateStore};
use crate::tokens;

/// Last-resort context window when neither session nor driver declares one.
const MIN_CONTEXT_WINDOW: u64 = 4096;

/// Fraction of the window available to a single prompt (the rest is headroom
/// for the response and conversation overhead).
const PROMPT_WINDOW_FRACTION: f64 = 0.5;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("retries exhausted after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: ProviderError,
    },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("cancelled")]
    Cancelled,
}

/// Bounded retry with injectable backoff.
///
/// `max_retries = 3` means up to four attempts total.  The default backoff
/// before retry `i` is `2^(i-1)` seconds; tests inject a zero delay.
#[derive(Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    backoff: Arc<dyn Fn(u32) -> Duration + Send + Sync>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Arc::new(default_backoff),
        }
    }
}

impl RetryPolicy {
    pub fn with_backoff(
        max_retries: u32,
        backoff: impl Fn(u32) -> Duration + Send + Sync + 'static,
    ) -> Self {
        Self {
            max_retries,
            backoff: Arc::new(backoff),
        }
    }

    /// Retries without waiting — test policy.
    pub fn no_backoff() -> Self {
        Self::with_backoff(3, |_| Duration::ZERO)
    }

    /// Delay before attempt `attempt` (1-based for retries).
    pub fn delay(&self, attempt: u32) -> Duration {
        (self.backoff)(attempt)
    }
}

fn default_backoff(attempt: u32) -> Duration {
    Duration::from_secs(1u64 << attempt.saturating_sub(1))
}

/// Provider-agnostic request pipeline bound to one project session.
pub struct AgentPipeline {
    provider: Arc<dyn ModelProvider>,
    store: Arc<StateStore>,
    project: String,
    retry: RetryPolicy,
}

impl AgentPipeline {
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        store: Arc<StateStore>,
        project: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            store,
            project: project.into(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// One conversation turn: prepare the prompt, call the driver with
    /// retries, account tokens, persist.
    pub async fn send(
        &self,
        cancel: &CancellationToken,
        prompt: &str,
    ) -> Result<String, PipelineError> {
        self.run_turn(cancel, prompt, None).await
    }

    /// Like [`send`](Self::send), forwarding every response fragment to
    /// `on_chunk`.
    ///
    /// A retry after partial output restarts the driver; chunks already
    /// delivered from the abandoned attempt are *not* suppressed — consumers
    /// needing single-delivery semantics must layer that on top.
    pub async fn send_stream(
        &self,
        cancel: &CancellationToken,
        prompt: &str,
        on_chunk: ChunkSink<'_>,
    ) -> Result<String, PipelineError> {
        self.run_turn(cancel, prompt, Some(on_chunk)).await
    }

    async fn run_turn(
        &self,
        cancel: &CancellationToken,
        prompt: &str,
        mut on_chunk: Option<ChunkSink<'_>>,
    ) -> Result<String, PipelineError> {
        let metrics = foreman_telemetry::metrics();
        metrics.agent_iterations.inc();
        let started = Instant::now();

        // Exclusive session ownership for the whole turn.
        let _session = self.store.write_guard().await;
        let mut state = self.store.load_unlocked()?;
        if state.max_tokens == 0 {
            state.max_tokens = (self.provider.context_window() as u64).max(MIN_CONTEXT_WINDOW);
        }
        if state.model.is_empty() {
            state.model = self.provider.model_name().to_string();
        }

        // Pre-flight truncation against half the window.
        let available = (state.max_tokens as f64 * PROMPT_WINDOW_FRACTION) as usize;
        let mut prompt_text = prompt.to_string();
        if tokens::estimate(&prompt_text) > available {
            prompt_text = tokens::truncate(&prompt_text, available);
            state.token_usage.truncation_count += 1;
            warn!(
                project = %self.project,
                budget = available,
                "prompt exceeded half the context window, truncated"
            );
        }

        let prompt_tokens = tokens::estimate(&prompt_text) as u64;
        state.push_turn(Role::User, prompt_text.clone());
        state.current_tokens += prompt_tokens;
        state.token_usage.prompt_tokens += prompt_tokens;
        state.token_usage.recompute_total();

        let attempts = self.retry.max_retries + 1;
        let mut last_err: Option<ProviderError> = None;
        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        self.save_warn_only(&mut state);
                        return Err(PipelineError::Cancelled);
                    }
                    _ = tokio::time::sleep(self.retry.delay(attempt)) => {}
                }
            }

            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    self.save_warn_only(&mut state);
                    return Err(PipelineError::Cancelled);
                }
                r = async {
                    match on_chunk.as_mut() {
                        Some(sink) => self.provider.send_stream(&prompt_text, &mut **sink).await,
                        None => self.provider.send(&prompt_text).await,
                    }
                } => r,
            };

            match result {
                Ok(response) => {
                    let completion_tokens = tokens::estimate(&response) as u64;
                    state.current_tokens += completion_tokens;
                    state.token_usage.completion_tokens += completion_tokens;
                    state.token_usage.recompute_total();
                    state.push_turn(Role::Assistant, response.clone());
                    state.bump_iteration();
                    self.save_warn_only(&mut state);

                    metrics
                        .tokens_total
                        .with_label_values(&[self.project.as_str()])
                        .set(state.token_usage.total_tokens as i64);
                    metrics.agent_latency.observe(started.elapsed().as_secs_f64());
                    debug!(
                        project = %self.project,
                        attempt,
                        iteration = state.iteration(),
                        "turn complete"
                    );
                    return Ok(response);
                }
                Err(err) => {
                    metrics.errors.with_label_values(&[err.kind()]).inc();
                    if !err.is_retryable() {
                        self.save_warn_only(&mut state);
                        return Err(PipelineError::Provider(err));
                    }
                    warn!(
                        project = %self.project,
                        attempt,
                        error = %err,
                        "model call failed, will retry"
                    );
                    last_err = Some(err);
                }
            }
        }

        // Prompt tokens stay charged and the user turn stays in history —
        // the conversational intent is preserved for debugging and for a
        // later retry by the caller.
        self.save_warn_only(&mut state);
        Err(PipelineError::RetriesExhausted {
            attempts,
            source: last_err.expect("at least one attempt ran"),
        })
    }

    /// A failed save must not lose a completed model response; log and keep
    /// the in-memory session.
    fn save_warn_only(&self, state: &mut SessionState) {
        if let Err(e) = self.store.save_unlocked(state) {
            warn!(project = %self.project, error = %e, "session save failed");
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
