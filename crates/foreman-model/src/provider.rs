// Copyright (c) 2024-2026 Foreman Contributors
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;

use crate::error::ProviderError;

/// Callback receiving incremental response fragments during streaming.
pub type ChunkSink<'a> = &'a mut (dyn FnMut(&str) + Send);

/// Uniform capability set over one LLM backend.
///
/// The agent pipeline is written against this trait and never branches on
/// the concrete driver.  Cancellation and deadlines are carried by the
/// caller's future: dropping an in-flight `send` aborts the underlying HTTP
/// request, and subprocess drivers spawn with `kill_on_drop`.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Stable driver id for status display and metrics labels.
    fn name(&self) -> &str;

    /// Model identifier as reported to users.
    fn model_name(&self) -> &str;

    /// Declared context window for the configured model, in tokens.
    ///
    /// Used by the pipeline as the truncation budget when the session has
    /// no explicit window configured.
    fn context_window(&self) -> u32;

    /// Single-shot completion: one prompt in, the full response text out.
    async fn send(&self, prompt: &str) -> Result<String, ProviderError>;

    /// Streaming completion; `on_chunk` is invoked with each incremental
    /// fragment and the aggregated response is returned.
    ///
    /// The default implementation performs a single-shot `send` and emits
    /// the full response as one chunk — correct for backends without a
    /// native streaming wire format.
    async fn send_stream(
        &self,
        prompt: &str,
        on_chunk: ChunkSink<'_>,
    ) -> Result<String, ProviderError> {
        let full = self.send(prompt).await?;
        on_chunk(&full);
        Ok(full)
    }
}
