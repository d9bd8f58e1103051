// Copyright (c) 2024-2026 Foreman Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::provider::ChunkSink;

/// Deterministic mock driver for tests.  Echoes the prompt back as the
/// response.
#[derive(Default)]
pub struct MockProvider;

#[async_trait]
impl crate::ModelProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }
    fn model_name(&self) -> &str {
        "mock-model"
    }
    fn context_window(&self) -> u32 {
        32_768
    }

    async fn send(&self, prompt: &str) -> Result<String, ProviderError> {
        Ok(format!("MOCK: {prompt}"))
    }
}

/// One scripted turn: either a sequence of stream chunks or an error.
pub type Script = Result<Vec<String>, ProviderError>;

/// A pre-scripted mock driver.  Each call pops the next script from the
/// front of the queue, so tests can specify exact failure/success sequences
/// — including retryable errors — without network access or subprocesses.
pub struct ScriptedMockProvider {
    scripts: Mutex<Vec<Script>>,
    /// Every prompt seen, in call order, for test inspection.
    pub prompts: Arc<Mutex<Vec<String>>>,
    /// Total number of `send`/`send_stream` calls observed.
    pub calls: Arc<AtomicUsize>,
}

impl ScriptedMockProvider {
    /// Build a driver from an ordered list of per-call scripts.
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts),
            prompts: Arc::new(Mutex::new(Vec::new())),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Convenience: driver that always returns a single text reply.
    pub fn always_text(reply: impl Into<String>) -> Self {
        Self::new(vec![Ok(vec![reply.into()])])
    }

    /// Convenience: fail `failures` times with a transient network error,
    /// then succeed with `reply`.
    pub fn fail_then_succeed(failures: usize, reply: impl Into<String>) -> Self {
        let mut scripts: Vec<Script> = (0..failures)
            .map(|i| Err(ProviderError::Network(format!("connection reset ({i})"))))
            .collect();
        scripts.push(Ok(vec![reply.into()]));
        Self::new(scripts)
    }

    /// Convenience: succeed with the given stream chunks.
    pub fn chunked(chunks: Vec<&str>) -> Self {
        Self::new(vec![Ok(chunks.into_iter().map(String::from).collect())])
    }

    fn next_script(&self, prompt: &str) -> Script {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        let mut scripts = self.scripts.lock().unwrap();
        if scripts.is_empty() {
            // Default fallback when all scripts are consumed.
            Ok(vec!["[no more scripts]".into()])
        } else {
            scripts.remove(0)
        }
    }
}

#[async_trait]
impl crate::ModelProvider for ScriptedMockProvider {
    fn name(&self) -> &str {
        "scripted-mock"
    }
    fn model_name(&self) -> &str {
        "scripted-mock-model"
    }
    fn context_window(&self) -> u32 {
        32_768
    }

    async fn send(&self, prompt: &str) -> Result<String, ProviderError> {
        self.next_script(prompt).map(|chunks| chunks.concat())
    }

    async fn send_stream(
        &self,
        prompt: &str,
        on_chunk: ChunkSink<'_>,
    ) -> Result<String, ProviderError> {
        let chunks = self.next_script(prompt)?;
        let mut full = String::new();
        for c in &chunks {
            full.push_str(c);
            on_chunk(c);
        }
        Ok(full)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ModelProvider;

    #[tokio::test]
    async fn mock_echoes_prompt() {
        let p = MockProvider;
        assert_eq!(p.send("hi").await.unwrap(), "MOCK: hi");
    }

    #[tokio::test]
    async fn mock_stream_emits_single_chunk() {
        let p = MockProvider;
        let mut chunks = Vec::new();
        let mut sink = |c: &str| chunks.push(c.to_string());
        let full = p.send_stream("hi", &mut sink).await.unwrap();
        assert_eq!(chunks, vec![full.clone()]);
        assert_eq!(full, "MOCK: hi");
    }

    #[tokio::test]
    async fn scripted_single_text_reply() {
        let p = ScriptedMockProvider::always_text("hello world");
        assert_eq!(p.send("x").await.unwrap(), "hello world");
    }

    #[tokio::test]
    async fn scripted_records_prompts_and_calls() {
        let p = ScriptedMockProvider::always_text("r");
        p.send("first").await.unwrap();
        p.send("second").await.unwrap();
        assert_eq!(p.calls.load(Ordering::SeqCst), 2);
        assert_eq!(*p.prompts.lock().unwrap(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn scripted_failures_pop_in_order() {
        let p = ScriptedMockProvider::fail_then_succeed(2, "OK");
        assert!(p.send("a").await.is_err());
        assert!(p.send("a").await.is_err());
        assert_eq!(p.send("a").await.unwrap(), "OK");
    }

    #[tokio::test]
    async fn scripted_stream_emits_each_chunk() {
        let p = ScriptedMockProvider::chunked(vec!["Hel", "lo"]);
        let mut chunks = Vec::new();
        let mut sink = |c: &str| chunks.push(c.to_string());
        let full = p.send_stream("x", &mut sink).await.unwrap();
        assert_eq!(full, "Hello");
        assert_eq!(chunks, vec!["Hel", "lo"]);
    }

    #[tokio::test]
    async fn scripted_fallback_when_scripts_exhausted() {
        let p = ScriptedMockProvider::new(vec![]);
        assert_eq!(p.send("x").await.unwrap(), "[no more scripts]");
    }
}
