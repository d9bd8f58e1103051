// Copyright (c) 2024-2026 Foreman Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Ollama driver — local single-turn generate endpoint.
//!
//! `POST /api/generate` with `{model, prompt, stream: false}`; the response
//! carries `{response, done, error?}`.  A response with `done == false` or a
//! set `error` field is refused.  No API key; the server is assumed local.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use crate::error::{classify_http, ProviderError};

pub struct OllamaProvider {
    model: String,
    base_url: String,
    context_window: u32,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(
        model: String,
        base_url: Option<String>,
        context_window: u32,
        timeout_secs: u64,
    ) -> Self {
        let mut builder = reqwest::Client::builder();
        if timeout_secs > 0 {
            builder = builder.timeout(Duration::from_secs(timeout_secs));
        }
        Self {
            model,
            base_url: base_url.unwrap_or_else(|| "http://localhost:11434".into()),
            context_window,
            client: builder.build().unwrap_or_default(),
        }
    }
}

#[async_trait]
impl crate::ModelProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn context_window(&self) -> u32 {
        self.context_window
    }

    async fn send(&self, prompt: &str) -> Result<String, ProviderError> {
        let body = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
        });
        let url = format!("{}/api/generate", self.base_url.trim_end_matches('/'));

        debug!(model = %self.model, "sending ollama generate request");

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(format!("ollama: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(classify_http("ollama", status.as_u16(), &text));
        }

        let v: Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::Network(format!("ollama: {e}")))?;
        parse_generate_response(&v)
    }
}

/// Decode the `{response, done, error?}` shape.
pub(crate) fn parse_generate_response(v: &Value) -> Result<String, ProviderError> {
    if let Some(err) = v["error"].as_str() {
        return Err(ProviderError::Network(format!("ollama: {err}")));
    }
    if v["done"].as_bool() != Some(true) {
        return Err(ProviderError::Network(
            "ollama: response incomplete (done = false)".into(),
        ));
    }
    let text = v["response"].as_str().unwrap_or_default();
    if text.is_empty() {
        return Err(ProviderError::EmptyResponse);
    }
    Ok(text.to_string())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
