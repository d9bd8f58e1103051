// Copyright (c) 2024-2026 Foreman Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Google Gemini driver — Generative Language API.
//!
//! Uses the single-shot `generateContent` endpoint.  There is no native
//! streaming path here: `send_stream` falls back to the trait default, which
//! performs the non-stream call and emits the full response as one chunk.
//!
//! # Auth
//! API key via the `x-goog-api-key` header (not a bearer token).

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use crate::error::{classify_http, ProviderError};

pub struct GoogleProvider {
    model: String,
    api_key: Option<String>,
    base_url: String,
    context_window: u32,
    client: reqwest::Client,
}

impl GoogleProvider {
    pub fn new(
        model: String,
        api_key: Option<String>,
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
            api_key,
            base_url: base_url
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com".into()),
            context_window,
            client: builder.build().unwrap_or_default(),
        }
    }
}

#[async_trait]
impl crate::ModelProvider for GoogleProvider {
    fn name(&self) -> &str {
        "google"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn context_window(&self) -> u32 {
        self.context_window
    }

    async fn send(&self, prompt: &str) -> Result<String, ProviderError> {
        let key = self.api_key.as_deref().ok_or(ProviderError::AuthMissing)?;

        let body = build_generate_body(prompt);
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model,
        );

        debug!(model = %self.model, "sending generateContent request");

        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(format!("google: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(classify_http("google", status.as_u16(), &text));
        }

        let v: Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::Network(format!("google: {e}")))?;
        parse_generate_response(&v)
    }
}

/// Build the `generateContent` request body: `contents[0].parts[].text`.
pub(crate) fn build_generate_body(prompt: &str) -> Value {
    json!({
        "contents": [{ "parts": [{ "text": prompt }] }],
    })
}

/// Decode `candidates[0].content.parts[].text`, joining multiple text parts.
pub(crate) fn parse_generate_response(v: &Value) -> Result<String, ProviderError> {
    let parts = match v["candidates"][0]["content"]["parts"].as_array() {
        Some(p) => p,
        None => return Err(ProviderError::EmptyResponse),
    };
    let text: String = parts
        .iter()
        .filter_map(|p| p["text"].as_str())
        .collect::<Vec<_>>()
        .join("");
    if text.is_empty() {
        return Err(ProviderError::EmptyResponse);
    }
    Ok(text)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ModelProvider, ProviderError};

    #[test]
    fn provider_name() {
        let p = GoogleProvider::new("gemini-2.0-flash".into(), None, None, 128_000, 0);
        assert_eq!(p.name(), "google");
        assert_eq!(p.model_name(), "gemini-2.0-flash");
    }

    #[test]
    fn body_uses_contents_parts_shape() {
        let body = build_generate_body("what is this?");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "what is this?");
    }

    #[test]
    fn response_text_decoded() {
        let v = json!({
            "candidates": [{ "content": { "parts": [{ "text": "answer" }] } }]
        });
        assert_eq!(parse_generate_response(&v).unwrap(), "answer");
    }

    #[test]
    fn multiple_text_parts_joined() {
        let v = json!({
            "candidates": [{ "content": { "parts": [{ "text": "a" }, { "text": "b" }] } }]
        });
        assert_eq!(parse_generate_response(&v).unwrap(), "ab");
    }

    #[test]
    fn missing_candidates_is_empty_response() {
        let v = json!({ "promptFeedback": { "blockReason": "SAFETY" } });
        assert!(matches!(
            parse_generate_response(&v),
            Err(ProviderError::EmptyResponse)
        ));
    }

    #[tokio::test]
    async fn missing_key_fails_before_any_request() {
        let p = GoogleProvider::new("gemini-2.0-flash".into(), None, None, 128_000, 0);
        assert!(matches!(
            p.send("hi").await,
            Err(ProviderError::AuthMissing)
        ));
    }

    #[tokio::test]
    async fn stream_falls_back_to_single_chunk() {
        // The trait default performs the non-stream call; with no key that
        // fails with AuthMissing and must not invoke the chunk callback.
        let p = GoogleProvider::new("gemini-2.0-flash".into(), None, None, 128_000, 0);
        let mut chunks: Vec<String> = Vec::new();
        let mut sink = |c: &str| chunks.push(c.to_string());
        let res = p.send_stream("hi", &mut sink).await;
        assert!(res.is_err());
        assert!(chunks.is_empty());
    }
}
