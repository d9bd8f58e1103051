// Copyright (c) 2024-2026 Foreman Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Shared implementation for chat-completions style HTTP endpoints.
//!
//! OpenRouter, OpenAI, and most self-hosted gateways speak the same
//! `/chat/completions` wire format: a JSON request carrying `messages[]`,
//! a non-streaming response carrying `choices[0].message.content`, and a
//! streaming variant of server-sent events (`data: {…delta.content…}`
//! terminated by `data: [DONE]`).

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use crate::error::{body_snippet, classify_http, ProviderError};
use crate::provider::ChunkSink;

pub struct OpenAiCompatProvider {
    /// Driver id returned by `ModelProvider::name()`.
    driver_name: &'static str,
    /// Model id forwarded to the API.
    model: String,
    /// API key (pre-resolved from config or env).  `None` fails every
    /// request with `AuthMissing` before any network traffic.
    api_key: Option<String>,
    /// Full chat completions URL, e.g. `https://openrouter.ai/api/v1/chat/completions`.
    chat_url: String,
    context_window: u32,
    client: reqwest::Client,
    /// Additional HTTP headers (e.g. `HTTP-Referer` for OpenRouter).
    extra_headers: Vec<(String, String)>,
}

impl OpenAiCompatProvider {
    /// Construct a driver from its API base and auth configuration.
    ///
    /// `base_url` ends **before** `/chat/completions`.  `timeout_secs == 0`
    /// disables the client-side deadline.
    pub fn new(
        driver_name: &'static str,
        model: String,
        api_key: Option<String>,
        base_url: &str,
        context_window: u32,
        timeout_secs: u64,
        extra_headers: Vec<(String, String)>,
    ) -> Self {
        let base = base_url.trim_end_matches('/');
        let mut builder = reqwest::Client::builder();
        if timeout_secs > 0 {
            builder = builder.timeout(Duration::from_secs(timeout_secs));
        }
        Self {
            driver_name,
            model,
            api_key,
            chat_url: format!("{base}/chat/completions"),
            context_window,
            client: builder.build().unwrap_or_default(),
            extra_headers,
        }
    }

    fn request(&self, body: &Value) -> Result<reqwest::RequestBuilder, ProviderError> {
        let key = self.api_key.as_deref().ok_or(ProviderError::AuthMissing)?;
        let mut req = self.client.post(&self.chat_url).bearer_auth(key).json(body);
        for (name, val) in &self.extra_headers {
            req = req.header(name.as_str(), val.as_str());
        }
        Ok(req)
    }

    async fn dispatch(&self, body: &Value) -> Result<reqwest::Response, ProviderError> {
        debug!(
            driver = %self.driver_name,
            model = %self.model,
            "sending completion request"
        );
        let resp = self
            .request(body)?
            .send()
            .await
            .map_err(|e| ProviderError::Network(format!("{}: {e}", self.driver_name)))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(classify_http(self.driver_name, status.as_u16(), &text));
        }
        Ok(resp)
    }
}

#[async_trait]
impl crate::ModelProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        self.driver_name
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn context_window(&self) -> u32 {
        self.context_window
    }

    async fn send(&self, prompt: &str) -> Result<String, ProviderError> {
        let body = build_chat_body(&self.model, prompt, false);
        let resp = self.dispatch(&body).await?;
        let v: Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::Network(format!("{}: {e}", self.driver_name)))?;
        parse_chat_response(&v)
    }

    async fn send_stream(
        &self,
        prompt: &str,
        on_chunk: ChunkSink<'_>,
    ) -> Result<String, ProviderError> {
        let body = build_chat_body(&self.model, prompt, true);
        let resp = self.dispatch(&body).await?;

        // SSE events can be split across TCP packets.  Maintain a line
        // buffer across chunks; emit only complete `data:` lines.
        let mut byte_stream = resp.bytes_stream();
        let mut buf = String::new();
        let mut full = String::new();
        while let Some(chunk) = byte_stream.next().await {
            let bytes = chunk
                .map_err(|e| ProviderError::Network(format!("{}: {e}", self.driver_name)))?;
            buf.push_str(&String::from_utf8_lossy(&bytes));
            for event in drain_complete_sse_lines(&mut buf) {
                match event {
                    SseEvent::Delta(text) => {
                        if !text.is_empty() {
                            full.push_str(&text);
                            on_chunk(&text);
                        }
                    }
                    SseEvent::Done => {
                        if full.is_empty() {
                            return Err(ProviderError::EmptyResponse);
                        }
                        return Ok(full);
                    }
                }
            }
        }
        // Stream ended without the [DONE] sentinel; accept what arrived.
        if full.is_empty() {
            return Err(ProviderError::EmptyResponse);
        }
        Ok(full)
    }
}

/// One parsed server-sent event.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum SseEvent {
    Delta(String),
    Done,
}

/// Build the chat-completions request body.
pub(crate) fn build_chat_body(model: &str, prompt: &str, stream: bool) -> Value {
    json!({
        "model": model,
        "messages": [{ "role": "user", "content": prompt }],
        "stream": stream,
    })
}

/// Decode `choices[0].message.content` from a non-streaming response.
pub(crate) fn parse_chat_response(v: &Value) -> Result<String, ProviderError> {
    let content = v["choices"][0]["message"]["content"]
        .as_str()
        .unwrap_or_default();
    if content.is_empty() {
        return Err(ProviderError::EmptyResponse);
    }
    Ok(content.to_string())
}

/// Parse a single complete SSE `data:` line.
///
/// Returns `None` for empty lines, comments, and unparseable payloads.
pub(crate) fn parse_sse_data_line(line: &str) -> Option<SseEvent> {
    let data = line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:"))?;
    let data = data.trim();
    if data.is_empty() {
        return None;
    }
    if data == "[DONE]" {
        return Some(SseEvent::Done);
    }
    let v: Value = serde_json::from_str(data).ok()?;
    let delta = v["choices"][0]["delta"]["content"].as_str()?;
    Some(SseEvent::Delta(delta.to_string()))
}

/// Drain all complete `\n`-terminated SSE lines from `buf`.
///
/// Any trailing incomplete line is left in `buf` so it can be extended by
/// the next TCP chunk — a single SSE event may span multiple packets.
pub(crate) fn drain_complete_sse_lines(buf: &mut String) -> Vec<SseEvent> {
    let mut events = Vec::new();
    while let Some(nl_pos) = buf.find('\n') {
        // Strip the optional Windows-style \r before \n.
        let line = buf[..nl_pos].trim_end_matches('\r').to_string();
        *buf = buf[nl_pos + 1..].to_string();
        if let Some(ev) = parse_sse_data_line(&line) {
            events.push(ev);
        }
    }
    events
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
