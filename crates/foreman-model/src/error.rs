// Copyright (c) 2024-2026 Foreman Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Provider error taxonomy.
//!
//! The pipeline's retry loop keys off [`ProviderError::is_retryable`]:
//! transport failures, 5xx responses, and rate limits are absorbed with
//! backoff; auth and request-shape errors surface immediately.

use thiserror::Error;

/// Maximum characters of a response body carried inside an error message.
const BODY_SNIPPET_CHARS: usize = 200;

#[derive(Debug, Error)]
pub enum ProviderError {
    /// Dial/read failure or a 5xx response — retryable.
    #[error("network error: {0}")]
    Network(String),

    /// 429 or provider-signalled quota exhaustion — retryable.
    #[error("rate limited (status {status}): {snippet}")]
    RateLimited { status: u16, snippet: String },

    /// No API key available for a driver that requires one.  Never retried.
    #[error("API key not set; provide api_key or api_key_env in config")]
    AuthMissing,

    /// 401/403 — the key was sent and refused.  Never retried.
    #[error("authentication rejected (status {status}): {snippet}")]
    AuthRejected { status: u16, snippet: String },

    /// Any other 4xx — the request itself is malformed.  Never retried.
    #[error("bad request (status {status}): {snippet}")]
    BadRequest { status: u16, snippet: String },

    /// 2xx with no usable content.
    #[error("empty response from model")]
    EmptyResponse,

    /// CLI-subprocess driver exited non-zero.  `detail` carries stderr plus
    /// any inlined error-report excerpt.  Retryable: assistant binaries fail
    /// transiently (network hiccups of their own, session races).
    #[error("{binary} exited with status {code}: {detail}")]
    Exec {
        binary: String,
        code: i32,
        detail: String,
    },
}

impl ProviderError {
    /// Whether the pipeline's backoff loop should try again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::Network(_)
                | ProviderError::RateLimited { .. }
                | ProviderError::Exec { .. }
        )
    }

    /// Stable kind label used for the `errors_total{kind}` metric.
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::Network(_) => "transient_network",
            ProviderError::RateLimited { .. } => "rate_limited",
            ProviderError::AuthMissing => "auth_missing",
            ProviderError::AuthRejected { .. } => "auth_rejected",
            ProviderError::BadRequest { .. } => "bad_request",
            ProviderError::EmptyResponse => "response_empty",
            ProviderError::Exec { .. } => "exec_failed",
        }
    }
}

/// Classify a non-2xx HTTP response into the error taxonomy.
pub(crate) fn classify_http(provider: &str, status: u16, body: &str) -> ProviderError {
    let snippet = body_snippet(body);
    match status {
        429 => ProviderError::RateLimited { status, snippet },
        401 | 403 => ProviderError::AuthRejected { status, snippet },
        400..=499 => ProviderError::BadRequest { status, snippet },
        _ => ProviderError::Network(format!("{provider} error {status}: {snippet}")),
    }
}

/// Bound a response body to a short single-line excerpt, respecting char
/// boundaries.
pub(crate) fn body_snippet(body: &str) -> String {
    let line = body.trim().replace('\n', " ");
    if line.chars().count() <= BODY_SNIPPET_CHARS {
        return line;
    }
    line.chars().take(BODY_SNIPPET_CHARS).collect()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_retryable() {
        assert!(classify_http("openrouter", 500, "boom").is_retryable());
        assert!(classify_http("openrouter", 503, "").is_retryable());
    }

    #[test]
    fn rate_limit_is_retryable() {
        let e = classify_http("openrouter", 429, "quota");
        assert!(matches!(e, ProviderError::RateLimited { status: 429, .. }));
        assert!(e.is_retryable());
    }

    #[test]
    fn auth_errors_are_fatal() {
        for status in [401, 403] {
            let e = classify_http("google", status, "denied");
            assert!(matches!(e, ProviderError::AuthRejected { .. }));
            assert!(!e.is_retryable());
        }
    }

    #[test]
    fn other_4xx_is_bad_request() {
        let e = classify_http("ollama", 404, "no such model");
        assert!(matches!(e, ProviderError::BadRequest { status: 404, .. }));
        assert!(!e.is_retryable());
    }

    #[test]
    fn empty_response_is_fatal() {
        assert!(!ProviderError::EmptyResponse.is_retryable());
    }

    #[test]
    fn body_snippet_bounds_length() {
        let long = "x".repeat(1000);
        assert_eq!(body_snippet(&long).chars().count(), 200);
    }

    #[test]
    fn body_snippet_flattens_newlines() {
        assert_eq!(body_snippet("a\nb"), "a b");
    }

    #[test]
    fn body_snippet_respects_multibyte_chars() {
        let long = "ß".repeat(300);
        let s = body_snippet(&long);
        assert_eq!(s.chars().count(), 200);
    }

    #[test]
    fn kind_labels_are_stable() {
        assert_eq!(ProviderError::EmptyResponse.kind(), "response_empty");
        assert_eq!(ProviderError::AuthMissing.kind(), "auth_missing");
    }
}
