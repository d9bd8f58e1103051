// Copyright (c) 2024-2026 Foreman Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Driver registry: static metadata for every supported model driver.
//!
//! This module is the single source of truth for which driver IDs exist and
//! what their defaults are.  It does **not** contain construction logic —
//! that lives in [`crate::from_config`].

/// Metadata describing a registered model driver.
#[derive(Debug, Clone)]
pub struct DriverMeta {
    /// Unique driver id used in the `model.kind` config field.
    pub id: &'static str,
    /// Human-readable display name.
    pub name: &'static str,
    /// One-line description shown by `foreman list-providers`.
    pub description: &'static str,
    /// Default environment variable that holds the API key.
    /// `None` for drivers that require no key (local servers, subprocesses).
    pub default_api_key_env: Option<&'static str>,
    /// Default base URL when the user does not set `model.base_url`.
    /// `None` for subprocess drivers.
    pub default_base_url: Option<&'static str>,
    /// Default context window in tokens, used as the truncation budget when
    /// the config does not set one.
    pub default_context_window: u32,
    /// Whether an explicit API key is required.
    pub requires_api_key: bool,
}

/// Complete registry of supported drivers.
pub static DRIVERS: &[DriverMeta] = &[
    // ── Remote HTTP ───────────────────────────────────────────────────────────
    DriverMeta {
        id: "openrouter",
        name: "OpenRouter",
        description: "OpenRouter aggregator gateway (chat-completions wire format)",
        default_api_key_env: Some("OPENROUTER_API_KEY"),
        default_base_url: Some("https://openrouter.ai/api/v1"),
        default_context_window: 128_000,
        requires_api_key: true,
    },
    DriverMeta {
        id: "openai",
        name: "OpenAI",
        description: "OpenAI chat-completions endpoint",
        default_api_key_env: Some("OPENAI_API_KEY"),
        default_base_url: Some("https://api.openai.com/v1"),
        default_context_window: 128_000,
        requires_api_key: true,
    },
    DriverMeta {
        id: "google",
        name: "Google Gemini",
        description: "Google Generative Language API (generateContent)",
        default_api_key_env: Some("GEMINI_API_KEY"),
        default_base_url: Some("https://generativelanguage.googleapis.com"),
        default_context_window: 128_000,
        requires_api_key: true,
    },
    // ── Local servers ─────────────────────────────────────────────────────────
    DriverMeta {
        id: "ollama",
        name: "Ollama",
        description: "Ollama local single-turn server (http://localhost:11434)",
        default_api_key_env: None,
        default_base_url: Some("http://localhost:11434"),
        default_context_window: 8_192,
        requires_api_key: false,
    },
    // ── CLI subprocesses ──────────────────────────────────────────────────────
    DriverMeta {
        id: "claude-cli",
        name: "Claude Code CLI",
        description: "claude binary in non-interactive print mode",
        default_api_key_env: None,
        default_base_url: None,
        default_context_window: 200_000,
        requires_api_key: false,
    },
    DriverMeta {
        id: "gemini-cli",
        name: "Gemini CLI",
        description: "gemini binary with prompt on stdin",
        default_api_key_env: None,
        default_base_url: None,
        default_context_window: 128_000,
        requires_api_key: false,
    },
    DriverMeta {
        id: "codex-cli",
        name: "Codex CLI",
        description: "codex exec in full-auto mode",
        default_api_key_env: None,
        default_base_url: None,
        default_context_window: 200_000,
        requires_api_key: false,
    },
    // ── Testing ───────────────────────────────────────────────────────────────
    DriverMeta {
        id: "mock",
        name: "Mock",
        description: "Mock driver for tests (no network, echoes input)",
        default_api_key_env: None,
        default_base_url: None,
        default_context_window: 32_768,
        requires_api_key: false,
    },
];

/// Returns all registered drivers in declaration order.
pub fn list_drivers() -> &'static [DriverMeta] {
    DRIVERS
}

/// Look up a driver by its id.  Returns `None` for unknown ids.
pub fn get_driver(id: &str) -> Option<&'static DriverMeta> {
    DRIVERS.iter().find(|d| d.id == id)
}

/// Returns an iterator over all known driver ids.
pub fn known_driver_ids() -> impl Iterator<Item = &'static str> {
    DRIVERS.iter().map(|d| d.id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_is_non_empty() {
        assert!(!DRIVERS.is_empty());
    }

    #[test]
    fn all_ids_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for d in DRIVERS {
            assert!(seen.insert(d.id), "duplicate driver id: {}", d.id);
        }
    }

    #[test]
    fn get_driver_returns_correct_entry() {
        let d = get_driver("openrouter").expect("openrouter must be registered");
        assert_eq!(d.name, "OpenRouter");
    }

    #[test]
    fn get_driver_returns_none_for_unknown() {
        assert!(get_driver("totally-unknown-driver-xyz").is_none());
    }

    #[test]
    fn every_driver_has_a_positive_context_window() {
        for d in DRIVERS {
            assert!(d.default_context_window > 0, "driver {} has no window", d.id);
        }
    }

    #[test]
    fn known_driver_ids_covers_required_backends() {
        let ids: Vec<&str> = known_driver_ids().collect();
        for required in &["openrouter", "google", "ollama", "claude-cli", "mock"] {
            assert!(ids.contains(required), "missing required driver: {required}");
        }
    }
}
