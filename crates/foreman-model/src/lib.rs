// Copyright (c) 2024-2026 Foreman Contributors
//
// SPDX-License-Identifier: Apache-2.0
pub mod registry;
pub(crate) mod openai_compat;
mod error;
mod exec;
mod google;
mod mock;
mod ollama;
mod provider;

pub use error::ProviderError;
pub use exec::{get_cli_spec, CliInvocation, CliProvider, CliSpec, ExecOutput, Runner, CLI_SPECS};
pub use google::GoogleProvider;
pub use mock::{MockProvider, ScriptedMockProvider};
pub use ollama::OllamaProvider;
pub use openai_compat::OpenAiCompatProvider;
pub use provider::{ChunkSink, ModelProvider};
pub use registry::{get_driver, list_drivers, DriverMeta};

use anyhow::bail;
use foreman_config::ProviderConfig;

/// Context-window cap applied to registry defaults in CI environments.
/// Explicit `context_window` config always wins.
const CI_CONTEXT_WINDOW_CAP: u32 = 4096;

/// Construct a boxed [`ModelProvider`] from configuration.
///
/// Selects the driver implementation based on `cfg.kind`.  Run
/// `foreman list-providers` to see all recognised driver ids.
pub fn from_config(cfg: &ProviderConfig) -> anyhow::Result<Box<dyn ModelProvider>> {
    let key = resolve_api_key(cfg);
    let window = resolve_context_window(cfg);

    match cfg.kind.as_str() {
        // ── Remote HTTP ───────────────────────────────────────────────────────
        "openrouter" => {
            let mut headers = vec![
                ("HTTP-Referer".into(), "https://github.com/foreman-dev/foreman".into()),
                ("X-Title".into(), "foreman".into()),
            ];
            headers.extend(cfg.headers.iter().cloned());
            Ok(Box::new(OpenAiCompatProvider::new(
                "openrouter",
                qualify_aggregator_model(&cfg.model),
                key,
                cfg.base_url.as_deref().unwrap_or("https://openrouter.ai/api/v1"),
                window,
                cfg.timeout_secs,
                headers,
            )))
        }
        "openai" => Ok(Box::new(OpenAiCompatProvider::new(
            "openai",
            cfg.model.clone(),
            key,
            cfg.base_url.as_deref().unwrap_or("https://api.openai.com/v1"),
            window,
            cfg.timeout_secs,
            cfg.headers.clone(),
        ))),
        "google" => Ok(Box::new(GoogleProvider::new(
            cfg.model.clone(),
            key,
            cfg.base_url.clone(),
            window,
            cfg.timeout_secs,
        ))),

        // ── Local servers ─────────────────────────────────────────────────────
        "ollama" => Ok(Box::new(OllamaProvider::new(
            cfg.model.clone(),
            cfg.base_url.clone(),
            window,
            cfg.timeout_secs,
        ))),

        // ── CLI subprocesses ──────────────────────────────────────────────────
        "claude-cli" | "gemini-cli" | "codex-cli" => {
            let spec = get_cli_spec(&cfg.kind)
                .ok_or_else(|| anyhow::anyhow!("no CLI spec registered for {}", cfg.kind))?;
            Ok(Box::new(CliProvider::new(
                spec,
                cfg.model.clone(),
                cfg.workdir.as_ref().map(std::path::PathBuf::from),
                window,
            )))
        }

        // ── Testing ───────────────────────────────────────────────────────────
        "mock" => Ok(Box::new(MockProvider)),

        other => {
            let known: Vec<&str> = registry::known_driver_ids().collect();
            bail!(
                "unknown model driver: {other:?}\n\
                 Run `foreman list-providers` for a full list, or check your config.\n\
                 Known drivers: {known}",
                known = known.join(", ")
            )
        }
    }
}

/// Resolve the API key: explicit key → configured env var → the driver
/// registry's default env var.
fn resolve_api_key(cfg: &ProviderConfig) -> Option<String> {
    if let Some(k) = &cfg.api_key {
        return Some(k.clone());
    }
    if let Some(env) = &cfg.api_key_env {
        return std::env::var(env).ok();
    }
    if let Some(meta) = registry::get_driver(&cfg.kind) {
        if let Some(env_var) = meta.default_api_key_env {
            return std::env::var(env_var).ok();
        }
    }
    None
}

/// Resolve the context window: explicit config wins; otherwise the registry
/// default, clamped in CI.
fn resolve_context_window(cfg: &ProviderConfig) -> u32 {
    if let Some(w) = cfg.context_window {
        return w;
    }
    let default = registry::get_driver(&cfg.kind)
        .map(|m| m.default_context_window)
        .unwrap_or(CI_CONTEXT_WINDOW_CAP);
    if in_ci() {
        default.min(CI_CONTEXT_WINDOW_CAP)
    } else {
        default
    }
}

fn in_ci() -> bool {
    std::env::var("CI").map(|v| !v.is_empty()).unwrap_or(false)
}

/// Qualify a bare model name for the aggregator driver.
///
/// OpenRouter model ids are `vendor/model`.  When the configured name lacks
/// the vendor prefix, well-known families are mapped to their vendors; other
/// names pass through unchanged.
pub fn qualify_aggregator_model(model: &str) -> String {
    if model.contains('/') {
        return model.to_string();
    }
    let vendor = if model.starts_with("gemini-") {
        "google"
    } else if model.starts_with("gpt-") {
        "openai"
    } else if model.starts_with("claude-") {
        "anthropic"
    } else if model.starts_with("llama-") {
        "meta-llama"
    } else if model.starts_with("mistral-") || model.starts_with("mixtral-") {
        "mistralai"
    } else {
        return model.to_string();
    };
    format!("{vendor}/{model}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use foreman_config::ProviderConfig;

    fn minimal_config(kind: &str, model: &str) -> ProviderConfig {
        ProviderConfig {
            kind: kind.into(),
            model: model.into(),
            ..ProviderConfig::default()
        }
    }

    #[test]
    fn from_config_openrouter_succeeds() {
        assert!(from_config(&minimal_config("openrouter", "openai/gpt-4o")).is_ok());
    }

    #[test]
    fn from_config_google_succeeds() {
        assert!(from_config(&minimal_config("google", "gemini-2.0-flash")).is_ok());
    }

    #[test]
    fn from_config_ollama_requires_no_key() {
        assert!(from_config(&minimal_config("ollama", "llama3.2")).is_ok());
    }

    #[test]
    fn from_config_cli_drivers_succeed() {
        for kind in ["claude-cli", "gemini-cli", "codex-cli"] {
            assert!(from_config(&minimal_config(kind, "some-model")).is_ok(), "{kind}");
        }
    }

    #[test]
    fn from_config_mock_succeeds() {
        assert!(from_config(&minimal_config("mock", "mock-model")).is_ok());
    }

    #[test]
    fn from_config_unknown_driver_returns_error() {
        let result = from_config(&minimal_config("totally_unknown_driver_xyz", "m"));
        let msg = result.err().unwrap().to_string();
        assert!(msg.contains("unknown model driver"));
        assert!(msg.contains("list-providers") || msg.contains("Known drivers"));
    }

    #[test]
    fn all_registry_drivers_have_constructors() {
        // Every driver id in the registry must be handled by from_config
        // without returning "unknown driver".
        for meta in list_drivers() {
            let result = from_config(&minimal_config(meta.id, "test-model"));
            if let Err(e) = result {
                assert!(
                    !e.to_string().contains("unknown model driver"),
                    "driver {} is in registry but not handled by from_config",
                    meta.id
                );
            }
        }
    }

    #[test]
    fn resolve_api_key_prefers_explicit_key() {
        let cfg = ProviderConfig {
            api_key: Some("explicit-key".into()),
            api_key_env: Some("NONEXISTENT_ENV_VAR_XYZ".into()),
            ..ProviderConfig::default()
        };
        assert_eq!(resolve_api_key(&cfg).as_deref(), Some("explicit-key"));
    }

    #[test]
    fn explicit_context_window_is_never_clamped() {
        let cfg = ProviderConfig {
            context_window: Some(1_000_000),
            ..minimal_config("openrouter", "m")
        };
        assert_eq!(resolve_context_window(&cfg), 1_000_000);
    }

    // ── Aggregator model qualification ────────────────────────────────────────

    #[test]
    fn qualified_names_pass_through() {
        assert_eq!(qualify_aggregator_model("openai/gpt-4o"), "openai/gpt-4o");
    }

    #[test]
    fn known_families_get_vendor_prefixes() {
        assert_eq!(qualify_aggregator_model("gemini-2.0-flash"), "google/gemini-2.0-flash");
        assert_eq!(qualify_aggregator_model("gpt-4o"), "openai/gpt-4o");
        assert_eq!(qualify_aggregator_model("claude-opus-4-5"), "anthropic/claude-opus-4-5");
        assert_eq!(qualify_aggregator_model("llama-3.3-70b"), "meta-llama/llama-3.3-70b");
        assert_eq!(qualify_aggregator_model("mistral-large"), "mistralai/mistral-large");
        assert_eq!(qualify_aggregator_model("mixtral-8x7b"), "mistralai/mixtral-8x7b");
    }

    #[test]
    fn unknown_families_pass_through_unprefixed() {
        assert_eq!(qualify_aggregator_model("qwen-2.5"), "qwen-2.5");
    }
}
