// Copyright (c) 2024-2026 Foreman Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Driver-surface tests that run without network access: registry coverage,
//! factory construction, and streaming behaviour through trait objects.

use std::sync::Arc;

use foreman_config::ProviderConfig;
use foreman_model::{
    from_config, get_driver, list_drivers, ModelProvider, ProviderError, ScriptedMockProvider,
};

fn minimal_cfg(kind: &str) -> ProviderConfig {
    ProviderConfig {
        kind: kind.into(),
        model: "test-model".into(),
        ..ProviderConfig::default()
    }
}

#[test]
fn every_registered_driver_constructs() {
    for meta in list_drivers() {
        let result = from_config(&minimal_cfg(meta.id));
        assert!(result.is_ok(), "driver {} failed to construct", meta.id);
    }
}

#[test]
fn constructed_driver_reports_registry_window_or_ci_clamp() {
    // Explicit windows pass through untouched regardless of environment.
    let cfg = ProviderConfig {
        context_window: Some(55_555),
        ..minimal_cfg("mock")
    };
    let p = from_config(&cfg).unwrap();
    assert_eq!(p.context_window(), 55_555);

    // Registry defaults may be CI-clamped to 4096, never to zero.
    let p = from_config(&minimal_cfg("mock")).unwrap();
    let meta = get_driver("mock").unwrap();
    assert!(p.context_window() == meta.default_context_window || p.context_window() == 4096);
    assert!(p.context_window() > 0);
}

#[tokio::test]
async fn trait_object_send_works_through_arc() {
    let provider: Arc<dyn ModelProvider> = Arc::new(ScriptedMockProvider::always_text("ok"));
    assert_eq!(provider.send("prompt").await.unwrap(), "ok");
}

#[tokio::test]
async fn streamed_chunks_concatenate_to_full_response() {
    let provider: Arc<dyn ModelProvider> =
        Arc::new(ScriptedMockProvider::chunked(vec!["Hel", "lo"]));
    let mut collected = Vec::new();
    let mut sink = |c: &str| collected.push(c.to_string());
    let full = provider.send_stream("x", &mut sink).await.unwrap();
    assert_eq!(full, "Hello");
    assert_eq!(collected.concat(), "Hello");
}

#[tokio::test]
async fn scripted_error_surfaces_through_trait_object() {
    let provider: Arc<dyn ModelProvider> = Arc::new(ScriptedMockProvider::new(vec![Err(
        ProviderError::Network("dial tcp: refused".into()),
    )]));
    let err = provider.send("x").await.unwrap_err();
    assert!(err.is_retryable());
}
