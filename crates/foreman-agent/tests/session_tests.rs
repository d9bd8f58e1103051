// Copyright (c) 2024-2026 Foreman Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Concurrency behaviour of the session store and pipeline through the
//! public API.

use std::sync::Arc;

use foreman_agent::{AgentPipeline, RetryPolicy, StateStore};
use foreman_model::ScriptedMockProvider;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn concurrent_memory_appends_all_land() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(StateStore::for_project(dir.path(), "demo"));

    let mut handles = Vec::new();
    for i in 0..16 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store.add_memory(format!("fact {i}")).await.unwrap();
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let state = store.load().await.unwrap();
    assert_eq!(state.memory.len(), 16, "every append lands exactly once");
}

#[tokio::test]
async fn concurrent_turns_are_serialised_per_session() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(StateStore::for_project(dir.path(), "demo"));
    let provider = Arc::new(ScriptedMockProvider::new(vec![
        Ok(vec!["first".into()]),
        Ok(vec!["second".into()]),
        Ok(vec!["third".into()]),
    ]));
    let pipeline = Arc::new(
        AgentPipeline::new(provider, store.clone(), "demo").with_retry(RetryPolicy::no_backoff()),
    );

    let cancel = CancellationToken::new();
    let mut handles = Vec::new();
    for i in 0..3 {
        let pipeline = pipeline.clone();
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
            pipeline.send(&cancel, &format!("prompt {i}")).await.unwrap()
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let state = store.load().await.unwrap();
    // 3 user turns + 3 assistant turns, appends linearised by the write lock.
    assert_eq!(state.history.len(), 6);
    assert_eq!(state.iteration(), 3);
    assert_eq!(
        state.token_usage.total_tokens,
        state.token_usage.prompt_tokens + state.token_usage.completion_tokens
    );
}

#[tokio::test]
async fn history_retention_holds_under_rapid_writes() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(StateStore::for_project(dir.path(), "demo"));
    let provider = Arc::new(ScriptedMockProvider::new(
        (0..60).map(|i| Ok(vec![format!("reply {i}")])).collect(),
    ));
    let pipeline =
        AgentPipeline::new(provider, store.clone(), "demo").with_retry(RetryPolicy::no_backoff());

    let cancel = CancellationToken::new();
    for i in 0..60 {
        pipeline.send(&cancel, &format!("prompt {i}")).await.unwrap();
    }

    let state = store.load().await.unwrap();
    assert_eq!(state.history.len(), foreman_agent::HISTORY_RETAIN);
    assert_eq!(state.iteration(), 60);
}
