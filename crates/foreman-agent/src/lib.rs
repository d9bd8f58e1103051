// Copyright (c) 2024-2026 Foreman Contributors
//
// SPDX-License-Identifier: Apache-2.0
pub mod pipeline;
pub mod state;
pub mod tokens;

pub use pipeline::{AgentPipeline, PipelineError, RetryPolicy};
pub use state::{Role, SessionState, StateError, StateStore, TokenUsage, Turn, HISTORY_RETAIN};
