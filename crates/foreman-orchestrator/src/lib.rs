// Copyright (c) 2024-2026 Foreman Contributors
//
// SPDX-License-Identifier: Apache-2.0
pub mod daemon;
pub mod docker;
pub mod filequeue;
pub mod kube_lease;
pub mod kubejob;
pub mod leader;
pub mod source;
pub mod spawn;
pub mod tracker;

pub use daemon::Orchestrator;
pub use docker::DockerSpawner;
pub use filequeue::FileQueueSource;
pub use kube_lease::KubeLeaseCoordinator;
pub use kubejob::KubeSpawner;
pub use leader::{FileLeaseCoordinator, LeaderCallback, LeaderCoordinator, StaticCoordinator};
pub use source::{dedupe, WorkItem, WorkSource};
pub use spawn::{WorkerHandle, WorkerSpawner, WorkerState};
pub use tracker::{TrackerClient, TrackerSource};
