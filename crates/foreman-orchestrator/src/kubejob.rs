// Copyright (c) 2024-2026 Foreman Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Cluster worker spawner: one `batch/v1` Job per claimed item.
//!
//! The job carries the same environment contract as the Docker spawner,
//! runs with `restartPolicy: Never` and `backoffLimit: 0` (retries are the
//! orchestrator's business, not the cluster's), and is watched until a
//! Complete or Failed condition appears.  Logs come from the job's pod via
//! the `job-name` label selector.

use anyhow::Context;
use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams, LogParams, PostParams};
use kube::runtime::wait::await_condition;
use serde_json::json;
use tracing::{debug, warn};

use foreman_config::{ProviderConfig, WorkerConfig};

use crate::source::WorkItem;
use crate::spawn::{worker_env, worker_name, WorkerHandle, WorkerSpawner, WorkerState};

pub struct KubeSpawner {
    jobs: Api<Job>,
    pods: Api<Pod>,
    worker: WorkerConfig,
    model: ProviderConfig,
    identity: String,
}

impl KubeSpawner {
    pub fn new(
        client: kube::Client,
        worker: WorkerConfig,
        model: ProviderConfig,
        identity: impl Into<String>,
    ) -> Self {
        let jobs = Api::namespaced(client.clone(), &worker.namespace);
        let pods = Api::namespaced(client, &worker.namespace);
        Self {
            jobs,
            pods,
            worker,
            model,
            identity: identity.into(),
        }
    }
}

/// Build the Job manifest for one worker.
///
/// Free function so the manifest shape is unit-testable without a cluster.
pub(crate) fn build_job(
    name: &str,
    image: &str,
    env: &[(String, String)],
    item_id: &str,
) -> anyhow::Result<Job> {
    let env_json: Vec<serde_json::Value> = env
        .iter()
        .map(|(k, v)| json!({ "name": k, "value": v }))
        .collect();
    let job = serde_json::from_value(json!({
        "apiVersion": "batch/v1",
        "kind": "Job",
        "metadata": {
            "name": name,
            "labels": {
                "app.kubernetes.io/name": "foreman-worker",
                "app.kubernetes.io/managed-by": "foreman",
            },
            "annotations": {
                "foreman.dev/work-item": item_id,
            }
        },
        "spec": {
            "backoffLimit": 0,
            "template": {
                "metadata": {
                    "labels": { "app.kubernetes.io/name": "foreman-worker" }
                },
                "spec": {
                    "restartPolicy": "Never",
                    "containers": [{
                        "name": "worker",
                        "image": image,
                        "env": env_json,
                    }]
                }
            }
        }
    }))
    .context("building worker job manifest")?;
    Ok(job)
}

/// Condition: the job carries a Complete or Failed condition with status
/// `"True"`.
fn job_finished(job: Option<&Job>) -> bool {
    job.and_then(|j| j.status.as_ref())
        .and_then(|s| s.conditions.as_ref())
        .map(|conds| {
            conds
                .iter()
                .any(|c| (c.type_ == "Complete" || c.type_ == "Failed") && c.status == "True")
        })
        .unwrap_or(false)
}

fn job_succeeded(job: &Job) -> bool {
    job.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conds| {
            conds
                .iter()
                .any(|c| c.type_ == "Complete" && c.status == "True")
        })
        .unwrap_or(false)
}

#[async_trait]
impl WorkerSpawner for KubeSpawner {
    async fn spawn(&self, item: &WorkItem) -> anyhow::Result<WorkerHandle> {
        let name = worker_name(&item.id);
        let env = worker_env(&self.worker, &self.model, item, &self.identity);
        let job = build_job(&name, &self.worker.image, &env, &item.id)?;

        self.jobs
            .create(&PostParams::default(), &job)
            .await
            .with_context(|| format!("submitting worker job {name}"))?;
        debug!(job = %name, item = %item.id, "worker job submitted");

        Ok(WorkerHandle {
            worker_id: name,
            work_item_id: item.id.clone(),
            started_at: chrono::Utc::now(),
            state: WorkerState::Pending,
        })
    }

    async fn wait(&self, handle: &WorkerHandle) -> anyhow::Result<(WorkerState, String)> {
        let watch = await_condition(self.jobs.clone(), &handle.worker_id, job_finished);
        let finished = if self.worker.timeout_secs > 0 {
            tokio::time::timeout(
                std::time::Duration::from_secs(self.worker.timeout_secs),
                watch,
            )
            .await
            .ok()
        } else {
            Some(watch.await)
        };

        let state = match finished {
            Some(Ok(Some(job))) if job_succeeded(&job) => WorkerState::Completed,
            Some(Ok(_)) => WorkerState::Failed,
            Some(Err(e)) => {
                warn!(job = %handle.worker_id, error = %e, "job watch failed");
                WorkerState::Failed
            }
            None => {
                warn!(job = %handle.worker_id, "worker job timed out");
                WorkerState::Failed
            }
        };

        let logs = self.collect_logs(&handle.worker_id).await.unwrap_or_else(|e| {
            warn!(job = %handle.worker_id, error = %e, "log collection failed");
            String::new()
        });
        Ok((state, logs))
    }
}

impl KubeSpawner {
    async fn collect_logs(&self, job_name: &str) -> anyhow::Result<String> {
        let params = ListParams::default().labels(&format!("job-name={job_name}"));
        let pods = self.pods.list(&params).await.context("listing worker pods")?;
        let mut logs = String::new();
        for pod in pods {
            let Some(pod_name) = pod.metadata.name else {
                continue;
            };
            match self.pods.logs(&pod_name, &LogParams::default()).await {
                Ok(text) => logs.push_str(&text),
                Err(e) => warn!(pod = %pod_name, error = %e, "pod log fetch failed"),
            }
        }
        Ok(logs)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::batch::v1::{JobCondition, JobStatus};

    fn job_with_condition(type_: &str, status: &str) -> Job {
        Job {
            status: Some(JobStatus {
                conditions: Some(vec![JobCondition {
                    type_: type_.into(),
                    status: status.into(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn manifest_carries_env_and_no_cluster_retries() {
        let env = vec![
            ("FOREMAN_WORK_ITEM".to_string(), "BOT-3".to_string()),
            ("FOREMAN_MODEL".to_string(), "gpt-4o".to_string()),
        ];
        let job = build_job("foreman-bot-3-abcd1234", "worker:latest", &env, "BOT-3").unwrap();

        assert_eq!(job.metadata.name.as_deref(), Some("foreman-bot-3-abcd1234"));
        let spec = job.spec.unwrap();
        assert_eq!(spec.backoff_limit, Some(0));
        let pod_spec = spec.template.spec.unwrap();
        assert_eq!(pod_spec.restart_policy.as_deref(), Some("Never"));
        let container = &pod_spec.containers[0];
        assert_eq!(container.image.as_deref(), Some("worker:latest"));
        let env_vars = container.env.as_ref().unwrap();
        assert!(env_vars
            .iter()
            .any(|e| e.name == "FOREMAN_WORK_ITEM" && e.value.as_deref() == Some("BOT-3")));
    }

    #[test]
    fn manifest_annotates_the_work_item() {
        let job = build_job("n", "img", &[], "BOT-3").unwrap();
        let annotations = job.metadata.annotations.unwrap();
        assert_eq!(
            annotations.get("foreman.dev/work-item").map(String::as_str),
            Some("BOT-3")
        );
    }

    #[test]
    fn finished_condition_requires_true_status() {
        assert!(job_finished(Some(&job_with_condition("Complete", "True"))));
        assert!(job_finished(Some(&job_with_condition("Failed", "True"))));
        assert!(!job_finished(Some(&job_with_condition("Complete", "False"))));
        assert!(!job_finished(Some(&Job::default())));
        assert!(!job_finished(None));
    }

    #[test]
    fn success_is_only_the_complete_condition() {
        assert!(job_succeeded(&job_with_condition("Complete", "True")));
        assert!(!job_succeeded(&job_with_condition("Failed", "True")));
    }
}
