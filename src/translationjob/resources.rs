//! Builds the `batch/v1` Job used to dispatch a worker out-of-process when
//! `spec.pipeline == TektonJob`.

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{Container, EnvVar, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::ObjectMeta;

use super::types::TranslationJob;

const WORKER_IMAGE_ENV: &str = "GLOOSCAP_WORKER_IMAGE";
const DEFAULT_WORKER_IMAGE: &str = "ghcr.io/dasmlab/glooscap-worker:latest";

/// Name of the dispatched Job, stable per TranslationJob so re-reconciling
/// an already-dispatched job is a no-op `get_opt`.
pub fn dispatch_job_name(job: &TranslationJob) -> String {
    format!("{}-worker", job.metadata.name.clone().unwrap_or_default())
}

pub fn worker_job(job: &TranslationJob, oref: OwnerReference) -> Job {
    let name = dispatch_job_name(job);
    let job_ref = format!(
        "{}/{}",
        job.metadata.namespace.clone().unwrap_or_default(),
        job.metadata.name.clone().unwrap_or_default()
    );
    let image = std::env::var(WORKER_IMAGE_ENV).unwrap_or_else(|_| DEFAULT_WORKER_IMAGE.to_string());

    Job {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: job.metadata.namespace.clone(),
            owner_references: Some(vec![oref]),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(0),
            active_deadline_seconds: Some(30 * 60),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta::default()),
                spec: Some(PodSpec {
                    restart_policy: Some("Never".to_string()),
                    containers: vec![Container {
                        name: "worker".to_string(),
                        image: Some(image),
                        env: Some(vec![EnvVar {
                            name: "GLOOSCAP_JOB_REF".to_string(),
                            value: Some(job_ref),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}
