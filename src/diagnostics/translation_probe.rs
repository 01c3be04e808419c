//! Translation-Service Diagnostic (D_T, §4.7): a long-lived routine proving
//! the translation service is alive by round-tripping embedded content
//! through it. Runs independently of the reconcilers and never raises —
//! failures are logged and the routine continues.

use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Utc;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::ResourceExt;
use tracing::{info, warn};

use crate::translationjob::types::{labels, parameters, JobSource, Pipeline, TranslationJob, TranslationJobSpec};
use crate::util::errors::Error;
use crate::util::metrics::Metrics;
use crate::wikitarget::types::TargetRef;

const CYCLE_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);
const KEEP_RECENT: usize = 3;
const STUCK_AGE: chrono::Duration = chrono::Duration::seconds(60);
const COOLDOWN: chrono::Duration = chrono::Duration::minutes(2);

const STAR_WARS_CONTENT: &str = "A long time ago, in a galaxy far, far away...\n\nIt is a period of civil war. Rebel spaceships, striking from a hidden base, have won their first victory against the evil Galactic Empire.";

pub async fn run(client: kube::Client, namespace: String, metrics: Metrics) {
    let mut interval = tokio::time::interval(CYCLE_INTERVAL);
    loop {
        interval.tick().await;
        match cycle(&client, &namespace).await {
            Ok(outcome) => {
                info!("D_T cycle: {outcome}");
                metrics.diagnostic_cycle("translation_probe", outcome);
            }
            Err(e) => {
                warn!("D_T cycle failed: {e}");
                metrics.diagnostic_cycle("translation_probe", "error");
            }
        }
    }
}

async fn cycle(client: &kube::Client, namespace: &str) -> Result<&'static str, Error> {
    let jobs: Api<TranslationJob> = Api::namespaced(client.clone(), namespace);
    let mut existing = jobs
        .list(&ListParams::default().labels(&format!("{}=true", labels::DIAGNOSTIC)))
        .await?
        .items;
    existing.sort_by(|a, b| {
        let ts = |j: &TranslationJob| j.creation_timestamp().map(|t| t.0);
        ts(b).cmp(&ts(a))
    });

    for stale in existing.iter().skip(KEEP_RECENT) {
        let name = stale.name_any();
        if let Err(e) = jobs.delete(&name, &DeleteParams::default()).await {
            warn!("D_T: failed to garbage-collect {name}: {e}");
        }
    }
    existing.truncate(KEEP_RECENT);

    let newest = existing.first();
    let should_create = match newest {
        None => true,
        Some(job) => match &job.status {
            None => {
                let age = Utc::now().signed_duration_since(
                    job.metadata
                        .creation_timestamp
                        .as_ref()
                        .map(|t| t.0)
                        .unwrap_or_else(Utc::now),
                );
                if age > STUCK_AGE {
                    let name = job.name_any();
                    warn!("D_T: reaping stuck diagnostic job {name}");
                    jobs.delete(&name, &DeleteParams::default()).await?;
                    true
                } else {
                    false
                }
            }
            Some(status) if status.state.is_terminal() => status
                .finished_at
                .as_ref()
                .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
                .map(|finished| Utc::now().signed_duration_since(finished.with_timezone(&Utc)) > COOLDOWN)
                .unwrap_or(true),
            Some(_) => false,
        },
    };

    if !should_create {
        return Ok("skipped");
    }

    create_probe_job(&jobs, namespace).await?;
    Ok("created")
}

async fn create_probe_job(jobs: &Api<TranslationJob>, namespace: &str) -> Result<(), Error> {
    let epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let name = format!("test-starwars-{epoch}");

    let mut job_parameters = std::collections::BTreeMap::new();
    job_parameters.insert(parameters::DIAGNOSTIC.to_string(), "true".to_string());
    job_parameters.insert(parameters::TEST_CONTENT.to_string(), STAR_WARS_CONTENT.to_string());
    job_parameters.insert(parameters::PAGE_TITLE.to_string(), "Star Wars".to_string());

    let mut job_labels = std::collections::BTreeMap::new();
    job_labels.insert(labels::DIAGNOSTIC.to_string(), "true".to_string());

    let job = TranslationJob {
        metadata: kube::api::ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(namespace.to_string()),
            labels: Some(job_labels),
            ..Default::default()
        },
        spec: TranslationJobSpec {
            source: JobSource {
                target_ref: TargetRef {
                    namespace: Some(namespace.to_string()),
                    name: "dummy".to_string(),
                },
                page_id: "dummy".to_string(),
            },
            destination: None,
            pipeline: Pipeline::TektonJob,
            parameters: job_parameters,
        },
        status: None,
    };

    jobs.create(&PostParams::default(), &job).await?;
    info!("D_T: created diagnostic job {name}");
    Ok(())
}
