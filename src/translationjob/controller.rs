//! TranslationJob Reconciler (R_J): the job state machine (§4.5).
//!
//! R_J itself performs no data-plane I/O against wikis or the translation
//! service — it only drives `status.state` forward and dispatches the
//! worker (X), which does that I/O out of process or in a spawned task.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use kube::api::{Api, ListParams, Patch, PatchParams, PostParams};
use kube::runtime::{
    controller::{Action, Controller},
    events::{Recorder, Reporter},
    finalizer::{finalizer, Event as Finalizer},
    watcher::Config,
};
use kube::{Client, Resource, ResourceExt};
use serde_json::json;
use tokio::sync::RwLock;
use tokio::time::Duration;
use tracing::{error, field, info, instrument, warn, Span};

use crate::catalogue::{Store, TargetId};
use crate::translate::client::TranslateClient;
use crate::util::errors::{Error, StdError};
use crate::util::{metrics, telemetry};
use crate::wiki::factory::WikiClientFactory;
use crate::wikitarget::types::{WikiTarget, WikiTargetMode};
use crate::worker::{self, JobRef, WorkerContext};

use super::resources::{dispatch_job_name, worker_job};
use super::types::{
    annotations, labels, parameters, DuplicateInfo, Pipeline, TranslationJob, TranslationJobState,
    TRANSLATION_JOB_FINALIZER,
};

const FIELD_MANAGER: &str = "glooscap-translationjob-controller";
const DEFAULT_REQUEUE: Duration = Duration::from_secs(10);
const WAITING_REQUEUE: Duration = Duration::from_secs(30);
const GC_REQUEUE: Duration = Duration::from_secs(15 * 60);
const ERROR_REQUEUE: Duration = Duration::from_secs(30);
const WORKER_DEADLINE: StdDuration = StdDuration::from_secs(30 * 60);

const DIAGNOSTIC_GC_AGE: chrono::Duration = chrono::Duration::hours(1);
const FAILED_GC_AGE: chrono::Duration = chrono::Duration::hours(24);
const COMPLETED_GC_AGE: chrono::Duration = chrono::Duration::hours(48);

impl TranslationJob {
    async fn reconcile(&self, ctx: Arc<Context>) -> Result<Action, Error> {
        let ns = self
            .namespace()
            .ok_or_else(|| Error::StdError(StdError::MetadataMissing("namespace".into())))?;
        let name = self.name_any();
        let jobs: Api<TranslationJob> = Api::namespaced(ctx.client.clone(), &ns);

        let state = self
            .status
            .as_ref()
            .map(|s| s.state.clone())
            .unwrap_or_default();

        match state {
            TranslationJobState::Queued => start_validating(&jobs, &name).await,
            TranslationJobState::Validating => validate(self, &jobs, &name, &ctx).await,
            TranslationJobState::AwaitingApproval => await_approval(self, &jobs, &name).await,
            TranslationJobState::FetchingContent => dispatch(self, &jobs, &name, &ctx).await,
            TranslationJobState::Dispatching => check_dispatched(self, &ctx).await,
            TranslationJobState::Running => check_running(self).await,
            TranslationJobState::Publishing => check_publishing(self, &jobs, &name, &ctx).await,
            TranslationJobState::Completed | TranslationJobState::Failed => garbage_collect(self, &jobs).await,
        }
    }

    async fn cleanup(&self, ctx: Arc<Context>) -> Result<Action, Error> {
        let recorder = ctx.diagnostics.read().await.recorder(ctx.client.clone(), self);
        recorder
            .publish(kube::runtime::events::Event {
                type_: kube::runtime::events::EventType::Normal,
                reason: "DeleteRequested".into(),
                note: Some(format!("Delete `{}`", self.name_any())),
                action: "Deleting".into(),
                secondary: None,
            })
            .await?;
        Ok(Action::await_change())
    }
}

async fn patch_status(jobs: &Api<TranslationJob>, name: &str, status: serde_json::Value) -> Result<Action, Error> {
    jobs.patch_status(
        name,
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Apply(json!({ "status": status })),
    )
    .await?;
    Ok(Action::requeue(DEFAULT_REQUEUE))
}

async fn start_validating(jobs: &Api<TranslationJob>, name: &str) -> Result<Action, Error> {
    patch_status(
        jobs,
        name,
        json!({ "state": "Validating", "startedAt": Utc::now().to_rfc3339() }),
    )
    .await
}

pub(crate) fn is_diagnostic(job: &TranslationJob) -> bool {
    job.metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(labels::DIAGNOSTIC))
        .map(|v| v == "true")
        .unwrap_or(false)
        || job
            .spec
            .parameters
            .get(parameters::DIAGNOSTIC)
            .map(|v| v == "true")
            .unwrap_or(false)
}

fn is_publish(job: &TranslationJob) -> bool {
    job.spec
        .parameters
        .get(parameters::PUBLISH)
        .map(|v| v == "true")
        .unwrap_or(false)
}

/// Validation and duplicate pre-check (§4.5 "Validating"). Publish jobs skip
/// both checks: they write a single already-approved page, not a new
/// translation, so there is nothing to deduplicate or template-check.
async fn validate(
    job: &TranslationJob,
    jobs: &Api<TranslationJob>,
    name: &str,
    ctx: &Context,
) -> Result<Action, Error> {
    if is_publish(job) {
        return patch_status(jobs, name, json!({ "state": "FetchingContent" })).await;
    }

    let source_id = TargetId::new(
        job.spec
            .source
            .target_ref
            .namespace
            .clone()
            .or_else(|| job.metadata.namespace.clone())
            .ok_or_else(|| Error::StdError(StdError::MetadataMissing("namespace".into())))?,
        job.spec.source.target_ref.name.clone(),
    );
    let source_page = ctx.catalogue.get(&source_id).await.and_then(|entry| {
        entry
            .pages
            .into_iter()
            .find(|p| p.id == job.spec.source.page_id)
    });

    if let Some(page) = &source_page {
        if page.is_template {
            return patch_status(
                jobs,
                name,
                json!({ "state": "Failed", "finishedAt": Utc::now().to_rfc3339(), "message": "source page is a template" }),
            )
            .await;
        }
    }

    let destination_ref = job
        .spec
        .destination
        .as_ref()
        .map(|d| d.target_ref.clone())
        .unwrap_or_else(|| job.spec.source.target_ref.clone());
    let destination_namespace = destination_ref
        .namespace
        .clone()
        .or_else(|| job.metadata.namespace.clone())
        .ok_or_else(|| Error::StdError(StdError::MetadataMissing("namespace".into())))?;
    let targets: Api<WikiTarget> = Api::namespaced(ctx.client.clone(), &destination_namespace);
    let destination = targets.get(&destination_ref.name).await?;

    if destination.spec.mode == WikiTargetMode::ReadOnly {
        return patch_status(
            jobs,
            name,
            json!({ "state": "Failed", "finishedAt": Utc::now().to_rfc3339(), "message": "destination target does not allow writes" }),
        )
        .await;
    }

    if is_diagnostic(job) {
        return patch_status(jobs, name, json!({ "state": "FetchingContent" })).await;
    }

    let destination_id = TargetId::new(destination_namespace, destination_ref.name.clone());
    let base_title = source_page
        .as_ref()
        .map(|p| p.title.clone())
        .or_else(|| job.spec.parameters.get(parameters::PAGE_TITLE).cloned())
        .unwrap_or_else(|| job.spec.source.page_id.clone());
    let prefix = job
        .spec
        .parameters
        .get(parameters::PREFIX)
        .cloned()
        .unwrap_or_else(|| super::title::prefix_for(false).to_string());
    let candidate_title = super::title::base_title(&prefix, &base_title);

    if job
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(annotations::APPROVE_DUPLICATE))
        .map(|v| v == "true")
        .unwrap_or(false)
    {
        return patch_status(jobs, name, json!({ "state": "FetchingContent" })).await;
    }

    if let Some(existing) = ctx.catalogue.find_by_title(&destination_id, &candidate_title).await {
        let duplicate = DuplicateInfo {
            page_title: candidate_title,
            page_uri: format!("{}/doc/{}", destination.spec.uri, existing.slug),
            page_id: existing.id,
        };
        return patch_status(
            jobs,
            name,
            json!({ "state": "AwaitingApproval", "duplicateInfo": duplicate }),
        )
        .await;
    }

    patch_status(jobs, name, json!({ "state": "FetchingContent" })).await
}

/// `AwaitingApproval` is reached via two unrelated paths that share a state
/// name: a pre-publish duplicate-title gate (`duplicateInfo` set) and a
/// post-translation draft review (`is-draft` annotation set by the worker).
async fn await_approval(
    job: &TranslationJob,
    jobs: &Api<TranslationJob>,
    name: &str,
) -> Result<Action, Error> {
    let has_duplicate_info = job
        .status
        .as_ref()
        .and_then(|s| s.duplicate_info.as_ref())
        .is_some();

    if has_duplicate_info {
        let approved = job
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(annotations::APPROVE_DUPLICATE))
            .map(|v| v == "true")
            .unwrap_or(false);
        if approved {
            return patch_status(
                jobs,
                name,
                json!({ "state": "FetchingContent", "duplicateInfo": null }),
            )
            .await;
        }
        return Ok(Action::requeue(WAITING_REQUEUE));
    }

    let is_draft = job
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(annotations::IS_DRAFT))
        .map(|v| v == "true")
        .unwrap_or(false);
    if !is_draft {
        return Ok(Action::requeue(WAITING_REQUEUE));
    }

    let approved = job
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(annotations::APPROVE_TRANSLATION))
        .map(|v| v == "true")
        .unwrap_or(false);
    if !approved {
        return Ok(Action::requeue(WAITING_REQUEUE));
    }

    let publish_name = format!("{name}-publish");
    let existing = jobs.get_opt(&publish_name).await?;
    if existing.is_none() {
        create_publish_job(job, jobs, &publish_name).await?;
    }
    patch_status(jobs, name, json!({ "state": "Publishing" })).await
}

async fn create_publish_job(
    job: &TranslationJob,
    jobs: &Api<TranslationJob>,
    publish_name: &str,
) -> Result<(), Error> {
    let page_id = job
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(annotations::PUBLISHED_PAGE_ID))
        .cloned()
        .ok_or_else(|| Error::StdError(StdError::Semantic("draft job missing published-page-id annotation".into())))?;

    let mut job_parameters = std::collections::BTreeMap::new();
    job_parameters.insert(parameters::PUBLISH.to_string(), "true".to_string());
    job_parameters.insert(parameters::PAGE_ID.to_string(), page_id);
    job_parameters.insert(parameters::ORIGINAL_JOB.to_string(), job.name_any());

    let publish_job = TranslationJob {
        metadata: kube::api::ObjectMeta {
            name: Some(publish_name.to_string()),
            namespace: job.metadata.namespace.clone(),
            owner_references: job.controller_owner_ref(&()).map(|o| vec![o]),
            ..Default::default()
        },
        spec: super::types::TranslationJobSpec {
            source: job.spec.source.clone(),
            destination: job.spec.destination.clone(),
            pipeline: job.spec.pipeline.clone(),
            parameters: job_parameters,
        },
        status: None,
    };

    jobs.create(&PostParams::default(), &publish_job).await?;
    Ok(())
}

/// FetchingContent's sole action is to spawn the worker; the actual content
/// fetch happens inside the worker, not here (§4.5/§4.6).
async fn dispatch(job: &TranslationJob, jobs: &Api<TranslationJob>, name: &str, ctx: &Context) -> Result<Action, Error> {
    match job.spec.pipeline {
        Pipeline::InlineLLM => {
            let job_ref = JobRef {
                namespace: job.metadata.namespace.clone().unwrap_or_default(),
                name: name.to_string(),
            };
            let worker_ctx = WorkerContext {
                client: ctx.client.clone(),
                wiki_factory: ctx.wiki_factory.clone(),
                translate: ctx.translate.clone(),
                catalogue: ctx.catalogue.clone(),
            };
            tokio::spawn(async move {
                match tokio::time::timeout(WORKER_DEADLINE, worker::run(job_ref.clone(), worker_ctx)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!("inline worker for {job_ref} failed: {e}"),
                    Err(_) => warn!("inline worker for {job_ref} exceeded its deadline"),
                }
            });
        }
        Pipeline::TektonJob => {
            let batch_jobs: Api<k8s_openapi::api::batch::v1::Job> =
                Api::namespaced(ctx.client.clone(), &job.metadata.namespace.clone().unwrap_or_default());
            let dispatch_name = dispatch_job_name(job);
            if batch_jobs.get_opt(&dispatch_name).await?.is_none() {
                let oref = job
                    .controller_owner_ref(&())
                    .ok_or_else(|| Error::StdError(StdError::MetadataMissing("uid".into())))?;
                batch_jobs.create(&PostParams::default(), &worker_job(job, oref)).await?;
            }
        }
    }

    patch_status(jobs, name, json!({ "state": "Dispatching" })).await
}

/// Waits for the worker to become visible; once it is, the worker itself
/// drives `status.state` to `Running` and beyond, so there is nothing else
/// to do here but keep the object alive in the queue.
async fn check_dispatched(job: &TranslationJob, ctx: &Context) -> Result<Action, Error> {
    if job.spec.pipeline == Pipeline::TektonJob {
        let batch_jobs: Api<k8s_openapi::api::batch::v1::Job> =
            Api::namespaced(ctx.client.clone(), &job.metadata.namespace.clone().unwrap_or_default());
        if batch_jobs.get_opt(&dispatch_job_name(job)).await?.is_none() {
            warn!("worker Job for {} not yet visible", job.name_any());
        }
    }
    Ok(Action::requeue(WAITING_REQUEUE))
}

async fn check_running(job: &TranslationJob) -> Result<Action, Error> {
    let started = job
        .status
        .as_ref()
        .and_then(|s| s.started_at.as_ref())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok());
    if let Some(started) = started {
        let elapsed = Utc::now().signed_duration_since(started.with_timezone(&Utc));
        if elapsed > chrono::Duration::from_std(WORKER_DEADLINE).unwrap() {
            warn!(
                "translation job {} has been Running past its worker deadline",
                job.name_any()
            );
        }
    }
    Ok(Action::requeue(WAITING_REQUEUE))
}

async fn check_publishing(job: &TranslationJob, jobs: &Api<TranslationJob>, name: &str, ctx: &Context) -> Result<Action, Error> {
    let publish_name = format!("{name}-publish");
    let publish_jobs: Api<TranslationJob> =
        Api::namespaced(ctx.client.clone(), &job.metadata.namespace.clone().unwrap_or_default());
    let publish_job = match publish_jobs.get_opt(&publish_name).await? {
        Some(p) => p,
        None => return Ok(Action::requeue(WAITING_REQUEUE)),
    };

    match publish_job.status.as_ref().map(|s| s.state.clone()) {
        Some(TranslationJobState::Completed) => {
            let mut patch_annotations = serde_json::Map::new();
            if let Some(anns) = &publish_job.metadata.annotations {
                for key in [
                    annotations::PUBLISHED_PAGE_ID,
                    annotations::PUBLISHED_PAGE_SLUG,
                    annotations::PUBLISHED_PAGE_URL,
                ] {
                    if let Some(v) = anns.get(key) {
                        patch_annotations.insert(key.to_string(), json!(v));
                    }
                }
            }
            patch_annotations.insert(annotations::IS_DRAFT.to_string(), json!("false"));
            jobs.patch(
                name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(json!({ "metadata": { "annotations": patch_annotations } })),
            )
            .await?;
            patch_status(
                jobs,
                name,
                json!({ "state": "Completed", "finishedAt": Utc::now().to_rfc3339(), "message": "published" }),
            )
            .await
        }
        Some(TranslationJobState::Failed) => {
            let message = publish_job
                .status
                .as_ref()
                .and_then(|s| s.message.clone())
                .unwrap_or_else(|| "publish job failed".to_string());
            patch_status(
                jobs,
                name,
                json!({ "state": "Failed", "finishedAt": Utc::now().to_rfc3339(), "message": message }),
            )
            .await
        }
        _ => Ok(Action::requeue(WAITING_REQUEUE)),
    }
}

/// Terminal jobs are deleted after an age threshold that depends on outcome
/// and whether the job is a diagnostic probe (§4.5/§8).
async fn garbage_collect(job: &TranslationJob, jobs: &Api<TranslationJob>) -> Result<Action, Error> {
    let finished = job
        .status
        .as_ref()
        .and_then(|s| s.finished_at.as_ref())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok());
    let Some(finished) = finished else {
        return Ok(Action::requeue(GC_REQUEUE));
    };
    let age = Utc::now().signed_duration_since(finished.with_timezone(&Utc));

    let state = job.status.as_ref().map(|s| s.state.clone()).unwrap_or_default();
    let threshold = if is_diagnostic(job) {
        DIAGNOSTIC_GC_AGE
    } else if state == TranslationJobState::Failed {
        FAILED_GC_AGE
    } else {
        COMPLETED_GC_AGE
    };

    if age >= threshold {
        jobs.delete(&job.name_any(), &kube::api::DeleteParams::default()).await?;
        return Ok(Action::await_change());
    }
    Ok(Action::requeue(GC_REQUEUE))
}

/// State shared between the controller and the web server.
#[derive(Clone)]
pub struct State {
    diagnostics: Arc<RwLock<Diagnostics>>,
    metrics: metrics::Metrics,
}

impl State {
    pub fn new(metrics: metrics::Metrics) -> Self {
        State {
            diagnostics: Arc::new(RwLock::new(Diagnostics::default())),
            metrics,
        }
    }

    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }

    pub fn to_context(
        &self,
        client: Client,
        catalogue: Arc<Store>,
        wiki_factory: Arc<WikiClientFactory>,
        translate: Arc<TranslateClient>,
    ) -> Arc<Context> {
        Arc::new(Context {
            client,
            metrics: self.metrics.clone(),
            diagnostics: self.diagnostics.clone(),
            catalogue,
            wiki_factory,
            translate,
        })
    }
}

pub struct Context {
    pub client: Client,
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    pub metrics: metrics::Metrics,
    pub catalogue: Arc<Store>,
    pub wiki_factory: Arc<WikiClientFactory>,
    pub translate: Arc<TranslateClient>,
}

#[instrument(skip(ctx, job), fields(trace_id))]
pub async fn reconcile(job: Arc<TranslationJob>, ctx: Arc<Context>) -> Result<Action, Error> {
    let trace_id = telemetry::get_trace_id();
    Span::current().record("trace_id", field::display(&trace_id));
    let _timer = ctx.metrics.count_and_measure("translationjob");
    ctx.diagnostics.write().await.last_event = Utc::now();

    let ns = job
        .namespace()
        .ok_or_else(|| Error::StdError(StdError::MetadataMissing("namespace".into())))?;
    let api: Api<TranslationJob> = Api::namespaced(ctx.client.clone(), &ns);

    info!("Reconciling TranslationJob \"{}\" in {}", job.name_any(), ns);

    finalizer(&api, TRANSLATION_JOB_FINALIZER, job.clone(), |event| async {
        match event {
            Finalizer::Apply(job) => job.reconcile(ctx.clone()).await,
            Finalizer::Cleanup(job) => job.cleanup(ctx.clone()).await,
        }
    })
    .await
    .map_err(|e| Error::StdError(StdError::FinalizerError(Box::new(e))))
}

#[derive(Clone, serde::Serialize)]
pub struct Diagnostics {
    pub last_event: chrono::DateTime<Utc>,
    #[serde(skip)]
    pub reporter: Reporter,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Diagnostics {
            last_event: Utc::now(),
            reporter: "glooscap-translationjob-controller".into(),
        }
    }
}

impl Diagnostics {
    fn recorder(&self, client: Client, job: &TranslationJob) -> Recorder {
        Recorder::new(client, self.reporter.clone(), job.object_ref(&()))
    }
}

fn error_policy(job: Arc<TranslationJob>, error: &Error, ctx: Arc<Context>) -> Action {
    warn!("translationjob reconcile failed: {:?}", error);
    ctx.metrics.reconcile_failure(job.as_ref(), error);
    match error {
        Error::ErrorWithRequeue(e) => Action::requeue(e.duration),
        _ => Action::requeue(ERROR_REQUEUE),
    }
}

pub async fn run(
    client: Client,
    state: State,
    catalogue: Arc<Store>,
    wiki_factory: Arc<WikiClientFactory>,
    translate: Arc<TranslateClient>,
) {
    let jobs = Api::<TranslationJob>::all(client.clone());
    if let Err(e) = jobs.list(&ListParams::default().limit(1)).await {
        error!("TranslationJob CRD is not queryable; {e:?}. Is the CRD installed?");
        info!("Installation: cargo run --bin crdgen | kubectl apply -f -");
        std::process::exit(1);
    }

    let ctx = state.to_context(client.clone(), catalogue, wiki_factory, translate);
    Controller::new(jobs, Config::default().any_semantic())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translationjob::types::{JobSource, TranslationJobSpec};
    use crate::wikitarget::types::TargetRef;

    fn base_job() -> TranslationJob {
        TranslationJob {
            metadata: kube::api::ObjectMeta {
                name: Some("t1".into()),
                namespace: Some("ns".into()),
                ..Default::default()
            },
            spec: TranslationJobSpec {
                source: JobSource {
                    target_ref: TargetRef {
                        namespace: Some("ns".into()),
                        name: "src".into(),
                    },
                    page_id: "p1".into(),
                },
                destination: None,
                pipeline: Pipeline::InlineLLM,
                parameters: Default::default(),
            },
            status: None,
        }
    }

    #[test]
    fn is_diagnostic_checks_label_and_parameter() {
        let mut job = base_job();
        assert!(!is_diagnostic(&job));
        job.spec.parameters.insert(parameters::DIAGNOSTIC.into(), "true".into());
        assert!(is_diagnostic(&job));
    }

    #[test]
    fn is_publish_checks_parameter() {
        let mut job = base_job();
        assert!(!is_publish(&job));
        job.spec.parameters.insert(parameters::PUBLISH.into(), "true".into());
        assert!(is_publish(&job));
    }
}
