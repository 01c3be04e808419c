//! Worker protocol (X): the one-shot, single-pass job that performs all
//! data-plane I/O for a TranslationJob. Dispatched either in-process
//! (`Pipeline::InlineLLM`) or as a `batch/v1` Kubernetes Job
//! (`Pipeline::TektonJob`); both paths call [`run`] so the protocol has a
//! single implementation regardless of dispatch strategy.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::catalogue::{Store, TargetId};
use crate::translate::client::{Document, Primitive, TranslateClient, TranslateRequestArgs};
use crate::translationjob::types::{
    annotations as job_annotations, parameters, TranslationJob, TranslationJobState,
    DIAGNOSTIC_COLLECTION,
};
use crate::util::errors::{Error, StdError};
use crate::wiki::factory::WikiClientFactory;
use crate::wikitarget::types::WikiTarget;

const FIELD_MANAGER: &str = "glooscap-worker";

/// `<namespace>/<name>` reference to a TranslationJob, handed to a dispatched worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRef {
    pub namespace: String,
    pub name: String,
}

impl fmt::Display for JobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for JobRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (namespace, name) = s
            .split_once('/')
            .ok_or_else(|| Error::StdError(StdError::InvalidArgument(format!("invalid job ref: {s}"))))?;
        Ok(JobRef {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
    }
}

/// Shared, cloneable dependencies a worker needs regardless of where it runs.
#[derive(Clone)]
pub struct WorkerContext {
    pub client: Client,
    pub wiki_factory: Arc<WikiClientFactory>,
    pub translate: Arc<TranslateClient>,
    pub catalogue: Arc<Store>,
}

/// Execute the worker protocol for `job_ref` to completion. Never retries
/// internally; any failure is written to the job's status as `Failed`.
pub async fn run(job_ref: JobRef, ctx: WorkerContext) -> Result<(), Error> {
    let jobs: Api<TranslationJob> = Api::namespaced(ctx.client.clone(), &job_ref.namespace);

    let job = match jobs.get_opt(&job_ref.name).await? {
        Some(job) => job,
        None => {
            warn!("worker: job {job_ref} not found, nothing to do");
            return Ok(());
        }
    };

    if let Err(e) = execute(&job, &jobs, &ctx).await {
        let message = e.to_string();
        warn!("worker: job {job_ref} failed: {message}");
        set_failed(&jobs, &job_ref.name, &message).await?;
        return Err(e);
    }
    Ok(())
}

async fn execute(
    job: &TranslationJob,
    jobs: &Api<TranslationJob>,
    ctx: &WorkerContext,
) -> Result<(), Error> {
    let name = job.metadata.name.clone().unwrap_or_default();

    // Idempotence: a job already sitting in AwaitingApproval for a draft it
    // already produced must not be re-run into creating a second page.
    if job
        .status
        .as_ref()
        .map(|s| s.state == TranslationJobState::AwaitingApproval)
        .unwrap_or(false)
        && job
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(job_annotations::PUBLISHED_PAGE_ID))
            .is_some()
    {
        info!("worker: job {name} already has a draft, skipping duplicate dispatch");
        return Ok(());
    }

    stamp_running(jobs, &name, job).await?;

    let is_diagnostic = crate::translationjob::controller::is_diagnostic(job);
    let is_publish = job
        .spec
        .parameters
        .get(parameters::PUBLISH)
        .map(|v| v == "true")
        .unwrap_or(false);

    if is_publish {
        return run_publish(job, jobs, ctx, &name).await;
    }

    let test_content = job.spec.parameters.get(parameters::TEST_CONTENT);
    let (title, markdown, source_collection) = if is_diagnostic && test_content.map(|c| !c.is_empty()).unwrap_or(false)
    {
        let title = job
            .spec
            .parameters
            .get(parameters::PAGE_TITLE)
            .cloned()
            .unwrap_or_else(|| "Untitled diagnostic".to_string());
        (title, test_content.cloned().unwrap_or_default(), None)
    } else {
        let source_target = fetch_target(&job.spec.source.target_ref, &job.metadata.namespace, ctx).await?;
        let wiki = ctx.wiki_factory.build(&source_target).await?;
        let content = wiki
            .get_page_content(&job.spec.source.page_id)
            .await
            .map_err(|e| Error::StdError(StdError::WikiProtocol(e.to_string())))?;

        // Best-effort: collection is resolved from list metadata; if the list
        // call fails we proceed without a collection id (the destination page
        // lands as a draft). See Open Questions in DESIGN.md.
        let collection = wiki
            .list_pages(None)
            .await
            .ok()
            .and_then(|pages| pages.into_iter().find(|p| p.id == content.id))
            .and_then(|p| p.collection_id);

        (content.title, content.markdown, collection)
    };

    let target_lang = job
        .spec
        .destination
        .as_ref()
        .map(|d| d.language_tag.clone())
        .filter(|tag| !tag.is_empty())
        .unwrap_or_else(|| "fr-CA".to_string());

    let outcome = ctx
        .translate
        .translate(TranslateRequestArgs {
            job_id: name.clone(),
            primitive: Primitive::DocTranslate,
            document: Document {
                title: title.clone(),
                markdown,
                slug: String::new(),
                metadata: HashMap::new(),
            },
            source_lang: "en".to_string(),
            target_lang: target_lang.clone(),
            source_wiki_uri: String::new(),
            page_id: job.spec.source.page_id.clone(),
            page_slug: String::new(),
        })
        .await
        .map_err(|e| Error::StdError(StdError::Translate(e.to_string())))?;

    if !outcome.success {
        return Err(Error::StdError(StdError::Translate(
            outcome.error_message.unwrap_or_else(|| "translation failed".to_string()),
        )));
    }

    let destination_target = match &job.spec.destination {
        Some(dest) => fetch_target(&dest.target_ref, &job.metadata.namespace, ctx)
            .await
            .ok(),
        None => None,
    };

    // Step 6: a diagnostic job with no real destination to write to stops
    // here — the translation service's correctness is what D_T is probing.
    if is_diagnostic && destination_target.is_none() {
        set_completed(
            jobs,
            &name,
            &format!("diagnostic translate succeeded ({} tokens)", outcome.tokens_used),
        )
        .await?;
        return Ok(());
    }

    let destination_target = destination_target.ok_or_else(|| {
        Error::StdError(StdError::Semantic("translation job has no destination target".into()))
    })?;
    let destination_wiki = ctx.wiki_factory.build(&destination_target).await?;

    let prefix = crate::translationjob::title::prefix_for(is_diagnostic);
    let base_title = if outcome.translated_title.is_empty() {
        title
    } else {
        outcome.translated_title
    };
    let destination_id = TargetId::new(
        destination_target.metadata.namespace.clone().unwrap_or_default(),
        destination_target.metadata.name.clone().unwrap_or_default(),
    );
    let target_title = if is_diagnostic {
        crate::translationjob::title::diagnostic_title(&base_title)
    } else {
        crate::translationjob::title::unique_title(prefix, &base_title, &ctx.catalogue, &destination_id).await?
    };

    let collection_id = if is_diagnostic {
        Some(
            destination_wiki
                .get_or_create_collection(DIAGNOSTIC_COLLECTION)
                .await
                .map_err(|e| Error::StdError(StdError::WikiProtocol(e.to_string())))?,
        )
    } else {
        source_collection
    };

    let existing = ctx.catalogue.find_by_title(&destination_id, &target_title).await;

    let page = if is_diagnostic {
        match existing {
            Some(existing_page) => destination_wiki
                .update_page(crate::wiki::client::UpdatePageRequest {
                    id: existing_page.id,
                    title: Some(target_title.clone()),
                    text: append_diagnostic_marker(&outcome.translated_markdown),
                })
                .await
                .map_err(|e| Error::StdError(StdError::WikiProtocol(e.to_string())))?,
            None => destination_wiki
                .create_page(crate::wiki::client::CreatePageRequest {
                    title: target_title.clone(),
                    text: append_diagnostic_marker(&outcome.translated_markdown),
                    collection_id,
                })
                .await
                .map_err(|e| Error::StdError(StdError::WikiProtocol(e.to_string())))?,
        }
    } else {
        destination_wiki
            .create_page(crate::wiki::client::CreatePageRequest {
                title: target_title.clone(),
                text: outcome.translated_markdown,
                collection_id,
            })
            .await
            .map_err(|e| Error::StdError(StdError::WikiProtocol(e.to_string())))?
    };

    stamp_draft(jobs, &name, &page).await
}

async fn run_publish(
    job: &TranslationJob,
    jobs: &Api<TranslationJob>,
    ctx: &WorkerContext,
    name: &str,
) -> Result<(), Error> {
    let page_id = job
        .spec
        .parameters
        .get(parameters::PAGE_ID)
        .ok_or_else(|| Error::StdError(StdError::Validation("publish job missing pageId parameter".into())))?;
    let destination = job
        .spec
        .destination
        .as_ref()
        .ok_or_else(|| Error::StdError(StdError::Validation("publish job missing destination".into())))?;
    let target = fetch_target(&destination.target_ref, &job.metadata.namespace, ctx).await?;
    let wiki = ctx.wiki_factory.build(&target).await?;

    let published = wiki
        .publish_page(page_id)
        .await
        .map_err(|e| Error::StdError(StdError::WikiProtocol(e.to_string())))?;

    let patch = json!({
        "metadata": {
            "annotations": {
                job_annotations::PUBLISHED_PAGE_ID: published.id,
                job_annotations::PUBLISHED_PAGE_SLUG: published.slug,
                job_annotations::PUBLISHED_PAGE_URL: format!("{}/doc/{}", target.spec.uri, published.slug),
                job_annotations::IS_DRAFT: "false",
            }
        },
        "status": { "state": "Completed", "finishedAt": Utc::now().to_rfc3339(), "message": format!("published {}", published.slug) }
    });
    jobs.patch(
        name,
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Apply(patch),
    )
    .await?;
    Ok(())
}

async fn fetch_target(
    target_ref: &crate::wikitarget::types::TargetRef,
    default_namespace: &Option<String>,
    ctx: &WorkerContext,
) -> Result<WikiTarget, Error> {
    let namespace = target_ref
        .namespace
        .clone()
        .or_else(|| default_namespace.clone())
        .ok_or_else(|| Error::StdError(StdError::MetadataMissing("namespace".into())))?;
    let targets: Api<WikiTarget> = Api::namespaced(ctx.client.clone(), &namespace);
    targets.get(&target_ref.name).await.map_err(Error::from)
}

fn append_diagnostic_marker(markdown: &str) -> String {
    format!(
        "{markdown}\n\n---\n_probe run {} at {}_\n",
        Uuid::new_v4(),
        Utc::now().to_rfc3339()
    )
}

async fn stamp_running(jobs: &Api<TranslationJob>, name: &str, job: &TranslationJob) -> Result<(), Error> {
    if job.status.as_ref().map(|s| s.state.clone()) == Some(TranslationJobState::Running) {
        return Ok(());
    }
    let mut status = json!({ "state": "Running" });
    if job.status.as_ref().and_then(|s| s.started_at.as_ref()).is_none() {
        status["startedAt"] = json!(Utc::now().to_rfc3339());
    }
    jobs.patch_status(
        name,
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Apply(json!({ "status": status })),
    )
    .await?;
    Ok(())
}

async fn stamp_draft(
    jobs: &Api<TranslationJob>,
    name: &str,
    page: &crate::wiki::client::PageSummary,
) -> Result<(), Error> {
    let patch = json!({
        "metadata": {
            "annotations": {
                job_annotations::PUBLISHED_PAGE_ID: page.id,
                job_annotations::PUBLISHED_PAGE_SLUG: page.slug,
                job_annotations::PUBLISHED_PAGE_URL: page.slug,
                job_annotations::IS_DRAFT: "true",
            }
        },
        "status": {
            "state": "AwaitingApproval",
            "message": format!("draft ready at {}", page.slug),
        }
    });
    jobs.patch(
        name,
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Apply(patch),
    )
    .await?;
    Ok(())
}

async fn set_completed(jobs: &Api<TranslationJob>, name: &str, message: &str) -> Result<(), Error> {
    jobs.patch_status(
        name,
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Apply(json!({
            "status": { "state": "Completed", "finishedAt": Utc::now().to_rfc3339(), "message": message }
        })),
    )
    .await?;
    Ok(())
}

async fn set_failed(jobs: &Api<TranslationJob>, name: &str, message: &str) -> Result<(), Error> {
    jobs.patch_status(
        name,
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Apply(json!({
            "status": { "state": "Failed", "finishedAt": Utc::now().to_rfc3339(), "message": message }
        })),
    )
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_ref_parses_namespace_and_name() {
        let r: JobRef = "ns/foo".parse().unwrap();
        assert_eq!(r.namespace, "ns");
        assert_eq!(r.name, "foo");
        assert_eq!(r.to_string(), "ns/foo");
    }

    #[test]
    fn job_ref_rejects_missing_slash() {
        let r: Result<JobRef, _> = "no-slash".parse();
        assert!(r.is_err());
    }

}
