//! WikiTarget Reconciler (R_T): periodic discovery into the catalogue (§4.4).

use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::runtime::{
    controller::{Action, Controller},
    events::{Event, EventType, Recorder, Reporter},
    finalizer::{finalizer, Event as Finalizer},
    watcher::Config,
};
use kube::{Client, Resource, ResourceExt};
use serde_json::json;
use tokio::sync::RwLock;
use tokio::time::Duration;
use tracing::{error, field, info, instrument, warn, Span};

use crate::catalogue::{Page, Store, TargetId, TargetMeta};
use crate::util::errors::{Error, StdError};
use crate::util::{metrics, telemetry};
use crate::wiki::client::PageSummary;
use crate::wiki::factory::WikiClientFactory;

use super::types::{WikiTarget, WikiTargetStatus, WIKI_TARGET_FINALIZER};

const FIELD_MANAGER: &str = "glooscap-wikitarget-controller";
const DEFAULT_REQUEUE: Duration = Duration::from_secs(5 * 60);
const ERROR_REQUEUE: Duration = Duration::from_secs(30);

impl WikiTarget {
    async fn reconcile(&self, ctx: Arc<Context>) -> Result<Action, Error> {
        let ns = self
            .namespace()
            .ok_or_else(|| Error::StdError(StdError::MetadataMissing("namespace".into())))?;
        let name = self.name_any();
        let targets: Api<WikiTarget> = Api::namespaced(ctx.client.clone(), &ns);
        let target_id = TargetId::new(ns.clone(), name.clone());

        patch_condition_if_changed(&targets, &name, self, "False", "DiscoveryPending", "discovery starting")
            .await?;

        let wiki = match ctx.wiki_factory.build(self).await {
            Ok(w) => w,
            Err(e) => {
                patch_condition_if_changed(
                    &targets,
                    &name,
                    self,
                    "False",
                    "DiscoveryFailed",
                    &e.to_string(),
                )
                .await?;
                return Err(Error::requeue_after(
                    StdError::InvalidArgument(e.to_string()),
                    ERROR_REQUEUE,
                ));
            }
        };

        let collection_id = self.status.as_ref().and_then(|s| s.collection_id.clone());
        let summaries = match wiki.list_pages(collection_id.as_deref()).await {
            Ok(pages) => pages,
            Err(e) => {
                patch_condition_if_changed(
                    &targets,
                    &name,
                    self,
                    "False",
                    "DiscoveryFailed",
                    &e.to_string(),
                )
                .await?;
                return Err(Error::requeue_after(StdError::WikiNetwork(e.to_string()), ERROR_REQUEUE));
            }
        };

        let pages: Vec<Page> = summaries.iter().map(summary_to_page).collect();
        let meta = TargetMeta {
            id: target_id.clone(),
            mode: self.spec.mode.clone(),
            uri: self.spec.uri.clone(),
        };
        let revision = ctx.catalogue.update(target_id, meta, pages.clone()).await;

        let new_status = WikiTargetStatus {
            last_sync_time: Some(Utc::now().to_rfc3339()),
            catalog_revision: revision.max(self.status.as_ref().map(|s| s.catalog_revision).unwrap_or(1)),
            collection_id,
            conditions: vec![ready_condition(
                "True",
                "DiscoverySucceeded",
                &format!("Discovered {} pages", pages.len()),
                self.metadata.generation,
            )],
        };

        if status_changed(self.status.as_ref(), &new_status) {
            targets
                .patch_status(
                    &name,
                    &PatchParams::apply(FIELD_MANAGER).force(),
                    &Patch::Apply(json!({
                        "apiVersion": "glooscap.dasmlab.org/v1",
                        "kind": "WikiTarget",
                        "status": new_status,
                    })),
                )
                .await?;
        }

        Ok(Action::requeue(DEFAULT_REQUEUE))
    }

    async fn cleanup(&self, ctx: Arc<Context>) -> Result<Action, Error> {
        let recorder = ctx.diagnostics.read().await.recorder(ctx.client.clone(), self);
        recorder
            .publish(Event {
                type_: EventType::Normal,
                reason: "DeleteRequested".into(),
                note: Some(format!("Delete `{}`", self.name_any())),
                action: "Deleting".into(),
                secondary: None,
            })
            .await?;
        Ok(Action::await_change())
    }
}

fn summary_to_page(summary: &PageSummary) -> Page {
    Page {
        id: summary.id.clone(),
        title: summary.title.clone(),
        slug: summary.slug.clone(),
        updated_at: summary.updated_at.clone(),
        language: summary.language.clone(),
        has_assets: false,
        collection: summary.collection_id.clone(),
        is_draft: summary.is_draft,
        is_template: summary.is_template,
    }
}

fn ready_condition(status: &str, reason: &str, message: &str, generation: Option<i64>) -> Condition {
    Condition {
        type_: "Ready".to_string(),
        status: status.to_string(),
        reason: reason.to_string(),
        message: message.to_string(),
        last_transition_time: k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(Utc::now()),
        observed_generation: generation,
    }
}

async fn patch_condition_if_changed(
    targets: &Api<WikiTarget>,
    name: &str,
    target: &WikiTarget,
    status: &str,
    reason: &str,
    message: &str,
) -> Result<(), Error> {
    let current = target
        .status
        .as_ref()
        .and_then(|s| s.conditions.iter().find(|c| c.type_ == "Ready"));
    if let Some(c) = current {
        if c.status == status && c.reason == reason {
            return Ok(());
        }
    }
    targets
        .patch_status(
            name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(json!({
                "apiVersion": "glooscap.dasmlab.org/v1",
                "kind": "WikiTarget",
                "status": {
                    "conditions": [ready_condition(status, reason, message, target.metadata.generation)],
                }
            })),
        )
        .await?;
    Ok(())
}

fn status_changed(old: Option<&WikiTargetStatus>, new: &WikiTargetStatus) -> bool {
    match old {
        None => true,
        Some(old) => {
            old.catalog_revision != new.catalog_revision
                || old.collection_id != new.collection_id
                || old
                    .conditions
                    .first()
                    .map(|c| (&c.status, &c.reason))
                    != new.conditions.first().map(|c| (&c.status, &c.reason))
        }
    }
}

/// State shared between the controller and the web server.
#[derive(Clone)]
pub struct State {
    diagnostics: Arc<RwLock<Diagnostics>>,
    metrics: metrics::Metrics,
    pub catalogue: Arc<Store>,
}

impl State {
    pub fn new(metrics: metrics::Metrics, catalogue: Arc<Store>) -> Self {
        State {
            diagnostics: Arc::new(RwLock::new(Diagnostics::default())),
            metrics,
            catalogue,
        }
    }

    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }

    pub fn to_context(&self, client: Client, wiki_factory: Arc<WikiClientFactory>) -> Arc<Context> {
        Arc::new(Context {
            client,
            metrics: self.metrics.clone(),
            diagnostics: self.diagnostics.clone(),
            catalogue: self.catalogue.clone(),
            wiki_factory,
        })
    }
}

pub struct Context {
    pub client: Client,
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    pub metrics: metrics::Metrics,
    pub catalogue: Arc<Store>,
    pub wiki_factory: Arc<WikiClientFactory>,
}

#[instrument(skip(ctx, target), fields(trace_id))]
pub async fn reconcile(target: Arc<WikiTarget>, ctx: Arc<Context>) -> Result<Action, Error> {
    let trace_id = telemetry::get_trace_id();
    Span::current().record("trace_id", field::display(&trace_id));
    let _timer = ctx.metrics.count_and_measure("wikitarget");
    ctx.diagnostics.write().await.last_event = Utc::now();

    let ns = target
        .namespace()
        .ok_or_else(|| Error::StdError(StdError::MetadataMissing("namespace".into())))?;
    let api: Api<WikiTarget> = Api::namespaced(ctx.client.clone(), &ns);

    info!("Reconciling WikiTarget \"{}\" in {}", target.name_any(), ns);

    finalizer(&api, WIKI_TARGET_FINALIZER, target.clone(), |event| async {
        match event {
            Finalizer::Apply(target) => target.reconcile(ctx.clone()).await,
            Finalizer::Cleanup(target) => target.cleanup(ctx.clone()).await,
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
            reporter: "glooscap-wikitarget-controller".into(),
        }
    }
}

impl Diagnostics {
    fn recorder(&self, client: Client, target: &WikiTarget) -> Recorder {
        Recorder::new(client, self.reporter.clone(), target.object_ref(&()))
    }
}

fn error_policy(target: Arc<WikiTarget>, error: &Error, ctx: Arc<Context>) -> Action {
    warn!("wikitarget reconcile failed: {:?}", error);
    ctx.metrics.reconcile_failure(target.as_ref(), error);
    match error {
        Error::ErrorWithRequeue(e) => Action::requeue(e.duration),
        _ => Action::requeue(ERROR_REQUEUE),
    }
}

pub async fn run(client: Client, state: State, wiki_factory: Arc<WikiClientFactory>) {
    let targets = Api::<WikiTarget>::all(client.clone());
    if let Err(e) = targets.list(&ListParams::default().limit(1)).await {
        error!("WikiTarget CRD is not queryable; {e:?}. Is the CRD installed?");
        info!("Installation: cargo run --bin crdgen | kubectl apply -f -");
        std::process::exit(1);
    }

    Controller::new(targets, Config::default().any_semantic())
        .shutdown_on_signal()
        .run(reconcile, error_policy, state.to_context(client, wiki_factory))
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .await;
}
