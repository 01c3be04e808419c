//! Wiki-Write Diagnostic (D_W, §4.8): exercises write capability against
//! every `ReadWrite` WikiTarget on a timer, proving credentials and network
//! reachability independently of any user-triggered TranslationJob.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::{Client, ResourceExt};
use rand::RngCore;
use serde_json::json;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::catalogue::TargetId;
use crate::util::errors::{Error, StdError};
use crate::util::metrics::Metrics;
use crate::wiki::client::{CreatePageRequest, UpdatePageRequest};
use crate::wiki::factory::WikiClientFactory;
use crate::wikitarget::types::{annotations, WikiTarget, WikiTargetMode};

const DEFAULT_CYCLE_INTERVAL: Duration = Duration::from_secs(5 * 60);
const CONFIG_MAP_NAME: &str = "glooscap-config";
const CONFIG_MAP_KEY: &str = "diagnostic-write-enabled";
const FIELD_MANAGER: &str = "glooscap-wiki-write-probe";

pub struct WikiWriteProbe {
    client: Client,
    operator_namespace: String,
    wiki_factory: Arc<WikiClientFactory>,
    metrics: Metrics,
    processing: Mutex<HashSet<TargetId>>,
    last_page_cache: RwLock<HashMap<TargetId, String>>,
}

impl WikiWriteProbe {
    pub fn new(client: Client, operator_namespace: String, wiki_factory: Arc<WikiClientFactory>, metrics: Metrics) -> Arc<Self> {
        Arc::new(WikiWriteProbe {
            client,
            operator_namespace,
            wiki_factory,
            metrics,
            processing: Mutex::new(HashSet::new()),
            last_page_cache: RwLock::new(HashMap::new()),
        })
    }

    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(DEFAULT_CYCLE_INTERVAL);
        loop {
            interval.tick().await;
            match self.cycle().await {
                Ok(outcome) => {
                    info!("D_W cycle: {outcome}");
                    self.metrics.diagnostic_cycle("wiki_write_probe", outcome);
                }
                Err(e) => {
                    warn!("D_W cycle failed: {e}");
                    self.metrics.diagnostic_cycle("wiki_write_probe", "error");
                }
            }
        }
    }

    async fn cycle(&self) -> Result<&'static str, Error> {
        if !self.write_enabled().await? {
            return Ok("disabled");
        }

        let targets: Api<WikiTarget> = Api::all(self.client.clone());
        let candidates: Vec<WikiTarget> = targets
            .list(&ListParams::default())
            .await?
            .items
            .into_iter()
            .filter(|t| t.spec.mode == WikiTargetMode::ReadWrite)
            .collect();

        for target in candidates {
            let id = TargetId::new(
                target.metadata.namespace.clone().unwrap_or_default(),
                target.name_any(),
            );
            if !self.processing.lock().await.insert(id.clone()) {
                continue;
            }
            let result = self.process_target(&target, &id).await;
            self.processing.lock().await.remove(&id);
            if let Err(e) = result {
                warn!("D_W: target {id} failed: {e}");
            }
        }
        Ok("ran")
    }

    async fn write_enabled(&self) -> Result<bool, Error> {
        let config_maps: Api<ConfigMap> = Api::namespaced(self.client.clone(), &self.operator_namespace);
        match config_maps.get_opt(CONFIG_MAP_NAME).await? {
            Some(cm) => Ok(cm
                .data
                .as_ref()
                .and_then(|d| d.get(CONFIG_MAP_KEY))
                .map(|v| v != "false")
                .unwrap_or(true)),
            None => Ok(true),
        }
    }

    async fn process_target(&self, target: &WikiTarget, id: &TargetId) -> Result<(), Error> {
        let targets: Api<WikiTarget> = Api::namespaced(self.client.clone(), &id.namespace);
        let master_key = match target
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(annotations::DIAGNOSTIC_MASTER_KEY))
        {
            Some(key) => key.clone(),
            None => {
                let key = generate_master_key();
                targets
                    .patch(
                        &id.name,
                        &PatchParams::apply(FIELD_MANAGER).force(),
                        &Patch::Merge(json!({
                            "metadata": { "annotations": { annotations::DIAGNOSTIC_MASTER_KEY: key } }
                        })),
                    )
                    .await?;
                key
            }
        };

        let wiki = self.wiki_factory.build(target).await?;
        let content = probe_content();

        let cached_id = self.last_page_cache.read().await.get(id).cloned();
        let last_page_id = cached_id.or_else(|| {
            target
                .metadata
                .annotations
                .as_ref()
                .and_then(|a| a.get(annotations::DIAGNOSTIC_LAST_PAGE_ID))
                .cloned()
        });

        if let Some(page_id) = &last_page_id {
            let updated = wiki
                .update_page(UpdatePageRequest {
                    id: page_id.clone(),
                    title: Some(master_key.clone()),
                    text: content.clone(),
                })
                .await;
            if updated.is_ok() {
                self.last_page_cache.write().await.insert(id.clone(), page_id.clone());
                return Ok(());
            }
        }

        let created = wiki
            .create_page(CreatePageRequest {
                title: master_key,
                text: content,
                collection_id: None,
            })
            .await
            .map_err(|e| Error::StdError(StdError::WikiProtocol(e.to_string())))?;

        self.last_page_cache.write().await.insert(id.clone(), created.id.clone());
        targets
            .patch(
                &id.name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Merge(json!({
                    "metadata": { "annotations": { annotations::DIAGNOSTIC_LAST_PAGE_ID: created.id } }
                })),
            )
            .await?;
        Ok(())
    }
}

fn generate_master_key() -> String {
    let mut bytes = [0u8; 3];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("GLOODIAG TEST {}", hex::encode(bytes))
}

fn probe_content() -> String {
    format!(
        "Diagnostic write probe.\n\nrun: {}\nat: {}\n",
        uuid::Uuid::new_v4(),
        Utc::now().to_rfc3339()
    )
}
