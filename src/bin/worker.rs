//! Standalone entrypoint for the `Pipeline::TektonJob` dispatch path: one
//! `batch/v1` Job runs this binary once, pointed at a single TranslationJob
//! by `GLOOSCAP_JOB_REF`, then exits.
//!
//! Unlike the in-process `InlineLLM` dispatch, this binary starts with an
//! empty catalogue — it has not run WikiTarget discovery itself. Duplicate
//! and diagnostic-reuse title checks inside `worker::run` therefore degrade
//! to "always create" here; the authoritative duplicate gate is R_J's
//! `Validating` state, which runs against the operator's shared, populated
//! catalogue before any worker is ever dispatched.

use std::env;
use std::str::FromStr;
use std::sync::Arc;

use controller::catalogue::Store;
use controller::translate::client::{TranslateClient, TranslateConfig};
use controller::util::telemetry;
use controller::wiki::factory::WikiClientFactory;
use controller::worker::{self, JobRef, WorkerContext};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init().await;

    let job_ref_raw = env::var("GLOOSCAP_JOB_REF")
        .map_err(|_| anyhow::anyhow!("GLOOSCAP_JOB_REF is required"))?;
    let job_ref = JobRef::from_str(&job_ref_raw)?;

    let client = kube::Client::try_default().await?;

    let mut translate_config = TranslateConfig::default();
    if let Ok(addr) = env::var("GLOOSCAP_TRANSLATE_ADDR") {
        translate_config.address = addr;
    }
    if let Ok(ns) = env::var("GLOOSCAP_NAMESPACE") {
        translate_config.namespace = ns;
    }

    let ctx = WorkerContext {
        client: client.clone(),
        wiki_factory: Arc::new(WikiClientFactory::new(client)),
        translate: Arc::new(TranslateClient::new(translate_config)?),
        catalogue: Arc::new(Store::new()),
    };

    worker::run(job_ref, ctx).await?;
    Ok(())
}
