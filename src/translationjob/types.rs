use crate::wikitarget::types::TargetRef;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub static TRANSLATION_JOB_FINALIZER: &str = "translationjob.glooscap.dasmlab.org";

/// Selects the strategy R_J uses to dispatch the one-shot worker (X).
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
pub enum Pipeline {
    InlineLLM,
    TektonJob,
}

impl Default for Pipeline {
    fn default() -> Self {
        Pipeline::InlineLLM
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[cfg_attr(test, derive(Default))]
pub struct JobSource {
    pub target_ref: TargetRef,
    pub page_id: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
pub struct JobDestination {
    pub target_ref: TargetRef,
    pub language_tag: String,
}

/// Generate the Kubernetes wrapper struct `TranslationJob` from our Spec and Status struct.
///
/// This provides a hook for generating the CRD yaml (in crdgen.rs).
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[cfg_attr(test, derive(Default))]
#[kube(
    kind = "TranslationJob",
    group = "glooscap.dasmlab.org",
    version = "v1",
    namespaced
)]
#[kube(status = "TranslationJobStatus", shortname = "tj")]
pub struct TranslationJobSpec {
    pub source: JobSource,
    pub destination: Option<JobDestination>,
    #[serde(default)]
    pub pipeline: Pipeline,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

/// The state machine position of a TranslationJob, per the reconciler design.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
pub enum TranslationJobState {
    Queued,
    Validating,
    AwaitingApproval,
    FetchingContent,
    Dispatching,
    Running,
    Publishing,
    Completed,
    Failed,
}

impl Default for TranslationJobState {
    fn default() -> Self {
        TranslationJobState::Queued
    }
}

impl TranslationJobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TranslationJobState::Completed | TranslationJobState::Failed)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
pub struct DuplicateInfo {
    pub page_title: String,
    pub page_uri: String,
    pub page_id: String,
}

/// The status object of `TranslationJob`.
#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema)]
pub struct TranslationJobStatus {
    #[serde(default)]
    pub state: TranslationJobState,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub message: Option<String>,
    pub duplicate_info: Option<DuplicateInfo>,
}

/// Annotation keys used for approval signals, publish metadata, and diagnostic labels.
pub mod annotations {
    pub const APPROVE_DUPLICATE: &str = "glooscap.dasmlab.org/approve-duplicate";
    pub const APPROVE_TRANSLATION: &str = "glooscap.dasmlab.org/approve-translation";
    pub const PUBLISHED_PAGE_ID: &str = "glooscap.dasmlab.org/published-page-id";
    pub const PUBLISHED_PAGE_SLUG: &str = "glooscap.dasmlab.org/published-page-slug";
    pub const PUBLISHED_PAGE_URL: &str = "glooscap.dasmlab.org/published-page-url";
    pub const IS_DRAFT: &str = "glooscap.dasmlab.org/is-draft";
}

pub mod labels {
    pub const DIAGNOSTIC: &str = "glooscap.dasmlab.org/diagnostic";
}

/// Well-known `spec.parameters` keys, documented here since the CRD schema
/// treats `parameters` as a free-form string map.
pub mod parameters {
    pub const DIAGNOSTIC: &str = "diagnostic";
    pub const TEST_CONTENT: &str = "testContent";
    pub const PUBLISH: &str = "publish";
    pub const PAGE_ID: &str = "pageId";
    pub const PREFIX: &str = "prefix";
    pub const PAGE_TITLE: &str = "pageTitle";
    pub const ORIGINAL_JOB: &str = "originalJob";
}

pub const TITLE_PREFIX_TRANSLATED: &str = "AUTOTRANSLATED";
pub const TITLE_PREFIX_DIAGNOSTIC: &str = "AUTODIAG";
pub const DIAGNOSTIC_COLLECTION: &str = "GLOOSCAP-DIAG";
pub const MAX_TITLE_SUFFIX_ATTEMPTS: u32 = 100;
