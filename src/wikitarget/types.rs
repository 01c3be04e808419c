use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub static WIKI_TARGET_FINALIZER: &str = "wikitarget.glooscap.dasmlab.org";

/// Write permission granted by a WikiTarget's credential.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
pub enum WikiTargetMode {
    ReadOnly,
    ReadWrite,
    PushOnly,
}

impl Default for WikiTargetMode {
    fn default() -> Self {
        WikiTargetMode::ReadOnly
    }
}

/// Reference to the external secret holding the wiki API token.
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[cfg_attr(test, derive(Default))]
pub struct CredentialRef {
    pub name: String,
    #[serde(default = "default_credential_key")]
    pub key: String,
}

fn default_credential_key() -> String {
    "token".to_string()
}

/// Periodic discovery configuration.
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
pub struct SyncSpec {
    #[serde(default = "default_sync_interval_seconds")]
    pub interval_seconds: u64,
}

impl Default for SyncSpec {
    fn default() -> Self {
        SyncSpec {
            interval_seconds: default_sync_interval_seconds(),
        }
    }
}

pub fn default_sync_interval_seconds() -> u64 {
    5 * 60
}

/// Reference to another WikiTarget, possibly in a different namespace.
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[cfg_attr(test, derive(Default))]
pub struct TargetRef {
    pub namespace: Option<String>,
    pub name: String,
}

/// Defaults applied to translation jobs whose source is this target.
#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema)]
pub struct TranslationDefaults {
    pub destination_target_ref: Option<TargetRef>,
    #[serde(default = "default_language_tag")]
    pub default_language_tag: String,
    pub path_prefix: Option<String>,
}

pub fn default_language_tag() -> String {
    "fr-CA".to_string()
}

/// Generate the Kubernetes wrapper struct `WikiTarget` from our Spec and Status struct.
///
/// This provides a hook for generating the CRD yaml (in crdgen.rs).
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[cfg_attr(test, derive(Default))]
#[kube(
    kind = "WikiTarget",
    group = "glooscap.dasmlab.org",
    version = "v1",
    namespaced
)]
#[kube(status = "WikiTargetStatus", shortname = "wt")]
pub struct WikiTargetSpec {
    pub uri: String,
    pub credential_ref: CredentialRef,
    #[serde(default)]
    pub mode: WikiTargetMode,
    #[serde(default)]
    pub insecure_skip_tls_verify: bool,
    #[serde(default)]
    pub sync: SyncSpec,
    #[serde(default)]
    pub translation_defaults: TranslationDefaults,
}

/// The status object of `WikiTarget`.
#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema)]
pub struct WikiTargetStatus {
    pub last_sync_time: Option<String>,
    #[serde(default = "default_catalog_revision")]
    pub catalog_revision: u64,
    pub collection_id: Option<String>,
    #[schemars(schema_with = "conditions_schema")]
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

pub fn default_catalog_revision() -> u64 {
    1
}

/// Diagnostic annotation keys mutated exclusively by the wiki-write probe (D_W).
pub mod annotations {
    pub const DIAGNOSTIC_MASTER_KEY: &str = "glooscap.dasmlab.org/diagnostic-master-key";
    pub const DIAGNOSTIC_LAST_PAGE_ID: &str = "glooscap.dasmlab.org/diagnostic-last-page-id";
}

pub fn conditions_schema(_: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
    serde_json::from_value(serde_json::json!({
        "type": "array",
        "x-kubernetes-list-type": "map",
        "x-kubernetes-list-map-keys": ["type"],
        "items": {
            "type": "object",
            "properties": {
                "lastTransitionTime": { "format": "date-time", "type": "string" },
                "message": { "type": "string" },
                "observedGeneration": { "type": "integer", "format": "int64", "default": 0 },
                "reason": { "type": "string" },
                "status": { "type": "string" },
                "type": { "type": "string" }
            },
            "required": ["lastTransitionTime", "message", "reason", "status", "type"],
        },
    }))
    .unwrap()
}
