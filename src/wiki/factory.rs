//! Dependency injection seam (F): maps a WikiTarget plus a secret store to a
//! configured `WikiClient`. Kept separate from the reconcilers so tests can
//! substitute a fake client without reaching into reconciler internals.

use k8s_openapi::api::core::v1::Secret;
use kube::api::Api;
use kube::Client;

use crate::util::errors::{Error, StdError};
use crate::wiki::client::{WikiClient, WikiError};
use crate::wikitarget::types::WikiTarget;

#[derive(Clone)]
pub struct WikiClientFactory {
    client: Client,
}

impl WikiClientFactory {
    pub fn new(client: Client) -> Self {
        WikiClientFactory { client }
    }

    /// Build a `WikiClient` for `target`, resolving its credential secret in
    /// `target`'s own namespace.
    pub async fn build(&self, target: &WikiTarget) -> Result<WikiClient, Error> {
        let namespace = target
            .metadata
            .namespace
            .clone()
            .ok_or_else(|| Error::StdError(StdError::MetadataMissing("namespace".into())))?;

        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), &namespace);
        let secret = secrets
            .get(&target.spec.credential_ref.name)
            .await
            .map_err(|e| Error::StdError(StdError::KubeError(e)))?;

        let key = &target.spec.credential_ref.key;
        let raw = secret
            .data
            .as_ref()
            .and_then(|data| data.get(key))
            .ok_or_else(|| {
                Error::StdError(StdError::MetadataMissing(format!(
                    "secret {}/{} missing key {}",
                    namespace, target.spec.credential_ref.name, key
                )))
            })?;

        let token = String::from_utf8(raw.0.clone())
            .map_err(|e| Error::StdError(StdError::InvalidArgument(e.to_string())))?;

        WikiClient::new(&target.spec.uri, token, target.spec.insecure_skip_tls_verify)
            .map_err(|e: WikiError| Error::StdError(StdError::WikiProtocol(e.to_string())))
    }
}
