//! Kubernetes Secrets storage driver (default)

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, ListParams};
use kube::Client;

use super::{
    decode_release, history_label_selector, StorageDriver, RELEASE_DATA_KEY, RELEASE_OBJECT_TYPE,
};
use crate::error::{PlanError, Result};
use crate::release::Release;

/// Stores release records in Kubernetes Secrets, one per revision
pub struct SecretsDriver {
    client: Client,
}

impl SecretsDriver {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn parse_secret(secret: &Secret) -> Result<Release> {
        if let Some(type_) = secret.type_.as_deref() {
            if type_ != RELEASE_OBJECT_TYPE {
                return Err(PlanError::Storage(format!(
                    "secret {:?} has unexpected type {:?}",
                    secret.metadata.name.as_deref().unwrap_or("<unnamed>"),
                    type_
                )));
            }
        }

        let data = secret
            .data
            .as_ref()
            .and_then(|d| d.get(RELEASE_DATA_KEY))
            .ok_or_else(|| {
                PlanError::Storage(format!(
                    "secret {:?} has no '{}' data",
                    secret.metadata.name.as_deref().unwrap_or("<unnamed>"),
                    RELEASE_DATA_KEY
                ))
            })?;

        let encoded = std::str::from_utf8(&data.0)
            .map_err(|e| PlanError::Storage(format!("invalid UTF-8 in secret: {}", e)))?;

        decode_release(encoded)
    }
}

#[async_trait]
impl StorageDriver for SecretsDriver {
    async fn get(&self, namespace: &str, name: &str, revision: u32) -> Result<Release> {
        let key = format!("{}.v{}", name, revision);

        match self.api(namespace).get(&key).await {
            Ok(secret) => Self::parse_secret(&secret),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Err(PlanError::ReleaseNotFound {
                name: name.to_string(),
                namespace: namespace.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn history(&self, namespace: &str, name: &str) -> Result<Vec<Release>> {
        let lp = ListParams::default().labels(&history_label_selector(name));
        let secrets = self.api(namespace).list(&lp).await?;

        let mut releases = secrets
            .items
            .iter()
            .map(Self::parse_secret)
            .collect::<Result<Vec<_>>>()?;

        releases.sort_by_key(|r| r.revision);

        Ok(releases)
    }
}
