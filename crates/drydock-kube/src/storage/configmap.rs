//! Kubernetes ConfigMaps storage driver
//!
//! Same record format as the Secrets driver, for clusters where release
//! payloads are not considered sensitive.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{Api, ListParams};
use kube::Client;

use super::{decode_release, history_label_selector, StorageDriver, RELEASE_DATA_KEY};
use crate::error::{PlanError, Result};
use crate::release::Release;

/// Stores release records in ConfigMaps, one per revision
pub struct ConfigMapsDriver {
    client: Client,
}

impl ConfigMapsDriver {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn parse_configmap(cm: &ConfigMap) -> Result<Release> {
        let encoded = cm
            .data
            .as_ref()
            .and_then(|d| d.get(RELEASE_DATA_KEY))
            .ok_or_else(|| {
                PlanError::Storage(format!(
                    "configmap {:?} has no '{}' data",
                    cm.metadata.name.as_deref().unwrap_or("<unnamed>"),
                    RELEASE_DATA_KEY
                ))
            })?;

        decode_release(encoded)
    }
}

#[async_trait]
impl StorageDriver for ConfigMapsDriver {
    async fn get(&self, namespace: &str, name: &str, revision: u32) -> Result<Release> {
        let key = format!("{}.v{}", name, revision);

        match self.api(namespace).get(&key).await {
            Ok(cm) => Self::parse_configmap(&cm),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Err(PlanError::ReleaseNotFound {
                name: name.to_string(),
                namespace: namespace.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn history(&self, namespace: &str, name: &str) -> Result<Vec<Release>> {
        let lp = ListParams::default().labels(&history_label_selector(name));
        let configmaps = self.api(namespace).list(&lp).await?;

        let mut releases = configmaps
            .items
            .iter()
            .map(Self::parse_configmap)
            .collect::<Result<Vec<_>>>()?;

        releases.sort_by_key(|r| r.revision);

        Ok(releases)
    }
}
