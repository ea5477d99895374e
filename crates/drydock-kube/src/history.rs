//! Release history reader

use std::sync::Arc;

use crate::error::{PlanError, Result};
use crate::release::Release;
use crate::storage::StorageDriver;

/// Storage driver identities selectable through configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DriverKind {
    /// Kubernetes Secrets (default)
    #[default]
    Secrets,
    /// Kubernetes ConfigMaps
    ConfigMaps,
    /// In-memory; rejected at option validation
    Memory,
}

impl DriverKind {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "" | "secret" | "secrets" => Ok(DriverKind::Secrets),
            "configmap" | "configmaps" => Ok(DriverKind::ConfigMaps),
            "memory" => Ok(DriverKind::Memory),
            other => Err(PlanError::InvalidConfig(format!(
                "unknown release storage driver {:?}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for DriverKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DriverKind::Secrets => "secrets",
            DriverKind::ConfigMaps => "configmaps",
            DriverKind::Memory => "memory",
        };
        write!(f, "{}", s)
    }
}

/// Reads the persisted history of one release identity
pub struct ReleaseHistory {
    name: String,
    namespace: String,
    driver: Arc<dyn StorageDriver>,
}

impl ReleaseHistory {
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        driver: Arc<dyn StorageDriver>,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            driver,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The most recent revision, whatever its status
    pub async fn last_release(&self) -> Result<Option<Release>> {
        let history = self
            .driver
            .history(&self.namespace, &self.name)
            .await
            .map_err(|e| PlanError::Storage(format!("get release history: {}", e)))?;

        Ok(history.into_iter().next_back())
    }

    /// The most recent revision that was successfully deployed
    pub async fn last_deployed_release(&self) -> Result<Option<Release>> {
        let history = self
            .driver
            .history(&self.namespace, &self.name)
            .await
            .map_err(|e| PlanError::Storage(format!("get release history: {}", e)))?;

        Ok(history.into_iter().rev().find(|r| r.deployed()))
    }
}
