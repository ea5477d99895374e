//! Release records: the versioned history entry a plan produces
//!
//! A release stores the *releasable* form of its resources, the lineage
//! without runtime ownership stamps, so that re-planning against history
//! does not see spurious drift.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use drydock_core::{ChartMetadata, Values};

use crate::error::{PlanError, Result};
use crate::identity::ScopeMap;
use crate::resource::{GeneralResource, HookResource, ResourceHandle, ResourceOptions};

/// Lifecycle state of a stored release
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub enum ReleaseStatus {
    /// Planned or being applied, not finished
    Pending,
    /// Successfully deployed
    Deployed,
    /// Apply failed
    Failed,
    /// Replaced by a newer revision
    Superseded,
    /// Uninstall in progress
    Uninstalling,
    /// Uninstalled
    Uninstalled,
}

impl ReleaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseStatus::Pending => "pending",
            ReleaseStatus::Deployed => "deployed",
            ReleaseStatus::Failed => "failed",
            ReleaseStatus::Superseded => "superseded",
            ReleaseStatus::Uninstalling => "uninstalling",
            ReleaseStatus::Uninstalled => "uninstalled",
        }
    }
}

impl std::fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One resource in its releasable form, as persisted in history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleasableResource {
    /// Chart-relative file the resource came from
    pub file_path: String,
    /// The full object
    pub object: JsonValue,
}

impl ReleasableResource {
    pub fn from_resource<R: ResourceHandle>(res: &R) -> Result<Self> {
        Ok(Self {
            file_path: res.file_path().to_string(),
            object: serde_json::to_value(res.object())?,
        })
    }
}

/// A named, versioned record of a planned or deployed chart
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Release {
    pub name: String,
    pub namespace: String,

    /// Revision number, 1-indexed and strictly monotonic per identity
    pub revision: u32,

    pub status: ReleaseStatus,

    /// When revision 1 of this identity was deployed; carried forward on
    /// every upgrade
    pub first_deployed: DateTime<Utc>,

    /// Effective values the chart was rendered with
    pub values: Values,

    pub chart: ChartMetadata,

    /// Releasable hook resources, ID-sorted
    #[serde(default)]
    pub hook_resources: Vec<ReleasableResource>,

    /// Releasable general resources, ID-sorted
    #[serde(default)]
    pub general_resources: Vec<ReleasableResource>,

    #[serde(default)]
    pub notes: String,
}

impl Release {
    /// Assemble the new release record for a plan
    ///
    /// With a previous release the revision increments and firstDeployed is
    /// inherited; without one this is revision 1, first deployed now.
    /// Every new release starts pending.
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        name: impl Into<String>,
        namespace: impl Into<String>,
        prev: Option<&Release>,
        values: Values,
        chart: ChartMetadata,
        hook_resources: &[HookResource],
        general_resources: &[GeneralResource],
        notes: impl Into<String>,
    ) -> Result<Self> {
        let (revision, first_deployed) = match prev {
            Some(p) => (p.revision + 1, p.first_deployed),
            None => (1, Utc::now()),
        };

        let hook_resources = hook_resources
            .iter()
            .map(ReleasableResource::from_resource)
            .collect::<Result<Vec<_>>>()?;
        let general_resources = general_resources
            .iter()
            .map(ReleasableResource::from_resource)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            name: name.into(),
            namespace: namespace.into(),
            revision,
            status: ReleaseStatus::Pending,
            first_deployed,
            values,
            chart,
            hook_resources,
            general_resources,
            notes: notes.into(),
        })
    }

    /// Storage object name for this record
    pub fn storage_key(&self) -> String {
        format!("{}.v{}", self.name, self.revision)
    }

    pub fn failed(&self) -> bool {
        self.status == ReleaseStatus::Failed
    }

    pub fn deployed(&self) -> bool {
        self.status == ReleaseStatus::Deployed
    }

    /// Builder-style status override, mostly for seeding test histories
    pub fn with_status(mut self, status: ReleaseStatus) -> Self {
        self.status = status;
        self
    }

    /// Re-hydrate the stored general resources for processing against a new
    /// plan (they become the previous-release general resources)
    pub fn general_resources_parsed(&self, scope_map: &ScopeMap) -> Result<Vec<GeneralResource>> {
        self.general_resources
            .iter()
            .map(|stored| {
                let obj = serde_json::from_value(stored.object.clone()).map_err(|e| {
                    PlanError::Serialization(format!(
                        "stored resource from {} does not parse: {}",
                        stored.file_path, e
                    ))
                })?;
                Ok(GeneralResource::new(
                    obj,
                    ResourceOptions {
                        file_path: &stored.file_path,
                        default_namespace: &self.namespace,
                        scope_map,
                    },
                ))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ScopeMap;
    use crate::resource::GeneralResource;

    fn chart() -> ChartMetadata {
        ChartMetadata::new("web", "1.0.0").unwrap()
    }

    fn general(scope_map: &ScopeMap, yaml: &str) -> GeneralResource {
        GeneralResource::new(
            serde_yaml::from_str(yaml).expect("test yaml"),
            ResourceOptions {
                file_path: "templates/cm.yaml",
                default_namespace: "prod",
                scope_map,
            },
        )
    }

    #[test]
    fn test_first_release_starts_at_revision_one_pending() {
        let rel = Release::build("rel", "prod", None, Values::new(), chart(), &[], &[], "")
            .unwrap();

        assert_eq!(rel.revision, 1);
        assert_eq!(rel.status, ReleaseStatus::Pending);
        assert_eq!(rel.storage_key(), "rel.v1");
    }

    #[test]
    fn test_upgrade_inherits_first_deployed() {
        let prev = Release::build("rel", "prod", None, Values::new(), chart(), &[], &[], "")
            .unwrap()
            .with_status(ReleaseStatus::Deployed);

        let next = Release::build(
            "rel",
            "prod",
            Some(&prev),
            Values::new(),
            chart(),
            &[],
            &[],
            "",
        )
        .unwrap();

        assert_eq!(next.revision, 2);
        assert_eq!(next.first_deployed, prev.first_deployed);
        assert_eq!(next.status, ReleaseStatus::Pending);
    }

    #[test]
    fn test_general_resources_roundtrip() {
        let scope_map = ScopeMap::with_defaults();
        let cm = general(
            &scope_map,
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cfg\ndata:\n  k: v",
        );

        let rel = Release::build("rel", "prod", None, Values::new(), chart(), &[], &[cm], "")
            .unwrap();
        let parsed = rel.general_resources_parsed(&scope_map).unwrap();

        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].resource_id().name(), "cfg");
        assert_eq!(parsed[0].resource_id().namespace(), "prod");
        assert_eq!(parsed[0].file_path(), "templates/cm.yaml");
    }

    #[test]
    fn test_serde_roundtrip_keeps_status() {
        let rel = Release::build("rel", "prod", None, Values::new(), chart(), &[], &[], "notes")
            .unwrap()
            .with_status(ReleaseStatus::Failed);

        let json = serde_json::to_string(&rel).unwrap();
        let back: Release = serde_json::from_str(&json).unwrap();

        assert_eq!(back.status, ReleaseStatus::Failed);
        assert!(back.failed());
        assert_eq!(back.notes, "notes");
    }
}
