//! Patcher pipeline: ordered (match, patch) stages producing the releasable
//! and deployable resource lineages
//!
//! Patchers mutate a deep copy of the incoming object lazily: the first
//! matching patcher triggers one copy, subsequent patchers within the same
//! resource reuse it. An unmatched resource keeps sharing its object with
//! its input.

use std::collections::BTreeMap;
use std::sync::Arc;

use kube::api::DynamicObject;

use crate::annotations::{self, AnnotationMap};
use crate::error::Result;
use crate::resource::ResourceType;
use crate::transform::ResourceInfo;

/// A pipeline stage mutating resources for one lineage
///
/// Patching is CPU-bound and synchronous; stages must not block.
pub trait ResourcePatcher: Send + Sync {
    /// Stable name used in error messages
    fn type_name(&self) -> &'static str;

    fn matches(&self, info: &ResourceInfo<'_>) -> Result<bool>;

    /// Mutate the (already deep-copied) object in place
    fn patch(&self, obj: &mut DynamicObject, resource_type: ResourceType) -> Result<()>;
}

/// Run a patch stack over one object, copying lazily
///
/// Returns `None` when nothing matched, so the caller can keep the original
/// `Arc` and preserve object identity for the unchanged heuristic.
pub fn apply_patch_stack(
    obj: &Arc<DynamicObject>,
    resource_type: ResourceType,
    manageable_by: crate::resource::ManageableBy,
    patchers: &[Box<dyn ResourcePatcher>],
) -> Result<Option<DynamicObject>> {
    let mut copied: Option<DynamicObject> = None;

    for patcher in patchers {
        let current: &DynamicObject = copied.as_ref().unwrap_or(obj);
        let info = ResourceInfo {
            obj: current,
            resource_type,
            manageable_by,
        };

        let matched = patcher.matches(&info).map_err(|e| {
            crate::error::PlanError::Processing(format!(
                "error matching for patching by {:?}: {}",
                patcher.type_name(),
                e
            ))
        })?;
        if !matched {
            continue;
        }

        let target = copied.get_or_insert_with(|| (**obj).clone());
        patcher.patch(target, resource_type).map_err(|e| {
            crate::error::PlanError::Processing(format!(
                "error patching by {:?}: {}",
                patcher.type_name(),
                e
            ))
        })?;
    }

    Ok(copied)
}

/// Stamps owning-release labels and annotations onto deployable resources
///
/// Always the first patcher in every deployable stack. Releasable stacks
/// never carry it: history must stay free of runtime ownership noise.
#[derive(Debug, Clone)]
pub struct ReleaseMetadataPatcher {
    release_name: String,
    release_namespace: String,
}

impl ReleaseMetadataPatcher {
    pub fn new(release_name: impl Into<String>, release_namespace: impl Into<String>) -> Self {
        Self {
            release_name: release_name.into(),
            release_namespace: release_namespace.into(),
        }
    }
}

impl ResourcePatcher for ReleaseMetadataPatcher {
    fn type_name(&self) -> &'static str {
        "release-metadata"
    }

    fn matches(&self, _info: &ResourceInfo<'_>) -> Result<bool> {
        Ok(true)
    }

    fn patch(&self, obj: &mut DynamicObject, _resource_type: ResourceType) -> Result<()> {
        let labels = obj.metadata.labels.get_or_insert_with(BTreeMap::new);
        labels.insert(
            annotations::MANAGED_BY_LABEL.to_string(),
            annotations::MANAGED_BY_VALUE.to_string(),
        );

        let annos = obj.metadata.annotations.get_or_insert_with(BTreeMap::new);
        annos.insert(
            annotations::drydock::RELEASE_NAME.to_string(),
            self.release_name.clone(),
        );
        annos.insert(
            annotations::drydock::RELEASE_NAMESPACE.to_string(),
            self.release_namespace.clone(),
        );

        Ok(())
    }
}

/// Adds caller-supplied annotations and labels to every resource
///
/// Used for the static extra metadata on both lineages, and again with the
/// runtime-only annotations merged in on the deployable stacks.
#[derive(Debug, Clone, Default)]
pub struct ExtraMetadataPatcher {
    annotations: AnnotationMap,
    labels: BTreeMap<String, String>,
}

impl ExtraMetadataPatcher {
    pub fn new(annotations: AnnotationMap, labels: BTreeMap<String, String>) -> Self {
        Self {
            annotations,
            labels,
        }
    }
}

impl ResourcePatcher for ExtraMetadataPatcher {
    fn type_name(&self) -> &'static str {
        "extra-metadata"
    }

    fn matches(&self, _info: &ResourceInfo<'_>) -> Result<bool> {
        Ok(!self.annotations.is_empty() || !self.labels.is_empty())
    }

    fn patch(&self, obj: &mut DynamicObject, _resource_type: ResourceType) -> Result<()> {
        if !self.annotations.is_empty() {
            let annos = obj.metadata.annotations.get_or_insert_with(BTreeMap::new);
            for (k, v) in &self.annotations {
                annos.insert(k.clone(), v.clone());
            }
        }
        if !self.labels.is_empty() {
            let labels = obj.metadata.labels.get_or_insert_with(BTreeMap::new);
            for (k, v) in &self.labels {
                labels.insert(k.clone(), v.clone());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ManageableBy;

    fn obj(yaml: &str) -> Arc<DynamicObject> {
        Arc::new(serde_yaml::from_str(yaml).expect("test yaml"))
    }

    #[test]
    fn test_release_metadata_patcher_stamps_ownership() {
        let source = obj("apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cfg");
        let patchers: Vec<Box<dyn ResourcePatcher>> =
            vec![Box::new(ReleaseMetadataPatcher::new("rel", "prod"))];

        let patched = apply_patch_stack(
            &source,
            ResourceType::General,
            ManageableBy::SingleRelease,
            &patchers,
        )
        .unwrap()
        .expect("release metadata always matches");

        assert_eq!(
            patched.metadata.labels.as_ref().unwrap().get("app.kubernetes.io/managed-by"),
            Some(&"drydock".to_string())
        );
        assert_eq!(
            patched.metadata.annotations.as_ref().unwrap().get("drydock.io/release-name"),
            Some(&"rel".to_string())
        );
        // The source object is untouched.
        assert!(source.metadata.labels.is_none());
    }

    #[test]
    fn test_unmatched_stack_returns_none() {
        let source = obj("apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cfg");
        let patchers: Vec<Box<dyn ResourcePatcher>> =
            vec![Box::new(ExtraMetadataPatcher::default())];

        let result = apply_patch_stack(
            &source,
            ResourceType::General,
            ManageableBy::SingleRelease,
            &patchers,
        )
        .unwrap();

        assert!(result.is_none());
    }

    #[test]
    fn test_single_copy_across_multiple_patchers() {
        let source = obj("apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cfg");

        let mut extra_annos = AnnotationMap::new();
        extra_annos.insert("team.io/owner".to_string(), "platform".to_string());
        let patchers: Vec<Box<dyn ResourcePatcher>> = vec![
            Box::new(ReleaseMetadataPatcher::new("rel", "prod")),
            Box::new(ExtraMetadataPatcher::new(extra_annos, BTreeMap::new())),
        ];

        let patched = apply_patch_stack(
            &source,
            ResourceType::General,
            ManageableBy::SingleRelease,
            &patchers,
        )
        .unwrap()
        .unwrap();

        let annos = patched.metadata.annotations.as_ref().unwrap();
        assert!(annos.contains_key("drydock.io/release-name"));
        assert!(annos.contains_key("team.io/owner"));
    }

    #[test]
    fn test_extra_metadata_overrides_existing_values() {
        let source = obj(
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cfg\n  labels:\n    tier: old",
        );

        let mut labels = BTreeMap::new();
        labels.insert("tier".to_string(), "new".to_string());
        let patchers: Vec<Box<dyn ResourcePatcher>> =
            vec![Box::new(ExtraMetadataPatcher::new(AnnotationMap::new(), labels))];

        let patched = apply_patch_stack(
            &source,
            ResourceType::General,
            ManageableBy::SingleRelease,
            &patchers,
        )
        .unwrap()
        .unwrap();

        assert_eq!(
            patched.metadata.labels.as_ref().unwrap().get("tier"),
            Some(&"new".to_string())
        );
    }
}
