//! Transformer pipeline: ordered (match, transform) stages applied to every
//! resource before anything else happens
//!
//! A matching transformer *replaces* the resource with the 0..N objects it
//! returns, so downstream code must never assume input/output cardinality
//! matches. The pipeline is a fold over resource lists, never an in-place
//! edit.

use kube::api::DynamicObject;

use crate::annotations::is_valid_metadata_key;
use crate::error::{PlanError, Result};
use crate::resource::{ManageableBy, ResourceType};

/// What a transformer or patcher sees of a resource
#[derive(Debug, Clone, Copy)]
pub struct ResourceInfo<'a> {
    pub obj: &'a DynamicObject,
    pub resource_type: ResourceType,
    pub manageable_by: ManageableBy,
}

/// A pipeline stage that may expand or rewrite resources pre-release
///
/// Transformation is CPU-bound and synchronous; stages must not block.
pub trait ResourceTransformer: Send + Sync {
    /// Stable name used in error messages
    fn type_name(&self) -> &'static str;

    fn matches(&self, info: &ResourceInfo<'_>) -> Result<bool>;

    /// Replacement objects for a matched resource (fan-out permitted)
    fn transform(&self, info: &ResourceInfo<'_>) -> Result<Vec<DynamicObject>>;
}

/// Expands List/ItemList envelopes into their items
///
/// Always the first stage of every transformer pipeline.
#[derive(Debug, Default)]
pub struct ListExpander;

impl ListExpander {
    pub fn new() -> Self {
        Self
    }
}

impl ResourceTransformer for ListExpander {
    fn type_name(&self) -> &'static str {
        "list-expander"
    }

    fn matches(&self, info: &ResourceInfo<'_>) -> Result<bool> {
        let is_list_kind = info
            .obj
            .types
            .as_ref()
            .map(|tm| tm.kind.ends_with("List"))
            .unwrap_or(false);

        Ok(is_list_kind && info.obj.data.get("items").map_or(false, |v| v.is_array()))
    }

    fn transform(&self, info: &ResourceInfo<'_>) -> Result<Vec<DynamicObject>> {
        let items = info
            .obj
            .data
            .get("items")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        items
            .into_iter()
            .map(|item| {
                serde_json::from_value::<DynamicObject>(item).map_err(|e| {
                    PlanError::InvalidManifest(format!("list item is not a resource: {}", e))
                })
            })
            .collect()
    }
}

/// Drops annotation and label entries whose keys violate the qualified-name
/// syntax, preserving the valid entries
///
/// Always the second stage of every transformer pipeline.
#[derive(Debug, Default)]
pub struct InvalidMetadataCleaner;

impl InvalidMetadataCleaner {
    pub fn new() -> Self {
        Self
    }
}

impl ResourceTransformer for InvalidMetadataCleaner {
    fn type_name(&self) -> &'static str {
        "invalid-metadata-cleaner"
    }

    fn matches(&self, info: &ResourceInfo<'_>) -> Result<bool> {
        let has_invalid = |map: &Option<std::collections::BTreeMap<String, String>>| {
            map.as_ref()
                .map(|m| m.keys().any(|k| !is_valid_metadata_key(k)))
                .unwrap_or(false)
        };

        Ok(has_invalid(&info.obj.metadata.annotations) || has_invalid(&info.obj.metadata.labels))
    }

    fn transform(&self, info: &ResourceInfo<'_>) -> Result<Vec<DynamicObject>> {
        let mut obj = info.obj.clone();

        if let Some(annotations) = obj.metadata.annotations.as_mut() {
            annotations.retain(|k, _| is_valid_metadata_key(k));
        }
        if let Some(labels) = obj.metadata.labels.as_mut() {
            labels.retain(|k, _| is_valid_metadata_key(k));
        }

        Ok(vec![obj])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(yaml: &str) -> DynamicObject {
        serde_yaml::from_str(yaml).expect("test yaml")
    }

    fn info(o: &DynamicObject) -> ResourceInfo<'_> {
        ResourceInfo {
            obj: o,
            resource_type: ResourceType::General,
            manageable_by: ManageableBy::SingleRelease,
        }
    }

    #[test]
    fn test_list_expander_matches_only_lists() {
        let expander = ListExpander::new();

        let list = obj(
            "apiVersion: v1\nkind: ConfigMapList\nitems:\n  - apiVersion: v1\n    kind: ConfigMap\n    metadata:\n      name: a",
        );
        assert!(expander.matches(&info(&list)).unwrap());

        let plain = obj("apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: a");
        assert!(!expander.matches(&info(&plain)).unwrap());
    }

    #[test]
    fn test_list_expander_fan_out() {
        let expander = ListExpander::new();
        let list = obj(
            "apiVersion: v1\nkind: ConfigMapList\nitems:\n  - apiVersion: v1\n    kind: ConfigMap\n    metadata:\n      name: a\n  - apiVersion: v1\n    kind: ConfigMap\n    metadata:\n      name: b",
        );

        let out = expander.transform(&info(&list)).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].metadata.name.as_deref(), Some("a"));
        assert_eq!(out[1].metadata.name.as_deref(), Some("b"));
    }

    #[test]
    fn test_list_expander_empty_list() {
        let expander = ListExpander::new();
        let list = obj("apiVersion: v1\nkind: ConfigMapList\nitems: []");

        let out = expander.transform(&info(&list)).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_metadata_cleaner_drops_invalid_keys() {
        let cleaner = InvalidMetadataCleaner::new();
        let bad = obj(
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cfg\n  annotations:\n    good.io/key: x\n    \"bad key\": y\n  labels:\n    app: web\n    \"another bad\": z",
        );

        assert!(cleaner.matches(&info(&bad)).unwrap());

        let out = cleaner.transform(&info(&bad)).unwrap();
        assert_eq!(out.len(), 1);
        let annotations = out[0].metadata.annotations.as_ref().unwrap();
        assert!(annotations.contains_key("good.io/key"));
        assert!(!annotations.contains_key("bad key"));
        let labels = out[0].metadata.labels.as_ref().unwrap();
        assert!(labels.contains_key("app"));
        assert!(!labels.contains_key("another bad"));
    }

    #[test]
    fn test_metadata_cleaner_skips_clean_objects() {
        let cleaner = InvalidMetadataCleaner::new();
        let clean = obj(
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cfg\n  annotations:\n    good.io/key: x",
        );

        assert!(!cleaner.matches(&info(&clean)).unwrap());
    }
}
