//! Resource normalization for comparison
//!
//! Live objects accumulate server-managed noise (managedFields, status,
//! revision counters) and drydock's own ownership stamps. Stripping all of
//! it before comparing lets the unchanged heuristic and the drift digest
//! see only the content the chart actually controls.

use kube::api::DynamicObject;
use serde_json::Value as JsonValue;

use drydock_core::values::{canonicalize, hex_digest};

use crate::annotations;

/// Metadata fields the API server owns
const SERVER_MANAGED_METADATA_FIELDS: &[&str] = &[
    "managedFields",
    "resourceVersion",
    "uid",
    "generation",
    "creationTimestamp",
    "selfLink",
    "deletionTimestamp",
    "deletionGracePeriodSeconds",
    "ownerReferences",
];

/// Annotations stripped before comparison (tooling and release metadata)
const IGNORED_ANNOTATIONS: &[&str] = &[
    "kubectl.kubernetes.io/last-applied-configuration",
    "deployment.kubernetes.io/revision",
    annotations::drydock::RELEASE_NAME,
    annotations::drydock::RELEASE_NAMESPACE,
];

/// Labels stripped before comparison
const IGNORED_LABELS: &[&str] = &[annotations::MANAGED_BY_LABEL];

/// Canonical noise-free JSON form of a resource
pub fn normalized(obj: &DynamicObject) -> JsonValue {
    let mut value = serde_json::to_value(obj).unwrap_or(JsonValue::Null);

    if let Some(root) = value.as_object_mut() {
        root.remove("status");

        if let Some(JsonValue::Object(metadata)) = root.get_mut("metadata") {
            for field in SERVER_MANAGED_METADATA_FIELDS {
                metadata.remove(*field);
            }

            strip_keys(metadata, "annotations", IGNORED_ANNOTATIONS);
            strip_keys(metadata, "labels", IGNORED_LABELS);
        }
    }

    canonicalize(&value)
}

fn strip_keys(metadata: &mut serde_json::Map<String, JsonValue>, field: &str, ignored: &[&str]) {
    let remove_whole = match metadata.get_mut(field) {
        Some(JsonValue::Object(map)) => {
            for key in ignored {
                map.remove(*key);
            }
            map.is_empty()
        }
        Some(JsonValue::Null) => true,
        _ => false,
    };

    // Absent and empty must compare equal.
    if remove_whole {
        metadata.remove(field);
    }
}

/// Whether two objects are byte-identical after noise stripping
pub fn objects_equivalent(a: &DynamicObject, b: &DynamicObject) -> bool {
    normalized(a) == normalized(b)
}

/// Hash of the normalized form, used as the live drift marker
pub fn drift_digest(obj: &DynamicObject) -> String {
    let bytes = serde_json::to_vec(&normalized(obj)).unwrap_or_default();
    hex_digest(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(yaml: &str) -> DynamicObject {
        serde_yaml::from_str(yaml).expect("test yaml")
    }

    #[test]
    fn test_server_noise_is_stripped() {
        let desired = obj("apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cfg\ndata:\n  k: v");
        let live = obj(
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cfg\n  uid: abc-123\n  resourceVersion: \"42\"\n  creationTimestamp: \"2026-01-01T00:00:00Z\"\ndata:\n  k: v\nstatus:\n  phase: Active",
        );

        assert!(objects_equivalent(&desired, &live));
        assert_eq!(drift_digest(&desired), drift_digest(&live));
    }

    #[test]
    fn test_release_metadata_is_noise() {
        let bare = obj("apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cfg\ndata:\n  k: v");
        let stamped = obj(
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cfg\n  labels:\n    app.kubernetes.io/managed-by: drydock\n  annotations:\n    drydock.io/release-name: rel\n    drydock.io/release-namespace: prod\ndata:\n  k: v",
        );

        assert!(objects_equivalent(&bare, &stamped));
    }

    #[test]
    fn test_content_difference_detected() {
        let a = obj("apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cfg\ndata:\n  k: v1");
        let b = obj("apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cfg\ndata:\n  k: v2");

        assert!(!objects_equivalent(&a, &b));
        assert_ne!(drift_digest(&a), drift_digest(&b));
    }

    #[test]
    fn test_chart_level_labels_still_compared() {
        let a = obj(
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cfg\n  labels:\n    tier: web",
        );
        let b = obj(
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cfg\n  labels:\n    tier: db",
        );

        assert!(!objects_equivalent(&a, &b));
    }
}
