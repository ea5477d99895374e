//! Up-to-date comparison between a new release and its predecessor
//!
//! Compares what history stores: values, the releasable resource sets and
//! the chart version. Live cluster state is deliberately out of scope here;
//! drift is the change calculator's concern. A plan is a true no-op only
//! when the release is up to date *and* no changes are planned.

use drydock_core::values::{canonicalize, hex_digest};

use crate::error::Result;
use crate::release::{ReleasableResource, Release};

/// Canonical digest of a releasable resource set, insensitive to order
fn resources_digest(resources: &[ReleasableResource]) -> Result<String> {
    let mut encoded: Vec<Vec<u8>> = resources
        .iter()
        .map(|r| Ok(serde_json::to_vec(&canonicalize(&r.object))?))
        .collect::<Result<_>>()?;
    encoded.sort();

    let mut all = Vec::new();
    for bytes in encoded {
        all.extend_from_slice(&bytes);
        all.push(b'\n');
    }

    Ok(hex_digest(&all))
}

/// True iff the new release is content-identical to the previous one:
/// equal values, equal releasable hook and general sets, equal chart version
pub fn release_up_to_date(prev: &Release, new: &Release) -> Result<bool> {
    if prev.values.digest() != new.values.digest() {
        return Ok(false);
    }

    if resources_digest(&prev.hook_resources)? != resources_digest(&new.hook_resources)? {
        return Ok(false);
    }

    if resources_digest(&prev.general_resources)? != resources_digest(&new.general_resources)? {
        return Ok(false);
    }

    Ok(prev.chart.version == new.chart.version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ScopeMap;
    use crate::resource::{GeneralResource, ResourceOptions};
    use drydock_core::{ChartMetadata, Values};

    fn general(scope_map: &ScopeMap, yaml: &str) -> GeneralResource {
        GeneralResource::new(
            serde_yaml::from_str(yaml).expect("test yaml"),
            ResourceOptions {
                file_path: "templates/test.yaml",
                default_namespace: "prod",
                scope_map,
            },
        )
    }

    fn release(values: &str, chart_version: &str, generals: &[GeneralResource]) -> Release {
        Release::build(
            "rel",
            "prod",
            None,
            Values::from_json(values).unwrap(),
            ChartMetadata::new("web", chart_version).unwrap(),
            &[],
            generals,
            "",
        )
        .unwrap()
    }

    #[test]
    fn test_identical_releases_up_to_date() {
        let scope_map = ScopeMap::with_defaults();
        let cm = || {
            general(
                &scope_map,
                "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cfg\ndata:\n  k: v",
            )
        };

        let prev = release(r#"{"replicas": 2}"#, "1.0.0", &[cm()]);
        let new = release(r#"{"replicas": 2}"#, "1.0.0", &[cm()]);

        assert!(release_up_to_date(&prev, &new).unwrap());
    }

    #[test]
    fn test_changed_values_not_up_to_date() {
        let prev = release(r#"{"replicas": 2}"#, "1.0.0", &[]);
        let new = release(r#"{"replicas": 3}"#, "1.0.0", &[]);

        assert!(!release_up_to_date(&prev, &new).unwrap());
    }

    #[test]
    fn test_changed_chart_version_not_up_to_date() {
        let prev = release("{}", "1.0.0", &[]);
        let new = release("{}", "1.1.0", &[]);

        assert!(!release_up_to_date(&prev, &new).unwrap());
    }

    #[test]
    fn test_changed_resource_not_up_to_date() {
        let scope_map = ScopeMap::with_defaults();
        let prev = release(
            "{}",
            "1.0.0",
            &[general(
                &scope_map,
                "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cfg\ndata:\n  k: old",
            )],
        );
        let new = release(
            "{}",
            "1.0.0",
            &[general(
                &scope_map,
                "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cfg\ndata:\n  k: new",
            )],
        );

        assert!(!release_up_to_date(&prev, &new).unwrap());
    }

    #[test]
    fn test_resource_order_does_not_matter() {
        let scope_map = ScopeMap::with_defaults();
        let a = general(&scope_map, "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: a");
        let b = general(&scope_map, "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: b");

        let prev = release("{}", "1.0.0", &[a.clone(), b.clone()]);
        let new = release("{}", "1.0.0", &[b, a]);

        assert!(release_up_to_date(&prev, &new).unwrap());
    }
}
