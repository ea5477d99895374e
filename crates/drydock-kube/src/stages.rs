//! Stage splitting: partitioning a resource set into totally-ordered
//! weight buckets
//!
//! Ascending weight is the apply order for create/update/apply operations;
//! deletes walk the stages backwards. Execution belongs to the applier; the
//! splitter only orders.

use std::collections::BTreeMap;

use crate::annotations::parse_stage_weight;
use crate::error::Result;
use crate::resource::ResourceHandle;

/// One weight bucket. Order inside a bucket is insertion order.
#[derive(Debug, Clone)]
pub struct Stage<R> {
    pub weight: i64,
    pub resources: Vec<R>,
}

impl<R> Stage<R> {
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

/// Weight buckets in ascending order
#[derive(Debug, Clone, Default)]
pub struct SortedStages<R> {
    stages: Vec<Stage<R>>,
}

impl<R> SortedStages<R> {
    pub fn stages(&self) -> &[Stage<R>] {
        &self.stages
    }

    /// Ascending weight: the order to create, update and apply in
    pub fn apply_order(&self) -> impl Iterator<Item = &Stage<R>> {
        self.stages.iter()
    }

    /// Descending weight: the order to delete in
    pub fn delete_order(&self) -> impl Iterator<Item = &Stage<R>> {
        self.stages.iter().rev()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn resource_count(&self) -> usize {
        self.stages.iter().map(Stage::len).sum()
    }
}

/// Partition resources by their stage weight annotation
///
/// A weight annotation that does not parse as an integer is fatal.
pub fn split<R>(resources: &[R]) -> Result<SortedStages<R>>
where
    R: ResourceHandle + Clone,
{
    let mut buckets: BTreeMap<i64, Vec<R>> = BTreeMap::new();

    for res in resources {
        let weight = parse_stage_weight(&res.annotations())?;
        buckets.entry(weight).or_default().push(res.clone());
    }

    let stages = buckets
        .into_iter()
        .map(|(weight, resources)| Stage { weight, resources })
        .collect();

    Ok(SortedStages { stages })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ScopeMap;
    use crate::resource::{GeneralResource, ResourceOptions};

    fn general(scope_map: &ScopeMap, name: &str, weight: Option<&str>) -> GeneralResource {
        let yaml = match weight {
            Some(w) => format!(
                "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: {}\n  annotations:\n    drydock.io/stage-weight: \"{}\"",
                name, w
            ),
            None => format!("apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: {}", name),
        };
        GeneralResource::new(
            serde_yaml::from_str(&yaml).expect("test yaml"),
            ResourceOptions {
                file_path: "templates/test.yaml",
                default_namespace: "prod",
                scope_map,
            },
        )
    }

    #[test]
    fn test_split_orders_by_weight() {
        let scope_map = ScopeMap::with_defaults();
        let resources = vec![
            general(&scope_map, "late", Some("10")),
            general(&scope_map, "early", Some("-5")),
            general(&scope_map, "mid", None),
        ];

        let stages = split(&resources).unwrap();

        assert_eq!(stages.len(), 3);
        let weights: Vec<i64> = stages.apply_order().map(|s| s.weight).collect();
        assert_eq!(weights, vec![-5, 0, 10]);

        let delete_weights: Vec<i64> = stages.delete_order().map(|s| s.weight).collect();
        assert_eq!(delete_weights, vec![10, 0, -5]);
    }

    #[test]
    fn test_same_weight_keeps_insertion_order() {
        let scope_map = ScopeMap::with_defaults();
        let resources = vec![
            general(&scope_map, "zz", Some("1")),
            general(&scope_map, "aa", Some("1")),
        ];

        let stages = split(&resources).unwrap();

        assert_eq!(stages.len(), 1);
        let names: Vec<&str> = stages.stages()[0]
            .resources
            .iter()
            .map(|r| r.resource_id().name())
            .collect();
        assert_eq!(names, vec!["zz", "aa"]);
    }

    #[test]
    fn test_bad_weight_is_fatal() {
        let scope_map = ScopeMap::with_defaults();
        let resources = vec![general(&scope_map, "bad", Some("heavy"))];

        assert!(split(&resources).is_err());
    }

    #[test]
    fn test_empty_input() {
        let resources: Vec<GeneralResource> = Vec::new();
        let stages = split(&resources).unwrap();
        assert!(stages.is_empty());
        assert_eq!(stages.resource_count(), 0);
    }
}
