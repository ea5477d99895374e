//! Change calculation: what the release would do to the live cluster
//!
//! Every desired resource lands in exactly one bucket. Previous-release
//! resources the new release no longer manages become deletes, unless their
//! live object asks to be kept.

use std::collections::HashSet;

use crate::annotations;
use crate::identity::ResourceID;
use crate::live::DeployableInfo;
use crate::normalize::objects_equivalent;
use crate::resource::{GeneralResource, HookResource, ResourceHandle, StandaloneCrd};

/// When a failed previous release upgrades updates into recreates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VolatilityPolicy {
    /// Never recreate because of a failed previous release (default)
    #[default]
    Never,
    /// Recreate resources annotated `drydock.io/volatile: "true"`
    ByAnnotation,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeCalculatorOptions {
    /// The previous release ended in the failed state
    pub prev_release_failed: bool,
    pub volatility: VolatilityPolicy,
}

/// The classified outcome of a plan
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    /// No live counterpart; will be created
    pub created: Vec<ResourceID>,
    /// Will be deleted and created again
    pub recreated: Vec<ResourceID>,
    /// Will be patched with a client-computed merge
    pub updated: Vec<ResourceID>,
    /// Will be handed to the server for a three-way apply
    pub applied: Vec<ResourceID>,
    /// Managed by the previous release only; will be removed
    pub deleted: Vec<ResourceID>,
    /// Identical to live state after noise stripping
    pub unchanged: Vec<ResourceID>,
    /// Any of the five acting buckets is non-empty
    pub changes_planned: bool,
}

impl ChangeSet {
    fn planned_count(&self) -> usize {
        self.created.len()
            + self.recreated.len()
            + self.updated.len()
            + self.applied.len()
            + self.deleted.len()
    }

    /// Human-readable one-liner for the caller's change log
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        for (count, verb) in [
            (self.created.len(), "to create"),
            (self.recreated.len(), "to recreate"),
            (self.updated.len(), "to update"),
            (self.applied.len(), "to apply"),
            (self.deleted.len(), "to delete"),
            (self.unchanged.len(), "unchanged"),
        ] {
            if count > 0 {
                parts.push(format!("{} {}", count, verb));
            }
        }
        if parts.is_empty() {
            "No changes planned".to_string()
        } else {
            parts.join(", ")
        }
    }
}

enum Classified {
    Create,
    Recreate,
    Update,
    Apply,
    Unchanged,
}

fn classify<R: ResourceHandle>(
    info: &DeployableInfo<R>,
    opts: &ChangeCalculatorOptions,
) -> Classified {
    let Some(live) = info.live() else {
        return Classified::Create;
    };

    let desired_annotations = info.resource.annotations();

    let volatile_recreate = opts.prev_release_failed
        && opts.volatility == VolatilityPolicy::ByAnnotation
        && annotations::is_volatile(&desired_annotations);
    if annotations::wants_recreate(&desired_annotations) || volatile_recreate {
        return Classified::Recreate;
    }

    if objects_equivalent(info.resource.object(), live) {
        return Classified::Unchanged;
    }

    if annotations::server_side_apply(&desired_annotations) {
        Classified::Apply
    } else {
        Classified::Update
    }
}

fn bucket<R: ResourceHandle>(
    set: &mut ChangeSet,
    infos: &[DeployableInfo<R>],
    opts: &ChangeCalculatorOptions,
) {
    for info in infos {
        let id = info.resource.resource_id().clone();
        match classify(info, opts) {
            Classified::Create => set.created.push(id),
            Classified::Recreate => set.recreated.push(id),
            Classified::Update => set.updated.push(id),
            Classified::Apply => set.applied.push(id),
            Classified::Unchanged => set.unchanged.push(id),
        }
    }
}

/// Classify every resource of the plan
pub fn calculate_planned_changes(
    standalone_crd_infos: &[DeployableInfo<StandaloneCrd>],
    hook_infos: &[DeployableInfo<HookResource>],
    general_infos: &[DeployableInfo<GeneralResource>],
    prev_release_general_infos: &[DeployableInfo<GeneralResource>],
    opts: &ChangeCalculatorOptions,
) -> ChangeSet {
    let mut set = ChangeSet::default();

    bucket(&mut set, standalone_crd_infos, opts);
    bucket(&mut set, hook_infos, opts);
    bucket(&mut set, general_infos, opts);

    let desired_ids: HashSet<String> = standalone_crd_infos
        .iter()
        .map(|i| i.resource.resource_id().id())
        .chain(hook_infos.iter().map(|i| i.resource.resource_id().id()))
        .chain(general_infos.iter().map(|i| i.resource.resource_id().id()))
        .collect();

    for info in prev_release_general_infos {
        let id = info.resource.resource_id();
        if desired_ids.contains(&id.id()) {
            continue;
        }

        // Nothing live means nothing to delete.
        let Some(live) = info.live() else {
            continue;
        };

        let live_annotations = live.metadata.annotations.clone().unwrap_or_default();
        if annotations::keep_on_delete(&live_annotations) {
            continue;
        }

        set.deleted.push(id.clone());
    }

    set.changes_planned = set.planned_count() > 0;

    set
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ScopeMap;
    use crate::live::DeployableInfo;
    use crate::resource::{GeneralResource, ResourceOptions};
    use kube::api::DynamicObject;
    use std::collections::HashSet as StdHashSet;

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

    fn with_live(res: GeneralResource, live_yaml: &str) -> DeployableInfo<GeneralResource> {
        let live: DynamicObject = serde_yaml::from_str(live_yaml).expect("test yaml");
        DeployableInfo::for_tests(res, Some(live))
    }

    fn without_live(res: GeneralResource) -> DeployableInfo<GeneralResource> {
        DeployableInfo::for_tests(res, None)
    }

    #[test]
    fn test_missing_live_is_create() {
        let scope_map = ScopeMap::with_defaults();
        let res = general(&scope_map, "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cfg");

        let set = calculate_planned_changes(
            &[],
            &[],
            &[without_live(res)],
            &[],
            &ChangeCalculatorOptions::default(),
        );

        assert_eq!(set.created.len(), 1);
        assert!(set.changes_planned);
    }

    #[test]
    fn test_drifted_live_is_update() {
        let scope_map = ScopeMap::with_defaults();
        let res = general(
            &scope_map,
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cfg\ndata:\n  k: new",
        );
        let info = with_live(
            res,
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cfg\n  namespace: prod\ndata:\n  k: old",
        );

        let set =
            calculate_planned_changes(&[], &[], &[info], &[], &ChangeCalculatorOptions::default());

        assert_eq!(set.updated.len(), 1);
        assert!(set.created.is_empty());
        assert!(set.changes_planned);
    }

    #[test]
    fn test_identical_live_is_unchanged() {
        let scope_map = ScopeMap::with_defaults();
        let res = general(
            &scope_map,
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cfg\ndata:\n  k: v",
        );
        let info = with_live(
            res,
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cfg\n  namespace: prod\n  uid: live-uid\ndata:\n  k: v",
        );

        let set =
            calculate_planned_changes(&[], &[], &[info], &[], &ChangeCalculatorOptions::default());

        assert_eq!(set.unchanged.len(), 1);
        assert!(!set.changes_planned);
    }

    #[test]
    fn test_recreate_annotation_wins() {
        let scope_map = ScopeMap::with_defaults();
        let res = general(
            &scope_map,
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cfg\n  annotations:\n    drydock.io/recreate: \"true\"\ndata:\n  k: v",
        );
        let info = with_live(
            res,
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cfg\n  namespace: prod\ndata:\n  k: v",
        );

        let set =
            calculate_planned_changes(&[], &[], &[info], &[], &ChangeCalculatorOptions::default());

        assert_eq!(set.recreated.len(), 1);
        assert!(set.unchanged.is_empty());
    }

    #[test]
    fn test_server_side_apply_opt_in() {
        let scope_map = ScopeMap::with_defaults();
        let res = general(
            &scope_map,
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cfg\n  annotations:\n    drydock.io/apply-strategy: server-side\ndata:\n  k: new",
        );
        let info = with_live(
            res,
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cfg\n  namespace: prod\ndata:\n  k: old",
        );

        let set =
            calculate_planned_changes(&[], &[], &[info], &[], &ChangeCalculatorOptions::default());

        assert_eq!(set.applied.len(), 1);
        assert!(set.updated.is_empty());
    }

    #[test]
    fn test_volatile_recreate_requires_opt_in() {
        let scope_map = ScopeMap::with_defaults();
        let make_info = || {
            let res = general(
                &scope_map,
                "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cfg\n  annotations:\n    drydock.io/volatile: \"true\"\ndata:\n  k: v",
            );
            with_live(
                res,
                "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cfg\n  namespace: prod\ndata:\n  k: v",
            )
        };

        // Default policy never recreates, even after a failed release.
        let conservative = calculate_planned_changes(
            &[],
            &[],
            &[make_info()],
            &[],
            &ChangeCalculatorOptions {
                prev_release_failed: true,
                volatility: VolatilityPolicy::Never,
            },
        );
        assert!(conservative.recreated.is_empty());
        assert_eq!(conservative.unchanged.len(), 1);

        let opted_in = calculate_planned_changes(
            &[],
            &[],
            &[make_info()],
            &[],
            &ChangeCalculatorOptions {
                prev_release_failed: true,
                volatility: VolatilityPolicy::ByAnnotation,
            },
        );
        assert_eq!(opted_in.recreated.len(), 1);
    }

    #[test]
    fn test_orphans_deleted_unless_kept() {
        let scope_map = ScopeMap::with_defaults();

        let orphan_a = general(
            &scope_map,
            "apiVersion: v1\nkind: Secret\nmetadata:\n  name: old-a",
        );
        let orphan_a = with_live(
            orphan_a,
            "apiVersion: v1\nkind: Secret\nmetadata:\n  name: old-a\n  namespace: prod",
        );

        let orphan_b = general(
            &scope_map,
            "apiVersion: v1\nkind: Secret\nmetadata:\n  name: old-b",
        );
        let orphan_b = with_live(
            orphan_b,
            "apiVersion: v1\nkind: Secret\nmetadata:\n  name: old-b\n  namespace: prod\n  annotations:\n    drydock.io/keep-on-delete: \"true\"",
        );

        let set = calculate_planned_changes(
            &[],
            &[],
            &[],
            &[orphan_a, orphan_b],
            &ChangeCalculatorOptions::default(),
        );

        assert_eq!(set.deleted.len(), 1);
        assert_eq!(set.deleted[0].name(), "old-a");
        assert!(set.changes_planned);
    }

    #[test]
    fn test_orphan_still_managed_not_deleted() {
        let scope_map = ScopeMap::with_defaults();
        let desired = general(
            &scope_map,
            "apiVersion: v1\nkind: Secret\nmetadata:\n  name: keeper\ndata: {}",
        );
        let prev = general(
            &scope_map,
            "apiVersion: v1\nkind: Secret\nmetadata:\n  name: keeper",
        );
        let prev = with_live(
            prev,
            "apiVersion: v1\nkind: Secret\nmetadata:\n  name: keeper\n  namespace: prod",
        );

        let set = calculate_planned_changes(
            &[],
            &[],
            &[without_live(desired)],
            &[prev],
            &ChangeCalculatorOptions::default(),
        );

        assert!(set.deleted.is_empty());
        assert_eq!(set.created.len(), 1);
    }

    #[test]
    fn test_buckets_disjoint() {
        let scope_map = ScopeMap::with_defaults();
        let create = without_live(general(
            &scope_map,
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: a",
        ));
        let update = with_live(
            general(
                &scope_map,
                "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: b\ndata:\n  k: new",
            ),
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: b\n  namespace: prod\ndata:\n  k: old",
        );

        let set = calculate_planned_changes(
            &[],
            &[],
            &[create, update],
            &[],
            &ChangeCalculatorOptions::default(),
        );

        let mut seen = StdHashSet::new();
        for id in set
            .created
            .iter()
            .chain(&set.recreated)
            .chain(&set.updated)
            .chain(&set.applied)
            .chain(&set.deleted)
            .chain(&set.unchanged)
        {
            assert!(seen.insert(id.id()), "{} appeared twice", id.human_id());
        }
    }

    #[test]
    fn test_summary_text() {
        let set = ChangeSet::default();
        assert_eq!(set.summary(), "No changes planned");
    }
}
