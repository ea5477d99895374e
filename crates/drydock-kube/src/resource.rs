//! The three resource variants flowing through the planning pipeline
//!
//! Resources are immutable carriers of a parsed object plus provenance.
//! Every transformation or patch produces a new value; an untouched resource
//! shares its object with its predecessor (`Arc`), which is what lets the
//! unchanged heuristic short-circuit safely.

use std::sync::Arc;

use kube::api::DynamicObject;
use serde::{Deserialize, Serialize};

use crate::annotations::{self, AnnotationMap};
use crate::error::{PlanError, Result};
use crate::identity::{gvk_from_type_meta, is_crd, ResourceID, ResourceScope, ScopeMap};

/// Which pipeline a resource belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    StandaloneCrd,
    Hook,
    General,
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResourceType::StandaloneCrd => "standalone-crd",
            ResourceType::Hook => "hook",
            ResourceType::General => "general",
        };
        write!(f, "{}", s)
    }
}

/// Which controllers may own a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ManageableBy {
    /// Exactly one release at a time (default)
    #[default]
    SingleRelease,
    /// Any release may adopt it
    Anyone,
}

/// Release lifecycle phases a hook can bind to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub enum HookPhase {
    PreInstall,
    PostInstall,
    PreUpgrade,
    PostUpgrade,
    PreRollback,
    PostRollback,
    PreDelete,
    PostDelete,
    Test,
}

impl HookPhase {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "pre-install" => HookPhase::PreInstall,
            "post-install" => HookPhase::PostInstall,
            "pre-upgrade" => HookPhase::PreUpgrade,
            "post-upgrade" => HookPhase::PostUpgrade,
            "pre-rollback" => HookPhase::PreRollback,
            "post-rollback" => HookPhase::PostRollback,
            "pre-delete" => HookPhase::PreDelete,
            "post-delete" => HookPhase::PostDelete,
            "test" => HookPhase::Test,
            _ => return None,
        })
    }
}

impl std::fmt::Display for HookPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HookPhase::PreInstall => "pre-install",
            HookPhase::PostInstall => "post-install",
            HookPhase::PreUpgrade => "pre-upgrade",
            HookPhase::PostUpgrade => "post-upgrade",
            HookPhase::PreRollback => "pre-rollback",
            HookPhase::PostRollback => "post-rollback",
            HookPhase::PreDelete => "pre-delete",
            HookPhase::PostDelete => "post-delete",
            HookPhase::Test => "test",
        };
        write!(f, "{}", s)
    }
}

/// Construction options shared by all resource variants
#[derive(Debug, Clone, Copy)]
pub struct ResourceOptions<'a> {
    /// Chart-relative file the resource came from
    pub file_path: &'a str,
    /// Release namespace, applied to namespaced resources without one
    pub default_namespace: &'a str,
    /// API discovery map for scope resolution
    pub scope_map: &'a ScopeMap,
}

/// Uniform access to any resource variant
pub trait ResourceHandle {
    fn resource_id(&self) -> &ResourceID;
    fn object(&self) -> &DynamicObject;
    fn object_arc(&self) -> Arc<DynamicObject>;
    fn file_path(&self) -> &str;
    fn manageable_by(&self) -> ManageableBy;
    fn resource_type(&self) -> ResourceType;

    fn human_id(&self) -> String {
        self.resource_id().human_id()
    }

    fn annotations(&self) -> AnnotationMap {
        self.object()
            .metadata
            .annotations
            .clone()
            .unwrap_or_default()
    }
}

/// Shared state behind every variant
#[derive(Debug, Clone)]
struct ResourceBase {
    obj: Arc<DynamicObject>,
    id: ResourceID,
    scope: Option<ResourceScope>,
    file_path: String,
    manageable_by: ManageableBy,
}

impl ResourceBase {
    /// Infallible: structural problems (missing type meta, bad names) are
    /// reported by `validate`, not here, so one bad document does not mask
    /// the others.
    fn new(mut obj: DynamicObject, opts: ResourceOptions<'_>) -> Self {
        let gvk = obj
            .types
            .as_ref()
            .map(gvk_from_type_meta)
            .unwrap_or_else(|| kube::core::GroupVersionKind {
                group: String::new(),
                version: String::new(),
                kind: String::new(),
            });

        let scope = opts.scope_map.scope_of(&gvk);

        // Stamp the default namespace onto namespaced resources so the
        // object sent to the cluster matches its identity.
        if !gvk.kind.is_empty()
            && opts.scope_map.is_namespaced(&gvk)
            && obj.metadata.namespace.as_deref().unwrap_or("").is_empty()
        {
            obj.metadata.namespace = Some(opts.default_namespace.to_string());
        }

        let id = ResourceID::new(
            obj.metadata.name.as_deref().unwrap_or(""),
            obj.metadata.namespace.as_deref(),
            &gvk,
            opts.default_namespace,
            opts.scope_map,
        );

        let manageable_by = if annotations::ownable_by_anyone(
            &obj.metadata.annotations.clone().unwrap_or_default(),
        ) {
            ManageableBy::Anyone
        } else {
            ManageableBy::SingleRelease
        };

        Self {
            obj: Arc::new(obj),
            id,
            scope,
            file_path: opts.file_path.to_string(),
            manageable_by,
        }
    }

    fn annotations(&self) -> AnnotationMap {
        self.obj.metadata.annotations.clone().unwrap_or_default()
    }

    fn validate(&self, release_name: &str, release_namespace: &str) -> Result<()> {
        let where_from = if self.file_path.is_empty() {
            String::new()
        } else {
            format!(" (from {})", self.file_path)
        };

        if self.obj.types.is_none() || self.id.kind().is_empty() || self.id.version().is_empty() {
            return Err(PlanError::InvalidManifest(format!(
                "resource {:?}{} is missing apiVersion or kind",
                self.obj.metadata.name.as_deref().unwrap_or("<unnamed>"),
                where_from,
            )));
        }

        let name = self.id.name();
        if name.is_empty() {
            return Err(PlanError::InvalidManifest(format!(
                "resource {}{} has no name",
                self.id.human_id(),
                where_from,
            )));
        }
        if !annotations::is_dns1123_subdomain(name) {
            return Err(PlanError::InvalidManifest(format!(
                "resource {}{} has invalid name {:?}: must be a DNS-1123 subdomain",
                self.id.human_id(),
                where_from,
                name,
            )));
        }

        match self.scope {
            Some(ResourceScope::Namespaced) if self.id.namespace().is_empty() => {
                return Err(PlanError::InvalidManifest(format!(
                    "namespaced resource {}{} has no namespace",
                    self.id.human_id(),
                    where_from,
                )));
            }
            Some(ResourceScope::Cluster)
                if self.obj.metadata.namespace.as_deref().unwrap_or("") != "" =>
            {
                return Err(PlanError::InvalidManifest(format!(
                    "cluster-scoped resource {}{} must not set a namespace",
                    self.id.human_id(),
                    where_from,
                )));
            }
            _ => {}
        }

        // Ownership stamps are reserved: a chart may only carry them when
        // they name this very release.
        let annotations = self.annotations();
        for (key, expected) in [
            (annotations::drydock::RELEASE_NAME, release_name),
            (annotations::drydock::RELEASE_NAMESPACE, release_namespace),
        ] {
            if let Some(value) = annotations.get(key) {
                if value != expected {
                    return Err(PlanError::InvalidManifest(format!(
                        "resource {}{} carries reserved annotation \"{}: {}\" owned by another release",
                        self.id.human_id(),
                        where_from,
                        key,
                        value,
                    )));
                }
            }
        }

        Ok(())
    }
}

/// A CRD delivered outside the normal release lifecycle, installed before
/// anything that might reference it
#[derive(Debug, Clone)]
pub struct StandaloneCrd {
    base: ResourceBase,
}

impl StandaloneCrd {
    pub fn new(obj: DynamicObject, opts: ResourceOptions<'_>) -> Self {
        Self {
            base: ResourceBase::new(obj, opts),
        }
    }

    pub fn validate(&self, release_name: &str, release_namespace: &str) -> Result<()> {
        self.base.validate(release_name, release_namespace)?;
        if !self.base.id.is_crd() {
            return Err(PlanError::InvalidManifest(format!(
                "resource {} from the crds directory is not a CustomResourceDefinition",
                self.base.id.human_id(),
            )));
        }
        Ok(())
    }
}

/// A resource whose lifecycle is tied to release phases
#[derive(Debug, Clone)]
pub struct HookResource {
    base: ResourceBase,
    phases: Vec<HookPhase>,
    weight: i64,
}

impl HookResource {
    /// Fails when the hook annotations are malformed: unknown phase or
    /// non-integer weight.
    pub fn new(obj: DynamicObject, opts: ResourceOptions<'_>) -> Result<Self> {
        let base = ResourceBase::new(obj, opts);
        let annotations = base.annotations();

        let phases = match annotations::find_hook_annotation(&annotations) {
            Some((key, value)) => annotations::parse_hook_phases(key, value)?,
            None => Vec::new(),
        };
        let weight = annotations::parse_hook_weight(&annotations)?;

        Ok(Self {
            base,
            phases,
            weight,
        })
    }

    pub fn phases(&self) -> &[HookPhase] {
        &self.phases
    }

    pub fn weight(&self) -> i64 {
        self.weight
    }

    pub fn on_phase(&self, phase: HookPhase) -> bool {
        self.phases.contains(&phase)
    }

    pub fn on_pre_install(&self) -> bool {
        self.on_phase(HookPhase::PreInstall)
    }

    pub fn on_post_install(&self) -> bool {
        self.on_phase(HookPhase::PostInstall)
    }

    pub fn on_pre_upgrade(&self) -> bool {
        self.on_phase(HookPhase::PreUpgrade)
    }

    pub fn on_post_upgrade(&self) -> bool {
        self.on_phase(HookPhase::PostUpgrade)
    }

    pub fn on_pre_rollback(&self) -> bool {
        self.on_phase(HookPhase::PreRollback)
    }

    pub fn on_post_rollback(&self) -> bool {
        self.on_phase(HookPhase::PostRollback)
    }

    pub fn validate(&self, release_name: &str, release_namespace: &str) -> Result<()> {
        self.base.validate(release_name, release_namespace)?;
        if self.phases.is_empty() {
            return Err(PlanError::InvalidManifest(format!(
                "hook resource {} declares no hook phases",
                self.base.id.human_id(),
            )));
        }
        Ok(())
    }
}

/// An ordinary cluster object managed by the release
#[derive(Debug, Clone)]
pub struct GeneralResource {
    base: ResourceBase,
}

impl GeneralResource {
    pub fn new(obj: DynamicObject, opts: ResourceOptions<'_>) -> Self {
        Self {
            base: ResourceBase::new(obj, opts),
        }
    }

    pub fn validate(&self, release_name: &str, release_namespace: &str) -> Result<()> {
        self.base.validate(release_name, release_namespace)
    }
}

macro_rules! impl_resource_handle {
    ($ty:ty, $rtype:expr) => {
        impl ResourceHandle for $ty {
            fn resource_id(&self) -> &ResourceID {
                &self.base.id
            }

            fn object(&self) -> &DynamicObject {
                &self.base.obj
            }

            fn object_arc(&self) -> Arc<DynamicObject> {
                Arc::clone(&self.base.obj)
            }

            fn file_path(&self) -> &str {
                &self.base.file_path
            }

            fn manageable_by(&self) -> ManageableBy {
                self.base.manageable_by
            }

            fn resource_type(&self) -> ResourceType {
                $rtype
            }
        }
    };
}

impl_resource_handle!(StandaloneCrd, ResourceType::StandaloneCrd);
impl_resource_handle!(HookResource, ResourceType::Hook);
impl_resource_handle!(GeneralResource, ResourceType::General);

/// Whether a live object may be taken over by the given release
///
/// Adoptable when it already belongs to the release, when it carries no
/// ownership stamps at all, or when it is marked ownable by anyone.
pub fn adoptable_by(
    live: &DynamicObject,
    release_name: &str,
    release_namespace: &str,
) -> (bool, Option<String>) {
    let annotations = live.metadata.annotations.clone().unwrap_or_default();

    if annotations::ownable_by_anyone(&annotations) {
        return (true, None);
    }

    let owner_name = annotations.get(annotations::drydock::RELEASE_NAME);
    let owner_namespace = annotations.get(annotations::drydock::RELEASE_NAMESPACE);

    match (owner_name, owner_namespace) {
        (None, None) => (true, None),
        (Some(n), Some(ns)) if n == release_name && ns == release_namespace => (true, None),
        (n, ns) => (
            false,
            Some(format!(
                "owned by release {:?} in namespace {:?}",
                n.map(String::as_str).unwrap_or("<unset>"),
                ns.map(String::as_str).unwrap_or("<unset>"),
            )),
        ),
    }
}

/// Detect whether a parsed document is a hook by its annotations
pub fn object_is_hook(obj: &DynamicObject) -> bool {
    obj.metadata
        .annotations
        .as_ref()
        .map(annotations::is_hook)
        .unwrap_or(false)
}

/// Detect whether a parsed document is a CustomResourceDefinition
pub fn object_is_crd(obj: &DynamicObject) -> bool {
    obj.types
        .as_ref()
        .map(|tm| is_crd(&gvk_from_type_meta(tm)))
        .unwrap_or(false)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Parse a YAML document into a DynamicObject for tests
    pub fn obj(yaml: &str) -> DynamicObject {
        serde_yaml::from_str(yaml).expect("test yaml")
    }

    pub fn opts<'a>(scope_map: &'a ScopeMap) -> ResourceOptions<'a> {
        ResourceOptions {
            file_path: "templates/test.yaml",
            default_namespace: "prod",
            scope_map,
        }
    }
}
