//! Resource identity: GVK normalization, scope resolution and stable ordering

use std::cmp::Ordering;
use std::collections::HashMap;

use kube::core::{GroupVersionKind, TypeMeta};
use kube::discovery::Scope;
use kube::Discovery;

use crate::error::{PlanError, Result};

/// Whether a kind lives in a namespace or at cluster scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceScope {
    Cluster,
    Namespaced,
}

/// API discovery map: (group, kind) -> scope
///
/// Built from live discovery when cluster access is available, seeded with
/// the well-known built-in kinds otherwise. Kinds absent from the map (for
/// example custom resources whose CRD ships in the same chart) are treated
/// as namespaced.
#[derive(Debug, Clone)]
pub struct ScopeMap {
    scopes: HashMap<(String, String), ResourceScope>,
}

impl ScopeMap {
    /// Empty map; every kind resolves to the namespaced fallback
    pub fn empty() -> Self {
        Self {
            scopes: HashMap::new(),
        }
    }

    /// Map seeded with the built-in kinds every cluster serves
    pub fn with_defaults() -> Self {
        let mut map = Self::empty();

        for kind in [
            "Pod",
            "Service",
            "ConfigMap",
            "Secret",
            "ServiceAccount",
            "Endpoints",
            "PersistentVolumeClaim",
            "ResourceQuota",
            "LimitRange",
        ] {
            map.insert("", kind, ResourceScope::Namespaced);
        }
        for kind in ["Namespace", "Node", "PersistentVolume"] {
            map.insert("", kind, ResourceScope::Cluster);
        }

        for kind in ["Deployment", "StatefulSet", "DaemonSet", "ReplicaSet"] {
            map.insert("apps", kind, ResourceScope::Namespaced);
        }
        map.insert("batch", "Job", ResourceScope::Namespaced);
        map.insert("batch", "CronJob", ResourceScope::Namespaced);
        map.insert("networking.k8s.io", "Ingress", ResourceScope::Namespaced);
        map.insert("networking.k8s.io", "NetworkPolicy", ResourceScope::Namespaced);
        map.insert("networking.k8s.io", "IngressClass", ResourceScope::Cluster);
        map.insert("policy", "PodDisruptionBudget", ResourceScope::Namespaced);
        map.insert("autoscaling", "HorizontalPodAutoscaler", ResourceScope::Namespaced);

        map.insert("rbac.authorization.k8s.io", "Role", ResourceScope::Namespaced);
        map.insert("rbac.authorization.k8s.io", "RoleBinding", ResourceScope::Namespaced);
        map.insert("rbac.authorization.k8s.io", "ClusterRole", ResourceScope::Cluster);
        map.insert("rbac.authorization.k8s.io", "ClusterRoleBinding", ResourceScope::Cluster);

        map.insert("storage.k8s.io", "StorageClass", ResourceScope::Cluster);
        map.insert(
            "apiextensions.k8s.io",
            "CustomResourceDefinition",
            ResourceScope::Cluster,
        );
        map.insert(
            "admissionregistration.k8s.io",
            "ValidatingWebhookConfiguration",
            ResourceScope::Cluster,
        );
        map.insert(
            "admissionregistration.k8s.io",
            "MutatingWebhookConfiguration",
            ResourceScope::Cluster,
        );

        map
    }

    /// Build from a completed API discovery run, on top of the defaults
    pub fn from_discovery(discovery: &Discovery) -> Self {
        let mut map = Self::with_defaults();

        for group in discovery.groups() {
            for (resource, capabilities) in group.recommended_resources() {
                let scope = match capabilities.scope {
                    Scope::Namespaced => ResourceScope::Namespaced,
                    Scope::Cluster => ResourceScope::Cluster,
                };
                map.insert(&resource.group, &resource.kind, scope);
            }
        }

        map
    }

    pub fn insert(&mut self, group: &str, kind: &str, scope: ResourceScope) {
        self.scopes
            .insert((group.to_string(), kind.to_string()), scope);
    }

    /// Scope of a kind, if the map knows it
    pub fn scope_of(&self, gvk: &GroupVersionKind) -> Option<ResourceScope> {
        self.scopes
            .get(&(gvk.group.clone(), gvk.kind.clone()))
            .copied()
    }

    /// Namespaced per the map; unknown kinds default to namespaced
    pub fn is_namespaced(&self, gvk: &GroupVersionKind) -> bool {
        self.scope_of(gvk) != Some(ResourceScope::Cluster)
    }
}

/// Convert TypeMeta to GroupVersionKind
///
/// - "apps/v1" -> group="apps", version="v1"
/// - "v1" -> group="", version="v1" (core API)
pub fn gvk_from_type_meta(tm: &TypeMeta) -> GroupVersionKind {
    let (group, version) = match tm.api_version.rsplit_once('/') {
        Some((g, v)) => (g.to_string(), v.to_string()),
        None => (String::new(), tm.api_version.clone()),
    };

    GroupVersionKind {
        group,
        version,
        kind: tm.kind.clone(),
    }
}

/// Check if a GVK names a CustomResourceDefinition
pub fn is_crd(gvk: &GroupVersionKind) -> bool {
    gvk.group == "apiextensions.k8s.io" && gvk.kind == "CustomResourceDefinition"
}

/// Canonical identity of a cluster resource
///
/// The namespace is empty exactly when the kind is cluster-scoped per the
/// discovery map.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceID {
    group: String,
    version: String,
    kind: String,
    namespace: String,
    name: String,
}

impl ResourceID {
    /// Build an ID, applying namespace defaulting per the resource scope
    pub fn new(
        name: &str,
        namespace: Option<&str>,
        gvk: &GroupVersionKind,
        default_namespace: &str,
        scope_map: &ScopeMap,
    ) -> Self {
        let namespace = if !gvk.kind.is_empty() && !scope_map.is_namespaced(gvk) {
            String::new()
        } else {
            namespace
                .filter(|ns| !ns.is_empty())
                .unwrap_or(default_namespace)
                .to_string()
        };

        Self {
            group: gvk.group.clone(),
            version: gvk.version.clone(),
            kind: gvk.kind.clone(),
            namespace,
            name: name.to_string(),
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn gvk(&self) -> GroupVersionKind {
        GroupVersionKind {
            group: self.group.clone(),
            version: self.version.clone(),
            kind: self.kind.clone(),
        }
    }

    pub fn is_crd(&self) -> bool {
        is_crd(&self.gvk())
    }

    pub fn is_namespace(&self) -> bool {
        self.group.is_empty() && self.version == "v1" && self.kind == "Namespace"
    }

    /// Canonical machine form, unique across a release
    pub fn id(&self) -> String {
        format!(
            "{}/{}/{}/{}/{}",
            self.group, self.version, self.kind, self.namespace, self.name
        )
    }

    /// Short human form: "Deployment/app/web", "ClusterRole/admin"
    pub fn human_id(&self) -> String {
        if self.namespace.is_empty() {
            format!("{}/{}", self.kind, self.name)
        } else {
            format!("{}/{}/{}", self.kind, self.namespace, self.name)
        }
    }

    /// Ordering priority of this kind among creates: CRDs first, then
    /// Namespaces, then everything else. Deletes walk the order backwards.
    pub fn kind_priority(&self) -> u8 {
        if self.is_crd() {
            0
        } else if self.is_namespace() {
            1
        } else {
            2
        }
    }

    /// Stable sort key: (kind-priority, group, version, kind, namespace, name)
    pub fn sort_key(&self) -> (u8, &str, &str, &str, &str, &str) {
        (
            self.kind_priority(),
            &self.group,
            &self.version,
            &self.kind,
            &self.namespace,
            &self.name,
        )
    }
}

impl Ord for ResourceID {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl PartialOrd for ResourceID {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for ResourceID {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.human_id())
    }
}

/// Extract the GVK of a dynamic object, erroring on missing type meta
pub fn gvk_of(obj: &kube::api::DynamicObject) -> Result<GroupVersionKind> {
    let tm = obj
        .types
        .as_ref()
        .ok_or_else(|| PlanError::InvalidManifest("resource missing apiVersion or kind".to_string()))?;
    Ok(gvk_from_type_meta(tm))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gvk(group: &str, version: &str, kind: &str) -> GroupVersionKind {
        GroupVersionKind {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
        }
    }

    #[test]
    fn test_gvk_from_type_meta() {
        let tm = TypeMeta {
            api_version: "apps/v1".to_string(),
            kind: "Deployment".to_string(),
        };
        let gvk = gvk_from_type_meta(&tm);
        assert_eq!(gvk.group, "apps");
        assert_eq!(gvk.version, "v1");
        assert_eq!(gvk.kind, "Deployment");

        let tm_core = TypeMeta {
            api_version: "v1".to_string(),
            kind: "ConfigMap".to_string(),
        };
        let gvk_core = gvk_from_type_meta(&tm_core);
        assert_eq!(gvk_core.group, "");
        assert_eq!(gvk_core.version, "v1");
    }

    #[test]
    fn test_namespace_defaulting() {
        let map = ScopeMap::with_defaults();

        let id = ResourceID::new("web", None, &gvk("apps", "v1", "Deployment"), "prod", &map);
        assert_eq!(id.namespace(), "prod");

        let explicit = ResourceID::new(
            "web",
            Some("edge"),
            &gvk("apps", "v1", "Deployment"),
            "prod",
            &map,
        );
        assert_eq!(explicit.namespace(), "edge");
    }

    #[test]
    fn test_cluster_scoped_namespace_is_empty() {
        let map = ScopeMap::with_defaults();

        let id = ResourceID::new(
            "admin",
            Some("prod"),
            &gvk("rbac.authorization.k8s.io", "v1", "ClusterRole"),
            "prod",
            &map,
        );
        assert_eq!(id.namespace(), "");
        assert_eq!(id.human_id(), "ClusterRole/admin");
    }

    #[test]
    fn test_unknown_kind_defaults_to_namespaced() {
        let map = ScopeMap::with_defaults();
        let id = ResourceID::new("db", None, &gvk("example.io", "v1", "Database"), "prod", &map);
        assert_eq!(id.namespace(), "prod");
    }

    #[test]
    fn test_sort_order_crds_and_namespaces_first() {
        let map = ScopeMap::with_defaults();

        let crd = ResourceID::new(
            "databases.example.io",
            None,
            &gvk("apiextensions.k8s.io", "v1", "CustomResourceDefinition"),
            "prod",
            &map,
        );
        let ns = ResourceID::new("prod", None, &gvk("", "v1", "Namespace"), "prod", &map);
        let deploy = ResourceID::new("web", None, &gvk("apps", "v1", "Deployment"), "prod", &map);
        let cm = ResourceID::new("cfg", None, &gvk("", "v1", "ConfigMap"), "prod", &map);

        let mut ids = vec![deploy.clone(), cm.clone(), ns.clone(), crd.clone()];
        ids.sort();

        assert_eq!(ids[0], crd);
        assert_eq!(ids[1], ns);
        assert_eq!(ids[2], cm);
        assert_eq!(ids[3], deploy);
    }

    #[test]
    fn test_id_uniqueness_includes_namespace() {
        let map = ScopeMap::with_defaults();
        let a = ResourceID::new("cfg", Some("a"), &gvk("", "v1", "ConfigMap"), "a", &map);
        let b = ResourceID::new("cfg", Some("b"), &gvk("", "v1", "ConfigMap"), "a", &map);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_is_namespace_detection() {
        let map = ScopeMap::with_defaults();
        let ns = ResourceID::new("prod", None, &gvk("", "v1", "Namespace"), "prod", &map);
        assert!(ns.is_namespace());
        assert!(!ns.is_crd());
    }
}
