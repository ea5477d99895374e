//! Annotation parsing with Helm compatibility
//!
//! Drydock reads both `drydock.io/*` and `helm.sh/*` annotations to ease
//! migration from Helm charts. The drydock key always wins when both are set.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{PlanError, Result};

/// Drydock-native annotations
pub mod drydock {
    /// Hook phase annotation
    pub const HOOK: &str = "drydock.io/hook";
    /// Hook weight for ordering
    pub const HOOK_WEIGHT: &str = "drydock.io/hook-weight";
    /// Stage weight partitioning apply/delete order
    pub const STAGE_WEIGHT: &str = "drydock.io/stage-weight";
    /// Delete-then-create instead of patching in place
    pub const RECREATE: &str = "drydock.io/recreate";
    /// Leave the live object alone when the release stops managing it
    pub const KEEP_ON_DELETE: &str = "drydock.io/keep-on-delete";
    /// Which releases may own this resource ("anyone" relaxes adoption)
    pub const OWNABLE_BY: &str = "drydock.io/ownable-by";
    /// "server-side" opts the resource into server-side apply
    pub const APPLY_STRATEGY: &str = "drydock.io/apply-strategy";
    /// Recreate this resource when the previous release failed
    pub const VOLATILE: &str = "drydock.io/volatile";
    /// Ownership stamp: the release that manages this resource
    pub const RELEASE_NAME: &str = "drydock.io/release-name";
    /// Ownership stamp: the namespace of the managing release
    pub const RELEASE_NAMESPACE: &str = "drydock.io/release-namespace";
}

/// Helm-compatible annotations (for migration)
pub mod helm {
    /// Hook phase annotation
    pub const HOOK: &str = "helm.sh/hook";
    /// Hook weight for ordering
    pub const HOOK_WEIGHT: &str = "helm.sh/hook-weight";
    /// Resource policy ("keep" maps to keep-on-delete)
    pub const RESOURCE_POLICY: &str = "helm.sh/resource-policy";
}

/// Label marking resources managed by drydock
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
/// Value of [`MANAGED_BY_LABEL`] on drydock-managed resources
pub const MANAGED_BY_VALUE: &str = "drydock";

pub type AnnotationMap = BTreeMap<String, String>;

/// Get annotation value, preferring drydock over Helm
pub fn get_annotation<'a>(
    annotations: &'a AnnotationMap,
    drydock_key: &str,
    helm_key: &str,
) -> Option<&'a str> {
    annotations
        .get(drydock_key)
        .or_else(|| annotations.get(helm_key))
        .map(|s| s.as_str())
}

fn hook_key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(drydock\.io|helm\.sh)/hook$").expect("static pattern"))
}

/// Hook detection: any annotation key under the reserved hook namespace
pub fn find_hook_annotation(annotations: &AnnotationMap) -> Option<(&str, &str)> {
    annotations
        .iter()
        .find(|(key, _)| hook_key_pattern().is_match(key))
        .map(|(key, value)| (key.as_str(), value.trim()))
}

pub fn is_hook(annotations: &AnnotationMap) -> bool {
    find_hook_annotation(annotations).is_some()
}

/// Parse a comma-separated hook phase list; unknown phases are fatal
pub fn parse_hook_phases(key: &str, value: &str) -> Result<Vec<crate::resource::HookPhase>> {
    let mut phases = Vec::new();
    for part in value.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let phase = crate::resource::HookPhase::parse(part).ok_or_else(|| {
            PlanError::UnknownHookPhase {
                key: key.to_string(),
                phase: part.to_string(),
            }
        })?;
        if !phases.contains(&phase) {
            phases.push(phase);
        }
    }
    Ok(phases)
}

/// Parse an integer weight annotation. Absent means 0; a present value that
/// is not an integer is fatal.
pub fn parse_weight(annotations: &AnnotationMap, drydock_key: &str, helm_key: &str) -> Result<i64> {
    match get_annotation(annotations, drydock_key, helm_key) {
        None => Ok(0),
        Some(raw) => raw.trim().parse().map_err(|_| PlanError::InvalidWeight {
            key: if annotations.contains_key(drydock_key) {
                drydock_key.to_string()
            } else {
                helm_key.to_string()
            },
            value: raw.to_string(),
        }),
    }
}

/// Hook weight (default 0, bad integer fatal)
pub fn parse_hook_weight(annotations: &AnnotationMap) -> Result<i64> {
    parse_weight(annotations, drydock::HOOK_WEIGHT, helm::HOOK_WEIGHT)
}

/// Stage weight (default 0, bad integer fatal); hook weight is the fallback
/// so hooks keep their ordering when split into stages
pub fn parse_stage_weight(annotations: &AnnotationMap) -> Result<i64> {
    if annotations.contains_key(drydock::STAGE_WEIGHT) {
        parse_weight(annotations, drydock::STAGE_WEIGHT, drydock::STAGE_WEIGHT)
    } else {
        parse_hook_weight(annotations)
    }
}

fn truthy(value: Option<&str>) -> bool {
    matches!(value.map(str::trim), Some("true") | Some("1"))
}

/// Resource asks to be deleted and re-created instead of patched
pub fn wants_recreate(annotations: &AnnotationMap) -> bool {
    truthy(annotations.get(drydock::RECREATE).map(String::as_str))
}

/// Resource asks to survive when the release stops managing it
pub fn keep_on_delete(annotations: &AnnotationMap) -> bool {
    truthy(annotations.get(drydock::KEEP_ON_DELETE).map(String::as_str))
        || annotations.get(helm::RESOURCE_POLICY).map(String::as_str) == Some("keep")
}

/// Resource opted into server-side apply
pub fn server_side_apply(annotations: &AnnotationMap) -> bool {
    annotations.get(drydock::APPLY_STRATEGY).map(|s| s.trim()) == Some("server-side")
}

/// Resource asks to be recreated when the previous release failed
pub fn is_volatile(annotations: &AnnotationMap) -> bool {
    truthy(annotations.get(drydock::VOLATILE).map(String::as_str))
}

/// Resource may be adopted by any release
pub fn ownable_by_anyone(annotations: &AnnotationMap) -> bool {
    annotations.get(drydock::OWNABLE_BY).map(|s| s.trim()) == Some("anyone")
}

fn name_part_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9._-]*[A-Za-z0-9])?$").expect("static pattern")
    })
}

fn dns1123_subdomain_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
            .expect("static pattern")
    })
}

/// DNS-1123 subdomain check, as required for resource names
pub fn is_dns1123_subdomain(name: &str) -> bool {
    name.len() <= 253 && dns1123_subdomain_pattern().is_match(name)
}

/// Qualified-name syntax for annotation and label keys:
/// an optional DNS-1123 subdomain prefix, a slash, and a short name part
pub fn is_valid_metadata_key(key: &str) -> bool {
    let (prefix, name) = match key.split_once('/') {
        Some((p, n)) => (Some(p), n),
        None => (None, key),
    };

    if name.is_empty() || name.len() > 63 || !name_part_pattern().is_match(name) {
        return false;
    }

    match prefix {
        None => true,
        Some(p) => is_dns1123_subdomain(p),
    }
}
