//! The rendered chart tree handed to the planner
//!
//! Template rendering happens outside the core. What arrives here is a set
//! of rendered manifest sources which get classified into the three resource
//! variants: documents from the `crds/` directory are standalone CRDs,
//! documents carrying a hook annotation are hooks, everything else is a
//! general resource.

use drydock_core::{ChartMetadata, Values};
use kube::api::DynamicObject;

use crate::error::{PlanError, Result};
use crate::identity::ScopeMap;
use crate::resource::{
    object_is_hook, GeneralResource, HookResource, ResourceOptions, StandaloneCrd,
};

/// A fully rendered chart: metadata, effective values, notes and the
/// classified resource sets
#[derive(Debug, Clone)]
pub struct RenderedChart {
    pub metadata: ChartMetadata,
    pub values: Values,
    pub notes: String,
    pub standalone_crds: Vec<StandaloneCrd>,
    pub hook_resources: Vec<HookResource>,
    pub general_resources: Vec<GeneralResource>,
}

impl RenderedChart {
    pub fn new(metadata: ChartMetadata, values: Values) -> Self {
        Self {
            metadata,
            values,
            notes: String::new(),
            standalone_crds: Vec::new(),
            hook_resources: Vec::new(),
            general_resources: Vec::new(),
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    /// Parse one rendered manifest file (possibly multi-document) and
    /// classify its resources
    pub fn add_manifest_source(
        &mut self,
        file_path: &str,
        manifest: &str,
        default_namespace: &str,
        scope_map: &ScopeMap,
    ) -> Result<()> {
        for (index, doc) in manifest.split("---").enumerate() {
            let doc = doc.trim();
            if doc.is_empty() {
                continue;
            }
            if doc
                .lines()
                .all(|l| l.trim().is_empty() || l.trim().starts_with('#'))
            {
                continue;
            }

            let obj: DynamicObject = serde_yaml::from_str(doc).map_err(|e| {
                PlanError::InvalidManifest(format!(
                    "failed to parse document {} of {}: {}",
                    index, file_path, e
                ))
            })?;

            let opts = ResourceOptions {
                file_path,
                default_namespace,
                scope_map,
            };

            if from_crds_directory(file_path) {
                self.standalone_crds.push(StandaloneCrd::new(obj, opts));
            } else if object_is_hook(&obj) {
                self.hook_resources.push(HookResource::new(obj, opts)?);
            } else {
                self.general_resources.push(GeneralResource::new(obj, opts));
            }
        }

        Ok(())
    }

    pub fn resource_count(&self) -> usize {
        self.standalone_crds.len() + self.hook_resources.len() + self.general_resources.len()
    }
}

fn from_crds_directory(file_path: &str) -> bool {
    file_path.starts_with("crds/") || file_path.contains("/crds/")
}
