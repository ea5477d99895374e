//! The resource processor: transform, validate, patch twice, reconcile
//!
//! One processor instance plans one release. `process` runs the full
//! pipeline exactly once; a second call on a successful instance is a
//! no-op, and a failed instance exposes no partial results.

use std::sync::Arc;

use kube::api::DynamicObject;
use tracing::debug;

use crate::client::ClusterClient;
use crate::error::{PlanError, Result, ValidationErrors};
use crate::identity::{ResourceID, ScopeMap};
use crate::live::{self, DeployableInfo};
use crate::patch::{apply_patch_stack, ReleaseMetadataPatcher, ResourcePatcher};
use crate::resource::{
    adoptable_by, GeneralResource, HookResource, ResourceHandle, ResourceOptions, StandaloneCrd,
};
use crate::transform::{
    InvalidMetadataCleaner, ListExpander, ResourceInfo, ResourceTransformer,
};

/// What kind of deployment this plan performs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployType {
    /// No prior release exists
    Initial,
    /// Prior releases exist but none ever deployed successfully
    Install,
    /// A previously deployed release exists
    Upgrade,
    /// Targeting a historical revision (signalled externally)
    Rollback,
}

impl std::fmt::Display for DeployType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DeployType::Initial => "initial",
            DeployType::Install => "install",
            DeployType::Upgrade => "upgrade",
            DeployType::Rollback => "rollback",
        };
        write!(f, "{}", s)
    }
}

/// Pipeline configuration beyond the resource sets themselves
pub struct ProcessorOptions {
    /// Total live-GET permit budget (minimum 1)
    pub network_parallelism: usize,
    pub hook_transformers: Vec<Box<dyn ResourceTransformer>>,
    pub general_transformers: Vec<Box<dyn ResourceTransformer>>,
    pub releasable_hook_patchers: Vec<Box<dyn ResourcePatcher>>,
    pub releasable_general_patchers: Vec<Box<dyn ResourcePatcher>>,
    pub deployable_standalone_crd_patchers: Vec<Box<dyn ResourcePatcher>>,
    pub deployable_hook_patchers: Vec<Box<dyn ResourcePatcher>>,
    pub deployable_general_patchers: Vec<Box<dyn ResourcePatcher>>,
    /// Cluster access for live-state reconciliation; `None` plans offline
    pub cluster: Option<Arc<dyn ClusterClient>>,
}

impl Default for ProcessorOptions {
    fn default() -> Self {
        Self {
            network_parallelism: 30,
            hook_transformers: Vec::new(),
            general_transformers: Vec::new(),
            releasable_hook_patchers: Vec::new(),
            releasable_general_patchers: Vec::new(),
            deployable_standalone_crd_patchers: Vec::new(),
            deployable_hook_patchers: Vec::new(),
            deployable_general_patchers: Vec::new(),
            cluster: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProcessorState {
    Fresh,
    Done,
    Failed,
}

/// Runs the full planning pipeline over one release's resources
pub struct DeployableResourcesProcessor {
    deploy_type: DeployType,
    release_name: String,
    release_namespace: String,
    scope_map: Arc<ScopeMap>,
    network_parallelism: usize,
    cluster: Option<Arc<dyn ClusterClient>>,

    standalone_crds: Vec<StandaloneCrd>,
    hook_resources: Vec<HookResource>,
    general_resources: Vec<GeneralResource>,
    prev_release_general_resources: Vec<GeneralResource>,

    hook_transformers: Vec<Box<dyn ResourceTransformer>>,
    general_transformers: Vec<Box<dyn ResourceTransformer>>,
    releasable_hook_patchers: Vec<Box<dyn ResourcePatcher>>,
    releasable_general_patchers: Vec<Box<dyn ResourcePatcher>>,
    deployable_standalone_crd_patchers: Vec<Box<dyn ResourcePatcher>>,
    deployable_hook_patchers: Vec<Box<dyn ResourcePatcher>>,
    deployable_general_patchers: Vec<Box<dyn ResourcePatcher>>,

    releasable_hook_resources: Vec<HookResource>,
    releasable_general_resources: Vec<GeneralResource>,
    deployable_standalone_crds: Vec<StandaloneCrd>,
    deployable_hook_resources: Vec<HookResource>,
    deployable_general_resources: Vec<GeneralResource>,

    standalone_crd_infos: Vec<DeployableInfo<StandaloneCrd>>,
    hook_resource_infos: Vec<DeployableInfo<HookResource>>,
    general_resource_infos: Vec<DeployableInfo<GeneralResource>>,
    prev_release_general_resource_infos: Vec<DeployableInfo<GeneralResource>>,

    state: ProcessorState,
}

impl DeployableResourcesProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        deploy_type: DeployType,
        release_name: impl Into<String>,
        release_namespace: impl Into<String>,
        scope_map: Arc<ScopeMap>,
        standalone_crds: Vec<StandaloneCrd>,
        hook_resources: Vec<HookResource>,
        general_resources: Vec<GeneralResource>,
        prev_release_general_resources: Vec<GeneralResource>,
        opts: ProcessorOptions,
    ) -> Self {
        let release_name = release_name.into();
        let release_namespace = release_namespace.into();

        // The built-in transformers always run first, in this order.
        let mut hook_transformers: Vec<Box<dyn ResourceTransformer>> =
            vec![Box::new(ListExpander::new()), Box::new(InvalidMetadataCleaner::new())];
        hook_transformers.extend(opts.hook_transformers);
        let mut general_transformers: Vec<Box<dyn ResourceTransformer>> =
            vec![Box::new(ListExpander::new()), Box::new(InvalidMetadataCleaner::new())];
        general_transformers.extend(opts.general_transformers);

        // The release-metadata patcher leads every deployable stack; the
        // releasable stacks never see it.
        let release_metadata =
            || ReleaseMetadataPatcher::new(release_name.clone(), release_namespace.clone());
        let mut deployable_standalone_crd_patchers: Vec<Box<dyn ResourcePatcher>> =
            vec![Box::new(release_metadata())];
        deployable_standalone_crd_patchers.extend(opts.deployable_standalone_crd_patchers);
        let mut deployable_hook_patchers: Vec<Box<dyn ResourcePatcher>> =
            vec![Box::new(release_metadata())];
        deployable_hook_patchers.extend(opts.deployable_hook_patchers);
        let mut deployable_general_patchers: Vec<Box<dyn ResourcePatcher>> =
            vec![Box::new(release_metadata())];
        deployable_general_patchers.extend(opts.deployable_general_patchers);

        Self {
            deploy_type,
            release_name,
            release_namespace,
            scope_map,
            network_parallelism: opts.network_parallelism.max(1),
            cluster: opts.cluster,
            standalone_crds,
            hook_resources,
            general_resources,
            prev_release_general_resources,
            hook_transformers,
            general_transformers,
            releasable_hook_patchers: opts.releasable_hook_patchers,
            releasable_general_patchers: opts.releasable_general_patchers,
            deployable_standalone_crd_patchers,
            deployable_hook_patchers,
            deployable_general_patchers,
            releasable_hook_resources: Vec::new(),
            releasable_general_resources: Vec::new(),
            deployable_standalone_crds: Vec::new(),
            deployable_hook_resources: Vec::new(),
            deployable_general_resources: Vec::new(),
            standalone_crd_infos: Vec::new(),
            hook_resource_infos: Vec::new(),
            general_resource_infos: Vec::new(),
            prev_release_general_resource_infos: Vec::new(),
            state: ProcessorState::Fresh,
        }
    }

    /// Run the pipeline. Idempotent after success; a failed instance stays
    /// failed and exposes nothing.
    pub async fn process(&mut self) -> Result<()> {
        match self.state {
            ProcessorState::Done => return Ok(()),
            ProcessorState::Failed => {
                return Err(PlanError::Processing(
                    "resources processor already failed; construct a new one".to_string(),
                ));
            }
            ProcessorState::Fresh => {}
        }

        match self.run().await {
            Ok(()) => {
                self.state = ProcessorState::Done;
                Ok(())
            }
            Err(e) => {
                self.state = ProcessorState::Failed;
                self.clear_outputs();
                Err(e)
            }
        }
    }

    async fn run(&mut self) -> Result<()> {
        debug!("transforming hook resources");
        self.transform_hook_resources()
            .map_err(|e| PlanError::Processing(format!("error transforming hook resources: {}", e)))?;

        debug!("transforming general resources");
        self.transform_general_resources().map_err(|e| {
            PlanError::Processing(format!("error transforming general resources: {}", e))
        })?;

        debug!("validating resources");
        self.validate_resources()?;

        debug!("validating for duplicated resources");
        self.validate_no_duplicates()?;

        debug!("building releasable hook resources");
        self.build_releasable_hook_resources().map_err(|e| {
            PlanError::Processing(format!("error building releasable hook resources: {}", e))
        })?;

        debug!("building releasable general resources");
        self.build_releasable_general_resources().map_err(|e| {
            PlanError::Processing(format!("error building releasable general resources: {}", e))
        })?;

        debug!("validating releasable resources");
        self.validate_releasable_resources()?;

        debug!("building deployable standalone CRDs");
        self.build_deployable_standalone_crds().map_err(|e| {
            PlanError::Processing(format!("error building deployable standalone crds: {}", e))
        })?;

        debug!("building deployable hook resources");
        self.build_deployable_hook_resources().map_err(|e| {
            PlanError::Processing(format!("error building deployable hook resources: {}", e))
        })?;

        debug!("building deployable general resources");
        self.build_deployable_general_resources().map_err(|e| {
            PlanError::Processing(format!("error building deployable general resources: {}", e))
        })?;

        debug!("validating deployable resources");
        self.validate_deployable_resources()?;

        if let Some(cluster) = self.cluster.clone() {
            debug!("reconciling live state");
            self.build_deployable_resource_infos(&cluster)
                .await
                .map_err(|e| {
                    PlanError::Processing(format!("error building deployable resource infos: {}", e))
                })?;

            debug!("validating adoptable resources");
            self.validate_adoptable_resources()?;
        } else {
            self.build_offline_infos();
        }

        Ok(())
    }

    fn clear_outputs(&mut self) {
        self.releasable_hook_resources.clear();
        self.releasable_general_resources.clear();
        self.deployable_standalone_crds.clear();
        self.deployable_hook_resources.clear();
        self.deployable_general_resources.clear();
        self.standalone_crd_infos.clear();
        self.hook_resource_infos.clear();
        self.general_resource_infos.clear();
        self.prev_release_general_resource_infos.clear();
    }

    // ---- accessors -----------------------------------------------------

    pub fn releasable_hook_resources(&self) -> &[HookResource] {
        &self.releasable_hook_resources
    }

    pub fn releasable_general_resources(&self) -> &[GeneralResource] {
        &self.releasable_general_resources
    }

    pub fn deployable_standalone_crds(&self) -> &[StandaloneCrd] {
        &self.deployable_standalone_crds
    }

    pub fn deployable_hook_resources(&self) -> &[HookResource] {
        &self.deployable_hook_resources
    }

    pub fn deployable_general_resources(&self) -> &[GeneralResource] {
        &self.deployable_general_resources
    }

    pub fn prev_release_general_resources(&self) -> &[GeneralResource] {
        &self.prev_release_general_resources
    }

    /// Infos pair each deployable resource with its live state. Planned
    /// offline (no cluster), every live side is empty.
    pub fn deployable_standalone_crd_infos(&self) -> &[DeployableInfo<StandaloneCrd>] {
        &self.standalone_crd_infos
    }

    pub fn deployable_hook_resource_infos(&self) -> &[DeployableInfo<HookResource>] {
        &self.hook_resource_infos
    }

    pub fn deployable_general_resource_infos(&self) -> &[DeployableInfo<GeneralResource>] {
        &self.general_resource_infos
    }

    pub fn deployable_prev_release_general_resource_infos(
        &self,
    ) -> &[DeployableInfo<GeneralResource>] {
        &self.prev_release_general_resource_infos
    }

    // ---- transformation ------------------------------------------------

    fn transform_hook_resources(&mut self) -> Result<()> {
        let resources = std::mem::take(&mut self.hook_resources);
        let namespace = self.release_namespace.clone();
        let scope_map = Arc::clone(&self.scope_map);

        self.hook_resources = run_transformer_pipeline(
            resources,
            &self.hook_transformers,
            &|obj, res: &HookResource| {
                HookResource::new(
                    obj,
                    ResourceOptions {
                        file_path: res.file_path(),
                        default_namespace: &namespace,
                        scope_map: &scope_map,
                    },
                )
            },
        )?;

        Ok(())
    }

    fn transform_general_resources(&mut self) -> Result<()> {
        let resources = std::mem::take(&mut self.general_resources);
        let namespace = self.release_namespace.clone();
        let scope_map = Arc::clone(&self.scope_map);

        self.general_resources = run_transformer_pipeline(
            resources,
            &self.general_transformers,
            &|obj, res: &GeneralResource| {
                Ok(GeneralResource::new(
                    obj,
                    ResourceOptions {
                        file_path: res.file_path(),
                        default_namespace: &namespace,
                        scope_map: &scope_map,
                    },
                ))
            },
        )?;

        Ok(())
    }

    // ---- validation ----------------------------------------------------

    fn validate_resources(&self) -> Result<()> {
        let mut errs = ValidationErrors::new("resources validation failed");

        for res in &self.standalone_crds {
            if let Err(e) = res.validate(&self.release_name, &self.release_namespace) {
                errs.push(e.to_string());
            }
        }
        for res in &self.hook_resources {
            if let Err(e) = res.validate(&self.release_name, &self.release_namespace) {
                errs.push(e.to_string());
            }
        }
        for res in &self.general_resources {
            if let Err(e) = res.validate(&self.release_name, &self.release_namespace) {
                errs.push(e.to_string());
            }
        }

        errs.into_result()
    }

    fn validate_releasable_resources(&self) -> Result<()> {
        let mut errs = ValidationErrors::new("releasable resources validation failed");

        for res in &self.releasable_hook_resources {
            if let Err(e) = res.validate(&self.release_name, &self.release_namespace) {
                errs.push(e.to_string());
            }
        }
        for res in &self.releasable_general_resources {
            if let Err(e) = res.validate(&self.release_name, &self.release_namespace) {
                errs.push(e.to_string());
            }
        }

        errs.into_result()
    }

    fn validate_deployable_resources(&self) -> Result<()> {
        let mut errs = ValidationErrors::new("deployable resources validation failed");

        for res in &self.deployable_standalone_crds {
            if let Err(e) = res.validate(&self.release_name, &self.release_namespace) {
                errs.push(e.to_string());
            }
        }
        for res in &self.deployable_hook_resources {
            if let Err(e) = res.validate(&self.release_name, &self.release_namespace) {
                errs.push(e.to_string());
            }
        }
        for res in &self.deployable_general_resources {
            if let Err(e) = res.validate(&self.release_name, &self.release_namespace) {
                errs.push(e.to_string());
            }
        }

        errs.into_result()
    }

    fn validate_no_duplicates(&self) -> Result<()> {
        let ids: Vec<&ResourceID> = self
            .standalone_crds
            .iter()
            .map(|r| r.resource_id())
            .chain(self.hook_resources.iter().map(|r| r.resource_id()))
            .chain(self.general_resources.iter().map(|r| r.resource_id()))
            .collect();

        for id in &ids {
            if id.is_namespace() && id.name() == self.release_namespace {
                return Err(PlanError::ReleaseNamespaceNotManageable(
                    self.release_namespace.clone(),
                ));
            }
        }

        let mut seen = std::collections::HashSet::new();
        let mut duplicated = Vec::new();
        for id in &ids {
            if !seen.insert(id.id()) {
                duplicated.push(id.human_id());
            }
        }

        if duplicated.is_empty() {
            Ok(())
        } else {
            duplicated.sort();
            duplicated.dedup();
            Err(PlanError::DuplicateResources(duplicated.join(", ")))
        }
    }

    fn validate_adoptable_resources(&self) -> Result<()> {
        let mut errs = ValidationErrors::new("adoption validation failed");

        for info in &self.general_resource_infos {
            let Some(live) = info.live() else {
                continue;
            };

            let (adoptable, reason) =
                adoptable_by(live, &self.release_name, &self.release_namespace);
            if !adoptable {
                errs.push(format!(
                    "resource {:?} is not adoptable: {}",
                    info.human_id(),
                    reason.unwrap_or_default()
                ));
            }
        }

        errs.into_result()
    }

    // ---- patch lineages ------------------------------------------------

    fn build_releasable_hook_resources(&mut self) -> Result<()> {
        let namespace = self.release_namespace.clone();
        let scope_map = Arc::clone(&self.scope_map);

        self.releasable_hook_resources = run_patcher_pipeline(
            &self.hook_resources,
            &self.releasable_hook_patchers,
            &|obj, res: &HookResource| {
                HookResource::new(
                    obj,
                    ResourceOptions {
                        file_path: res.file_path(),
                        default_namespace: &namespace,
                        scope_map: &scope_map,
                    },
                )
            },
        )?;

        Ok(())
    }

    fn build_releasable_general_resources(&mut self) -> Result<()> {
        let namespace = self.release_namespace.clone();
        let scope_map = Arc::clone(&self.scope_map);

        self.releasable_general_resources = run_patcher_pipeline(
            &self.general_resources,
            &self.releasable_general_patchers,
            &|obj, res: &GeneralResource| {
                Ok(GeneralResource::new(
                    obj,
                    ResourceOptions {
                        file_path: res.file_path(),
                        default_namespace: &namespace,
                        scope_map: &scope_map,
                    },
                ))
            },
        )?;

        Ok(())
    }

    fn build_deployable_standalone_crds(&mut self) -> Result<()> {
        let namespace = self.release_namespace.clone();
        let scope_map = Arc::clone(&self.scope_map);

        self.deployable_standalone_crds = run_patcher_pipeline(
            &self.standalone_crds,
            &self.deployable_standalone_crd_patchers,
            &|obj, res: &StandaloneCrd| {
                Ok(StandaloneCrd::new(
                    obj,
                    ResourceOptions {
                        file_path: res.file_path(),
                        default_namespace: &namespace,
                        scope_map: &scope_map,
                    },
                ))
            },
        )?;

        Ok(())
    }

    fn build_deployable_hook_resources(&mut self) -> Result<()> {
        let matching: Vec<HookResource> = self
            .hook_resources
            .iter()
            .filter(|res| match self.deploy_type {
                DeployType::Initial | DeployType::Install => {
                    res.on_pre_install() || res.on_post_install()
                }
                DeployType::Upgrade => res.on_pre_upgrade() || res.on_post_upgrade(),
                DeployType::Rollback => res.on_pre_rollback() || res.on_post_rollback(),
            })
            .cloned()
            .collect();

        let namespace = self.release_namespace.clone();
        let scope_map = Arc::clone(&self.scope_map);

        self.deployable_hook_resources = run_patcher_pipeline(
            &matching,
            &self.deployable_hook_patchers,
            &|obj, res: &HookResource| {
                HookResource::new(
                    obj,
                    ResourceOptions {
                        file_path: res.file_path(),
                        default_namespace: &namespace,
                        scope_map: &scope_map,
                    },
                )
            },
        )?;

        Ok(())
    }

    fn build_deployable_general_resources(&mut self) -> Result<()> {
        let namespace = self.release_namespace.clone();
        let scope_map = Arc::clone(&self.scope_map);

        self.deployable_general_resources = run_patcher_pipeline(
            &self.general_resources,
            &self.deployable_general_patchers,
            &|obj, res: &GeneralResource| {
                Ok(GeneralResource::new(
                    obj,
                    ResourceOptions {
                        file_path: res.file_path(),
                        default_namespace: &namespace,
                        scope_map: &scope_map,
                    },
                ))
            },
        )?;

        Ok(())
    }

    // ---- reconciliation ------------------------------------------------

    async fn build_deployable_resource_infos(
        &mut self,
        cluster: &Arc<dyn ClusterClient>,
    ) -> Result<()> {
        let (crds, hooks, generals, prev_generals) = live::build_deployable_infos(
            &self.deployable_standalone_crds,
            &self.deployable_hook_resources,
            &self.deployable_general_resources,
            &self.prev_release_general_resources,
            cluster,
            self.network_parallelism,
        )
        .await?;

        self.standalone_crd_infos = crds;
        self.hook_resource_infos = hooks;
        self.general_resource_infos = generals;
        self.prev_release_general_resource_infos = prev_generals;

        Ok(())
    }

    fn build_offline_infos(&mut self) {
        self.standalone_crd_infos = self
            .deployable_standalone_crds
            .iter()
            .cloned()
            .map(DeployableInfo::without_live)
            .collect();
        self.hook_resource_infos = self
            .deployable_hook_resources
            .iter()
            .cloned()
            .map(DeployableInfo::without_live)
            .collect();
        self.general_resource_infos = self
            .deployable_general_resources
            .iter()
            .cloned()
            .map(DeployableInfo::without_live)
            .collect();
        self.prev_release_general_resource_infos = self
            .prev_release_general_resources
            .iter()
            .cloned()
            .map(DeployableInfo::without_live)
            .collect();
    }
}

fn run_transformer_pipeline<R: ResourceHandle + Clone>(
    mut resources: Vec<R>,
    transformers: &[Box<dyn ResourceTransformer>],
    rebuild: &dyn Fn(DynamicObject, &R) -> Result<R>,
) -> Result<Vec<R>> {
    for transformer in transformers {
        let mut transformed = Vec::with_capacity(resources.len());

        for res in &resources {
            let info = ResourceInfo {
                obj: res.object(),
                resource_type: res.resource_type(),
                manageable_by: res.manageable_by(),
            };

            let matched = transformer.matches(&info).map_err(|e| {
                PlanError::Processing(format!(
                    "error matching resource {:?} for transformation by {:?}: {}",
                    res.human_id(),
                    transformer.type_name(),
                    e
                ))
            })?;
            if !matched {
                transformed.push(res.clone());
                continue;
            }

            let new_objs = transformer.transform(&info).map_err(|e| {
                PlanError::Processing(format!(
                    "error transforming resource {:?} by {:?}: {}",
                    res.human_id(),
                    transformer.type_name(),
                    e
                ))
            })?;

            for obj in new_objs {
                transformed.push(rebuild(obj, res)?);
            }
        }

        resources = transformed;
    }

    Ok(resources)
}

fn run_patcher_pipeline<R: ResourceHandle + Clone>(
    resources: &[R],
    patchers: &[Box<dyn ResourcePatcher>],
    rebuild: &dyn Fn(DynamicObject, &R) -> Result<R>,
) -> Result<Vec<R>> {
    let mut patched_resources = Vec::with_capacity(resources.len());

    for res in resources {
        let source = res.object_arc();
        let patched =
            apply_patch_stack(&source, res.resource_type(), res.manageable_by(), patchers)
                .map_err(|e| {
                    PlanError::Processing(format!(
                        "error patching resource {:?}: {}",
                        res.human_id(),
                        e
                    ))
                })?;

        match patched {
            // Nothing matched: the new lineage shares the object.
            None => patched_resources.push(res.clone()),
            Some(obj) => patched_resources.push(rebuild(obj, res)?),
        }
    }

    patched_resources.sort_by(|a, b| a.resource_id().cmp(b.resource_id()));

    Ok(patched_resources)
}
