//! The planning entry point
//!
//! `plan` coordinates everything: reads the release history, derives the
//! deploy type, runs the resource processor, assembles the new release
//! record, classifies the changes and decides whether the release is
//! already up to date. It never touches the cluster beyond reads.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::changes::{
    calculate_planned_changes, ChangeCalculatorOptions, ChangeSet, VolatilityPolicy,
};
use crate::chart::RenderedChart;
use crate::client::ClusterClient;
use crate::error::{PlanError, Result};
use crate::history::{DriverKind, ReleaseHistory};
use crate::identity::ScopeMap;
use crate::patch::{ExtraMetadataPatcher, ResourcePatcher};
use crate::processor::{DeployType, DeployableResourcesProcessor, ProcessorOptions};
use crate::release::Release;
use crate::resource::{GeneralResource, HookResource, StandaloneCrd};
use crate::uptodate::release_up_to_date;

/// Default live-GET permit budget
pub const DEFAULT_NETWORK_PARALLELISM: usize = 30;

/// Everything `plan` accepts from the caller
#[derive(Debug, Clone)]
pub struct PlanOptions {
    // Chart & values. Values loading and rendering happen outside the core;
    // these fields parameterize that collaborator and are carried here so
    // one options struct describes the whole invocation.
    pub chart_dir_path: String,
    pub values_files_paths: Vec<String>,
    pub values_sets: Vec<String>,
    pub values_string_sets: Vec<String>,
    pub values_file_sets: Vec<String>,
    pub secret_values_paths: Vec<String>,
    pub default_values_disable: bool,
    pub default_secret_values_disable: bool,
    pub secret_key_ignore: bool,

    // Release identity & storage
    pub release_name: String,
    /// Defaults from the kube context outside the core; "default" otherwise
    pub release_namespace: String,
    pub release_storage_driver: DriverKind,

    // Cluster connection (consumed by the kube client collaborator)
    pub kube_config_paths: Vec<String>,
    pub kube_config_base64: String,
    pub kube_context: String,

    // Metadata patchers
    pub extra_annotations: BTreeMap<String, String>,
    pub extra_labels: BTreeMap<String, String>,
    /// Applied only to the deployable lineage, never stored in history
    pub extra_runtime_annotations: BTreeMap<String, String>,

    // Concurrency
    /// 0 means the default of [`DEFAULT_NETWORK_PARALLELISM`]; minimum 1
    pub network_parallelism: usize,

    // Registry (consumed by the chart loading collaborator)
    pub chart_repository_insecure: bool,
    pub chart_repository_skip_tls_verify: bool,
    pub chart_repository_skip_update: bool,
    pub registry_credentials_path: String,

    // Behavior
    /// Return [`PlanError::ChangesPlanned`] when the plan is not a no-op
    pub error_if_changes_planned: bool,
    pub volatility: VolatilityPolicy,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            chart_dir_path: String::new(),
            values_files_paths: Vec::new(),
            values_sets: Vec::new(),
            values_string_sets: Vec::new(),
            values_file_sets: Vec::new(),
            secret_values_paths: Vec::new(),
            default_values_disable: false,
            default_secret_values_disable: false,
            secret_key_ignore: false,
            release_name: String::new(),
            release_namespace: String::new(),
            release_storage_driver: DriverKind::default(),
            kube_config_paths: Vec::new(),
            kube_config_base64: String::new(),
            kube_context: String::new(),
            extra_annotations: BTreeMap::new(),
            extra_labels: BTreeMap::new(),
            extra_runtime_annotations: BTreeMap::new(),
            network_parallelism: 0,
            chart_repository_insecure: false,
            chart_repository_skip_tls_verify: false,
            chart_repository_skip_update: false,
            registry_credentials_path: String::new(),
            error_if_changes_planned: false,
            volatility: VolatilityPolicy::default(),
        }
    }
}

/// Validate options and fill the defaults
pub fn apply_plan_options_defaults(mut opts: PlanOptions) -> Result<PlanOptions> {
    if opts.release_name.is_empty() {
        return Err(PlanError::InvalidConfig(
            "release name not specified".to_string(),
        ));
    }

    if opts.release_namespace.is_empty() {
        opts.release_namespace = "default".to_string();
    }

    if opts.network_parallelism == 0 {
        opts.network_parallelism = DEFAULT_NETWORK_PARALLELISM;
    }

    if opts.release_storage_driver == DriverKind::Memory {
        return Err(PlanError::InvalidConfig(
            "memory release storage driver is not supported".to_string(),
        ));
    }

    Ok(opts)
}

/// Deploy-type law over what history knows
pub fn deploy_type_for(prev_found: bool, prev_deployed_found: bool) -> DeployType {
    if prev_found && prev_deployed_found {
        DeployType::Upgrade
    } else if prev_found {
        DeployType::Install
    } else {
        DeployType::Initial
    }
}

/// The computed plan: what the applier would execute
#[derive(Debug, Clone)]
pub struct Plan {
    pub deploy_type: DeployType,
    pub new_release: Release,
    pub deployable_standalone_crds: Vec<StandaloneCrd>,
    pub deployable_hook_resources: Vec<HookResource>,
    pub deployable_general_resources: Vec<GeneralResource>,
    pub deployable_prev_release_general_resources: Vec<GeneralResource>,
    pub changes: ChangeSet,
    pub release_up_to_date: bool,
}

impl Plan {
    /// A plan is a true no-op only when the release is up to date and no
    /// changes are planned
    pub fn noop(&self) -> bool {
        self.release_up_to_date && !self.changes.changes_planned
    }
}

/// Compute the deployment plan for a rendered chart against one release
/// identity
///
/// The chart tree, the history reader, the cluster facade and the scope map
/// are the external collaborators; everything in between is the core's job.
/// Passing no cluster plans offline: every resource classifies as a create
/// and no adoption validation runs.
pub async fn plan(
    opts: PlanOptions,
    chart: RenderedChart,
    history: &ReleaseHistory,
    cluster: Option<Arc<dyn ClusterClient>>,
    scope_map: Arc<ScopeMap>,
) -> Result<Plan> {
    let opts = apply_plan_options_defaults(opts)?;

    info!(
        release = %opts.release_name,
        namespace = %opts.release_namespace,
        "planning release"
    );

    debug!("constructing release history");
    let prev_release = history.last_release().await?;
    let prev_deployed_release = history.last_deployed_release().await?;

    let deploy_type = deploy_type_for(prev_release.is_some(), prev_deployed_release.is_some());

    let (prev_release_general_resources, prev_release_failed) = match &prev_release {
        Some(prev) => (prev.general_resources_parsed(&scope_map)?, prev.failed()),
        None => (Vec::new(), false),
    };

    debug!(%deploy_type, "processing resources");
    let releasable_metadata = || {
        Box::new(ExtraMetadataPatcher::new(
            opts.extra_annotations.clone(),
            opts.extra_labels.clone(),
        )) as Box<dyn ResourcePatcher>
    };
    let deployable_metadata = || {
        let mut annotations = opts.extra_annotations.clone();
        annotations.extend(
            opts.extra_runtime_annotations
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        Box::new(ExtraMetadataPatcher::new(annotations, opts.extra_labels.clone()))
            as Box<dyn ResourcePatcher>
    };

    let mut processor = DeployableResourcesProcessor::new(
        deploy_type,
        opts.release_name.clone(),
        opts.release_namespace.clone(),
        Arc::clone(&scope_map),
        chart.standalone_crds,
        chart.hook_resources,
        chart.general_resources,
        prev_release_general_resources,
        ProcessorOptions {
            network_parallelism: opts.network_parallelism,
            releasable_hook_patchers: vec![releasable_metadata()],
            releasable_general_patchers: vec![releasable_metadata()],
            deployable_standalone_crd_patchers: vec![deployable_metadata()],
            deployable_hook_patchers: vec![deployable_metadata()],
            deployable_general_patchers: vec![deployable_metadata()],
            cluster,
            ..ProcessorOptions::default()
        },
    );

    processor.process().await?;

    debug!("constructing new release");
    let new_release = Release::build(
        opts.release_name.clone(),
        opts.release_namespace.clone(),
        prev_release.as_ref(),
        chart.values,
        chart.metadata,
        processor.releasable_hook_resources(),
        processor.releasable_general_resources(),
        chart.notes,
    )?;

    debug!("calculating planned changes");
    let changes = calculate_planned_changes(
        processor.deployable_standalone_crd_infos(),
        processor.deployable_hook_resource_infos(),
        processor.deployable_general_resource_infos(),
        processor.deployable_prev_release_general_resource_infos(),
        &ChangeCalculatorOptions {
            prev_release_failed,
            volatility: opts.volatility,
        },
    );

    let up_to_date = match &prev_release {
        Some(prev) => release_up_to_date(prev, &new_release)
            .map_err(|e| PlanError::Processing(format!("check if release is up to date: {}", e)))?,
        None => false,
    };

    info!(
        release = %opts.release_name,
        up_to_date,
        changes = %changes.summary(),
        "plan computed"
    );

    if opts.error_if_changes_planned && (changes.changes_planned || !up_to_date) {
        return Err(PlanError::ChangesPlanned);
    }

    Ok(Plan {
        deploy_type,
        new_release,
        deployable_standalone_crds: processor.deployable_standalone_crds().to_vec(),
        deployable_hook_resources: processor.deployable_hook_resources().to_vec(),
        deployable_general_resources: processor.deployable_general_resources().to_vec(),
        deployable_prev_release_general_resources: processor
            .prev_release_general_resources()
            .to_vec(),
        changes,
        release_up_to_date: up_to_date,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deploy_type_law() {
        assert_eq!(deploy_type_for(false, false), DeployType::Initial);
        assert_eq!(deploy_type_for(true, false), DeployType::Install);
        assert_eq!(deploy_type_for(true, true), DeployType::Upgrade);
    }

    #[test]
    fn test_defaults_require_release_name() {
        let err = apply_plan_options_defaults(PlanOptions::default()).unwrap_err();
        assert!(err.to_string().contains("release name"));
    }

    #[test]
    fn test_defaults_fill_namespace_and_parallelism() {
        let opts = apply_plan_options_defaults(PlanOptions {
            release_name: "rel".to_string(),
            ..PlanOptions::default()
        })
        .unwrap();

        assert_eq!(opts.release_namespace, "default");
        assert_eq!(opts.network_parallelism, DEFAULT_NETWORK_PARALLELISM);
        assert_eq!(opts.release_storage_driver, DriverKind::Secrets);
    }

    #[test]
    fn test_memory_driver_rejected() {
        let err = apply_plan_options_defaults(PlanOptions {
            release_name: "rel".to_string(),
            release_storage_driver: DriverKind::Memory,
            ..PlanOptions::default()
        })
        .unwrap_err();

        assert!(err.to_string().contains("memory release storage driver"));
    }
}
