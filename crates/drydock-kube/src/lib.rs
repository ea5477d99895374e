//! Drydock Kube - the release planning engine
//!
//! This crate computes what a release would do to a cluster without doing
//! any of it:
//! - **Resource model**: standalone CRDs, hooks and general resources as
//!   immutable carriers of parsed objects
//! - **Processor**: transform → validate → dual patch lineages → live-state
//!   reconciliation → invariant checks
//! - **History**: release records persisted in Secrets or ConfigMaps
//! - **Change calculation**: create / recreate / update / apply / delete /
//!   unchanged classification
//! - **Stage splitting**: weight-ordered apply and delete stages
//! - **Up-to-date comparison**: content equality against the previous
//!   release
//!
//! The applier and the uninstaller are external consumers of the [`Plan`]
//! this crate produces.

pub mod annotations;
pub mod changes;
pub mod chart;
pub mod client;
pub mod error;
pub mod history;
pub mod identity;
pub mod live;
pub mod normalize;
pub mod patch;
pub mod plan;
pub mod processor;
pub mod release;
pub mod resource;
pub mod stages;
pub mod storage;
pub mod transform;
pub mod uptodate;

pub use changes::{
    calculate_planned_changes, ChangeCalculatorOptions, ChangeSet, VolatilityPolicy,
};
pub use chart::RenderedChart;
pub use client::{ClusterClient, GetOptions, KubeApiClient, MockClusterClient};
pub use error::{PlanError, Result, ValidationErrors};
pub use history::{DriverKind, ReleaseHistory};
pub use identity::{ResourceID, ResourceScope, ScopeMap};
pub use live::DeployableInfo;
pub use patch::{ExtraMetadataPatcher, ReleaseMetadataPatcher, ResourcePatcher};
pub use plan::{
    apply_plan_options_defaults, deploy_type_for, plan, Plan, PlanOptions,
    DEFAULT_NETWORK_PARALLELISM,
};
pub use processor::{DeployType, DeployableResourcesProcessor, ProcessorOptions};
pub use release::{ReleasableResource, Release, ReleaseStatus};
pub use resource::{
    GeneralResource, HookPhase, HookResource, ManageableBy, ResourceHandle, ResourceOptions,
    ResourceType, StandaloneCrd,
};
pub use stages::{split, SortedStages, Stage};
pub use storage::{ConfigMapsDriver, MockStorageDriver, SecretsDriver, StorageDriver};
pub use transform::{
    InvalidMetadataCleaner, ListExpander, ResourceInfo, ResourceTransformer,
};
pub use uptodate::release_up_to_date;
