//! Live-state reconciliation: pairing desired resources with what the
//! cluster actually holds
//!
//! One bounded worker pool per input class (standalone CRDs, hooks,
//! generals, previous-release generals). The total permit count equals the
//! configured network parallelism, partitioned across the classes
//! proportionally to their sizes, so an empty class consumes no workers.
//! The first error in a pool cancels that pool's remaining GETs; the other
//! pools run to completion and their errors surface afterwards, in class
//! order.

use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};
use kube::api::DynamicObject;

use crate::client::{ClusterClient, GetOptions};
use crate::error::{PlanError, Result};
use crate::normalize::drift_digest;
use crate::resource::{GeneralResource, HookResource, ResourceHandle, StandaloneCrd};

/// A desired resource paired with its live counterpart, if any
#[derive(Debug, Clone)]
pub struct DeployableInfo<R> {
    pub resource: R,
    live: Option<Arc<DynamicObject>>,
    live_digest: Option<String>,
}

impl<R: ResourceHandle> DeployableInfo<R> {
    /// Desired-only info, used when cluster access is not permitted
    pub fn without_live(resource: R) -> Self {
        Self {
            resource,
            live: None,
            live_digest: None,
        }
    }

    pub fn live(&self) -> Option<&DynamicObject> {
        self.live.as_deref()
    }

    /// Hash of the normalized live object, absent when nothing is live
    pub fn live_digest(&self) -> Option<&str> {
        self.live_digest.as_deref()
    }

    pub fn human_id(&self) -> String {
        self.resource.human_id()
    }

    #[cfg(test)]
    pub(crate) fn for_tests(resource: R, live: Option<DynamicObject>) -> Self {
        let live_digest = live.as_ref().map(drift_digest);
        Self {
            resource,
            live: live.map(Arc::new),
            live_digest,
        }
    }

    async fn fetch(resource: R, cluster: Arc<dyn ClusterClient>) -> Result<Self> {
        let live = cluster
            .get(resource.resource_id(), GetOptions::cached())
            .await
            .map_err(|e| {
                PlanError::Processing(format!(
                    "error getting live state of {}: {}",
                    resource.human_id(),
                    e
                ))
            })?;

        let live_digest = live.as_ref().map(drift_digest);

        Ok(Self {
            resource,
            live: live.map(Arc::new),
            live_digest,
        })
    }
}

/// Permits for one class: its proportional share of the total, at least one
fn pool_size(class_len: usize, total: usize, parallelism: usize) -> usize {
    if class_len == 0 {
        return 1;
    }
    (class_len * parallelism / total.max(1)).max(1)
}

async fn fetch_pool<R>(
    resources: &[R],
    permits: usize,
    cluster: &Arc<dyn ClusterClient>,
) -> Result<Vec<DeployableInfo<R>>>
where
    R: ResourceHandle + Clone + Send + Sync + 'static,
{
    let mut infos: Vec<DeployableInfo<R>> = stream::iter(resources.to_vec())
        .map(|res| {
            let cluster = Arc::clone(cluster);
            async move { DeployableInfo::fetch(res, cluster).await }
        })
        .buffer_unordered(permits.max(1))
        .try_collect()
        .await?;

    infos.sort_by(|a, b| a.resource.resource_id().cmp(b.resource.resource_id()));

    Ok(infos)
}

/// Reconcile all four input classes against the cluster
#[allow(clippy::type_complexity)]
pub async fn build_deployable_infos(
    standalone_crds: &[StandaloneCrd],
    hook_resources: &[HookResource],
    general_resources: &[GeneralResource],
    prev_release_general_resources: &[GeneralResource],
    cluster: &Arc<dyn ClusterClient>,
    parallelism: usize,
) -> Result<(
    Vec<DeployableInfo<StandaloneCrd>>,
    Vec<DeployableInfo<HookResource>>,
    Vec<DeployableInfo<GeneralResource>>,
    Vec<DeployableInfo<GeneralResource>>,
)> {
    let total = standalone_crds.len()
        + hook_resources.len()
        + general_resources.len()
        + prev_release_general_resources.len();

    let (crds, hooks, generals, prev_generals) = tokio::join!(
        fetch_pool(
            standalone_crds,
            pool_size(standalone_crds.len(), total, parallelism),
            cluster,
        ),
        fetch_pool(
            hook_resources,
            pool_size(hook_resources.len(), total, parallelism),
            cluster,
        ),
        fetch_pool(
            general_resources,
            pool_size(general_resources.len(), total, parallelism),
            cluster,
        ),
        fetch_pool(
            prev_release_general_resources,
            pool_size(prev_release_general_resources.len(), total, parallelism),
            cluster,
        ),
    );

    Ok((crds?, hooks?, generals?, prev_generals?))
}
