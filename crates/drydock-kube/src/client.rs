//! Cluster client facade used by the live-state reconciler
//!
//! The planner only ever reads from the cluster. The facade narrows the
//! Kubernetes API down to a single cached GET, which keeps the reconciler
//! testable against `MockClusterClient`.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use kube::api::{Api, DynamicObject};
use kube::discovery::Scope;
use kube::{Client, Discovery};

use crate::error::{PlanError, Result};
use crate::identity::ResourceID;

/// Per-GET options
#[derive(Debug, Clone, Copy, Default)]
pub struct GetOptions {
    /// Serve from the per-plan cache when possible, avoiding a redundant
    /// round-trip within a single Process call
    pub try_cache: bool,
}

impl GetOptions {
    pub fn cached() -> Self {
        Self { try_cache: true }
    }
}

/// Read-only cluster access, safe for parallel use
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Fetch the live object behind an ID. Not-found is success (`None`);
    /// only other API failures propagate.
    async fn get(&self, id: &ResourceID, opts: GetOptions) -> Result<Option<DynamicObject>>;
}

/// Facade over a real `kube::Client` plus completed API discovery
pub struct KubeApiClient {
    client: Client,
    discovery: Discovery,
    cache: Mutex<HashMap<String, Option<DynamicObject>>>,
}

impl KubeApiClient {
    /// Run discovery against the cluster and build the facade
    pub async fn new(client: Client) -> Result<Self> {
        let discovery = Discovery::new(client.clone()).run().await?;
        Ok(Self::with_discovery(client, discovery))
    }

    /// Build from an existing client and discovery (for reuse)
    pub fn with_discovery(client: Client, discovery: Discovery) -> Self {
        Self {
            client,
            discovery,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn discovery(&self) -> &Discovery {
        &self.discovery
    }

    fn api_for(&self, id: &ResourceID) -> Option<Api<DynamicObject>> {
        let (api_resource, capabilities) = self.discovery.resolve_gvk(&id.gvk())?;

        let api = if capabilities.scope == Scope::Namespaced {
            Api::namespaced_with(self.client.clone(), id.namespace(), &api_resource)
        } else {
            Api::all_with(self.client.clone(), &api_resource)
        };
        Some(api)
    }
}

#[async_trait]
impl ClusterClient for KubeApiClient {
    async fn get(&self, id: &ResourceID, opts: GetOptions) -> Result<Option<DynamicObject>> {
        let key = id.id();

        if opts.try_cache {
            let cache = self.cache.lock().expect("cache lock poisoned");
            if let Some(hit) = cache.get(&key) {
                return Ok(hit.clone());
            }
        }

        // A kind discovery does not serve cannot have a live object; its
        // CRD may well be shipping in this same release.
        let Some(api) = self.api_for(id) else {
            return Ok(None);
        };

        let live = match api.get_opt(id.name()).await {
            Ok(obj) => obj,
            Err(e) => return Err(PlanError::Api(e)),
        };

        self.cache
            .lock()
            .expect("cache lock poisoned")
            .insert(key, live.clone());

        Ok(live)
    }
}

/// In-memory cluster for tests: seeded objects, counted GETs, injectable
/// failures
#[derive(Debug, Default)]
pub struct MockClusterClient {
    objects: HashMap<String, DynamicObject>,
    fail_ids: HashSet<String>,
    gets: AtomicUsize,
}

impl MockClusterClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a live object under an identity
    pub fn insert(&mut self, id: &ResourceID, obj: DynamicObject) {
        self.objects.insert(id.id(), obj);
    }

    /// Make every GET for this identity fail
    pub fn fail_on(&mut self, id: &ResourceID) {
        self.fail_ids.insert(id.id());
    }

    /// Number of GETs served so far
    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ClusterClient for MockClusterClient {
    async fn get(&self, id: &ResourceID, _opts: GetOptions) -> Result<Option<DynamicObject>> {
        self.gets.fetch_add(1, Ordering::Relaxed);

        let key = id.id();
        if self.fail_ids.contains(&key) {
            return Err(PlanError::Storage(format!(
                "injected failure for {}",
                id.human_id()
            )));
        }

        Ok(self.objects.get(&key).cloned())
    }
}
