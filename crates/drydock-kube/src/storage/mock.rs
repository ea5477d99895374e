//! In-memory storage driver for tests
//!
//! Reachable only by constructing `ReleaseHistory` directly; the Memory
//! driver name stays rejected at option validation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use super::StorageDriver;
use crate::error::{PlanError, Result};
use crate::release::Release;

#[derive(Debug, Default)]
pub struct MockStorageDriver {
    releases: RwLock<Vec<Release>>,
    gets: AtomicUsize,
    lists: AtomicUsize,
}

impl MockStorageDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a release to the fake history
    pub fn seed(&self, release: Release) {
        self.releases
            .write()
            .expect("releases lock poisoned")
            .push(release);
    }

    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::Relaxed)
    }

    pub fn list_count(&self) -> usize {
        self.lists.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl StorageDriver for MockStorageDriver {
    async fn get(&self, namespace: &str, name: &str, revision: u32) -> Result<Release> {
        self.gets.fetch_add(1, Ordering::Relaxed);

        self.releases
            .read()
            .expect("releases lock poisoned")
            .iter()
            .find(|r| r.namespace == namespace && r.name == name && r.revision == revision)
            .cloned()
            .ok_or_else(|| PlanError::ReleaseNotFound {
                name: name.to_string(),
                namespace: namespace.to_string(),
            })
    }

    async fn history(&self, namespace: &str, name: &str) -> Result<Vec<Release>> {
        self.lists.fetch_add(1, Ordering::Relaxed);

        let mut releases: Vec<Release> = self
            .releases
            .read()
            .expect("releases lock poisoned")
            .iter()
            .filter(|r| r.namespace == namespace && r.name == name)
            .cloned()
            .collect();

        releases.sort_by_key(|r| r.revision);

        Ok(releases)
    }
}
