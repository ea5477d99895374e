//! Storage drivers for release history
//!
//! Releases persist as cluster objects (Secrets by default, ConfigMaps as
//! the alternative), keyed `{name}.v{revision}`, payload gzipped canonical
//! JSON. The planner only ever reads history; writing records is the
//! applier's side of the contract.

mod configmap;
mod mock;
mod secrets;

pub use configmap::ConfigMapsDriver;
pub use mock::MockStorageDriver;
pub use secrets::SecretsDriver;

use std::collections::BTreeMap;
use std::io::{Read, Write};

use async_trait::async_trait;
use base64::Engine as _;

use crate::annotations;
use crate::error::{PlanError, Result};
use crate::release::Release;

/// Secret type marking drydock release records
pub const RELEASE_OBJECT_TYPE: &str = "drydock.io/release.v1";

/// Data key holding the encoded record inside the storage object
pub const RELEASE_DATA_KEY: &str = "release";

/// Read access to persisted release history
///
/// Implementations must be Send + Sync for use across async tasks.
#[async_trait]
pub trait StorageDriver: Send + Sync {
    /// Get one specific revision
    async fn get(&self, namespace: &str, name: &str, revision: u32) -> Result<Release>;

    /// All persisted revisions for an identity, strictly ascending.
    /// An unknown identity is an empty history, not an error.
    async fn history(&self, namespace: &str, name: &str) -> Result<Vec<Release>>;
}

/// Serialize + gzip + base64 a release for storage
pub fn encode_release(release: &Release) -> Result<String> {
    let json = serde_json::to_vec(release)?;

    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder
        .write_all(&json)
        .map_err(|e| PlanError::Compression(e.to_string()))?;
    let compressed = encoder
        .finish()
        .map_err(|e| PlanError::Compression(e.to_string()))?;

    Ok(base64::engine::general_purpose::STANDARD.encode(compressed))
}

/// Decode a stored release (base64 + gunzip + deserialize)
pub fn decode_release(data: &str) -> Result<Release> {
    let compressed = base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .map_err(|e| PlanError::Serialization(format!("base64 decode error: {}", e)))?;

    let mut decoder = flate2::read::GzDecoder::new(compressed.as_slice());
    let mut json = Vec::new();
    decoder
        .read_to_end(&mut json)
        .map_err(|e| PlanError::Compression(e.to_string()))?;

    serde_json::from_slice(&json).map_err(|e| PlanError::Serialization(e.to_string()))
}

/// Labels applied to every storage object, used for history queries
pub fn storage_labels(release: &Release) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(
        annotations::MANAGED_BY_LABEL.to_string(),
        annotations::MANAGED_BY_VALUE.to_string(),
    );
    labels.insert(
        "drydock.io/release-name".to_string(),
        release.name.clone(),
    );
    labels.insert(
        "drydock.io/release-revision".to_string(),
        release.revision.to_string(),
    );
    labels.insert(
        "drydock.io/release-status".to_string(),
        release.status.to_string(),
    );
    labels
}

/// Selector matching every revision of one release identity
pub fn history_label_selector(name: &str) -> String {
    format!(
        "{}={},drydock.io/release-name={}",
        annotations::MANAGED_BY_LABEL,
        annotations::MANAGED_BY_VALUE,
        name
    )
}
