//! Error types for drydock-kube

use thiserror::Error;

/// Result type for drydock-kube operations
pub type Result<T> = std::result::Result<T, PlanError>;

/// Errors that can occur while planning a release
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PlanError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// Invalid configuration (bad options, unsupported driver, ...)
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Release not found in storage
    #[error("release '{name}' not found in namespace '{namespace}'")]
    ReleaseNotFound { name: String, namespace: String },

    /// A resource kind the API discovery map does not know
    #[error("unknown resource type: {0}")]
    UnknownResourceKind(String),

    /// Invalid manifest document
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// Weight annotation that does not parse as an integer
    #[error("invalid annotation \"{key}: {value}\": value should be an integer")]
    InvalidWeight { key: String, value: String },

    /// Unknown hook phase in a hook annotation
    #[error("unknown hook phase {phase:?} in annotation {key:?}")]
    UnknownHookPhase { key: String, phase: String },

    /// Two or more resources share one resource ID
    #[error("duplicated resources found: {0}")]
    DuplicateResources(String),

    /// The chart tries to manage the namespace the release lives in
    #[error("release namespace '{0}' cannot be deployed as part of the release")]
    ReleaseNamespaceNotManageable(String),

    /// Accumulated validation failures for one cohort of resources
    #[error(transparent)]
    Validation(#[from] ValidationErrors),

    /// Storage error
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Compression error
    #[error("compression error: {0}")]
    Compression(String),

    /// A pipeline stage failed; the message names the operation
    #[error("{0}")]
    Processing(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Policy signal: the plan contains changes and the caller asked to be
    /// told. Not a failure of the planner itself.
    #[error("planned changes detected")]
    ChangesPlanned,
}

impl From<serde_json::Error> for PlanError {
    fn from(e: serde_json::Error) -> Self {
        PlanError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for PlanError {
    fn from(e: serde_yaml::Error) -> Self {
        PlanError::Serialization(e.to_string())
    }
}

impl From<drydock_core::CoreError> for PlanError {
    fn from(e: drydock_core::CoreError) -> Self {
        PlanError::Processing(e.to_string())
    }
}

impl PlanError {
    /// Check if this is a Kubernetes 404 Not Found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, PlanError::Api(kube::Error::Api(resp)) if resp.code == 404)
    }

    /// Check if this is the changes-planned policy signal
    pub fn is_changes_planned(&self) -> bool {
        matches!(self, PlanError::ChangesPlanned)
    }
}

/// All validation failures of one cohort, surfaced as a single error
#[derive(Debug)]
pub struct ValidationErrors {
    pub label: String,
    pub problems: Vec<String>,
}

impl std::error::Error for ValidationErrors {}

impl ValidationErrors {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            problems: Vec::new(),
        }
    }

    pub fn push(&mut self, problem: impl Into<String>) {
        self.problems.push(problem.into());
    }

    pub fn is_empty(&self) -> bool {
        self.problems.is_empty()
    }

    /// Ok when no problems accumulated, the multi-error otherwise
    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(PlanError::Validation(self))
        }
    }
}

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.label, self.problems.join("; "))
    }
}
