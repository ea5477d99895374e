//! Chart identity as stored in release records

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Chart metadata captured at planning time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartMetadata {
    /// Chart name
    pub name: String,

    /// Chart version
    pub version: semver::Version,

    /// Version of the packaged application, free-form
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ChartMetadata {
    pub fn new(name: impl Into<String>, version: &str) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            version: version.parse().map_err(CoreError::InvalidVersion)?,
            app_version: None,
            description: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_parses_version() {
        let meta = ChartMetadata::new("web", "1.2.3").unwrap();
        assert_eq!(meta.name, "web");
        assert_eq!(meta.version, semver::Version::new(1, 2, 3));
    }

    #[test]
    fn test_new_rejects_bad_version() {
        assert!(ChartMetadata::new("web", "not-a-version").is_err());
    }

    #[test]
    fn test_serde_roundtrip() {
        let meta = ChartMetadata {
            name: "web".to_string(),
            version: semver::Version::new(0, 3, 0),
            app_version: Some("9.1".to_string()),
            description: None,
        };

        let json = serde_json::to_string(&meta).unwrap();
        let back: ChartMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(meta, back);
    }
}
