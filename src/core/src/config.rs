//! Process-wide mirror configuration.
//!
//! Shared read-only by every job: the default registry inserted by the
//! reference normalizer, the optional destination organization override and
//! the set of architectures that are mirrored.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{MirrorError, Result};

/// Registry inserted in front of specs that carry no registry host.
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// Architectures mirrored when none are configured.
pub const DEFAULT_ARCHITECTURES: &[&str] = &["amd64", "arm64", "arm", "s390x"];

/// Mirror configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    /// Registry used for specs without an explicit registry
    pub default_registry: String,

    /// Replaces the organization segment of every destination spec
    pub dest_org: Option<String>,

    /// Architectures of interest, in sweep order
    pub architectures: Vec<String>,

    /// Number of jobs processed at the same time
    pub concurrency: usize,

    /// Repository description publishing
    pub description: DescriptionConfig,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            default_registry: DEFAULT_REGISTRY.to_string(),
            dest_org: None,
            architectures: DEFAULT_ARCHITECTURES.iter().map(|a| a.to_string()).collect(),
            concurrency: 1,
            description: DescriptionConfig::default(),
        }
    }
}

impl MirrorConfig {
    /// Load a configuration file (YAML). Missing keys take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|e| {
            MirrorError::ConfigError(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        let config: MirrorConfig = serde_yaml::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings no job could run with.
    pub fn validate(&self) -> Result<()> {
        if self.default_registry.trim().is_empty() {
            return Err(MirrorError::ConfigError(
                "default registry must not be empty".to_string(),
            ));
        }
        if self.architectures.is_empty() {
            return Err(MirrorError::ConfigError(
                "at least one architecture must be configured".to_string(),
            ));
        }
        if let Some(arch) = self.architectures.iter().find(|a| a.trim().is_empty()) {
            return Err(MirrorError::ConfigError(format!(
                "invalid architecture name '{}'",
                arch
            )));
        }
        if let Some(org) = &self.dest_org {
            if org.trim().is_empty() || org.contains('/') {
                return Err(MirrorError::ConfigError(format!(
                    "invalid destination organization '{}'",
                    org
                )));
            }
        }
        if self.concurrency == 0 {
            return Err(MirrorError::ConfigError(
                "concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether `architecture` is one of the configured architectures.
    pub fn wants(&self, architecture: &str) -> bool {
        self.architectures.iter().any(|a| a == architecture)
    }
}

/// Repository description settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DescriptionConfig {
    /// Publish a "mirror of" description after a successful job
    pub enabled: bool,
}

impl Default for DescriptionConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = MirrorConfig::default();
        assert_eq!(config.default_registry, "docker.io");
        assert_eq!(config.architectures, vec!["amd64", "arm64", "arm", "s390x"]);
        assert!(config.dest_org.is_none());
        assert_eq!(config.concurrency, 1);
        assert!(config.description.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_wants() {
        let config = MirrorConfig::default();
        assert!(config.wants("arm"));
        assert!(!config.wants("ppc64le"));
    }

    #[test]
    fn test_validate_empty_architectures() {
        let config = MirrorConfig {
            architectures: vec![],
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(MirrorError::ConfigError(_))));
    }

    #[test]
    fn test_validate_bad_org() {
        let config = MirrorConfig {
            dest_org: Some("a/b".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = MirrorConfig {
            dest_org: Some("  ".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_concurrency() {
        let config = MirrorConfig {
            concurrency: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_partial() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mirror.yaml");
        std::fs::write(
            &path,
            "default_registry: quay.io\narchitectures: [amd64, arm64]\ndest_org: mirrors\n",
        )
        .unwrap();

        let config = MirrorConfig::from_file(&path).unwrap();
        assert_eq!(config.default_registry, "quay.io");
        assert_eq!(config.architectures, vec!["amd64", "arm64"]);
        assert_eq!(config.dest_org.as_deref(), Some("mirrors"));
        assert_eq!(config.concurrency, 1);
    }

    #[test]
    fn test_from_file_missing() {
        let dir = TempDir::new().unwrap();
        let result = MirrorConfig::from_file(dir.path().join("absent.yaml"));
        assert!(matches!(result, Err(MirrorError::ConfigError(_))));
    }

    #[test]
    fn test_from_file_invalid() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mirror.yaml");
        std::fs::write(&path, "architectures: []\n").unwrap();
        assert!(MirrorConfig::from_file(&path).is_err());
    }
}
