use thiserror::Error;

/// Mirror error types
#[derive(Error, Debug)]
pub enum MirrorError {
    /// Malformed reference, unreadable input, invalid settings
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Inspect, copy or publish failed against a registry
    #[error("Registry error: {registry} - {message}")]
    RegistryError { registry: String, message: String },

    /// The classifier has no strategy for this manifest
    #[error("Unsupported manifest: schemaVersion {schema_version}, mediaType {media_type}")]
    UnsupportedSchema {
        schema_version: u32,
        media_type: String,
    },

    /// Manifest or image config could not be interpreted
    #[error("Manifest error: {0}")]
    ManifestError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl MirrorError {
    /// Shorthand for a transport failure against `registry`.
    pub fn registry(registry: impl Into<String>, message: impl Into<String>) -> Self {
        MirrorError::RegistryError {
            registry: registry.into(),
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for MirrorError {
    fn from(err: serde_json::Error) -> Self {
        MirrorError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for MirrorError {
    fn from(err: serde_yaml::Error) -> Self {
        MirrorError::SerializationError(err.to_string())
    }
}

/// Result type alias for mirror operations
pub type Result<T> = std::result::Result<T, MirrorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let error = MirrorError::ConfigError("empty image spec".to_string());
        assert_eq!(error.to_string(), "Configuration error: empty image spec");
    }

    #[test]
    fn test_registry_error_display() {
        let error = MirrorError::registry("ghcr.io", "Authentication failed");
        assert_eq!(
            error.to_string(),
            "Registry error: ghcr.io - Authentication failed"
        );
    }

    #[test]
    fn test_unsupported_schema_display() {
        let error = MirrorError::UnsupportedSchema {
            schema_version: 3,
            media_type: "application/x-unknown".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Unsupported manifest: schemaVersion 3, mediaType application/x-unknown"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: MirrorError = io_error.into();
        assert!(matches!(error, MirrorError::IoError(_)));
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_serde_json_error_conversion() {
        let result: std::result::Result<serde_json::Value, _> = serde_json::from_str("{ nope }");
        let error: MirrorError = result.unwrap_err().into();
        assert!(matches!(error, MirrorError::SerializationError(_)));
    }

    #[test]
    fn test_serde_yaml_error_conversion() {
        let result: std::result::Result<serde_yaml::Value, _> =
            serde_yaml::from_str("invalid: yaml: content:");
        let error: MirrorError = result.unwrap_err().into();
        assert!(matches!(error, MirrorError::SerializationError(_)));
    }

    #[test]
    fn test_other_error_display() {
        let error = MirrorError::Other("Unknown error occurred".to_string());
        assert_eq!(error.to_string(), "Unknown error occurred");
    }
}
