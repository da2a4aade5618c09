//! Error types for reelbatch.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReelbatchError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Failed to render configuration: {0}")]
    ConfigRender(#[from] toml::ser::Error),

    // Pipeline definition errors
    #[error("Unknown pipeline stage: {name}")]
    UnknownStage { name: String },

    #[error("Invalid stage order: {message}")]
    StageOrder { message: String },

    // Scheduler lifecycle errors
    #[error("Batch scheduler is already running")]
    AlreadyRunning,

    #[error("Failed to spawn worker thread: {0}")]
    WorkerSpawn(std::io::Error),

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, ReelbatchError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_config_file_not_found_display() {
        let error = ReelbatchError::ConfigFileNotFound {
            path: "/path/to/config.toml".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Configuration file not found at /path/to/config.toml"
        );
    }

    #[test]
    fn test_config_invalid_value_display() {
        let error = ReelbatchError::ConfigInvalidValue {
            key: "cooldown.quota".to_string(),
            message: "expected a duration like 30m".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid configuration value for cooldown.quota: expected a duration like 30m"
        );
    }

    #[test]
    fn test_unknown_stage_display() {
        let error = ReelbatchError::UnknownStage {
            name: "upload".to_string(),
        };
        assert_eq!(error.to_string(), "Unknown pipeline stage: upload");
    }

    #[test]
    fn test_already_running_display() {
        assert_eq!(
            ReelbatchError::AlreadyRunning.to_string(),
            "Batch scheduler is already running"
        );
    }

    #[test]
    fn test_from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: ReelbatchError = io_error.into();
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_toml_error() {
        let toml_error = toml::from_str::<toml::Value>("invalid = toml = syntax").unwrap_err();
        let error: ReelbatchError = toml_error.into();
        assert!(error.to_string().contains("Configuration error"));

        let error_trait: &dyn std::error::Error = &error;
        assert!(error_trait.source().is_some());
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<ReelbatchError>();
        assert_sync::<ReelbatchError>();
    }
}
