//! Error handling module for deskstrap
//!
//! Provides centralized error types using thiserror. Step actions report
//! failures with `anyhow` context chains; everything around them (ledger,
//! catalog, transcript, restart scheduling) uses these types.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for deskstrap
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// IO errors (marker directory, transcript, staging files)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Catalog loading or validation errors
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Completion ledger errors
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Pre-flight environment checks failed
    #[error("Pre-flight check failed: {0}")]
    Preflight(String),

    /// Restart could not be scheduled
    #[error("Restart scheduling failed: {0}")]
    Restart(String),
}

/// Result type alias for deskstrap operations
pub type Result<T> = std::result::Result<T, ProvisionError>;

impl ProvisionError {
    /// Create a pre-flight error
    pub fn preflight(msg: impl Into<String>) -> Self {
        Self::Preflight(msg.into())
    }

    /// Create a restart scheduling error
    pub fn restart(msg: impl Into<String>) -> Self {
        Self::Restart(msg.into())
    }
}

/// Errors raised by a completion ledger backend
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Marker key does not satisfy the key rules
    #[error("Invalid marker key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    /// Backend storage could not be read or written
    #[error("Marker store {path:?}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl LedgerError {
    /// Create an invalid-key error
    pub fn invalid_key(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Wrap an IO error with the path it happened on
    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }
}

/// Errors found while loading or validating a catalog file
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// Catalog file could not be read
    #[error("Failed to read catalog {path}: {reason}")]
    Read { path: String, reason: String },

    /// Catalog file is not valid JSON for the catalog schema
    #[error("Invalid catalog format: {reason}")]
    InvalidFormat { reason: String },

    /// Catalog has no steps
    #[error("Catalog contains no steps")]
    Empty,

    /// A step is misconfigured
    #[error("Step #{index} ({name}): {reason}")]
    InvalidStep {
        index: usize,
        name: String,
        reason: String,
    },

    /// A catalog-wide setting is unusable
    #[error("Setting '{setting}': {reason}")]
    InvalidSetting { setting: String, reason: String },

    /// Two steps share a marker key
    #[error("Marker '{marker}' is used by both '{first}' and '{second}'")]
    DuplicateMarker {
        marker: String,
        first: String,
        second: String,
    },
}

impl CatalogError {
    /// Create an invalid-step error
    pub fn invalid_step(index: usize, name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidStep {
            index,
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid-setting error
    pub fn invalid_setting(setting: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSetting {
            setting: setting.into(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for CatalogError {
    fn from(err: serde_json::Error) -> Self {
        CatalogError::InvalidFormat {
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProvisionError::preflight("share not reachable");
        assert_eq!(err.to_string(), "Pre-flight check failed: share not reachable");

        let err = ProvisionError::restart("shutdown exited with code 1");
        assert_eq!(err.to_string(), "Restart scheduling failed: shutdown exited with code 1");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ProvisionError = io_err.into();
        assert!(matches!(err, ProvisionError::Io(_)));
    }

    #[test]
    fn test_catalog_error_conversion() {
        let err: ProvisionError = CatalogError::Empty.into();
        assert!(matches!(err, ProvisionError::Catalog(CatalogError::Empty)));
        assert_eq!(err.to_string(), "Catalog error: Catalog contains no steps");
    }

    #[test]
    fn test_ledger_error_display() {
        let err = LedgerError::invalid_key("a/b", "contains a path separator");
        assert_eq!(
            err.to_string(),
            "Invalid marker key 'a/b': contains a path separator"
        );
    }

    #[test]
    fn test_invalid_setting_display() {
        let err = CatalogError::invalid_setting("restart.program", "is empty");
        assert_eq!(err.to_string(), "Setting 'restart.program': is empty");
    }

    #[test]
    fn test_json_error_maps_to_invalid_format() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: CatalogError = json_err.into();
        assert!(matches!(err, CatalogError::InvalidFormat { .. }));
    }
}
