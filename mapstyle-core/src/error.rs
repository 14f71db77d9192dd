//! Error types for MAPSTYLE operations

use std::path::PathBuf;
use thiserror::Error;

use crate::GeometryType;

/// Configuration and identity errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("No default style configured for geometry type {geometry_type}")]
    NoDefaultStyle { geometry_type: GeometryType },
}

/// Style-source migration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Cannot migrate style from {from} to {to}: {reason}")]
pub struct MigrationError {
    pub from: String,
    pub to: String,
    pub reason: String,
}

/// Style compiler errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CompileError {
    #[error("Style rejected by compiler: {reason}")]
    Rejected { reason: String },

    #[error("Compiler failed before dispatch: {reason}")]
    Dispatch { reason: String },
}

/// Resource localization errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Failed to localize resource {resource}: {reason}")]
pub struct LocalizationError {
    pub resource: String,
    pub reason: String,
}

/// Key-value store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store connection failed: {reason}")]
    Connection { reason: String },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Malformed entry under {key}: {reason}")]
    Serialization { key: String, reason: String },

    #[error("Store lock poisoned")]
    LockPoisoned,
}

/// Resource cache filesystem errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Filesystem error at {}: {reason}", path.display())]
pub struct FilesystemError {
    pub path: PathBuf,
    pub reason: String,
}

/// Master error type for all MAPSTYLE errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StyleError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),

    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),

    #[error("Localization error: {0}")]
    Localization(#[from] LocalizationError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Filesystem error: {0}")]
    Filesystem(#[from] FilesystemError),
}

/// Result type alias for MAPSTYLE operations.
pub type StyleResult<T> = Result<T, StyleError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display_no_default_style() {
        let err = ConfigError::NoDefaultStyle {
            geometry_type: GeometryType::Raster,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("No default style"));
        assert!(msg.contains("raster"));
    }

    #[test]
    fn test_migration_error_display() {
        let err = MigrationError {
            from: "2.0.0".to_string(),
            to: "3.0.0".to_string(),
            reason: "unsupported selector".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("2.0.0"));
        assert!(msg.contains("3.0.0"));
        assert!(msg.contains("unsupported selector"));
    }

    #[test]
    fn test_filesystem_error_display_includes_path() {
        let err = FilesystemError {
            path: PathBuf::from("/tmp/mapstyle/db/table"),
            reason: "permission denied".to_string(),
        };
        assert!(format!("{}", err).contains("/tmp/mapstyle/db/table"));
    }

    #[test]
    fn test_style_error_from_store_error() {
        let err: StyleError = StoreError::TransactionFailed {
            reason: "connection reset".to_string(),
        }
        .into();
        assert!(matches!(err, StyleError::Store(_)));
        assert!(format!("{}", err).contains("connection reset"));
    }

    #[test]
    fn test_style_error_from_compile_error() {
        let err: StyleError = CompileError::Rejected {
            reason: "unknown property".to_string(),
        }
        .into();
        assert!(matches!(err, StyleError::Compile(CompileError::Rejected { .. })));
    }
}
