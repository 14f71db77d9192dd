//! MAPSTYLE Core - Style Cache Types
//!
//! Pure data structures shared by the render pipeline and the storage layer.
//! This crate contains no I/O.

mod config;
mod document;
mod error;
mod identity;
mod version;

pub use config::{DatasourceConfig, DefaultStyles, StyleCacheConfig, TABLE_PLACEHOLDER, WEB_MERCATOR};
pub use document::{Layer, LayerDatasource, StyleDocument, Stylesheet};
pub use error::{
    CompileError, ConfigError, FilesystemError, LocalizationError, MigrationError, StoreError,
    StyleError, StyleResult,
};
pub use identity::{GeometryType, Identity, StyleOverride};
pub use version::{MigrationDirection, VersionResolver};

use serde::{Deserialize, Serialize};

// ============================================================================
// STYLE RECORDS AND ARTIFACTS
// ============================================================================

/// A style source together with the version of the styling language it is
/// written in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StyleRecord {
    pub style: String,
    pub version: String,
}

impl StyleRecord {
    pub fn new(style: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            style: style.into(),
            version: version.into(),
        }
    }
}

/// A rendering document and the compiler version that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompiledArtifact {
    pub xml: String,
    pub version: String,
}

impl CompiledArtifact {
    pub fn new(xml: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            xml: xml.into(),
            version: version.into(),
        }
    }
}

// ============================================================================
// CACHE ENTRIES
// ============================================================================

/// The record persisted under a cache key.
///
/// Base entries carry the style record and the artifact; derived entries
/// carry only the artifact. Every field is optional on the wire so partially
/// seeded base entries (style without artifact) round-trip.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xml: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xml_version: Option<String>,
}

impl CacheEntry {
    /// A base entry holding both the style and its artifact.
    pub fn base(record: StyleRecord, artifact: CompiledArtifact) -> Self {
        Self::default().with_style(record).with_artifact(artifact)
    }

    /// A derived entry holding only an artifact.
    pub fn derived(artifact: CompiledArtifact) -> Self {
        Self::default().with_artifact(artifact)
    }

    pub fn with_style(mut self, record: StyleRecord) -> Self {
        self.style = Some(record.style);
        self.version = Some(record.version);
        self
    }

    pub fn with_artifact(mut self, artifact: CompiledArtifact) -> Self {
        self.xml = Some(artifact.xml);
        self.xml_version = Some(artifact.version);
        self
    }

    /// The stored style record, if both style and version are present.
    pub fn style_record(&self) -> Option<StyleRecord> {
        match (&self.style, &self.version) {
            (Some(style), Some(version)) => Some(StyleRecord::new(style, version)),
            _ => None,
        }
    }

    /// The stored artifact, if both document and version are present.
    pub fn artifact(&self) -> Option<CompiledArtifact> {
        match (&self.xml, &self.xml_version) {
            (Some(xml), Some(version)) => Some(CompiledArtifact::new(xml, version)),
            _ => None,
        }
    }

    /// Serialize to the string form kept in the store.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse the string form kept in the store.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_entry_has_no_style() {
        let entry = CacheEntry::derived(CompiledArtifact::new("<Map/>", "3.0.12"));
        assert!(entry.style_record().is_none());
        assert_eq!(entry.artifact(), Some(CompiledArtifact::new("<Map/>", "3.0.12")));
    }

    #[test]
    fn test_partial_base_entry_has_no_artifact() {
        let entry = CacheEntry::default().with_style(StyleRecord::new("#a {}", "2.0.0"));
        assert_eq!(entry.style_record(), Some(StyleRecord::new("#a {}", "2.0.0")));
        assert!(entry.artifact().is_none());
    }

    #[test]
    fn test_entry_json_omits_absent_fields() {
        let entry = CacheEntry::derived(CompiledArtifact::new("<Map/>", "3.0.12"));
        let json = entry.to_json().expect("serialize");
        assert!(!json.contains("\"style\""));
        assert!(json.contains("\"xml_version\":\"3.0.12\""));
    }

    #[test]
    fn test_entry_parses_legacy_partial_record() {
        let entry = CacheEntry::from_json(r##"{"style":"#a {}","version":"2.0.0"}"##)
            .expect("parse");
        assert_eq!(entry.style.as_deref(), Some("#a {}"));
        assert!(entry.xml.is_none());
    }
}
