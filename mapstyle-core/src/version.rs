//! Version resolution for compiled artifacts and style sources.
//!
//! Cache validity is decided by exact string equality against the target
//! compiler version. Semantic ordering is only computed to describe a
//! migration (for logs); it never influences whether an entry is fresh.

use std::cmp::Ordering;

use semver::Version;

use crate::StyleCacheConfig;

/// Which way a style source moves when migrated to the target version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationDirection {
    Same,
    Upgrade,
    Downgrade,
    /// At least one side is not a semantic version.
    Unordered,
}

impl std::fmt::Display for MigrationDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Same => write!(f, "same"),
            Self::Upgrade => write!(f, "upgrade"),
            Self::Downgrade => write!(f, "downgrade"),
            Self::Unordered => write!(f, "unordered"),
        }
    }
}

/// Decides staleness and migration need against the configured versions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionResolver {
    target_version: String,
    default_style_version: String,
}

impl VersionResolver {
    pub fn new(target_version: impl Into<String>, default_style_version: impl Into<String>) -> Self {
        Self {
            target_version: target_version.into(),
            default_style_version: default_style_version.into(),
        }
    }

    pub fn from_config(config: &StyleCacheConfig) -> Self {
        Self::new(&config.target_version, &config.default_style_version)
    }

    pub fn target_version(&self) -> &str {
        &self.target_version
    }

    pub fn default_style_version(&self) -> &str {
        &self.default_style_version
    }

    /// True when a stored artifact must be regenerated.
    pub fn is_stale(&self, artifact_version: Option<&str>) -> bool {
        artifact_version != Some(self.target_version.as_str())
    }

    /// True when a style source must be migrated before compiling.
    pub fn needs_migration(&self, style_version: &str) -> bool {
        style_version != self.target_version
    }

    /// Resolve an optional style version to a concrete one.
    pub fn resolve_style_version<'a>(&'a self, version: Option<&'a str>) -> &'a str {
        version.unwrap_or(&self.default_style_version)
    }

    /// Describe the migration from `from` to the target version.
    pub fn direction(&self, from: &str) -> MigrationDirection {
        if from == self.target_version {
            return MigrationDirection::Same;
        }
        match (Version::parse(from), Version::parse(&self.target_version)) {
            (Ok(from), Ok(to)) => match from.cmp(&to) {
                Ordering::Less => MigrationDirection::Upgrade,
                Ordering::Greater => MigrationDirection::Downgrade,
                Ordering::Equal => MigrationDirection::Same,
            },
            _ => MigrationDirection::Unordered,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> VersionResolver {
        VersionResolver::new("3.0.12", "2.0.0")
    }

    #[test]
    fn test_absent_artifact_version_is_stale() {
        assert!(resolver().is_stale(None));
    }

    #[test]
    fn test_staleness_is_exact_equality() {
        let r = resolver();
        assert!(!r.is_stale(Some("3.0.12")));
        assert!(r.is_stale(Some("3.0.11")));
        // Semantically equal but textually different still counts as stale.
        assert!(r.is_stale(Some("3.0.12+build1")));
        assert!(r.is_stale(Some("")));
    }

    #[test]
    fn test_needs_migration() {
        let r = resolver();
        assert!(r.needs_migration("2.0.0"));
        assert!(!r.needs_migration("3.0.12"));
    }

    #[test]
    fn test_resolve_style_version_falls_back_to_default() {
        let r = resolver();
        assert_eq!(r.resolve_style_version(None), "2.0.0");
        assert_eq!(r.resolve_style_version(Some("2.1.1")), "2.1.1");
    }

    #[test]
    fn test_direction() {
        let r = resolver();
        assert_eq!(r.direction("3.0.12"), MigrationDirection::Same);
        assert_eq!(r.direction("2.0.0"), MigrationDirection::Upgrade);
        assert_eq!(r.direction("3.1.0"), MigrationDirection::Downgrade);
        assert_eq!(r.direction("latest"), MigrationDirection::Unordered);
    }

    #[test]
    fn test_from_config() {
        let config = StyleCacheConfig::new("3.0.12", "2.0.0");
        assert_eq!(VersionResolver::from_config(&config), resolver());
    }
}
