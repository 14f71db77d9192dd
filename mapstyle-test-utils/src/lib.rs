//! MAPSTYLE Test Utilities
//!
//! Shared test infrastructure for the MAPSTYLE workspace:
//! - Mock collaborators with call counters
//! - Proptest generators for identities and style records
//! - Fixtures for common configurations
//! - Tracing setup for test output

pub use mapstyle_core::{
    CompileError, CompiledArtifact, DefaultStyles, GeometryType, Identity, LocalizationError,
    MigrationError, StyleCacheConfig, StyleDocument, StyleError, StyleOverride, StyleRecord,
};
pub use mapstyle_render::{Collaborators, ResourceLocalizer, StyleCompiler, StyleMigrator};

use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// MOCK COLLABORATORS
// ============================================================================

/// Mock compiler wrapping the style in a `<Map>` element.
///
/// Styles containing the configured failure marker are rejected. An
/// optional delay is applied after the call is counted, so a test can
/// observe that a compile is in flight.
#[derive(Debug, Default)]
pub struct MockCompiler {
    calls: AtomicUsize,
    delay: Option<Duration>,
    fail_marker: Option<String>,
}

impl MockCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing_on(mut self, marker: impl Into<String>) -> Self {
        self.fail_marker = Some(marker.into());
        self
    }

    /// Number of compile calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The output for `style` rendered against `table`.
    pub fn rendered(table: &str, style: &str) -> String {
        format!("<Map table=\"{}\">{}</Map>", table, style)
    }
}

#[async_trait]
impl StyleCompiler for MockCompiler {
    async fn compile(&self, document: &StyleDocument) -> Result<String, CompileError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let style = document.style();
        if let Some(marker) = &self.fail_marker {
            if style.contains(marker.as_str()) {
                return Err(CompileError::Rejected {
                    reason: format!("unexpected {}", marker),
                });
            }
        }
        Ok(Self::rendered(&document.layer.datasource.table, style))
    }
}

/// Mock localizer that drops one marker file into the cache directory.
#[derive(Debug, Default)]
pub struct MockLocalizer {
    calls: AtomicUsize,
}

impl MockLocalizer {
    /// Name of the file written on every call.
    pub const RESOURCE_FILE: &'static str = "marker.svg";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResourceLocalizer for MockLocalizer {
    async fn localize(
        &self,
        document: StyleDocument,
        cache_dir: &Path,
    ) -> Result<StyleDocument, LocalizationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let to_err = |e: std::io::Error| LocalizationError {
            resource: Self::RESOURCE_FILE.to_string(),
            reason: e.to_string(),
        };
        tokio::fs::create_dir_all(cache_dir).await.map_err(to_err)?;
        tokio::fs::write(cache_dir.join(Self::RESOURCE_FILE), b"<svg/>")
            .await
            .map_err(to_err)?;
        Ok(document)
    }
}

/// Mock migrator appending a `/* to */` marker.
#[derive(Debug, Default)]
pub struct MockMigrator {
    calls: AtomicUsize,
    fail_marker: Option<String>,
}

impl MockMigrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(mut self, marker: impl Into<String>) -> Self {
        self.fail_marker = Some(marker.into());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The output for `style` migrated to `to`.
    pub fn migrated(style: &str, to: &str) -> String {
        format!("{} /* {} */", style, to)
    }
}

#[async_trait]
impl StyleMigrator for MockMigrator {
    async fn migrate(&self, style: &str, from: &str, to: &str) -> Result<String, MigrationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(marker) = &self.fail_marker {
            if style.contains(marker.as_str()) {
                return Err(MigrationError {
                    from: from.to_string(),
                    to: to.to_string(),
                    reason: format!("unsupported construct {}", marker),
                });
            }
        }
        Ok(Self::migrated(style, to))
    }
}

/// The three mocks plus the [`Collaborators`] built from them.
#[derive(Debug, Clone)]
pub struct MockCollaborators {
    pub compiler: Arc<MockCompiler>,
    pub localizer: Arc<MockLocalizer>,
    pub migrator: Arc<MockMigrator>,
}

impl MockCollaborators {
    pub fn new() -> Self {
        Self::with_compiler(MockCompiler::new())
    }

    pub fn with_compiler(compiler: MockCompiler) -> Self {
        Self {
            compiler: Arc::new(compiler),
            localizer: Arc::new(MockLocalizer::new()),
            migrator: Arc::new(MockMigrator::new()),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators::new(
            self.compiler.clone(),
            self.localizer.clone(),
            self.migrator.clone(),
        )
    }
}

impl Default for MockCollaborators {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TRACING
// ============================================================================

/// Install a fmt subscriber filtered by `RUST_LOG` (default `warn`).
///
/// Safe to call from every test; only the first call installs.
pub fn init_test_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for MAPSTYLE types.

    use super::*;
    use proptest::prelude::*;

    /// Generate any geometry type.
    pub fn arb_geometry_type() -> impl Strategy<Value = GeometryType> {
        prop_oneof![
            Just(GeometryType::Point),
            Just(GeometryType::LineString),
            Just(GeometryType::Polygon),
            Just(GeometryType::MultiPoint),
            Just(GeometryType::MultiLineString),
            Just(GeometryType::MultiPolygon),
            Just(GeometryType::Raster),
        ]
    }

    /// Generate a database or table name that passes identity validation.
    pub fn arb_name() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_]{0,23}"
    }

    /// Generate a row filter, including awkward characters.
    pub fn arb_sql_filter() -> impl Strategy<Value = String> {
        prop_oneof![
            Just(String::new()),
            "select \\* from [a-z]{1,8} where [a-z]{1,8} = [0-9]{1,4}",
            any::<String>(),
        ]
    }

    /// Generate a semver-shaped version string.
    pub fn arb_version() -> impl Strategy<Value = String> {
        (0u32..4, 0u32..10, 0u32..20).prop_map(|(a, b, c)| format!("{}.{}.{}", a, b, c))
    }

    /// Generate a style record.
    pub fn arb_style_record() -> impl Strategy<Value = StyleRecord> {
        ("#[a-z]{1,8} \\{[a-z-]{1,12}: [0-9]{1,3};\\}", arb_version())
            .prop_map(|(style, version)| StyleRecord::new(style, version))
    }

    /// Generate a style override with or without a version.
    pub fn arb_style_override() -> impl Strategy<Value = StyleOverride> {
        (any::<String>(), proptest::option::of(arb_version())).prop_map(|(style, version)| {
            let style_override = StyleOverride::new(style);
            match version {
                Some(version) => style_override.with_version(version),
                None => style_override,
            }
        })
    }

    /// Generate a valid identity with optional filter and override.
    pub fn arb_identity() -> impl Strategy<Value = Identity> {
        (
            arb_name(),
            arb_name(),
            arb_geometry_type(),
            proptest::option::of(arb_sql_filter()),
            proptest::option::of(arb_style_override()),
        )
            .prop_filter_map(
                "generated names are valid",
                |(dbname, table, geometry_type, sql, style_override)| {
                    let mut identity = Identity::new(dbname, table, geometry_type).ok()?;
                    if let Some(sql) = sql {
                        identity = identity.with_sql_filter(sql);
                    }
                    if let Some(style_override) = style_override {
                        identity = identity.with_style_override(style_override);
                    }
                    Some(identity)
                },
            )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common testing scenarios.

    use super::*;

    pub const TARGET_VERSION: &str = "3.0.12";
    pub const DEFAULT_STYLE_VERSION: &str = "2.0.0";

    /// Config with standard default styles and resources under `root`.
    pub fn test_config(root: &Path) -> StyleCacheConfig {
        StyleCacheConfig::new(TARGET_VERSION, DEFAULT_STYLE_VERSION)
            .with_resource_cache_root(root)
    }

    /// A line table with no overrides.
    pub fn roads() -> Identity {
        Identity::new("gis", "roads", GeometryType::LineString)
            .unwrap_or_else(|e| panic!("fixture identity should be valid: {e}"))
    }

    /// A polygon table with no overrides.
    pub fn parks() -> Identity {
        Identity::new("gis", "parks", GeometryType::Polygon)
            .unwrap_or_else(|e| panic!("fixture identity should be valid: {e}"))
    }

    /// A style written for the target version.
    pub fn current_style() -> StyleRecord {
        StyleRecord::new("#roads { line-width: 2; }", TARGET_VERSION)
    }

    /// A style written for an older version.
    pub fn legacy_style() -> StyleRecord {
        StyleRecord::new("#roads { line-width: 1; }", DEFAULT_STYLE_VERSION)
    }
}
