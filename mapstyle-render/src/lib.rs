//! MAPSTYLE Render - Collaborator Traits and Render Pipeline
//!
//! Defines the interfaces the style compiler, resource localizer and style
//! migrator must implement, and the [`Renderer`] that chains them.
//! Actual collaborator implementations are user-supplied.

use async_trait::async_trait;
use mapstyle_core::{
    CompileError, CompiledArtifact, Identity, LocalizationError, MigrationError, StyleCacheConfig,
    StyleDocument, StyleRecord, StyleResult, VersionResolver,
};
use std::path::Path;
use std::sync::Arc;

// ============================================================================
// COLLABORATOR TRAITS
// ============================================================================

/// Compiles a style document into a rendering document.
///
/// Implementations must be thread-safe (Send + Sync). A call yields exactly
/// one outcome; failures raised before the compiler is dispatched and
/// failures reported by the compiler itself both come back as `Err`.
///
/// # Example
/// ```ignore
/// struct CartoCompiler { /* ... */ }
///
/// #[async_trait]
/// impl StyleCompiler for CartoCompiler {
///     async fn compile(&self, document: &StyleDocument) -> Result<String, CompileError> {
///         // Run the style compiler
///     }
/// }
/// ```
#[async_trait]
pub trait StyleCompiler: Send + Sync {
    /// Compile `document` into the renderer's input format.
    async fn compile(&self, document: &StyleDocument) -> Result<String, CompileError>;
}

/// Materializes externally referenced resources (fonts, markers, patterns)
/// into a local directory and rewrites the document to point at them.
#[async_trait]
pub trait ResourceLocalizer: Send + Sync {
    /// Localize the resources of `document` into `cache_dir`.
    ///
    /// # Returns
    /// * `Ok(StyleDocument)` - The document referencing local paths
    /// * `Err(LocalizationError)` - If a resource cannot be fetched or written
    async fn localize(
        &self,
        document: StyleDocument,
        cache_dir: &Path,
    ) -> Result<StyleDocument, LocalizationError>;
}

/// Rewrites a style source between versions of the styling language.
#[async_trait]
pub trait StyleMigrator: Send + Sync {
    /// Migrate `style` from version `from` to version `to`.
    ///
    /// # Returns
    /// * `Ok(String)` - The migrated style source
    /// * `Err(MigrationError)` - If the source uses an unsupported construct
    async fn migrate(&self, style: &str, from: &str, to: &str) -> Result<String, MigrationError>;
}

/// Localizer for deployments whose styles never reference external files.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughLocalizer;

#[async_trait]
impl ResourceLocalizer for PassthroughLocalizer {
    async fn localize(
        &self,
        document: StyleDocument,
        _cache_dir: &Path,
    ) -> Result<StyleDocument, LocalizationError> {
        Ok(document)
    }
}

// ============================================================================
// COLLABORATORS
// ============================================================================

/// The three collaborators a renderer needs.
///
/// All three are required - there are no implicit defaults.
#[derive(Clone)]
pub struct Collaborators {
    pub compiler: Arc<dyn StyleCompiler>,
    pub localizer: Arc<dyn ResourceLocalizer>,
    pub migrator: Arc<dyn StyleMigrator>,
}

impl Collaborators {
    pub fn new(
        compiler: Arc<dyn StyleCompiler>,
        localizer: Arc<dyn ResourceLocalizer>,
        migrator: Arc<dyn StyleMigrator>,
    ) -> Self {
        Self {
            compiler,
            localizer,
            migrator,
        }
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

// ============================================================================
// RENDERER
// ============================================================================

/// Runs the render pipeline: migrate, build document, localize, compile.
#[derive(Debug, Clone)]
pub struct Renderer {
    collaborators: Collaborators,
    config: Arc<StyleCacheConfig>,
    versions: VersionResolver,
}

impl Renderer {
    pub fn new(collaborators: Collaborators, config: Arc<StyleCacheConfig>) -> Self {
        let versions = VersionResolver::from_config(&config);
        Self {
            collaborators,
            config,
            versions,
        }
    }

    pub fn versions(&self) -> &VersionResolver {
        &self.versions
    }

    pub fn config(&self) -> &StyleCacheConfig {
        &self.config
    }

    /// Bring `record` to the target version, calling the migrator only when
    /// the versions differ.
    pub async fn migrate(&self, record: StyleRecord) -> StyleResult<StyleRecord> {
        if !self.versions.needs_migration(&record.version) {
            return Ok(record);
        }

        let target = self.versions.target_version();
        tracing::debug!(
            from = %record.version,
            to = %target,
            direction = %self.versions.direction(&record.version),
            "Migrating style source"
        );

        let style = self
            .collaborators
            .migrator
            .migrate(&record.style, &record.version, target)
            .await?;
        Ok(StyleRecord::new(style, target))
    }

    /// Render `record` for `identity`, localizing into `resource_dir`.
    ///
    /// The artifact is tagged with the target version. No store is touched;
    /// any failure leaves nothing behind but files in `resource_dir`.
    pub async fn render(
        &self,
        identity: &Identity,
        record: &StyleRecord,
        resource_dir: &Path,
    ) -> StyleResult<CompiledArtifact> {
        let record = self.migrate(record.clone()).await?;
        let document = StyleDocument::build(identity, &self.config, &record.style);

        let document = self
            .collaborators
            .localizer
            .localize(document, resource_dir)
            .await?;

        let xml = self.collaborators.compiler.compile(&document).await?;
        Ok(CompiledArtifact::new(xml, self.versions.target_version()))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use mapstyle_core::{GeometryType, StyleError};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct EchoCompiler {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl StyleCompiler for EchoCompiler {
        async fn compile(&self, document: &StyleDocument) -> Result<String, CompileError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if document.style().contains("invalid") {
                return Err(CompileError::Rejected {
                    reason: "invalid token".to_string(),
                });
            }
            Ok(format!("<Map>{}</Map>", document.style()))
        }
    }

    #[derive(Default)]
    struct SuffixMigrator {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl StyleMigrator for SuffixMigrator {
        async fn migrate(&self, style: &str, from: &str, to: &str) -> Result<String, MigrationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if style.contains("legacy") {
                return Err(MigrationError {
                    from: from.to_string(),
                    to: to.to_string(),
                    reason: "legacy construct".to_string(),
                });
            }
            Ok(format!("{} /* {} */", style, to))
        }
    }

    struct FailingLocalizer;

    #[async_trait]
    impl ResourceLocalizer for FailingLocalizer {
        async fn localize(
            &self,
            _document: StyleDocument,
            _cache_dir: &Path,
        ) -> Result<StyleDocument, LocalizationError> {
            Err(LocalizationError {
                resource: "http://example.com/marker.svg".to_string(),
                reason: "404".to_string(),
            })
        }
    }

    fn renderer_with(
        localizer: Arc<dyn ResourceLocalizer>,
    ) -> (Renderer, Arc<EchoCompiler>, Arc<SuffixMigrator>) {
        let compiler = Arc::new(EchoCompiler::default());
        let migrator = Arc::new(SuffixMigrator::default());
        let collaborators = Collaborators::new(compiler.clone(), localizer, migrator.clone());
        let config = Arc::new(StyleCacheConfig::new("3.0.12", "2.0.0"));
        (Renderer::new(collaborators, config), compiler, migrator)
    }

    fn identity() -> Identity {
        Identity::new("gis", "roads", GeometryType::LineString).expect("valid identity")
    }

    #[tokio::test]
    async fn test_render_at_target_version_skips_migration() {
        let (renderer, compiler, migrator) = renderer_with(Arc::new(PassthroughLocalizer));
        let record = StyleRecord::new("#roads {}", "3.0.12");

        let artifact = renderer
            .render(&identity(), &record, Path::new("/unused"))
            .await
            .expect("render should succeed");

        assert_eq!(artifact, CompiledArtifact::new("<Map>#roads {}</Map>", "3.0.12"));
        assert_eq!(compiler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(migrator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_render_migrates_older_style() {
        let (renderer, _compiler, migrator) = renderer_with(Arc::new(PassthroughLocalizer));
        let record = StyleRecord::new("#roads {}", "2.0.0");

        let artifact = renderer
            .render(&identity(), &record, Path::new("/unused"))
            .await
            .expect("render should succeed");

        assert_eq!(artifact.xml, "<Map>#roads {} /* 3.0.12 */</Map>");
        assert_eq!(migrator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_migration_failure_stops_pipeline() {
        let (renderer, compiler, _migrator) = renderer_with(Arc::new(PassthroughLocalizer));
        let record = StyleRecord::new("#roads { legacy: 1 }", "2.0.0");

        let err = renderer
            .render(&identity(), &record, Path::new("/unused"))
            .await
            .unwrap_err();

        assert!(matches!(err, StyleError::Migration(_)));
        assert_eq!(compiler.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_localization_failure_surfaces_as_is() {
        let (renderer, compiler, _migrator) = renderer_with(Arc::new(FailingLocalizer));
        let record = StyleRecord::new("#roads {}", "3.0.12");

        let err = renderer
            .render(&identity(), &record, Path::new("/unused"))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            StyleError::Localization(LocalizationError {
                resource: "http://example.com/marker.svg".to_string(),
                reason: "404".to_string(),
            })
        );
        assert_eq!(compiler.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_compile_failure_is_single_error() {
        let (renderer, _compiler, _migrator) = renderer_with(Arc::new(PassthroughLocalizer));
        let record = StyleRecord::new("#roads { invalid }", "3.0.12");

        let err = renderer
            .render(&identity(), &record, Path::new("/unused"))
            .await
            .unwrap_err();

        assert!(matches!(err, StyleError::Compile(CompileError::Rejected { .. })));
    }

    #[tokio::test]
    async fn test_migrate_returns_target_version() {
        let (renderer, _compiler, _migrator) = renderer_with(Arc::new(PassthroughLocalizer));
        let migrated = renderer
            .migrate(StyleRecord::new("#a {}", "2.0.0"))
            .await
            .expect("migrate should succeed");
        assert_eq!(migrated.version, "3.0.12");
    }
}
