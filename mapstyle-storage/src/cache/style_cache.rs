//! The style cache controller.
//!
//! Orchestrates key derivation, the optimistic commit protocol, version
//! checks and the render pipeline for one identity.
//!
//! # Key roles
//!
//! The *base key* holds the authoritative style record and the artifact
//! compiled from it. When a row filter or a style override is active, the
//! *active key* is an extended key holding only an artifact. Extended
//! entries are created lazily on first use and are deleted whenever the
//! base entry is rewritten or removed.
//!
//! # Consistency
//!
//! A miss on an extended key renders from the base record. The base key
//! is watched before it is read, and the artifact is committed only if the
//! base is unchanged, so an artifact compiled from a superseded style is
//! never stored.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use mapstyle_core::{
    CacheEntry, CompiledArtifact, Identity, StyleCacheConfig, StyleOverride, StyleRecord,
    StyleResult, VersionResolver,
};
use mapstyle_render::{Collaborators, Renderer};
use tracing::Instrument;

use super::guard::{read_entry, ConsistencyGuard};
use super::key::KeyDeriver;
use super::pool::StorePool;
use super::purger::ResourceCachePurger;
use super::traits::{CommitOutcome, StyleCacheStats, TransactionalStore};

// ============================================================================
// READ RESULT
// ============================================================================

/// How an `init` was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// A fresh artifact was already stored.
    Hit,
    /// The artifact was rendered. `committed` is false when the base entry
    /// changed underneath and the write was discarded.
    Miss { committed: bool },
}

/// An artifact together with how it was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleRead {
    pub artifact: CompiledArtifact,
    pub status: CacheStatus,
}

// ============================================================================
// STATISTICS
// ============================================================================

#[derive(Debug, Default)]
struct StatsCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    renders: AtomicU64,
    commits: AtomicU64,
    aborted_commits: AtomicU64,
}

impl StatsCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> StyleCacheStats {
        StyleCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            renders: self.renders.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            aborted_commits: self.aborted_commits.load(Ordering::Relaxed),
        }
    }
}

/// Where a miss takes its style from.
enum StyleSource {
    Override(StyleRecord),
    Base {
        record: StyleRecord,
        entry: Option<CacheEntry>,
    },
}

impl StyleSource {
    fn record(&self) -> &StyleRecord {
        match self {
            Self::Override(record) | Self::Base { record, .. } => record,
        }
    }
}

// ============================================================================
// STYLE CACHE
// ============================================================================

/// Caches compiled stylesheets for one identity.
///
/// # Example
///
/// ```ignore
/// let identity = Identity::new("gis", "roads", GeometryType::LineString)?
///     .with_sql_filter("select * from roads where kind = 'highway'");
/// let cache = StyleCache::new(identity, config, collaborators, pool)?;
///
/// let xml = cache.to_xml().await?;
/// ```
#[derive(Debug)]
pub struct StyleCache<S> {
    identity: Identity,
    renderer: Renderer,
    pool: StorePool<S>,
    purger: ResourceCachePurger,
    base_key: String,
    extended_key: Option<String>,
    stats: Arc<StatsCounters>,
}

impl<S: TransactionalStore> StyleCache<S> {
    /// Create a controller for `identity`.
    ///
    /// # Errors
    /// `ConfigError` when `config` fails validation.
    pub fn new(
        identity: Identity,
        config: Arc<StyleCacheConfig>,
        collaborators: Collaborators,
        pool: StorePool<S>,
    ) -> StyleResult<Self> {
        config.validate()?;

        let purger = ResourceCachePurger::new(&config.resource_cache_root);
        let renderer = Renderer::new(collaborators, config);
        let (base_key, extended_key) = KeyDeriver::keys_for(&identity, renderer.versions());

        Ok(Self {
            identity,
            renderer,
            pool,
            purger,
            base_key,
            extended_key,
            stats: Arc::new(StatsCounters::default()),
        })
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn base_key(&self) -> &str {
        &self.base_key
    }

    pub fn extended_key(&self) -> Option<&str> {
        self.extended_key.as_deref()
    }

    /// The key reads and writes go to: the extended key when present.
    pub fn active_key(&self) -> &str {
        self.extended_key.as_deref().unwrap_or(&self.base_key)
    }

    pub fn versions(&self) -> &VersionResolver {
        self.renderer.versions()
    }

    /// Directory the localizer writes this identity's resources into.
    pub fn resource_dir(&self) -> PathBuf {
        self.purger.dir_for(&self.identity)
    }

    pub fn stats(&self) -> StyleCacheStats {
        self.stats.snapshot()
    }

    // ------------------------------------------------------------------------
    // init
    // ------------------------------------------------------------------------

    /// The compiled artifact for the active key, rendering on a miss.
    pub async fn init(&self) -> StyleResult<CompiledArtifact> {
        Ok(self.init_with_status().await?.artifact)
    }

    /// Like [`StyleCache::init`], also reporting hit or miss.
    ///
    /// On a miss the new artifact is returned even when the commit was
    /// aborted; the stored state is then left to the next caller.
    pub async fn init_with_status(&self) -> StyleResult<StyleRead> {
        let span = tracing::debug_span!("style_cache.init", key = %self.active_key());
        self.load_or_render().instrument(span).await
    }

    async fn load_or_render(&self) -> StyleResult<StyleRead> {
        let conn = self.pool.acquire().await?;
        let active_key = self.active_key();

        if let Some(artifact) = read_entry(&*conn, active_key)
            .await?
            .and_then(|entry| entry.artifact())
        {
            if !self.versions().is_stale(Some(artifact.version.as_str())) {
                StatsCounters::bump(&self.stats.hits);
                tracing::debug!("Cache hit");
                return Ok(StyleRead {
                    artifact,
                    status: CacheStatus::Hit,
                });
            }
            tracing::debug!(
                cached = %artifact.version,
                target = %self.versions().target_version(),
                "Cached artifact is stale"
            );
        }
        StatsCounters::bump(&self.stats.misses);

        let mut guard = ConsistencyGuard::new(&*conn);
        let source = self.resolve_source(&*conn, &mut guard).await?;
        let artifact = self.render(source.record()).await?;

        match source {
            StyleSource::Override(_) => {
                guard.set_entry(active_key, &CacheEntry::derived(artifact.clone()))?;
            }
            StyleSource::Base { record, entry } => {
                let entry = entry.unwrap_or_default();
                match &self.extended_key {
                    Some(extended_key) => {
                        guard.set_entry(extended_key, &CacheEntry::derived(artifact.clone()))?;
                        // Seed the base with the default style on first use.
                        if entry.style_record().as_ref() != Some(&record) {
                            guard.set_entry(&self.base_key, &entry.with_style(record))?;
                        }
                    }
                    None => {
                        let entry = entry.with_style(record).with_artifact(artifact.clone());
                        guard.set_entry(&self.base_key, &entry)?;
                    }
                }
            }
        }

        let committed = self.record_commit(guard.commit().await?);
        Ok(StyleRead {
            artifact,
            status: CacheStatus::Miss { committed },
        })
    }

    /// Pick the style to render on a miss. The base key is watched before
    /// it is read; an active override never touches the base.
    async fn resolve_source(
        &self,
        store: &S,
        guard: &mut ConsistencyGuard<'_, S>,
    ) -> StyleResult<StyleSource> {
        if let Some(style_override) = self.identity.style_override() {
            return Ok(StyleSource::Override(self.override_record(style_override)));
        }

        guard.watch(&self.base_key).await?;
        let entry = read_entry(store, &self.base_key).await?;
        let record = self.record_or_default(entry.as_ref())?;
        Ok(StyleSource::Base { record, entry })
    }

    // ------------------------------------------------------------------------
    // render
    // ------------------------------------------------------------------------

    /// Render `record` into this identity's resource directory.
    ///
    /// Touches no store. Migrates first when the record's version differs
    /// from the target.
    pub async fn render(&self, record: &StyleRecord) -> StyleResult<CompiledArtifact> {
        let artifact = self
            .renderer
            .render(&self.identity, record, &self.resource_dir())
            .await?;
        StatsCounters::bump(&self.stats.renders);
        Ok(artifact)
    }

    // ------------------------------------------------------------------------
    // style access
    // ------------------------------------------------------------------------

    /// The active style record.
    ///
    /// Ensures an artifact exists first. Returns the override when one is
    /// active, else the base record or the default style. With `convert`
    /// the record is migrated to the target version for display only.
    pub async fn get_style(&self, convert: bool) -> StyleResult<StyleRecord> {
        let span = tracing::debug_span!("style_cache.get_style", key = %self.active_key(), convert);
        async move {
            self.init().await?;

            let record = match self.identity.style_override() {
                Some(style_override) => self.override_record(style_override),
                None => {
                    let conn = self.pool.acquire().await?;
                    let entry = read_entry(&*conn, &self.base_key).await?;
                    self.record_or_default(entry.as_ref())?
                }
            };

            if convert {
                self.renderer.migrate(record).await
            } else {
                Ok(record)
            }
        }
        .instrument(span)
        .await
    }

    /// Replace the style and invalidate every derived entry.
    ///
    /// Without an override the record and its artifact are written to the
    /// base key. With an override nothing is persisted: the override is
    /// replaced and the extended key recomputed. Derived entries are
    /// deleted in the same transaction either way.
    pub async fn set_style(&mut self, record: StyleRecord, convert: bool) -> StyleResult<()> {
        let span = tracing::debug_span!("style_cache.set_style", key = %self.base_key, convert);
        async move {
            self.purger.purge(&self.identity).await?;

            let record = if convert {
                self.renderer.migrate(record).await?
            } else {
                record
            };
            let artifact = self.render(&record).await?;

            let conn = self.pool.acquire().await?;
            let mut guard = ConsistencyGuard::new(&*conn);

            // The controller only moves to the new override once the commit succeeds.
            let replaced = if self.identity.style_override().is_some() {
                let mut identity = self.identity.clone();
                identity.replace_style_override(
                    StyleOverride::new(record.style).with_version(record.version),
                );
                let (_, extended_key) = KeyDeriver::keys_for(&identity, self.renderer.versions());
                Some((identity, extended_key))
            } else {
                guard.set_entry(&self.base_key, &CacheEntry::base(record, artifact))?;
                None
            };
            guard.del_prefix(&KeyDeriver::derived_prefix(&self.base_key));

            self.record_commit(guard.commit().await?);

            if let Some((identity, extended_key)) = replaced {
                tracing::debug!(key = ?extended_key, "Replaced style override");
                self.identity = identity;
                self.extended_key = extended_key;
            }
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Delete the base entry and every derived entry.
    pub async fn del_style(&self) -> StyleResult<()> {
        let span = tracing::debug_span!("style_cache.del_style", key = %self.base_key);
        async move {
            self.purger.purge(&self.identity).await?;

            let conn = self.pool.acquire().await?;
            let mut guard = ConsistencyGuard::new(&*conn);
            guard.del(&self.base_key);
            guard.del_prefix(&KeyDeriver::derived_prefix(&self.base_key));

            self.record_commit(guard.commit().await?);
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Re-save the current style, forcing regeneration of every artifact.
    pub async fn reset_style(&mut self, convert: bool) -> StyleResult<()> {
        let record = self.get_style(convert).await?;
        self.set_style(record, convert).await
    }

    /// The rendering document for the active key.
    pub async fn to_xml(&self) -> StyleResult<String> {
        Ok(self.init().await?.xml)
    }

    // ------------------------------------------------------------------------
    // helpers
    // ------------------------------------------------------------------------

    fn override_record(&self, style_override: &StyleOverride) -> StyleRecord {
        StyleRecord::new(
            style_override.style.as_str(),
            self.versions()
                .resolve_style_version(style_override.version.as_deref()),
        )
    }

    fn record_or_default(&self, entry: Option<&CacheEntry>) -> StyleResult<StyleRecord> {
        if let Some(record) = entry.and_then(CacheEntry::style_record) {
            return Ok(record);
        }

        let config = self.renderer.config();
        let style = config
            .default_styles
            .style_for(self.identity.geometry_type(), self.identity.table())?;
        tracing::debug!(
            geometry_type = %self.identity.geometry_type(),
            "No stored style, using default"
        );
        Ok(StyleRecord::new(style, config.default_style_version.as_str()))
    }

    fn record_commit(&self, outcome: CommitOutcome) -> bool {
        match outcome {
            CommitOutcome::Committed => {
                StatsCounters::bump(&self.stats.commits);
                true
            }
            CommitOutcome::Aborted => {
                StatsCounters::bump(&self.stats.aborted_commits);
                false
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
