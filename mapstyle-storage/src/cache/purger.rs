//! Best-effort cleanup of per-identity localized-resource directories.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use mapstyle_core::{FilesystemError, Identity, StyleResult};

/// What a purge removed and what it could not.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub removed: usize,
    pub failures: Vec<(PathBuf, String)>,
}

impl PurgeReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Deletes the files a localizer left behind for an identity.
#[derive(Debug, Clone)]
pub struct ResourceCachePurger {
    root: PathBuf,
}

impl ResourceCachePurger {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// `root/dbname/table`. Identity validation keeps these disjoint.
    pub fn dir_for(&self, identity: &Identity) -> PathBuf {
        self.root.join(identity.dbname()).join(identity.table())
    }

    /// Remove every regular file in the identity's directory.
    ///
    /// A missing directory means there is nothing to clear. Per-file
    /// failures are logged and reported, never fatal; every entry is
    /// attempted.
    ///
    /// # Errors
    /// `FilesystemError` when an existing directory cannot be listed.
    pub async fn purge(&self, identity: &Identity) -> StyleResult<PurgeReport> {
        let dir = self.dir_for(identity);
        let mut report = PurgeReport::default();

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(report),
            Err(e) => {
                return Err(FilesystemError {
                    path: dir,
                    reason: e.to_string(),
                }
                .into())
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(dir = %dir.display(), error = %e, "Failed to read resource cache entry");
                    report.failures.push((dir.clone(), e.to_string()));
                    break;
                }
            };

            let path = entry.path();
            match entry.file_type().await {
                Ok(kind) if kind.is_file() => {}
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to stat cached resource");
                    report.failures.push((path, e.to_string()));
                    continue;
                }
            }

            match tokio::fs::remove_file(&path).await {
                Ok(()) => report.removed += 1,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to remove cached resource");
                    report.failures.push((path, e.to_string()));
                }
            }
        }

        tracing::debug!(
            dir = %dir.display(),
            removed = report.removed,
            failed = report.failures.len(),
            "Purged resource cache"
        );
        Ok(report)
    }
}
