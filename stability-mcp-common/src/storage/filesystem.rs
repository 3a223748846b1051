//! Local directory resource store.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use super::{
    ResourceDescriptor, ResourceStore, StoredResource, content_type_for, image_format_for,
    validate_resource_name,
};
use crate::context::CallerContext;
use crate::error::{Error, Result};

const FILE_SCHEME: &str = "file://";

/// Consecutive directory read failures after which a listing gives up.
const MAX_CONSECUTIVE_SCAN_ERRORS: u32 = 8;

/// Tracks read failures during a directory scan.
#[derive(Debug, Default)]
struct ScanErrors {
    consecutive: u32,
    total: u32,
}

impl ScanErrors {
    /// Record a failure. Returns `false` once the scan should stop.
    fn record(&mut self) -> bool {
        self.consecutive += 1;
        self.total += 1;
        self.consecutive < MAX_CONSECUTIVE_SCAN_ERRORS
    }

    fn reset(&mut self) {
        self.consecutive = 0;
    }
}

/// Stores resources as files directly under `root`.
///
/// URIs have the form `file://<absolute path>`. Reads never escape `root`.
#[derive(Debug, Clone)]
pub struct FilesystemStore {
    root: PathBuf,
}

impl FilesystemStore {
    /// Create a store rooted at `root`. The directory is created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `file://` URI for a path.
    pub fn uri_for(path: &Path) -> String {
        format!("{}{}", FILE_SCHEME, path.display())
    }

    async fn canonical_root(&self) -> Result<PathBuf> {
        Ok(tokio::fs::canonicalize(&self.root).await?)
    }

    /// Map an identifier to a canonical path inside the root.
    async fn resolve(&self, identifier: &str) -> Result<PathBuf> {
        let not_found = || Error::not_found(identifier);

        let raw = identifier.strip_prefix(FILE_SCHEME).unwrap_or(identifier);
        let candidate = if validate_resource_name(raw).is_ok() {
            self.root.join(raw)
        } else {
            PathBuf::from(raw)
        };

        let root = self.canonical_root().await.map_err(|_| not_found())?;
        let path = tokio::fs::canonicalize(&candidate)
            .await
            .map_err(|_| not_found())?;

        if path.parent() != Some(root.as_path()) {
            debug!(
                path = %path.display(),
                root = %root.display(),
                "Read outside store root refused"
            );
            return Err(not_found());
        }
        Ok(path)
    }
}

#[async_trait]
impl ResourceStore for FilesystemStore {
    fn backend_name(&self) -> &'static str {
        "filesystem"
    }

    /// Image files directly under the root, sorted by name.
    ///
    /// Unreadable entries are skipped and the scan continues. Only after
    /// repeated consecutive read failures is the listing truncated, which is
    /// logged as a warning.
    #[instrument(level = "debug", skip(self, ctx), fields(caller = %ctx.ip_or_unknown()))]
    async fn list_resources(&self, ctx: &CallerContext) -> Result<Vec<ResourceDescriptor>> {
        let root = match self.canonical_root().await {
            Ok(root) => root,
            Err(_) => {
                debug!(root = %self.root.display(), "Storage directory does not exist yet");
                return Ok(Vec::new());
            }
        };

        let mut entries = tokio::fs::read_dir(&root).await?;
        let mut resources = Vec::new();
        let mut errors = ScanErrors::default();

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => {
                    errors.reset();
                    entry
                }
                Ok(None) => break,
                Err(e) => {
                    if errors.record() {
                        debug!(error = %e, "Skipping unreadable directory entry");
                        continue;
                    }
                    warn!(
                        error = %e,
                        failures = errors.total,
                        listed = resources.len(),
                        "Directory scan truncated after repeated read failures"
                    );
                    break;
                }
            };

            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let Some(format) = image_format_for(&name) else {
                continue;
            };
            let metadata = match entry.metadata().await {
                Ok(metadata) if metadata.is_file() => metadata,
                Ok(_) => continue,
                Err(e) => {
                    debug!(%name, error = %e, "Skipping unreadable entry");
                    continue;
                }
            };

            resources.push(ResourceDescriptor {
                uri: Self::uri_for(&entry.path()),
                name,
                mime_type: format.mime_type().to_string(),
                size: Some(metadata.len()),
            });
        }

        resources.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(resources)
    }

    #[instrument(level = "debug", skip(self, ctx), fields(caller = %ctx.ip_or_unknown()))]
    async fn read_resource(&self, identifier: &str, ctx: &CallerContext) -> Result<StoredResource> {
        let path = self.resolve(identifier).await?;
        let bytes = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::not_found(identifier),
            _ => Error::Io(e),
        })?;

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();

        Ok(StoredResource {
            uri: Self::uri_for(&path),
            content_type: content_type_for(name).to_string(),
            bytes,
        })
    }

    #[instrument(level = "debug", skip(self, bytes), fields(size = bytes.len()))]
    async fn write_resource(
        &self,
        name: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<ResourceDescriptor> {
        validate_resource_name(name)?;

        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.canonical_root().await?.join(name);
        tokio::fs::write(&path, bytes).await?;

        debug!(path = %path.display(), "Resource written");
        Ok(ResourceDescriptor {
            uri: Self::uri_for(&path),
            name: name.to_string(),
            mime_type: content_type.to_string(),
            size: Some(bytes.len() as u64),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_survives_isolated_failures() {
        let mut errors = ScanErrors::default();
        for _ in 0..3 {
            assert!(errors.record());
            errors.reset();
        }
        assert_eq!(errors.total, 3);
    }

    #[test]
    fn scan_stops_after_consecutive_failures() {
        let mut errors = ScanErrors::default();
        for _ in 1..MAX_CONSECUTIVE_SCAN_ERRORS {
            assert!(errors.record());
        }
        assert!(!errors.record());
    }
}
