//! Pluggable storage for generated images.
//!
//! A [`ResourceStore`] persists image bytes under a flat namespace of resource
//! names and hands back URIs that callers can later pass to `read_resource`.
//! Two backends exist: [`FilesystemStore`] and [`GcsStore`]. Which one is used
//! is decided once at startup from [`StorageBackend`] and injected into the
//! server as `Arc<dyn ResourceStore>`.

mod filesystem;
mod metadata;
mod object;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::auth::AuthProvider;
use crate::config::StorageBackend;
use crate::context::CallerContext;
use crate::error::{Error, Result};
use crate::gcs::GcsClient;
use crate::models::OutputFormat;

pub use filesystem::FilesystemStore;
pub use metadata::{MetadataRecord, metadata_name_for};
pub use object::GcsStore;

/// Content type used for metadata sidecars.
pub const METADATA_CONTENT_TYPE: &str = "text/plain";

/// Bytes read back from a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredResource {
    pub uri: String,
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Listing entry for a stored resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescriptor {
    pub uri: String,
    pub name: String,
    pub mime_type: String,
    pub size: Option<u64>,
}

/// Storage backend for generated images and their metadata sidecars.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Short backend name for logs.
    fn backend_name(&self) -> &'static str;

    /// List stored images. Entries that cannot be inspected are skipped.
    async fn list_resources(&self, ctx: &CallerContext) -> Result<Vec<ResourceDescriptor>>;

    /// Read a resource by URI or bare name.
    ///
    /// # Errors
    /// Returns `Error::NotFound` when the identifier does not resolve inside
    /// this store.
    async fn read_resource(&self, identifier: &str, ctx: &CallerContext) -> Result<StoredResource>;

    /// Write (or overwrite) a resource.
    ///
    /// # Errors
    /// Returns `Error::Validation` for names that are not a single path segment.
    async fn write_resource(
        &self,
        name: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<ResourceDescriptor>;
}

/// Build the configured store.
///
/// # Errors
/// Returns `Error::Auth` when GCS credentials cannot be initialized.
pub async fn build_store(backend: StorageBackend) -> Result<Arc<dyn ResourceStore>> {
    match backend {
        StorageBackend::Filesystem { root } => {
            tracing::info!(root = %root.display(), "Using filesystem resource store");
            Ok(Arc::new(FilesystemStore::new(root)))
        }
        StorageBackend::Gcs(gcs) => {
            tracing::info!(bucket = %gcs.bucket, "Using GCS resource store");
            let auth = AuthProvider::from_credentials(&gcs.credentials).await?;
            Ok(Arc::new(GcsStore::new(GcsClient::with_auth(auth), gcs.bucket)))
        }
    }
}

/// Reject anything that is not a single, plain path segment.
pub fn validate_resource_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::validation("resource name must not be empty"));
    }
    if name.contains('/') || name.contains('\\') || name == "." || name.contains("..") {
        return Err(Error::validation(format!(
            "resource name '{}' must not contain path separators or '..'",
            name
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(Error::validation(format!(
            "resource name '{}' must not contain control characters",
            name
        )));
    }
    Ok(())
}

/// Image format implied by a resource name's extension.
pub fn image_format_for(name: &str) -> Option<OutputFormat> {
    name.rsplit_once('.')
        .and_then(|(_, ext)| OutputFormat::from_extension(ext))
}

/// Content type inferred from a resource name.
pub fn content_type_for(name: &str) -> &'static str {
    match image_format_for(name) {
        Some(format) => format.mime_type(),
        None if name.ends_with(".txt") => METADATA_CONTENT_TYPE,
        None => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_names_are_accepted() {
        assert!(validate_resource_name("cat.png").is_ok());
        assert!(validate_resource_name("cat-no-background.webp").is_ok());
    }

    #[test]
    fn test_traversal_names_are_rejected() {
        for name in ["../cat.png", "a/b.png", "a\\b.png", "..", "", "  ", "cat\n.png"] {
            assert!(
                matches!(validate_resource_name(name), Err(Error::Validation(_))),
                "{:?} should be rejected",
                name
            );
        }
    }

    #[test]
    fn test_content_type_inference() {
        assert_eq!(content_type_for("a.PNG"), "image/png");
        assert_eq!(content_type_for("a.jpg"), "image/jpeg");
        assert_eq!(content_type_for("a.webp"), "image/webp");
        assert_eq!(content_type_for("a.txt"), "text/plain");
        assert_eq!(content_type_for("a"), "application/octet-stream");
    }
}
