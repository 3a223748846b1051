//! Google Cloud Storage resource store.

use async_trait::async_trait;
use tracing::{debug, instrument};

use super::{
    ResourceDescriptor, ResourceStore, StoredResource, content_type_for, image_format_for,
    validate_resource_name,
};
use crate::context::CallerContext;
use crate::error::{Error, GcsError, Result};
use crate::gcs::{GcsClient, GcsUri};

/// Stores resources as objects at the root of one bucket.
///
/// URIs have the form `gs://<bucket>/<name>`.
pub struct GcsStore {
    client: GcsClient,
    bucket: String,
}

impl GcsStore {
    pub fn new(client: GcsClient, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn resolve(&self, identifier: &str) -> Result<GcsUri> {
        if identifier.starts_with("gs://") {
            let uri = GcsUri::parse(identifier).map_err(|_| Error::not_found(identifier))?;
            if uri.bucket != self.bucket || uri.object.is_empty() {
                return Err(Error::not_found(identifier));
            }
            return Ok(uri);
        }

        validate_resource_name(identifier).map_err(|_| Error::not_found(identifier))?;
        Ok(GcsUri::new(&self.bucket, identifier))
    }
}

#[async_trait]
impl ResourceStore for GcsStore {
    fn backend_name(&self) -> &'static str {
        "gcs"
    }

    #[instrument(level = "debug", skip(self, ctx), fields(bucket = %self.bucket, caller = %ctx.ip_or_unknown()))]
    async fn list_resources(&self, ctx: &CallerContext) -> Result<Vec<ResourceDescriptor>> {
        let objects = self.client.list(&self.bucket).await?;

        let resources = objects
            .into_iter()
            .filter_map(|object| {
                let format = image_format_for(&object.name)?;
                let size = object.size_bytes();
                Some(ResourceDescriptor {
                    uri: GcsUri::new(&self.bucket, &object.name).to_string(),
                    mime_type: object
                        .content_type
                        .unwrap_or_else(|| format.mime_type().to_string()),
                    name: object.name,
                    size,
                })
            })
            .collect::<Vec<_>>();

        debug!(count = resources.len(), "Listed GCS resources");
        Ok(resources)
    }

    #[instrument(level = "debug", skip(self, ctx), fields(bucket = %self.bucket, caller = %ctx.ip_or_unknown()))]
    async fn read_resource(&self, identifier: &str, ctx: &CallerContext) -> Result<StoredResource> {
        let uri = self.resolve(identifier)?;

        let download = self.client.download(&uri).await.map_err(|e| match e {
            GcsError::NotFound(_) => Error::not_found(identifier),
            other => Error::Gcs(other),
        })?;

        let content_type = download
            .content_type
            .filter(|ct| !ct.is_empty() && ct != "application/octet-stream")
            .unwrap_or_else(|| content_type_for(&uri.object).to_string());

        Ok(StoredResource {
            uri: uri.to_string(),
            bytes: download.data,
            content_type,
        })
    }

    #[instrument(level = "debug", skip(self, bytes), fields(bucket = %self.bucket, size = bytes.len()))]
    async fn write_resource(
        &self,
        name: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<ResourceDescriptor> {
        validate_resource_name(name)?;

        let uri = GcsUri::new(&self.bucket, name);
        self.client.upload(&uri, bytes, content_type).await?;

        Ok(ResourceDescriptor {
            uri: uri.to_string(),
            name: name.to_string(),
            mime_type: content_type.to_string(),
            size: Some(bytes.len() as u64),
        })
    }
}
