//! Google Cloud Storage JSON API client.

use serde::Deserialize;

use crate::auth::{AuthProvider, scopes};
use crate::error::{GcsError, GcsOperation};

const GCS_BASE_URL: &str = "https://storage.googleapis.com";

/// `gs://bucket/object`, split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcsUri {
    pub bucket: String,
    pub object: String,
}

impl GcsUri {
    pub fn new(bucket: impl Into<String>, object: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            object: object.into(),
        }
    }

    /// Split a `gs://` URI. The object part may be empty.
    ///
    /// # Errors
    /// Returns `GcsError::InvalidUri` if the URI format is invalid.
    pub fn parse(uri: &str) -> Result<Self, GcsError> {
        let uri = uri
            .strip_prefix("gs://")
            .ok_or_else(|| GcsError::InvalidUri(format!("URI must start with 'gs://': {}", uri)))?;

        let (bucket, object) = uri
            .split_once('/')
            .ok_or_else(|| {
                GcsError::InvalidUri(format!("URI must contain bucket and path: {}", uri))
            })?;

        if bucket.is_empty() {
            return Err(GcsError::InvalidUri("Bucket name cannot be empty".to_string()));
        }

        Ok(Self::new(bucket, object))
    }
}

impl std::fmt::Display for GcsUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "gs://{}/{}", self.bucket, self.object)
    }
}

/// Object metadata returned by a listing.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GcsObject {
    /// Object name within the bucket
    pub name: String,
    /// Stored content type
    #[serde(default)]
    pub content_type: Option<String>,
    /// Size in bytes; the JSON API encodes it as a decimal string
    #[serde(default)]
    pub size: Option<String>,
}

impl GcsObject {
    /// Object size in bytes, when reported.
    pub fn size_bytes(&self) -> Option<u64> {
        self.size.as_deref().and_then(|s| s.parse().ok())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListObjectsPage {
    #[serde(default)]
    items: Vec<GcsObject>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// Downloaded object body with its stored content type.
#[derive(Debug, Clone)]
pub struct GcsDownload {
    pub data: Vec<u8>,
    pub content_type: Option<String>,
}

/// Minimal JSON API client: upload, download, paged listing.
pub struct GcsClient {
    client: reqwest::Client,
    auth: AuthProvider,
    base_url: String,
}

impl GcsClient {
    pub fn with_auth(auth: AuthProvider) -> Self {
        Self {
            client: reqwest::Client::new(),
            auth,
            base_url: GCS_BASE_URL.to_string(),
        }
    }

    /// Point at a mock server.
    #[cfg(test)]
    pub fn with_base_url(auth: AuthProvider, base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            auth,
            base_url,
        }
    }

    async fn token(&self, scope: &str) -> Result<String, GcsError> {
        self.auth
            .get_token(&[scope])
            .await
            .map_err(|e| GcsError::AuthError(e.to_string()))
    }

    /// Upload bytes to GCS, replacing any existing object.
    ///
    /// # Errors
    /// Returns `GcsError::OperationFailed` if the upload fails.
    pub async fn upload(
        &self,
        uri: &GcsUri,
        data: &[u8],
        content_type: &str,
    ) -> Result<(), GcsError> {
        let token = self.token(scopes::DEVSTORAGE_READ_WRITE).await?;

        let url = format!(
            "{}/upload/storage/v1/b/{}/o?uploadType=media&name={}",
            self.base_url,
            uri.bucket,
            urlencoding::encode(&uri.object)
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .header("Content-Type", content_type)
            .body(data.to_vec())
            .send()
            .await
            .map_err(|e| {
                GcsError::operation_failed(
                    uri.to_string(),
                    GcsOperation::Upload,
                    format!("Upload request failed: {}", e),
                )
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GcsError::operation_failed(
                uri.to_string(),
                GcsOperation::Upload,
                format!("Failed with status {}: {}", status, body),
            ));
        }

        Ok(())
    }

    /// Download an object's bytes and stored content type.
    ///
    /// # Errors
    /// Returns `GcsError::NotFound` on 404 and `GcsError::OperationFailed` otherwise.
    pub async fn download(&self, uri: &GcsUri) -> Result<GcsDownload, GcsError> {
        let token = self.token(scopes::DEVSTORAGE_READ_ONLY).await?;

        let url = format!(
            "{}/storage/v1/b/{}/o/{}?alt=media",
            self.base_url,
            uri.bucket,
            urlencoding::encode(&uri.object)
        );

        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| {
                GcsError::operation_failed(
                    uri.to_string(),
                    GcsOperation::Download,
                    format!("Download request failed: {}", e),
                )
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(GcsError::NotFound(uri.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GcsError::operation_failed(
                uri.to_string(),
                GcsOperation::Download,
                format!("Failed with status {}: {}", status, body),
            ));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let data = response.bytes().await.map(|b| b.to_vec()).map_err(|e| {
            GcsError::operation_failed(
                uri.to_string(),
                GcsOperation::Download,
                format!("Failed to read response body: {}", e),
            )
        })?;

        Ok(GcsDownload { data, content_type })
    }

    /// List every object in `bucket`, following `nextPageToken` until exhausted.
    ///
    /// # Errors
    /// Returns `GcsError::OperationFailed` if any page request fails.
    pub async fn list(&self, bucket: &str) -> Result<Vec<GcsObject>, GcsError> {
        let token = self.token(scopes::DEVSTORAGE_READ_ONLY).await?;
        let bucket_uri = format!("gs://{}/", bucket);

        let mut objects = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut url = format!("{}/storage/v1/b/{}/o", self.base_url, bucket);
            if let Some(token) = &page_token {
                url.push_str(&format!("?pageToken={}", urlencoding::encode(token)));
            }

            let response = self
                .client
                .get(&url)
                .bearer_auth(&token)
                .send()
                .await
                .map_err(|e| {
                    GcsError::operation_failed(
                        &bucket_uri,
                        GcsOperation::List,
                        format!("List request failed: {}", e),
                    )
                })?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(GcsError::operation_failed(
                    &bucket_uri,
                    GcsOperation::List,
                    format!("Failed with status {}: {}", status, body),
                ));
            }

            let page: ListObjectsPage = response.json().await.map_err(|e| {
                GcsError::operation_failed(
                    &bucket_uri,
                    GcsOperation::List,
                    format!("Failed to parse listing: {}", e),
                )
            })?;

            objects.extend(page.items);

            match page.next_page_token {
                Some(next) if !next.is_empty() => page_token = Some(next),
                _ => break,
            }
        }

        Ok(objects)
    }
}
