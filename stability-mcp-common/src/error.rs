//! Shared error type.
//!
//! Every message here ends up in front of an MCP caller unchanged, so each
//! variant carries what the caller needs to act on it: the offending field,
//! the endpoint and status, or the object URI.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Gcs(#[from] GcsError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Non-success provider response other than 400.
    #[error("API error for {endpoint} (HTTP {status_code}): {message}")]
    Api {
        endpoint: String,
        status_code: u16,
        /// Raw response body, or what was wrong with a 2xx body
        message: String,
    },

    /// Provider answered 400; holds its `errors` joined by `", "`.
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    /// A result poll returned a 2xx/3xx other than 200 or 202.
    #[error("Unexpected status: {0}")]
    UnexpectedStatus(u16),

    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    /// Tool arguments failed validation; the provider was not called.
    #[error("Invalid arguments: {0}")]
    Validation(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// Identifier does not resolve inside the store.
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid image payload: {0}")]
    InvalidImage(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Poll attempts exhausted; holds seconds since submission.
    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("Operation cancelled")]
    Cancelled,
}

impl Error {
    /// ```
    /// use stability_mcp_common::error::Error;
    ///
    /// let err = Error::api("https://api.stability.ai/v2beta/results/abc", 503, "busy");
    /// assert_eq!(
    ///     err.to_string(),
    ///     "API error for https://api.stability.ai/v2beta/results/abc (HTTP 503): busy"
    /// );
    /// ```
    pub fn api(endpoint: impl Into<String>, status_code: u16, message: impl Into<String>) -> Self {
        Error::Api {
            endpoint: endpoint.into(),
            status_code,
            message: message.into(),
        }
    }

    /// ```
    /// use stability_mcp_common::error::Error;
    ///
    /// let err = Error::validation("prompt: Required");
    /// assert_eq!(err.to_string(), "Invalid arguments: prompt: Required");
    /// ```
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }

    pub fn invalid_parameters(message: impl Into<String>) -> Self {
        Error::InvalidParameters(message.into())
    }

    pub fn not_found(identifier: impl Into<String>) -> Self {
        Error::NotFound(identifier.into())
    }

    pub fn invalid_image(message: impl Into<String>) -> Self {
        Error::InvalidImage(message.into())
    }

    pub fn timeout(seconds: u64) -> Self {
        Error::Timeout(seconds)
    }
}

/// Startup configuration problems.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Required environment variable {0} is not set")]
    MissingEnvVar(String),

    /// Variable name and what was wrong with its value.
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl ConfigError {
    pub fn missing_env_var(name: impl Into<String>) -> Self {
        Self::MissingEnvVar(name.into())
    }

    pub fn invalid_value(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue(name.into(), reason.into())
    }
}

/// Which object-storage call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcsOperation {
    Upload,
    Download,
    List,
}

impl GcsOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            GcsOperation::Upload => "upload",
            GcsOperation::Download => "download",
            GcsOperation::List => "list",
        }
    }
}

impl std::fmt::Display for GcsOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum GcsError {
    /// Not of the form `gs://bucket/object`.
    #[error("Invalid GCS URI: {0}")]
    InvalidUri(String),

    #[error("GCS object not found: {0}")]
    NotFound(String),

    #[error("GCS {operation} failed for {uri}: {message}")]
    OperationFailed {
        uri: String,
        operation: GcsOperation,
        message: String,
    },

    /// No token could be attached to the request.
    #[error("GCS authentication error: {0}")]
    AuthError(String),
}

impl GcsError {
    /// ```
    /// use stability_mcp_common::error::{GcsError, GcsOperation};
    ///
    /// let err = GcsError::operation_failed("gs://images/cat.png", GcsOperation::Download, "HTTP 403");
    /// assert_eq!(err.to_string(), "GCS download failed for gs://images/cat.png: HTTP 403");
    /// ```
    pub fn operation_failed(
        uri: impl Into<String>,
        operation: GcsOperation,
        message: impl Into<String>,
    ) -> Self {
        Self::OperationFailed {
            uri: uri.into(),
            operation,
            message: message.into(),
        }
    }
}

/// Token acquisition for the object store.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Google Cloud credentials not configured. Set GCS_CLIENT_EMAIL and GCS_PRIVATE_KEY, or configure Application Default Credentials")]
    NotConfigured,

    #[error("Invalid service account credentials: {0}")]
    InvalidCredentials(String),

    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),
}

pub type Result<T> = std::result::Result<T, Error>;
