//! Configuration module for loading environment variables and settings.

use std::path::PathBuf;

use crate::error::ConfigError;
use crate::transport::Transport;

/// Default Stability AI REST endpoint.
pub const DEFAULT_API_BASE_URL: &str = "https://api.stability.ai";

/// Default port for the SSE transport.
pub const DEFAULT_PORT: u16 = 3020;

/// Default directory for generated images when `IMAGE_STORAGE_DIRECTORY` is unset.
#[cfg(windows)]
pub const DEFAULT_IMAGE_STORAGE_DIRECTORY: &str = "C:\\Windows\\Temp\\mcp-stability-ai";
#[cfg(not(windows))]
pub const DEFAULT_IMAGE_STORAGE_DIRECTORY: &str = "/tmp/mcp-stability-ai";

/// Which resource store backs generated images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    /// Files under a local directory
    Filesystem,
    /// Objects in a Google Cloud Storage bucket
    Gcs,
}

/// Credentials used to obtain GCS access tokens.
#[derive(Clone, PartialEq, Eq)]
pub enum GcsCredentials {
    /// Discover credentials through Application Default Credentials.
    ApplicationDefault,
    /// Explicit service account key material.
    ServiceAccount {
        client_email: String,
        private_key: String,
        project_id: Option<String>,
    },
}

impl std::fmt::Debug for GcsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GcsCredentials::ApplicationDefault => write!(f, "ApplicationDefault"),
            GcsCredentials::ServiceAccount {
                client_email,
                project_id,
                ..
            } => f
                .debug_struct("ServiceAccount")
                .field("client_email", client_email)
                .field("project_id", project_id)
                .field("private_key", &"<redacted>")
                .finish(),
        }
    }
}

/// Object storage settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcsConfig {
    /// Bucket holding generated images
    pub bucket: String,
    /// How to authenticate against GCS
    pub credentials: GcsCredentials,
}

/// Fully resolved storage choice, injected into the store constructor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    /// Local directory
    Filesystem { root: PathBuf },
    /// Google Cloud Storage bucket
    Gcs(GcsConfig),
}

/// Application configuration loaded from environment variables.
#[derive(Clone)]
pub struct Config {
    /// Stability AI API key (required)
    pub api_key: String,
    /// Base URL of the Stability AI REST API
    pub api_base_url: String,
    /// Directory used by the filesystem store
    pub image_storage_directory: PathBuf,
    /// Write a metadata sidecar after a successful generation
    pub save_metadata: bool,
    /// Write a metadata sidecar after a failed generation
    pub save_metadata_failed: bool,
    /// SSE server port
    pub port: u16,
    /// Explicit backend choice; `None` picks one from the transport
    pub storage_kind: Option<StorageKind>,
    /// GCS settings, present when `GCS_BUCKET_NAME` is set
    pub gcs: Option<GcsConfig>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("api_key", &"<redacted>")
            .field("api_base_url", &self.api_base_url)
            .field("image_storage_directory", &self.image_storage_directory)
            .field("save_metadata", &self.save_metadata)
            .field("save_metadata_failed", &self.save_metadata_failed)
            .field("port", &self.port)
            .field("storage_kind", &self.storage_kind)
            .field("gcs", &self.gcs)
            .finish()
    }
}

impl Config {
    /// Load configuration from environment variables and .env file.
    ///
    /// # Errors
    /// Returns `ConfigError::MissingEnvVar` if STABILITY_AI_API_KEY is not set,
    /// or `ConfigError::InvalidValue` for malformed booleans, ports or backends.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_key = get("STABILITY_AI_API_KEY")
            .ok_or_else(|| ConfigError::missing_env_var("STABILITY_AI_API_KEY"))?;

        let api_base_url = get("STABILITY_AI_BASE_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());

        let image_storage_directory = get("IMAGE_STORAGE_DIRECTORY")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_IMAGE_STORAGE_DIRECTORY));

        let save_metadata = parse_bool("SAVE_METADATA", get("SAVE_METADATA"), true)?;
        let save_metadata_failed =
            parse_bool("SAVE_METADATA_FAILED", get("SAVE_METADATA_FAILED"), true)?;

        let port = match get("PORT") {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| {
                    ConfigError::invalid_value("PORT", format!("'{}' is not a port", raw))
                })?,
            None => DEFAULT_PORT,
        };

        let storage_kind = match get("STORAGE_BACKEND") {
            Some(raw) => Some(parse_storage_kind(&raw)?),
            None => None,
        };

        let gcs = get("GCS_BUCKET_NAME").map(|bucket| {
            let credentials = match (get("GCS_CLIENT_EMAIL"), get("GCS_PRIVATE_KEY")) {
                (Some(client_email), Some(private_key)) => GcsCredentials::ServiceAccount {
                    client_email,
                    // Keys pasted into env files usually carry escaped newlines.
                    private_key: private_key.replace("\\n", "\n"),
                    project_id: get("GCS_PROJECT_ID"),
                },
                _ => GcsCredentials::ApplicationDefault,
            };
            GcsConfig {
                bucket,
                credentials,
            }
        });

        Ok(Self {
            api_key,
            api_base_url,
            image_storage_directory,
            save_metadata,
            save_metadata_failed,
            port,
            storage_kind,
            gcs,
        })
    }

    /// Resolve the storage backend for the given transport.
    ///
    /// Without an explicit `STORAGE_BACKEND`, stdio uses the filesystem and SSE
    /// uses GCS.
    ///
    /// # Errors
    /// Returns `ConfigError::MissingEnvVar("GCS_BUCKET_NAME")` when GCS is
    /// selected but no bucket is configured.
    pub fn storage_backend(&self, transport: Transport) -> Result<StorageBackend, ConfigError> {
        let kind = self.storage_kind.unwrap_or(match transport {
            Transport::Stdio => StorageKind::Filesystem,
            Transport::Sse { .. } => StorageKind::Gcs,
        });

        match kind {
            StorageKind::Filesystem => Ok(StorageBackend::Filesystem {
                root: self.image_storage_directory.clone(),
            }),
            StorageKind::Gcs => self
                .gcs
                .clone()
                .map(StorageBackend::Gcs)
                .ok_or_else(|| ConfigError::missing_env_var("GCS_BUCKET_NAME")),
        }
    }
}

fn parse_bool(name: &str, raw: Option<String>, default: bool) -> Result<bool, ConfigError> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::invalid_value(
            name,
            format!("'{}' is not a boolean (expected true/false)", raw),
        )),
    }
}

fn parse_storage_kind(raw: &str) -> Result<StorageKind, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "filesystem" | "fs" | "local" => Ok(StorageKind::Filesystem),
        "gcs" | "object" => Ok(StorageKind::Gcs),
        _ => Err(ConfigError::invalid_value(
            "STORAGE_BACKEND",
            format!("'{}' (valid options: filesystem, gcs)", raw),
        )),
    }
}
