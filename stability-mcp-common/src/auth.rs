//! Authentication for the object storage backend.
//!
//! Tokens come either from an explicit service account (`GCS_CLIENT_EMAIL` +
//! `GCS_PRIVATE_KEY`) or from Application Default Credentials, which covers:
//! - Service account credentials via `GOOGLE_APPLICATION_CREDENTIALS`
//! - User credentials from `gcloud auth application-default login`
//! - GCE metadata server for workloads running on Google Cloud

use std::sync::Arc;

use gcp_auth::{CustomServiceAccount, TokenProvider};
use tracing::{debug, instrument};

use crate::config::GcsCredentials;
use crate::error::AuthError;

const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Where tokens come from.
enum TokenSource {
    Provider(Arc<dyn TokenProvider>),
    #[cfg(test)]
    Mock(String),
}

/// OAuth tokens for the storage JSON API.
///
/// `gcp_auth` caches tokens and refreshes them on expiry.
pub struct AuthProvider {
    source: TokenSource,
}

impl AuthProvider {
    /// Provider for whatever credentials the config names.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidCredentials` if the service account key is
    /// rejected, or `AuthError::NotConfigured` if ADC discovery finds nothing.
    #[instrument(level = "debug", name = "auth_provider_new", skip_all)]
    pub async fn from_credentials(credentials: &GcsCredentials) -> Result<Self, AuthError> {
        match credentials {
            GcsCredentials::ApplicationDefault => Self::application_default().await,
            GcsCredentials::ServiceAccount {
                client_email,
                private_key,
                project_id,
            } => Self::service_account(client_email, private_key, project_id.as_deref()),
        }
    }

    /// Discover credentials the way `gcloud` tooling does.
    pub async fn application_default() -> Result<Self, AuthError> {
        debug!("Initializing AuthProvider with ADC");

        let provider = gcp_auth::provider().await.map_err(|e| {
            debug!("Failed to initialize ADC: {}", e);
            AuthError::NotConfigured
        })?;

        Ok(Self {
            source: TokenSource::Provider(provider),
        })
    }

    /// Create a provider from explicit service account key material.
    pub fn service_account(
        client_email: &str,
        private_key: &str,
        project_id: Option<&str>,
    ) -> Result<Self, AuthError> {
        debug!(%client_email, "Initializing AuthProvider with service account");

        let key = serde_json::json!({
            "type": "service_account",
            "client_email": client_email,
            "private_key": private_key,
            "project_id": project_id,
            "token_uri": GOOGLE_TOKEN_URI,
        });

        let account = CustomServiceAccount::from_json(&key.to_string())
            .map_err(|e| AuthError::InvalidCredentials(e.to_string()))?;

        Ok(Self {
            source: TokenSource::Provider(Arc::new(account)),
        })
    }

    /// Always answers `token`, whatever the scopes.
    #[cfg(test)]
    pub fn mock(token: &str) -> Self {
        Self {
            source: TokenSource::Mock(token.to_string()),
        }
    }

    /// Bearer token for `scopes`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::RefreshFailed` if the token cannot be obtained or refreshed.
    #[instrument(level = "debug", name = "get_token", skip(self))]
    pub async fn get_token(&self, scopes: &[&str]) -> Result<String, AuthError> {
        match &self.source {
            TokenSource::Provider(provider) => {
                let token = provider.token(scopes).await.map_err(|e| {
                    debug!("Token refresh failed: {}", e);
                    AuthError::RefreshFailed(e.to_string())
                })?;
                Ok(token.as_str().to_string())
            }
            #[cfg(test)]
            TokenSource::Mock(token) => Ok(token.clone()),
        }
    }
}

/// Storage scopes.
pub mod scopes {
    pub const DEVSTORAGE_READ_WRITE: &str = "https://www.googleapis.com/auth/devstorage.read_write";

    pub const DEVSTORAGE_READ_ONLY: &str = "https://www.googleapis.com/auth/devstorage.read_only";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_auth_provider_ignores_scopes() {
        let mock = AuthProvider::mock("my-token");

        let token1 = mock.get_token(&[scopes::DEVSTORAGE_READ_ONLY]).await.unwrap();
        let token2 = mock
            .get_token(&[scopes::DEVSTORAGE_READ_ONLY, scopes::DEVSTORAGE_READ_WRITE])
            .await
            .unwrap();

        assert_eq!(token1, "my-token");
        assert_eq!(token2, "my-token");
    }

    #[test]
    fn test_malformed_private_key_is_rejected() {
        let result = AuthProvider::service_account("svc@example.com", "not a pem key", None);
        assert!(matches!(result, Err(AuthError::InvalidCredentials(_))));
    }
}
