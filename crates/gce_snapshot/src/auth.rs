use std::sync::Arc;

use gcp_auth::TokenProvider;
use tracing::{debug, info};

use crate::config::Tunables;
use crate::error::SnapshotError;

pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

/// Source of bearer tokens for Compute Engine requests.
#[derive(Clone)]
pub enum Credentials {
    /// Fixed token, typically from `GCE_SNAPSHOT_ACCESS_TOKEN`.
    Static(String),
    /// Application default credentials discovered from the environment.
    Ambient(Arc<dyn TokenProvider>),
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::Static(_) => f.write_str("Credentials::Static(..)"),
            Credentials::Ambient(_) => f.write_str("Credentials::Ambient(..)"),
        }
    }
}

impl Credentials {
    /// Resolve credentials the way `gcloud` client libraries do, unless a
    /// static token was configured.
    pub async fn discover(tunables: &Tunables) -> Result<Self, SnapshotError> {
        if let Some(token) = &tunables.access_token {
            info!("Using access token from GCE_SNAPSHOT_ACCESS_TOKEN");
            return Ok(Credentials::Static(token.clone()));
        }

        let provider = gcp_auth::provider().await?;
        info!("Using application default credentials");
        Ok(Credentials::Ambient(provider))
    }

    /// Tokens are fetched per request; the provider caches and refreshes them.
    pub async fn bearer_token(&self) -> Result<String, SnapshotError> {
        match self {
            Credentials::Static(token) => Ok(token.clone()),
            Credentials::Ambient(provider) => {
                let token = provider.token(&[CLOUD_PLATFORM_SCOPE]).await?;
                debug!("Obtained access token");
                Ok(token.as_str().to_string())
            }
        }
    }
}
