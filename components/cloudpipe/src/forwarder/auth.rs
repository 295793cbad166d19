//! Access tokens for the Cloud Logging API.
//!
//! Credential setup is ambient: on GCE/GKE/Cloud Run the metadata server hands
//! out tokens for the attached service account, elsewhere a token can be
//! injected through configuration (`CLOUDPIPE_FORWARDER__ACCESS_TOKEN`).

// Local crates
use crate::forwarder::error::ForwarderError;
use crate::helpers::load_config::{AuthMode, ForwarderConfig};

// External crates
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::instrument;

const TOKEN_PATH: &str = "/computeMetadata/v1/instance/service-accounts/default/token";

/// Tokens are refreshed this long before the metadata server says they expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug)]
struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// Source of the bearer token attached to each write request.
#[derive(Debug)]
pub enum TokenSource {
    Anonymous,
    Static(String),
    MetadataServer {
        client: reqwest::Client,
        url: String,
        cached: Mutex<Option<CachedToken>>,
    },
}

impl TokenSource {
    pub fn from_config(config: &ForwarderConfig, client: reqwest::Client) -> Result<Self, ForwarderError> {
        match config.auth_mode {
            AuthMode::Anonymous => Ok(TokenSource::Anonymous),
            AuthMode::StaticToken => config
                .access_token
                .clone()
                .map(TokenSource::Static)
                .ok_or_else(|| ForwarderError::Credentials("no access_token configured".to_string())),
            AuthMode::MetadataServer => Ok(TokenSource::MetadataServer {
                client,
                url: format!("{}{}", config.metadata_host.trim_end_matches('/'), TOKEN_PATH),
                cached: Mutex::new(None),
            }),
        }
    }

    /// Current token, or `None` when requests go out unauthenticated.
    #[instrument(
        name = "cloudpipe_forwarder::token",
        target = "forwarder::auth",
        skip_all,
        level = "trace"
    )]
    pub async fn token(&self) -> Result<Option<String>, ForwarderError> {
        match self {
            TokenSource::Anonymous => Ok(None),
            TokenSource::Static(token) => Ok(Some(token.clone())),
            TokenSource::MetadataServer { client, url, cached } => {
                let mut cached = cached.lock().await;
                if let Some(token) = cached.as_ref() {
                    if Instant::now() < token.refresh_at {
                        return Ok(Some(token.value.clone()));
                    }
                }

                tracing::debug!(metadata_url = %url, "Fetching access token from metadata server");
                let fresh = fetch_metadata_token(client, url).await?;
                let lifetime = Duration::from_secs(fresh.expires_in).saturating_sub(EXPIRY_MARGIN);
                let value = fresh.access_token;
                *cached = Some(CachedToken {
                    value: value.clone(),
                    refresh_at: Instant::now() + lifetime,
                });
                Ok(Some(value))
            }
        }
    }
}

async fn fetch_metadata_token(client: &reqwest::Client, url: &str) -> Result<MetadataToken, ForwarderError> {
    let resp = client
        .get(url)
        .header("Metadata-Flavor", "Google")
        .send()
        .await
        .map_err(|e| ForwarderError::Credentials(format!("metadata server unreachable: {e}")))?;

    let status = resp.status();
    if !status.is_success() {
        return Err(ForwarderError::Credentials(format!(
            "metadata server returned status {status}"
        )));
    }

    resp.json::<MetadataToken>()
        .await
        .map_err(|e| ForwarderError::Credentials(format!("malformed metadata token response: {e}")))
}
