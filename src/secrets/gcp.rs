//! Google Cloud Secret Manager backend
//!
//! Reads the `latest` version of a secret over the REST API:
//!
//! ```text
//! GET {endpoint}/v1/projects/{project}/secrets/{name}/versions/latest:access
//! Authorization: Bearer <token>
//! -> { "payload": { "data": "<base64>" } }
//! ```
//!
//! The bearer token is either configured up front or fetched from the GCE
//! metadata server, which is what Cloud Run and GCE instances expose.

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{SecretError, SecretSource};

const DEFAULT_ENDPOINT: &str = "https://secretmanager.googleapis.com";
const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Configuration for [`GcpSecretManager`]
#[derive(Debug, Clone)]
pub struct GcpSecretManagerConfig {
    /// GCP project id owning the secrets
    pub project: String,
    /// Static bearer token; when absent the metadata server is asked
    pub access_token: Option<String>,
    /// API base URL
    pub endpoint: String,
    /// Per-request timeout
    pub request_timeout: Duration,
}

impl GcpSecretManagerConfig {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            access_token: None,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AccessResponse {
    payload: Payload,
}

#[derive(Debug, Deserialize)]
struct Payload {
    data: String,
}

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
}

/// Secret Manager client
pub struct GcpSecretManager {
    config: GcpSecretManagerConfig,
    http: reqwest::Client,
}

impl GcpSecretManager {
    pub fn new(config: GcpSecretManagerConfig) -> Result<Self, SecretError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { config, http })
    }

    fn access_url(&self, name: &str) -> String {
        format!(
            "{}/v1/projects/{}/secrets/{}/versions/latest:access",
            self.config.endpoint.trim_end_matches('/'),
            self.config.project,
            name
        )
    }

    async fn bearer_token(&self) -> Result<String, SecretError> {
        if let Some(ref token) = self.config.access_token {
            return Ok(token.clone());
        }

        let response = self
            .http
            .get(METADATA_TOKEN_URL)
            .header("Metadata-Flavor", "Google")
            .send()
            .await?
            .error_for_status()?;

        let token: MetadataToken = response.json().await?;
        Ok(token.access_token)
    }
}

/// Decode the base64 payload of an access response into UTF-8
fn decode_payload(data: &str) -> Result<String, SecretError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .map_err(|e| SecretError::Malformed(format!("invalid base64: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| SecretError::Malformed(format!("invalid UTF-8: {}", e)))
}

#[async_trait]
impl SecretSource for GcpSecretManager {
    fn name(&self) -> &str {
        "gcp-secret-manager"
    }

    async fn get_secret(&self, name: &str) -> Result<String, SecretError> {
        let token = self.bearer_token().await?;
        let url = self.access_url(name);
        debug!(secret = name, project = %self.config.project, "Accessing secret version");

        let response = self.http.get(&url).bearer_auth(token).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(SecretError::NotFound(name.to_string()));
        }

        let body: AccessResponse = response.error_for_status()?.json().await?;
        decode_payload(&body.payload.data)
    }
}
