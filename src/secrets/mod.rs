//! Credential lookup
//!
//! Secrets (the store connection string, the map widget token) are resolved
//! by name through a [`SecretSource`]. Callers wrap lookups in a
//! [`RetryPolicy`](crate::retry::RetryPolicy); sources themselves never retry.

pub mod env;
pub mod gcp;

use async_trait::async_trait;

pub use env::EnvSecrets;
pub use gcp::{GcpSecretManager, GcpSecretManagerConfig};

/// Secret lookup failure
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("secret not found: {0}")]
    NotFound(String),

    #[error("secret backend request failed: {0}")]
    Request(String),

    #[error("secret payload malformed: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for SecretError {
    fn from(err: reqwest::Error) -> Self {
        Self::Request(err.to_string())
    }
}

/// Anything that can resolve a secret by name
#[async_trait]
pub trait SecretSource: Send + Sync {
    /// Backend identifier for logs
    fn name(&self) -> &str;

    /// Resolve the current value of `name`
    async fn get_secret(&self, name: &str) -> Result<String, SecretError>;
}
