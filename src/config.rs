//! Configuration for presence-map
//!
//! CLI arguments and environment variable handling using clap.

use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::time::Duration;
use uuid::Uuid;

use crate::claims::render::{RenderOptions, DEFAULT_EXPLORER_URL};
use crate::db::{Namespace, StoreConfig};
use crate::retry::RetryPolicy;
use crate::secrets::GcpSecretManagerConfig;

/// Where secrets are read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SecretBackend {
    /// Process environment (after `.env` is loaded)
    Env,
    /// Google Cloud Secret Manager
    Gcp,
}

/// Presence map - claim retrieval and spatial aggregation service
#[derive(Parser, Debug, Clone)]
#[command(name = "presence-map")]
#[command(about = "Serves presence claims grouped by location for the map widget")]
pub struct Args {
    /// Unique node identifier for this instance
    #[arg(long, env = "NODE_ID", default_value_t = Uuid::new_v4())]
    pub node_id: Uuid,

    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:3000")]
    pub listen: SocketAddr,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    pub log_json: bool,

    /// MongoDB database holding the claims
    #[arg(long, env = "MONGODB_DB", default_value = "Foamcaster-V2")]
    pub mongodb_db: String,

    /// Collection holding the claims
    #[arg(long, env = "CLAIMS_COLLECTION", default_value = "Base Presence Claims")]
    pub claims_collection: String,

    /// Name of the secret holding the MongoDB connection string
    #[arg(long, env = "DB_URI_SECRET", default_value = "DB_URI")]
    pub db_uri_secret: String,

    /// Name of the secret holding the map widget token
    #[arg(long, env = "MAP_TOKEN_SECRET", default_value = "MAPBOX_API")]
    pub map_token_secret: String,

    /// Secret backend
    #[arg(long, env = "SECRET_BACKEND", value_enum, default_value_t = SecretBackend::Env)]
    pub secret_backend: SecretBackend,

    /// GCP project (required for the gcp backend)
    #[arg(long, env = "GCP_PROJECT")]
    pub gcp_project: Option<String>,

    /// Static GCP bearer token (defaults to the metadata server)
    #[arg(long, env = "GCP_ACCESS_TOKEN")]
    pub gcp_access_token: Option<String>,

    /// Retry configuration
    #[command(flatten)]
    pub retry: RetryArgs,

    /// MongoDB server selection and connect timeout in milliseconds
    #[arg(long, env = "CONNECT_TIMEOUT_MS", default_value = "3000")]
    pub connect_timeout_ms: u64,

    /// Block explorer base URL for popup links
    #[arg(long, env = "EXPLORER_URL", default_value = DEFAULT_EXPLORER_URL)]
    pub explorer_url: String,
}

/// Backoff settings shared by secret lookups and store calls
#[derive(Parser, Debug, Clone)]
pub struct RetryArgs {
    /// Attempts per operation, including the first
    #[arg(long = "retry-max-attempts", env = "RETRY_MAX_ATTEMPTS", default_value = "3")]
    pub max_attempts: u32,

    /// Delay after the first failure in milliseconds
    #[arg(long = "retry-base-delay-ms", env = "RETRY_BASE_DELAY_MS", default_value = "500")]
    pub base_delay_ms: u64,

    /// Growth factor between consecutive delays
    #[arg(long = "retry-multiplier", env = "RETRY_MULTIPLIER", default_value = "2.0")]
    pub multiplier: f64,

    /// Upper bound on a single delay in milliseconds
    #[arg(long = "retry-max-delay-ms", env = "RETRY_MAX_DELAY_MS", default_value = "5000")]
    pub max_delay_ms: u64,
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.retry.max_attempts == 0 {
            return Err("retry-max-attempts must be at least 1".to_string());
        }
        if self.retry.multiplier.is_nan() || self.retry.multiplier < 1.0 {
            return Err(format!(
                "retry-multiplier must be >= 1.0, got {}",
                self.retry.multiplier
            ));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(format!(
                "retry-max-delay-ms ({}) is below retry-base-delay-ms ({})",
                self.retry.max_delay_ms, self.retry.base_delay_ms
            ));
        }
        if self.secret_backend == SecretBackend::Gcp
            && self.gcp_project.as_deref().map_or(true, |p| p.trim().is_empty())
        {
            return Err("GCP_PROJECT is required for the gcp secret backend".to_string());
        }
        if self.mongodb_db.trim().is_empty() || self.claims_collection.trim().is_empty() {
            return Err("database and collection names must not be empty".to_string());
        }
        if self.db_uri_secret.trim().is_empty() || self.map_token_secret.trim().is_empty() {
            return Err("secret names must not be empty".to_string());
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_attempts,
            Duration::from_millis(self.retry.base_delay_ms),
        )
        .with_multiplier(self.retry.multiplier)
        .with_max_delay(Duration::from_millis(self.retry.max_delay_ms))
    }

    pub fn namespace(&self) -> Namespace {
        Namespace::new(&self.mongodb_db, &self.claims_collection)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            connection_secret: self.db_uri_secret.clone(),
            namespace: self.namespace(),
            retry: self.retry_policy(),
        }
    }

    pub fn render_options(&self) -> RenderOptions {
        RenderOptions {
            explorer_url: self.explorer_url.trim_end_matches('/').to_string(),
        }
    }

    /// Secret Manager settings, if the gcp backend is selected
    pub fn gcp_config(&self) -> Option<GcpSecretManagerConfig> {
        if self.secret_backend != SecretBackend::Gcp {
            return None;
        }
        let project = self.gcp_project.clone()?;
        let mut config = GcpSecretManagerConfig::new(project);
        config.access_token = self.gcp_access_token.clone();
        Some(config)
    }
}
