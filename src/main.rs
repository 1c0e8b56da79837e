//! presence-map - claim retrieval and spatial aggregation service

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

use presence_map::{
    config::{Args, SecretBackend},
    db::{ClaimSource, ClaimStore, MongoTransport},
    logging,
    secrets::{EnvSecrets, GcpSecretManager, SecretSource},
    server, shutdown,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    logging::init(&args.log_level, args.log_json);

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  presence-map");
    info!("======================================");
    info!("Node ID: {}", args.node_id);
    info!("Listen: {}", args.listen);
    info!("Claims: {}", args.namespace());
    info!("Secrets: {:?}", args.secret_backend);
    info!(
        "Retry: {} attempts, {}ms base, x{}, {}ms cap",
        args.retry.max_attempts,
        args.retry.base_delay_ms,
        args.retry.multiplier,
        args.retry.max_delay_ms
    );
    info!("======================================");

    let (trigger, signal) = shutdown::channel();
    tokio::spawn(async move {
        shutdown::os_signal().await;
        trigger.trigger();
    });

    let secrets: Arc<dyn SecretSource> = match args.secret_backend {
        SecretBackend::Env => Arc::new(EnvSecrets::new()),
        SecretBackend::Gcp => {
            let config = args
                .gcp_config()
                .ok_or_else(|| anyhow::anyhow!("GCP_PROJECT is required for the gcp backend"))?;
            Arc::new(GcpSecretManager::new(config)?)
        }
    };
    info!("Secret source: {}", secrets.name());

    let retry = args.retry_policy();
    let map_token = match retry
        .run_until("map token lookup", &signal, || {
            secrets.get_secret(&args.map_token_secret)
        })
        .await
    {
        Ok(token) => token,
        Err(e) => {
            error!("Failed to resolve map token: {}", e);
            std::process::exit(1);
        }
    };

    let store = Arc::new(
        ClaimStore::new(
            MongoTransport::new(args.connect_timeout()),
            Arc::clone(&secrets),
            args.store_config(),
        )
        .with_shutdown(signal.clone()),
    );
    let claims: Arc<dyn ClaimSource> = store.clone();

    let state = Arc::new(server::AppState::new(args, claims, map_token));
    let result = server::run(state, signal).await;

    store.close().await;

    if let Err(e) = result {
        error!("Server error: {:?}", e);
        std::process::exit(1);
    }

    info!("Stopped");
    Ok(())
}
