//! Liveness endpoint
//!
//! `/health` and `/healthz` answer 200 whenever the process is serving. The
//! store connection flag is informational: the store connects lazily, so
//! `connected: false` right after startup is normal.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;

use super::json_response;
use crate::server::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub healthy: bool,
    pub version: &'static str,
    pub commit: &'static str,
    pub built_at: &'static str,
    pub node_id: String,
    pub uptime_secs: u64,
    /// Current timestamp
    pub timestamp: String,
    pub store: StoreHealth,
}

#[derive(Serialize)]
pub struct StoreHealth {
    pub connected: bool,
    pub namespace: String,
}

/// GET /health, /healthz
pub async fn health_check(state: &AppState) -> Response<Full<Bytes>> {
    let response = HealthResponse {
        healthy: true,
        version: env!("CARGO_PKG_VERSION"),
        commit: env!("GIT_COMMIT_SHORT"),
        built_at: env!("BUILD_TIMESTAMP"),
        node_id: state.args.node_id.to_string(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        store: StoreHealth {
            connected: state.claims.is_connected().await,
            namespace: state.args.namespace().to_string(),
        },
    };

    json_response(StatusCode::OK, &response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support::{failing, serving};
    use http_body_util::BodyExt;

    async fn body_json(response: Response<Full<Bytes>>) -> serde_json::Value {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_healthy_while_store_down() {
        let response = health_check(&failing()).await;
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["healthy"], true);
        assert_eq!(json["store"]["connected"], false);
        assert_eq!(json["store"]["namespace"], "Foamcaster-V2.Base Presence Claims");
        assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_reports_connection() {
        let json = body_json(health_check(&serving(Vec::new())).await).await;
        assert_eq!(json["store"]["connected"], true);
        assert!(json["nodeId"].as_str().is_some());
    }
}
