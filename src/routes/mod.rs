//! HTTP routes for presence-map

pub mod health;
pub mod markers;
pub mod token;

pub use health::health_check;
pub use markers::{handle_features, handle_markers};
pub use token::handle_token;

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;
use tracing::error;

use crate::types::PresenceError;

/// JSON response with permissive CORS
pub fn json_response<T: Serialize + ?Sized>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(body) {
        Ok(bytes) => Response::builder()
            .status(status)
            .header("Content-Type", "application/json")
            .header("Access-Control-Allow-Origin", "*")
            .body(Full::new(Bytes::from(bytes)))
            .unwrap_or_else(|_| Response::new(Full::new(Bytes::new()))),
        Err(e) => error_response(PresenceError::from(e)),
    }
}

/// Log `err` and turn it into its client-facing response
pub fn error_response(err: PresenceError) -> Response<Full<Bytes>> {
    error!(error = %err, "Request failed");
    let (status, body) = err.into_status_code_and_body();
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(body)))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
}

#[cfg(test)]
pub(crate) mod test_support {
    use async_trait::async_trait;
    use bson::Document;
    use clap::Parser;
    use std::sync::Arc;

    use crate::config::Args;
    use crate::db::{ClaimSource, StoreError, TransportError};
    use crate::retry::RetryError;
    use crate::server::AppState;

    /// Canned claim source for handler tests
    pub struct FakeSource {
        pub documents: Option<Vec<Document>>,
        pub connected: bool,
    }

    #[async_trait]
    impl ClaimSource for FakeSource {
        async fn fetch_all_claims(&self) -> Result<Vec<Document>, StoreError> {
            match &self.documents {
                Some(documents) => Ok(documents.clone()),
                None => Err(StoreError::FetchFailed(RetryError::Exhausted {
                    operation: "claim query".into(),
                    attempts: 3,
                    source: TransportError::Query("cluster0.internal: auth failed".into()),
                })),
            }
        }

        async fn is_connected(&self) -> bool {
            self.connected
        }
    }

    pub fn state_with(source: FakeSource) -> AppState {
        let args = Args::try_parse_from(["presence-map"]).unwrap();
        AppState::new(args, Arc::new(source), "pk.test-token".to_string())
    }

    pub fn serving(documents: Vec<Document>) -> AppState {
        state_with(FakeSource {
            documents: Some(documents),
            connected: true,
        })
    }

    pub fn failing() -> AppState {
        state_with(FakeSource {
            documents: None,
            connected: false,
        })
    }
}
