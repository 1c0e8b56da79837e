//! Map widget token endpoint

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;

use super::json_response;
use crate::server::AppState;

#[derive(Serialize)]
pub struct TokenResponse<'a> {
    pub token: &'a str,
}

/// GET /token
pub fn handle_token(state: &AppState) -> Response<Full<Bytes>> {
    json_response(
        StatusCode::OK,
        &TokenResponse {
            token: &state.map_token,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support::failing;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn test_token_served_without_touching_store() {
        let response = handle_token(&failing());
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], br#"{"token":"pk.test-token"}"#);
    }
}
