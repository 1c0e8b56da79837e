//! Claim endpoints
//!
//! - `/api/markers`: every stored claim document, as relaxed Extended JSON
//!   with ObjectIds flattened to their hex string
//! - `/api/features`: claims grouped by location, ready for the map widget

use bson::Bson;
use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use tracing::debug;

use super::{error_response, json_response};
use crate::claims::{aggregate, decode_claims, to_feature_collection};
use crate::server::AppState;
use crate::types::PresenceError;

/// GET /api/markers
pub async fn handle_markers(state: &AppState) -> Response<Full<Bytes>> {
    let documents = match state.claims.fetch_all_claims().await {
        Ok(documents) => documents,
        Err(e) => return error_response(PresenceError::from(e)),
    };

    let body: Vec<serde_json::Value> = documents
        .into_iter()
        .map(|doc| plain_object_ids(Bson::Document(doc)).into_relaxed_extjson())
        .collect();

    json_response(StatusCode::OK, &body)
}

/// Replace every ObjectId with its hex string, so `_id` reaches clients as
/// `"65f1..."` rather than `{"$oid": "65f1..."}`
fn plain_object_ids(value: Bson) -> Bson {
    match value {
        Bson::ObjectId(oid) => Bson::String(oid.to_hex()),
        Bson::Document(doc) => Bson::Document(
            doc.into_iter()
                .map(|(key, value)| (key, plain_object_ids(value)))
                .collect(),
        ),
        Bson::Array(items) => Bson::Array(items.into_iter().map(plain_object_ids).collect()),
        other => other,
    }
}

/// GET /api/features
pub async fn handle_features(state: &AppState) -> Response<Full<Bytes>> {
    let documents = match state.claims.fetch_all_claims().await {
        Ok(documents) => documents,
        Err(e) => return error_response(PresenceError::from(e)),
    };

    let claims = decode_claims(&documents);
    let groups = aggregate(claims);
    let collection = to_feature_collection(&groups, &state.render);

    debug!(
        documents = documents.len(),
        features = collection.len(),
        "Built feature collection"
    );

    json_response(StatusCode::OK, &collection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support::{failing, serving};
    use bson::{doc, oid::ObjectId, Document};
    use http_body_util::BodyExt;

    fn stored(key: &str, ts: i64, tx: &str) -> Document {
        doc! {
            "_id": ObjectId::new(),
            "transactionHash": tx,
            "minter": "0xminter",
            "timestamp": ts,
            "zone": 2,
            "zoneName": "Shoreditch",
            "localizationGrade": 3,
            "distinctAnchors": 4,
            "bytes20Location": "0x00",
            "geoHashLocation": key,
            "latlonLocation": { "latitude": 51.52, "longitude": -0.08 },
            "altitude": 21.0,
        }
    }

    async fn body_json(response: Response<Full<Bytes>>) -> serde_json::Value {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_markers_returns_raw_documents() {
        let oid = ObjectId::parse_str("65f1a2b3c4d5e6f708192a3b").unwrap();
        let mut document = stored("gcpvj0", 100, "0xaa");
        document.insert("_id", oid);

        let response = handle_markers(&serving(vec![document])).await;
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        let items = json.as_array().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["_id"], "65f1a2b3c4d5e6f708192a3b");
        assert_eq!(items[0]["transactionHash"], "0xaa");
        assert_eq!(items[0]["timestamp"], 100);
        assert_eq!(items[0]["latlonLocation"]["latitude"], 51.52);
    }

    #[tokio::test]
    async fn test_markers_flattens_nested_object_ids() {
        let anchor = ObjectId::parse_str("0123456789abcdef01234567").unwrap();
        let mut document = stored("gcpvj0", 100, "0xaa");
        document.insert("anchors", vec![Bson::ObjectId(anchor)]);
        document.insert("source", doc! { "ref": anchor });
        document.insert("_id", "already-a-string");

        let json = body_json(handle_markers(&serving(vec![document])).await).await;
        assert_eq!(json[0]["_id"], "already-a-string");
        assert_eq!(json[0]["anchors"][0], "0123456789abcdef01234567");
        assert_eq!(json[0]["source"]["ref"], "0123456789abcdef01234567");
    }

    #[tokio::test]
    async fn test_markers_empty_store() {
        let json = body_json(handle_markers(&serving(Vec::new())).await).await;
        assert_eq!(json, serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_features_groups_and_sorts() {
        let documents = vec![
            stored("A", 100, "0x1"),
            stored("B", 50, "0x2"),
            stored("A", 200, "0x3"),
        ];

        let response = handle_features(&serving(documents)).await;
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["type"], "FeatureCollection");
        let features = json["features"].as_array().unwrap();
        assert_eq!(features.len(), 2);
        assert_eq!(features[0]["properties"]["geoHash"], "A");
        assert_eq!(features[0]["properties"]["number"], 2);
        assert_eq!(features[0]["properties"]["claims"][0]["transactionHash"], "0x3");
        assert_eq!(features[1]["properties"]["geoHash"], "B");
    }

    #[tokio::test]
    async fn test_features_skips_bad_documents() {
        let documents = vec![stored("A", 100, "0x1"), doc! { "_id": "junk" }];

        let json = body_json(handle_features(&serving(documents)).await).await;
        assert_eq!(json["features"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_store_failure_is_generic_500() {
        for response in [
            handle_markers(&failing()).await,
            handle_features(&failing()).await,
        ] {
            assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
            let json = body_json(response).await;
            assert_eq!(json, serde_json::json!({ "error": "Internal server error" }));
        }
    }
}
