//! MongoDB transport
//!
//! Connects with bounded server-selection/connect timeouts so an unreachable
//! cluster fails fast instead of hanging, and verifies the connection with a
//! `ping` before handing it out.

use async_trait::async_trait;
use bson::{doc, Document};
use futures_util::TryStreamExt;
use mongodb::error::ErrorKind;
use mongodb::Client;
use std::time::Duration;
use tracing::{debug, info};

use super::transport::{ClaimTransport, Namespace, TransportError};

/// [`ClaimTransport`] backed by the official MongoDB driver
#[derive(Debug, Clone)]
pub struct MongoTransport {
    connect_timeout: Duration,
}

impl Default for MongoTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(3))
    }
}

impl MongoTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

/// Append server-selection and connect timeouts unless the URI sets them
pub fn with_timeouts(uri: &str, timeout: Duration) -> String {
    let ms = timeout.as_millis();
    let params: Vec<String> = ["serverSelectionTimeoutMS", "connectTimeoutMS"]
        .iter()
        .filter(|key| !uri.contains(*key))
        .map(|key| format!("{}={}", key, ms))
        .collect();

    if params.is_empty() {
        return uri.to_string();
    }
    let joined = params.join("&");

    if uri.contains('?') {
        let sep = if uri.ends_with('?') || uri.ends_with('&') { "" } else { "&" };
        format!("{}{}{}", uri, sep, joined)
    } else {
        // Options must follow a path separator
        let rest = uri.split_once("://").map(|(_, r)| r).unwrap_or(uri);
        if rest.contains('/') {
            format!("{}?{}", uri, joined)
        } else {
            format!("{}/?{}", uri, joined)
        }
    }
}

/// Strip credentials from a connection string for logging
pub fn redact(uri: &str) -> String {
    match uri.split_once("://") {
        Some((scheme, rest)) => match rest.rsplit_once('@') {
            Some((_, host)) => format!("{}://***@{}", scheme, host),
            None => uri.to_string(),
        },
        None => uri.to_string(),
    }
}

fn classify(err: mongodb::error::Error) -> TransportError {
    match err.kind.as_ref() {
        ErrorKind::Io(_)
        | ErrorKind::ServerSelection { .. }
        | ErrorKind::ConnectionPoolCleared { .. } => TransportError::ConnectionLost(err.to_string()),
        _ => TransportError::Query(err.to_string()),
    }
}

#[async_trait]
impl ClaimTransport for MongoTransport {
    type Handle = Client;

    async fn connect(&self, connection_string: &str) -> Result<Client, TransportError> {
        info!("Connecting to MongoDB at {}", redact(connection_string));

        let uri = with_timeouts(connection_string, self.connect_timeout);
        let client = Client::with_uri_str(&uri)
            .await
            .map_err(|e| TransportError::Connect(format!("Failed to connect to MongoDB: {}", e)))?;

        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| TransportError::Connect(format!("MongoDB ping failed: {}", e)))?;

        info!("Connected to MongoDB");
        Ok(client)
    }

    async fn query_all(
        &self,
        client: &Client,
        namespace: &Namespace,
    ) -> Result<Vec<Document>, TransportError> {
        let collection = client
            .database(&namespace.database)
            .collection::<Document>(&namespace.collection);

        let cursor = collection.find(doc! {}).await.map_err(classify)?;
        let documents: Vec<Document> = cursor.try_collect().await.map_err(classify)?;

        debug!(namespace = %namespace, count = documents.len(), "Query complete");
        Ok(documents)
    }

    async fn close(&self, client: Client) -> Result<(), TransportError> {
        client.shutdown().await;
        info!("MongoDB connection closed");
        Ok(())
    }
}
