//! Document store transport seam
//!
//! The claim store client only ever talks to the store through this trait,
//! so connection state is tracked by the client rather than by inspecting
//! driver internals.

use async_trait::async_trait;
use bson::Document;
use std::fmt;

/// Database + collection pair a query runs against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    pub database: String,
    pub collection: String,
}

impl Namespace {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

/// Transport-level failure
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// Could not establish a connection
    #[error("connect failed: {0}")]
    Connect(String),

    /// The connection is dead; a new one is needed
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// The query itself failed on a live connection
    #[error("query failed: {0}")]
    Query(String),

    #[error("close failed: {0}")]
    Close(String),
}

impl TransportError {
    /// Whether the failure means the connection can no longer be used
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Self::ConnectionLost(_))
    }
}

/// Connect / query / close primitives of a document store
#[async_trait]
pub trait ClaimTransport: Send + Sync + 'static {
    /// Live connection handle; clones share the same underlying connection
    type Handle: Clone + Send + Sync + 'static;

    /// Open a connection and verify it is usable
    async fn connect(&self, connection_string: &str) -> Result<Self::Handle, TransportError>;

    /// Return every document in `namespace`, unfiltered
    async fn query_all(
        &self,
        handle: &Self::Handle,
        namespace: &Namespace,
    ) -> Result<Vec<Document>, TransportError>;

    /// Release the connection
    async fn close(&self, handle: Self::Handle) -> Result<(), TransportError>;
}
