//! Database layer
//!
//! Claim documents live in MongoDB. Access goes through the
//! [`ClaimTransport`] seam so the connection state machine in [`ClaimStore`]
//! can be exercised without a running database.

pub mod mongo;
pub mod store;
pub mod transport;

pub use mongo::MongoTransport;
pub use store::{ClaimSource, ClaimStore, ConnectFailure, ConnectionState, StoreConfig, StoreError};
pub use transport::{ClaimTransport, Namespace, TransportError};
