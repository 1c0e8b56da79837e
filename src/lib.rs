//! presence-map - claim retrieval and spatial aggregation
//!
//! Fetches presence claims from MongoDB through a lazily connected,
//! retrying store client, groups them by geohash and serves them to the
//! map widget as GeoJSON with pre-rendered popups.

pub mod claims;
pub mod config;
pub mod db;
pub mod logging;
pub mod retry;
pub mod routes;
pub mod secrets;
pub mod server;
pub mod shutdown;
pub mod types;

pub use config::Args;
pub use retry::{RetryError, RetryPolicy};
pub use server::{run, AppState};
pub use types::{PresenceError, Result};
