//! HTTP server for presence-map

pub mod http;

pub use http::{route, run, serve, AppState};
