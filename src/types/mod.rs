//! Shared types

pub mod error;

pub use error::{PresenceError, Result};
