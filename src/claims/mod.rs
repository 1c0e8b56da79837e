//! Presence claims: decoding, spatial grouping and marker formatting
//!
//! ```text
//! raw documents ─▶ decode_claims ─▶ aggregate ─▶ render_marker / to_feature_collection
//! ```
//!
//! Everything here is pure and synchronous.

pub mod aggregate;
pub mod geojson;
pub mod model;
pub mod render;

pub use aggregate::{aggregate, LocationGroup};
pub use geojson::{to_feature_collection, Feature, FeatureCollection};
pub use model::{decode_claims, Claim, ClaimDecodeError, Coordinates, FieldValue};
pub use render::{format_timestamp, render_marker, EntryLayout, MarkerPayload, RenderOptions};
