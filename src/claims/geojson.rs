//! GeoJSON output for the map widget
//!
//! One `Feature` per location group. Claims in `properties.claims` are
//! already sorted newest first and `properties.popup` carries the rendered
//! markup, so the client displays them without re-sorting.

use serde::Serialize;

use super::aggregate::LocationGroup;
use super::model::Claim;
use super::render::{render_marker, RenderOptions};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub struct FeatureCollection {
    pub features: Vec<Feature>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub struct Feature {
    pub geometry: Point,
    pub properties: FeatureProperties,
}

/// GeoJSON point; coordinates are `[longitude, latitude]`
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub struct Point {
    pub coordinates: [f64; 2],
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureProperties {
    /// Number of claims at this location; drives marker size
    pub number: usize,
    pub geo_hash: String,
    pub claims: Vec<Claim>,
    pub popup: String,
}

impl FeatureCollection {
    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// Build the feature collection for a set of location groups, in group order
pub fn to_feature_collection(groups: &[LocationGroup], options: &RenderOptions) -> FeatureCollection {
    let features = groups
        .iter()
        .map(|group| {
            let payload = render_marker(group, options);
            let popup = payload.to_html();
            Feature {
                geometry: Point {
                    coordinates: [group.coordinates.longitude, group.coordinates.latitude],
                },
                properties: FeatureProperties {
                    number: payload.count,
                    geo_hash: payload.spatial_key,
                    claims: payload.claims,
                    popup,
                },
            }
        })
        .collect();

    FeatureCollection { features }
}
