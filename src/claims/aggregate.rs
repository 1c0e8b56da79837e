//! Spatial aggregation
//!
//! Groups claims by their upstream geohash in a single pass. Groups come out
//! in the order their key was first seen; claims inside a group keep input
//! order. Sorting for display happens later, in [`render`](super::render).

use serde::Serialize;
use std::collections::HashMap;

use super::model::{Claim, Coordinates};

/// All claims sharing one spatial key
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationGroup {
    pub spatial_key: String,
    /// Taken from the first claim seen for this key
    pub coordinates: Coordinates,
    pub claims: Vec<Claim>,
}

impl LocationGroup {
    fn seeded(spatial_key: String, coordinates: Coordinates) -> Self {
        Self {
            spatial_key,
            coordinates,
            claims: Vec::new(),
        }
    }

    pub fn count(&self) -> usize {
        self.claims.len()
    }

    pub fn is_singleton(&self) -> bool {
        self.claims.len() == 1
    }
}

/// Partition `claims` by spatial key, preserving first-seen key order
pub fn aggregate<I>(claims: I) -> Vec<LocationGroup>
where
    I: IntoIterator<Item = Claim>,
{
    let mut slots: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<LocationGroup> = Vec::new();

    for claim in claims {
        let slot = match slots.get(&claim.geo_hash_location) {
            Some(&slot) => slot,
            None => {
                let slot = groups.len();
                slots.insert(claim.geo_hash_location.clone(), slot);
                groups.push(LocationGroup::seeded(
                    claim.geo_hash_location.clone(),
                    claim.location,
                ));
                slot
            }
        };
        groups[slot].claims.push(claim);
    }

    groups
}
