//! Presence claim records
//!
//! Claims are stored schemaless. Decoding reads the store's camelCase field
//! names, accepts any BSON numeric type for numbers, and keeps display-only
//! fields in whatever type they were written with.

use bson::spec::ElementType;
use bson::{Bson, Document};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use tracing::warn;

/// WGS84 position
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }
}

/// A loosely typed scalar shown verbatim to users
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Int(i64),
    Float(f64),
    Text(String),
    Missing,
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Text(v) => f.write_str(v),
            Self::Missing => f.write_str("unknown"),
        }
    }
}

impl From<&Bson> for FieldValue {
    fn from(value: &Bson) -> Self {
        match value {
            Bson::Int32(v) => Self::Int(i64::from(*v)),
            Bson::Int64(v) => Self::Int(*v),
            Bson::Double(v) => Self::Float(*v),
            Bson::String(v) => Self::Text(v.clone()),
            Bson::Null | Bson::Undefined => Self::Missing,
            other => Self::Text(other.to_string()),
        }
    }
}

/// One presence claim as stored upstream
///
/// `geo_hash_location` is computed upstream and used as an opaque grouping
/// key; nothing here derives it from the coordinates.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Claim {
    pub id: String,
    pub transaction_hash: String,
    pub minter: String,
    /// Epoch milliseconds
    #[serde(serialize_with = "serialize_millis")]
    pub timestamp: f64,
    pub zone: FieldValue,
    pub zone_name: String,
    pub localization_grade: FieldValue,
    pub distinct_anchors: FieldValue,
    pub bytes20_location: String,
    pub geo_hash_location: String,
    #[serde(flatten)]
    pub location: Coordinates,
    pub altitude: FieldValue,
}

/// Whole milliseconds serialize as integers, anything else as a float
fn serialize_millis<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    let in_range = value.is_finite() && value.abs() < 9.0e15;
    if in_range && value.fract() == 0.0 {
        serializer.serialize_i64(*value as i64)
    } else {
        serializer.serialize_f64(*value)
    }
}

/// Why a stored document is not a usable claim
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClaimDecodeError {
    #[error("missing field `{0}`")]
    Missing(&'static str),

    #[error("field `{field}` has unexpected type {found:?}")]
    WrongType {
        field: &'static str,
        found: ElementType,
    },
}

fn required<'a>(doc: &'a Document, field: &'static str) -> Result<&'a Bson, ClaimDecodeError> {
    match doc.get(field) {
        None | Some(Bson::Null) => Err(ClaimDecodeError::Missing(field)),
        Some(value) => Ok(value),
    }
}

fn text(value: &Bson, field: &'static str) -> Result<String, ClaimDecodeError> {
    match value {
        Bson::String(s) => Ok(s.clone()),
        Bson::ObjectId(oid) => Ok(oid.to_hex()),
        other => Err(ClaimDecodeError::WrongType {
            field,
            found: other.element_type(),
        }),
    }
}

fn number(value: &Bson, field: &'static str) -> Result<f64, ClaimDecodeError> {
    match value {
        Bson::Double(v) => Ok(*v),
        Bson::Int32(v) => Ok(f64::from(*v)),
        Bson::Int64(v) => Ok(*v as f64),
        other => Err(ClaimDecodeError::WrongType {
            field,
            found: other.element_type(),
        }),
    }
}

fn optional_text(doc: &Document, field: &'static str) -> Result<String, ClaimDecodeError> {
    match doc.get(field) {
        None | Some(Bson::Null) => Ok(String::new()),
        Some(value) => text(value, field),
    }
}

fn loose(doc: &Document, field: &'static str) -> FieldValue {
    doc.get(field).map(FieldValue::from).unwrap_or(FieldValue::Missing)
}

impl TryFrom<&Document> for Claim {
    type Error = ClaimDecodeError;

    fn try_from(doc: &Document) -> Result<Self, Self::Error> {
        let location = match required(doc, "latlonLocation")? {
            Bson::Document(inner) => Coordinates {
                latitude: number(required(inner, "latitude")?, "latlonLocation.latitude")?,
                longitude: number(required(inner, "longitude")?, "latlonLocation.longitude")?,
            },
            other => {
                return Err(ClaimDecodeError::WrongType {
                    field: "latlonLocation",
                    found: other.element_type(),
                })
            }
        };

        Ok(Self {
            id: text(required(doc, "_id")?, "_id")?,
            transaction_hash: text(required(doc, "transactionHash")?, "transactionHash")?,
            minter: optional_text(doc, "minter")?,
            timestamp: number(required(doc, "timestamp")?, "timestamp")?,
            zone: loose(doc, "zone"),
            zone_name: optional_text(doc, "zoneName")?,
            localization_grade: loose(doc, "localizationGrade"),
            distinct_anchors: loose(doc, "distinctAnchors"),
            bytes20_location: optional_text(doc, "bytes20Location")?,
            geo_hash_location: text(required(doc, "geoHashLocation")?, "geoHashLocation")?,
            location,
            altitude: loose(doc, "altitude"),
        })
    }
}

/// Decode a batch of raw documents, skipping (and logging) any that are not claims
pub fn decode_claims(documents: &[Document]) -> Vec<Claim> {
    documents
        .iter()
        .filter_map(|doc| match Claim::try_from(doc) {
            Ok(claim) => Some(claim),
            Err(e) => {
                let id = doc.get("_id").map(|v| v.to_string()).unwrap_or_default();
                warn!(id = %id, error = %e, "Skipping undecodable claim document");
                None
            }
        })
        .collect()
}
