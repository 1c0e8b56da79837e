//! Marker popup formatting
//!
//! Turns a [`LocationGroup`] into the payload a map popup displays: a header
//! for the location, then one detail block per claim, newest first.
//!
//! A group with a single claim shows its details expanded. Groups with two or
//! more claims show each claim behind a toggle labelled with its timestamp.
//!
//! Timestamps are not validated: whatever the store holds is rendered.
//! Finite values convert as-is, so negative ones become dates before 1970.
//! Values with no calendar date (NaN, infinities, beyond chrono's range)
//! render as the Unix epoch only so that formatting never fails; this is not
//! a sanity check and no claim is rejected for its timestamp.

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::Serialize;
use std::fmt::Write;

use super::aggregate::LocationGroup;
use super::model::{Claim, Coordinates};

const MONTHS: [&str; 12] = [
    "January", "February", "March", "April", "May", "June", "July", "August", "September",
    "October", "November", "December",
];

pub const DEFAULT_EXPLORER_URL: &str = "https://devnet-l2.foam.space";

/// Rendering knobs
#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Block explorer base for transaction and address links
    pub explorer_url: String,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            explorer_url: DEFAULT_EXPLORER_URL.to_string(),
        }
    }
}

/// How claim detail blocks are laid out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryLayout {
    /// Always visible (single-claim groups)
    Expanded,
    /// Hidden behind a timestamp toggle (groups of two or more)
    Collapsible,
}

/// One line of a claim detail block
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detail {
    pub label: &'static str,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
}

/// A claim's rendered block
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimEntry {
    /// Human-readable UTC timestamp, doubles as the toggle label
    pub label: String,
    /// DOM id for deep links: the transaction hash minus its first character
    pub element_id: String,
    pub details: Vec<Detail>,
}

/// Everything a popup needs for one location
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerPayload {
    pub spatial_key: String,
    pub coordinates: Coordinates,
    pub count: usize,
    pub layout: EntryLayout,
    /// Claims sorted newest first; same order as `entries`
    pub claims: Vec<Claim>,
    pub entries: Vec<ClaimEntry>,
}

/// Format epoch milliseconds as e.g. `November 14 2023 22:13:20 UTC`.
///
/// Total over `f64`: values without a calendar date map to the epoch.
pub fn format_timestamp(millis: f64) -> String {
    let instant = if millis.is_finite() {
        DateTime::<Utc>::from_timestamp_millis(millis as i64).unwrap_or(DateTime::UNIX_EPOCH)
    } else {
        DateTime::UNIX_EPOCH
    };

    format!(
        "{} {} {:04} {:02}:{:02}:{:02} UTC",
        MONTHS[instant.month0() as usize],
        instant.day(),
        instant.year(),
        instant.hour(),
        instant.minute(),
        instant.second()
    )
}

/// Stable sort, newest first. Equal timestamps keep their relative order.
pub fn sort_newest_first(claims: &mut [Claim]) {
    claims.sort_by(|a, b| b.timestamp.total_cmp(&a.timestamp));
}

fn details(claim: &Claim, layout: EntryLayout, options: &RenderOptions) -> Vec<Detail> {
    let explorer = options.explorer_url.trim_end_matches('/');
    let anchors_label = match layout {
        EntryLayout::Expanded => "Distinct Anchors",
        EntryLayout::Collapsible => "Number of Distinct Anchors",
    };

    vec![
        Detail {
            label: "Claim ID",
            text: claim.id.clone(),
            href: None,
        },
        Detail {
            label: "Tx Hash",
            text: claim.transaction_hash.clone(),
            href: Some(format!("{}/tx/{}", explorer, claim.transaction_hash)),
        },
        Detail {
            label: "Minted By",
            text: claim.minter.clone(),
            href: Some(format!("{}/address/{}", explorer, claim.minter)),
        },
        Detail {
            label: "Zone Number",
            text: format!("{}  (Zone Name: {})", claim.zone, claim.zone_name),
            href: None,
        },
        Detail {
            label: "Localization Grade",
            text: format!(
                "{}  ({}: {})",
                claim.localization_grade, anchors_label, claim.distinct_anchors
            ),
            href: None,
        },
        Detail {
            label: "Altitude",
            text: claim.altitude.to_string(),
            href: None,
        },
    ]
}

/// Build the popup payload for one location group
pub fn render_marker(group: &LocationGroup, options: &RenderOptions) -> MarkerPayload {
    let mut claims = group.claims.clone();
    sort_newest_first(&mut claims);

    let layout = if claims.len() == 1 {
        EntryLayout::Expanded
    } else {
        EntryLayout::Collapsible
    };

    let entries = claims
        .iter()
        .map(|claim| ClaimEntry {
            label: format_timestamp(claim.timestamp),
            element_id: claim.transaction_hash.chars().skip(1).collect(),
            details: details(claim, layout, options),
        })
        .collect();

    MarkerPayload {
        spatial_key: group.spatial_key.clone(),
        coordinates: group.coordinates,
        count: claims.len(),
        layout,
        claims,
        entries,
    }
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

impl MarkerPayload {
    /// Header lines: geohash, then coordinates
    pub fn header(&self) -> [String; 2] {
        [
            format!("Geohash: {}", self.spatial_key),
            format!(
                "Coordinates: {}, {}",
                self.coordinates.latitude, self.coordinates.longitude
            ),
        ]
    }

    /// Popup markup for the map widget
    pub fn to_html(&self) -> String {
        let mut html = String::new();
        for line in self.header() {
            let _ = write!(html, "<h3>{}</h3>", escape_html(&line));
        }

        for entry in &self.entries {
            let id = escape_html(&entry.element_id);
            let label = escape_html(&entry.label);
            match self.layout {
                EntryLayout::Expanded => {
                    let _ = write!(html, "<h4>{}</h4><ul id=\"{}\">", label, id);
                }
                EntryLayout::Collapsible => {
                    let _ = write!(
                        html,
                        "<button type=\"button\" class=\"collapsible\">{}</button><ul class=\"content\" id=\"{}\">",
                        label, id
                    );
                }
            }

            for detail in &entry.details {
                let text = escape_html(&detail.text);
                let _ = match &detail.href {
                    Some(href) => write!(
                        html,
                        "<li>{}: <a href=\"{}\">{}</a></li>",
                        detail.label,
                        escape_html(href),
                        text
                    ),
                    None => write!(html, "<li>{}: {}</li>", detail.label, text),
                };
            }
            html.push_str("</ul>");
        }

        html
    }
}
