//! Named region registry.
//!
//! Defines the bounding boxes this tool has been pointed at, so a run can be
//! started with `--region golden` instead of four raw coordinates. User
//! regions from the config file are resolved alongside these; see
//! `config::Config::resolve_region`.

use crate::model::BoundingBox;

// ---------------------------------------------------------------------------
// Region metadata
// ---------------------------------------------------------------------------

/// A named bounding box.
pub struct Region {
    /// Short key used on the command line.
    pub name: &'static str,
    /// Human-readable title drawn into summaries.
    pub title: &'static str,
    pub nw_lat: f64,
    pub nw_lng: f64,
    pub se_lat: f64,
    pub se_lng: f64,
}

impl Region {
    pub fn bounding_box(&self) -> BoundingBox {
        BoundingBox {
            nw_lat: self.nw_lat,
            nw_lng: self.nw_lng,
            se_lat: self.se_lat,
            se_lng: self.se_lng,
        }
    }
}

/// Region used when neither `--region` nor `--bbox` is given.
pub const DEFAULT_REGION: &str = "golden";

/// All built-in regions.
pub static REGION_REGISTRY: &[Region] = &[
    Region {
        name: "golden",
        title: "Golden, BC",
        nw_lat: 51.3,
        nw_lng: -117.0,
        se_lat: 51.0,
        se_lng: -116.0,
    },
    Region {
        name: "golden-wide",
        title: "Golden Region, BC",
        nw_lat: 51.5,
        nw_lng: -117.5,
        se_lat: 51.0,
        se_lng: -116.0,
    },
    Region {
        name: "vancouver",
        title: "Vancouver/Surrey, BC",
        nw_lat: 49.35,
        nw_lng: -123.25,
        se_lat: 49.00,
        se_lng: -122.75,
    },
];

/// Looks up a built-in region by name (case-insensitive).
pub fn find_region(name: &str) -> Option<&'static Region> {
    REGION_REGISTRY
        .iter()
        .find(|r| r.name.eq_ignore_ascii_case(name.trim()))
}

pub fn all_region_names() -> Vec<&'static str> {
    REGION_REGISTRY.iter().map(|r| r.name).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
