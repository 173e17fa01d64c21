use serde::{Deserialize, Serialize};

/// Buffer used when proximity is cached, in meters.
pub const DEFAULT_CACHE_BUFFER_IN_METERS: f64 = 100.0;

/// Tolerance handed to the topology preserving simplifier for `geom_lowres`.
pub const DEFAULT_LOWRES_SIMPLIFICATION: f64 = 2.0;

/// Decimal places kept in `geom_lowres`.
pub const DEFAULT_LOWRES_PRECISION: u32 = 5;

/// How many times an invalid geometry is repaired with `buffer(0)` before
/// the validation error is reported.
pub const MAX_REPAIR_ATTEMPTS: usize = 1;

/// Geodetic coordinates every `geog` column is stored in.
pub const WGS84: &str = "+proj=longlat +datum=WGS84 +no_defs";

/// Spherical Web Mercator, used for `tilegeom`.
pub const WEB_MERCATOR: &str =
    "+proj=merc +a=6378137 +b=6378137 +lat_ts=0 +lon_0=0 +x_0=0 +y_0=0 +k=1 +units=m +no_defs";

/// Planar projection `geom` is derived in. Areas and distances are measured
/// in its units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Projection {
    /// Coordinates are used as they are, which treats them as planar.
    Identity,
    /// A proj4 definition string.
    Proj4(String),
}

impl Projection {
    pub fn web_mercator() -> Self {
        Self::Proj4(WEB_MERCATOR.to_owned())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpatialConfig {
    /// `None` caches proximity between every pair of records.
    pub default_cache_buffer_in_meters: Option<f64>,
    pub lowres_simplification: f64,
    pub lowres_precision: u32,
    pub projection: Projection,
    pub automatically_cache_derivatives: bool,
    pub automatically_refresh_aggregate: bool,
}

impl Default for SpatialConfig {
    fn default() -> Self {
        Self {
            default_cache_buffer_in_meters: Some(DEFAULT_CACHE_BUFFER_IN_METERS),
            lowres_simplification: DEFAULT_LOWRES_SIMPLIFICATION,
            lowres_precision: DEFAULT_LOWRES_PRECISION,
            projection: Projection::Proj4(WEB_MERCATOR.to_owned()),
            automatically_cache_derivatives: true,
            automatically_refresh_aggregate: true,
        }
    }
}
