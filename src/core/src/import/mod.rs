//! Feature importers and the feature update entry points.

mod geojson;
mod shapefile;
mod update;
mod wkt;

use std::collections::BTreeMap;
use std::fmt;

use common_exception::SpatialResult;
pub use geojson::GeoJsonImporter;
pub use shapefile::{REQUIRED_SHAPEFILE_COMPONENT_EXTENSIONS, validate_shapefile_archive};
pub use wkt::WktImporter;

use crate::model::Record;

/// One feature as an importer produced it, before validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawFeature {
    pub name: Option<String>,
    pub metadata: BTreeMap<String, String>,
    /// Free-form type, sanitized on import. Derived from the geometry when
    /// absent.
    pub feature_type: Option<String>,
    /// WKB in geodetic coordinates.
    pub geog: Vec<u8>,
    pub source_identifier: Option<String>,
}

/// Turns source data into features. Parsing happens at most once, on first
/// access.
pub trait Importer: Send + Sync {
    fn features(&self) -> &[RawFeature];

    /// Content hash of the source data.
    fn cache_key(&self) -> &str;

    /// Problems found while parsing, one message per problem.
    fn errors(&self) -> &[String];
}

/// Supplies the importers for a record of one class, the way a domain type
/// knows where its geometry comes from.
pub trait FeatureSource: fmt::Debug + Send + Sync {
    fn importers(&self, record: &Record) -> SpatialResult<Vec<Box<dyn Importer>>>;
}
