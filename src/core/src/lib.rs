//! Spatial features of domain records: feature import and derivation,
//! per-record aggregates, a proximity cache between records of two classes,
//! and buffered queries answered from that cache or from live geometry.

mod aggregate;
mod backend;
mod builder;
mod config;
mod context;
mod engine;
mod feature_store;
mod import;
mod locks;
mod model;
mod planner;
mod proximity;
mod schema;
mod store;
mod tasks;

pub use aggregate::AggregateStore;
pub use backend::{Bounds, GeometryBackend, GeosBackend};
pub use builder::ProximityCacheBuilder;
pub use common_exception::{SpatialError, SpatialResult};
pub use config::{
    DEFAULT_CACHE_BUFFER_IN_METERS, DEFAULT_LOWRES_PRECISION, DEFAULT_LOWRES_SIMPLIFICATION,
    MAX_REPAIR_ATTEMPTS, Projection, SpatialConfig, WEB_MERCATOR, WGS84,
};
pub use context::QueryContext;
pub use engine::{
    DEFAULT_TASK_PRIORITY, SpatialContext, SpatialContextBuilder, UPDATE_FEATURES,
    UPDATE_SPATIAL_CACHE,
};
pub use feature_store::{FeatureStore, ImportOptions, ValidatedGeometry};
pub use import::{
    FeatureSource, GeoJsonImporter, Importer, REQUIRED_SHAPEFILE_COMPONENT_EXTENSIONS, RawFeature,
    WktImporter, validate_shapefile_archive,
};
pub use locks::KeyedLocks;
pub use model::{
    FeatureType, ModelClass, ModelRef, ModelRegistry, Record, Scope, SpatialModel, Target,
};
pub use planner::{BufferOptions, BufferedQueryPlanner, ProximityRow, QueryPath, QueryResult};
pub use proximity::{Neighbour, ProximityCache, canonical_pair};
pub use schema::{
    AggregateFeatureRow, Derivatives, FeatureRow, ModelRow, SpatialCacheRow, SpatialProximityRow,
};
pub use store::{SpatialStore, Tables};
pub use tasks::{AsyncTask, InProcessTaskQueue, Job, TaskHandle, TaskStatus};
