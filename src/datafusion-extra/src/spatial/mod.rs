mod function;
pub mod geometry;
pub mod geos_ext;

pub use function::register_spatial_udfs;
