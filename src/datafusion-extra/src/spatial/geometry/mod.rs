mod types;

pub use types::GeometryTypeId;
