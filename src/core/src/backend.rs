use std::fmt;

use common_exception::{SpatialError, SpatialResult};
use datafusion_extra::spatial::geometry::GeometryTypeId;
use datafusion_extra::spatial::geos_ext::{
    ExtractDimension, GeosExt, collection_extract, wkb_to_geos,
};
use geos::{Geom, Geometry};
use proj4rs::Proj;
use serde::{Deserialize, Serialize};

use crate::config::{Projection, WGS84};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub north: f64,
    pub east: f64,
    pub south: f64,
    pub west: f64,
}

impl Bounds {
    /// The smallest bounds covering both.
    pub fn merge(self, other: Bounds) -> Bounds {
        Bounds {
            north: self.north.max(other.north),
            east: self.east.max(other.east),
            south: self.south.min(other.south),
            west: self.west.min(other.west),
        }
    }
}

/// Raw geometric computation over 2D WKB.
pub trait GeometryBackend: fmt::Debug + Send + Sync {
    fn parse_wkt(&self, wkt: &str) -> SpatialResult<Vec<u8>>;
    fn to_wkt(&self, wkb: &[u8]) -> SpatialResult<String>;

    /// Re-encodes `wkb` without z or m ordinates.
    fn force_2d(&self, wkb: &[u8]) -> SpatialResult<Vec<u8>>;
    fn geometry_type(&self, wkb: &[u8]) -> SpatialResult<GeometryTypeId>;
    fn is_empty(&self, wkb: &[u8]) -> SpatialResult<bool>;

    /// `None` when the geometry is valid, otherwise the reason it is not.
    fn validity_reason(&self, wkb: &[u8]) -> SpatialResult<Option<String>>;
    fn make_valid(&self, wkb: &[u8]) -> SpatialResult<Vec<u8>>;

    /// Transforms geodetic coordinates into `projection`.
    fn transform(&self, wkb: &[u8], projection: &Projection) -> SpatialResult<Vec<u8>>;
    fn simplify(&self, wkb: &[u8], tolerance: f64) -> SpatialResult<Vec<u8>>;
    fn round(&self, wkb: &[u8], decimals: u32) -> SpatialResult<Vec<u8>>;
    fn buffer(&self, wkb: &[u8], distance: f64) -> SpatialResult<Vec<u8>>;

    /// Unions the point, line and polygon parts of `parts` separately and
    /// collects the non-empty results. No parts at all, or only empty ones,
    /// yields `MULTIPOLYGON EMPTY`.
    fn union_by_dimension(&self, parts: &[&[u8]]) -> SpatialResult<Vec<u8>>;
    /// The union of the polygonal parts of `parts`.
    fn polygon_union(&self, parts: &[&[u8]]) -> SpatialResult<Vec<u8>>;

    fn area(&self, wkb: &[u8]) -> SpatialResult<f64>;
    fn bounds(&self, wkb: &[u8]) -> SpatialResult<Option<Bounds>>;
    fn point_on_surface(&self, wkb: &[u8]) -> SpatialResult<Vec<u8>>;

    /// `None` when either side is empty.
    fn distance(&self, a: &[u8], b: &[u8]) -> SpatialResult<Option<f64>>;
    fn intersects(&self, a: &[u8], b: &[u8]) -> SpatialResult<bool>;
    /// Area shared by the polygonal parts of `a` and `b`.
    fn intersection_area(&self, a: &[u8], b: &[u8]) -> SpatialResult<f64>;
}

/// [`GeometryBackend`] on GEOS, with proj4rs for coordinate transforms.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeosBackend;

fn read(wkb: &[u8]) -> SpatialResult<Geometry> {
    wkb_to_geos(wkb).map_err(SpatialError::backend)
}

fn write(geom: &Geometry) -> SpatialResult<Vec<u8>> {
    geom.as_wkb().map_err(SpatialError::backend)
}

fn proj(definition: &str) -> SpatialResult<Proj> {
    Proj::from_proj_string(definition)
        .map_err(|e| SpatialError::backend(format!("invalid projection '{definition}': {e}")))
}

fn union_all(geoms: Vec<Geometry>) -> SpatialResult<Geometry> {
    Geometry::create_geometry_collection(geoms)
        .and_then(|collection| collection.unary_union())
        .map_err(SpatialError::backend)
}

fn extract_all(parts: &[&[u8]], dimension: ExtractDimension) -> SpatialResult<Vec<Geometry>> {
    parts
        .iter()
        .map(|part| collection_extract(part, dimension).map_err(SpatialError::backend))
        .collect()
}

impl GeometryBackend for GeosBackend {
    fn parse_wkt(&self, wkt: &str) -> SpatialResult<Vec<u8>> {
        let geom = Geometry::new_from_wkt(wkt).map_err(SpatialError::backend)?;
        write(&geom)
    }

    fn to_wkt(&self, wkb: &[u8]) -> SpatialResult<String> {
        read(wkb)?.as_text().map_err(SpatialError::backend)
    }

    fn force_2d(&self, wkb: &[u8]) -> SpatialResult<Vec<u8>> {
        // GEOS parses the ordinates it finds and writes two
        let geom = Geometry::new_from_wkb(wkb).map_err(SpatialError::backend)?;
        write(&geom)
    }

    fn geometry_type(&self, wkb: &[u8]) -> SpatialResult<GeometryTypeId> {
        GeometryTypeId::try_from_wkb(wkb).map_err(|e| SpatialError::backend(e.to_string()))
    }

    fn is_empty(&self, wkb: &[u8]) -> SpatialResult<bool> {
        read(wkb)?.is_empty().map_err(SpatialError::backend)
    }

    fn validity_reason(&self, wkb: &[u8]) -> SpatialResult<Option<String>> {
        read(wkb)?.validity_reason().map_err(SpatialError::backend)
    }

    fn make_valid(&self, wkb: &[u8]) -> SpatialResult<Vec<u8>> {
        let repaired = read(wkb)?.st_make_valid().map_err(SpatialError::backend)?;
        write(&repaired)
    }

    fn transform(&self, wkb: &[u8], projection: &Projection) -> SpatialResult<Vec<u8>> {
        match projection {
            Projection::Identity => Ok(wkb.to_vec()),
            Projection::Proj4(definition) => {
                let transformed = read(wkb)?
                    .st_transform(&proj(WGS84)?, &proj(definition)?)
                    .map_err(SpatialError::backend)?;
                write(&transformed)
            }
        }
    }

    fn simplify(&self, wkb: &[u8], tolerance: f64) -> SpatialResult<Vec<u8>> {
        let simplified = read(wkb)?
            .topology_preserve_simplify(tolerance)
            .map_err(SpatialError::backend)?;
        write(&simplified)
    }

    fn round(&self, wkb: &[u8], decimals: u32) -> SpatialResult<Vec<u8>> {
        let rounded = read(wkb)?
            .st_round(decimals)
            .map_err(SpatialError::backend)?;
        write(&rounded)
    }

    fn buffer(&self, wkb: &[u8], distance: f64) -> SpatialResult<Vec<u8>> {
        let buffered = read(wkb)?
            .st_buffer(distance)
            .map_err(SpatialError::backend)?;
        write(&buffered)
    }

    fn union_by_dimension(&self, parts: &[&[u8]]) -> SpatialResult<Vec<u8>> {
        let mut unions = Vec::with_capacity(3);
        for dimension in ExtractDimension::ALL {
            let extracted = extract_all(parts, dimension)?;
            if extracted.is_empty() {
                continue;
            }
            let union = union_all(extracted)?;
            if !union.is_empty().map_err(SpatialError::backend)? {
                unions.push(union);
            }
        }

        let geom = match unions.len() {
            0 => Geometry::empty_multipolygon().map_err(SpatialError::backend)?,
            1 => unions.remove(0),
            _ => Geometry::create_geometry_collection(unions).map_err(SpatialError::backend)?,
        };
        write(&geom)
    }

    fn polygon_union(&self, parts: &[&[u8]]) -> SpatialResult<Vec<u8>> {
        let polygons = extract_all(parts, ExtractDimension::Polygon)?;
        if polygons.is_empty() {
            return write(&Geometry::empty_multipolygon().map_err(SpatialError::backend)?);
        }
        write(&union_all(polygons)?)
    }

    fn area(&self, wkb: &[u8]) -> SpatialResult<f64> {
        read(wkb)?.area().map_err(SpatialError::backend)
    }

    fn bounds(&self, wkb: &[u8]) -> SpatialResult<Option<Bounds>> {
        let bounds = read(wkb)?.bounds().map_err(SpatialError::backend)?;
        Ok(bounds.map(|[west, south, east, north]| {
            Bounds {
                north,
                east,
                south,
                west,
            }
        }))
    }

    fn point_on_surface(&self, wkb: &[u8]) -> SpatialResult<Vec<u8>> {
        let point = read(wkb)?
            .point_on_surface()
            .map_err(SpatialError::backend)?;
        write(&point)
    }

    fn distance(&self, a: &[u8], b: &[u8]) -> SpatialResult<Option<f64>> {
        read(a)?
            .st_distance(&read(b)?)
            .map_err(SpatialError::backend)
    }

    fn intersects(&self, a: &[u8], b: &[u8]) -> SpatialResult<bool> {
        read(a)?
            .st_intersects(&read(b)?)
            .map_err(SpatialError::backend)
    }

    fn intersection_area(&self, a: &[u8], b: &[u8]) -> SpatialResult<f64> {
        let a = union_all(extract_all(&[a], ExtractDimension::Polygon)?)?;
        let b = union_all(extract_all(&[b], ExtractDimension::Polygon)?)?;
        a.st_intersection_area(&b).map_err(SpatialError::backend)
    }
}
