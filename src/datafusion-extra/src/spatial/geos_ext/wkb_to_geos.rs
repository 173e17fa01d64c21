use std::cell::RefCell;

use geo_traits::{
    CoordTrait, GeometryCollectionTrait, GeometryTrait, GeometryType, LineStringTrait,
    MultiLineStringTrait, MultiPointTrait, MultiPolygonTrait, PointTrait, PolygonTrait,
};
use geos::{CoordSeq, CoordType, GResult, Geometry, GeometryTypes};
use wkb::reader::Wkb;

/// Builds GEOS geometries from parsed WKB.
///
/// Only x and y are carried over, so z and m ordinates are dropped. The
/// coordinate buffer is kept between conversions.
#[derive(Default)]
pub struct WkbConverter {
    scratch: RefCell<Vec<f64>>,
}

impl WkbConverter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn convert(&self, wkb: &Wkb) -> GResult<Geometry> {
        geometry(&mut self.scratch.borrow_mut(), wkb)
    }

    /// Every part of `wkb` of the given dimension as one multi geometry,
    /// looking inside geometry collections. Empty parts are skipped and an
    /// empty multi geometry is returned when nothing matches.
    pub fn extract(&self, wkb: &Wkb, dimension: ExtractDimension) -> GResult<Geometry> {
        let mut parts = Vec::new();
        collect_parts(&mut self.scratch.borrow_mut(), wkb, dimension, &mut parts)?;
        multi(dimension.collection_type(), parts)
    }
}

/// Geometry dimension, numbered the way `ST_CollectionExtract` numbers it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtractDimension {
    Point = 1,
    Line = 2,
    Polygon = 3,
}

impl ExtractDimension {
    pub const ALL: [ExtractDimension; 3] = [Self::Point, Self::Line, Self::Polygon];

    pub fn try_from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::Point),
            2 => Some(Self::Line),
            3 => Some(Self::Polygon),
            _ => None,
        }
    }

    fn collection_type(self) -> GeometryTypes {
        match self {
            Self::Point => GeometryTypes::MultiPoint,
            Self::Line => GeometryTypes::MultiLineString,
            Self::Polygon => GeometryTypes::MultiPolygon,
        }
    }
}

fn geometry(scratch: &mut Vec<f64>, wkb: &Wkb) -> GResult<Geometry> {
    match wkb.as_type() {
        GeometryType::Point(p) => point(scratch, p),
        GeometryType::LineString(ls) => line_string(scratch, ls),
        GeometryType::Polygon(poly) => polygon(scratch, poly),
        GeometryType::MultiPoint(mp) => {
            let mut parts = Vec::with_capacity(mp.num_points());
            for p in mp.points() {
                parts.push(point(scratch, &p)?);
            }
            multi(GeometryTypes::MultiPoint, parts)
        }
        GeometryType::MultiLineString(mls) => {
            let mut parts = Vec::with_capacity(mls.num_line_strings());
            for ls in mls.line_strings() {
                parts.push(line_string(scratch, ls)?);
            }
            multi(GeometryTypes::MultiLineString, parts)
        }
        GeometryType::MultiPolygon(mpoly) => {
            let mut parts = Vec::with_capacity(mpoly.num_polygons());
            for poly in mpoly.polygons() {
                parts.push(polygon(scratch, poly)?);
            }
            multi(GeometryTypes::MultiPolygon, parts)
        }
        GeometryType::GeometryCollection(gc) => {
            let mut parts = Vec::with_capacity(gc.num_geometries());
            for geom in gc.geometries() {
                parts.push(geometry(scratch, geom)?);
            }
            multi(GeometryTypes::GeometryCollection, parts)
        }
        _ => {
            Err(geos::Error::ConversionError(
                "unsupported WKB geometry type".to_owned(),
            ))
        }
    }
}

fn collect_parts(
    scratch: &mut Vec<f64>, wkb: &Wkb, dimension: ExtractDimension, out: &mut Vec<Geometry>,
) -> GResult<()> {
    match (wkb.as_type(), dimension) {
        (GeometryType::Point(p), ExtractDimension::Point) if p.coord().is_some() => {
            out.push(point(scratch, p)?);
        }
        (GeometryType::MultiPoint(mp), ExtractDimension::Point) => {
            for p in mp.points().filter(|p| p.coord().is_some()) {
                out.push(point(scratch, &p)?);
            }
        }
        (GeometryType::LineString(ls), ExtractDimension::Line) if ls.num_coords() > 0 => {
            out.push(line_string(scratch, ls)?);
        }
        (GeometryType::MultiLineString(mls), ExtractDimension::Line) => {
            for ls in mls.line_strings().filter(|ls| ls.num_coords() > 0) {
                out.push(line_string(scratch, ls)?);
            }
        }
        (GeometryType::Polygon(poly), ExtractDimension::Polygon) if poly.exterior().is_some() => {
            out.push(polygon(scratch, poly)?);
        }
        (GeometryType::MultiPolygon(mpoly), ExtractDimension::Polygon) => {
            for poly in mpoly.polygons().filter(|poly| poly.exterior().is_some()) {
                out.push(polygon(scratch, poly)?);
            }
        }
        (GeometryType::GeometryCollection(gc), _) => {
            for geom in gc.geometries() {
                collect_parts(scratch, geom, dimension, out)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn multi(kind: GeometryTypes, parts: Vec<Geometry>) -> GResult<Geometry> {
    if parts.is_empty() {
        return Geometry::create_empty_collection(kind);
    }
    match kind {
        GeometryTypes::MultiPoint => Geometry::create_multipoint(parts),
        GeometryTypes::MultiLineString => Geometry::create_multiline_string(parts),
        GeometryTypes::MultiPolygon => Geometry::create_multipolygon(parts),
        _ => Geometry::create_geometry_collection(parts),
    }
}

fn point<P: PointTrait<T = f64>>(scratch: &mut Vec<f64>, p: &P) -> GResult<Geometry> {
    match p.coord() {
        Some(coord) => Geometry::create_point(coord_seq(scratch, std::iter::once(coord))?),
        None => Geometry::create_empty_point(),
    }
}

fn line_string<L: LineStringTrait<T = f64>>(scratch: &mut Vec<f64>, ls: &L) -> GResult<Geometry> {
    if ls.num_coords() == 0 {
        return Geometry::create_empty_line_string();
    }
    Geometry::create_line_string(coord_seq(scratch, ls.coords())?)
}

fn polygon<P: PolygonTrait<T = f64>>(scratch: &mut Vec<f64>, poly: &P) -> GResult<Geometry> {
    let Some(exterior) = poly.exterior() else {
        return Geometry::create_empty_polygon();
    };
    let shell = Geometry::create_linear_ring(coord_seq(scratch, exterior.coords())?)?;

    let mut holes = Vec::with_capacity(poly.num_interiors());
    for ring in poly.interiors() {
        holes.push(Geometry::create_linear_ring(coord_seq(
            scratch,
            ring.coords(),
        )?)?);
    }
    Geometry::create_polygon(shell, holes)
}

fn coord_seq<C: CoordTrait<T = f64>>(
    scratch: &mut Vec<f64>, coords: impl Iterator<Item = C>,
) -> GResult<CoordSeq> {
    scratch.clear();
    for coord in coords {
        scratch.push(coord.x());
        scratch.push(coord.y());
    }
    CoordSeq::new_from_buffer(scratch, scratch.len() / 2, CoordType::XY)
}
