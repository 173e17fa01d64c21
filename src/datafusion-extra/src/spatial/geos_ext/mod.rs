mod ext;
mod wkb_to_geos;

pub use ext::GeosExt;
use geos::GResult;
pub use wkb_to_geos::{ExtractDimension, WkbConverter};

// One converter per thread so its coordinate buffer is reused.
thread_local! {
    static WKB_CONVERTER: WkbConverter = WkbConverter::new();
}

fn read_wkb(buf: &[u8]) -> GResult<wkb::reader::Wkb<'_>> {
    wkb::reader::read_wkb(buf).map_err(|e| geos::Error::ConversionError(e.to_string()))
}

/// Parse WKB bytes into a GEOS geometry.
pub fn wkb_to_geos(buf: &[u8]) -> GResult<geos::Geometry> {
    let wkb = read_wkb(buf)?;
    WKB_CONVERTER.with(|converter| converter.convert(&wkb))
}

/// `ST_CollectionExtract` over WKB bytes.
pub fn collection_extract(buf: &[u8], dimension: ExtractDimension) -> GResult<geos::Geometry> {
    let wkb = read_wkb(buf)?;
    WKB_CONVERTER.with(|converter| converter.extract(&wkb, dimension))
}

#[cfg(test)]
mod tests {
    use geos::{Geom, Geometry};

    use super::*;

    fn to_wkb(wkt: &str) -> Vec<u8> {
        Geometry::new_from_wkt(wkt).unwrap().as_wkb().unwrap()
    }

    #[test]
    fn test_extract_polygons_from_collection() {
        let wkb = to_wkb(
            "GEOMETRYCOLLECTION(POINT(5 5),LINESTRING(0 0,1 1),POLYGON((0 0,1 0,1 1,0 1,0 0)),\
             MULTIPOLYGON(((2 2,3 2,3 3,2 3,2 2))))",
        );

        let polygons = collection_extract(&wkb, ExtractDimension::Polygon).unwrap();
        assert_eq!(polygons.get_num_geometries().unwrap(), 2);
        assert!((polygons.area().unwrap() - 2.0).abs() < 1e-12);

        let lines = collection_extract(&wkb, ExtractDimension::Line).unwrap();
        assert_eq!(lines.get_num_geometries().unwrap(), 1);

        let points = collection_extract(&wkb, ExtractDimension::Point).unwrap();
        assert_eq!(points.get_num_geometries().unwrap(), 1);
    }

    #[test]
    fn test_extract_missing_dimension_is_empty() {
        let wkb = to_wkb("LINESTRING(0 0,1 1)");
        let polygons = collection_extract(&wkb, ExtractDimension::Polygon).unwrap();
        assert!(polygons.is_empty().unwrap());
    }

    #[test]
    fn test_wkb_round_trip_keeps_area() {
        let geom = wkb_to_geos(&to_wkb("POLYGON((0 0,4 0,4 4,0 4,0 0),(1 1,2 1,2 2,1 2,1 1))"))
            .unwrap();
        assert!((geom.area().unwrap() - 15.0).abs() < 1e-12);
    }
}
