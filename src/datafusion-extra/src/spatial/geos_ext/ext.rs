use geos::{GResult, Geom, Geometry, GeometryTypes, WKBWriter, WKTWriter};
use proj4rs::Proj;
use proj4rs::adaptors::transform_xy;

/// What GEOS reports from `GEOSisValidReason` for a valid geometry.
const VALID_GEOMETRY_REASON: &str = "Valid Geometry";

/// Number of segments used per quarter circle when buffering.
const BUFFER_QUADRANT_SEGMENTS: i32 = 8;

pub trait GeosExt: Geom {
    fn as_wkb(&self) -> GResult<Vec<u8>>;
    fn as_text(&self) -> GResult<String>;

    fn empty_multipolygon() -> GResult<Geometry>;

    fn st_transform(&self, src_proj: &Proj, dst_proj: &Proj) -> GResult<Geometry>;
    fn st_round(&self, decimals: u32) -> GResult<Geometry>;
    fn st_make_valid(&self) -> GResult<Geometry>;
    fn st_buffer(&self, distance: f64) -> GResult<Geometry>;

    fn bbox_overlaps<G: GeosExt>(&self, other: &G) -> GResult<bool>;
    fn bbox_within_distance<G: GeosExt>(&self, other: &G, distance: f64) -> GResult<bool>;
    fn bounds(&self) -> GResult<Option<[f64; 4]>>;

    fn validity_reason(&self) -> GResult<Option<String>>;

    fn st_intersects<G: GeosExt>(&self, other: &G) -> GResult<bool>;
    fn st_dwithin<G: GeosExt>(&self, other: &G, distance: f64) -> GResult<bool>;
    fn st_distance<G: GeosExt>(&self, other: &G) -> GResult<Option<f64>>;
    fn st_intersection_area<G: GeosExt>(&self, other: &G) -> GResult<f64>;
}

impl GeosExt for Geometry {
    fn as_wkb(&self) -> GResult<Vec<u8>> {
        // GEOS writes two dimensions unless told otherwise, which also drops
        // any z-coordinates an importer handed us.
        let mut writer = WKBWriter::new()?;
        writer.write_wkb(self)
    }

    fn as_text(&self) -> GResult<String> {
        WKTWriter::new().and_then(|mut w| {
            w.set_trim(true);
            w.write(self)
        })
    }

    fn empty_multipolygon() -> GResult<Geometry> {
        Geometry::create_empty_collection(GeometryTypes::MultiPolygon)
    }

    fn st_transform(&self, src_proj: &Proj, dst_proj: &Proj) -> GResult<Geometry> {
        self.transform_xy(|x, y| {
            let (new_x, new_y) = if src_proj.is_latlong() {
                (x.to_radians(), y.to_radians())
            } else {
                (x, y)
            };

            let (new_x, new_y) = transform_xy(src_proj, dst_proj, new_x, new_y)
                .map_err(|e| geos::Error::GenericError(e.to_string()))?;
            if dst_proj.is_latlong() {
                Ok((new_x.to_degrees(), new_y.to_degrees()))
            } else {
                Ok((new_x, new_y))
            }
        })
    }

    fn st_round(&self, decimals: u32) -> GResult<Geometry> {
        let factor = 10f64.powi(decimals as i32);
        self.transform_xy(|x, y| {
            Ok((
                (x * factor).round() / factor,
                (y * factor).round() / factor,
            ))
        })
    }

    fn st_make_valid(&self) -> GResult<Geometry> {
        self.buffer(0.0, BUFFER_QUADRANT_SEGMENTS)
    }

    fn st_buffer(&self, distance: f64) -> GResult<Geometry> {
        self.buffer(distance, BUFFER_QUADRANT_SEGMENTS)
    }

    fn bbox_overlaps<G: GeosExt>(&self, other: &G) -> GResult<bool> {
        self.bbox_within_distance(other, 0.0)
    }

    fn bbox_within_distance<G: GeosExt>(&self, other: &G, distance: f64) -> GResult<bool> {
        if self.get_x_max()? + distance < other.get_x_min()?
            || self.get_y_max()? + distance < other.get_y_min()?
            || self.get_x_min()? - distance > other.get_x_max()?
            || self.get_y_min()? - distance > other.get_y_max()?
        {
            Ok(false)
        } else {
            Ok(true)
        }
    }

    fn bounds(&self) -> GResult<Option<[f64; 4]>> {
        if self.is_empty()? {
            return Ok(None);
        }
        Ok(Some([
            self.get_x_min()?,
            self.get_y_min()?,
            self.get_x_max()?,
            self.get_y_max()?,
        ]))
    }

    fn validity_reason(&self) -> GResult<Option<String>> {
        let reason = self.is_valid_reason()?;
        if reason == VALID_GEOMETRY_REASON {
            Ok(None)
        } else {
            Ok(Some(reason))
        }
    }

    fn st_intersects<G: GeosExt>(&self, other: &G) -> GResult<bool> {
        if self.is_empty()? || other.is_empty()? || !self.bbox_overlaps(other)? {
            return Ok(false);
        }
        self.to_prepared_geom()?.intersects(other)
    }

    fn st_dwithin<G: GeosExt>(&self, other: &G, distance: f64) -> GResult<bool> {
        if self.is_empty()? || other.is_empty()? {
            return Ok(false);
        }
        if !self.bbox_within_distance(other, distance)? {
            return Ok(false);
        }
        if distance == 0.0 {
            return self.to_prepared_geom()?.intersects(other);
        }
        Ok(self.distance(other)? <= distance)
    }

    fn st_distance<G: GeosExt>(&self, other: &G) -> GResult<Option<f64>> {
        if self.is_empty()? || other.is_empty()? {
            return Ok(None);
        }
        self.distance(other).map(Some)
    }

    fn st_intersection_area<G: GeosExt>(&self, other: &G) -> GResult<f64> {
        if self.st_intersects(other)? {
            self.intersection(other)?.area()
        } else {
            Ok(0.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wkt(s: &str) -> Geometry {
        Geometry::new_from_wkt(s).unwrap()
    }

    #[test]
    fn test_dwithin_uses_inclusive_distance() {
        let square = wkt("POLYGON((0 0,1 0,1 1,0 1,0 0))");
        let outlier = wkt("POLYGON((2 0,3 0,3 1,2 1,2 0))");

        assert!(!square.st_dwithin(&outlier, 0.0).unwrap());
        assert!(!square.st_dwithin(&outlier, 0.5).unwrap());
        assert!(square.st_dwithin(&outlier, 1.0).unwrap());
        assert_eq!(square.st_distance(&outlier).unwrap(), Some(1.0));
    }

    #[test]
    fn test_intersection_area_of_shared_diagonal() {
        let square = wkt("POLYGON((0 0,1 0,1 1,0 1,0 0))");
        let triangle = wkt("POLYGON((0 0,1 0,1 1,0 0))");

        let area = square.st_intersection_area(&triangle).unwrap();
        assert!((area - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_validity_reason() {
        let bowtie = wkt("POLYGON((0 0,1 1,1 0,0 1,0 0))");
        assert!(bowtie.validity_reason().unwrap().is_some());

        let repaired = bowtie.st_make_valid().unwrap();
        assert_eq!(repaired.validity_reason().unwrap(), None);
        assert_eq!(wkt("POINT(1 1)").validity_reason().unwrap(), None);
    }

    #[test]
    fn test_empty_geometry_is_never_near() {
        let empty = Geometry::empty_multipolygon().unwrap();
        let square = wkt("POLYGON((0 0,1 0,1 1,0 1,0 0))");

        assert!(!empty.st_dwithin(&square, 100.0).unwrap());
        assert_eq!(empty.st_distance(&square).unwrap(), None);
        assert_eq!(empty.bounds().unwrap(), None);
    }

    #[test]
    fn test_round() {
        let point = wkt("POINT(1.123456 2.987654)").st_round(2).unwrap();
        assert!((point.get_x().unwrap() - 1.12).abs() < 1e-12);
        assert!((point.get_y().unwrap() - 2.99).abs() < 1e-12);
    }
}
