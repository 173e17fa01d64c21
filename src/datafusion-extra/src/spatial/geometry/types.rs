use anyhow::{Result, anyhow, bail};
use byteorder::{BigEndian, ByteOrder, LittleEndian};

/// The geometry type encoded in a WKB header, dimensions aside.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum GeometryTypeId {
    /// Code 0, unknown or mixed.
    Geometry,
    Point,
    LineString,
    Polygon,
    MultiPoint,
    MultiLineString,
    MultiPolygon,
    GeometryCollection,
}

impl GeometryTypeId {
    const BY_CODE: [GeometryTypeId; 8] = [
        Self::Geometry,
        Self::Point,
        Self::LineString,
        Self::Polygon,
        Self::MultiPoint,
        Self::MultiLineString,
        Self::MultiPolygon,
        Self::GeometryCollection,
    ];

    /// Reads the type from the first five bytes of `buf`. ISO codes (1003 for
    /// a polygon z) and EWKB flag bits are both understood.
    pub fn try_from_wkb(buf: &[u8]) -> Result<Self> {
        let Some(header) = buf.get(1..5) else {
            bail!("WKB buffer too short: {} bytes", buf.len());
        };
        let code = match buf[0] {
            0 => BigEndian::read_u32(header),
            1 => LittleEndian::read_u32(header),
            other => bail!("Invalid WKB byte order {other}"),
        };
        let base = (code & 0x0FFF_FFFF) % 1000;
        Self::BY_CODE
            .get(base as usize)
            .copied()
            .ok_or_else(|| anyhow!("Unknown geometry type identifier {base}"))
    }

    /// The name GeoJSON uses for the type.
    pub fn name(self) -> &'static str {
        match self {
            Self::Geometry => "Geometry",
            Self::Point => "Point",
            Self::LineString => "LineString",
            Self::Polygon => "Polygon",
            Self::MultiPoint => "MultiPoint",
            Self::MultiLineString => "MultiLineString",
            Self::MultiPolygon => "MultiPolygon",
            Self::GeometryCollection => "GeometryCollection",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_from_wkb() {
        let mut point = vec![1u8, 1, 0, 0, 0];
        point.extend_from_slice(&1f64.to_le_bytes());
        point.extend_from_slice(&2f64.to_le_bytes());
        assert_eq!(GeometryTypeId::try_from_wkb(&point).unwrap(), GeometryTypeId::Point);

        // big endian ISO multipolygon z
        let header = [0u8, 0, 0, 0x03, 0xEE];
        assert_eq!(GeometryTypeId::try_from_wkb(&header).unwrap(), GeometryTypeId::MultiPolygon);

        // EWKB polygon carrying an SRID
        let header = [1u8, 3, 0, 0, 0x20];
        assert_eq!(GeometryTypeId::try_from_wkb(&header).unwrap(), GeometryTypeId::Polygon);

        assert!(GeometryTypeId::try_from_wkb(&[1, 2]).is_err());
        assert!(GeometryTypeId::try_from_wkb(&[7, 1, 0, 0, 0]).is_err());
        assert!(GeometryTypeId::try_from_wkb(&[1, 9, 0, 0, 0]).is_err());
    }
}
