#![allow(dead_code)]

use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use common_telemetry::init_test_logging;
use datafusion_extra::spatial::geometry::GeometryTypeId;
use spatial_features::{
    Bounds, GeometryBackend, GeosBackend, ImportOptions, Importer, ModelClass, ModelRef,
    Projection, Record, SpatialConfig, SpatialContext, SpatialError, SpatialProximityRow,
    SpatialResult, WktImporter,
};

pub const SQUARE: &str = "POLYGON((0 0,1 0,1 1,0 1,0 0))";
pub const TRIANGLE: &str = "POLYGON((0 0,1 0,1 1,0 0))";
pub const OUTLIER: &str = "POLYGON((2 0,3 0,3 1,2 1,2 0))";
pub const FAR_AWAY: &str = "POLYGON((500 500,501 500,501 501,500 501,500 500))";

/// Planar coordinates, so areas and distances come out exact.
pub fn planar_config() -> SpatialConfig {
    SpatialConfig {
        projection: Projection::Identity,
        lowres_simplification: 0.0001,
        ..Default::default()
    }
}

/// Houses keep a features hash and area, cabins are houses, and parcels keep
/// a features hash.
pub fn context() -> SpatialContext {
    init_test_logging();
    let house = ModelClass::new("House")
        .with_features_hash()
        .with_features_area();
    let cabin = ModelClass::new("Cabin").subclass_of(&house);
    let parcel = ModelClass::new("Parcel").with_features_hash();
    SpatialContext::builder()
        .register(house)
        .register(cabin)
        .register(parcel)
        .config(planar_config())
        .build()
        .unwrap()
}

pub fn wkt(lines: &[&str]) -> Vec<Box<dyn Importer>> {
    vec![Box::new(WktImporter::new(lines.join("\n")))]
}

pub async fn record_with(ctx: &SpatialContext, class_name: &str, lines: &[&str]) -> Record {
    let record = ctx.create_record(class_name).unwrap();
    assert!(
        ctx.update_features_with(&record, &wkt(lines), ImportOptions::default())
            .await
            .unwrap()
    );
    record
}

pub fn model(ctx: &SpatialContext, record: &Record) -> ModelRef {
    ctx.registry().model_ref(record).unwrap()
}

pub type ProximityFact = (ModelRef, ModelRef, Option<f64>, Option<f64>);

/// Proximity rows without their ids, in a stable order.
pub fn proximity_facts(ctx: &SpatialContext) -> Vec<ProximityFact> {
    let mut facts: Vec<_> = ctx.store().read(|tables| {
        tables
            .spatial_proximities
            .values()
            .map(|row: &SpatialProximityRow| {
                (
                    row.model_a(),
                    row.model_b(),
                    row.distance_in_meters,
                    row.intersection_area_in_square_meters,
                )
            })
            .collect()
    });
    facts.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));
    facts
}

pub fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-6,
        "expected {expected}, got {actual}"
    );
}

type Hook = Box<dyn FnOnce() + Send>;

/// GEOS, except that once armed, unioning polygons east of x = 400 fails.
/// Only the live proximity join unions polygons for classes without a
/// features area, so this fails proximity work against `FAR_AWAY`.
#[derive(Default)]
pub struct FailingBackend {
    inner: GeosBackend,
    armed: AtomicBool,
    before_union: Mutex<Option<Hook>>,
}

impl fmt::Debug for FailingBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailingBackend")
            .field("armed", &self.armed)
            .finish_non_exhaustive()
    }
}

impl FailingBackend {
    pub fn arm(&self, armed: bool) {
        self.armed.store(armed, Ordering::SeqCst);
    }

    /// Runs `hook` once, on the next polygon union.
    pub fn before_union(&self, hook: impl FnOnce() + Send + 'static) {
        *self.before_union.lock().unwrap() = Some(Box::new(hook));
    }

    fn far_away(&self, parts: &[&[u8]]) -> SpatialResult<bool> {
        for part in parts {
            if self.inner.bounds(part)?.is_some_and(|bounds| bounds.west >= 400.0) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl GeometryBackend for FailingBackend {
    fn parse_wkt(&self, wkt: &str) -> SpatialResult<Vec<u8>> {
        self.inner.parse_wkt(wkt)
    }

    fn to_wkt(&self, wkb: &[u8]) -> SpatialResult<String> {
        self.inner.to_wkt(wkb)
    }

    fn force_2d(&self, wkb: &[u8]) -> SpatialResult<Vec<u8>> {
        self.inner.force_2d(wkb)
    }

    fn geometry_type(&self, wkb: &[u8]) -> SpatialResult<GeometryTypeId> {
        self.inner.geometry_type(wkb)
    }

    fn is_empty(&self, wkb: &[u8]) -> SpatialResult<bool> {
        self.inner.is_empty(wkb)
    }

    fn validity_reason(&self, wkb: &[u8]) -> SpatialResult<Option<String>> {
        self.inner.validity_reason(wkb)
    }

    fn make_valid(&self, wkb: &[u8]) -> SpatialResult<Vec<u8>> {
        self.inner.make_valid(wkb)
    }

    fn transform(&self, wkb: &[u8], projection: &Projection) -> SpatialResult<Vec<u8>> {
        self.inner.transform(wkb, projection)
    }

    fn simplify(&self, wkb: &[u8], tolerance: f64) -> SpatialResult<Vec<u8>> {
        self.inner.simplify(wkb, tolerance)
    }

    fn round(&self, wkb: &[u8], decimals: u32) -> SpatialResult<Vec<u8>> {
        self.inner.round(wkb, decimals)
    }

    fn buffer(&self, wkb: &[u8], distance: f64) -> SpatialResult<Vec<u8>> {
        self.inner.buffer(wkb, distance)
    }

    fn union_by_dimension(&self, parts: &[&[u8]]) -> SpatialResult<Vec<u8>> {
        self.inner.union_by_dimension(parts)
    }

    fn polygon_union(&self, parts: &[&[u8]]) -> SpatialResult<Vec<u8>> {
        let hook = self.before_union.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }
        if self.armed.load(Ordering::SeqCst) && self.far_away(parts)? {
            return Err(SpatialError::backend("polygon union failed"));
        }
        self.inner.polygon_union(parts)
    }

    fn area(&self, wkb: &[u8]) -> SpatialResult<f64> {
        self.inner.area(wkb)
    }

    fn bounds(&self, wkb: &[u8]) -> SpatialResult<Option<Bounds>> {
        self.inner.bounds(wkb)
    }

    fn point_on_surface(&self, wkb: &[u8]) -> SpatialResult<Vec<u8>> {
        self.inner.point_on_surface(wkb)
    }

    fn distance(&self, a: &[u8], b: &[u8]) -> SpatialResult<Option<f64>> {
        self.inner.distance(a, b)
    }

    fn intersects(&self, a: &[u8], b: &[u8]) -> SpatialResult<bool> {
        self.inner.intersects(a, b)
    }

    fn intersection_area(&self, a: &[u8], b: &[u8]) -> SpatialResult<f64> {
        self.inner.intersection_area(a, b)
    }
}
