use std::sync::Arc;

use common_exception::{SpatialError, SpatialResult};
use datafusion::arrow::array::{Array, BinaryArray, Float64Array, Int64Array, RecordBatch};
use datafusion::arrow::datatypes::{DataType, Field, Schema};
use datafusion::common::cast::{as_float64_array, as_int64_array};
use tracing::debug;

use super::{BufferOptions, ProximityRow};
use crate::context::QueryContext;
use crate::engine::SpatialContext;
use crate::model::{ModelRef, Scope, Target};

const FEATURES_TABLE: &str = "features";
const OTHER_TABLE: &str = "other_features";

const SELECT_DISTINCT: &str = "SELECT DISTINCT f.spatial_model_id";
const SELECT_GROUPED: &str = "SELECT f.spatial_model_id";
const DISTANCE_COLUMN: &str = ", MIN(ST_Distance(f.geom, o.geom)) AS distance_in_meters";
// Polygon parts are unioned per record before they are intersected, so
// overlapping features of one record are counted once.
const AREA_COLUMN: &str = ", ST_Area(ST_Intersection(ST_Union(ST_CollectionExtract(f.geom, 3)), \
                           o.polygons)) AS intersection_area_in_square_meters";
const FROM: &str = " FROM features f CROSS JOIN other_features o";
const WHERE_INTERSECTS: &str = " WHERE ST_Intersects(f.geom, o.geom)";
const WHERE_WITHIN: &str = " WHERE ST_DWithin(f.geom, o.geom, o.buffer_in_meters)";
const GROUP_BY: &str = " GROUP BY f.spatial_model_id";
const GROUP_BY_POLYGONS: &str = ", o.polygons";
const ORDER_BY: &str = " ORDER BY f.spatial_model_id";

/// Statement for the requested columns and buffer. The buffer itself is read
/// from `other_features`.
pub(crate) fn statement(buffer: Option<f64>, options: &BufferOptions) -> String {
    let grouped = options.distance || options.intersection_area;
    let mut sql = String::from(if grouped { SELECT_GROUPED } else { SELECT_DISTINCT });
    if options.distance {
        sql.push_str(DISTANCE_COLUMN);
    }
    if options.intersection_area {
        sql.push_str(AREA_COLUMN);
    }
    sql.push_str(FROM);
    match buffer {
        None => {}
        Some(buffer) if buffer == 0.0 => sql.push_str(WHERE_INTERSECTS),
        Some(_) => sql.push_str(WHERE_WITHIN),
    }
    if grouped {
        sql.push_str(GROUP_BY);
        if options.intersection_area {
            sql.push_str(GROUP_BY_POLYGONS);
        }
    }
    sql.push_str(ORDER_BY);
    sql
}

/// Joins the low resolution features of `subject` against the union of the
/// low resolution features of `other`. Both sides are read from `features`,
/// so a pair gets the same answer whichever side it is queried from.
pub(crate) async fn within_buffer(
    ctx: &SpatialContext, subject: &Scope, other: &Target, buffer: Option<f64>,
    options: &BufferOptions,
) -> SpatialResult<Vec<ProximityRow>> {
    let registry = ctx.registry();
    let subject_base = registry.base_class_of(subject.class_name())?.to_owned();
    let other_scope = match other {
        Target::Record(record) => Scope::record(record)?,
        Target::Scope(scope) => scope.clone(),
    };
    registry.get(other_scope.class_name())?;

    let (features, other_parts) = ctx.store().read(|tables| {
        let features: Vec<(i64, Vec<u8>)> = tables
            .features_in(registry, subject)
            .filter_map(|row| {
                let lowres = row.derived.geom_lowres.clone()?;
                Some((row.spatial_model_id, lowres))
            })
            .collect();
        let other_parts: Vec<Vec<u8>> = tables
            .features_in(registry, &other_scope)
            .filter_map(|row| row.derived.geom_lowres.clone())
            .collect();
        (features, other_parts)
    });

    let backend = ctx.backend();
    let parts: Vec<&[u8]> = other_parts.iter().map(Vec::as_slice).collect();
    let other_geom = backend.union_by_dimension(&parts)?;
    let other_polygons = backend.polygon_union(&parts)?;

    let query = QueryContext::new();
    query.register_batch(FEATURES_TABLE, features_batch(&features)?)?;
    query.register_batch(
        OTHER_TABLE,
        other_batch(&other_geom, &other_polygons, buffer)?,
    )?;

    let sql = statement(buffer, options);
    debug!("live proximity query: {sql}");
    let batches = query.collect(&sql).await?;

    let mut rows = Vec::new();
    for batch in &batches {
        rows.extend(proximity_rows(
            batch,
            &subject_base,
            options,
            other_parts.is_empty(),
        )?);
    }
    Ok(rows)
}

/// Reads the rows of one result batch. A requested column that came back
/// null means the geometry operation failed, unless `other` has no geometry
/// to measure against.
fn proximity_rows(
    batch: &RecordBatch, subject_base: &str, options: &BufferOptions, other_is_empty: bool,
) -> SpatialResult<Vec<ProximityRow>> {
    let ids = as_int64_array(column(batch, "spatial_model_id")?).map_err(SpatialError::query)?;
    let distances = optional_f64(batch, "distance_in_meters", options.distance)?;
    let areas = optional_f64(
        batch,
        "intersection_area_in_square_meters",
        options.intersection_area,
    )?;

    let mut rows = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        let model = ModelRef::new(subject_base.to_owned(), ids.value(i));
        let value = |array: Option<&Float64Array>, name: &str| -> SpatialResult<Option<f64>> {
            match array {
                None => Ok(None),
                Some(array) if !array.is_null(i) => Ok(Some(array.value(i))),
                Some(_) if other_is_empty => Ok(None),
                Some(_) => Err(SpatialError::backend(format!("no {name} for {model}"))),
            }
        };
        rows.push(ProximityRow {
            distance_in_meters: value(distances, "distance")?,
            intersection_area_in_square_meters: value(areas, "intersection area")?,
            model: model.clone(),
        });
    }
    Ok(rows)
}

fn features_batch(features: &[(i64, Vec<u8>)]) -> SpatialResult<RecordBatch> {
    let schema = Schema::new(vec![
        Field::new("spatial_model_id", DataType::Int64, false),
        Field::new("geom", DataType::Binary, false),
    ]);
    RecordBatch::try_new(Arc::new(schema), vec![
        Arc::new(Int64Array::from_iter_values(
            features.iter().map(|(id, _)| *id),
        )),
        Arc::new(BinaryArray::from_iter_values(
            features.iter().map(|(_, geom)| geom.as_slice()),
        )),
    ])
    .map_err(SpatialError::query)
}

fn other_batch(geom: &[u8], polygons: &[u8], buffer: Option<f64>) -> SpatialResult<RecordBatch> {
    let schema = Schema::new(vec![
        Field::new("geom", DataType::Binary, false),
        Field::new("polygons", DataType::Binary, false),
        Field::new("buffer_in_meters", DataType::Float64, true),
    ]);
    RecordBatch::try_new(Arc::new(schema), vec![
        Arc::new(BinaryArray::from_iter_values([geom])),
        Arc::new(BinaryArray::from_iter_values([polygons])),
        Arc::new(Float64Array::from(vec![buffer])),
    ])
    .map_err(SpatialError::query)
}

fn column<'b>(batch: &'b RecordBatch, name: &str) -> SpatialResult<&'b dyn Array> {
    batch
        .column_by_name(name)
        .map(|array| array.as_ref())
        .ok_or_else(|| SpatialError::query(format!("missing column {name}")))
}

fn optional_f64<'b>(
    batch: &'b RecordBatch, name: &str, requested: bool,
) -> SpatialResult<Option<&'b Float64Array>> {
    if !requested {
        return Ok(None);
    }
    as_float64_array(column(batch, name)?)
        .map(Some)
        .map_err(SpatialError::query)
}
