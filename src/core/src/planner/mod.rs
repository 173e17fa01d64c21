//! Buffered proximity queries, answered from the proximity cache when it
//! covers the query and from live geometry otherwise.

mod live;

use common_exception::{SpatialError, SpatialResult};
use serde::Serialize;
use tracing::debug;

use crate::engine::SpatialContext;
use crate::model::{ModelRef, Record, Scope, Target};

/// How a [`QueryResult`] was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryPath {
    CacheHit,
    /// The cache does not cover the query. The rows are empty, and that says
    /// nothing about what is within the buffer.
    CacheMiss,
    Live,
    /// The other record has no geometry yet.
    Unpersisted,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProximityRow {
    pub model: ModelRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_in_meters: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intersection_area_in_square_meters: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub path: QueryPath,
    pub rows: Vec<ProximityRow>,
}

impl QueryResult {
    fn empty(path: QueryPath) -> Self {
        Self {
            path,
            rows: Vec::new(),
        }
    }

    pub fn is_cache_miss(&self) -> bool {
        self.path == QueryPath::CacheMiss
    }

    pub fn exists(&self) -> bool {
        !self.rows.is_empty()
    }

    pub fn models(&self) -> Vec<ModelRef> {
        self.rows.iter().map(|row| row.model.clone()).collect()
    }

    pub fn row(&self, model: &ModelRef) -> Option<&ProximityRow> {
        self.rows.iter().find(|row| &row.model == model)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferOptions {
    /// Answer from the proximity cache. Only applies when the other side is
    /// a single record.
    pub cache: bool,
    pub distance: bool,
    pub intersection_area: bool,
}

impl Default for BufferOptions {
    fn default() -> Self {
        Self {
            cache: true,
            distance: false,
            intersection_area: false,
        }
    }
}

impl BufferOptions {
    pub fn live() -> Self {
        Self {
            cache: false,
            ..Default::default()
        }
    }

    pub fn with_distance(mut self) -> Self {
        self.distance = true;
        self
    }

    pub fn with_intersection_area(mut self) -> Self {
        self.intersection_area = true;
        self
    }
}

pub struct BufferedQueryPlanner<'a> {
    ctx: &'a SpatialContext,
}

impl<'a> BufferedQueryPlanner<'a> {
    pub(crate) fn new(ctx: &'a SpatialContext) -> Self {
        Self { ctx }
    }

    /// Records of `subject` within `buffer` meters of `other`. A `None`
    /// buffer matches every record of `subject`.
    pub async fn within_buffer(
        &self, subject: &Scope, other: &Target, buffer: Option<f64>, options: BufferOptions,
    ) -> SpatialResult<QueryResult> {
        if let Some(buffer) = buffer
            && (buffer.is_nan() || buffer < 0.0)
        {
            return Err(SpatialError::invalid_input(format!(
                "buffer must be a non-negative distance, got {buffer}"
            )));
        }
        self.ctx.registry().get(subject.class_name())?;

        match other {
            Target::Record(record) if record.id.is_none() => {
                Ok(QueryResult::empty(QueryPath::Unpersisted))
            }
            Target::Record(record) if options.cache => {
                self.cached_within_buffer(subject, record, buffer, options)
            }
            _ => {
                let rows = live::within_buffer(self.ctx, subject, other, buffer, &options).await?;
                Ok(QueryResult {
                    path: QueryPath::Live,
                    rows,
                })
            }
        }
    }

    fn cached_within_buffer(
        &self, subject: &Scope, other: &Record, buffer: Option<f64>, options: BufferOptions,
    ) -> SpatialResult<QueryResult> {
        let proximity = self.ctx.proximity();
        if !proximity.is_cache_valid_for(other, subject.class_name(), buffer)? {
            debug!("no proximity cache of {other} for {}", subject.class_name());
            return Ok(QueryResult::empty(QueryPath::CacheMiss));
        }

        let mut rows: Vec<ProximityRow> = proximity
            .neighbours(other, subject)?
            .into_iter()
            .filter(|neighbour| match buffer {
                None => true,
                Some(buffer) => neighbour
                    .distance_in_meters
                    .is_some_and(|distance| distance <= buffer),
            })
            .map(|neighbour| ProximityRow {
                model: neighbour.model,
                distance_in_meters: neighbour.distance_in_meters.filter(|_| options.distance),
                intersection_area_in_square_meters: neighbour
                    .intersection_area_in_square_meters
                    .filter(|_| options.intersection_area),
            })
            .collect();
        rows.sort_by(|a, b| a.model.cmp(&b.model));
        rows.dedup_by(|a, b| a.model == b.model);

        Ok(QueryResult {
            path: QueryPath::CacheHit,
            rows,
        })
    }

    /// Records of `subject` touching `other`.
    pub async fn intersecting(
        &self, subject: &Scope, other: &Target,
    ) -> SpatialResult<QueryResult> {
        self.within_buffer(subject, other, Some(0.0), BufferOptions::default())
            .await
    }

    /// Whether any record of `subject` touches `other`. When `other` is a
    /// record this reads the proximity cache, so a cache miss answers false.
    pub async fn intersects(&self, subject: &Scope, other: &Target) -> SpatialResult<bool> {
        Ok(self.intersecting(subject, other).await?.exists())
    }

    /// Area of `record` covered by `other`. When a cached proximity row shows
    /// `other` covering all of `record`, the record's own area is returned
    /// without touching geometry.
    pub fn total_intersection_area_in_square_meters(
        &self, record: &Record, other: &Target,
    ) -> SpatialResult<f64> {
        let features = self.ctx.features();
        let own_scope = Scope::record(record)?;
        let own_area = features.area_in_square_meters(&own_scope)?;

        let other_scope = match other {
            Target::Record(other_record) if other_record.id.is_none() => return Ok(0.0),
            Target::Record(other_record) => Scope::record(other_record)?,
            Target::Scope(scope) => scope.clone(),
        };

        if let Target::Record(_) = other
            && self
                .ctx
                .proximity()
                .is_cache_valid_for(record, other.class_name(), Some(0.0))?
        {
            let covered = self
                .ctx
                .proximity()
                .neighbours(record, &other_scope)?
                .iter()
                .any(|neighbour| {
                    neighbour
                        .intersection_area_in_square_meters
                        .is_some_and(|area| area >= own_area)
                });
            if covered {
                return Ok(own_area);
            }
        }

        let lowres = |scope: &Scope| -> Vec<Vec<u8>> {
            features
                .polygons(scope)
                .into_iter()
                .filter_map(|row| row.derived.geom_lowres)
                .collect()
        };
        let own_parts = lowres(&own_scope);
        let other_parts = lowres(&other_scope);
        if own_parts.is_empty() || other_parts.is_empty() {
            return Ok(0.0);
        }

        let backend = self.ctx.backend();
        fn as_slices(parts: &[Vec<u8>]) -> Vec<&[u8]> {
            parts.iter().map(Vec::as_slice).collect()
        }
        let own_union = backend.polygon_union(&as_slices(&own_parts))?;
        let other_union = backend.polygon_union(&as_slices(&other_parts))?;
        backend.intersection_area(&own_union, &other_union)
    }

    /// Percentage of `record` covered by `other`, to one decimal place.
    pub fn total_intersection_area_percentage(
        &self, record: &Record, other: &Target,
    ) -> SpatialResult<f64> {
        let own_area = self.ctx.features().features_area_in_square_meters(record)?;
        if own_area <= 0.0 {
            return Ok(0.0);
        }
        let covered = self.total_intersection_area_in_square_meters(record, other)?;
        Ok((covered / own_area * 1000.0).round() / 10.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_miss_is_not_an_empty_hit() {
        let miss = QueryResult::empty(QueryPath::CacheMiss);
        let hit = QueryResult::empty(QueryPath::CacheHit);
        assert!(!miss.exists() && !hit.exists());
        assert!(miss.is_cache_miss());
        assert!(!hit.is_cache_miss());
        assert_ne!(miss, hit);
    }

    #[test]
    fn test_result_serializes_path() {
        let result = QueryResult {
            path: QueryPath::CacheHit,
            rows: vec![ProximityRow {
                model: ModelRef::new("Parcel", 4),
                distance_in_meters: Some(1.5),
                intersection_area_in_square_meters: None,
            }],
        };
        assert_eq!(
            serde_json::to_string(&result).unwrap(),
            concat!(
                r#"{"path":"cache_hit","rows":[{"model":{"model_type":"Parcel","model_id":4},"#,
                r#""distance_in_meters":1.5}]}"#,
            )
        );
    }
}
