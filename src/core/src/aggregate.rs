use common_exception::{SpatialError, SpatialResult};
use tracing::info;

use crate::config::Projection;
use crate::engine::SpatialContext;
use crate::model::{ModelRef, Record};
use crate::schema::{AggregateFeatureRow, Derivatives};

/// Owns the `aggregate_features` table: one union of all features per owner.
pub struct AggregateStore<'a> {
    ctx: &'a SpatialContext,
}

impl<'a> AggregateStore<'a> {
    pub(crate) fn new(ctx: &'a SpatialContext) -> Self {
        Self { ctx }
    }

    /// Builds an unsaved aggregate of `geogs`. Each dimension is unioned on
    /// its own so mixed collections never reach the union operation.
    pub(crate) fn build(
        &self, owner: &ModelRef, geogs: &[&[u8]], projection: &Projection,
    ) -> SpatialResult<AggregateFeatureRow> {
        let geog = self.ctx.backend().union_by_dimension(geogs)?;
        let derived = if self.ctx.config().automatically_cache_derivatives {
            self.ctx.features().derive(&geog, projection)?
        } else {
            Derivatives::default()
        };

        Ok(AggregateFeatureRow {
            id: 0,
            spatial_model_type: owner.model_type.clone(),
            spatial_model_id: owner.model_id,
            geog,
            derived,
        })
    }

    /// Rebuilds the aggregate of `record`. The previous row is destroyed and a
    /// new one inserted, so the returned id is new.
    pub fn refresh(&self, record: &Record) -> SpatialResult<AggregateFeatureRow> {
        let owner = self.ctx.registry().model_ref(record)?;
        self.refresh_owner(&owner)
    }

    pub(crate) fn refresh_owner(&self, owner: &ModelRef) -> SpatialResult<AggregateFeatureRow> {
        let (class_name, features) = self.ctx.store().read(|tables| {
            let class_name = tables.model(owner).map(|model| model.class_name.clone());
            let features: Vec<(i64, Vec<u8>)> = tables
                .features_of(owner)
                .map(|row| (row.id, row.geog.clone()))
                .collect();
            (class_name, features)
        });
        let class_name =
            class_name.ok_or_else(|| SpatialError::UnknownModel(owner.to_string()))?;
        let projection = self
            .ctx
            .projection_for(self.ctx.registry().get(&class_name)?);

        let geogs: Vec<&[u8]> = features.iter().map(|(_, geog)| geog.as_slice()).collect();
        let mut aggregate = self.build(owner, &geogs, &projection)?;
        let version: Vec<i64> = features.iter().map(|(id, _)| *id).collect();

        self.ctx.store().transaction(|tables| {
            let current: Vec<i64> = tables.features_of(owner).map(|row| row.id).collect();
            if current != version {
                return Err(SpatialError::ConcurrencyConflict {
                    key: format!("{}/{}/aggregate", owner.model_type, owner.model_id),
                });
            }
            tables.delete_aggregate_of(owner);
            aggregate.id = tables.insert_aggregate(aggregate.clone());
            Ok(aggregate)
        })
    }

    /// The current aggregate, built on first access.
    pub fn aggregate(&self, record: &Record) -> SpatialResult<AggregateFeatureRow> {
        let owner = self.ctx.registry().model_ref(record)?;
        let existing = self
            .ctx
            .store()
            .read(|tables| tables.aggregate_of(&owner).cloned());
        match existing {
            Some(aggregate) => Ok(aggregate),
            None => self.refresh_owner(&owner),
        }
    }

    /// Refreshes the aggregate of every owner that has features.
    pub fn refresh_all(&self) -> SpatialResult<usize> {
        let owners: Vec<ModelRef> = self.ctx.store().read(|tables| {
            let mut owners: Vec<ModelRef> =
                tables.features.values().map(|row| row.owner()).collect();
            owners.sort();
            owners.dedup();
            owners
        });

        for owner in &owners {
            self.refresh_owner(owner)?;
        }
        info!("refreshed {} aggregate features", owners.len());
        Ok(owners.len())
    }
}
