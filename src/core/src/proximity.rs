use common_exception::SpatialResult;

use crate::engine::SpatialContext;
use crate::model::{ModelRef, ModelRegistry, Record, Scope};
use crate::schema::{SpatialCacheRow, SpatialProximityRow};
use crate::store::Tables;

/// Orders a pair of records the way proximity rows store them: by base class
/// name, then by id.
pub fn canonical_pair(a: ModelRef, b: ModelRef) -> (ModelRef, ModelRef) {
    if b < a { (b, a) } else { (a, b) }
}

/// A record that a proximity row pairs with the queried record.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbour {
    pub model: ModelRef,
    pub distance_in_meters: Option<f64>,
    pub intersection_area_in_square_meters: Option<f64>,
}

/// Reads the `spatial_caches` and `spatial_proximities` tables.
pub struct ProximityCache<'a> {
    ctx: &'a SpatialContext,
}

impl<'a> ProximityCache<'a> {
    pub(crate) fn new(ctx: &'a SpatialContext) -> Self {
        Self { ctx }
    }

    /// A cache is stale when its owner's class keeps a features hash and the
    /// hash has changed since the cache was written.
    pub fn is_stale(&self, cache: &SpatialCacheRow) -> bool {
        self.ctx
            .store()
            .read(|tables| is_stale(self.ctx.registry(), tables, cache))
    }

    /// True when proximity between `record` and `other_class` is cached, up
    /// to date, and covers `buffer`. Only a cache computed without a distance
    /// limit covers a `None` buffer.
    pub fn is_cache_valid_for(
        &self, record: &Record, other_class: &str, buffer: Option<f64>,
    ) -> SpatialResult<bool> {
        let owner = self.ctx.registry().model_ref(record)?;
        let lineage = self.ctx.registry().get(other_class)?.lineage();
        let registry = self.ctx.registry();

        Ok(self.ctx.store().read(|tables| {
            tables
                .caches_of(&owner)
                .filter(|cache| matches_class(cache, &lineage))
                .any(|cache| {
                    !is_stale(registry, tables, cache)
                        && match (buffer, cache.intersection_cache_distance) {
                            (_, None) => true,
                            (Some(buffer), Some(distance)) => buffer <= distance,
                            (None, Some(_)) => false,
                        }
                })
        }))
    }

    pub fn caches_for(&self, record: &Record) -> SpatialResult<Vec<SpatialCacheRow>> {
        let owner = self.ctx.registry().model_ref(record)?;
        Ok(self
            .ctx
            .store()
            .read(|tables| tables.caches_of(&owner).cloned().collect()))
    }

    /// Proximity rows pairing a record of `a` with a record of `b`, in
    /// whichever arrangement canonical ordering stores them.
    pub fn between(&self, a: &Scope, b: &Scope) -> SpatialResult<Vec<SpatialProximityRow>> {
        let registry = self.ctx.registry();
        let base_a = registry.base_class_of(a.class_name())?;
        let base_b = registry.base_class_of(b.class_name())?;

        Ok(self.ctx.store().read(|tables| {
            let pairs = |first: &Scope, second: &Scope, row: &SpatialProximityRow| {
                tables.contains(registry, first, &row.model_a())
                    && tables.contains(registry, second, &row.model_b())
            };
            tables
                .spatial_proximities
                .values()
                .filter(|row| {
                    if base_a == base_b {
                        pairs(a, b, row) || pairs(b, a, row)
                    } else if base_a < base_b {
                        pairs(a, b, row)
                    } else {
                        pairs(b, a, row)
                    }
                })
                .cloned()
                .collect()
        }))
    }

    /// Records of `scope` that a proximity row pairs with `record`. A row
    /// pairing the record with itself yields the record.
    pub fn neighbours(&self, record: &Record, scope: &Scope) -> SpatialResult<Vec<Neighbour>> {
        let owner = self.ctx.registry().model_ref(record)?;
        let registry = self.ctx.registry();
        Ok(self.ctx.store().read(|tables| {
            tables
                .spatial_proximities
                .values()
                .filter_map(|row| {
                    let model = row.counterpart(&owner)?;
                    tables
                        .contains(registry, scope, &model)
                        .then(|| Neighbour {
                            model,
                            distance_in_meters: row.distance_in_meters,
                            intersection_area_in_square_meters: row
                                .intersection_area_in_square_meters,
                        })
                })
                .collect()
        }))
    }

    pub fn unnormalized(&self) -> Vec<SpatialProximityRow> {
        self.ctx.store().read(|tables| {
            tables
                .spatial_proximities
                .values()
                .filter(|row| !row.is_normalized())
                .cloned()
                .collect()
        })
    }

    /// Swaps the sides of every row not in canonical order. Returns how many
    /// rows were swapped.
    pub fn normalize(&self) -> SpatialResult<usize> {
        self.ctx.store().transaction(|tables| {
            let mut swapped = 0;
            for row in tables.spatial_proximities.values_mut() {
                if !row.is_normalized() {
                    std::mem::swap(&mut row.model_a_type, &mut row.model_b_type);
                    std::mem::swap(&mut row.model_a_id, &mut row.model_b_id);
                    swapped += 1;
                }
            }
            Ok(swapped)
        })
    }

    /// Records of `class_name` with a cache against `other_class`, stale or
    /// not.
    pub fn with_spatial_cache(
        &self, class_name: &str, other_class: &str,
    ) -> SpatialResult<Vec<ModelRef>> {
        let (with, _) = self.partition_by_cache(class_name, other_class)?;
        Ok(with)
    }

    pub fn without_spatial_cache(
        &self, class_name: &str, other_class: &str,
    ) -> SpatialResult<Vec<ModelRef>> {
        let (_, without) = self.partition_by_cache(class_name, other_class)?;
        Ok(without)
    }

    fn partition_by_cache(
        &self, class_name: &str, other_class: &str,
    ) -> SpatialResult<(Vec<ModelRef>, Vec<ModelRef>)> {
        let registry = self.ctx.registry();
        let lineage = registry.get(other_class)?.lineage();
        let scope = Scope::class(class_name);
        Ok(self.ctx.store().read(|tables| {
            tables
                .members(registry, &scope)
                .map(|model| model.model_ref())
                .partition(|model| {
                    tables
                        .caches_of(model)
                        .any(|cache| matches_class(cache, &lineage))
                })
        }))
    }

    /// Records of `class_name` with at least one stale cache.
    pub fn with_stale_spatial_cache(&self, class_name: &str) -> SpatialResult<Vec<ModelRef>> {
        let registry = self.ctx.registry();
        registry.get(class_name)?;
        let scope = Scope::class(class_name);
        Ok(self.ctx.store().read(|tables| {
            tables
                .members(registry, &scope)
                .map(|model| model.model_ref())
                .filter(|model| {
                    tables
                        .caches_of(model)
                        .any(|cache| is_stale(registry, tables, cache))
                })
                .collect()
        }))
    }
}

/// A cache built against a class answers queries about that class and its
/// subclasses.
pub(crate) fn matches_class(cache: &SpatialCacheRow, lineage: &[String]) -> bool {
    cache
        .cached_class()
        .is_some_and(|cached| lineage.iter().any(|class| class == cached))
}

pub(crate) fn is_stale(registry: &ModelRegistry, tables: &Tables, cache: &SpatialCacheRow) -> bool {
    let Some(model) = tables.model(&cache.spatial_model()) else {
        return true;
    };
    let has_features_hash = registry
        .get(&model.class_name)
        .is_ok_and(|class| class.has_features_hash);
    has_features_hash && cache.features_hash != model.features_hash
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::model::ModelClass;

    fn context() -> SpatialContext {
        SpatialContext::builder()
            .register(ModelClass::new("House").with_features_hash())
            .register(ModelClass::new("Parcel"))
            .build()
            .unwrap()
    }

    fn proximity(a: &ModelRef, b: &ModelRef, distance: f64) -> SpatialProximityRow {
        SpatialProximityRow {
            id: 0,
            model_a_type: a.model_type.clone(),
            model_a_id: a.model_id,
            model_b_type: b.model_type.clone(),
            model_b_id: b.model_id,
            distance_in_meters: Some(distance),
            intersection_area_in_square_meters: Some(0.0),
        }
    }

    fn cache(owner: &ModelRef, class: &str, distance: Option<f64>) -> SpatialCacheRow {
        SpatialCacheRow {
            id: 0,
            spatial_model_type: owner.model_type.clone(),
            spatial_model_id: owner.model_id,
            intersection_model_type: vec![class.to_owned()],
            intersection_cache_distance: distance,
            features_hash: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_canonical_pair() {
        let house = ModelRef::new("House", 9);
        let parcel = ModelRef::new("Parcel", 1);
        assert_eq!(
            canonical_pair(parcel.clone(), house.clone()),
            (house.clone(), parcel.clone())
        );
        assert_eq!(
            canonical_pair(ModelRef::new("House", 3), ModelRef::new("House", 2)),
            (ModelRef::new("House", 2), ModelRef::new("House", 3))
        );
    }

    #[test]
    fn test_between_is_symmetric() {
        let ctx = context();
        let house = ctx.create_record("House").unwrap();
        let parcel = ctx.create_record("Parcel").unwrap();
        let (a, b) = (
            ctx.registry().model_ref(&house).unwrap(),
            ctx.registry().model_ref(&parcel).unwrap(),
        );
        ctx.store()
            .transaction(|tables| {
                let (a, b) = canonical_pair(b.clone(), a.clone());
                tables.insert_proximity(proximity(&a, &b, 3.0));
                Ok(())
            })
            .unwrap();

        let houses = Scope::class("House");
        let parcels = Scope::class("Parcel");
        let forward = ctx.proximity().between(&houses, &parcels).unwrap();
        let backward = ctx.proximity().between(&parcels, &houses).unwrap();
        assert_eq!(forward.len(), 1);
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_normalize() {
        let ctx = context();
        let house = ctx.create_record("House").unwrap();
        let parcel = ctx.create_record("Parcel").unwrap();
        let a = ctx.registry().model_ref(&house).unwrap();
        let b = ctx.registry().model_ref(&parcel).unwrap();
        ctx.store()
            .transaction(|tables| {
                tables.insert_proximity(proximity(&b, &a, 1.0));
                Ok(())
            })
            .unwrap();

        assert_eq!(ctx.proximity().unnormalized().len(), 1);
        assert_eq!(ctx.proximity().normalize().unwrap(), 1);
        assert!(ctx.proximity().unnormalized().is_empty());
        assert_eq!(
            ctx.proximity()
                .between(&Scope::class("House"), &Scope::class("Parcel"))
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_cache_validity() {
        let ctx = context();
        let house = ctx.create_record("House").unwrap();
        let owner = ctx.registry().model_ref(&house).unwrap();
        let proximity = ctx.proximity();

        assert!(!proximity.is_cache_valid_for(&house, "Parcel", Some(0.0)).unwrap());

        ctx.store()
            .transaction(|tables| {
                tables.insert_cache(cache(&owner, "Parcel", Some(100.0)));
                Ok(())
            })
            .unwrap();
        assert!(proximity.is_cache_valid_for(&house, "Parcel", Some(100.0)).unwrap());
        assert!(!proximity.is_cache_valid_for(&house, "Parcel", Some(100.5)).unwrap());
        assert!(!proximity.is_cache_valid_for(&house, "Parcel", None).unwrap());
        assert_eq!(
            proximity.with_spatial_cache("House", "Parcel").unwrap(),
            vec![owner.clone()]
        );

        ctx.store()
            .transaction(|tables| {
                if let Some(model) = tables.model_mut(&owner) {
                    model.features_hash = Some("changed".to_owned());
                }
                Ok(())
            })
            .unwrap();
        assert!(!proximity.is_cache_valid_for(&house, "Parcel", Some(1.0)).unwrap());
        assert_eq!(proximity.with_stale_spatial_cache("House").unwrap(), vec![owner]);
    }
}
