use std::collections::BTreeMap;

use common_exception::SpatialResult;
use parking_lot::RwLock;

use crate::model::{ModelRef, ModelRegistry, Scope};
use crate::schema::{
    AggregateFeatureRow, FeatureRow, ModelRow, SpatialCacheRow, SpatialProximityRow,
};

#[derive(Debug, Clone, Default)]
struct Sequences {
    features: i64,
    aggregate_features: i64,
    spatial_caches: i64,
    spatial_proximities: i64,
    spatial_models: BTreeMap<String, i64>,
}

fn next(seq: &mut i64) -> i64 {
    *seq += 1;
    *seq
}

/// The spatial tables. Ids are assigned from per-table sequences and are
/// never reused.
#[derive(Debug, Clone, Default)]
pub struct Tables {
    pub features: BTreeMap<i64, FeatureRow>,
    pub aggregate_features: BTreeMap<i64, AggregateFeatureRow>,
    pub spatial_caches: BTreeMap<i64, SpatialCacheRow>,
    pub spatial_proximities: BTreeMap<i64, SpatialProximityRow>,
    pub spatial_models: BTreeMap<ModelRef, ModelRow>,
    sequences: Sequences,
}

impl Tables {
    pub fn insert_model(&mut self, base_class: &str, class_name: &str) -> ModelRef {
        let id = next(
            self.sequences
                .spatial_models
                .entry(base_class.to_owned())
                .or_default(),
        );
        let model = ModelRef::new(base_class, id);
        self.spatial_models.insert(model.clone(), ModelRow {
            spatial_model_type: base_class.to_owned(),
            spatial_model_id: id,
            class_name: class_name.to_owned(),
            features_hash: None,
            features_area: None,
            spatial_processing_status_cache: BTreeMap::new(),
        });
        model
    }

    pub fn insert_feature(&mut self, mut row: FeatureRow) -> i64 {
        row.id = next(&mut self.sequences.features);
        self.features.insert(row.id, row);
        self.sequences.features
    }

    pub fn insert_aggregate(&mut self, mut row: AggregateFeatureRow) -> i64 {
        row.id = next(&mut self.sequences.aggregate_features);
        self.aggregate_features.insert(row.id, row);
        self.sequences.aggregate_features
    }

    pub fn insert_cache(&mut self, mut row: SpatialCacheRow) -> i64 {
        row.id = next(&mut self.sequences.spatial_caches);
        self.spatial_caches.insert(row.id, row);
        self.sequences.spatial_caches
    }

    pub fn insert_proximity(&mut self, mut row: SpatialProximityRow) -> i64 {
        row.id = next(&mut self.sequences.spatial_proximities);
        self.spatial_proximities.insert(row.id, row);
        self.sequences.spatial_proximities
    }

    pub fn model(&self, model: &ModelRef) -> Option<&ModelRow> {
        self.spatial_models.get(model)
    }

    pub fn model_mut(&mut self, model: &ModelRef) -> Option<&mut ModelRow> {
        self.spatial_models.get_mut(model)
    }

    /// Records of the scope's class or one of its subclasses.
    pub fn members<'a>(
        &'a self, registry: &'a ModelRegistry, scope: &'a Scope,
    ) -> impl Iterator<Item = &'a ModelRow> + 'a {
        self.spatial_models
            .values()
            .filter(move |row| self.row_in_scope(registry, scope, row))
    }

    pub fn contains(&self, registry: &ModelRegistry, scope: &Scope, model: &ModelRef) -> bool {
        self.model(model)
            .is_some_and(|row| self.row_in_scope(registry, scope, row))
    }

    fn row_in_scope(&self, registry: &ModelRegistry, scope: &Scope, row: &ModelRow) -> bool {
        scope.includes_id(row.spatial_model_id)
            && registry.is_kind_of(&row.class_name, scope.class_name())
    }

    pub fn features_of<'a>(
        &'a self, owner: &'a ModelRef,
    ) -> impl Iterator<Item = &'a FeatureRow> + 'a {
        self.features.values().filter(move |row| row.is_owned_by(owner))
    }

    pub fn features_in<'a>(
        &'a self, registry: &'a ModelRegistry, scope: &'a Scope,
    ) -> impl Iterator<Item = &'a FeatureRow> + 'a {
        self.features
            .values()
            .filter(move |row| self.contains(registry, scope, &row.owner()))
    }

    /// Removes every feature of `owner`, returning how many were removed.
    pub fn delete_features_of(&mut self, owner: &ModelRef) -> usize {
        let before = self.features.len();
        self.features.retain(|_, row| !row.is_owned_by(owner));
        before - self.features.len()
    }

    pub fn aggregate_of(&self, owner: &ModelRef) -> Option<&AggregateFeatureRow> {
        self.aggregate_features
            .values()
            .find(|row| row.is_owned_by(owner))
    }

    pub fn delete_aggregate_of(&mut self, owner: &ModelRef) {
        self.aggregate_features
            .retain(|_, row| !row.is_owned_by(owner));
    }

    pub fn caches_of<'a>(
        &'a self, owner: &'a ModelRef,
    ) -> impl Iterator<Item = &'a SpatialCacheRow> + 'a {
        self.spatial_caches.values().filter(move |row| {
            row.spatial_model_type == owner.model_type && row.spatial_model_id == owner.model_id
        })
    }

    /// Removes the model row and everything that references it.
    pub fn delete_model(&mut self, model: &ModelRef) -> bool {
        self.delete_features_of(model);
        self.delete_aggregate_of(model);
        self.spatial_caches.retain(|_, row| {
            row.spatial_model_type != model.model_type || row.spatial_model_id != model.model_id
        });
        self.spatial_proximities
            .retain(|_, row| !row.involves(model));
        self.spatial_models.remove(model).is_some()
    }
}

/// In-process relational store. Readers see the last committed state, and
/// writers go through [`SpatialStore::transaction`].
#[derive(Debug, Default)]
pub struct SpatialStore {
    tables: RwLock<Tables>,
}

impl SpatialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read<R>(&self, f: impl FnOnce(&Tables) -> R) -> R {
        f(&self.tables.read())
    }

    pub fn snapshot(&self) -> Tables {
        self.tables.read().clone()
    }

    /// Runs `f` against a staged copy of the tables. The copy replaces the
    /// committed tables only when `f` returns `Ok`. Writers are serialized.
    pub fn transaction<R>(
        &self, f: impl FnOnce(&mut Tables) -> SpatialResult<R>,
    ) -> SpatialResult<R> {
        let mut tables = self.tables.write();
        let mut staged = tables.clone();
        let result = f(&mut staged)?;
        *tables = staged;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use common_exception::SpatialError;

    use super::*;
    use crate::model::ModelClass;

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let store = SpatialStore::new();
        let house = store
            .transaction(|tables| Ok(tables.insert_model("House", "House")))
            .unwrap();

        let result: SpatialResult<()> = store.transaction(|tables| {
            tables.delete_model(&house);
            Err(SpatialError::invalid_input("abort"))
        });
        assert!(result.is_err());
        assert!(store.read(|tables| tables.model(&house).is_some()));
    }

    #[test]
    fn test_sequences_are_per_base_class() {
        let store = SpatialStore::new();
        let (a, b, c) = store
            .transaction(|tables| {
                Ok((
                    tables.insert_model("House", "House"),
                    tables.insert_model("Parcel", "Parcel"),
                    tables.insert_model("House", "Cabin"),
                ))
            })
            .unwrap();

        assert_eq!(a, ModelRef::new("House", 1));
        assert_eq!(b, ModelRef::new("Parcel", 1));
        assert_eq!(c, ModelRef::new("House", 2));
    }

    #[test]
    fn test_members_include_subclasses() {
        let house = ModelClass::new("House");
        let cabin = ModelClass::new("Cabin").subclass_of(&house);
        let mut registry = ModelRegistry::new();
        registry.register(house);
        registry.register(cabin);

        let mut tables = Tables::default();
        tables.insert_model("House", "House");
        tables.insert_model("House", "Cabin");

        let all_houses = Scope::class("House");
        let cabins = Scope::class("Cabin");
        assert_eq!(tables.members(&registry, &all_houses).count(), 2);
        let cabin_ids: Vec<_> = tables
            .members(&registry, &cabins)
            .map(|row| row.spatial_model_id)
            .collect();
        assert_eq!(cabin_ids, vec![2]);
        assert!(!tables.contains(&registry, &cabins, &ModelRef::new("House", 1)));
    }
}
