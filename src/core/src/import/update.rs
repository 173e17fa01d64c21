use common_exception::{SpatialError, SpatialResult};
use common_utils::combined_digest;
use tracing::{info, warn};

use super::Importer;
use crate::builder::clear_record_cache;
use crate::engine::SpatialContext;
use crate::feature_store::ImportOptions;
use crate::model::{ModelClass, ModelRef, Record};

impl SpatialContext {
    /// Re-imports the features of `record` from its class's feature source.
    /// See [`SpatialContext::update_features_with`].
    pub async fn update_features(
        &self, record: &Record, options: ImportOptions,
    ) -> SpatialResult<bool> {
        let class = self.registry().get(&record.class_name)?;
        let source = class.feature_source.as_ref().ok_or_else(|| {
            SpatialError::invalid_input(format!("{} has no feature source", class.name))
        })?;
        let importers = source.importers(record)?;
        self.update_features_with(record, &importers, options).await
    }

    /// Replaces the features of `record` with what `importers` produce, then
    /// refreshes its proximity to the class's proximity classes.
    ///
    /// Returns `false` without writing anything when the class keeps a
    /// features hash and the importers' combined cache key matches it.
    ///
    /// When the proximity refresh fails the new features stay, but the stored
    /// hash and the record's cache markers are dropped, so queries miss the
    /// cache and a retry with the same importers runs again.
    pub async fn update_features_with(
        &self, record: &Record, importers: &[Box<dyn Importer>], options: ImportOptions,
    ) -> SpatialResult<bool> {
        let owner = self.registry().model_ref(record)?;
        let class = self.registry().get(&record.class_name)?;
        let features_hash = combined_digest(importers.iter().map(|importer| importer.cache_key()));

        if class.has_features_hash {
            let unchanged = self.store().read(|tables| {
                tables
                    .model(&owner)
                    .and_then(|model| model.features_hash.as_deref())
                    == Some(features_hash.as_str())
            });
            if unchanged {
                info!(owner = %owner, "features unchanged, skipping import");
                return Ok(false);
            }
        }

        let replacement = self
            .features()
            .prepare_replacement(&owner, class, importers, options)?;
        let stored_hash = class.has_features_hash.then_some(features_hash);
        let inserted = self
            .store()
            .transaction(|tables| replacement.apply(tables, stored_hash))?;
        info!(owner = %owner, "imported {} features", inserted.len());

        if let Err(error) = self.update_spatial_cache(record).await {
            warn!(owner = %owner, "proximity refresh failed after import: {error}");
            self.forget_import(&owner, class)?;
            return Err(error);
        }
        Ok(true)
    }

    fn forget_import(&self, owner: &ModelRef, class: &ModelClass) -> SpatialResult<()> {
        let registry = self.registry();
        let others = class
            .proximity_classes
            .iter()
            .map(|name| registry.get(name))
            .collect::<SpatialResult<Vec<_>>>()?;

        self.store().transaction(|tables| {
            if let Some(model) = tables.model_mut(owner) {
                model.features_hash = None;
            }
            for other in &others {
                clear_record_cache(tables, registry, owner, other);
            }
            Ok(())
        })
    }
}
