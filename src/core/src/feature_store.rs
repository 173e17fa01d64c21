use std::collections::BTreeSet;

use common_exception::{SpatialError, SpatialResult};
use tracing::{debug, warn};

use crate::backend::Bounds;
use crate::config::{MAX_REPAIR_ATTEMPTS, Projection};
use crate::engine::SpatialContext;
use crate::import::{Importer, RawFeature};
use crate::model::{FeatureType, ModelClass, ModelRef, Record, Scope};
use crate::schema::{AggregateFeatureRow, Derivatives, FeatureRow};
use crate::store::Tables;

const BLANK_GEOMETRY: &str = "Geog can't be blank";
const UNKNOWN_FEATURE_TYPE: &str = "Feature type is not included in the list";

#[derive(Debug, Clone, Copy, Default)]
pub struct ImportOptions {
    /// Drop invalid features with a warning instead of failing the import.
    pub skip_invalid: bool,
    /// Accept an import that yields no valid features.
    pub allow_blank: bool,
}

/// Outcome of [`FeatureStore::validate_geometry`].
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedGeometry {
    /// The input, or its repaired version.
    pub geog: Vec<u8>,
    /// Why the geometry is still invalid, if it is.
    pub error: Option<String>,
    pub repair_attempts: usize,
}

/// A new feature set for one owner, computed outside of any transaction.
#[derive(Debug)]
pub(crate) struct Replacement {
    pub owner: ModelRef,
    pub features: Vec<FeatureRow>,
    pub aggregate: Option<AggregateFeatureRow>,
    pub features_area: Option<f64>,
}

impl Replacement {
    /// Swaps the owner's features for the new set. Returns the inserted rows.
    pub fn apply(
        self, tables: &mut Tables, features_hash: Option<String>,
    ) -> SpatialResult<Vec<FeatureRow>> {
        if tables.model(&self.owner).is_none() {
            return Err(SpatialError::UnknownModel(self.owner.to_string()));
        }

        tables.delete_features_of(&self.owner);
        let mut inserted = Vec::with_capacity(self.features.len());
        for row in self.features {
            let id = tables.insert_feature(row);
            if let Some(row) = tables.features.get(&id) {
                inserted.push(row.clone());
            }
        }

        // without a fresh aggregate the old one goes too, and is rebuilt
        // lazily from the new features
        tables.delete_aggregate_of(&self.owner);
        if let Some(aggregate) = self.aggregate {
            tables.insert_aggregate(aggregate);
        }

        if let Some(model) = tables.model_mut(&self.owner) {
            if self.features_area.is_some() {
                model.features_area = self.features_area;
            }
            if features_hash.is_some() {
                model.features_hash = features_hash;
            }
        }
        Ok(inserted)
    }
}

/// Owns the `features` table.
pub struct FeatureStore<'a> {
    ctx: &'a SpatialContext,
}

impl<'a> FeatureStore<'a> {
    pub(crate) fn new(ctx: &'a SpatialContext) -> Self {
        Self { ctx }
    }

    /// Checks `geog`, repairing it with `buffer(0)` at most
    /// [`MAX_REPAIR_ATTEMPTS`] times when `make_valid` is set.
    pub fn validate_geometry(
        &self, geog: &[u8], make_valid: bool,
    ) -> SpatialResult<ValidatedGeometry> {
        let backend = self.ctx.backend();
        let mut validated = ValidatedGeometry {
            geog: geog.to_vec(),
            error: None,
            repair_attempts: 0,
        };

        loop {
            match backend.validity_reason(&validated.geog)? {
                None => {
                    validated.error = None;
                    return Ok(validated);
                }
                Some(reason) if make_valid && validated.repair_attempts < MAX_REPAIR_ATTEMPTS => {
                    debug!("repairing invalid geometry: {reason}");
                    validated.geog = backend.make_valid(&validated.geog)?;
                    validated.repair_attempts += 1;
                }
                Some(reason) => {
                    validated.error = Some(reason);
                    return Ok(validated);
                }
            }
        }
    }

    /// Computes every derived column of `geog`. The projected and the
    /// simplified geometries are each repaired with `buffer(0)` when the
    /// step before left them invalid.
    pub fn derive(&self, geog: &[u8], projection: &Projection) -> SpatialResult<Derivatives> {
        let backend = self.ctx.backend();
        let config = self.ctx.config();

        let geom = self.repaired(backend.transform(geog, projection)?)?;
        let lowres = backend.simplify(&geom, config.lowres_simplification)?;
        let lowres = self.repaired(backend.round(&lowres, config.lowres_precision)?)?;
        let tilegeom = match backend.transform(geog, &Projection::web_mercator()) {
            Ok(tilegeom) => Some(tilegeom),
            Err(e) => {
                debug!("no tile geometry: {e}");
                None
            }
        };
        let bounds = backend.bounds(geog)?;
        let centroid = if bounds.is_some() {
            Some(backend.point_on_surface(geog)?)
        } else {
            None
        };

        Ok(Derivatives {
            area: Some(backend.area(&geom)?),
            centroid,
            geom: Some(geom),
            geom_lowres: Some(lowres),
            tilegeom,
            north: bounds.map(|b| b.north),
            east: bounds.map(|b| b.east),
            south: bounds.map(|b| b.south),
            west: bounds.map(|b| b.west),
        })
    }

    fn repaired(&self, wkb: Vec<u8>) -> SpatialResult<Vec<u8>> {
        let backend = self.ctx.backend();
        match backend.validity_reason(&wkb)? {
            Some(_) => backend.make_valid(&wkb),
            None => Ok(wkb),
        }
    }

    /// Recomputes the derived columns of the given features. Returns how many
    /// features were updated; ids that no longer exist are skipped.
    pub fn cache_derivatives(&self, ids: &[i64]) -> SpatialResult<usize> {
        let registry = self.ctx.registry();
        let sources = self.ctx.store().read(|tables| {
            ids.iter()
                .filter_map(|id| tables.features.get(id))
                .map(|row| {
                    let class_name = tables.model(&row.owner()).map_or_else(
                        || row.spatial_model_type.clone(),
                        |model| model.class_name.clone(),
                    );
                    (row.id, class_name, row.geog.clone())
                })
                .collect::<Vec<_>>()
        });

        let mut derived = Vec::with_capacity(sources.len());
        for (id, class_name, geog) in sources {
            let projection = self.ctx.projection_for(registry.get(&class_name)?);
            derived.push((id, self.derive(&geog, &projection)?, geog));
        }

        self.ctx.store().transaction(|tables| {
            let mut updated = 0;
            for (id, derivatives, geog) in derived {
                if let Some(row) = tables.features.get_mut(&id)
                    && row.geog == geog
                {
                    row.derived = derivatives;
                    updated += 1;
                }
            }
            Ok(updated)
        })
    }

    /// Replaces every feature of `record` with what `importers` produce, and
    /// refreshes its aggregate, all in one transaction.
    pub fn replace_features(
        &self, record: &Record, importers: &[Box<dyn Importer>], options: ImportOptions,
    ) -> SpatialResult<Vec<FeatureRow>> {
        let owner = self.ctx.registry().model_ref(record)?;
        let class = self.ctx.registry().get(&record.class_name)?;
        let replacement = self.prepare_replacement(&owner, class, importers, options)?;
        self.ctx
            .store()
            .transaction(|tables| replacement.apply(tables, None))
    }

    pub(crate) fn prepare_replacement(
        &self, owner: &ModelRef, class: &ModelClass, importers: &[Box<dyn Importer>],
        options: ImportOptions,
    ) -> SpatialResult<Replacement> {
        let projection = self.ctx.projection_for(class);
        let mut errors: Vec<String> = importers
            .iter()
            .flat_map(|importer| importer.errors().iter().cloned())
            .collect();
        let mut attempted = errors.len();
        let mut features = Vec::new();

        for (position, raw) in importers
            .iter()
            .flat_map(|importer| importer.features())
            .enumerate()
        {
            attempted += 1;
            match self.prepare_feature(owner, raw, position + 1, class.make_valid, &projection) {
                Ok(row) => features.push(row),
                Err(e @ SpatialError::GeometryValidation { .. }) => errors.push(e.to_string()),
                Err(e) => return Err(e),
            }
        }

        if !errors.is_empty() {
            if !options.skip_invalid {
                return Err(SpatialError::Import {
                    owner: owner.to_string(),
                    errors,
                });
            }
            for error in &errors {
                warn!(owner = %owner, "skipping invalid feature: {error}");
            }
        }

        if attempted > 0 && features.is_empty() && !options.allow_blank {
            return Err(SpatialError::EmptyResult(owner.to_string()));
        }

        let aggregate = if self.ctx.config().automatically_refresh_aggregate {
            let geogs: Vec<&[u8]> = features.iter().map(|row| row.geog.as_slice()).collect();
            Some(
                self.ctx
                    .aggregates()
                    .build(owner, &geogs, &projection)?,
            )
        } else {
            None
        };

        let features_area = if class.has_features_area {
            Some(self.polygon_area(features.iter())?)
        } else {
            None
        };

        Ok(Replacement {
            owner: owner.clone(),
            features,
            aggregate,
            features_area,
        })
    }

    fn prepare_feature(
        &self, owner: &ModelRef, raw: &RawFeature, position: usize, make_valid: bool,
        projection: &Projection,
    ) -> SpatialResult<FeatureRow> {
        let backend = self.ctx.backend();
        let label = raw.name.clone().unwrap_or_else(|| format!("#{position}"));
        let invalid = |reason: String| {
            SpatialError::GeometryValidation {
                feature: label.clone(),
                reason,
            }
        };

        if raw.geog.is_empty() {
            return Err(invalid(BLANK_GEOMETRY.to_owned()));
        }
        let geog = backend
            .force_2d(&raw.geog)
            .map_err(|e| invalid(e.to_string()))?;
        if backend.is_empty(&geog)? {
            return Err(invalid(BLANK_GEOMETRY.to_owned()));
        }

        let validated = self.validate_geometry(&geog, make_valid)?;
        if let Some(reason) = validated.error {
            return Err(invalid(reason));
        }

        let feature_type = match &raw.feature_type {
            Some(feature_type) => FeatureType::sanitize(feature_type),
            None => FeatureType::from_geometry_type(backend.geometry_type(&geog)?),
        }
        .ok_or_else(|| invalid(UNKNOWN_FEATURE_TYPE.to_owned()))?;

        let derived = if self.ctx.config().automatically_cache_derivatives {
            self.derive(&validated.geog, projection)?
        } else {
            Derivatives::default()
        };

        Ok(FeatureRow {
            id: 0,
            spatial_model_type: owner.model_type.clone(),
            spatial_model_id: owner.model_id,
            name: raw.name.clone(),
            feature_type,
            metadata: raw.metadata.clone(),
            geog: validated.geog,
            derived,
            source_identifier: raw.source_identifier.clone(),
        })
    }

    /// Area of the union of the polygon features' low resolution geometry.
    fn polygon_area<'r>(&self, rows: impl Iterator<Item = &'r FeatureRow>) -> SpatialResult<f64> {
        let parts: Vec<&[u8]> = rows
            .filter(|row| row.feature_type == FeatureType::Polygon)
            .filter_map(|row| row.derived.geom_lowres.as_deref())
            .collect();
        if parts.is_empty() {
            return Ok(0.0);
        }
        let backend = self.ctx.backend();
        backend.area(&backend.polygon_union(&parts)?)
    }

    pub fn features(&self, scope: &Scope) -> Vec<FeatureRow> {
        let registry = self.ctx.registry();
        self.ctx
            .store()
            .read(|tables| tables.features_in(registry, scope).cloned().collect())
    }

    pub fn features_of_type(&self, scope: &Scope, feature_type: FeatureType) -> Vec<FeatureRow> {
        let mut features = self.features(scope);
        features.retain(|row| row.feature_type == feature_type);
        features
    }

    pub fn polygons(&self, scope: &Scope) -> Vec<FeatureRow> {
        self.features_of_type(scope, FeatureType::Polygon)
    }

    pub fn lines(&self, scope: &Scope) -> Vec<FeatureRow> {
        self.features_of_type(scope, FeatureType::Line)
    }

    pub fn points(&self, scope: &Scope) -> Vec<FeatureRow> {
        self.features_of_type(scope, FeatureType::Point)
    }

    /// Features whose metadata maps `key` to `value`. A blank key or value
    /// matches everything.
    pub fn with_metadata(&self, scope: &Scope, key: &str, value: &str) -> Vec<FeatureRow> {
        let mut features = self.features(scope);
        if !key.is_empty() && !value.is_empty() {
            features.retain(|row| row.metadata.get(key).is_some_and(|v| v == value));
        }
        features
    }

    pub fn area_in_square_meters(&self, scope: &Scope) -> SpatialResult<f64> {
        self.polygon_area(self.features(scope).iter())
    }

    /// The cached `features_area` when the class keeps one, otherwise the
    /// computed area.
    pub fn features_area_in_square_meters(&self, record: &Record) -> SpatialResult<f64> {
        let owner = self.ctx.registry().model_ref(record)?;
        let class = self.ctx.registry().get(&record.class_name)?;
        if class.has_features_area {
            let cached = self
                .ctx
                .store()
                .read(|tables| tables.model(&owner).and_then(|model| model.features_area));
            if let Some(area) = cached {
                return Ok(area);
            }
        }
        self.area_in_square_meters(&Scope::record(record)?)
    }

    /// Changes whenever the scope's feature set changes. Features are never
    /// updated in place, so the maximum id and the count are enough.
    pub fn features_cache_key(&self, scope: &Scope) -> String {
        let features = self.features(scope);
        let max_id = features
            .iter()
            .map(|row| row.id)
            .max()
            .map(|id| id.to_string())
            .unwrap_or_default();
        let count = features.len();
        match scope {
            Scope::Class(class_name) => format!("{class_name}/{max_id}-{count}"),
            Scope::Records { class_name, ids } => {
                let ids = ids
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(",");
                format!("{class_name}/{ids}-{max_id}-{count}")
            }
        }
    }

    pub fn bounds(&self, scope: &Scope) -> Option<Bounds> {
        self.features(scope)
            .iter()
            .filter_map(|row| row.derived.bounds())
            .reduce(Bounds::merge)
    }

    /// Stored features whose `geog` fails validation, with the reason.
    pub fn invalid_features(
        &self, record: &Record,
    ) -> SpatialResult<Vec<(FeatureRow, String)>> {
        let backend = self.ctx.backend();
        let mut invalid = Vec::new();
        for row in self.features(&Scope::record(record)?) {
            if let Some(reason) = backend.validity_reason(&row.geog)? {
                invalid.push((row, reason));
            }
        }
        Ok(invalid)
    }

    pub fn with_features(&self, class_name: &str) -> Vec<ModelRef> {
        let (with, _) = self.partition_by_features(class_name);
        with
    }

    pub fn without_features(&self, class_name: &str) -> Vec<ModelRef> {
        let (_, without) = self.partition_by_features(class_name);
        without
    }

    fn partition_by_features(&self, class_name: &str) -> (Vec<ModelRef>, Vec<ModelRef>) {
        let registry = self.ctx.registry();
        let scope = Scope::class(class_name);
        self.ctx.store().read(|tables| {
            let owners: BTreeSet<ModelRef> =
                tables.features.values().map(FeatureRow::owner).collect();
            tables
                .members(registry, &scope)
                .map(|model| model.model_ref())
                .partition(|model| owners.contains(model))
        })
    }
}
