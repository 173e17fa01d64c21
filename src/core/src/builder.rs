use chrono::Utc;
use common_exception::{RecordFailure, SpatialError, SpatialResult};
use tracing::{info, warn};

use crate::engine::SpatialContext;
use crate::model::{ModelClass, ModelRef, ModelRegistry, Record, Scope, Target};
use crate::planner::{BufferOptions, ProximityRow};
use crate::proximity::{canonical_pair, is_stale};
use crate::schema::{SpatialCacheRow, SpatialProximityRow};
use crate::store::Tables;

/// What a record's proximity was computed from. A refresh only commits if
/// this did not change while it was computing.
type FeaturesVersion = (Option<String>, Vec<i64>);

/// Writes the `spatial_caches` and `spatial_proximities` tables.
pub struct ProximityCacheBuilder<'a> {
    ctx: &'a SpatialContext,
}

impl<'a> ProximityCacheBuilder<'a> {
    pub(crate) fn new(ctx: &'a SpatialContext) -> Self {
        Self { ctx }
    }

    /// Rebuilds proximity between every pair of `classes`, each class paired
    /// with itself included. Every record is refreshed in its own
    /// transaction, and records that fail do not stop the batch.
    pub async fn cache_proximity(&self, classes: &[&str]) -> SpatialResult<()> {
        let registry = self.ctx.registry();
        for class_name in classes {
            registry.get(class_name)?;
        }

        let mut failures = Vec::new();
        for (i, klass) in classes.iter().enumerate() {
            for clazz in &classes[i..] {
                self.clear_cache(Some(*klass), Some(*clazz))?;

                let records = self.records_of(klass);
                let before = failures.len();
                for record in &records {
                    let owner = registry.model_ref(record)?;
                    let key = lock_key(&owner, clazz);
                    let _guard = self.ctx.locks().lock(&key).await;
                    if let Err(error) = self.refresh(record, clazz, &key, klass == clazz).await {
                        warn!("failed to cache proximity of {owner} to {clazz}: {error}");
                        failures.push(RecordFailure {
                            record: owner.to_string(),
                            error,
                        });
                    }
                }

                if klass != clazz && failures.len() == before {
                    self.write_markers(clazz, klass)?;
                }
                info!(
                    "cached proximity of {} {klass} records to {clazz}",
                    records.len()
                );
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(SpatialError::CacheBatch(failures))
        }
    }

    /// Replaces the proximity of one record to `other_class`. Refreshes of
    /// the same record and class wait for each other.
    pub async fn cache_record_proximity(
        &self, record: &Record, other_class: &str,
    ) -> SpatialResult<()> {
        let owner = self.ctx.registry().model_ref(record)?;
        self.ctx.registry().get(other_class)?;

        let key = lock_key(&owner, other_class);
        let _guard = self.ctx.locks().lock(&key).await;
        self.refresh(record, other_class, &key, false).await
    }

    /// Refreshes the records whose cache against another of `classes` is
    /// missing or stale. Returns how many records were refreshed.
    pub async fn update_proximity(&self, classes: &[&str]) -> SpatialResult<usize> {
        let registry = self.ctx.registry();
        for class_name in classes {
            registry.get(class_name)?;
        }

        let mut refreshed = 0;
        let mut failures = Vec::new();
        for klass in classes {
            for clazz in classes {
                for record in self.records_needing_refresh(klass, clazz)? {
                    match self.cache_record_proximity(&record, clazz).await {
                        Ok(()) => refreshed += 1,
                        Err(error) => {
                            warn!("failed to update proximity of {record} to {clazz}: {error}");
                            failures.push(RecordFailure {
                                record: record.to_string(),
                                error,
                            });
                        }
                    }
                }
            }
        }

        info!("updated proximity of {refreshed} records");
        if failures.is_empty() {
            Ok(refreshed)
        } else {
            Err(SpatialError::CacheBatch(failures))
        }
    }

    /// Deletes cache markers and proximity rows relating `klass` to `clazz`.
    /// With one class, everything involving that class goes, and with none,
    /// everything goes.
    pub fn clear_cache(&self, klass: Option<&str>, clazz: Option<&str>) -> SpatialResult<()> {
        let registry = self.ctx.registry();
        for class_name in klass.iter().chain(clazz.iter()) {
            registry.get(class_name)?;
        }

        self.ctx.store().transaction(|tables| {
            match (klass, clazz) {
                (None, None) => {
                    tables.spatial_caches.clear();
                    tables.spatial_proximities.clear();
                }
                (Some(only), None) | (None, Some(only)) => {
                    let scope = Scope::class(only);
                    let members = member_refs(tables, registry, &scope);
                    tables.spatial_caches.retain(|_, cache| {
                        cache.cached_class() != Some(only)
                            && !members.contains(&cache.spatial_model())
                    });
                    tables.spatial_proximities.retain(|_, row| {
                        !members.contains(&row.model_a()) && !members.contains(&row.model_b())
                    });
                }
                (Some(a), Some(b)) => {
                    let (scope_a, scope_b) = (Scope::class(a), Scope::class(b));
                    let members_a = member_refs(tables, registry, &scope_a);
                    let members_b = member_refs(tables, registry, &scope_b);
                    tables.spatial_caches.retain(|_, cache| {
                        let owner = cache.spatial_model();
                        let cached = cache.cached_class();
                        !((members_a.contains(&owner) && cached == Some(b))
                            || (members_b.contains(&owner) && cached == Some(a)))
                    });
                    tables.spatial_proximities.retain(|_, row| {
                        let (ma, mb) = (row.model_a(), row.model_b());
                        !((members_a.contains(&ma) && members_b.contains(&mb))
                            || (members_b.contains(&ma) && members_a.contains(&mb)))
                    });
                }
            }
            Ok(())
        })
    }

    /// Deletes the cache markers of `record` for `other_class` and the
    /// proximity rows pairing it with records of that class.
    pub fn clear_record_cache(&self, record: &Record, other_class: &str) -> SpatialResult<()> {
        let owner = self.ctx.registry().model_ref(record)?;
        let other = self.ctx.registry().get(other_class)?;
        let registry = self.ctx.registry();
        self.ctx.store().transaction(|tables| {
            clear_record_cache(tables, registry, &owner, other);
            Ok(())
        })
    }

    /// Computes the record's proximity live, then swaps it in. The caller
    /// holds the lock for `key`.
    async fn refresh(
        &self, record: &Record, other_class: &str, key: &str, same_class_batch: bool,
    ) -> SpatialResult<()> {
        let registry = self.ctx.registry();
        let owner = registry.model_ref(record)?;
        let owner_class = registry.get(&record.class_name)?;
        let other = registry.get(other_class)?;
        let distance = self.ctx.config().default_cache_buffer_in_meters;

        let version = self
            .ctx
            .store()
            .read(|tables| features_version(tables, &owner));
        let rows = self
            .ctx
            .planner()
            .within_buffer(
                &Scope::class(other_class),
                &Target::Record(record.clone()),
                distance,
                BufferOptions::live().with_distance().with_intersection_area(),
            )
            .await?
            .rows;

        self.ctx.store().transaction(|tables| {
            if tables.model(&owner).is_none() {
                return Err(SpatialError::UnknownModel(owner.to_string()));
            }
            if features_version(tables, &owner) != version {
                return Err(SpatialError::ConcurrencyConflict {
                    key: key.to_owned(),
                });
            }

            if !same_class_batch {
                clear_record_cache(tables, registry, &owner, other);
            }
            for row in &rows {
                // the lower record writes the row of a same-class pair
                if same_class_batch && row.model < owner {
                    continue;
                }
                upsert_proximity(tables, &owner, row);
            }
            write_marker(tables, &owner, owner_class, other, distance);
            Ok(())
        })
    }

    /// Gives every record of `klass` a marker for `clazz` without computing
    /// anything, for the side of a pair whose rows the other side wrote.
    fn write_markers(&self, klass: &str, clazz: &str) -> SpatialResult<()> {
        let registry = self.ctx.registry();
        let other = registry.get(clazz)?;
        let distance = self.ctx.config().default_cache_buffer_in_meters;
        let scope = Scope::class(klass);

        self.ctx.store().transaction(|tables| {
            let members: Vec<(ModelRef, String)> = tables
                .members(registry, &scope)
                .map(|model| (model.model_ref(), model.class_name.clone()))
                .collect();
            for (owner, class_name) in members {
                let owner_class = registry.get(&class_name)?;
                write_marker(tables, &owner, owner_class, other, distance);
            }
            Ok(())
        })
    }

    fn records_of(&self, class_name: &str) -> Vec<Record> {
        let scope = Scope::class(class_name);
        self.ctx.store().read(|tables| {
            tables
                .members(self.ctx.registry(), &scope)
                .map(|model| Record::new(model.class_name.clone(), model.spatial_model_id))
                .collect()
        })
    }

    fn records_needing_refresh(&self, klass: &str, clazz: &str) -> SpatialResult<Vec<Record>> {
        let registry = self.ctx.registry();
        let scope = Scope::class(klass);
        Ok(self.ctx.store().read(|tables| {
            tables
                .members(registry, &scope)
                .filter(|model| {
                    let owner = model.model_ref();
                    let mut markers = tables
                        .caches_of(&owner)
                        .filter(|cache| cache.cached_class() == Some(clazz))
                        .peekable();
                    markers.peek().is_none()
                        || markers.any(|cache| is_stale(registry, tables, cache))
                })
                .map(|model| Record::new(model.class_name.clone(), model.spatial_model_id))
                .collect()
        }))
    }
}

fn lock_key(owner: &ModelRef, other_class: &str) -> String {
    format!("{}/{}/{other_class}", owner.model_type, owner.model_id)
}

fn member_refs(tables: &Tables, registry: &ModelRegistry, scope: &Scope) -> Vec<ModelRef> {
    tables
        .members(registry, scope)
        .map(|model| model.model_ref())
        .collect()
}

fn features_version(tables: &Tables, owner: &ModelRef) -> FeaturesVersion {
    let hash = tables
        .model(owner)
        .and_then(|model| model.features_hash.clone());
    let ids = tables.features_of(owner).map(|row| row.id).collect();
    (hash, ids)
}

pub(crate) fn clear_record_cache(
    tables: &mut Tables, registry: &ModelRegistry, owner: &ModelRef, other: &ModelClass,
) {
    tables.spatial_caches.retain(|_, cache| {
        cache.spatial_model() != *owner || cache.cached_class() != Some(other.name.as_str())
    });

    let scope = Scope::class(other.name.clone());
    let paired: Vec<i64> = tables
        .spatial_proximities
        .values()
        .filter(|row| {
            row.counterpart(owner)
                .is_some_and(|model| tables.contains(registry, &scope, &model))
        })
        .map(|row| row.id)
        .collect();
    for id in paired {
        tables.spatial_proximities.remove(&id);
    }
}

/// Stores the pair in canonical order, replacing an earlier row of the same
/// pair.
fn upsert_proximity(tables: &mut Tables, owner: &ModelRef, row: &ProximityRow) {
    let (a, b) = canonical_pair(owner.clone(), row.model.clone());
    tables
        .spatial_proximities
        .retain(|_, existing| existing.model_a() != a || existing.model_b() != b);
    tables.insert_proximity(SpatialProximityRow {
        id: 0,
        model_a_type: a.model_type,
        model_a_id: a.model_id,
        model_b_type: b.model_type,
        model_b_id: b.model_id,
        distance_in_meters: row.distance_in_meters,
        intersection_area_in_square_meters: row.intersection_area_in_square_meters,
    });
}

fn write_marker(
    tables: &mut Tables, owner: &ModelRef, owner_class: &ModelClass, other: &ModelClass,
    distance: Option<f64>,
) {
    let created_at = tables
        .caches_of(owner)
        .find(|cache| cache.cached_class() == Some(other.name.as_str()))
        .map(|cache| cache.created_at);
    tables.spatial_caches.retain(|_, cache| {
        cache.spatial_model() != *owner || cache.cached_class() != Some(other.name.as_str())
    });

    let features_hash = if owner_class.has_features_hash {
        tables
            .model(owner)
            .and_then(|model| model.features_hash.clone())
    } else {
        None
    };
    let now = Utc::now();
    tables.insert_cache(SpatialCacheRow {
        id: 0,
        spatial_model_type: owner.model_type.clone(),
        spatial_model_id: owner.model_id,
        intersection_model_type: other.lineage(),
        intersection_cache_distance: distance,
        features_hash,
        created_at: created_at.unwrap_or(now),
        updated_at: now,
    });
}
