use std::collections::BTreeMap;
use std::sync::Arc;

use common_exception::{SpatialError, SpatialResult};
use common_utils::{queue_key, queue_prefix};
use futures::FutureExt;
use tracing::debug;

use crate::aggregate::AggregateStore;
use crate::backend::{GeometryBackend, GeosBackend};
use crate::builder::ProximityCacheBuilder;
use crate::config::{Projection, SpatialConfig};
use crate::feature_store::{FeatureStore, ImportOptions};
use crate::locks::KeyedLocks;
use crate::model::{ModelClass, ModelRef, ModelRegistry, Record};
use crate::planner::BufferedQueryPlanner;
use crate::proximity::ProximityCache;
use crate::store::{SpatialStore, Tables};
use crate::tasks::{AsyncTask, InProcessTaskQueue, Job, TaskHandle, TaskStatus};

pub const UPDATE_FEATURES: &str = "update_features";
pub const UPDATE_SPATIAL_CACHE: &str = "update_spatial_cache";

/// Priority given to queued spatial processing.
pub const DEFAULT_TASK_PRIORITY: i32 = 0;

#[derive(Debug)]
struct Shared {
    store: SpatialStore,
    backend: Arc<dyn GeometryBackend>,
    registry: ModelRegistry,
    locks: KeyedLocks,
    tasks: Arc<dyn AsyncTask>,
}

/// Entry point to the spatial engine. Cloning is cheap, and clones share the
/// store, the registry and the task queue.
#[derive(Debug, Clone)]
pub struct SpatialContext {
    shared: Arc<Shared>,
    config: Arc<SpatialConfig>,
}

impl SpatialContext {
    pub fn builder() -> SpatialContextBuilder {
        SpatialContextBuilder::default()
    }

    pub fn config(&self) -> &SpatialConfig {
        &self.config
    }

    pub fn backend(&self) -> &dyn GeometryBackend {
        self.shared.backend.as_ref()
    }

    pub fn store(&self) -> &SpatialStore {
        &self.shared.store
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.shared.registry
    }

    pub fn locks(&self) -> &KeyedLocks {
        &self.shared.locks
    }

    pub fn tasks(&self) -> &dyn AsyncTask {
        self.shared.tasks.as_ref()
    }

    pub fn features(&self) -> FeatureStore<'_> {
        FeatureStore::new(self)
    }

    pub fn aggregates(&self) -> AggregateStore<'_> {
        AggregateStore::new(self)
    }

    pub fn proximity(&self) -> ProximityCache<'_> {
        ProximityCache::new(self)
    }

    pub fn cache_builder(&self) -> ProximityCacheBuilder<'_> {
        ProximityCacheBuilder::new(self)
    }

    pub fn planner(&self) -> BufferedQueryPlanner<'_> {
        BufferedQueryPlanner::new(self)
    }

    /// Runs `body` with a copy of this context whose configuration was
    /// changed by `adjust`. This context keeps its configuration.
    pub fn scoped<R>(
        &self, adjust: impl FnOnce(&mut SpatialConfig), body: impl FnOnce(SpatialContext) -> R,
    ) -> R {
        let mut config = self.config().clone();
        adjust(&mut config);
        body(SpatialContext {
            shared: self.shared.clone(),
            config: Arc::new(config),
        })
    }

    /// The projection features of `class` are derived in.
    pub fn projection_for(&self, class: &ModelClass) -> Projection {
        class
            .projection
            .clone()
            .unwrap_or_else(|| self.config.projection.clone())
    }

    /// Inserts a spatial model row for a new record of `class_name`.
    pub fn create_record(&self, class_name: &str) -> SpatialResult<Record> {
        let base = self.registry().base_class_of(class_name)?.to_owned();
        let model = self
            .store()
            .transaction(|tables| Ok(tables.insert_model(&base, class_name)))?;
        Ok(Record::new(class_name, model.model_id))
    }

    /// Removes the record along with its features, aggregate, cache markers
    /// and proximity rows. Returns false when the record did not exist.
    pub fn destroy_record(&self, record: &Record) -> SpatialResult<bool> {
        let model = self.registry().model_ref(record)?;
        self.store()
            .transaction(|tables| Ok(tables.delete_model(&model)))
    }

    /// Refreshes the record's proximity to each of its class's proximity
    /// classes.
    pub async fn update_spatial_cache(&self, record: &Record) -> SpatialResult<()> {
        let class = self.registry().get(&record.class_name)?;
        for other in &class.proximity_classes {
            self.cache_builder()
                .cache_record_proximity(record, other)
                .await?;
        }
        Ok(())
    }

    /// Queues [`SpatialContext::update_features`] for `record`.
    pub fn delay_update_features(
        &self, record: &Record, options: ImportOptions,
    ) -> SpatialResult<TaskHandle> {
        let ctx = self.clone();
        let target = record.clone();
        let job = async move { ctx.update_features(&target, options).await.map(|_| ()) }.boxed();
        self.enqueue_operation(record, UPDATE_FEATURES, job)
    }

    /// Queues [`SpatialContext::update_spatial_cache`] for `record`.
    pub fn queue_update_spatial_cache(&self, record: &Record) -> SpatialResult<TaskHandle> {
        let ctx = self.clone();
        let target = record.clone();
        let job = async move { ctx.update_spatial_cache(&target).await }.boxed();
        self.enqueue_operation(record, UPDATE_SPATIAL_CACHE, job)
    }

    fn enqueue_operation(
        &self, record: &Record, operation: &'static str, job: Job,
    ) -> SpatialResult<TaskHandle> {
        let owner = self.registry().model_ref(record)?;
        let key = queue_key(&owner.model_type, owner.model_id, operation);

        let ctx = self.clone();
        let job_owner = owner.clone();
        let job_key = key.clone();
        let tracked = async move {
            let owner = job_owner;
            ctx.set_processing_status(&owner, operation, |_| TaskStatus::Processing)?;
            let result = job.await;
            ctx.set_processing_status(&owner, operation, |tasks| {
                // this job still counts as pending until it returns
                if tasks.pending_jobs(&job_key) > 1 {
                    TaskStatus::Queued
                } else if result.is_ok() {
                    TaskStatus::Success
                } else {
                    TaskStatus::Failure
                }
            })?;
            result
        }
        .boxed();

        debug!("queueing {key}");
        // queued under the store lock, so a finishing job sees this one
        self.store().transaction(|tables| {
            set_status(tables, &owner, operation, TaskStatus::Queued);
            Ok(self.tasks().enqueue(&key, tracked, DEFAULT_TASK_PRIORITY))
        })
    }

    /// Records a status in the owner's status cache. `status` is worked out
    /// under the store lock. A destroyed owner has nothing to record into,
    /// which is not an error.
    fn set_processing_status(
        &self, owner: &ModelRef, operation: &str,
        status: impl FnOnce(&dyn AsyncTask) -> TaskStatus,
    ) -> SpatialResult<()> {
        self.store().transaction(|tables| {
            set_status(tables, owner, operation, status(self.tasks()));
            Ok(())
        })
    }

    pub fn spatial_processing_status(
        &self, record: &Record, operation: &str,
    ) -> SpatialResult<Option<TaskStatus>> {
        let owner = self.registry().model_ref(record)?;
        Ok(self.store().read(|tables| {
            tables
                .model(&owner)
                .and_then(|model| model.spatial_processing_status_cache.get(operation).copied())
        }))
    }

    /// True while a feature update is queued or running.
    pub fn updating_features(&self, record: &Record) -> SpatialResult<bool> {
        Ok(self
            .spatial_processing_status(record, UPDATE_FEATURES)?
            .is_some_and(|status| status.is_pending()))
    }

    pub fn updating_features_failed(&self, record: &Record) -> SpatialResult<bool> {
        Ok(self.spatial_processing_status(record, UPDATE_FEATURES)? == Some(TaskStatus::Failure))
    }

    /// First line of the last failed feature update's error.
    pub fn feature_update_error(&self, record: &Record) -> SpatialResult<Option<String>> {
        let owner = self.registry().model_ref(record)?;
        let key = queue_key(&owner.model_type, owner.model_id, UPDATE_FEATURES);
        Ok(self
            .tasks()
            .last_error(&key)
            .and_then(|error| error.lines().next().map(str::to_owned)))
    }

    /// Queue statuses of every spatial operation of `record`, by queue key.
    pub fn spatial_processing_jobs(
        &self, record: &Record,
    ) -> SpatialResult<BTreeMap<String, TaskStatus>> {
        let owner = self.registry().model_ref(record)?;
        Ok(self
            .tasks()
            .statuses_with_prefix(&queue_prefix(&owner.model_type, owner.model_id)))
    }
}

fn set_status(tables: &mut Tables, owner: &ModelRef, operation: &str, status: TaskStatus) {
    if let Some(model) = tables.model_mut(owner) {
        model
            .spatial_processing_status_cache
            .insert(operation.to_owned(), status);
    }
}

#[derive(Debug, Default)]
pub struct SpatialContextBuilder {
    registry: ModelRegistry,
    backend: Option<Arc<dyn GeometryBackend>>,
    tasks: Option<Arc<dyn AsyncTask>>,
    config: SpatialConfig,
}

impl SpatialContextBuilder {
    pub fn register(mut self, class: ModelClass) -> Self {
        self.registry.register(class);
        self
    }

    pub fn backend(mut self, backend: Arc<dyn GeometryBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn tasks(mut self, tasks: Arc<dyn AsyncTask>) -> Self {
        self.tasks = Some(tasks);
        self
    }

    pub fn config(mut self, config: SpatialConfig) -> Self {
        self.config = config;
        self
    }

    /// Fails when a class names a parent, or a proximity class, that was
    /// never registered.
    pub fn build(self) -> SpatialResult<SpatialContext> {
        for class in self.registry.classes() {
            for name in class.ancestors.iter().chain(&class.proximity_classes) {
                if self.registry.get(name).is_err() {
                    return Err(SpatialError::UnknownModel(format!(
                        "{name} (referenced by {})",
                        class.name
                    )));
                }
            }
        }

        Ok(SpatialContext {
            shared: Arc::new(Shared {
                store: SpatialStore::new(),
                backend: self.backend.unwrap_or_else(|| Arc::new(GeosBackend)),
                registry: self.registry,
                locks: KeyedLocks::new(),
                tasks: self
                    .tasks
                    .unwrap_or_else(|| Arc::new(InProcessTaskQueue::new())),
            }),
            config: Arc::new(self.config),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Scope;

    fn context() -> SpatialContext {
        let house = ModelClass::new("House");
        let cabin = ModelClass::new("Cabin").subclass_of(&house);
        SpatialContext::builder()
            .register(house)
            .register(cabin)
            .build()
            .unwrap()
    }

    #[test]
    fn test_scoped_config_does_not_leak() {
        let ctx = context();
        let inside = ctx.scoped(
            |config| config.default_cache_buffer_in_meters = Some(5.0),
            |scoped| scoped.config().default_cache_buffer_in_meters,
        );
        assert_eq!(inside, Some(5.0));
        assert_eq!(
            ctx.config().default_cache_buffer_in_meters,
            Some(crate::config::DEFAULT_CACHE_BUFFER_IN_METERS)
        );
    }

    #[test]
    fn test_create_and_destroy_record() {
        let ctx = context();
        let house = ctx.create_record("House").unwrap();
        let cabin = ctx.create_record("Cabin").unwrap();
        assert_eq!(house.id, Some(1));
        assert_eq!(cabin.id, Some(2));
        assert!(ctx.create_record("Barn").is_err());

        assert!(ctx.destroy_record(&cabin).unwrap());
        assert!(!ctx.destroy_record(&cabin).unwrap());
        assert_eq!(
            ctx.store()
                .read(|tables| tables.members(ctx.registry(), &Scope::class("House")).count()),
            1
        );
    }

    #[test]
    fn test_build_rejects_unknown_proximity_class() {
        let result = SpatialContext::builder()
            .register(ModelClass::new("House").with_proximity_classes(["Parcel"]))
            .build();
        assert!(matches!(result, Err(SpatialError::UnknownModel(_))));
    }
}
