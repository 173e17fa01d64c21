use std::sync::Arc;

use common_exception::{SpatialError, SpatialResult};
use datafusion::arrow::array::RecordBatch;
use datafusion::dataframe::DataFrame;
use datafusion::datasource::MemTable;
use datafusion::execution::context::{SessionConfig, SessionContext, SessionState};
use datafusion_extra::spatial::register_spatial_udfs;

/// A DataFusion session with the spatial functions registered. Each live
/// query gets its own, with the tables it reads registered as `MemTable`s.
pub struct QueryContext {
    inner: SessionContext,
}

impl Default for QueryContext {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryContext {
    pub fn new() -> Self {
        let config = SessionConfig::new()
            .with_target_partitions(1)
            .with_information_schema(false);
        let ctx = SessionContext::new_with_config(config);
        register_spatial_udfs(&ctx);

        Self { inner: ctx }
    }

    pub fn state(&self) -> SessionState {
        self.inner.state()
    }

    pub fn register_batch(&self, name: &str, batch: RecordBatch) -> SpatialResult<()> {
        let table =
            MemTable::try_new(batch.schema(), vec![vec![batch]]).map_err(SpatialError::query)?;
        self.inner
            .register_table(name, Arc::new(table))
            .map_err(SpatialError::query)?;
        Ok(())
    }

    pub async fn sql(&self, sql: &str) -> SpatialResult<DataFrame> {
        let plan = self
            .state()
            .create_logical_plan(sql)
            .await
            .map_err(SpatialError::query)?;
        self.inner
            .execute_logical_plan(plan)
            .await
            .map_err(SpatialError::query)
    }

    pub async fn collect(&self, sql: &str) -> SpatialResult<Vec<RecordBatch>> {
        self.sql(sql)
            .await?
            .collect()
            .await
            .map_err(SpatialError::query)
    }
}
