use std::fmt;

use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub type SpatialResult<T> = Result<T, SpatialError>;

#[derive(Debug, Error)]
pub enum SpatialError {
    /// An importer or a batch of features could not be turned into usable
    /// geometry. Every collected sub-failure is kept.
    #[error("Error updating {owner}. {}", to_sentence(.errors))]
    Import { owner: String, errors: Vec<String> },

    #[error("Shapefile archive is missing a required file: {0}")]
    IncompleteShapefileArchive(String),

    #[error("Shapefile archive is missing a projection file: {0}")]
    IndeterminateProjection(String),

    #[error("Feature {feature}: {reason}")]
    GeometryValidation { feature: String, reason: String },

    #[error("Import for {0} produced no valid features")]
    EmptyResult(String),

    /// Two refreshes of the same (record, class) proximity overlapped. The
    /// caller should retry the whole record refresh.
    #[error("Proximity cache {key} changed while it was being refreshed")]
    ConcurrencyConflict { key: String },

    #[error("Failed to cache proximity for {} record(s): {}", .0.len(), join_failures(.0))]
    CacheBatch(Vec<RecordFailure>),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unknown spatial model {0}")]
    UnknownModel(String),

    #[error("Geometry backend error: {0}")]
    GeometryBackend(#[source] BoxError),

    #[error("Query error: {0}")]
    Query(#[source] BoxError),

    #[error("Background task failed: {0}")]
    Task(#[source] BoxError),
}

impl SpatialError {
    pub fn backend(err: impl Into<BoxError>) -> Self {
        Self::GeometryBackend(err.into())
    }

    pub fn query(err: impl Into<BoxError>) -> Self {
        Self::Query(err.into())
    }

    pub fn task(err: impl Into<BoxError>) -> Self {
        Self::Task(err.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }
}

/// One record whose proximity refresh failed inside a batch.
#[derive(Debug)]
pub struct RecordFailure {
    pub record: String,
    pub error: SpatialError,
}

impl fmt::Display for RecordFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.record, self.error)
    }
}

fn join_failures(failures: &[RecordFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Joins messages the way a person would list them: "a", "a and b",
/// "a, b, and c".
pub fn to_sentence(items: &[String]) -> String {
    match items {
        [] => String::new(),
        [only] => only.clone(),
        [first, second] => format!("{first} and {second}"),
        [init @ .., last] => format!("{}, and {last}", init.join(", ")),
    }
}
