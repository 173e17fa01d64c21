use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use common_exception::{SpatialError, SpatialResult};
use datafusion_extra::spatial::geometry::GeometryTypeId;
use serde::{Deserialize, Serialize};

use crate::config::Projection;
use crate::import::FeatureSource;

/// Polymorphic reference to a spatial model row. `model_type` is always the
/// base class name, so the derived ordering is the canonical pair ordering.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModelRef {
    pub model_type: String,
    pub model_id: i64,
}

impl ModelRef {
    pub fn new(model_type: impl Into<String>, model_id: i64) -> Self {
        Self {
            model_type: model_type.into(),
            model_id,
        }
    }
}

impl fmt::Display for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.model_type, self.model_id)
    }
}

/// Implemented by domain types that own features.
pub trait SpatialModel {
    /// Concrete class name, which may be a subclass of a registered base.
    fn spatial_class(&self) -> &str;

    /// `None` until the record has been persisted.
    fn spatial_id(&self) -> Option<i64>;

    fn record(&self) -> Record {
        Record {
            class_name: self.spatial_class().to_owned(),
            id: self.spatial_id(),
        }
    }
}

/// A single, possibly unpersisted, record of a registered class.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Record {
    pub class_name: String,
    pub id: Option<i64>,
}

impl Record {
    pub fn new(class_name: impl Into<String>, id: i64) -> Self {
        Self {
            class_name: class_name.into(),
            id: Some(id),
        }
    }

    pub fn unpersisted(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            id: None,
        }
    }

    pub fn persisted_id(&self) -> SpatialResult<i64> {
        self.id.ok_or_else(|| {
            SpatialError::invalid_input(format!("{} record is not persisted", self.class_name))
        })
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id {
            Some(id) => write!(f, "{} {id}", self.class_name),
            None => write!(f, "new {}", self.class_name),
        }
    }
}

impl SpatialModel for Record {
    fn spatial_class(&self) -> &str {
        &self.class_name
    }

    fn spatial_id(&self) -> Option<i64> {
        self.id
    }

    fn record(&self) -> Record {
        self.clone()
    }
}

/// A set of records of one class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Every record of the class, subclasses included.
    Class(String),
    /// The listed records of the class.
    Records { class_name: String, ids: Vec<i64> },
}

impl Scope {
    pub fn class(class_name: impl Into<String>) -> Self {
        Self::Class(class_name.into())
    }

    pub fn records(class_name: impl Into<String>, ids: impl IntoIterator<Item = i64>) -> Self {
        Self::Records {
            class_name: class_name.into(),
            ids: ids.into_iter().collect(),
        }
    }

    pub fn record(record: &Record) -> SpatialResult<Self> {
        Ok(Self::records(
            record.class_name.clone(),
            [record.persisted_id()?],
        ))
    }

    pub fn class_name(&self) -> &str {
        match self {
            Self::Class(class_name) | Self::Records { class_name, .. } => class_name,
        }
    }

    pub fn includes_id(&self, id: i64) -> bool {
        match self {
            Self::Class(_) => true,
            Self::Records { ids, .. } => ids.contains(&id),
        }
    }
}

/// The `other` side of a buffered query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    Record(Record),
    Scope(Scope),
}

impl Target {
    pub fn class_name(&self) -> &str {
        match self {
            Self::Record(record) => &record.class_name,
            Self::Scope(scope) => scope.class_name(),
        }
    }
}

impl From<Record> for Target {
    fn from(record: Record) -> Self {
        Self::Record(record)
    }
}

impl From<Scope> for Target {
    fn from(scope: Scope) -> Self {
        Self::Scope(scope)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureType {
    Polygon,
    Point,
    Line,
}

impl FeatureType {
    const ALL: [FeatureType; 3] = [Self::Polygon, Self::Point, Self::Line];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Polygon => "polygon",
            Self::Point => "point",
            Self::Line => "line",
        }
    }

    /// Picks the canonical type whose name occurs in free-form input, so
    /// "MultiPolygon" becomes polygon and "LineString" becomes line.
    pub fn sanitize(input: &str) -> Option<Self> {
        let input = input.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|feature_type| input.contains(feature_type.as_str()))
    }

    pub fn from_geometry_type(geometry_type: GeometryTypeId) -> Option<Self> {
        Self::sanitize(geometry_type.name())
    }
}

impl fmt::Display for FeatureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registration of a class of spatial models.
#[derive(Debug, Clone)]
pub struct ModelClass {
    pub name: String,
    /// The base class name that references to records of this class use.
    pub base_class: String,
    /// Ancestor class names, nearest first.
    pub ancestors: Vec<String>,
    /// Records store a hash of their importers so unchanged data is skipped
    /// and cache staleness can be detected.
    pub has_features_hash: bool,
    /// Records store the area of their features.
    pub has_features_area: bool,
    /// Repair invalid imported geometry with `buffer(0)`.
    pub make_valid: bool,
    /// Overrides `SpatialConfig::projection` for this class.
    pub projection: Option<Projection>,
    /// Classes whose proximity is refreshed after each feature update.
    pub proximity_classes: Vec<String>,
    pub feature_source: Option<Arc<dyn FeatureSource>>,
}

impl ModelClass {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            base_class: name.clone(),
            name,
            ancestors: Vec::new(),
            has_features_hash: false,
            has_features_area: false,
            make_valid: true,
            projection: None,
            proximity_classes: Vec::new(),
            feature_source: None,
        }
    }

    pub fn subclass_of(mut self, parent: &ModelClass) -> Self {
        self.base_class = parent.base_class.clone();
        self.ancestors = std::iter::once(parent.name.clone())
            .chain(parent.ancestors.iter().cloned())
            .collect();
        self
    }

    pub fn with_features_hash(mut self) -> Self {
        self.has_features_hash = true;
        self
    }

    pub fn with_features_area(mut self) -> Self {
        self.has_features_area = true;
        self
    }

    pub fn without_make_valid(mut self) -> Self {
        self.make_valid = false;
        self
    }

    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn with_proximity_classes<I, S>(mut self, classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.proximity_classes = classes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_feature_source(mut self, source: Arc<dyn FeatureSource>) -> Self {
        self.feature_source = Some(source);
        self
    }

    /// The class name followed by its ancestors.
    pub fn lineage(&self) -> Vec<String> {
        std::iter::once(self.name.clone())
            .chain(self.ancestors.iter().cloned())
            .collect()
    }

    pub fn is_kind_of(&self, class_name: &str) -> bool {
        self.name == class_name || self.ancestors.iter().any(|a| a == class_name)
    }
}

/// Maps class names to their registration. Lookups never fall back to
/// guessing a class from its name.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    classes: HashMap<String, ModelClass>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, class: ModelClass) {
        self.classes.insert(class.name.clone(), class);
    }

    pub fn get(&self, class_name: &str) -> SpatialResult<&ModelClass> {
        self.classes
            .get(class_name)
            .ok_or_else(|| SpatialError::UnknownModel(class_name.to_owned()))
    }

    pub fn classes(&self) -> impl Iterator<Item = &ModelClass> {
        self.classes.values()
    }

    pub fn base_class_of(&self, class_name: &str) -> SpatialResult<&str> {
        Ok(&self.get(class_name)?.base_class)
    }

    /// True when `class_name` is `ancestor` or one of its subclasses.
    pub fn is_kind_of(&self, class_name: &str, ancestor: &str) -> bool {
        self.classes
            .get(class_name)
            .is_some_and(|class| class.is_kind_of(ancestor))
    }

    pub fn model_ref(&self, record: &Record) -> SpatialResult<ModelRef> {
        let base = self.base_class_of(&record.class_name)?;
        Ok(ModelRef::new(base, record.persisted_id()?))
    }
}
