//! Row types of the spatial tables. Field names are the persisted column
//! names.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backend::Bounds;
use crate::model::{FeatureType, ModelRef};
use crate::tasks::TaskStatus;

/// Columns derived from `geog` by `cache_derivatives`. All of them are
/// `None` until derivatives have been cached.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Derivatives {
    /// `geog` in the planar projection of the owning class.
    pub geom: Option<Vec<u8>>,
    /// Simplified and rounded `geom`.
    pub geom_lowres: Option<Vec<u8>>,
    /// `geog` in Web Mercator.
    pub tilegeom: Option<Vec<u8>>,
    pub area: Option<f64>,
    pub centroid: Option<Vec<u8>>,
    pub north: Option<f64>,
    pub east: Option<f64>,
    pub south: Option<f64>,
    pub west: Option<f64>,
}

impl Derivatives {
    pub fn bounds(&self) -> Option<Bounds> {
        Some(Bounds {
            north: self.north?,
            east: self.east?,
            south: self.south?,
            west: self.west?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub id: i64,
    pub spatial_model_type: String,
    pub spatial_model_id: i64,
    pub name: Option<String>,
    pub feature_type: FeatureType,
    pub metadata: BTreeMap<String, String>,
    pub geog: Vec<u8>,
    #[serde(flatten)]
    pub derived: Derivatives,
    pub source_identifier: Option<String>,
}

impl FeatureRow {
    pub fn owner(&self) -> ModelRef {
        ModelRef::new(self.spatial_model_type.clone(), self.spatial_model_id)
    }

    pub fn is_owned_by(&self, owner: &ModelRef) -> bool {
        self.spatial_model_type == owner.model_type && self.spatial_model_id == owner.model_id
    }

    pub fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.id.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateFeatureRow {
    /// A new id is assigned on every refresh, so it doubles as a version.
    pub id: i64,
    pub spatial_model_type: String,
    pub spatial_model_id: i64,
    pub geog: Vec<u8>,
    #[serde(flatten)]
    pub derived: Derivatives,
}

impl AggregateFeatureRow {
    pub fn is_owned_by(&self, owner: &ModelRef) -> bool {
        self.spatial_model_type == owner.model_type && self.spatial_model_id == owner.model_id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialCacheRow {
    pub id: i64,
    pub spatial_model_type: String,
    pub spatial_model_id: i64,
    /// The class proximity was computed against, followed by its ancestors.
    pub intersection_model_type: Vec<String>,
    /// `None` means every record of the class was considered.
    pub intersection_cache_distance: Option<f64>,
    pub features_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SpatialCacheRow {
    pub fn spatial_model(&self) -> ModelRef {
        ModelRef::new(self.spatial_model_type.clone(), self.spatial_model_id)
    }

    pub fn cached_class(&self) -> Option<&str> {
        self.intersection_model_type.first().map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialProximityRow {
    pub id: i64,
    pub model_a_type: String,
    pub model_a_id: i64,
    pub model_b_type: String,
    pub model_b_id: i64,
    pub distance_in_meters: Option<f64>,
    pub intersection_area_in_square_meters: Option<f64>,
}

impl SpatialProximityRow {
    pub fn model_a(&self) -> ModelRef {
        ModelRef::new(self.model_a_type.clone(), self.model_a_id)
    }

    pub fn model_b(&self) -> ModelRef {
        ModelRef::new(self.model_b_type.clone(), self.model_b_id)
    }

    pub fn involves(&self, model: &ModelRef) -> bool {
        (self.model_a_type == model.model_type && self.model_a_id == model.model_id)
            || (self.model_b_type == model.model_type && self.model_b_id == model.model_id)
    }

    /// The side of the pair that is not `model`. A row pairing a record with
    /// itself returns the record.
    pub fn counterpart(&self, model: &ModelRef) -> Option<ModelRef> {
        if self.model_a_type == model.model_type && self.model_a_id == model.model_id {
            Some(self.model_b())
        } else if self.model_b_type == model.model_type && self.model_b_id == model.model_id {
            Some(self.model_a())
        } else {
            None
        }
    }

    pub fn is_normalized(&self) -> bool {
        (&self.model_a_type, self.model_a_id) <= (&self.model_b_type, self.model_b_id)
    }
}

/// The columns of a spatial model row that this crate reads and writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRow {
    pub spatial_model_type: String,
    pub spatial_model_id: i64,
    pub class_name: String,
    pub features_hash: Option<String>,
    pub features_area: Option<f64>,
    pub spatial_processing_status_cache: BTreeMap<String, TaskStatus>,
}

impl ModelRow {
    pub fn model_ref(&self) -> ModelRef {
        ModelRef::new(self.spatial_model_type.clone(), self.spatial_model_id)
    }
}
