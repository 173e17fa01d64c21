use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Result, bail};
use serde::Deserialize;
use spatial_features::{ModelClass, Projection, Record, Scope, SpatialConfig, Target};

/// Everything one run does: the classes to register, the records to import,
/// the classes to cache proximity between, and the queries to answer.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    #[serde(default)]
    pub config: SpatialConfig,
    pub classes: Vec<ClassEntry>,
    #[serde(default)]
    pub records: Vec<RecordEntry>,
    #[serde(default)]
    pub cache: Vec<String>,
    #[serde(default)]
    pub queries: Vec<QueryEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClassEntry {
    pub name: String,
    /// Must be declared before this class.
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub features_hash: bool,
    #[serde(default)]
    pub features_area: bool,
    #[serde(default = "default_true")]
    pub make_valid: bool,
    #[serde(default)]
    pub projection: Option<Projection>,
    #[serde(default)]
    pub proximity_classes: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecordEntry {
    pub class: String,
    /// Inline WKT, one geometry per entry.
    #[serde(default)]
    pub wkt: Vec<String>,
    /// Path of a GeoJSON file.
    #[serde(default)]
    pub geojson: Option<PathBuf>,
    #[serde(default)]
    pub skip_invalid: bool,
    #[serde(default)]
    pub allow_blank: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryEntry {
    pub subject: String,
    pub other: OtherEntry,
    pub buffer: Option<f64>,
    #[serde(default = "default_true")]
    pub cache: bool,
    #[serde(default)]
    pub distance: bool,
    #[serde(default)]
    pub intersection_area: bool,
}

/// A whole class, or one record of it when `id` is given.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OtherEntry {
    pub class: String,
    #[serde(default)]
    pub id: Option<i64>,
}

impl OtherEntry {
    pub fn target(&self) -> Target {
        match self.id {
            Some(id) => Target::Record(Record::new(self.class.clone(), id)),
            None => Target::Scope(Scope::class(self.class.clone())),
        }
    }
}

fn default_true() -> bool {
    true
}

impl Manifest {
    pub fn model_classes(&self) -> Result<Vec<ModelClass>> {
        let mut declared: HashMap<&str, ModelClass> = HashMap::new();
        let mut classes = Vec::with_capacity(self.classes.len());

        for entry in &self.classes {
            let mut class = ModelClass::new(entry.name.clone())
                .with_proximity_classes(entry.proximity_classes.iter().cloned());
            if let Some(parent) = &entry.parent {
                let Some(parent) = declared.get(parent.as_str()) else {
                    bail!("class {} names undeclared parent {parent}", entry.name);
                };
                class = class.subclass_of(parent);
            }
            if entry.features_hash {
                class = class.with_features_hash();
            }
            if entry.features_area {
                class = class.with_features_area();
            }
            if !entry.make_valid {
                class = class.without_make_valid();
            }
            if let Some(projection) = &entry.projection {
                class = class.with_projection(projection.clone());
            }

            declared.insert(entry.name.as_str(), class.clone());
            classes.push(class);
        }
        Ok(classes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_manifest() {
        let manifest: Manifest = serde_json::from_str(
            r#"{
                "config": {"projection": "identity"},
                "classes": [
                    {"name": "House", "features_hash": true},
                    {"name": "Cabin", "parent": "House"},
                    {"name": "Parcel", "make_valid": false}
                ],
                "records": [{"class": "Cabin", "wkt": ["POINT(1 1)"]}],
                "cache": ["House", "Parcel"],
                "queries": [{"subject": "Parcel", "other": {"class": "House", "id": 1}, "buffer": 0}]
            }"#,
        )
        .unwrap();

        let classes = manifest.model_classes().unwrap();
        assert_eq!(classes[1].base_class, "House");
        assert!(!classes[2].make_valid);
        assert!(manifest.queries[0].cache);
        assert_eq!(
            manifest.queries[0].other.target(),
            Target::Record(Record::new("House", 1))
        );
    }

    #[test]
    fn test_parent_must_come_first() {
        let manifest: Manifest = serde_json::from_str(
            r#"{"classes": [{"name": "Cabin", "parent": "House"}, {"name": "House"}]}"#,
        )
        .unwrap();
        assert!(manifest.model_classes().is_err());
    }
}
