use std::collections::BTreeMap;
use std::sync::OnceLock;

use common_utils::hex_digest;
use geozero::geojson::GeoJson;
use geozero::{CoordDimensions, ToWkb};
use serde_json::Value;

use super::{Importer, RawFeature};

/// Reads a GeoJSON `FeatureCollection`, a single `Feature`, or a bare
/// geometry. Scalar feature properties become metadata, and a `name`
/// property names the feature.
#[derive(Debug)]
pub struct GeoJsonImporter {
    data: String,
    source_identifier: Option<String>,
    cache_key: OnceLock<String>,
    parsed: OnceLock<(Vec<RawFeature>, Vec<String>)>,
}

impl GeoJsonImporter {
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            source_identifier: None,
            cache_key: OnceLock::new(),
            parsed: OnceLock::new(),
        }
    }

    pub fn with_source_identifier(mut self, source_identifier: impl Into<String>) -> Self {
        self.source_identifier = Some(source_identifier.into());
        self
    }

    fn parsed(&self) -> &(Vec<RawFeature>, Vec<String>) {
        self.parsed.get_or_init(|| self.parse())
    }

    fn parse(&self) -> (Vec<RawFeature>, Vec<String>) {
        let mut features = Vec::new();
        let mut errors = Vec::new();

        let document: Value = match serde_json::from_str(&self.data) {
            Ok(document) => document,
            Err(e) => return (features, vec![format!("Invalid GeoJSON: {e}")]),
        };

        let items = match document.get("type").and_then(Value::as_str) {
            Some("FeatureCollection") => {
                document
                    .get("features")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default()
            }
            Some("Feature") => vec![document],
            Some(_) => {
                vec![serde_json::json!({ "type": "Feature", "geometry": document })]
            }
            None => return (features, vec!["GeoJSON has no type".to_owned()]),
        };

        for (index, item) in items.iter().enumerate() {
            match self.feature(item) {
                Ok(feature) => features.push(feature),
                Err(e) => errors.push(format!("Feature {}: {e}", index + 1)),
            }
        }

        (features, errors)
    }

    fn feature(&self, item: &Value) -> Result<RawFeature, String> {
        let geometry = item
            .get("geometry")
            .filter(|geometry| !geometry.is_null())
            .ok_or_else(|| "missing geometry".to_owned())?;
        let geog = GeoJson(&geometry.to_string())
            .to_wkb(CoordDimensions::xy())
            .map_err(|e| e.to_string())?;

        let mut metadata = BTreeMap::new();
        if let Some(properties) = item.get("properties").and_then(Value::as_object) {
            for (key, value) in properties {
                let value = match value {
                    Value::String(s) => s.clone(),
                    Value::Number(_) | Value::Bool(_) => value.to_string(),
                    _ => continue,
                };
                metadata.insert(key.clone(), value);
            }
        }

        Ok(RawFeature {
            name: metadata.get("name").cloned(),
            metadata,
            feature_type: geometry
                .get("type")
                .and_then(Value::as_str)
                .map(str::to_owned),
            geog,
            source_identifier: self.source_identifier.clone(),
        })
    }
}

impl Importer for GeoJsonImporter {
    fn features(&self) -> &[RawFeature] {
        &self.parsed().0
    }

    fn cache_key(&self) -> &str {
        self.cache_key.get_or_init(|| hex_digest(&self.data))
    }

    fn errors(&self) -> &[String] {
        &self.parsed().1
    }
}
