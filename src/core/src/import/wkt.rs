use std::sync::OnceLock;

use common_utils::hex_digest;
use datafusion_extra::spatial::geos_ext::GeosExt;
use geos::Geometry;

use super::{Importer, RawFeature};

/// Reads one WKT geometry per line. A line may name its feature with a
/// `name<TAB>` prefix. Blank lines and lines starting with `#` are ignored.
#[derive(Debug)]
pub struct WktImporter {
    data: String,
    source_identifier: Option<String>,
    cache_key: OnceLock<String>,
    parsed: OnceLock<(Vec<RawFeature>, Vec<String>)>,
}

impl WktImporter {
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

        for (number, line) in self.data.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (name, wkt) = match line.split_once('\t') {
                Some((name, wkt)) => (Some(name.trim().to_owned()), wkt.trim()),
                None => (None, line),
            };

            match Geometry::new_from_wkt(wkt).and_then(|geom| geom.as_wkb()) {
                Ok(geog) => {
                    features.push(RawFeature {
                        name,
                        geog,
                        source_identifier: self.source_identifier.clone(),
                        ..Default::default()
                    });
                }
                Err(e) => errors.push(format!("Line {}: {e}", number + 1)),
            }
        }

        (features, errors)
    }
}

impl Importer for WktImporter {
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
