use std::path::Path;

use common_exception::{SpatialError, SpatialResult};

/// Sidecar files a shapefile archive must contain. The `.shp` file comes
/// first so a generic zip without one can be recognized.
pub const REQUIRED_SHAPEFILE_COMPONENT_EXTENSIONS: [&str; 4] = ["shp", "shx", "dbf", "prj"];

/// Checks that a shapefile archive holds every required component.
///
/// A missing `.prj` is accepted when a default proj4 projection is supplied.
/// With `allow_generic_zip_files`, an archive without a `.shp` file is not a
/// shapefile archive and passes untouched. Returns whether the archive was
/// validated as a shapefile.
pub fn validate_shapefile_archive<S: AsRef<str>>(
    archive_path: &str, entry_names: &[S], default_proj4_projection: Option<&str>,
    allow_generic_zip_files: bool,
) -> SpatialResult<bool> {
    let extensions: Vec<String> = entry_names
        .iter()
        .filter_map(|name| {
            Path::new(name.as_ref())
                .extension()
                .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        })
        .collect();

    for ext in REQUIRED_SHAPEFILE_COMPONENT_EXTENSIONS {
        if extensions.iter().any(|found| found == ext) {
            continue;
        }

        match ext {
            "shp" if allow_generic_zip_files => return Ok(false),
            "prj" if default_proj4_projection.is_some() => continue,
            "prj" => {
                return Err(SpatialError::IndeterminateProjection(
                    expected_component_path(archive_path, ext),
                ));
            }
            _ => {
                return Err(SpatialError::IncompleteShapefileArchive(
                    expected_component_path(archive_path, ext),
                ));
            }
        }
    }

    Ok(true)
}

fn expected_component_path(archive_path: &str, ext: &str) -> String {
    let stem = Path::new(archive_path)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{stem}.{ext}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_archive() {
        let entries = ["parcels.SHP", "parcels.shx", "parcels.dbf", "parcels.prj"];
        assert!(validate_shapefile_archive("parcels.zip", &entries, None, false).unwrap());
    }

    #[test]
    fn test_missing_sidecar() {
        let entries = ["parcels.shp", "parcels.dbf", "parcels.prj"];
        let err =
            validate_shapefile_archive("/tmp/parcels.zip", &entries, None, false).unwrap_err();
        assert!(matches!(
            err,
            SpatialError::IncompleteShapefileArchive(ref path) if path == "parcels.shx"
        ));
    }

    #[test]
    fn test_missing_projection() {
        let entries = ["parcels.shp", "parcels.shx", "parcels.dbf"];
        let err = validate_shapefile_archive("parcels.zip", &entries, None, false).unwrap_err();
        assert!(matches!(err, SpatialError::IndeterminateProjection(_)));

        let default = Some("+proj=longlat +datum=WGS84 +no_defs");
        assert!(validate_shapefile_archive("parcels.zip", &entries, default, false).unwrap());
    }

    #[test]
    fn test_generic_zip() {
        let entries = ["readme.txt"];
        assert!(!validate_shapefile_archive("docs.zip", &entries, None, true).unwrap());
        assert!(validate_shapefile_archive("docs.zip", &entries, None, false).is_err());
    }
}
