mod common;

use common::*;
use spatial_features::{
    FeatureType, GeoJsonImporter, ImportOptions, Importer, ModelClass, Scope, SpatialContext,
    SpatialError,
};

const BOWTIE: &str = "POLYGON((0 0,1 1,1 0,0 1,0 0))";

fn strict_context() -> SpatialContext {
    SpatialContext::builder()
        .register(ModelClass::new("Survey").without_make_valid())
        .register(ModelClass::new("House"))
        .config(planar_config())
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_invalid_feature_fails_whole_import() {
    let ctx = strict_context();
    let survey = ctx.create_record("Survey").unwrap();
    ctx.update_features_with(&survey, &wkt(&[TRIANGLE]), Default::default())
        .await
        .unwrap();

    let err = ctx
        .update_features_with(&survey, &wkt(&[SQUARE, BOWTIE]), Default::default())
        .await
        .unwrap_err();
    match err {
        SpatialError::Import { errors, .. } => {
            assert_eq!(errors.len(), 1);
            assert!(errors[0].starts_with("Feature #2: Self-intersection"));
        }
        other => panic!("unexpected error {other}"),
    }

    // the earlier features survive the failed replace
    let features = ctx.features().features(&Scope::record(&survey).unwrap());
    assert_eq!(features.len(), 1);
    let area = ctx.features().area_in_square_meters(&Scope::record(&survey).unwrap());
    assert_close(area.unwrap(), 0.5);
}

#[tokio::test]
async fn test_skip_invalid_keeps_valid_features() {
    let ctx = strict_context();
    let survey = ctx.create_record("Survey").unwrap();
    let options = ImportOptions {
        skip_invalid: true,
        ..Default::default()
    };

    ctx.update_features_with(&survey, &wkt(&[SQUARE, BOWTIE, "not a geometry"]), options)
        .await
        .unwrap();
    let features = ctx.features().features(&Scope::record(&survey).unwrap());
    assert_eq!(features.len(), 1);
    assert_eq!(features[0].feature_type, FeatureType::Polygon);

    let err = ctx
        .update_features_with(&survey, &wkt(&[BOWTIE]), options)
        .await
        .unwrap_err();
    assert!(matches!(err, SpatialError::EmptyResult(_)));

    let blank = ImportOptions {
        skip_invalid: true,
        allow_blank: true,
    };
    ctx.update_features_with(&survey, &wkt(&[BOWTIE]), blank)
        .await
        .unwrap();
    assert!(ctx.features().features(&Scope::record(&survey).unwrap()).is_empty());
}

#[tokio::test]
async fn test_invalid_geometry_is_repaired_once() {
    let ctx = strict_context();
    let house = ctx.create_record("House").unwrap();
    let importers = wkt(&[BOWTIE, "POINT(3 4)", "LINESTRING(0 0,5 5)"]);
    ctx.update_features_with(&house, &importers, Default::default())
        .await
        .unwrap();

    let scope = Scope::record(&house).unwrap();
    assert_eq!(ctx.features().polygons(&scope).len(), 1);
    assert_eq!(ctx.features().points(&scope).len(), 1);
    assert_eq!(ctx.features().lines(&scope).len(), 1);
    assert!(ctx.features().invalid_features(&house).unwrap().is_empty());

    let validated = ctx
        .features()
        .validate_geometry(&ctx.backend().parse_wkt(BOWTIE).unwrap(), true)
        .unwrap();
    assert_eq!(validated.repair_attempts, 1);
    assert_eq!(validated.error, None);

    let rejected = ctx
        .features()
        .validate_geometry(&ctx.backend().parse_wkt(BOWTIE).unwrap(), false)
        .unwrap();
    assert_eq!(rejected.repair_attempts, 0);
    assert!(rejected.error.is_some());
}

#[tokio::test]
async fn test_derived_columns() {
    let ctx = strict_context();
    let house = ctx.create_record("House").unwrap();
    ctx.update_features_with(
        &house,
        &wkt(&[
            "garden\tPOLYGON((0 0,4 0,4 2,0 2,0 0))",
            "POLYGON((10 10,11 10,11 11,10 11,10 10))",
        ]),
        Default::default(),
    )
    .await
    .unwrap();

    let scope = Scope::record(&house).unwrap();
    let features = ctx.features().features(&scope);
    let garden = features
        .iter()
        .find(|row| row.name.as_deref() == Some("garden"))
        .unwrap();
    assert_close(garden.derived.area.unwrap(), 8.0);
    assert!(garden.derived.geom_lowres.is_some());
    assert!(garden.derived.tilegeom.is_some());
    assert!(garden.derived.centroid.is_some());

    let bounds = ctx.features().bounds(&scope).unwrap();
    assert_eq!((bounds.west, bounds.south, bounds.east, bounds.north), (0.0, 0.0, 11.0, 11.0));

    let key = ctx.features().features_cache_key(&scope);
    ctx.update_features_with(&house, &wkt(&[SQUARE]), Default::default())
        .await
        .unwrap();
    assert_ne!(ctx.features().features_cache_key(&scope), key);

    let aggregate = ctx.aggregates().aggregate(&house).unwrap();
    let refreshed = ctx.aggregates().refresh(&house).unwrap();
    assert!(refreshed.id > aggregate.id);
    assert_eq!(ctx.features().with_features("House").len(), 1);
    assert!(ctx.features().without_features("House").is_empty());
}

#[tokio::test]
async fn test_geojson_metadata() {
    let ctx = strict_context();
    let house = ctx.create_record("House").unwrap();
    let importer = GeoJsonImporter::new(
        r#"{"type": "FeatureCollection", "features": [
            {"type": "Feature", "properties": {"name": "Lot", "zone": "R1"},
             "geometry": {"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,1],[0,0]]]}},
            {"type": "Feature", "properties": {"zone": "C2"},
             "geometry": {"type": "Point", "coordinates": [5, 5]}}
        ]}"#,
    );
    let importers: Vec<Box<dyn Importer>> = vec![Box::new(importer)];
    ctx.update_features_with(&house, &importers, Default::default())
        .await
        .unwrap();

    let scope = Scope::record(&house).unwrap();
    let residential = ctx.features().with_metadata(&scope, "zone", "R1");
    assert_eq!(residential.len(), 1);
    assert_eq!(residential[0].display_name(), "Lot");
    assert_eq!(ctx.features().with_metadata(&scope, "zone", "").len(), 2);
}
