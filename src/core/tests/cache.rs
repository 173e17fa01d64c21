mod common;

use common::*;
use spatial_features::{ModelClass, Scope, SpatialConfig, SpatialContext, Target};

fn deferred_context(adjust: impl FnOnce(&mut SpatialConfig)) -> SpatialContext {
    let mut config = planar_config();
    adjust(&mut config);
    SpatialContext::builder()
        .register(ModelClass::new("Plot"))
        .config(config)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_clear_and_update_proximity() {
    let ctx = context();
    let house = record_with(&ctx, "House", &[SQUARE]).await;
    let parcel = record_with(&ctx, "Parcel", &[TRIANGLE]).await;
    let outlier = record_with(&ctx, "Parcel", &[OUTLIER]).await;
    let builder = ctx.cache_builder();
    let houses = Scope::class("House");
    let parcels = Scope::class("Parcel");

    builder.cache_proximity(&["House", "Parcel"]).await.unwrap();
    let proximity = ctx.proximity();
    assert_eq!(
        proximity.with_spatial_cache("House", "Parcel").unwrap(),
        vec![model(&ctx, &house)]
    );
    assert!(
        proximity
            .without_spatial_cache("Parcel", "House")
            .unwrap()
            .is_empty()
    );
    assert_eq!(proximity.between(&houses, &parcels).unwrap().len(), 2);

    builder.clear_record_cache(&house, "Parcel").unwrap();
    assert_eq!(
        proximity.without_spatial_cache("House", "Parcel").unwrap(),
        vec![model(&ctx, &house)]
    );
    assert!(proximity.between(&houses, &parcels).unwrap().is_empty());
    // the parcels keep their own markers
    assert_eq!(
        proximity.with_spatial_cache("Parcel", "House").unwrap(),
        vec![model(&ctx, &parcel), model(&ctx, &outlier)]
    );

    // only the house lost a marker
    let refreshed = builder.update_proximity(&["House", "Parcel"]).await.unwrap();
    assert_eq!(refreshed, 1);
    assert_eq!(proximity.between(&houses, &parcels).unwrap().len(), 2);
    assert_eq!(
        builder.update_proximity(&["House", "Parcel"]).await.unwrap(),
        0
    );

    builder.clear_cache(Some("Parcel"), None).unwrap();
    assert!(
        proximity
            .with_spatial_cache("Parcel", "Parcel")
            .unwrap()
            .is_empty()
    );
    assert!(
        proximity
            .with_spatial_cache("House", "Parcel")
            .unwrap()
            .is_empty()
    );
    assert_eq!(
        proximity.with_spatial_cache("House", "House").unwrap(),
        vec![model(&ctx, &house)]
    );
    let facts = proximity_facts(&ctx);
    assert_eq!(facts.len(), 1);
    assert_eq!(facts[0].0, model(&ctx, &house));
    assert_eq!(facts[0].1, model(&ctx, &house));
    assert_close(facts[0].3.unwrap(), 1.0);

    builder.clear_cache(None, None).unwrap();
    assert!(proximity_facts(&ctx).is_empty());
    assert!(proximity.caches_for(&house).unwrap().is_empty());
}

#[tokio::test]
async fn test_intersecting_reads_the_cache() {
    let ctx = context();
    let house = record_with(&ctx, "House", &[SQUARE]).await;
    let parcel = record_with(&ctx, "Parcel", &[TRIANGLE]).await;
    record_with(&ctx, "Parcel", &[OUTLIER]).await;
    let parcels = Scope::class("Parcel");
    let other = Target::Record(house);

    let before = ctx.planner().intersecting(&parcels, &other).await.unwrap();
    assert!(before.is_cache_miss());
    assert!(!before.exists());

    ctx.cache_builder()
        .cache_proximity(&["House", "Parcel"])
        .await
        .unwrap();
    let after = ctx.planner().intersecting(&parcels, &other).await.unwrap();
    assert_eq!(after.models(), vec![model(&ctx, &parcel)]);
    assert!(ctx.planner().intersects(&parcels, &other).await.unwrap());
}

#[tokio::test]
async fn test_cache_derivatives_fills_deferred_columns() {
    let ctx = deferred_context(|config| config.automatically_cache_derivatives = false);
    let plot = record_with(&ctx, "Plot", &[SQUARE]).await;
    let scope = Scope::record(&plot).unwrap();

    let features = ctx.features().features(&scope);
    assert_eq!(features[0].derived.geom_lowres, None);
    let ids: Vec<i64> = features.iter().map(|row| row.id).collect();

    assert_eq!(ctx.features().cache_derivatives(&ids).unwrap(), 1);
    let derived = &ctx.features().features(&scope)[0].derived;
    assert!(derived.geom_lowres.is_some());
    assert_close(derived.area.unwrap(), 1.0);

    assert_eq!(ctx.features().cache_derivatives(&[9999]).unwrap(), 0);
}

#[tokio::test]
async fn test_refresh_all_builds_deferred_aggregates() {
    let ctx = deferred_context(|config| config.automatically_refresh_aggregate = false);
    let first = record_with(&ctx, "Plot", &[SQUARE]).await;
    record_with(&ctx, "Plot", &[TRIANGLE, OUTLIER]).await;
    ctx.create_record("Plot").unwrap();
    assert_eq!(ctx.store().read(|tables| tables.aggregate_features.len()), 0);

    assert_eq!(ctx.aggregates().refresh_all().unwrap(), 2);
    assert_eq!(ctx.store().read(|tables| tables.aggregate_features.len()), 2);

    let aggregate = ctx.aggregates().aggregate(&first).unwrap();
    assert_close(aggregate.derived.area.unwrap(), 1.0);
}
