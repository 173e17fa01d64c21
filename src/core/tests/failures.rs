mod common;

use std::sync::Arc;

use common::*;
use common_telemetry::init_test_logging;
use spatial_features::{
    BufferOptions, ModelClass, QueryPath, Record, Scope, SpatialContext, SpatialError, Target,
};

/// Plots cache their proximity to parcels on import. Neither class keeps a
/// features area, so imports never union polygons.
fn failing_context(backend: &Arc<FailingBackend>) -> SpatialContext {
    init_test_logging();
    SpatialContext::builder()
        .register(
            ModelClass::new("Plot")
                .with_features_hash()
                .with_proximity_classes(["Parcel"]),
        )
        .register(ModelClass::new("Parcel"))
        .backend(backend.clone())
        .config(planar_config())
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_failed_record_does_not_stop_the_batch() {
    let backend = Arc::new(FailingBackend::default());
    let ctx = failing_context(&backend);
    let near = record_with(&ctx, "Plot", &[SQUARE]).await;
    let far = record_with(&ctx, "Plot", &[FAR_AWAY]).await;
    let parcel = record_with(&ctx, "Parcel", &[TRIANGLE]).await;

    backend.arm(true);
    let err = ctx
        .cache_builder()
        .cache_proximity(&["Plot", "Parcel"])
        .await
        .unwrap_err();
    let failures = match err {
        SpatialError::CacheBatch(failures) => failures,
        other => panic!("expected a batch failure, got {other:?}"),
    };
    // once against plots, once against parcels
    assert_eq!(failures.len(), 2);
    for failure in &failures {
        assert_eq!(failure.record, model(&ctx, &far).to_string());
        assert!(matches!(failure.error, SpatialError::GeometryBackend(_)));
    }

    let proximity = ctx.proximity();
    assert!(proximity.is_cache_valid_for(&near, "Parcel", Some(0.0)).unwrap());
    assert!(!proximity.is_cache_valid_for(&far, "Parcel", Some(0.0)).unwrap());
    // the parcel side is only marked when every plot succeeded
    assert!(!proximity.is_cache_valid_for(&parcel, "Plot", Some(0.0)).unwrap());
    let neighbours = proximity
        .neighbours(&near, &Scope::class("Parcel"))
        .unwrap();
    assert_eq!(neighbours.len(), 1);
    assert_eq!(neighbours[0].model, model(&ctx, &parcel));
}

#[tokio::test]
async fn test_failed_cache_refresh_allows_retry() {
    let backend = Arc::new(FailingBackend::default());
    let ctx = failing_context(&backend);
    let parcel = record_with(&ctx, "Parcel", &[TRIANGLE]).await;
    let plot = record_with(&ctx, "Plot", &[SQUARE]).await;
    let parcels = Scope::class("Parcel");
    let other = Target::Record(plot.clone());
    assert_eq!(
        ctx.planner().intersecting(&parcels, &other).await.unwrap().models(),
        vec![model(&ctx, &parcel)]
    );

    backend.arm(true);
    let err = ctx
        .update_features_with(&plot, &wkt(&[FAR_AWAY]), Default::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SpatialError::GeometryBackend(_)));

    // the old proximity is no longer served
    assert!(
        !ctx.proximity()
            .is_cache_valid_for(&plot, "Parcel", Some(0.0))
            .unwrap()
    );
    let result = ctx.planner().intersecting(&parcels, &other).await.unwrap();
    assert!(result.is_cache_miss());

    backend.arm(false);
    let retried = ctx
        .update_features_with(&plot, &wkt(&[FAR_AWAY]), Default::default())
        .await
        .unwrap();
    assert!(retried);
    let result = ctx.planner().intersecting(&parcels, &other).await.unwrap();
    assert_eq!(result.path, QueryPath::CacheHit);
    assert!(!result.exists());

    // now the same importers are skipped
    assert!(
        !ctx.update_features_with(&plot, &wkt(&[FAR_AWAY]), Default::default())
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn test_features_changed_while_caching() {
    let backend = Arc::new(FailingBackend::default());
    let ctx = SpatialContext::builder()
        .register(ModelClass::new("Plot"))
        .register(ModelClass::new("Parcel"))
        .backend(backend.clone())
        .config(planar_config())
        .build()
        .unwrap();
    let plot = record_with(&ctx, "Plot", &[SQUARE]).await;
    let parcel = record_with(&ctx, "Parcel", &[TRIANGLE]).await;

    let writer = ctx.clone();
    let target = plot.clone();
    backend.before_union(move || {
        writer
            .features()
            .replace_features(&target, &wkt(&[OUTLIER]), Default::default())
            .unwrap();
    });

    let builder = ctx.cache_builder();
    let err = builder
        .cache_record_proximity(&plot, "Parcel")
        .await
        .unwrap_err();
    assert!(matches!(err, SpatialError::ConcurrencyConflict { .. }));
    assert!(ctx.proximity().caches_for(&plot).unwrap().is_empty());
    assert!(proximity_facts(&ctx).is_empty());

    builder.cache_record_proximity(&plot, "Parcel").await.unwrap();
    let facts = proximity_facts(&ctx);
    assert_eq!(facts.len(), 1);
    assert_eq!(facts[0].0, model(&ctx, &parcel));
    assert_eq!(facts[0].1, model(&ctx, &plot));
    assert_close(facts[0].2.unwrap(), 1.0);
}

#[tokio::test]
async fn test_unpersisted_target_short_circuits() {
    let ctx = context();
    record_with(&ctx, "Parcel", &[TRIANGLE]).await;
    let parcels = Scope::class("Parcel");
    let unsaved = Target::Record(Record::unpersisted("House"));

    for options in [BufferOptions::default(), BufferOptions::live().with_distance()] {
        let result = ctx
            .planner()
            .within_buffer(&parcels, &unsaved, Some(10.0), options)
            .await
            .unwrap();
        assert_eq!(result.path, QueryPath::Unpersisted);
        assert!(!result.exists());
    }
    assert!(!ctx.planner().intersects(&parcels, &unsaved).await.unwrap());
}

#[tokio::test]
async fn test_malformed_buffer_is_rejected() {
    let ctx = context();
    let house = record_with(&ctx, "House", &[SQUARE]).await;
    let parcels = Scope::class("Parcel");
    let other = Target::Record(house);

    for buffer in [-1.0, -0.0001, f64::NAN] {
        for options in [BufferOptions::default(), BufferOptions::live()] {
            let err = ctx
                .planner()
                .within_buffer(&parcels, &other, Some(buffer), options)
                .await
                .unwrap_err();
            assert!(matches!(err, SpatialError::InvalidInput(_)), "{buffer}");
        }
    }
}
