mod manifest;

use std::io::Write;

use anyhow::{Context, Result};
use manifest::Manifest;
use serde_json::{Value, json};
use spatial_features::{
    BufferOptions, GeoJsonImporter, ImportOptions, Importer, Scope, SpatialContext, WktImporter,
};
use tikv_jemallocator::Jemalloc;

#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

const MANIFEST_ENV: &str = "SPATIAL_FEATURES_MANIFEST";

#[tokio::main]
async fn main() -> Result<()> {
    let _guards = common_telemetry::init_logging()?;

    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var(MANIFEST_ENV).ok())
        .context("usage: spatial-features <manifest.json>")?;
    let manifest: Manifest = serde_json::from_str(
        &std::fs::read_to_string(&path).with_context(|| format!("reading {path}"))?,
    )
    .with_context(|| format!("parsing {path}"))?;

    run(manifest).await
}

async fn run(manifest: Manifest) -> Result<()> {
    let mut builder = SpatialContext::builder().config(manifest.config.clone());
    for class in manifest.model_classes()? {
        builder = builder.register(class);
    }
    let ctx = builder.build()?;

    for entry in &manifest.records {
        let record = ctx.create_record(&entry.class)?;
        let mut importers: Vec<Box<dyn Importer>> = Vec::new();
        if !entry.wkt.is_empty() {
            importers.push(Box::new(WktImporter::new(entry.wkt.join("\n"))));
        }
        if let Some(path) = &entry.geojson {
            let data = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            importers.push(Box::new(
                GeoJsonImporter::new(data).with_source_identifier(path.display().to_string()),
            ));
        }

        let options = ImportOptions {
            skip_invalid: entry.skip_invalid,
            allow_blank: entry.allow_blank,
        };
        ctx.update_features_with(&record, &importers, options)
            .await
            .with_context(|| format!("importing {record}"))?;
        let features = ctx.features().features(&Scope::record(&record)?).len();
        emit(&json!({ "imported": record, "features": features }))?;
    }

    if !manifest.cache.is_empty() {
        let classes: Vec<&str> = manifest.cache.iter().map(String::as_str).collect();
        ctx.cache_builder().cache_proximity(&classes).await?;
        let proximities = ctx.store().read(|tables| tables.spatial_proximities.len());
        emit(&json!({ "cached": classes, "proximities": proximities }))?;
    }

    for (index, query) in manifest.queries.iter().enumerate() {
        let options = BufferOptions {
            cache: query.cache,
            distance: query.distance,
            intersection_area: query.intersection_area,
        };
        let result = ctx
            .planner()
            .within_buffer(
                &Scope::class(query.subject.clone()),
                &query.other.target(),
                query.buffer,
                options,
            )
            .await?;
        emit(&json!({ "query": index, "result": result }))?;
    }

    Ok(())
}

fn emit(value: &Value) -> Result<()> {
    let mut out = std::io::stdout().lock();
    writeln!(out, "{value}")?;
    Ok(())
}
