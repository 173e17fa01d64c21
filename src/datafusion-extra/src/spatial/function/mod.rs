mod area;
mod args;
mod collection_extract;
mod distance;
mod dwithin;
mod geom_from_text;
mod intersection;
mod intersects;
mod union;

use datafusion::prelude::SessionContext;

pub fn register_spatial_udfs(ctx: &SessionContext) {
    ctx.register_udf(intersects::st_intersects());
    ctx.register_udf(dwithin::st_dwithin());
    ctx.register_udf(distance::st_distance());
    ctx.register_udf(area::st_area());
    ctx.register_udf(intersection::st_intersection());
    ctx.register_udf(collection_extract::st_collection_extract());
    ctx.register_udf(geom_from_text::st_geomfromtext());
    ctx.register_udaf(union::st_union());
}
