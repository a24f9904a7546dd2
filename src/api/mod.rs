mod handlers;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::kernel::SolidKernel;
use crate::pipeline::Pipeline;

pub fn create_router<K: SolidKernel>(pipeline: Pipeline<K>) -> Router {
    let api = Router::new()
        // Designs
        .route("/designs", get(handlers::list_designs::<K>))
        .route("/designs", post(handlers::create_design::<K>))
        .route("/designs/{id}", get(handlers::get_design::<K>))
        .route("/designs/{id}/refine", post(handlers::refine_design::<K>))
        .route("/designs/{id}/export", post(handlers::export_design::<K>))
        .route("/designs/{id}/snapshots", post(handlers::snapshot_design::<K>))
        .route("/designs/{id}/history", get(handlers::get_history::<K>))
        // Health
        .route("/health", get(handlers::health));

    Router::new()
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(pipeline)
}
