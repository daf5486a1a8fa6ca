pub mod api;
pub mod config;
pub mod infrastructure;
pub mod models;
pub mod services;
pub mod utils;

use crate::config::ServiceConfig;
use crate::services::codec::renderer_for;
use crate::services::pipeline::ConversionPipeline;
use crate::services::store::EphemeralStore;
use crate::services::usage::UsageCounters;
use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::convert::jpg_to_pdf,
        api::handlers::convert::pdf_to_jpg,
        api::handlers::health::home,
        api::handlers::health::health_check,
        api::handlers::stats::get_stats,
    ),
    components(
        schemas(
            api::handlers::convert::AssembleForm,
            api::handlers::convert::SplitForm,
            api::handlers::health::StatusResponse,
            api::handlers::health::HealthResponse,
            models::UsageSnapshot,
        )
    ),
    tags(
        (name = "convert", description = "Image and PDF conversion endpoints"),
        (name = "system", description = "Health and usage endpoints")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<EphemeralStore>,
    pub counters: Arc<UsageCounters>,
    pub pipeline: Arc<ConversionPipeline>,
    pub config: ServiceConfig,
}

impl AppState {
    /// Wire fresh counters and a pipeline around an opened store.
    pub fn new(store: Arc<EphemeralStore>, config: ServiceConfig) -> Self {
        let counters = Arc::new(UsageCounters::new());
        let pipeline = Arc::new(ConversionPipeline::new(
            store.clone(),
            counters.clone(),
            renderer_for(config.renderer),
            config.jpeg_quality,
        ));

        Self {
            store,
            counters,
            pipeline,
            config,
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/", get(api::handlers::health::home))
        .route("/health", get(api::handlers::health::health_check))
        .route("/stats", get(api::handlers::stats::get_stats))
        .route("/jpg_to_pdf", post(api::handlers::convert::jpg_to_pdf))
        .route("/assemble", post(api::handlers::convert::jpg_to_pdf))
        .route("/pdf_to_jpg", post(api::handlers::convert::pdf_to_jpg))
        .route("/split", post(api::handlers::convert::pdf_to_jpg))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
                .expose_headers(Any),
        )
        .layer(axum::extract::DefaultBodyLimit::max(
            state.config.max_content_length,
        ))
        .with_state(state)
}
