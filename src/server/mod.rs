mod api;
mod error;
mod state;
mod types;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub use self::state::*;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::progress_handler,
        api::groups_handler,
        api::group_items_handler,
        api::others_handler,
        api::scan_handler,
        api::cancel_handler,
        api::metrics_handler,
    ),
    components(schemas(types::ProgressResponse, types::GroupRow, types::ItemsResponse, types::StartResponse))
)]
pub struct ApiDoc;

/// 构建API服务器
pub fn create_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/progress", get(api::progress_handler))
        .route("/groups", get(api::groups_handler))
        .route("/groups/{name}", get(api::group_items_handler))
        .route("/others", get(api::others_handler))
        .route("/scan", post(api::scan_handler))
        .route("/cancel", post(api::cancel_handler))
        .route("/metrics", get(api::metrics_handler))
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .with_state(state)
}
