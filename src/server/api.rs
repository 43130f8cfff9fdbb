use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum_auth::AuthBearer;
use log::info;

use super::error::{AppError, Result};
use super::state::AppState;
use super::types::*;
use crate::metrics;

/// 获取扫描进度
#[utoipa::path(
    get,
    path = "/progress",
    responses(
        (status = 200, body = ProgressResponse),
    )
)]
pub async fn progress_handler(State(state): State<Arc<AppState>>) -> Json<ProgressResponse> {
    let channel = state.scanner.channel();
    Json(ProgressResponse::new(channel.progress(), channel.phase()))
}

/// 获取分组列表，未分类固定在最后
#[utoipa::path(
    get,
    path = "/groups",
    responses(
        (status = 200, body = Vec<GroupRow>),
    )
)]
pub async fn groups_handler(State(state): State<Arc<AppState>>) -> Json<Vec<GroupRow>> {
    let rows = state.scanner.channel().summary();
    Json(rows.into_iter().map(GroupRow::from).collect())
}

/// 获取某个分组的素材
#[utoipa::path(
    get,
    path = "/groups/{name}",
    params(("name" = String, Path, description = "分组名，不区分大小写")),
    responses(
        (status = 200, body = ItemsResponse),
        (status = 404, description = "分组不存在"),
    )
)]
pub async fn group_items_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<ItemsResponse>> {
    let group = state
        .scanner
        .classifier()
        .groups()
        .iter()
        .find(|g| g.name().eq_ignore_ascii_case(&name))
        .ok_or_else(|| AppError::NotFound(name.clone()))?;
    let items = state.scanner.items_for(Some(group));
    Ok(Json(ItemsResponse::new(Some(group.name().to_owned()), items)))
}

/// 获取未分类的素材
#[utoipa::path(
    get,
    path = "/others",
    responses(
        (status = 200, body = ItemsResponse),
    )
)]
pub async fn others_handler(State(state): State<Arc<AppState>>) -> Json<ItemsResponse> {
    Json(ItemsResponse::new(None, state.scanner.items_for(None)))
}

/// 开始或继续扫描，已有扫描时不做任何事
#[utoipa::path(
    post,
    path = "/scan",
    responses(
        (status = 200, body = StartResponse),
        (status = 401, description = "token 错误"),
    )
)]
pub async fn scan_handler(
    State(state): State<Arc<AppState>>,
    AuthBearer(token): AuthBearer,
) -> Result<Json<StartResponse>> {
    if !state.check_token(&token) {
        return Err(AppError::Unauthorized);
    }
    let outcome = state.scanner.start().await?;
    info!("收到扫描请求: {:?}", outcome);
    Ok(Json(StartResponse::from(outcome)))
}

/// 取消正在进行的扫描
#[utoipa::path(
    post,
    path = "/cancel",
    responses(
        (status = 200),
        (status = 401, description = "token 错误"),
    )
)]
pub async fn cancel_handler(State(state): State<Arc<AppState>>, AuthBearer(token): AuthBearer) -> Result<()> {
    if !state.check_token(&token) {
        return Err(AppError::Unauthorized);
    }
    if state.scanner.is_running() {
        info!("取消扫描");
        state.scanner.cancel();
    }
    Ok(())
}

/// 以 prometheus 文本格式导出指标
#[utoipa::path(get, path = "/metrics")]
pub async fn metrics_handler() -> Result<String> {
    Ok(metrics::gather_text()?)
}
