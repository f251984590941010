use std::sync::Arc;

use axum::{
    Json,
    extract::{
        Extension, Path, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
};
use shared::models::{
    CleanExpiredResponse, CreateIpAllowRequest, IpAllow, IpAllowCheck, IpQuery, Page, PageQuery,
};
use tracing::info;

use crate::{
    app_state::AppState,
    http::{envelope::ApiResponse, error::AppResult},
    middleware::request_context::RequestContext,
};

const ALLOW_PAGE_SIZE: u32 = 20;

#[utoipa::path(
    get,
    path = "/api/admin/ip-whitelist",
    params(PageQuery),
    responses((status = 200, description = "Whitelist entries, newest first", body = Page<IpAllow>)),
    security(("bearer" = [])),
    tag = "IP whitelist"
)]
pub async fn list(
    State(state): State<Arc<AppState>>,
    query: Result<Query<PageQuery>, QueryRejection>,
) -> AppResult<ApiResponse<Page<IpAllow>>> {
    let Query(query) = query?;
    let (page, page_size) = query.resolve(ALLOW_PAGE_SIZE);
    Ok(ApiResponse(state.whitelist.list(page, page_size).await?))
}

#[utoipa::path(
    post,
    path = "/api/admin/ip-whitelist",
    request_body = CreateIpAllowRequest,
    responses(
        (status = 200, description = "Entry stored", body = IpAllow),
        (status = 400, description = "Not an address or block, or already whitelisted")
    ),
    security(("bearer" = [])),
    tag = "IP whitelist"
)]
pub async fn create(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    payload: Result<Json<CreateIpAllowRequest>, JsonRejection>,
) -> AppResult<ApiResponse<IpAllow>> {
    let Json(request) = payload?;
    let entry = state.whitelist.create(request).await?;
    info!(
        allow_id = entry.id,
        request_id = %context.request_id,
        "whitelist entry created from moderation panel"
    );
    Ok(ApiResponse(entry))
}

#[utoipa::path(
    delete,
    path = "/api/admin/ip-whitelist/{id}",
    params(("id" = i64, Path, description = "Whitelist entry id")),
    responses(
        (status = 200, description = "Entry removed"),
        (status = 404, description = "Unknown entry")
    ),
    security(("bearer" = [])),
    tag = "IP whitelist"
)]
pub async fn delete(
    State(state): State<Arc<AppState>>,
    id: Result<Path<i64>, PathRejection>,
) -> AppResult<ApiResponse<()>> {
    let Path(id) = id?;
    state.whitelist.delete(id).await?;
    Ok(ApiResponse(()))
}

#[utoipa::path(
    get,
    path = "/api/admin/ip-whitelist/check",
    params(IpQuery),
    responses(
        (status = 200, description = "Whether an unexpired entry covers the address", body = IpAllowCheck),
        (status = 400, description = "Not an IP address")
    ),
    security(("bearer" = [])),
    tag = "IP whitelist"
)]
pub async fn check(
    State(state): State<Arc<AppState>>,
    query: Result<Query<IpQuery>, QueryRejection>,
) -> AppResult<ApiResponse<IpAllowCheck>> {
    let Query(query) = query?;
    Ok(ApiResponse(state.whitelist.check(&query.ip).await?))
}

#[utoipa::path(
    post,
    path = "/api/admin/ip-whitelist/clean-expired",
    responses((status = 200, description = "Expired entries removed", body = CleanExpiredResponse)),
    security(("bearer" = [])),
    tag = "IP whitelist"
)]
pub async fn clean_expired(
    State(state): State<Arc<AppState>>,
) -> AppResult<ApiResponse<CleanExpiredResponse>> {
    Ok(ApiResponse(state.whitelist.clean_expired().await?))
}
