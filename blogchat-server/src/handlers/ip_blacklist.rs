use std::sync::Arc;

use axum::{
    Json,
    extract::{
        Extension, Path, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
};
use shared::models::{
    CleanExpiredResponse, CreateIpBanRequest, IpBan, IpBanCheck, IpQuery, Page, PageQuery,
};
use tracing::info;

use crate::{
    app_state::AppState,
    http::{envelope::ApiResponse, error::AppResult},
    middleware::request_context::RequestContext,
};

const BAN_PAGE_SIZE: u32 = 20;

#[utoipa::path(
    get,
    path = "/api/admin/ip-blacklist",
    params(PageQuery),
    responses((status = 200, description = "Stored bans, newest first", body = Page<IpBan>)),
    security(("bearer" = [])),
    tag = "IP blacklist"
)]
pub async fn list(
    State(state): State<Arc<AppState>>,
    query: Result<Query<PageQuery>, QueryRejection>,
) -> AppResult<ApiResponse<Page<IpBan>>> {
    let Query(query) = query?;
    let (page, page_size) = query.resolve(BAN_PAGE_SIZE);
    Ok(ApiResponse(state.bans.list(page, page_size).await?))
}

#[utoipa::path(
    post,
    path = "/api/admin/ip-blacklist",
    request_body = CreateIpBanRequest,
    responses(
        (status = 200, description = "Ban stored or refreshed", body = IpBan),
        (status = 400, description = "Not an IP address")
    ),
    security(("bearer" = [])),
    tag = "IP blacklist"
)]
pub async fn create(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    payload: Result<Json<CreateIpBanRequest>, JsonRejection>,
) -> AppResult<ApiResponse<IpBan>> {
    let Json(request) = payload?;
    let ban = state.bans.create(request).await?;
    info!(
        ban_id = ban.id,
        request_id = %context.request_id,
        "ip ban created from moderation panel"
    );
    Ok(ApiResponse(ban))
}

#[utoipa::path(
    delete,
    path = "/api/admin/ip-blacklist/{id}",
    params(("id" = i64, Path, description = "Ban id")),
    responses(
        (status = 200, description = "Ban lifted"),
        (status = 404, description = "Unknown ban")
    ),
    security(("bearer" = [])),
    tag = "IP blacklist"
)]
pub async fn delete(
    State(state): State<Arc<AppState>>,
    id: Result<Path<i64>, PathRejection>,
) -> AppResult<ApiResponse<()>> {
    let Path(id) = id?;
    state.bans.delete(id).await?;
    Ok(ApiResponse(()))
}

#[utoipa::path(
    get,
    path = "/api/admin/ip-blacklist/check",
    params(IpQuery),
    responses(
        (status = 200, description = "Whether the address is banned now", body = IpBanCheck),
        (status = 400, description = "Not an IP address")
    ),
    security(("bearer" = [])),
    tag = "IP blacklist"
)]
pub async fn check(
    State(state): State<Arc<AppState>>,
    query: Result<Query<IpQuery>, QueryRejection>,
) -> AppResult<ApiResponse<IpBanCheck>> {
    let Query(query) = query?;
    Ok(ApiResponse(state.bans.check(&query.ip).await?))
}

#[utoipa::path(
    post,
    path = "/api/admin/ip-blacklist/clean-expired",
    responses((status = 200, description = "Expired bans removed", body = CleanExpiredResponse)),
    security(("bearer" = [])),
    tag = "IP blacklist"
)]
pub async fn clean_expired(
    State(state): State<Arc<AppState>>,
) -> AppResult<ApiResponse<CleanExpiredResponse>> {
    Ok(ApiResponse(state.bans.clean_expired().await?))
}
