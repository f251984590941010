use std::sync::Arc;

use axum::{
    Json,
    extract::{
        Extension, Path, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
};
use shared::models::{
    BanClientRequest, BanClientResponse, BroadcastRequest, ChatMessage, ChatSettings, KickRequest,
    Page, PageQuery,
};
use tracing::{debug, info};

use crate::{
    app_state::AppState,
    http::{envelope::ApiResponse, error::AppResult},
    middleware::request_context::RequestContext,
};

const ADMIN_PAGE_SIZE: u32 = 20;

fn moderator(context: &RequestContext) -> &str {
    context
        .claims
        .as_ref()
        .map_or("unknown", |claims| claims.username.as_str())
}

#[utoipa::path(
    get,
    path = "/api/admin/chat/messages",
    params(PageQuery),
    responses(
        (status = 200, description = "Every message including deleted ones", body = Page<ChatMessage>),
        (status = 401, description = "Login required"),
        (status = 403, description = "Moderator role required")
    ),
    security(("bearer" = [])),
    tag = "Moderation"
)]
pub async fn list_all(
    State(state): State<Arc<AppState>>,
    query: Result<Query<PageQuery>, QueryRejection>,
) -> AppResult<ApiResponse<Page<ChatMessage>>> {
    let Query(query) = query?;
    let (page, page_size) = query.resolve(ADMIN_PAGE_SIZE);
    Ok(ApiResponse(state.chat.all_messages(page, page_size).await?))
}

#[utoipa::path(
    delete,
    path = "/api/admin/chat/messages/{id}",
    params(("id" = i64, Path, description = "Message id")),
    responses(
        (status = 200, description = "Message hidden"),
        (status = 404, description = "Unknown message")
    ),
    security(("bearer" = [])),
    tag = "Moderation"
)]
pub async fn delete_message(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    id: Result<Path<i64>, PathRejection>,
) -> AppResult<ApiResponse<()>> {
    let Path(id) = id?;
    state.chat.delete_message(id).await?;
    info!(message_id = id, moderator = moderator(&context), "message deleted");
    Ok(ApiResponse(()))
}

#[utoipa::path(
    post,
    path = "/api/admin/chat/broadcast",
    request_body = BroadcastRequest,
    responses(
        (status = 200, description = "Broadcast stored and delivered", body = ChatMessage),
        (status = 400, description = "Invalid content, priority or target")
    ),
    security(("bearer" = [])),
    tag = "Moderation"
)]
pub async fn broadcast(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    payload: Result<Json<BroadcastRequest>, JsonRejection>,
) -> AppResult<ApiResponse<ChatMessage>> {
    let Json(request) = payload?;
    let message = state.chat.post_broadcast(request).await?;
    debug!(message_id = message.id, moderator = moderator(&context), "broadcast by moderator");
    Ok(ApiResponse(message))
}

#[utoipa::path(
    post,
    path = "/api/admin/chat/kick",
    request_body = KickRequest,
    responses(
        (status = 200, description = "Client told to leave"),
        (status = 404, description = "Client not online")
    ),
    security(("bearer" = [])),
    tag = "Moderation"
)]
pub async fn kick(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    payload: Result<Json<KickRequest>, JsonRejection>,
) -> AppResult<ApiResponse<()>> {
    let Json(request) = payload?;
    let client_id = request.client_id;
    state.chat.kick(request).await?;
    info!(%client_id, moderator = moderator(&context), "client kicked");
    Ok(ApiResponse(()))
}

#[utoipa::path(
    post,
    path = "/api/admin/chat/ban",
    request_body = BanClientRequest,
    responses(
        (status = 200, description = "Address banned and client kicked", body = BanClientResponse),
        (status = 404, description = "Client not online")
    ),
    security(("bearer" = [])),
    tag = "Moderation"
)]
pub async fn ban(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    payload: Result<Json<BanClientRequest>, JsonRejection>,
) -> AppResult<ApiResponse<BanClientResponse>> {
    let Json(request) = payload?;
    let client_id = request.client_id;
    let response = state.chat.ban_client(request).await?;
    debug!(%client_id, moderator = moderator(&context), "ban by moderator");
    Ok(ApiResponse(response))
}

#[utoipa::path(
    get,
    path = "/api/admin/chat/settings",
    responses((status = 200, description = "Room settings", body = ChatSettings)),
    security(("bearer" = [])),
    tag = "Moderation"
)]
pub async fn get_settings(
    State(state): State<Arc<AppState>>,
) -> AppResult<ApiResponse<ChatSettings>> {
    Ok(ApiResponse(state.chat.settings().await?))
}

#[utoipa::path(
    put,
    path = "/api/admin/chat/settings",
    request_body = ChatSettings,
    responses((status = 200, description = "Settings updated", body = ChatSettings)),
    security(("bearer" = [])),
    tag = "Moderation"
)]
pub async fn put_settings(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    payload: Result<Json<ChatSettings>, JsonRejection>,
) -> AppResult<ApiResponse<ChatSettings>> {
    let Json(settings) = payload?;
    let updated = state.chat.update_settings(settings).await?;
    debug!(moderator = moderator(&context), "settings changed by moderator");
    Ok(ApiResponse(updated))
}
