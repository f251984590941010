use std::sync::Arc;

use axum::extract::{
    Path, Query, State,
    rejection::{PathRejection, QueryRejection},
};
use shared::models::{AnnouncementQuery, ChatMessage};

use crate::{
    app_state::AppState,
    http::{envelope::ApiResponse, error::AppResult},
};

#[utoipa::path(
    get,
    path = "/api/blog/announcements",
    params(AnnouncementQuery),
    responses(
        (status = 200, description = "Visible announcements, pinned first", body = Vec<ChatMessage>)
    ),
    tag = "Blog"
)]
pub async fn list(
    State(state): State<Arc<AppState>>,
    query: Result<Query<AnnouncementQuery>, QueryRejection>,
) -> AppResult<ApiResponse<Vec<ChatMessage>>> {
    let Query(query) = query?;
    Ok(ApiResponse(state.chat.announcements(query.resolve()).await?))
}

#[utoipa::path(
    get,
    path = "/api/blog/announcements/{id}",
    params(("id" = i64, Path, description = "Announcement id")),
    responses(
        (status = 200, description = "One announcement", body = ChatMessage),
        (status = 404, description = "No such visible announcement")
    ),
    tag = "Blog"
)]
pub async fn get(
    State(state): State<Arc<AppState>>,
    id: Result<Path<i64>, PathRejection>,
) -> AppResult<ApiResponse<ChatMessage>> {
    let Path(id) = id?;
    Ok(ApiResponse(state.chat.announcement(id).await?))
}
