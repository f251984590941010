use std::sync::Arc;

use axum::{
    extract::{
        Extension, Query, State, WebSocketUpgrade,
        rejection::QueryRejection,
    },
    response::Response,
};
use rand::Rng;
use serde::Deserialize;
use shared::models::{ChatMessage, ChatSettings, OnlineInfo, Page, PageQuery};
use tracing::{debug, info};
use utoipa::IntoParams;
use uuid::Uuid;

use crate::{
    app_state::AppState,
    chat::{ClientInfo, client},
    http::{envelope::ApiResponse, error::AppResult},
    middleware::request_context::RequestContext,
};

const PUBLIC_PAGE_SIZE: u32 = 50;
const MAX_USERNAME_CHARS: usize = 32;

/// Identity hints for anonymous visitors.
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct ConnectQuery {
    /// Bearer token for browsers that cannot set headers on an upgrade. The
    /// request context layer verifies it; it is declared here so the API
    /// document lists it.
    #[allow(dead_code)]
    pub token: Option<String>,
    pub username: Option<String>,
    pub avatar: Option<String>,
}

/// Builds the peer identity: token claims when present, otherwise the
/// requested name or a random guest name.
pub fn client_info(context: &RequestContext, query: ConnectQuery) -> ClientInfo {
    let avatar = query.avatar.unwrap_or_default();
    match &context.claims {
        Some(claims) => ClientInfo {
            id: Uuid::new_v4(),
            user_id: Some(claims.user_id),
            username: claims.username.clone(),
            avatar,
            ip: context.client_ip.to_string(),
            role: Some(claims.role.clone()),
        },
        None => {
            let username = query
                .username
                .map(|name| name.trim().chars().take(MAX_USERNAME_CHARS).collect::<String>())
                .filter(|name| !name.is_empty())
                .unwrap_or_else(guest_name);
            ClientInfo {
                id: Uuid::new_v4(),
                user_id: None,
                username,
                avatar,
                ip: context.client_ip.to_string(),
                role: None,
            }
        }
    }
}

fn guest_name() -> String {
    format!("guest-{}", rand::rng().random_range(1000..10000))
}

#[utoipa::path(
    get,
    path = "/api/chat/ws",
    params(ConnectQuery),
    responses(
        (status = 101, description = "Switching to the chat WebSocket"),
        (status = 403, description = "Address banned"),
        (status = 429, description = "Rate limit exceeded")
    ),
    tag = "Chat"
)]
pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    query: Result<Query<ConnectQuery>, QueryRejection>,
    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    let Query(query) = query?;
    let info = client_info(&context, query);
    info!(
        client_id = %info.id,
        username = %info.username,
        ip = %info.ip,
        request_id = %context.request_id,
        "websocket upgrade"
    );

    let hub = state.hub.clone();
    let stores = state.stores.clone();
    Ok(ws
        .max_message_size(state.config.chat.max_frame_bytes)
        .on_failed_upgrade(|err| debug!(error = %err, "websocket upgrade failed"))
        .on_upgrade(move |socket| client::serve(socket, info, hub, stores)))
}

#[utoipa::path(
    get,
    path = "/api/chat/messages",
    params(PageQuery),
    responses(
        (status = 200, description = "Visible chat messages, newest first", body = Page<ChatMessage>)
    ),
    tag = "Chat"
)]
pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    query: Result<Query<PageQuery>, QueryRejection>,
) -> AppResult<ApiResponse<Page<ChatMessage>>> {
    let Query(query) = query?;
    let (page, page_size) = query.resolve(PUBLIC_PAGE_SIZE);
    let messages = state.chat.public_messages(page, page_size).await?;
    Ok(ApiResponse(messages))
}

#[utoipa::path(
    get,
    path = "/api/chat/online",
    responses((status = 200, description = "People currently connected", body = OnlineInfo)),
    tag = "Chat"
)]
pub async fn online(State(state): State<Arc<AppState>>) -> ApiResponse<OnlineInfo> {
    ApiResponse(state.chat.online().await)
}

#[utoipa::path(
    get,
    path = "/api/chat/settings",
    responses((status = 200, description = "Room settings", body = ChatSettings)),
    tag = "Chat"
)]
pub async fn settings(State(state): State<Arc<AppState>>) -> AppResult<ApiResponse<ChatSettings>> {
    Ok(ApiResponse(state.chat.settings().await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::token::Claims;
    use std::net::IpAddr;

    fn context(claims: Option<Claims>) -> RequestContext {
        RequestContext {
            request_id: "req".to_string(),
            client_ip: "203.0.113.4".parse::<IpAddr>().unwrap(),
            claims,
        }
    }

    #[test]
    fn token_identity_wins_over_query_name() {
        let claims = Claims {
            user_id: 12,
            username: "carol".to_string(),
            role: "admin".to_string(),
            exp: u64::MAX,
            iat: None,
            iss: None,
        };
        let info = client_info(
            &context(Some(claims)),
            ConnectQuery {
                token: None,
                username: Some("mallory".to_string()),
                avatar: Some("/a.png".to_string()),
            },
        );
        assert_eq!(info.username, "carol");
        assert_eq!(info.user_id, Some(12));
        assert_eq!(info.avatar, "/a.png");
        assert_eq!(info.ip, "203.0.113.4");
        assert!(info.is_admin());
    }

    #[test]
    fn anonymous_visitors_get_requested_or_guest_name() {
        let named = client_info(
            &context(None),
            ConnectQuery {
                username: Some("  dave ".to_string()),
                ..ConnectQuery::default()
            },
        );
        assert_eq!(named.username, "dave");
        assert_eq!(named.user_id, None);
        assert!(!named.is_admin());

        let guest = client_info(&context(None), ConnectQuery::default());
        let suffix = guest.username.strip_prefix("guest-").unwrap();
        let number: u32 = suffix.parse().unwrap();
        assert!((1000..10000).contains(&number));

        let blank = client_info(
            &context(None),
            ConnectQuery {
                username: Some("   ".to_string()),
                ..ConnectQuery::default()
            },
        );
        assert!(blank.username.starts_with("guest-"));
    }
}
