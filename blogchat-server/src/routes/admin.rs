use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{delete, get, post},
};

use crate::{
    app_state::AppState,
    handlers::{admin_chat, ip_blacklist, ip_whitelist},
    middleware::auth::require_admin,
};

/// Moderation routes, mounted under `/api`.
pub fn create_router_admin() -> Router<Arc<AppState>> {
    Router::new()
        .route("/admin/chat/messages", get(admin_chat::list_all))
        .route("/admin/chat/messages/{id}", delete(admin_chat::delete_message))
        .route("/admin/chat/broadcast", post(admin_chat::broadcast))
        .route("/admin/chat/kick", post(admin_chat::kick))
        .route("/admin/chat/ban", post(admin_chat::ban))
        .route(
            "/admin/chat/settings",
            get(admin_chat::get_settings).put(admin_chat::put_settings),
        )
        .route(
            "/admin/ip-blacklist",
            get(ip_blacklist::list).post(ip_blacklist::create),
        )
        .route("/admin/ip-blacklist/check", get(ip_blacklist::check))
        .route(
            "/admin/ip-blacklist/clean-expired",
            post(ip_blacklist::clean_expired),
        )
        .route("/admin/ip-blacklist/{id}", delete(ip_blacklist::delete))
        .route(
            "/admin/ip-whitelist",
            get(ip_whitelist::list).post(ip_whitelist::create),
        )
        .route("/admin/ip-whitelist/check", get(ip_whitelist::check))
        .route(
            "/admin/ip-whitelist/clean-expired",
            post(ip_whitelist::clean_expired),
        )
        .route("/admin/ip-whitelist/{id}", delete(ip_whitelist::delete))
        .route_layer(middleware::from_fn(require_admin))
}
