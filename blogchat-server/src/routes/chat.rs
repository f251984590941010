use std::sync::Arc;

use axum::{Router, routing::get};

use crate::{
    app_state::AppState,
    handlers::{announcements, chat},
};

/// Public chat and blog routes, mounted under `/api`.
pub fn create_router_chat() -> Router<Arc<AppState>> {
    Router::new()
        .route("/chat/ws", get(chat::ws_handler))
        .route("/chat/messages", get(chat::list_messages))
        .route("/chat/online", get(chat::online))
        .route("/chat/settings", get(chat::settings))
        .route("/blog/announcements", get(announcements::list))
        .route("/blog/announcements/{id}", get(announcements::get))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_router_has_routes() {
        let router = create_router_chat();
        assert!(router.has_routes(), "chat router should not be empty");
    }
}
