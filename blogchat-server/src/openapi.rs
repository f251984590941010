#![allow(clippy::needless_for_each)] // Derive macro emits a for_each internally

use shared::models::{
    BanClientRequest, BanClientResponse, BroadcastRequest, ChatMessage, ChatSettings,
    CleanExpiredResponse, CreateIpAllowRequest, CreateIpBanRequest, IpAllow, IpAllowCheck, IpBan,
    IpBanCheck, KickRequest, OnlineInfo, UserInfo,
};
use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};

/// Registers the bearer scheme referenced by the moderation endpoints.
struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Blog Chat API",
        version = "1.0.0",
        description = "Live chat, announcements and moderation for the blog"
    ),
    paths(
        crate::handlers::chat::ws_handler,
        crate::handlers::chat::list_messages,
        crate::handlers::chat::online,
        crate::handlers::chat::settings,
        crate::handlers::announcements::list,
        crate::handlers::announcements::get,
        crate::handlers::admin_chat::list_all,
        crate::handlers::admin_chat::delete_message,
        crate::handlers::admin_chat::broadcast,
        crate::handlers::admin_chat::kick,
        crate::handlers::admin_chat::ban,
        crate::handlers::admin_chat::get_settings,
        crate::handlers::admin_chat::put_settings,
        crate::handlers::ip_blacklist::list,
        crate::handlers::ip_blacklist::create,
        crate::handlers::ip_blacklist::delete,
        crate::handlers::ip_blacklist::check,
        crate::handlers::ip_blacklist::clean_expired,
        crate::handlers::ip_whitelist::list,
        crate::handlers::ip_whitelist::create,
        crate::handlers::ip_whitelist::delete,
        crate::handlers::ip_whitelist::check,
        crate::handlers::ip_whitelist::clean_expired,
    ),
    components(
        schemas(
            ChatMessage,
            UserInfo,
            OnlineInfo,
            ChatSettings,
            BroadcastRequest,
            KickRequest,
            BanClientRequest,
            BanClientResponse,
            IpBan,
            CreateIpBanRequest,
            IpBanCheck,
            IpAllow,
            CreateIpAllowRequest,
            IpAllowCheck,
            CleanExpiredResponse,
        )
    ),
    modifiers(&BearerAuth),
    tags(
        (name = "Chat", description = "Live chat socket and public history"),
        (name = "Blog", description = "Announcements shown on the blog"),
        (name = "Moderation", description = "Moderator chat controls"),
        (name = "IP blacklist", description = "Address bans"),
        (name = "IP whitelist", description = "Addresses and blocks the gate never counts")
    )
)]
pub struct ApiDoc;
