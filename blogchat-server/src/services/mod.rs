//! Domain services shared by the HTTP handlers and the socket loops.

pub mod ban_service;
pub mod chat_service;
pub mod clock;
pub mod ip_guard;
pub mod whitelist_service;

pub use ban_service::BanService;
pub use chat_service::ChatService;
pub use ip_guard::IpGuard;
pub use whitelist_service::WhitelistService;
