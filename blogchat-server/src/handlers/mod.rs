//! Thin HTTP adapters: parse input, call a service, wrap the result.

pub mod admin_chat;
pub mod announcements;
pub mod chat;
pub mod ip_blacklist;
pub mod ip_whitelist;
