pub mod auth;
pub mod ip_guard;
pub mod request_context;
