#![cfg_attr(not(test), forbid(unsafe_code))]

//! Blog chat backend: the WebSocket hub, moderation API and IP reputation
//! gate, served with axum.

pub mod app_state;
pub mod auth;
pub mod chat;
pub mod db;
mod handlers;
pub mod http;
pub mod middleware;
pub mod openapi;
mod routes;
pub mod server;
pub mod services;
pub mod store;
mod tracer;
