//! # Configuration
//!
//! Server configuration: defaults, file loading (YAML or JSON), `BLOGCHAT_*`
//! environment overrides and validation.

pub mod server;
