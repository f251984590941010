#![cfg_attr(not(test), forbid(unsafe_code))]

//! Configuration, wire models and small network helpers shared by the blog
//! chat server and its tests.

pub mod config;
pub mod models;
pub mod net;
