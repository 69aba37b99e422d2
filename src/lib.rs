//! shellhist - A multi-tenant shell history collector
//!
//! Shell clients push every command they run to the server with an API key;
//! users browse and search their own history in a small web UI.

pub mod api;
pub mod config;
pub mod db;
pub mod models;
pub mod services;
pub mod templates;
