//! Database layer
//!
//! SQLite (default, single file next to the binary) or MySQL, selected by
//! configuration. Repositories dispatch on [`Backend`] and share one set of
//! SQL statements where the dialects agree.

pub mod migrations;
pub mod pool;
pub mod repositories;

pub use pool::{
    create_pool, create_test_pool, Backend, DatabasePool, DynDatabasePool, MysqlDatabase,
    SqliteDatabase,
};

use anyhow::{Context, Result};
use uuid::Uuid;

/// Parse an identifier column stored as hyphenated text.
pub(crate) fn parse_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).with_context(|| format!("Malformed identifier in database: {}", raw))
}
