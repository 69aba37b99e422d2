//! Database repositories
//!
//! Repository pattern implementations for database access.
//! Each repository handles the rows of one entity; everything owned by a user
//! is read and written through a [`TenantScope`](crate::services::tenant::TenantScope).

/// Run one query body against whichever driver backs `pool`.
///
/// The body is expanded once per driver with `$conn` bound to the concrete
/// pool, so the same SQL and bind chain serve SQLite and MySQL.
macro_rules! on_backend {
    ($pool:expr, |$conn:ident| $body:expr) => {
        match $pool.backend() {
            $crate::db::Backend::Sqlite($conn) => $body,
            $crate::db::Backend::Mysql($conn) => $body,
        }
    };
}

pub mod api_key;
pub mod command;
pub mod host;
pub mod token;
pub mod user;

pub use api_key::{ApiKeyRepository, SqlxApiKeyRepository};
pub use command::{CommandRepository, SqlxCommandRepository};
pub use host::{HostRepository, SqlxHostRepository};
pub use token::{SqlxTokenRepository, TokenRepository};
pub use user::{SqlxUserRepository, UserRepository};
