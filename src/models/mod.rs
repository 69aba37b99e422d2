//! Data models
//!
//! Database entities and the request payloads that create them.

mod api_key;
mod history;
mod token;
mod user;

pub use api_key::{ApiKey, IssuedApiKey};
pub use history::{Command, Host, HistoryStats, NewCommand, NewHost, PagedResult};
pub use token::{AccountToken, AccountTokenKind};
pub use user::{User, UserRole};
