//! User model
//!
//! A user is a tenant: every command, host and API key belongs to exactly one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// User entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    /// Unique, matched case-sensitively at login
    pub username: String,
    /// Unique
    pub email: String,
    pub role: UserRole,
    /// Argon2 PHC string. Users without one can only use API keys.
    #[serde(skip_serializing, default)]
    pub password_hash: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Create a new active user with a fresh identifier.
    ///
    /// The password must already be hashed.
    pub fn new(
        username: String,
        email: String,
        password_hash: Option<String>,
        role: UserRole,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            username,
            email,
            role,
            password_hash,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}

/// The three roles. There is no finer permission model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    #[default]
    User,
    /// Can read but should not be handed write access by UI flows
    Readonly,
}

impl UserRole {
    /// Parse a role from a form field, falling back to `User` for anything unknown.
    pub fn parse_or_default(s: &str) -> Self {
        s.parse().unwrap_or_default()
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserRole::Admin => write!(f, "admin"),
            UserRole::User => write!(f, "user"),
            UserRole::Readonly => write!(f, "readonly"),
        }
    }
}

impl FromStr for UserRole {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "admin" => Ok(UserRole::Admin),
            "user" => Ok(UserRole::User),
            "readonly" => Ok(UserRole::Readonly),
            _ => Err(anyhow::anyhow!("Invalid user role: {}", s)),
        }
    }
}
