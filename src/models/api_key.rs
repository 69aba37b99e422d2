//! API key model

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// A stored API key. Only the hash is ever persisted.
#[derive(Debug, Clone, Serialize)]
pub struct ApiKey {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(skip_serializing)]
    pub key_hash: String,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl ApiKey {
    pub fn new(user_id: Uuid, key_hash: String, name: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            key_hash,
            name,
            created_at: Utc::now(),
            last_used_at: None,
            is_active: true,
        }
    }
}

/// A freshly issued key together with its plaintext.
///
/// This is the only place the plaintext exists; it is shown to the caller once
/// and then dropped.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedApiKey {
    #[serde(flatten)]
    pub record: ApiKey,
    #[serde(rename = "api_key")]
    pub plaintext: String,
}
