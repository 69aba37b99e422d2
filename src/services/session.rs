//! Stateless session tokens
//!
//! A session is the user id signed with the `session` salt. Nothing is stored
//! server-side, so a session cannot be listed or revoked; it ends when it
//! expires or the browser drops the cookie. Revocation would need a denylist
//! keyed by user and issue time, checked in [`SessionService::verify_session`].

use uuid::Uuid;

use super::signer::TokenSigner;

/// Cookie carrying the session token
pub const SESSION_COOKIE: &str = "session";

#[derive(Clone)]
pub struct SessionService {
    signer: TokenSigner,
    expire_hours: u64,
}

impl SessionService {
    pub fn new(secret: &str, expire_hours: u64) -> Self {
        Self {
            signer: TokenSigner::new(secret, "session"),
            expire_hours,
        }
    }

    /// Lifetime of a session, also used as the cookie `Max-Age`
    pub fn max_age_seconds(&self) -> u64 {
        self.expire_hours.saturating_mul(3600)
    }

    pub fn create_session(&self, user_id: Uuid) -> String {
        self.signer.sign(&user_id.to_string())
    }

    /// Resolve a token to the user id it was issued for.
    ///
    /// Bad signatures, expired tokens and payloads that are not UUIDs all
    /// yield `None`.
    pub fn verify_session(&self, token: &str) -> Option<Uuid> {
        match self.signer.unsign(token, self.max_age_seconds()) {
            Ok(payload) => Uuid::parse_str(&payload).ok(),
            Err(e) => {
                tracing::debug!("Rejected session token: {}", e);
                None
            }
        }
    }
}
