//! Single-use account tokens (password reset, e-mail verification)

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

/// Which flow a token belongs to. Each kind has its own table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountTokenKind {
    PasswordReset,
    EmailVerification,
}

impl AccountTokenKind {
    pub fn table(&self) -> &'static str {
        match self {
            AccountTokenKind::PasswordReset => "password_reset_tokens",
            AccountTokenKind::EmailVerification => "email_verification_tokens",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AccountToken {
    pub id: Uuid,
    pub kind: AccountTokenKind,
    pub user_id: Uuid,
    pub token: String,
    /// Only set for e-mail verification tokens
    pub new_email: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl AccountToken {
    pub fn new(
        kind: AccountTokenKind,
        user_id: Uuid,
        token: String,
        new_email: Option<String>,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            kind,
            user_id,
            token,
            new_email,
            expires_at: now + ttl,
            used_at: None,
            created_at: now,
        }
    }

    /// Unused and not yet expired at `now`
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        self.used_at.is_none() && self.expires_at > now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_usability() {
        let mut token = AccountToken::new(
            AccountTokenKind::PasswordReset,
            Uuid::new_v4(),
            "t".to_string(),
            None,
            Duration::hours(24),
        );
        let now = Utc::now();

        assert!(token.is_usable_at(now));
        assert!(!token.is_usable_at(now + Duration::hours(25)));

        token.used_at = Some(now);
        assert!(!token.is_usable_at(now));
    }
}
