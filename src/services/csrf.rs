//! CSRF tokens
//!
//! A token is a random nonce signed with the `csrf` salt and valid for one
//! hour. Tokens are not bound to a user or session: any validly signed,
//! unexpired token passes. Only cookie-authenticated form flows are checked;
//! API-key requests never carry a CSRF token.

use super::password::generate_secret;
use super::signer::TokenSigner;

/// Form field carrying the token
pub const CSRF_FORM_FIELD: &str = "csrf_token";
/// Header carrying the token (HTMX requests)
pub const CSRF_HEADER: &str = "x-csrf-token";

const CSRF_MAX_AGE_SECONDS: u64 = 3600;

#[derive(Clone)]
pub struct CsrfService {
    signer: TokenSigner,
}

impl CsrfService {
    pub fn new(secret: &str) -> Self {
        Self {
            signer: TokenSigner::new(secret, "csrf"),
        }
    }

    pub fn generate_token(&self) -> String {
        self.signer.sign(&generate_secret())
    }

    /// Missing and empty tokens are invalid.
    pub fn verify_token(&self, token: Option<&str>) -> bool {
        match token {
            Some(token) if !token.is_empty() => {
                self.signer.unsign(token, CSRF_MAX_AGE_SECONDS).is_ok()
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::session::SessionService;
    use chrono::{Duration, Utc};

    #[test]
    fn test_generate_and_verify() {
        let csrf = CsrfService::new("secret");
        let token = csrf.generate_token();
        assert!(csrf.verify_token(Some(&token)));
        assert_ne!(token, csrf.generate_token());
    }

    #[test]
    fn test_missing_or_empty_is_invalid() {
        let csrf = CsrfService::new("secret");
        assert!(!csrf.verify_token(None));
        assert!(!csrf.verify_token(Some("")));
        assert!(!csrf.verify_token(Some("garbage")));
    }

    #[test]
    fn test_session_token_is_not_a_csrf_token() {
        let session = SessionService::new("secret", 24).create_session(uuid::Uuid::new_v4());
        assert!(!CsrfService::new("secret").verify_token(Some(&session)));
    }

    #[test]
    fn test_expires_after_an_hour() {
        let signer = TokenSigner::new("secret", "csrf");
        let csrf = CsrfService::new("secret");

        let recent = signer.sign_at("nonce", Utc::now() - Duration::minutes(59));
        assert!(csrf.verify_token(Some(&recent)));

        let old = signer.sign_at("nonce", Utc::now() - Duration::minutes(61));
        assert!(!csrf.verify_token(Some(&old)));
    }
}
