//! One-shot flash messages carried in a signed cookie

use serde::{Deserialize, Serialize};

use super::signer::TokenSigner;

pub const FLASH_COOKIE: &str = "flash";
pub const FLASH_MAX_AGE_SECONDS: u64 = 300;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashMessage {
    pub message: String,
    /// `success`, `error`, ...
    pub category: String,
}

#[derive(Clone)]
pub struct FlashService {
    signer: TokenSigner,
}

impl FlashService {
    pub fn new(secret: &str) -> Self {
        Self {
            signer: TokenSigner::new(secret, "flash"),
        }
    }

    /// Encode a message as a cookie value.
    pub fn set_flash(&self, message: &str, category: &str) -> String {
        let flash = FlashMessage {
            message: message.to_string(),
            category: category.to_string(),
        };
        // Serializing two strings cannot fail.
        let payload = serde_json::to_string(&flash).unwrap_or_default();
        self.signer.sign(&payload)
    }

    pub fn get_flash(&self, cookie: Option<&str>) -> Option<FlashMessage> {
        let payload = self.signer.unsign(cookie?, FLASH_MAX_AGE_SECONDS).ok()?;
        serde_json::from_str(&payload).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn test_roundtrip() {
        let flash = FlashService::new("secret");
        let cookie = flash.set_flash("User 'bob' created. API Key: abc", "success");
        assert_eq!(
            flash.get_flash(Some(&cookie)),
            Some(FlashMessage {
                message: "User 'bob' created. API Key: abc".to_string(),
                category: "success".to_string(),
            })
        );
    }

    #[test]
    fn test_missing_or_forged() {
        let flash = FlashService::new("secret");
        assert_eq!(flash.get_flash(None), None);
        assert_eq!(flash.get_flash(Some("forged")), None);

        let other = FlashService::new("other").set_flash("hi", "success");
        assert_eq!(flash.get_flash(Some(&other)), None);
    }

    #[test]
    fn test_expires_after_five_minutes() {
        let signer = TokenSigner::new("secret", "flash");
        let payload = r#"{"message":"hi","category":"success"}"#;
        let old = signer.sign_at(payload, Utc::now() - Duration::seconds(301));
        assert_eq!(FlashService::new("secret").get_flash(Some(&old)), None);
    }
}
