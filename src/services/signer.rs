//! Signed, timestamped tokens
//!
//! Token layout: `b64(payload) "." b64(timestamp) "." b64(mac)`, all in the
//! URL-safe base64 alphabet without padding, so `.` can never appear inside a
//! part. The MAC is HMAC-SHA256 over the first two parts, keyed with a key
//! derived from the server secret and a per-use salt. A token signed for one
//! use (say, CSRF) never verifies as another (say, a session).

use chrono::{DateTime, Utc};
use data_encoding::BASE64URL_NOPAD;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

const KEY_CONTEXT: &[u8] = b"shellhist-signer";

/// Why a token was rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignerError {
    /// Malformed, tampered with, or signed under another secret or salt
    #[error("bad signature")]
    BadSignature,
    /// Signature valid but older than the allowed age
    #[error("signature expired (age {age_seconds}s, max {max_age_seconds}s)")]
    SignatureExpired {
        age_seconds: i64,
        max_age_seconds: u64,
    },
}

/// Stateless signer bound to one secret and one salt
#[derive(Clone)]
pub struct TokenSigner {
    key: [u8; 32],
}

impl TokenSigner {
    pub fn new(secret: &str, salt: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(KEY_CONTEXT);
        hasher.update((salt.len() as u64).to_be_bytes());
        hasher.update(salt.as_bytes());
        hasher.update(secret.as_bytes());
        Self {
            key: hasher.finalize().into(),
        }
    }

    pub fn sign(&self, payload: &str) -> String {
        self.sign_at(payload, Utc::now())
    }

    pub(crate) fn sign_at(&self, payload: &str, now: DateTime<Utc>) -> String {
        let body = format!(
            "{}.{}",
            BASE64URL_NOPAD.encode(payload.as_bytes()),
            BASE64URL_NOPAD.encode(&now.timestamp().to_be_bytes())
        );
        let mac = self.mac(body.as_bytes()).finalize().into_bytes();
        format!("{}.{}", body, BASE64URL_NOPAD.encode(&mac))
    }

    /// Verify `token` and return its payload.
    ///
    /// The signature is checked before the timestamp, so a tampered token is
    /// always `BadSignature` even when it is also old.
    pub fn unsign(&self, token: &str, max_age_seconds: u64) -> Result<String, SignerError> {
        self.unsign_at(token, max_age_seconds, Utc::now())
    }

    pub(crate) fn unsign_at(
        &self,
        token: &str,
        max_age_seconds: u64,
        now: DateTime<Utc>,
    ) -> Result<String, SignerError> {
        let (body, mac_part) = token.rsplit_once('.').ok_or(SignerError::BadSignature)?;
        let (payload_part, ts_part) = body.split_once('.').ok_or(SignerError::BadSignature)?;

        let mac = decode(mac_part)?;
        self.mac(body.as_bytes())
            .verify_slice(&mac)
            .map_err(|_| SignerError::BadSignature)?;

        let ts_bytes: [u8; 8] = decode(ts_part)?
            .try_into()
            .map_err(|_| SignerError::BadSignature)?;
        let age_seconds = now.timestamp() - i64::from_be_bytes(ts_bytes);
        if age_seconds < 0 || age_seconds as u64 > max_age_seconds {
            return Err(SignerError::SignatureExpired {
                age_seconds,
                max_age_seconds,
            });
        }

        String::from_utf8(decode(payload_part)?).map_err(|_| SignerError::BadSignature)
    }

    fn mac(&self, data: &[u8]) -> HmacSha256 {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.key)
            .expect("HMAC accepts keys of any length");
        mac.update(data);
        mac
    }
}

fn decode(part: &str) -> Result<Vec<u8>, SignerError> {
    BASE64URL_NOPAD
        .decode(part.as_bytes())
        .map_err(|_| SignerError::BadSignature)
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_roundtrip(payload in ".{0,64}", secret in "[a-zA-Z0-9]{1,32}") {
            let signer = TokenSigner::new(&secret, "flash");
            let token = signer.sign(&payload);
            prop_assert_eq!(signer.unsign(&token, 300), Ok(payload));
        }

        #[test]
        fn prop_secret_isolation(payload in ".{0,32}", a in "[a-z]{8,16}", b in "[A-Z]{8,16}") {
            let token = TokenSigner::new(&a, "session").sign(&payload);
            prop_assert_eq!(
                TokenSigner::new(&b, "session").unsign(&token, 300),
                Err(SignerError::BadSignature)
            );
        }

        #[test]
        fn prop_tail_tamper(payload in "[a-z0-9-]{1,36}") {
            let signer = TokenSigner::new("secret", "session");
            let token = signer.sign(&payload);
            let tampered = format!("{}XXXXX", &token[..token.len() - 5]);
            prop_assume!(tampered != token);
            prop_assert_eq!(signer.unsign(&tampered, 300), Err(SignerError::BadSignature));
        }
    }
}
