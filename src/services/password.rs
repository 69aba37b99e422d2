//! Credential hashing
//!
//! One Argon2id hasher for both passwords and API keys. Hashes are PHC strings,
//! so the salt and cost parameters travel with the hash and older hashes keep
//! verifying after the configured cost changes.

use anyhow::Result;
use argon2::{
    password_hash::{
        rand_core::{OsRng, RngCore},
        PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
    },
    Algorithm, Argon2, Params, Version,
};
use data_encoding::BASE64URL_NOPAD;

use crate::config::SecurityConfig;

/// Bytes of entropy in generated API keys and single-use tokens
pub const SECRET_BYTES: usize = 32;

/// Salted, adaptive one-way hasher
#[derive(Clone)]
pub struct CredentialHasher {
    argon2: Argon2<'static>,
}

impl CredentialHasher {
    /// Build a hasher with explicit Argon2 cost parameters.
    pub fn new(memory_kib: u32, iterations: u32, parallelism: u32) -> Result<Self> {
        let params = Params::new(memory_kib, iterations, parallelism, None)
            .map_err(|e| anyhow::anyhow!("Invalid argon2 parameters: {}", e))?;
        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }

    pub fn from_config(config: &SecurityConfig) -> Result<Self> {
        Self::new(
            config.hash_memory_kib,
            config.hash_iterations,
            config.hash_parallelism,
        )
    }

    /// Hash a secret with a fresh random salt.
    ///
    /// # Arguments
    ///
    /// * `secret` - A plaintext password or API key
    ///
    /// # Returns
    ///
    /// A PHC string carrying the algorithm, cost parameters, salt and hash
    ///
    /// # Errors
    ///
    /// Returns an error if argon2 rejects the input
    pub fn hash(&self, secret: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2
            .hash_password(secret.as_bytes(), &salt)
            .map_err(|e| anyhow::anyhow!("Failed to hash credential: {}", e))?;
        Ok(hash.to_string())
    }

    /// Check a secret against a stored hash.
    ///
    /// Malformed hashes verify as `false`; callers cannot tell them apart
    /// from a wrong secret.
    pub fn verify(&self, secret: &str, hash: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(hash) else {
            tracing::warn!("Stored credential hash is not a valid PHC string");
            return false;
        };
        self.argon2
            .verify_password(secret.as_bytes(), &parsed)
            .is_ok()
    }
}

impl Default for CredentialHasher {
    fn default() -> Self {
        Self {
            argon2: Argon2::default(),
        }
    }
}

/// Generate a URL-safe random secret (API keys, CSRF nonces, reset tokens).
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    OsRng.fill_bytes(&mut bytes);
    BASE64URL_NOPAD.encode(&bytes)
}

#[cfg(test)]
pub(crate) fn test_hasher() -> CredentialHasher {
    // Minimum argon2 cost keeps the suite fast.
    CredentialHasher::new(Params::MIN_M_COST, 1, 1).expect("valid test params")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_argon2id() {
        let hash = test_hasher().hash("hunter22").expect("Failed to hash");
        assert!(hash.starts_with("$argon2id$"));
    }

    #[test]
    fn test_hash_is_salted() {
        let hasher = test_hasher();
        let a = hasher.hash("same").unwrap();
        let b = hasher.hash("same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_verify_correct_and_incorrect() {
        let hasher = test_hasher();
        let hash = hasher.hash("correct horse").unwrap();

        assert!(hasher.verify("correct horse", &hash));
        assert!(!hasher.verify("correct horsex", &hash));
        assert!(!hasher.verify("", &hash));
    }

    #[test]
    fn test_verify_malformed_hash_is_false() {
        let hasher = test_hasher();
        assert!(!hasher.verify("anything", "not-a-valid-hash"));
        assert!(!hasher.verify("anything", ""));
        assert!(!hasher.verify("anything", "$argon2id$v=19$m=8,t=1,p=1$garbage"));
    }

    #[test]
    fn test_verify_across_cost_change() {
        let cheap = test_hasher();
        let hash = cheap.hash("pw").unwrap();

        let other = CredentialHasher::new(64, 2, 1).unwrap();
        assert!(other.verify("pw", &hash));
    }

    #[test]
    fn test_invalid_params_rejected() {
        assert!(CredentialHasher::new(0, 0, 0).is_err());
    }

    #[test]
    fn test_generate_secret() {
        let a = generate_secret();
        let b = generate_secret();

        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(a
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(10))]

        #[test]
        fn prop_hash_then_verify(secret in "[ -~]{1,40}") {
            let hasher = test_hasher();
            let hash = hasher.hash(&secret).unwrap();
            prop_assert!(hasher.verify(&secret, &hash));
            let wrong = format!("{}x", secret);
            prop_assert!(!hasher.verify(&wrong, &hash));
        }

        #[test]
        fn prop_verify_never_panics_on_garbage(secret in ".{0,20}", hash in ".{0,80}") {
            let _ = test_hasher().verify(&secret, &hash);
        }
    }
}
