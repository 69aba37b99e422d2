//! Request authentication
//!
//! Resolves the credentials presented on a request to a user. An API key, when
//! present, always takes precedence over the session cookie: a request with a
//! bad key is rejected even if its cookie is valid.

use anyhow::Context;
use chrono::Utc;
use std::fmt;
use std::sync::Arc;

use crate::db::repositories::{ApiKeyRepository, UserRepository};
use crate::models::{ApiKey, User};

use super::password::CredentialHasher;
use super::session::SessionService;

/// Raw credentials lifted off a request
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    /// `X-API-Key` header
    pub api_key: Option<String>,
    /// `session` cookie
    pub session_token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    ApiKey,
    Session,
}

/// An authenticated caller
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user: User,
    pub method: AuthMethod,
}

/// Why a request was not authenticated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnauthorizedReason {
    AuthenticationRequired,
    InvalidApiKey,
    InvalidSession,
    AccountInactive,
}

impl fmt::Display for UnauthorizedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            UnauthorizedReason::AuthenticationRequired => "Authentication required",
            UnauthorizedReason::InvalidApiKey => "Invalid API key",
            UnauthorizedReason::InvalidSession => "Invalid or expired session",
            UnauthorizedReason::AccountInactive => "Account is inactive",
        };
        f.write_str(message)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("{0}")]
    Unauthorized(UnauthorizedReason),

    /// The user or key store could not be read
    #[error("Authentication storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

pub struct Authenticator {
    users: Arc<dyn UserRepository>,
    api_keys: Arc<dyn ApiKeyRepository>,
    sessions: SessionService,
    hasher: CredentialHasher,
}

impl Authenticator {
    pub fn new(
        users: Arc<dyn UserRepository>,
        api_keys: Arc<dyn ApiKeyRepository>,
        sessions: SessionService,
        hasher: CredentialHasher,
    ) -> Self {
        Self {
            users,
            api_keys,
            sessions,
            hasher,
        }
    }

    /// Resolve request credentials to an active user.
    ///
    /// # Arguments
    ///
    /// * `credentials` - The `X-API-Key` header and `session` cookie, if present.
    ///   A key wins over the cookie; a bad key does not fall back to the cookie.
    ///
    /// # Returns
    ///
    /// The user together with how they authenticated
    ///
    /// # Errors
    ///
    /// * `AuthError::Unauthorized` - No credentials, an unknown key, an invalid
    ///   session or an inactive account
    /// * `AuthError::Storage` - The user or key store could not be read
    pub async fn resolve(&self, credentials: &Credentials) -> Result<AuthContext, AuthError> {
        if let Some(api_key) = non_empty(&credentials.api_key) {
            return self.resolve_api_key(api_key).await;
        }
        if let Some(token) = non_empty(&credentials.session_token) {
            return self.resolve_session(token).await;
        }
        Err(AuthError::Unauthorized(
            UnauthorizedReason::AuthenticationRequired,
        ))
    }

    async fn resolve_api_key(&self, presented: &str) -> Result<AuthContext, AuthError> {
        let key = self
            .find_key(presented)
            .await?
            .ok_or(AuthError::Unauthorized(UnauthorizedReason::InvalidApiKey))?;

        let user = match self.users.get_by_id(key.user_id).await? {
            Some(user) if user.is_active => user,
            _ => {
                tracing::info!(key_id = %key.id, "API key presented for an inactive account");
                return Err(AuthError::Unauthorized(UnauthorizedReason::AccountInactive));
            }
        };

        self.api_keys.touch_last_used(key.id, Utc::now()).await?;

        Ok(AuthContext {
            user,
            method: AuthMethod::ApiKey,
        })
    }

    /// Verify `presented` against every active key hash.
    ///
    /// Each comparison is a full password-hash verification, so the scan runs
    /// on the blocking pool.
    async fn find_key(&self, presented: &str) -> anyhow::Result<Option<ApiKey>> {
        let keys = self.api_keys.list_active().await?;
        let hasher = self.hasher.clone();
        let presented = presented.to_string();
        tokio::task::spawn_blocking(move || {
            keys.into_iter()
                .find(|key| hasher.verify(&presented, &key.key_hash))
        })
        .await
        .context("API key verification task failed")
    }

    async fn resolve_session(&self, token: &str) -> Result<AuthContext, AuthError> {
        let user_id = self
            .sessions
            .verify_session(token)
            .ok_or(AuthError::Unauthorized(UnauthorizedReason::InvalidSession))?;

        let user = self
            .users
            .get_by_id(user_id)
            .await?
            .ok_or(AuthError::Unauthorized(UnauthorizedReason::InvalidSession))?;

        if !user.is_active {
            return Err(AuthError::Unauthorized(UnauthorizedReason::AccountInactive));
        }

        Ok(AuthContext {
            user,
            method: AuthMethod::Session,
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::{SqlxApiKeyRepository, SqlxUserRepository};
    use crate::db::{create_test_pool, migrations};
    use crate::models::UserRole;
    use crate::services::password::{generate_secret, test_hasher};
    use crate::services::tenant::TenantScope;

    struct Fixture {
        auth: Authenticator,
        users: Arc<dyn UserRepository>,
        api_keys: Arc<dyn ApiKeyRepository>,
        sessions: SessionService,
        hasher: CredentialHasher,
    }

    async fn setup() -> Fixture {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        let users = SqlxUserRepository::boxed(pool.clone());
        let api_keys = SqlxApiKeyRepository::boxed(pool);
        let sessions = SessionService::new("test-secret", 24);
        let hasher = test_hasher();
        Fixture {
            auth: Authenticator::new(users.clone(), api_keys.clone(), sessions.clone(), hasher.clone()),
            users,
            api_keys,
            sessions,
            hasher,
        }
    }

    impl Fixture {
        async fn user(&self, name: &str) -> User {
            let user = User::new(name.into(), format!("{}@example.com", name), None, UserRole::User);
            self.users.create(&user).await.unwrap()
        }

        async fn key_for(&self, user: &User) -> String {
            let plaintext = generate_secret();
            let hash = self.hasher.hash(&plaintext).unwrap();
            self.api_keys
                .create(&ApiKey::new(user.id, hash, None))
                .await
                .unwrap();
            plaintext
        }
    }

    fn unauthorized(result: Result<AuthContext, AuthError>) -> UnauthorizedReason {
        match result {
            Err(AuthError::Unauthorized(reason)) => reason,
            other => panic!("expected Unauthorized, got {:?}", other.map(|c| c.method)),
        }
    }

    #[tokio::test]
    async fn test_no_credentials() {
        let f = setup().await;
        assert_eq!(
            unauthorized(f.auth.resolve(&Credentials::default()).await),
            UnauthorizedReason::AuthenticationRequired
        );

        let blank = Credentials {
            api_key: Some(String::new()),
            session_token: Some(String::new()),
        };
        assert_eq!(
            unauthorized(f.auth.resolve(&blank).await),
            UnauthorizedReason::AuthenticationRequired
        );
    }

    #[tokio::test]
    async fn test_api_key_resolves_owner_and_records_use() {
        let f = setup().await;
        let alice = f.user("alice").await;
        let _bob_key = {
            let bob = f.user("bob").await;
            f.key_for(&bob).await
        };
        let key = f.key_for(&alice).await;

        let ctx = f
            .auth
            .resolve(&Credentials {
                api_key: Some(key),
                session_token: None,
            })
            .await
            .unwrap();
        assert_eq!(ctx.user.id, alice.id);
        assert_eq!(ctx.method, AuthMethod::ApiKey);

        let keys = f.api_keys.list(TenantScope::of(&alice)).await.unwrap();
        assert!(keys[0].last_used_at.is_some());
    }

    #[tokio::test]
    async fn test_api_key_wins_over_session() {
        let f = setup().await;
        let alice = f.user("alice").await;
        let bob = f.user("bob").await;
        let alice_key = f.key_for(&alice).await;
        let bob_session = f.sessions.create_session(bob.id);

        let ctx = f
            .auth
            .resolve(&Credentials {
                api_key: Some(alice_key),
                session_token: Some(bob_session.clone()),
            })
            .await
            .unwrap();
        assert_eq!(ctx.user.id, alice.id);

        // A bad key is not rescued by a valid cookie.
        let result = f
            .auth
            .resolve(&Credentials {
                api_key: Some("not-a-key".into()),
                session_token: Some(bob_session),
            })
            .await;
        assert_eq!(unauthorized(result), UnauthorizedReason::InvalidApiKey);
    }

    #[tokio::test]
    async fn test_revoked_key_rejected() {
        let f = setup().await;
        let alice = f.user("alice").await;
        let key = f.key_for(&alice).await;
        f.api_keys.deactivate_all(TenantScope::of(&alice)).await.unwrap();

        let result = f
            .auth
            .resolve(&Credentials {
                api_key: Some(key),
                session_token: None,
            })
            .await;
        assert_eq!(unauthorized(result), UnauthorizedReason::InvalidApiKey);
    }

    #[tokio::test]
    async fn test_inactive_owner() {
        let f = setup().await;
        let alice = f.user("alice").await;
        let key = f.key_for(&alice).await;
        let session = f.sessions.create_session(alice.id);
        f.users.set_active(alice.id, false).await.unwrap();

        let by_key = f
            .auth
            .resolve(&Credentials {
                api_key: Some(key),
                session_token: None,
            })
            .await;
        assert_eq!(unauthorized(by_key), UnauthorizedReason::AccountInactive);

        let by_session = f
            .auth
            .resolve(&Credentials {
                api_key: None,
                session_token: Some(session),
            })
            .await;
        assert_eq!(unauthorized(by_session), UnauthorizedReason::AccountInactive);
    }

    #[tokio::test]
    async fn test_session() {
        let f = setup().await;
        let alice = f.user("alice").await;

        let ctx = f
            .auth
            .resolve(&Credentials {
                api_key: None,
                session_token: Some(f.sessions.create_session(alice.id)),
            })
            .await
            .unwrap();
        assert_eq!(ctx.user.id, alice.id);
        assert_eq!(ctx.method, AuthMethod::Session);

        let forged = f
            .auth
            .resolve(&Credentials {
                api_key: None,
                session_token: Some("forged.token.value".into()),
            })
            .await;
        assert_eq!(unauthorized(forged), UnauthorizedReason::InvalidSession);

        let unknown_user = f
            .auth
            .resolve(&Credentials {
                api_key: None,
                session_token: Some(f.sessions.create_session(uuid::Uuid::new_v4())),
            })
            .await;
        assert_eq!(unauthorized(unknown_user), UnauthorizedReason::InvalidSession);
    }
}
