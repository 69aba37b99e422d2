//! Password login for the user and admin portals

use std::sync::Arc;

use anyhow::Context;

use crate::config::RateLimitPolicy;
use crate::db::repositories::UserRepository;
use crate::models::User;

use super::password::CredentialHasher;
use super::rate_limiter::RateLimiter;
use super::session::SessionService;

/// Which login form was used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginPortal {
    User,
    /// Only admins may sign in here
    Admin,
}

impl LoginPortal {
    fn rate_limit_key(&self, client_ip: &str) -> String {
        match self {
            LoginPortal::User => format!("login:{}", client_ip),
            LoginPortal::Admin => format!("admin_login:{}", client_ip),
        }
    }
}

/// A session issued by a successful login
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub token: String,
    pub user: User,
    pub max_age_seconds: u64,
}

#[must_use]
#[derive(Debug, Clone)]
pub enum LoginOutcome {
    Success(IssuedSession),
    RateLimited,
    /// Unknown user, no password set, or wrong password
    InvalidCredentials,
    RoleDenied,
    AccountInactive,
}

pub struct LoginService {
    users: Arc<dyn UserRepository>,
    limiter: Arc<RateLimiter>,
    sessions: SessionService,
    hasher: CredentialHasher,
    policy: RateLimitPolicy,
}

impl LoginService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        limiter: Arc<RateLimiter>,
        sessions: SessionService,
        hasher: CredentialHasher,
        policy: RateLimitPolicy,
    ) -> Self {
        Self {
            users,
            limiter,
            sessions,
            hasher,
            policy,
        }
    }

    /// Run one login attempt.
    ///
    /// The rate limit is checked before storage is touched. Unknown usernames
    /// return without hashing, so response time can reveal whether a username
    /// exists.
    ///
    /// # Arguments
    ///
    /// * `portal` - Which sign-in page is used; the admin portal also requires the admin role
    /// * `client_ip` - Address the attempt is counted against
    /// * `username` - Matched case-sensitively
    /// * `password` - Plaintext password from the form
    ///
    /// # Returns
    ///
    /// A [`LoginOutcome`]; only `Success` carries a session token.
    ///
    /// # Errors
    ///
    /// Returns an error if the user store cannot be read
    pub async fn attempt_login(
        &self,
        portal: LoginPortal,
        client_ip: &str,
        username: &str,
        password: &str,
    ) -> anyhow::Result<LoginOutcome> {
        let key = portal.rate_limit_key(client_ip);
        if !self.limiter.check(&key, self.policy).await.allowed {
            tracing::warn!(client_ip, ?portal, "Login rate limit exceeded");
            return Ok(LoginOutcome::RateLimited);
        }

        let Some(user) = self.users.get_by_username(username).await? else {
            return Ok(LoginOutcome::InvalidCredentials);
        };
        let Some(hash) = user.password_hash.clone() else {
            return Ok(LoginOutcome::InvalidCredentials);
        };

        let hasher = self.hasher.clone();
        let password = password.to_string();
        let verified = tokio::task::spawn_blocking(move || hasher.verify(&password, &hash))
            .await
            .context("Password verification task failed")?;
        if !verified {
            tracing::info!(username, client_ip, "Failed login attempt");
            return Ok(LoginOutcome::InvalidCredentials);
        }

        if portal == LoginPortal::Admin && !user.is_admin() {
            return Ok(LoginOutcome::RoleDenied);
        }
        if !user.is_active {
            return Ok(LoginOutcome::AccountInactive);
        }

        tracing::info!(username, ?portal, "User logged in");
        Ok(LoginOutcome::Success(IssuedSession {
            token: self.sessions.create_session(user.id),
            max_age_seconds: self.sessions.max_age_seconds(),
            user,
        }))
    }
}
