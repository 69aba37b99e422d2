//! Account management
//!
//! User creation, API keys, password changes and resets, e-mail changes and
//! the admin-only operations on other accounts. Every hash and verify runs on
//! the blocking pool.

use anyhow::Context;
use chrono::{Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tera::Context as TeraContext;
use uuid::Uuid;

use crate::config::AdminConfig;
use crate::db::repositories::{ApiKeyRepository, TokenRepository, UserRepository};
use crate::models::{AccountToken, AccountTokenKind, ApiKey, IssuedApiKey, PagedResult, User, UserRole};
use crate::templates::Templates;

use super::email::EmailService;
use super::password::{generate_secret, CredentialHasher};
use super::tenant::TenantScope;

pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Lifetime of reset and verification links
const ACCOUNT_TOKEN_TTL_HOURS: i64 = 24;

pub const INVALID_RESET_TOKEN: &str =
    "Invalid or expired reset token. Please request a new password reset.";
pub const INVALID_VERIFICATION_TOKEN: &str = "Invalid or expired verification token.";

#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    /// Rejected input; the message is shown to the user as is
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// A user row as listed to admins
#[derive(Debug, Clone, Serialize)]
pub struct UserSummary {
    #[serde(flatten)]
    pub user: User,
    pub has_api_key: bool,
}

pub struct AccountService {
    users: Arc<dyn UserRepository>,
    api_keys: Arc<dyn ApiKeyRepository>,
    tokens: Arc<dyn TokenRepository>,
    hasher: CredentialHasher,
    mailer: Arc<EmailService>,
    templates: Arc<Templates>,
}

impl AccountService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        api_keys: Arc<dyn ApiKeyRepository>,
        tokens: Arc<dyn TokenRepository>,
        hasher: CredentialHasher,
        mailer: Arc<EmailService>,
        templates: Arc<Templates>,
    ) -> Self {
        Self {
            users,
            api_keys,
            tokens,
            hasher,
            mailer,
            templates,
        }
    }

    async fn hash(&self, secret: &str) -> anyhow::Result<String> {
        let hasher = self.hasher.clone();
        let secret = secret.to_string();
        tokio::task::spawn_blocking(move || hasher.hash(&secret))
            .await
            .context("Hashing task failed")?
    }

    async fn verify(&self, secret: &str, hash: Option<&str>) -> anyhow::Result<bool> {
        let Some(hash) = hash else {
            return Ok(false);
        };
        let hasher = self.hasher.clone();
        let secret = secret.to_string();
        let hash = hash.to_string();
        tokio::task::spawn_blocking(move || hasher.verify(&secret, &hash))
            .await
            .context("Verification task failed")
    }

    async fn issue_api_key(
        &self,
        scope: TenantScope,
        name: Option<String>,
    ) -> anyhow::Result<IssuedApiKey> {
        let plaintext = generate_secret();
        let hash = self.hash(&plaintext).await?;
        let record = self
            .api_keys
            .create(&ApiKey::new(scope.user_id(), hash, name))
            .await?;
        Ok(IssuedApiKey { record, plaintext })
    }

    /// Create a user and its first API key.
    ///
    /// Returns the plaintext key; it is not stored anywhere.
    pub async fn create_user(
        &self,
        username: &str,
        email: &str,
        password: Option<&str>,
        role: UserRole,
    ) -> Result<(User, IssuedApiKey), AccountError> {
        let username = username.trim();
        let email = email.trim();
        if username.is_empty() || email.is_empty() {
            return Err(AccountError::Validation(
                "Username and email are required.".to_string(),
            ));
        }
        let password = password.filter(|p| !p.is_empty());
        if let Some(password) = password {
            check_length(password, "Password must be at least 8 characters long.")?;
        }

        if self.users.exists(username, email).await? {
            return Err(AccountError::Conflict("User already exists".to_string()));
        }

        let password_hash = match password {
            Some(password) => Some(self.hash(password).await?),
            None => None,
        };
        let user = self
            .users
            .create(&User::new(
                username.to_string(),
                email.to_string(),
                password_hash,
                role,
            ))
            .await?;
        let key = self
            .issue_api_key(TenantScope::of(&user), Some("default".to_string()))
            .await?;

        tracing::info!(username = %user.username, role = %user.role, "User created");
        Ok((user, key))
    }

    pub async fn get_user(&self, id: Uuid) -> Result<User, AccountError> {
        self.users
            .get_by_id(id)
            .await?
            .ok_or_else(|| AccountError::NotFound("User not found".to_string()))
    }

    pub async fn summarize(&self, user: User) -> Result<UserSummary, AccountError> {
        let has_api_key = self.api_keys.has_active(TenantScope::of(&user)).await?;
        Ok(UserSummary { user, has_api_key })
    }

    /// Users newest first. `page` is zero-based.
    pub async fn list_users(
        &self,
        page: u32,
        page_size: u32,
    ) -> Result<PagedResult<UserSummary>, AccountError> {
        let page_size = page_size.clamp(1, 100);
        let (users, total) = self
            .users
            .list(page as i64 + 1, page_size as i64)
            .await?;

        let mut items = Vec::with_capacity(users.len());
        for user in users {
            items.push(self.summarize(user).await?);
        }
        Ok(PagedResult::new(items, total, page, page_size))
    }

    pub async fn list_api_keys(&self, scope: TenantScope) -> Result<Vec<ApiKey>, AccountError> {
        Ok(self.api_keys.list(scope).await?)
    }

    pub async fn create_api_key(
        &self,
        scope: TenantScope,
        name: Option<&str>,
    ) -> Result<IssuedApiKey, AccountError> {
        let name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(String::from);
        let key = self.issue_api_key(scope, name).await?;
        tracing::info!(user_id = %scope.user_id(), key_id = %key.record.id, "API key created");
        Ok(key)
    }

    pub async fn revoke_api_key(&self, scope: TenantScope, id: Uuid) -> Result<(), AccountError> {
        if !self.api_keys.deactivate(scope, id).await? {
            return Err(AccountError::NotFound("API key not found".to_string()));
        }
        tracing::info!(user_id = %scope.user_id(), key_id = %id, "API key revoked");
        Ok(())
    }

    /// Revoke every active key of a user and issue a single new one.
    pub async fn regenerate_api_key(
        &self,
        user_id: Uuid,
    ) -> Result<(User, IssuedApiKey), AccountError> {
        let user = self.get_user(user_id).await?;
        let scope = TenantScope::of(&user);
        let revoked = self.api_keys.deactivate_all(scope).await?;
        let key = self.issue_api_key(scope, Some("default".to_string())).await?;
        tracing::info!(username = %user.username, revoked, "API key regenerated");
        Ok((user, key))
    }

    pub async fn change_password(
        &self,
        user: &User,
        current: &str,
        new: &str,
        confirm: &str,
    ) -> Result<(), AccountError> {
        if !self.verify(current, user.password_hash.as_deref()).await? {
            return Err(AccountError::Validation(
                "Invalid current password. Please try again.".to_string(),
            ));
        }
        if new != confirm {
            return Err(AccountError::Validation(
                "New passwords do not match.".to_string(),
            ));
        }
        check_length(new, "New password must be at least 8 characters long.")?;

        let hash = self.hash(new).await?;
        self.users.update_password(user.id, &hash).await?;
        tracing::info!(username = %user.username, "Password changed");
        Ok(())
    }

    pub(crate) async fn issue_token(
        &self,
        kind: AccountTokenKind,
        user: &User,
        new_email: Option<String>,
    ) -> anyhow::Result<AccountToken> {
        let token = AccountToken::new(
            kind,
            user.id,
            generate_secret(),
            new_email,
            Duration::hours(ACCOUNT_TOKEN_TTL_HOURS),
        );
        self.tokens.create(&token).await?;
        Ok(token)
    }

    /// Mail a reset link to the active user owning `email`.
    ///
    /// Succeeds whether or not such a user exists and whether or not the mail
    /// went out.
    pub async fn request_password_reset(
        &self,
        email: &str,
        base_url: &str,
    ) -> Result<(), AccountError> {
        let user = match self.users.get_by_email(email.trim()).await? {
            Some(user) if user.is_active => user,
            _ => {
                tracing::debug!("Password reset requested for an unknown or inactive address");
                return Ok(());
            }
        };

        let token = self
            .issue_token(AccountTokenKind::PasswordReset, &user, None)
            .await?;
        let mut ctx = TeraContext::new();
        ctx.insert("username", &user.username);
        ctx.insert("reset_url", &link(base_url, "reset-password", &token.token));
        self.send_mail(&user.email, "Reset your password", "emails/password_reset.html", &ctx)
            .await;
        Ok(())
    }

    /// Whether a reset link can still be used; the reset page checks this
    /// before showing its form.
    pub async fn reset_token_is_valid(&self, token: &str) -> Result<bool, AccountError> {
        Ok(self
            .usable_token(AccountTokenKind::PasswordReset, token)
            .await?
            .is_some())
    }

    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<(), AccountError> {
        let Some(record) = self
            .usable_token(AccountTokenKind::PasswordReset, token)
            .await?
        else {
            return Err(AccountError::Validation(INVALID_RESET_TOKEN.to_string()));
        };
        check_length(new_password, "Password must be at least 8 characters long.")?;

        let hash = self.hash(new_password).await?;
        if !self
            .tokens
            .mark_used(AccountTokenKind::PasswordReset, record.id, Utc::now())
            .await?
        {
            return Err(AccountError::Validation(INVALID_RESET_TOKEN.to_string()));
        }
        self.users.update_password(record.user_id, &hash).await?;
        tracing::info!(user_id = %record.user_id, "Password reset");
        Ok(())
    }

    /// Start an e-mail change; the new address has to confirm it.
    pub async fn request_email_change(
        &self,
        user: &User,
        new_email: &str,
        password: &str,
        base_url: &str,
    ) -> Result<(), AccountError> {
        if !self.verify(password, user.password_hash.as_deref()).await? {
            return Err(AccountError::Validation(
                "Invalid password. Please try again.".to_string(),
            ));
        }
        let new_email = new_email.trim();
        if !new_email.contains('@') {
            return Err(AccountError::Validation(
                "Please enter a valid email address.".to_string(),
            ));
        }
        if new_email.eq_ignore_ascii_case(&user.email) {
            return Err(AccountError::Validation(
                "New email must be different from your current email.".to_string(),
            ));
        }
        if self.users.get_by_email(new_email).await?.is_some() {
            return Err(AccountError::Conflict(
                "This email address is already in use.".to_string(),
            ));
        }

        let token = self
            .issue_token(
                AccountTokenKind::EmailVerification,
                user,
                Some(new_email.to_string()),
            )
            .await?;
        let mut ctx = TeraContext::new();
        ctx.insert("username", &user.username);
        ctx.insert("new_email", new_email);
        ctx.insert("verify_url", &link(base_url, "verify-email", &token.token));
        self.send_mail(
            new_email,
            "Confirm your new email address",
            "emails/email_verification.html",
            &ctx,
        )
        .await;
        Ok(())
    }

    pub async fn verify_email(&self, token: &str) -> Result<(), AccountError> {
        let invalid = || AccountError::Validation(INVALID_VERIFICATION_TOKEN.to_string());
        let record = self
            .usable_token(AccountTokenKind::EmailVerification, token)
            .await?
            .ok_or_else(invalid)?;
        let new_email = record.new_email.clone().ok_or_else(invalid)?;

        // The address may have been taken since the link was sent.
        if let Some(owner) = self.users.get_by_email(&new_email).await? {
            if owner.id != record.user_id {
                return Err(AccountError::Conflict(
                    "This email address is already in use.".to_string(),
                ));
            }
        }

        if !self
            .tokens
            .mark_used(AccountTokenKind::EmailVerification, record.id, Utc::now())
            .await?
        {
            return Err(invalid());
        }
        self.users.update_email(record.user_id, &new_email).await?;
        tracing::info!(user_id = %record.user_id, "Email address changed");
        Ok(())
    }

    /// Flip a user's active flag. Admins cannot lock themselves out.
    pub async fn toggle_active(&self, admin: &User, user_id: Uuid) -> Result<User, AccountError> {
        if admin.id == user_id {
            return Err(AccountError::Validation(
                "Cannot deactivate your own account".to_string(),
            ));
        }
        let mut user = self.get_user(user_id).await?;
        user.is_active = !user.is_active;
        self.users.set_active(user.id, user.is_active).await?;
        tracing::info!(
            admin = %admin.username,
            username = %user.username,
            is_active = user.is_active,
            "User status changed"
        );
        Ok(user)
    }

    /// Create the configured administrator on first start.
    ///
    /// Does nothing unless username, email and password are all set, or when a
    /// user with that username or email already exists.
    pub async fn bootstrap_admin(
        &self,
        config: &AdminConfig,
    ) -> Result<Option<(User, IssuedApiKey)>, AccountError> {
        let (Some(username), Some(email), Some(password)) = (
            config.username.as_deref().filter(|v| !v.trim().is_empty()),
            config.email.as_deref().filter(|v| !v.trim().is_empty()),
            config.password.as_deref().filter(|v| !v.is_empty()),
        ) else {
            return Ok(None);
        };

        if self.users.exists(username.trim(), email.trim()).await? {
            tracing::debug!(username, "Bootstrap admin already exists");
            return Ok(None);
        }

        let created = self
            .create_user(username, email, Some(password), UserRole::Admin)
            .await?;
        Ok(Some(created))
    }

    async fn usable_token(
        &self,
        kind: AccountTokenKind,
        token: &str,
    ) -> anyhow::Result<Option<AccountToken>> {
        if token.is_empty() {
            return Ok(None);
        }
        let now = Utc::now();
        Ok(self
            .tokens
            .find(kind, token)
            .await?
            .filter(|t| t.is_usable_at(now)))
    }

    async fn send_mail(&self, to: &str, subject: &str, template: &str, ctx: &TeraContext) {
        let html = match self.templates.render(template, ctx) {
            Ok(html) => html,
            Err(e) => {
                tracing::error!("Failed to render {}: {}", template, e);
                return;
            }
        };
        if let Err(e) = self.mailer.send_html(to, subject, html).await {
            tracing::warn!(to, subject, "Account email not delivered: {}", e);
        }
    }
}

fn check_length(password: &str, message: &str) -> Result<(), AccountError> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(AccountError::Validation(message.to_string()));
    }
    Ok(())
}

fn link(base_url: &str, path: &str, token: &str) -> String {
    format!(
        "{}/{}?token={}",
        base_url.trim_end_matches('/'),
        path,
        urlencoding::encode(token)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SmtpConfig;
    use crate::db::repositories::{SqlxApiKeyRepository, SqlxTokenRepository, SqlxUserRepository};
    use crate::db::{create_test_pool, migrations};
    use crate::services::password::test_hasher;

    struct Fixture {
        accounts: AccountService,
        users: Arc<dyn UserRepository>,
        api_keys: Arc<dyn ApiKeyRepository>,
        tokens: Arc<dyn TokenRepository>,
        hasher: CredentialHasher,
    }

    async fn setup() -> Fixture {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        let users = SqlxUserRepository::boxed(pool.clone());
        let api_keys = SqlxApiKeyRepository::boxed(pool.clone());
        let tokens = SqlxTokenRepository::boxed(pool);
        let hasher = test_hasher();
        let accounts = AccountService::new(
            users.clone(),
            api_keys.clone(),
            tokens.clone(),
            hasher.clone(),
            Arc::new(EmailService::new(SmtpConfig::default())),
            Arc::new(Templates::load().expect("templates")),
        );
        Fixture {
            accounts,
            users,
            api_keys,
            tokens,
            hasher,
        }
    }

    impl Fixture {
        async fn alice(&self) -> User {
            self.accounts
                .create_user("alice", "alice@example.com", Some("password1"), UserRole::User)
                .await
                .unwrap()
                .0
        }
    }

    fn message(err: AccountError) -> String {
        err.to_string()
    }

    #[tokio::test]
    async fn test_create_user_issues_first_key() {
        let f = setup().await;
        let (user, key) = f
            .accounts
            .create_user(" alice ", "alice@example.com", Some("password1"), UserRole::User)
            .await
            .unwrap();

        assert_eq!(user.username, "alice");
        assert!(f.hasher.verify("password1", user.password_hash.as_deref().unwrap()));
        assert_eq!(key.record.user_id, user.id);
        assert!(f.hasher.verify(&key.plaintext, &key.record.key_hash));
        assert!(f.api_keys.has_active(TenantScope::of(&user)).await.unwrap());
    }

    #[tokio::test]
    async fn test_create_user_without_password() {
        let f = setup().await;
        let (user, _) = f
            .accounts
            .create_user("agent", "agent@example.com", Some(""), UserRole::Readonly)
            .await
            .unwrap();
        assert!(user.password_hash.is_none());
        assert_eq!(user.role, UserRole::Readonly);
    }

    #[tokio::test]
    async fn test_create_user_conflict() {
        let f = setup().await;
        f.alice().await;

        for (username, email) in [("alice", "other@example.com"), ("other", "ALICE@example.com")] {
            let err = f
                .accounts
                .create_user(username, email, None, UserRole::User)
                .await
                .unwrap_err();
            assert!(matches!(err, AccountError::Conflict(_)), "{} {}", username, email);
            assert_eq!(message(err), "User already exists");
        }
    }

    #[tokio::test]
    async fn test_create_user_short_password() {
        let f = setup().await;
        let err = f
            .accounts
            .create_user("bob", "bob@example.com", Some("short"), UserRole::User)
            .await
            .unwrap_err();
        assert!(matches!(err, AccountError::Validation(_)));
    }

    #[tokio::test]
    async fn test_api_key_lifecycle() {
        let f = setup().await;
        let alice = f.alice().await;
        let scope = TenantScope::of(&alice);

        let key = f.accounts.create_api_key(scope, Some("  laptop ")).await.unwrap();
        assert_eq!(key.record.name.as_deref(), Some("laptop"));
        assert_eq!(f.accounts.list_api_keys(scope).await.unwrap().len(), 2);

        f.accounts.revoke_api_key(scope, key.record.id).await.unwrap();
        let revoked = f.accounts.list_api_keys(scope).await.unwrap();
        assert!(!revoked.iter().find(|k| k.id == key.record.id).unwrap().is_active);

        let bob = f
            .accounts
            .create_user("bob", "bob@example.com", None, UserRole::User)
            .await
            .unwrap()
            .1;
        let err = f
            .accounts
            .revoke_api_key(scope, bob.record.id)
            .await
            .unwrap_err();
        assert_eq!(message(err), "API key not found");
    }

    #[tokio::test]
    async fn test_regenerate_replaces_all_keys() {
        let f = setup().await;
        let alice = f.alice().await;
        let scope = TenantScope::of(&alice);
        f.accounts.create_api_key(scope, None).await.unwrap();

        let (user, key) = f.accounts.regenerate_api_key(alice.id).await.unwrap();
        assert_eq!(user.id, alice.id);

        let active: Vec<_> = f
            .api_keys
            .list(scope)
            .await
            .unwrap()
            .into_iter()
            .filter(|k| k.is_active)
            .collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, key.record.id);

        assert!(matches!(
            f.accounts.regenerate_api_key(Uuid::new_v4()).await,
            Err(AccountError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_change_password() {
        let f = setup().await;
        let alice = f.alice().await;

        let cases = [
            ("wrong", "newpassword", "newpassword", "Invalid current password. Please try again."),
            ("password1", "newpassword", "different", "New passwords do not match."),
            ("password1", "short", "short", "New password must be at least 8 characters long."),
        ];
        for (current, new, confirm, expected) in cases {
            let err = f
                .accounts
                .change_password(&alice, current, new, confirm)
                .await
                .unwrap_err();
            assert_eq!(message(err), expected);
        }

        f.accounts
            .change_password(&alice, "password1", "newpassword", "newpassword")
            .await
            .unwrap();
        let stored = f.users.get_by_id(alice.id).await.unwrap().unwrap();
        assert!(f.hasher.verify("newpassword", stored.password_hash.as_deref().unwrap()));
    }

    #[tokio::test]
    async fn test_password_reset_flow() {
        let f = setup().await;
        let alice = f.alice().await;

        // Unknown addresses and undeliverable mail both report success.
        f.accounts
            .request_password_reset("nobody@example.com", "http://localhost")
            .await
            .unwrap();
        f.accounts
            .request_password_reset("alice@example.com", "http://localhost")
            .await
            .unwrap();

        let token = f
            .accounts
            .issue_token(AccountTokenKind::PasswordReset, &alice, None)
            .await
            .unwrap();
        assert!(f.accounts.reset_token_is_valid(&token.token).await.unwrap());

        let err = f.accounts.reset_password(&token.token, "short").await.unwrap_err();
        assert_eq!(message(err), "Password must be at least 8 characters long.");

        f.accounts.reset_password(&token.token, "brand-new-pw").await.unwrap();
        let stored = f.users.get_by_id(alice.id).await.unwrap().unwrap();
        assert!(f.hasher.verify("brand-new-pw", stored.password_hash.as_deref().unwrap()));

        // Single use
        let err = f.accounts.reset_password(&token.token, "another-pw").await.unwrap_err();
        assert_eq!(message(err), INVALID_RESET_TOKEN);
        assert!(!f.accounts.reset_token_is_valid(&token.token).await.unwrap());
        assert!(!f.accounts.reset_token_is_valid("").await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_reset_token() {
        let f = setup().await;
        let alice = f.alice().await;
        let expired = AccountToken::new(
            AccountTokenKind::PasswordReset,
            alice.id,
            "expired-token".into(),
            None,
            Duration::hours(-1),
        );
        f.tokens.create(&expired).await.unwrap();

        let err = f.accounts.reset_password("expired-token", "brand-new-pw").await.unwrap_err();
        assert_eq!(message(err), INVALID_RESET_TOKEN);
    }

    #[tokio::test]
    async fn test_email_change_validation() {
        let f = setup().await;
        let alice = f.alice().await;
        f.accounts
            .create_user("bob", "bob@example.com", None, UserRole::User)
            .await
            .unwrap();

        let cases = [
            ("new@example.com", "wrong", "Invalid password. Please try again."),
            ("ALICE@example.com", "password1", "New email must be different from your current email."),
            ("bob@example.com", "password1", "This email address is already in use."),
        ];
        for (new_email, password, expected) in cases {
            let err = f
                .accounts
                .request_email_change(&alice, new_email, password, "http://localhost")
                .await
                .unwrap_err();
            assert_eq!(message(err), expected);
        }

        f.accounts
            .request_email_change(&alice, "new@example.com", "password1", "http://localhost")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_verify_email() {
        let f = setup().await;
        let alice = f.alice().await;
        let token = f
            .accounts
            .issue_token(
                AccountTokenKind::EmailVerification,
                &alice,
                Some("alice@new.example.com".into()),
            )
            .await
            .unwrap();

        f.accounts.verify_email(&token.token).await.unwrap();
        let stored = f.users.get_by_id(alice.id).await.unwrap().unwrap();
        assert_eq!(stored.email, "alice@new.example.com");

        let err = f.accounts.verify_email(&token.token).await.unwrap_err();
        assert_eq!(message(err), INVALID_VERIFICATION_TOKEN);
        assert!(f.accounts.verify_email("made-up").await.is_err());
    }

    #[tokio::test]
    async fn test_toggle_active() {
        let f = setup().await;
        let (admin, _) = f
            .accounts
            .create_user("root", "root@example.com", None, UserRole::Admin)
            .await
            .unwrap();
        let alice = f.alice().await;

        let err = f.accounts.toggle_active(&admin, admin.id).await.unwrap_err();
        assert_eq!(message(err), "Cannot deactivate your own account");

        let toggled = f.accounts.toggle_active(&admin, alice.id).await.unwrap();
        assert!(!toggled.is_active);
        let toggled = f.accounts.toggle_active(&admin, alice.id).await.unwrap();
        assert!(toggled.is_active);
    }

    #[tokio::test]
    async fn test_list_users_paging() {
        let f = setup().await;
        for i in 0..3 {
            f.accounts
                .create_user(&format!("user{}", i), &format!("u{}@example.com", i), None, UserRole::User)
                .await
                .unwrap();
        }

        let first = f.accounts.list_users(0, 2).await.unwrap();
        assert_eq!(first.items.len(), 2);
        assert_eq!(first.total, 3);
        assert!(first.has_more);
        assert!(first.items.iter().all(|s| s.has_api_key));

        let second = f.accounts.list_users(1, 2).await.unwrap();
        assert_eq!(second.items.len(), 1);
        assert!(!second.has_more);
    }

    #[tokio::test]
    async fn test_bootstrap_admin() {
        let f = setup().await;

        let partial = AdminConfig {
            username: Some("root".into()),
            email: None,
            password: Some("password1".into()),
        };
        assert!(f.accounts.bootstrap_admin(&partial).await.unwrap().is_none());

        let config = AdminConfig {
            username: Some("root".into()),
            email: Some("root@example.com".into()),
            password: Some("password1".into()),
        };
        let (admin, _) = f.accounts.bootstrap_admin(&config).await.unwrap().unwrap();
        assert!(admin.is_admin());

        // Second start is a no-op.
        assert!(f.accounts.bootstrap_admin(&config).await.unwrap().is_none());
        assert_eq!(f.users.count().await.unwrap(), 1);
    }
}
