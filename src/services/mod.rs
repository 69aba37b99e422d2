//! Services layer - Business logic
//!
//! The credential, token and request-governance core (hashing, signing, rate
//! limiting, sessions, CSRF, authentication, login, tenant scoping) plus the
//! account and history services built on top of it.

pub mod account;
pub mod auth;
pub mod csrf;
pub mod email;
pub mod flash;
pub mod history;
pub mod login;
pub mod password;
pub mod rate_limiter;
pub mod search;
pub mod session;
pub mod signer;
pub mod tenant;

pub use account::{AccountError, AccountService, UserSummary};
pub use auth::{AuthContext, AuthError, AuthMethod, Authenticator, Credentials, UnauthorizedReason};
pub use csrf::CsrfService;
pub use email::EmailService;
pub use flash::{FlashMessage, FlashService};
pub use history::{HistoryError, HistoryService};
pub use login::{LoginOutcome, LoginPortal, LoginService};
pub use password::{generate_secret, CredentialHasher};
pub use rate_limiter::RateLimiter;
pub use search::SearchIndex;
pub use session::SessionService;
pub use signer::TokenSigner;
pub use tenant::{CommandFilter, TenantQuery, TenantScope};
