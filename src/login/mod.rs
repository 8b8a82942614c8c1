//! The administrator login flow: a rate limited, CSRF protected password check.
//!
//! [LoginFlow::attempt] hashes on the actix (Tokio) blocking pool, so it must run inside that
//! runtime.
//!
//! ```no_run
//! # #[cfg(feature = "dashmap")]
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use login_rate_limit::backend::file::FileBackend;
//! use login_rate_limit::login::{
//!     login_limiter, InMemoryCredentialStore, LoginFlow, LoginForm, SessionContext,
//! };
//!
//! let limiter = login_limiter(FileBackend::default()).build()?;
//! let credentials = InMemoryCredentialStore::new();
//! credentials.add_admin("admin", "correct horse battery staple")?;
//! let flow = LoginFlow::new(limiter, credentials);
//!
//! let mut session = SessionContext::new();
//! let token = flow.csrf_token(&mut session);
//! let form = LoginForm {
//!     username: "admin".to_owned(),
//!     password: "correct horse battery staple".to_owned(),
//!     csrf_token: Some(token),
//! };
//! let outcome = flow.attempt(&mut session, "203.0.113.9", &form).await;
//! assert!(outcome.is_authenticated());
//! # Ok(())
//! # }
//! ```

mod credentials;
mod session;

pub use credentials::{hash_password, verify_password, AdminUser, CredentialStore, PasswordError};
#[cfg(feature = "dashmap")]
pub use credentials::InMemoryCredentialStore;
pub use session::{
    AdminIdentity, IssuedCsrfToken, NotLoggedIn, SessionContext, CSRF_TOKEN_TTL_SECONDS,
};

use crate::backend::Backend;
use crate::clock::Clock;
use crate::limiter::{RateLimiter, RateLimiterBuilder};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

pub const LOGIN_IDENTIFIER: &str = "login";
pub const LOGIN_MAX_ATTEMPTS: u64 = 5;
pub const LOGIN_WINDOW_SECONDS: u64 = 300;
/// The form name the login CSRF token is issued for.
pub const LOGIN_FORM: &str = "login_form";

/// A limiter builder preset for login attempts: 5 per client IP every 5 minutes.
pub fn login_limiter<B: Backend>(backend: B) -> RateLimiterBuilder<B> {
    RateLimiter::builder(backend)
        .identifier(LOGIN_IDENTIFIER)
        .max_requests(LOGIN_MAX_ATTEMPTS)
        .window(Duration::from_secs(LOGIN_WINDOW_SECONDS))
}

/// A submitted login form.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub csrf_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    Authenticated(AdminIdentity),
    /// Too many attempts from this client; `retry_after` is in seconds.
    RateLimited {
        retry_after: u64,
    },
    Rejected(LoginRejection),
}

impl LoginOutcome {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, LoginOutcome::Authenticated(_))
    }

    /// Wait time in whole minutes, rounded up, for display.
    pub fn retry_after_minutes(&self) -> Option<u64> {
        match self {
            LoginOutcome::RateLimited { retry_after } => Some(retry_after.div_ceil(60)),
            _ => None,
        }
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum LoginRejection {
    #[error("CSRF token is not set")]
    CsrfMissing,
    #[error("CSRF token validation failed")]
    CsrfInvalid,
    #[error("Username and password are required")]
    MissingFields { username: bool, password: bool },
    #[error("Invalid username or password")]
    InvalidCredentials,
    #[error("Login is temporarily unavailable")]
    Unavailable,
}

/// Checks login attempts against a rate limiter and a [CredentialStore].
pub struct LoginFlow<B, C, S> {
    limiter: RateLimiter<B, C>,
    credentials: S,
}

impl<B, C, S> LoginFlow<B, C, S>
where
    B: Backend,
    C: Clock,
    S: CredentialStore,
{
    pub fn new(limiter: RateLimiter<B, C>, credentials: S) -> Self {
        Self {
            limiter,
            credentials,
        }
    }

    pub fn limiter(&self) -> &RateLimiter<B, C> {
        &self.limiter
    }

    pub fn credentials(&self) -> &S {
        &self.credentials
    }

    /// Issue the token to embed in the login form.
    pub fn csrf_token(&self, session: &mut SessionContext) -> String {
        session.issue_csrf_token(LOGIN_FORM, self.limiter.clock().now())
    }

    /// Handle a submitted login form from `client_ip`.
    ///
    /// Every attempt counts against the client's limit, whatever its outcome. A successful login
    /// signs the session in and clears the client's attempts.
    ///
    /// # Panics
    ///
    /// The password check runs on the blocking thread pool of the actix (Tokio) runtime, so this
    /// panics if polled outside of one. Inside an actix-web handler, or an `#[actix_web::test]`,
    /// the runtime is always present.
    pub async fn attempt(
        &self,
        session: &mut SessionContext,
        client_ip: &str,
        form: &LoginForm,
    ) -> LoginOutcome {
        let (decision, status) = self.limiter.request(client_ip).await;
        if decision.is_denied() {
            return LoginOutcome::RateLimited {
                retry_after: status.seconds_until_reset,
            };
        }

        let now = self.limiter.clock().now();
        match form.csrf_token.as_deref() {
            None => {
                log::warn!("Login rejected: CSRF token is not set (IP: {})", client_ip);
                return LoginOutcome::Rejected(LoginRejection::CsrfMissing);
            }
            Some(token) if !session.verify_csrf_token(LOGIN_FORM, token, now) => {
                log::warn!("Login rejected: CSRF token validation failed (IP: {})", client_ip);
                return LoginOutcome::Rejected(LoginRejection::CsrfInvalid);
            }
            Some(_) => {}
        }

        let username = form.username.trim();
        let password = form.password.trim();
        if username.is_empty() || password.is_empty() {
            return LoginOutcome::Rejected(LoginRejection::MissingFields {
                username: username.is_empty(),
                password: password.is_empty(),
            });
        }

        let user = match self.credentials.find_admin(username).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                log::warn!(
                    "Failed login attempt for unknown user {:?} (IP: {})",
                    username,
                    client_ip
                );
                return LoginOutcome::Rejected(LoginRejection::InvalidCredentials);
            }
            Err(e) => {
                log::error!(
                    "Credential lookup failed for user {:?} (IP: {}): {}",
                    username,
                    client_ip,
                    e
                );
                return LoginOutcome::Rejected(LoginRejection::Unavailable);
            }
        };

        let hash = user.password_hash.clone();
        let password = password.to_owned();
        let verified =
            actix_web::rt::task::spawn_blocking(move || verify_password(&hash, &password)).await;
        match verified {
            Ok(Ok(true)) => {}
            Ok(Ok(false)) => {
                log::warn!(
                    "Failed login attempt for user {:?}: invalid password (IP: {})",
                    username,
                    client_ip
                );
                return LoginOutcome::Rejected(LoginRejection::InvalidCredentials);
            }
            Ok(Err(e)) => {
                log::error!("Stored password for user {:?} is unusable: {}", username, e);
                return LoginOutcome::Rejected(LoginRejection::InvalidCredentials);
            }
            Err(e) => {
                log::error!("Password verification task failed: {}", e);
                return LoginOutcome::Rejected(LoginRejection::Unavailable);
            }
        }

        let identity = user.identity();
        session.sign_in(identity.clone());
        self.limiter.reset(client_ip).await;
        log::info!(
            "Successful login: user {:?} (id: {}) from IP: {}",
            identity.username,
            identity.id,
            client_ip
        );
        LoginOutcome::Authenticated(identity)
    }
}
