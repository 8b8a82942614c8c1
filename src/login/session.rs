use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use subtle::ConstantTimeEq;
use thiserror::Error;

/// How long an issued CSRF token stays valid.
pub const CSRF_TOKEN_TTL_SECONDS: u64 = 30 * 60;

const RANDOM_BYTES: usize = 32;

/// The signed in administrator, as remembered by the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminIdentity {
    pub id: i64,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedCsrfToken {
    pub token: String,
    /// Seconds since the Unix epoch.
    pub issued_at: u64,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("Not logged in")]
pub struct NotLoggedIn;

/// Per client state carried between requests.
///
/// Handlers receive the session explicitly; persisting it between requests (cookie, store, ...)
/// is up to the host application, which is why it is serializable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionContext {
    id: String,
    admin: Option<AdminIdentity>,
    csrf_tokens: HashMap<String, IssuedCsrfToken>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self {
            id: random_hex(),
            admin: None,
            csrf_tokens: HashMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn admin(&self) -> Option<&AdminIdentity> {
        self.admin.as_ref()
    }

    pub fn is_logged_in(&self) -> bool {
        self.admin.is_some()
    }

    /// Guard for back office handlers.
    pub fn require_login(&self) -> Result<&AdminIdentity, NotLoggedIn> {
        self.admin.as_ref().ok_or(NotLoggedIn)
    }

    /// Remember `identity` and move the session to a fresh id.
    pub fn sign_in(&mut self, identity: AdminIdentity) {
        self.admin = Some(identity);
        self.regenerate_id();
    }

    /// Forget the administrator and every outstanding token.
    pub fn sign_out(&mut self) {
        self.admin = None;
        self.csrf_tokens.clear();
        self.regenerate_id();
    }

    pub fn regenerate_id(&mut self) {
        self.id = random_hex();
    }

    /// Issue a token for `form`, replacing any earlier one.
    pub fn issue_csrf_token(&mut self, form: &str, now: u64) -> String {
        let token = random_hex();
        self.csrf_tokens.insert(
            form.to_owned(),
            IssuedCsrfToken {
                token: token.clone(),
                issued_at: now,
            },
        );
        token
    }

    /// Check a submitted token for `form`.
    ///
    /// A matching token is consumed. An expired token is discarded and never matches. A wrong
    /// token leaves the issued one in place.
    pub fn verify_csrf_token(&mut self, form: &str, token: &str, now: u64) -> bool {
        let Some(issued) = self.csrf_tokens.get(form) else {
            return false;
        };
        if now.saturating_sub(issued.issued_at) > CSRF_TOKEN_TTL_SECONDS {
            self.csrf_tokens.remove(form);
            return false;
        }
        let matches: bool = issued.token.as_bytes().ct_eq(token.as_bytes()).into();
        if matches {
            self.csrf_tokens.remove(form);
        }
        matches
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

fn random_hex() -> String {
    let mut bytes = [0u8; RANDOM_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
