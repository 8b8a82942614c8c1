use crate::login::session::AdminIdentity;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use std::fmt::Display;
use std::future::Future;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("Invalid password hash: {0}")]
    InvalidHash(argon2::password_hash::Error),
    #[error("Failed to hash password: {0}")]
    Hash(argon2::password_hash::Error),
}

/// An administrator account as held by a [CredentialStore].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminUser {
    pub id: i64,
    pub username: String,
    /// Argon2 hash in PHC string format.
    pub password_hash: String,
}

impl AdminUser {
    pub fn identity(&self) -> AdminIdentity {
        AdminIdentity {
            id: self.id,
            username: self.username.clone(),
        }
    }
}

/// Looks up administrator accounts by username.
pub trait CredentialStore {
    type Error: Display;

    fn find_admin(
        &self,
        username: &str,
    ) -> impl Future<Output = Result<Option<AdminUser>, Self::Error>>;
}

pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(PasswordError::Hash)?;
    Ok(hash.to_string())
}

/// Returns whether `password` matches `hash`; a hash that cannot be parsed is an error.
pub fn verify_password(hash: &str, password: &str) -> Result<bool, PasswordError> {
    let parsed_hash = PasswordHash::new(hash).map_err(PasswordError::InvalidHash)?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

#[cfg(feature = "dashmap")]
pub use memory::InMemoryCredentialStore;

#[cfg(feature = "dashmap")]
mod memory {
    use super::{hash_password, AdminUser, CredentialStore, PasswordError};
    use dashmap::DashMap;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;

    /// A [CredentialStore] held in memory.
    #[derive(Clone, Default)]
    pub struct InMemoryCredentialStore {
        users: Arc<DashMap<String, AdminUser>>,
        last_id: Arc<AtomicI64>,
    }

    impl InMemoryCredentialStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Create an account, or change the password of an existing one (keeping its id).
        pub fn add_admin(
            &self,
            username: &str,
            password: &str,
        ) -> Result<AdminUser, PasswordError> {
            let password_hash = hash_password(password)?;
            Ok(self.insert_hashed(username, password_hash))
        }

        /// As [InMemoryCredentialStore::add_admin], with an already hashed password.
        pub fn insert_hashed(&self, username: &str, password_hash: String) -> AdminUser {
            let mut entry = self
                .users
                .entry(username.to_owned())
                .or_insert_with(|| AdminUser {
                    id: self.last_id.fetch_add(1, Ordering::Relaxed) + 1,
                    username: username.to_owned(),
                    password_hash: String::new(),
                });
            entry.password_hash = password_hash;
            entry.clone()
        }

        pub fn remove_admin(&self, username: &str) -> Option<AdminUser> {
            self.users.remove(username).map(|(_, user)| user)
        }
    }

    impl CredentialStore for InMemoryCredentialStore {
        type Error = Infallible;

        async fn find_admin(&self, username: &str) -> Result<Option<AdminUser>, Self::Error> {
            Ok(self.users.get(username).map(|user| user.value().clone()))
        }
    }
}
