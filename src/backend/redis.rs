use crate::backend::Backend;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::borrow::Cow;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Redis error: {0}")]
    Redis(
        #[source]
        #[from]
        redis::RedisError,
    ),
    #[error("Malformed rate limit window: {0}")]
    Malformed(
        #[source]
        #[from]
        serde_json::Error,
    ),
}

/// A [Backend] that stores each window in Redis as a JSON array string.
///
/// Lets several application servers share one set of windows.
#[derive(Clone)]
pub struct RedisBackend {
    connection: ConnectionManager,
    key_prefix: Option<String>,
    expiry: Option<Duration>,
}

impl RedisBackend {
    /// ```no_run
    /// # use login_rate_limit::backend::redis::RedisBackend;
    /// # use redis::aio::ConnectionManager;
    /// # async fn example() -> redis::RedisResult<()> {
    /// let client = redis::Client::open("redis://127.0.0.1/")?;
    /// let backend = RedisBackend::builder(ConnectionManager::new(client).await?)
    ///     .key_prefix(Some("rate_limits:"))
    ///     .build();
    /// # Ok(())
    /// # }
    /// ```
    pub fn builder(connection: ConnectionManager) -> Builder {
        Builder {
            connection,
            key_prefix: None,
            expiry: None,
        }
    }

    fn make_key<'t>(&self, key: &'t str) -> Cow<'t, str> {
        match &self.key_prefix {
            None => Cow::Borrowed(key),
            Some(prefix) => Cow::Owned(format!("{prefix}{key}")),
        }
    }
}

pub struct Builder {
    connection: ConnectionManager,
    key_prefix: Option<String>,
    expiry: Option<Duration>,
}

impl Builder {
    /// Prepended to every storage key, to keep windows apart from other data in the same
    /// database.
    pub fn key_prefix(mut self, key_prefix: Option<&str>) -> Self {
        self.key_prefix = key_prefix.map(ToOwned::to_owned);
        self
    }

    /// Let Redis drop a window that has not been written for `expiry`.
    ///
    /// Set this to at least the limiter's window size, otherwise windows may disappear while they
    /// still hold valid events. Rounded up to whole seconds.
    pub fn expiry(mut self, expiry: Option<Duration>) -> Self {
        self.expiry = expiry;
        self
    }

    pub fn build(self) -> RedisBackend {
        RedisBackend {
            connection: self.connection,
            key_prefix: self.key_prefix,
            expiry: self.expiry,
        }
    }
}

impl Backend for RedisBackend {
    type Error = Error;

    async fn load(&self, key: &str) -> Result<Vec<u64>, Self::Error> {
        let key = self.make_key(key);
        let mut con = self.connection.clone();
        let document: Option<String> = con.get(key.as_ref()).await?;
        match document {
            None => Ok(Vec::new()),
            Some(document) => Ok(serde_json::from_str(&document)?),
        }
    }

    async fn save(&self, key: &str, events: &[u64]) -> Result<(), Self::Error> {
        let key = self.make_key(key);
        let document = serde_json::to_string(events)?;
        let mut con = self.connection.clone();
        match self.expiry {
            Some(expiry) => {
                let seconds = expiry.as_secs() + u64::from(expiry.subsec_nanos() > 0);
                let () = con
                    .set_ex(key.as_ref(), document, seconds.max(1) as usize)
                    .await?;
            }
            None => {
                let () = con.set(key.as_ref(), document).await?;
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), Self::Error> {
        let key = self.make_key(key);
        let mut con = self.connection.clone();
        let () = con.del(key.as_ref()).await?;
        Ok(())
    }
}
