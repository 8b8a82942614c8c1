#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod backend;
pub mod clock;
mod limiter;
pub mod login;
mod middleware;

pub use clock::{Clock, ManualClock, SystemClock};
pub use limiter::{
    sanitize_key, ConfigError, Decision, KeyEncoding, RateLimitStatus, RateLimiter,
    RateLimiterBuilder, DEFAULT_IDENTIFIER, DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW_SECONDS,
};
pub use middleware::builder::{
    RateLimitBuilder, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING, X_RATELIMIT_RESET,
};
pub use middleware::key_builder::{KeyFunctionBuilder, KeyFuture};
pub use middleware::{RateLimit, RateLimitMiddleware};
