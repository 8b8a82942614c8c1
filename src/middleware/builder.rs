use crate::backend::Backend;
use crate::clock::Clock;
use crate::limiter::{RateLimitStatus, RateLimiter};
use crate::middleware::{AllowedTransformation, DeniedResponse, RateLimit, ResetCondition};
use actix_web::dev::ServiceRequest;
use actix_web::http::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use actix_web::http::StatusCode;
use actix_web::HttpResponse;
use once_cell::sync::Lazy;
use std::future::Future;
use std::rc::Rc;

pub static X_RATELIMIT_LIMIT: Lazy<HeaderName> =
    Lazy::new(|| HeaderName::from_static("x-ratelimit-limit"));

pub static X_RATELIMIT_REMAINING: Lazy<HeaderName> =
    Lazy::new(|| HeaderName::from_static("x-ratelimit-remaining"));

pub static X_RATELIMIT_RESET: Lazy<HeaderName> =
    Lazy::new(|| HeaderName::from_static("x-ratelimit-reset"));

pub struct RateLimitBuilder<BA, C, F> {
    limiter: RateLimiter<BA, C>,
    key_fn: F,
    allowed_transformation: Option<Rc<AllowedTransformation>>,
    denied_response: Rc<DeniedResponse>,
    reset_condition: Option<Rc<ResetCondition>>,
}

impl<BA, C, F, O> RateLimitBuilder<BA, C, F>
where
    BA: Backend + 'static,
    C: Clock + 'static,
    F: Fn(&ServiceRequest) -> O,
    O: Future<Output = Result<String, actix_web::Error>>,
{
    pub(super) fn new(limiter: RateLimiter<BA, C>, key_fn: F) -> Self {
        Self {
            limiter,
            key_fn,
            allowed_transformation: None,
            denied_response: Rc::new(|_: &RateLimitStatus| {
                HttpResponse::TooManyRequests().finish()
            }),
            reset_condition: None,
        }
    }

    /// Replace both the [RateLimitBuilder::request_allowed_transformation] and the
    /// [RateLimitBuilder::request_denied_response] so that responses carry:
    ///
    /// - `x-ratelimit-limit`\
    /// - `x-ratelimit-remaining`\
    /// - `x-ratelimit-reset` (seconds until the oldest request leaves the window)
    /// - `retry-after` (denied only, seconds until the oldest request leaves the window)
    ///
    /// If the key was reset after the response, the headers describe the fresh window.
    pub fn add_headers(mut self) -> Self {
        self.allowed_transformation = Some(Rc::new(
            |map: &mut HeaderMap, status: &RateLimitStatus, was_reset: bool| {
                if was_reset {
                    let fresh = RateLimitStatus {
                        limit: status.limit,
                        remaining: status.limit,
                        seconds_until_reset: 0,
                    };
                    insert_headers(map, &fresh);
                } else {
                    insert_headers(map, status);
                }
            },
        ));
        self.denied_response = Rc::new(|status: &RateLimitStatus| {
            let mut response = HttpResponse::TooManyRequests().finish();
            let map = response.headers_mut();
            insert_headers(map, status);
            map.insert(RETRY_AFTER, HeaderValue::from(status.retry_after().as_secs()));
            response
        });
        self
    }

    /// Edit the headers of admitted responses, given the status after admission and whether
    /// the [RateLimitBuilder::reset_condition] reset the key.
    ///
    /// `None` (the default) leaves responses untouched.
    pub fn request_allowed_transformation<M>(mut self, mutation: Option<M>) -> Self
    where
        M: Fn(&mut HeaderMap, &RateLimitStatus, bool) + 'static,
    {
        self.allowed_transformation = mutation.map(|m| Rc::new(m) as Rc<AllowedTransformation>);
        self
    }

    /// The response sent instead of calling the service when a request is denied.
    ///
    /// Defaults to an empty 429.
    pub fn request_denied_response<R>(mut self, denied_response: R) -> Self
    where
        R: Fn(&RateLimitStatus) -> HttpResponse + 'static,
    {
        self.denied_response = Rc::new(denied_response);
        self
    }

    /// After processing a request, reset the key's window based on the status code of the
    /// returned response.
    ///
    /// By default the window is never reset.
    pub fn reset_condition<R>(mut self, condition: Option<R>) -> Self
    where
        R: Fn(StatusCode) -> bool + 'static,
    {
        self.reset_condition = condition.map(|m| Rc::new(m) as Rc<ResetCondition>);
        self
    }

    /// Configures the [RateLimitBuilder::reset_condition] to reset if the status code
    /// is a success (2xx), so that e.g. a successful login clears earlier failed attempts.
    pub fn reset_on_success(mut self) -> Self {
        self.reset_condition = Some(Rc::new(|status: StatusCode| status.is_success()));
        self
    }

    pub fn build(self) -> RateLimit<BA, C, F> {
        RateLimit {
            limiter: self.limiter,
            key_fn: Rc::new(self.key_fn),
            allowed_transformation: self.allowed_transformation,
            denied_response: self.denied_response,
            reset_condition: self.reset_condition,
        }
    }
}

fn insert_headers(map: &mut HeaderMap, status: &RateLimitStatus) {
    map.insert(X_RATELIMIT_LIMIT.clone(), HeaderValue::from(status.limit));
    map.insert(
        X_RATELIMIT_REMAINING.clone(),
        HeaderValue::from(status.remaining),
    );
    map.insert(
        X_RATELIMIT_RESET.clone(),
        HeaderValue::from(status.seconds_until_reset),
    );
}
