pub mod builder;
pub mod key_builder;
#[cfg(all(test, feature = "dashmap"))]
mod tests;

use crate::backend::Backend;
use crate::clock::Clock;
use crate::limiter::{RateLimitStatus, RateLimiter};
use actix_web::body::EitherBody;
use actix_web::dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::http::header::HeaderMap;
use actix_web::http::StatusCode;
use actix_web::HttpResponse;
use builder::RateLimitBuilder;
use futures::future::{ok, LocalBoxFuture, Ready};
use std::cell::RefCell;
use std::{future::Future, rc::Rc};

type AllowedTransformation = dyn Fn(&mut HeaderMap, &RateLimitStatus, bool);
type DeniedResponse = dyn Fn(&RateLimitStatus) -> HttpResponse;
type ResetCondition = dyn Fn(StatusCode) -> bool;

/// Rate limit middleware.
///
/// Derives a key from each request, asks the [RateLimiter] whether to admit it, and optionally
/// resets the key once the wrapped service has responded (e.g. after a successful login).
pub struct RateLimit<BA, C, F> {
    limiter: RateLimiter<BA, C>,
    key_fn: Rc<F>,
    allowed_transformation: Option<Rc<AllowedTransformation>>,
    denied_response: Rc<DeniedResponse>,
    reset_condition: Option<Rc<ResetCondition>>,
}

impl<BA, C, F, O> Clone for RateLimit<BA, C, F>
where
    BA: Backend + 'static,
    C: Clock + 'static,
    F: Fn(&ServiceRequest) -> O + 'static,
    O: Future<Output = Result<String, actix_web::Error>>,
{
    fn clone(&self) -> Self {
        Self {
            limiter: self.limiter.clone(),
            key_fn: self.key_fn.clone(),
            allowed_transformation: self.allowed_transformation.clone(),
            denied_response: self.denied_response.clone(),
            reset_condition: self.reset_condition.clone(),
        }
    }
}

impl<BA, C, F, O> RateLimit<BA, C, F>
where
    BA: Backend + 'static,
    C: Clock + 'static,
    F: Fn(&ServiceRequest) -> O + 'static,
    O: Future<Output = Result<String, actix_web::Error>>,
{
    /// # Arguments
    ///
    /// * `limiter`: The rate limiter to consult.
    /// * `key_fn`: A future that produces the rate limit key for the incoming request, see
    ///   [KeyFunctionBuilder](crate::KeyFunctionBuilder).
    pub fn builder(limiter: RateLimiter<BA, C>, key_fn: F) -> RateLimitBuilder<BA, C, F> {
        RateLimitBuilder::new(limiter, key_fn)
    }
}

impl<S, B, BA, C, F, O> Transform<S, ServiceRequest> for RateLimit<BA, C, F>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error> + 'static,
    S::Future: 'static,
    B: 'static,
    BA: Backend + 'static,
    C: Clock + 'static,
    F: Fn(&ServiceRequest) -> O + 'static,
    O: Future<Output = Result<String, actix_web::Error>>,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = actix_web::Error;
    type Transform = RateLimitMiddleware<S, BA, C, F>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(RateLimitMiddleware {
            service: Rc::new(RefCell::new(service)),
            limiter: self.limiter.clone(),
            key_fn: Rc::clone(&self.key_fn),
            allowed_transformation: self.allowed_transformation.clone(),
            denied_response: self.denied_response.clone(),
            reset_condition: self.reset_condition.clone(),
        })
    }
}

pub struct RateLimitMiddleware<S, BA, C, F> {
    service: Rc<RefCell<S>>,
    limiter: RateLimiter<BA, C>,
    key_fn: Rc<F>,
    allowed_transformation: Option<Rc<AllowedTransformation>>,
    denied_response: Rc<DeniedResponse>,
    reset_condition: Option<Rc<ResetCondition>>,
}

impl<S, B, BA, C, F, O> Service<ServiceRequest> for RateLimitMiddleware<S, BA, C, F>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error> + 'static,
    S::Future: 'static,
    B: 'static,
    BA: Backend + 'static,
    C: Clock + 'static,
    F: Fn(&ServiceRequest) -> O + 'static,
    O: Future<Output = Result<String, actix_web::Error>>,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = actix_web::Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let limiter = self.limiter.clone();
        let key_fn = self.key_fn.clone();
        let allowed_transformation = self.allowed_transformation.clone();
        let denied_response = self.denied_response.clone();
        let reset_condition = self.reset_condition.clone();

        Box::pin(async move {
            let key = match (key_fn)(&req).await {
                Ok(key) => key,
                Err(e) => {
                    log::error!("Rate limiter key function failed: {e}");
                    return Ok(req.into_response(e.error_response()).map_into_right_body());
                }
            };

            // Storage problems are absorbed by the limiter (fail open), so this always decides.
            let (decision, status) = limiter.request(&key).await;
            if decision.is_denied() {
                let response: HttpResponse = (denied_response)(&status);
                return Ok(req.into_response(response).map_into_right_body());
            }

            let mut service_response = service.call(req).await?;

            let mut was_reset = false;
            if let Some(reset_condition) = reset_condition {
                if reset_condition(service_response.status()) {
                    limiter.reset(&key).await;
                    was_reset = true;
                }
            }

            if let Some(transformation) = allowed_transformation {
                (transformation)(service_response.headers_mut(), &status, was_reset);
            }

            Ok(service_response.map_into_left_body())
        })
    }
}
