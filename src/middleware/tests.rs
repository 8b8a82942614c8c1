use crate::backend::memory::InMemoryBackend;
use crate::clock::ManualClock;
use crate::middleware::*;
use crate::{KeyFunctionBuilder, RateLimiter};
use actix_web::http::header::{HeaderName, HeaderValue};
use actix_web::http::StatusCode;
use actix_web::test::{read_body, TestRequest};
use actix_web::{get, test, App, HttpResponse, Responder};
use std::time::Duration;

const START: u64 = 1_700_000_000;

#[get("/200")]
async fn route_200() -> impl Responder {
    HttpResponse::Ok().body("Welcome back")
}

#[get("/401")]
async fn route_401() -> impl Responder {
    HttpResponse::Unauthorized().body("Invalid credentials")
}

fn make_limiter(max_requests: u64) -> RateLimiter<InMemoryBackend, ManualClock> {
    RateLimiter::builder(InMemoryBackend::new())
        .identifier("test")
        .max_requests(max_requests)
        .window(Duration::from_secs(60))
        .clock(ManualClock::new(START))
        .build()
        .unwrap()
}

fn header(response: &actix_web::dev::ServiceResponse<impl Sized>, name: &str) -> String {
    response
        .headers()
        .get(name)
        .unwrap()
        .to_str()
        .unwrap()
        .to_owned()
}

#[actix_web::test]
async fn test_allow_deny() {
    let limiter = RateLimit::builder(make_limiter(1), KeyFunctionBuilder::new().build()).build();
    let app = test::init_service(App::new().service(route_200).wrap(limiter)).await;
    assert!(
        test::call_service(&app, TestRequest::get().uri("/200").to_request())
            .await
            .status()
            .is_success()
    );
    assert_eq!(
        test::call_service(&app, TestRequest::get().uri("/200").to_request())
            .await
            .status(),
        StatusCode::TOO_MANY_REQUESTS
    );
}

#[actix_web::test]
async fn test_keys_are_separate() {
    let limiter = RateLimit::builder(
        make_limiter(1),
        KeyFunctionBuilder::new().peer_ip_key().build(),
    )
    .build();
    let app = test::init_service(App::new().service(route_200).wrap(limiter)).await;
    let request = |peer: &str| {
        TestRequest::get()
            .uri("/200")
            .peer_addr(peer.parse().unwrap())
            .to_request()
    };
    assert_eq!(
        test::call_service(&app, request("10.0.0.1:1000")).await.status(),
        StatusCode::OK
    );
    assert_eq!(
        test::call_service(&app, request("10.0.0.2:1000")).await.status(),
        StatusCode::OK
    );
    assert_eq!(
        test::call_service(&app, request("10.0.0.1:2000")).await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );
}

#[actix_web::test]
async fn test_add_headers() {
    let limiter = make_limiter(2);
    let clock = limiter.clock().clone();
    let middleware = RateLimit::builder(limiter, KeyFunctionBuilder::new().build())
        .add_headers()
        .build();
    let app = test::init_service(App::new().service(route_200).wrap(middleware)).await;

    let response = test::call_service(&app, TestRequest::get().uri("/200").to_request()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "x-ratelimit-limit"), "2");
    assert_eq!(header(&response, "x-ratelimit-remaining"), "1");
    assert_eq!(header(&response, "x-ratelimit-reset"), "60");
    assert!(!response.headers().contains_key("retry-after"));

    clock.advance(Duration::from_secs(15));
    let response = test::call_service(&app, TestRequest::get().uri("/200").to_request()).await;
    assert_eq!(header(&response, "x-ratelimit-remaining"), "0");
    // Reset follows the oldest request in the window
    assert_eq!(header(&response, "x-ratelimit-reset"), "45");

    clock.advance(Duration::from_secs(5));
    let response = test::call_service(&app, TestRequest::get().uri("/200").to_request()).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(header(&response, "x-ratelimit-limit"), "2");
    assert_eq!(header(&response, "x-ratelimit-remaining"), "0");
    assert_eq!(header(&response, "x-ratelimit-reset"), "40");
    assert_eq!(header(&response, "retry-after"), "40");
}

#[actix_web::test]
async fn test_custom_deny_response() {
    let limiter = RateLimit::builder(make_limiter(1), KeyFunctionBuilder::new().build())
        .request_denied_response(|status| {
            HttpResponse::build(StatusCode::IM_A_TEAPOT).body(format!(
                "Too many attempts, try again in {} seconds",
                status.seconds_until_reset
            ))
        })
        .build();
    let app = test::init_service(App::new().service(route_200).wrap(limiter)).await;
    test::call_service(&app, TestRequest::get().uri("/200").to_request()).await;
    let response = test::call_service(&app, TestRequest::get().uri("/200").to_request()).await;
    assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
    let body = String::from_utf8(read_body(response).await.to_vec()).unwrap();
    assert_eq!(body, "Too many attempts, try again in 60 seconds");
}

#[actix_web::test]
async fn test_header_transformation() {
    let limiter = RateLimit::builder(make_limiter(5), KeyFunctionBuilder::new().build())
        .request_allowed_transformation(Some(
            |headers: &mut HeaderMap, status: &RateLimitStatus, was_reset: bool| {
                assert!(!was_reset);
                headers.insert(
                    HeaderName::from_static("test-header"),
                    HeaderValue::from(status.remaining),
                );
            },
        ))
        .build();
    let app = test::init_service(App::new().service(route_200).wrap(limiter)).await;
    let response = test::call_service(&app, TestRequest::get().uri("/200").to_request()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "test-header"), "4");
}

#[actix_web::test]
async fn test_reset_on_success() {
    let limiter = make_limiter(2);
    let inspect = limiter.clone();
    let middleware = RateLimit::builder(
        limiter,
        KeyFunctionBuilder::new().custom_key("login").build(),
    )
    .reset_on_success()
    .add_headers()
    .build();
    let app = test::init_service(
        App::new()
            .service(route_200)
            .service(route_401)
            .wrap(middleware),
    )
    .await;

    // A failed attempt stays in the window
    let response = test::call_service(&app, TestRequest::get().uri("/401").to_request()).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(inspect.remaining_requests("login").await, 1);

    // A successful one clears it
    let response = test::call_service(&app, TestRequest::get().uri("/200").to_request()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "x-ratelimit-remaining"), "2");
    assert_eq!(header(&response, "x-ratelimit-reset"), "0");
    assert_eq!(inspect.remaining_requests("login").await, 2);

    // So two more failures are allowed before the limit applies
    for _ in 0..2 {
        let response =
            test::call_service(&app, TestRequest::get().uri("/401").to_request()).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
    let response = test::call_service(&app, TestRequest::get().uri("/200").to_request()).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[actix_web::test]
async fn test_key_function_error() {
    let limiter = make_limiter(5);
    let inspect = limiter.clone();
    let middleware =
        RateLimit::builder(limiter, KeyFunctionBuilder::new().peer_ip_key().build()).build();
    let app = test::init_service(App::new().service(route_200).wrap(middleware)).await;
    // No peer address on the request
    let response = test::call_service(&app, TestRequest::get().uri("/200").to_request()).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(inspect.backend().is_empty());
}
