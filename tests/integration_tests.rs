use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use sessionguard::clock::ManualClock;
use sessionguard::config::{AppEnvironment, Config};
use sessionguard::handlers::AppState;
use sessionguard::server::create_app;
use sessionguard::session::SessionDomain;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const PASSWORD: &str = "correct horse battery staple";
const START: u64 = 1_700_000_000_000;

struct TestApp {
    app: Router,
    state: Arc<AppState>,
    clock: Arc<ManualClock>,
}

fn test_app(admin_password: Option<&str>) -> TestApp {
    let config = Config {
        environment: AppEnvironment::Test,
        admin_password: admin_password.map(str::to_string),
        trust_proxy_headers: true,
        ..Config::default()
    };
    let clock = Arc::new(ManualClock::new(START));
    let state = Arc::new(AppState::with_clock(config, clock.clone()).unwrap());
    TestApp {
        app: create_app(state.clone()),
        state,
        clock,
    }
}

fn login_request(password: &str, ip: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/admin/login")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-forwarded-for", ip)
        .body(Body::from(
            serde_json::json!({ "password": password }).to_string(),
        ))
        .unwrap()
}

fn session_request(cookie: Option<&str>, header_token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri("/admin/session");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    if let Some(token) = header_token {
        builder = builder.header("x-admin-session", token);
    }
    builder.body(Body::empty()).unwrap()
}

async fn json_body(response: Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn set_cookie(response: &Response) -> String {
    response.headers()[header::SET_COOKIE]
        .to_str()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn test_admin_login_issues_session_cookie() {
    let t = test_app(Some(PASSWORD));

    let response = t.app.clone().oneshot(login_request(PASSWORD, "1.2.3.4")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-ratelimit-limit"], "6");
    assert_eq!(response.headers()["x-ratelimit-remaining"], "5");

    let cookie = set_cookie(&response);
    assert!(cookie.starts_with("admin_session=v1."));
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("SameSite=Lax"));
    assert!(cookie.contains("Max-Age=28800"));
    assert!(!cookie.contains("Secure"));

    let body = json_body(response).await;
    assert_eq!(body["authenticated"], true);
    assert_eq!(body["role"], "admin");
    assert_eq!(body["expiresAt"], (START / 1000) as i64 + 28_800);

    let pair = cookie.split(';').next().unwrap().to_string();
    let response = t.app.clone().oneshot(session_request(Some(&pair), None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let identity = json_body(response).await;
    assert_eq!(identity["domain"], "admin");
    assert_eq!(identity["subject"], "admin");
    assert_eq!(identity["role"], "admin");
}

#[tokio::test]
async fn test_wrong_password_is_unauthorized() {
    let t = test_app(Some(PASSWORD));

    let response = t.app.clone().oneshot(login_request("nope", "1.2.3.4")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.headers()["x-ratelimit-remaining"], "5");
    assert!(response.headers().get(header::SET_COOKIE).is_none());
}

#[tokio::test]
async fn test_login_is_blocked_after_six_attempts() {
    let t = test_app(Some(PASSWORD));

    for expected_remaining in (0..=5).rev() {
        let response = t.app.clone().oneshot(login_request("nope", "1.2.3.4")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers()["x-ratelimit-remaining"],
            expected_remaining.to_string().as_str()
        );
    }

    // The correct password does not get through a block.
    let response = t.app.clone().oneshot(login_request(PASSWORD, "1.2.3.4")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()[header::RETRY_AFTER], "1200");
    assert_eq!(response.headers()["x-ratelimit-remaining"], "0");
    let body = json_body(response).await;
    assert_eq!(body["retryAfterSeconds"], 1200);
    assert!(body["error"].as_str().unwrap().contains("Too many login attempts"));

    // Other clients are unaffected.
    let response = t.app.clone().oneshot(login_request(PASSWORD, "5.6.7.8")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Still blocked after the window, free again after the block.
    t.clock.advance(Duration::from_secs(601));
    let response = t.app.clone().oneshot(login_request(PASSWORD, "1.2.3.4")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()[header::RETRY_AFTER], "599");

    t.clock.advance(Duration::from_secs(600));
    let response = t.app.clone().oneshot(login_request(PASSWORD, "1.2.3.4")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_session_via_header_and_type_isolation() {
    let t = test_app(Some(PASSWORD));

    let admin = t
        .state
        .signer
        .issue_for(SessionDomain::Admin, "editor", None)
        .unwrap();
    let response = t.app.clone().oneshot(session_request(None, Some(&admin.token))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["role"], "editor");

    let customer = t
        .state
        .signer
        .issue_for(SessionDomain::Customer, "jane@example.com", None)
        .unwrap();
    let cookie = format!("admin_session={}", customer.token);
    let response = t.app.clone().oneshot(session_request(Some(&cookie), None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = t.app.clone().oneshot(session_request(None, None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = t
        .app
        .clone()
        .oneshot(session_request(Some("admin_session=garbage"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_admin_session_expires() {
    let t = test_app(Some(PASSWORD));
    let admin = t
        .state
        .signer
        .issue_for(SessionDomain::Admin, "admin", Some("admin"))
        .unwrap();

    t.clock.advance(Duration::from_secs(8 * 60 * 60));
    let response = t.app.clone().oneshot(session_request(None, Some(&admin.token))).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(response).await;
    assert_eq!(body["error"], "unauthorized");
}

#[tokio::test]
async fn test_logout_clears_cookie() {
    let t = test_app(Some(PASSWORD));
    let response = t
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/admin/logout")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let cookie = set_cookie(&response);
    assert!(cookie.starts_with("admin_session=;"));
    assert!(cookie.contains("Max-Age=0"));
}

#[tokio::test]
async fn test_unparseable_login_bodies_spend_quota() {
    let t = test_app(Some(PASSWORD));
    let broken = || {
        Request::builder()
            .method("POST")
            .uri("/admin/login")
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-forwarded-for", "1.2.3.4")
            .body(Body::from("{not json"))
            .unwrap()
    };

    for expected_remaining in ["5", "4", "3"] {
        let response = t.app.clone().oneshot(broken()).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers()["x-ratelimit-remaining"], expected_remaining);
    }

    let response = t.app.clone().oneshot(login_request("nope", "1.2.3.4")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.headers()["x-ratelimit-remaining"], "2");
}

#[tokio::test]
async fn test_login_unavailable_without_password() {
    let t = test_app(None);
    let response = t.app.clone().oneshot(login_request("anything", "1.2.3.4")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_empty_password_fails_validation() {
    let t = test_app(Some(PASSWORD));
    let response = t.app.clone().oneshot(login_request("", "1.2.3.4")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_telemetry_is_rate_limited() {
    let t = test_app(None);
    let event = || {
        Request::builder()
            .method("POST")
            .uri("/telemetry/events")
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-forwarded-for", "9.9.9.9")
            .body(Body::from(r#"{"event":"page_view","path":"/"}"#))
            .unwrap()
    };

    for _ in 0..120 {
        let response = t.app.clone().oneshot(event()).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    let response = t.app.clone().oneshot(event()).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()[header::RETRY_AFTER], "60");

    t.clock.advance(Duration::from_secs(60));
    let response = t.app.clone().oneshot(event()).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(response.headers()["x-ratelimit-remaining"], "119");
}

#[tokio::test]
async fn test_health_endpoint() {
    let t = test_app(None);
    let response = t
        .app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["trackedBuckets"], 0);
}

#[test]
fn test_production_requires_session_secret() {
    let config = Config {
        environment: AppEnvironment::Production,
        ..Config::default()
    };
    assert!(AppState::new(config).is_err());
}
