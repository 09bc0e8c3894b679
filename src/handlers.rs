use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{info, warn};
use validator::Validate;

use crate::clock::{SharedClock, SystemClock};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::middleware::ClientIp;
use crate::rate_limit_config::{RateLimitConfig, ADMIN_LOGIN, TELEMETRY_INGEST};
use crate::rate_limiter::{MemoryBucketStore, RateLimiter};
use crate::response::{create_rate_limit_error_response, with_rate_limit_headers};
use crate::session::{
    clear_session_cookie, session_cookie, token_from_request, Identity, SessionDomain,
    SessionSigner, SigningKey,
};

/// Role granted by the shared admin password.
pub const ADMIN_ROLE: &str = "admin";

/// Shared application state
pub type SharedState = Arc<AppState>;

/// Everything a handler needs: the token signer, the limiter and its rules.
pub struct AppState {
    pub config: Arc<Config>,
    pub signer: SessionSigner,
    pub limiter: RateLimiter,
    pub rules: RateLimitConfig,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Build state around an explicit clock; tests pass a `ManualClock`.
    pub fn with_clock(config: Config, clock: SharedClock) -> Result<Self> {
        let signer = SessionSigner::new(SigningKey::from_config(&config)?, clock.clone());

        let mut rules = RateLimitConfig::default();
        if let Some(path) = &config.rate_limit_rules_file {
            rules.merge_file(path)?;
            info!(path = %path.display(), "Loaded rate-limit rule overrides");
        }

        let limiter = RateLimiter::new(
            MemoryBucketStore::new(config.rate_limit_max_buckets),
            clock,
        );

        Ok(Self {
            config: Arc::new(config),
            signer,
            limiter,
            rules,
        })
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct AdminLoginRequest {
    #[validate(length(min = 1, max = 256))]
    pub password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminLoginResponse {
    pub authenticated: bool,
    pub role: String,
    pub expires_at: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub tracked_buckets: usize,
}

/// Exchange the admin password for an admin session cookie.
pub async fn admin_login(
    State(state): State<SharedState>,
    ClientIp(client_ip): ClientIp,
    jar: CookieJar,
    payload: std::result::Result<Json<AdminLoginRequest>, JsonRejection>,
) -> Result<Response> {
    let rule = state.rules.get_rule(ADMIN_LOGIN);
    let decision = state.limiter.evaluate(&rule.request(ADMIN_LOGIN, &client_ip));
    if !decision.allowed {
        warn!(client_ip = %client_ip, "Admin login rate limited");
        return Ok(create_rate_limit_error_response(
            &decision,
            "Too many login attempts. Try again later.",
        ));
    }

    // Parsed only after the limiter so unreadable bodies also spend quota.
    let payload = match payload {
        Ok(Json(payload)) => payload,
        Err(rejection) => {
            return Ok(with_rate_limit_headers(
                Error::InvalidRequest(rejection.body_text()).into_response(),
                &decision,
            ));
        }
    };
    payload.validate()?;

    let Some(expected) = state.config.admin_password.as_deref() else {
        return Err(Error::Unavailable("admin login is not configured".to_string()));
    };
    if !password_matches(expected, &payload.password) {
        info!(client_ip = %client_ip, remaining = decision.remaining, "Admin login failed");
        return Ok(with_rate_limit_headers(
            Error::Unauthorized.into_response(),
            &decision,
        ));
    }

    let issued = state
        .signer
        .issue_for(SessionDomain::Admin, ADMIN_ROLE, Some(ADMIN_ROLE))?;
    info!(client_ip = %client_ip, role = ADMIN_ROLE, "Admin session issued");

    let body = AdminLoginResponse {
        authenticated: true,
        role: ADMIN_ROLE.to_string(),
        expires_at: issued.payload.exp,
    };
    let jar = jar.add(session_cookie(
        SessionDomain::Admin,
        issued.token,
        state.config.secure_cookies(),
    ));

    Ok(with_rate_limit_headers(
        (jar, Json(body)).into_response(),
        &decision,
    ))
}

/// Compare SHA-256 digests so the timing reveals neither content nor length.
fn password_matches(expected: &str, provided: &str) -> bool {
    let expected = Sha256::digest(expected.as_bytes());
    let provided = Sha256::digest(provided.as_bytes());
    expected.as_slice().ct_eq(provided.as_slice()).into()
}

/// Clear the admin cookie. The token itself stays valid until it expires.
pub async fn admin_logout(State(state): State<SharedState>, jar: CookieJar) -> impl IntoResponse {
    let jar = jar.add(clear_session_cookie(
        SessionDomain::Admin,
        state.config.secure_cookies(),
    ));
    (jar, StatusCode::NO_CONTENT)
}

/// Current admin identity, from the cookie or the `x-admin-session` header.
pub async fn admin_session(
    State(state): State<SharedState>,
    jar: CookieJar,
    headers: HeaderMap,
) -> Result<Json<Identity>> {
    token_from_request(SessionDomain::Admin, &jar, &headers)
        .and_then(|token| state.signer.resolve_identity(SessionDomain::Admin, &token))
        .map(Json)
        .ok_or(Error::Unauthorized)
}

/// Accept a telemetry event, throttled per client.
pub async fn ingest_telemetry(
    State(state): State<SharedState>,
    ClientIp(client_ip): ClientIp,
    Json(event): Json<serde_json::Map<String, serde_json::Value>>,
) -> Response {
    let rule = state.rules.get_rule(TELEMETRY_INGEST);
    let decision = state
        .limiter
        .evaluate(&rule.request(TELEMETRY_INGEST, &client_ip));
    if !decision.allowed {
        return create_rate_limit_error_response(&decision, "Too many telemetry events.");
    }

    tracing::debug!(
        client_ip = %client_ip,
        event = event.get("event").and_then(|v| v.as_str()).unwrap_or("unnamed"),
        fields = event.len(),
        "Telemetry event accepted"
    );

    with_rate_limit_headers(StatusCode::ACCEPTED.into_response(), &decision)
}

/// Health check endpoint
pub async fn health_check(State(state): State<SharedState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        tracked_buckets: state.limiter.tracked_buckets(),
    })
}
