//! Token domains and their cookie transport.

use axum::http::HeaderMap;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use super::token::{SessionSigner, SessionTokenPayload, SignedToken};
use crate::error::Result;

/// Header that may carry an admin token on the initial non-cookie login call.
pub const ADMIN_SESSION_HEADER: &str = "x-admin-session";

const HOUR: i64 = 60 * 60;
const DAY: i64 = 24 * HOUR;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionDomain {
    Admin,
    Customer,
    B2b,
}

impl SessionDomain {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionDomain::Admin => "admin",
            SessionDomain::Customer => "customer",
            SessionDomain::B2b => "b2b",
        }
    }

    pub fn default_ttl_seconds(&self) -> i64 {
        match self {
            SessionDomain::Admin => 8 * HOUR,
            SessionDomain::Customer | SessionDomain::B2b => 30 * DAY,
        }
    }

    pub fn cookie_name(&self) -> &'static str {
        match self {
            SessionDomain::Admin => "admin_session",
            SessionDomain::Customer => "customer_session",
            SessionDomain::B2b => "b2b_session",
        }
    }
}

impl fmt::Display for SessionDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionDomain {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "admin" => Ok(SessionDomain::Admin),
            "customer" => Ok(SessionDomain::Customer),
            "b2b" => Ok(SessionDomain::B2b),
            other => Err(format!("unknown session domain '{}'", other)),
        }
    }
}

/// Who a verified token speaks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub domain: SessionDomain,
    pub subject: String,
    pub role: Option<String>,
    pub expires_at: i64,
}

impl Identity {
    fn from_payload(domain: SessionDomain, payload: SessionTokenPayload) -> Self {
        // Admin tokens use the role name as their subject.
        let role = match domain {
            SessionDomain::Admin => payload.role.or_else(|| Some(payload.sub.clone())),
            _ => payload.role,
        };
        Self {
            domain,
            subject: payload.sub,
            role,
            expires_at: payload.exp,
        }
    }
}

impl SessionSigner {
    /// Issue a token for `domain` with its default lifetime.
    pub fn issue_for(
        &self,
        domain: SessionDomain,
        subject: &str,
        role: Option<&str>,
    ) -> Result<SignedToken> {
        self.issue(domain.as_str(), subject, role, domain.default_ttl_seconds())
    }

    /// Verify `token` as a `domain` token and resolve its identity.
    pub fn resolve_identity(&self, domain: SessionDomain, token: &str) -> Option<Identity> {
        self.verify(token, Some(domain.as_str()))
            .map(|payload| Identity::from_payload(domain, payload))
    }
}

/// Session cookie for a freshly issued token.
pub fn session_cookie(domain: SessionDomain, token: String, secure: bool) -> Cookie<'static> {
    Cookie::build((domain.cookie_name(), token))
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .path("/")
        .max_age(time::Duration::seconds(domain.default_ttl_seconds()))
        .build()
}

/// Cookie that clears the session for `domain` on the client.
pub fn clear_session_cookie(domain: SessionDomain, secure: bool) -> Cookie<'static> {
    Cookie::build((domain.cookie_name(), ""))
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .path("/")
        .max_age(time::Duration::ZERO)
        .build()
}

/// Raw token for `domain` from the cookie jar, or for admin from the header.
pub fn token_from_request(
    domain: SessionDomain,
    jar: &CookieJar,
    headers: &HeaderMap,
) -> Option<String> {
    if let Some(cookie) = jar.get(domain.cookie_name()) {
        if !cookie.value().is_empty() {
            return Some(cookie.value().to_string());
        }
    }

    if domain == SessionDomain::Admin {
        return headers
            .get(ADMIN_SESSION_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);
    }

    None
}
