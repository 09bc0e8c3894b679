//! Signed, self-expiring session tokens.
//!
//! Wire format: `v1.<base64url(json payload)>.<base64url(hmac-sha256)>`.
//! The MAC covers the literal `v1.<payload>` prefix, so the version tag is
//! authenticated along with the claims.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use super::signer::SigningKey;
use crate::clock::{SharedClock, SystemClock};
use crate::error::{Error, Result};

pub const TOKEN_VERSION: &str = "v1";

/// Claims carried by a session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTokenPayload {
    #[serde(rename = "type")]
    pub token_type: String,
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub iat: i64,
    pub exp: i64,
    pub nonce: String,
}

/// A freshly created token together with the claims it carries.
#[derive(Debug, Clone)]
pub struct SignedToken {
    pub token: String,
    pub payload: SessionTokenPayload,
}

#[derive(Debug, thiserror::Error)]
enum Rejection {
    #[error("token does not have three non-empty segments")]
    Malformed,
    #[error("unsupported token version")]
    UnknownVersion,
    #[error("signature mismatch")]
    BadSignature,
    #[error("payload is not valid base64url")]
    BadEncoding,
    #[error("payload does not decode: {0}")]
    BadPayload(#[from] serde_json::Error),
    #[error("expiry precedes issue time")]
    BadLifetime,
    #[error("token type does not match")]
    WrongType,
    #[error("token expired")]
    Expired,
}

/// Creates and verifies session tokens with one key and clock.
#[derive(Clone)]
pub struct SessionSigner {
    key: SigningKey,
    clock: SharedClock,
}

impl SessionSigner {
    pub fn new(key: SigningKey, clock: SharedClock) -> Self {
        Self { key, clock }
    }

    pub fn with_system_clock(key: SigningKey) -> Self {
        Self::new(key, Arc::new(SystemClock))
    }

    /// Sign a new token. A negative `ttl_seconds` yields a token that is
    /// already expired.
    pub fn create(
        &self,
        token_type: &str,
        sub: &str,
        role: Option<&str>,
        ttl_seconds: i64,
    ) -> Result<String> {
        self.issue(token_type, sub, role, ttl_seconds)
            .map(|signed| signed.token)
    }

    pub fn issue(
        &self,
        token_type: &str,
        sub: &str,
        role: Option<&str>,
        ttl_seconds: i64,
    ) -> Result<SignedToken> {
        if token_type.trim().is_empty() {
            return Err(Error::InvalidRequest(
                "session token type must not be empty".to_string(),
            ));
        }

        let iat = self.clock.now_secs();
        let payload = SessionTokenPayload {
            token_type: token_type.to_string(),
            sub: sub.to_string(),
            role: role.map(str::to_string),
            iat,
            exp: iat.saturating_add(ttl_seconds),
            nonce: Uuid::new_v4().simple().to_string(),
        };

        let json = serde_json::to_vec(&payload)
            .map_err(|e| Error::Internal(format!("failed to encode session payload: {}", e)))?;
        let signing_input = format!("{}.{}", TOKEN_VERSION, URL_SAFE_NO_PAD.encode(json));
        let signature = self.key.sign(signing_input.as_bytes());

        Ok(SignedToken {
            token: format!("{}.{}", signing_input, signature),
            payload,
        })
    }

    /// Verify a token, optionally pinning its type.
    ///
    /// Every failure collapses to `None`; the reason is only logged.
    pub fn verify(&self, token: &str, expected_type: Option<&str>) -> Option<SessionTokenPayload> {
        match self.check(token, expected_type) {
            Ok(payload) => Some(payload),
            Err(reason) => {
                debug!(reason = %reason, "Session token rejected");
                None
            }
        }
    }

    fn check(
        &self,
        token: &str,
        expected_type: Option<&str>,
    ) -> std::result::Result<SessionTokenPayload, Rejection> {
        let mut parts = token.split('.');
        let (Some(version), Some(encoded_payload), Some(signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(Rejection::Malformed);
        };
        if version.is_empty() || encoded_payload.is_empty() || signature.is_empty() {
            return Err(Rejection::Malformed);
        }
        if version != TOKEN_VERSION {
            return Err(Rejection::UnknownVersion);
        }

        let signing_input = &token[..version.len() + 1 + encoded_payload.len()];
        if !self.key.verify(signing_input.as_bytes(), signature) {
            return Err(Rejection::BadSignature);
        }

        let json = URL_SAFE_NO_PAD
            .decode(encoded_payload)
            .map_err(|_| Rejection::BadEncoding)?;
        let payload: SessionTokenPayload = serde_json::from_slice(&json)?;

        if payload.exp <= payload.iat {
            return Err(Rejection::BadLifetime);
        }
        if let Some(expected) = expected_type {
            if payload.token_type != expected {
                return Err(Rejection::WrongType);
            }
        }
        if payload.exp <= self.clock.now_secs() {
            return Err(Rejection::Expired);
        }

        Ok(payload)
    }
}
