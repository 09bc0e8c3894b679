//! HMAC-SHA256 signing primitive for session tokens.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;
use subtle::ConstantTimeEq;

use crate::config::Config;
use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Fallback key for local development only.
pub const DEVELOPMENT_SECRET: &str = "sessionguard-local-development-secret";

/// Shortest secret accepted in production, in bytes.
pub const MIN_PRODUCTION_SECRET_LEN: usize = 32;

/// Keyed MAC shared by every token operation.
#[derive(Clone)]
pub struct SigningKey {
    mac: HmacSha256,
}

impl SigningKey {
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self> {
        let mac = HmacSha256::new_from_slice(secret.as_ref())
            .map_err(|e| Error::Configuration(format!("invalid session secret: {}", e)))?;
        Ok(Self { mac })
    }

    /// Resolve the key from configuration.
    ///
    /// Outside production a missing `SESSION_SECRET` falls back to
    /// [`DEVELOPMENT_SECRET`]. In production the secret must be set and at
    /// least [`MIN_PRODUCTION_SECRET_LEN`] bytes long.
    pub fn from_config(config: &Config) -> Result<Self> {
        match config.session_secret.as_deref().map(str::trim) {
            Some(secret) if !secret.is_empty() => {
                if config.environment.is_production() && secret.len() < MIN_PRODUCTION_SECRET_LEN {
                    return Err(Error::Configuration(format!(
                        "SESSION_SECRET must be at least {} bytes in production",
                        MIN_PRODUCTION_SECRET_LEN
                    )));
                }
                Self::new(secret)
            }
            _ if config.environment.is_production() => Err(Error::Configuration(
                "SESSION_SECRET must be set in production".to_string(),
            )),
            _ => {
                tracing::warn!(
                    environment = %config.environment,
                    "SESSION_SECRET not set, using the development signing secret"
                );
                Self::new(DEVELOPMENT_SECRET)
            }
        }
    }

    /// Base64url (unpadded) HMAC of `message`.
    pub fn sign(&self, message: &[u8]) -> String {
        let mut mac = self.mac.clone();
        mac.update(message);
        URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
    }

    /// Constant-time check of an encoded signature against `message`.
    pub fn verify(&self, message: &[u8], signature: &str) -> bool {
        let expected = self.sign(message);
        expected.as_bytes().ct_eq(signature.as_bytes()).into()
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningKey(<redacted>)")
    }
}
