use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::rate_limiter::RateLimitRequest;

pub const ADMIN_LOGIN: &str = "admin.login";
pub const CUSTOMER_LOGIN: &str = "customer.login";
pub const B2B_LOGIN: &str = "b2b.login";
pub const CHECKOUT_CREATE: &str = "commerce.checkout.create";
pub const CONSENT_UPDATE: &str = "privacy.consent.update";
pub const TELEMETRY_INGEST: &str = "telemetry.ingest";

static BUCKET_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9][a-z0-9._-]*$").expect("bucket name pattern is valid")
});

/// Named rate-limit buckets with a fallback rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default)]
    pub rules: HashMap<String, RateLimitRule>,
    #[serde(default)]
    pub default_rule: RateLimitRule,
}

/// Limit applied to one bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRule {
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    pub max: u64,
    #[serde(default, with = "humantime_serde")]
    pub block: Option<Duration>,
}

impl Default for RateLimitRule {
    fn default() -> Self {
        Self::new(Duration::from_secs(60), 60, None)
    }
}

impl RateLimitRule {
    pub fn new(window: Duration, max: u64, block: Option<Duration>) -> Self {
        Self { window, max, block }
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.max == 0 {
            return Err("max must be greater than 0".to_string());
        }
        if self.window.is_zero() {
            return Err("window must be greater than 0".to_string());
        }
        if matches!(self.block, Some(block) if block.is_zero()) {
            return Err("block must be greater than 0 when set".to_string());
        }
        Ok(())
    }

    /// Build a limiter request for this rule.
    pub fn request<'a>(&self, bucket: &'a str, identifier: &'a str) -> RateLimitRequest<'a> {
        RateLimitRequest {
            bucket,
            identifier,
            window: self.window,
            max: self.max,
            block: self.block,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        let minutes = |m: u64| Duration::from_secs(m * 60);
        let rules = HashMap::from([
            (
                ADMIN_LOGIN.to_string(),
                RateLimitRule::new(minutes(10), 6, Some(minutes(20))),
            ),
            (
                CUSTOMER_LOGIN.to_string(),
                RateLimitRule::new(minutes(10), 10, Some(minutes(15))),
            ),
            (
                B2B_LOGIN.to_string(),
                RateLimitRule::new(minutes(10), 10, Some(minutes(15))),
            ),
            (
                CHECKOUT_CREATE.to_string(),
                RateLimitRule::new(minutes(10), 20, None),
            ),
            (
                CONSENT_UPDATE.to_string(),
                RateLimitRule::new(minutes(1), 30, None),
            ),
            (
                TELEMETRY_INGEST.to_string(),
                RateLimitRule::new(minutes(1), 120, None),
            ),
        ]);

        Self {
            rules,
            default_rule: RateLimitRule::default(),
        }
    }
}

impl RateLimitConfig {
    /// Get rate limit rule for a bucket, falling back to default
    pub fn get_rule(&self, bucket: &str) -> &RateLimitRule {
        self.rules.get(bucket).unwrap_or(&self.default_rule)
    }

    pub fn set_rule(&mut self, bucket: String, rule: RateLimitRule) -> Result<()> {
        validate_bucket_name(&bucket)?;
        rule.validate()
            .map_err(|msg| Error::InvalidRequest(format!("rule '{}': {}", bucket, msg)))?;
        self.rules.insert(bucket, rule);
        Ok(())
    }

    /// Merge rules from a JSON file over the current ones.
    pub fn merge_file(&mut self, path: &Path) -> Result<()> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read rules file {}: {}", path.display(), e))
        })?;
        self.merge_json(&raw)
            .map_err(|e| Error::Configuration(format!("{}: {}", path.display(), e)))
    }

    pub fn merge_json(&mut self, raw: &str) -> Result<()> {
        let overrides: RuleOverrides = serde_json::from_str(raw)
            .map_err(|e| Error::Configuration(format!("invalid rules JSON: {}", e)))?;

        if let Some(default_rule) = overrides.default_rule {
            default_rule
                .validate()
                .map_err(|msg| Error::Configuration(format!("default rule: {}", msg)))?;
            self.default_rule = default_rule;
        }
        for (bucket, rule) in overrides.rules {
            self.set_rule(bucket, rule).map_err(|e| match e {
                Error::InvalidRequest(msg) => Error::Configuration(msg),
                other => other,
            })?;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct RuleOverrides {
    #[serde(default)]
    rules: HashMap<String, RateLimitRule>,
    default_rule: Option<RateLimitRule>,
}

fn validate_bucket_name(bucket: &str) -> Result<()> {
    if BUCKET_NAME.is_match(bucket) {
        Ok(())
    } else {
        Err(Error::InvalidRequest(format!("invalid bucket name '{}'", bucket)))
    }
}
