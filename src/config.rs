use envconfig::Envconfig;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

/// Deployment environment, drives secret and cookie policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, AppEnvironment::Production)
    }
}

impl FromStr for AppEnvironment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(AppEnvironment::Development),
            "test" => Ok(AppEnvironment::Test),
            "production" | "prod" => Ok(AppEnvironment::Production),
            other => Err(format!("unknown environment '{}'", other)),
        }
    }
}

impl fmt::Display for AppEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AppEnvironment::Development => "development",
            AppEnvironment::Test => "test",
            AppEnvironment::Production => "production",
        };
        f.write_str(name)
    }
}

#[derive(Envconfig, Clone)]
pub struct Config {
    /// Server bind address
    #[envconfig(from = "BIND_ADDR", default = "127.0.0.1:3000")]
    pub bind_addr: SocketAddr,

    /// Deployment environment
    #[envconfig(from = "APP_ENV", default = "development")]
    pub environment: AppEnvironment,

    /// Log level for the crate's own targets
    #[envconfig(from = "LOG_LEVEL", default = "info")]
    pub log_level: String,

    /// HMAC key for session tokens, required in production
    #[envconfig(from = "SESSION_SECRET")]
    pub session_secret: Option<String>,

    /// Password accepted by the admin login route
    #[envconfig(from = "ADMIN_PASSWORD")]
    pub admin_password: Option<String>,

    /// Bucket count above which stale rate-limit entries are evicted
    #[envconfig(from = "RATE_LIMIT_MAX_BUCKETS", default = "10000")]
    pub rate_limit_max_buckets: usize,

    /// JSON file with rate-limit rule overrides
    #[envconfig(from = "RATE_LIMIT_RULES_FILE")]
    pub rate_limit_rules_file: Option<PathBuf>,

    /// Honour x-forwarded-for / x-real-ip when identifying clients
    #[envconfig(from = "TRUST_PROXY_HEADERS", default = "false")]
    pub trust_proxy_headers: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, envconfig::Error> {
        Config::init_from_env()
    }

    /// Cookies carry the `Secure` attribute outside local development.
    pub fn secure_cookies(&self) -> bool {
        self.environment.is_production()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            environment: AppEnvironment::Development,
            log_level: "info".to_string(),
            session_secret: None,
            admin_password: None,
            rate_limit_max_buckets: 10_000,
            rate_limit_rules_file: None,
            trust_proxy_headers: false,
        }
    }
}

// Secrets never reach the logs.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_addr", &self.bind_addr)
            .field("environment", &self.environment)
            .field("log_level", &self.log_level)
            .field("session_secret", &self.session_secret.as_ref().map(|_| "<redacted>"))
            .field("admin_password", &self.admin_password.as_ref().map(|_| "<redacted>"))
            .field("rate_limit_max_buckets", &self.rate_limit_max_buckets)
            .field("rate_limit_rules_file", &self.rate_limit_rules_file)
            .field("trust_proxy_headers", &self.trust_proxy_headers)
            .finish()
    }
}
