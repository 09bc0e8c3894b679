pub mod clock;
pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod rate_limit_config;
pub mod rate_limiter;
pub mod response;
pub mod server;
pub mod session;

pub use config::Config;
pub use error::{Error, Result};
pub use rate_limiter::{RateLimitRequest, RateLimitResult, RateLimiter};
pub use response::{apply_rate_limit_headers, create_rate_limit_error_response};
pub use server::create_app;
pub use session::{SessionSigner, SessionTokenPayload};
