use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Service unavailable: {0}")]
    Unavailable(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Error::Unauthorized => StatusCode::UNAUTHORIZED,
            Error::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Configuration(_) | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub code: u16,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str, code: u16) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            code,
        }
    }

    pub fn from_error(err: &Error) -> Self {
        let code = err.status_code().as_u16();
        match err {
            Error::InvalidRequest(msg) => Self::new("bad_request", msg, code),
            Error::Unauthorized => Self::new("unauthorized", "Authentication required", code),
            Error::Unavailable(msg) => Self::new("service_unavailable", msg, code),
            // Configuration details stay in the logs.
            Error::Configuration(_) => {
                Self::new("configuration_error", "Service is misconfigured", code)
            }
            Error::Validation(errors) => Self::new("validation_error", &errors.to_string(), code),
            Error::Internal(_) => Self::new("internal_error", "Internal server error", code),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match &self {
            Error::Configuration(_) | Error::Internal(_) => {
                tracing::error!(error = %self, "Request failed");
            }
            _ => tracing::debug!(error = %self, "Request rejected"),
        }
        (self.status_code(), Json(ErrorResponse::from_error(&self))).into_response()
    }
}
