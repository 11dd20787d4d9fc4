use crate::config::ConfigError;
use crate::gateway::SeedError;
use crate::identity::IdentityError;
use crate::telemetry::TelemetryError;
use crate::workflows::bypass::BypassError;
use crate::workflows::disclosure::DisclosureError;
use crate::workflows::payments::PaymentWebhookError;
use crate::workflows::proximity::ProximityError;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::fmt;

/// Failure taxonomy shared by every component, independent of transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input shape. Rejected without mutating state.
    MalformedEvent,
    NotFound,
    /// Store or disbursement transport failure; safe to retry.
    Gateway,
    /// Atomic update contention exhausted its attempts; safe to retry.
    Conflict,
}

impl ErrorKind {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorKind::MalformedEvent => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Gateway => StatusCode::BAD_GATEWAY,
            ErrorKind::Conflict => StatusCode::CONFLICT,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Gateway | ErrorKind::Conflict)
    }
}

#[derive(Debug)]
pub enum AppError {
    Config(ConfigError),
    Telemetry(TelemetryError),
    Io(std::io::Error),
    Seed(SeedError),
    /// A collaborator or fixture could not be prepared before handling traffic.
    Startup(String),
    Identity(IdentityError),
    BadRequest(String),
    Unprocessable(String),
    Disclosure(DisclosureError),
    Payment(PaymentWebhookError),
    Bypass(BypassError),
    Proximity(ProximityError),
}

impl AppError {
    /// Taxonomy kind for component failures; `None` for process-level errors.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            AppError::Disclosure(err) => Some(err.kind()),
            AppError::Payment(err) => Some(err.kind()),
            AppError::Bypass(err) => Some(err.kind()),
            AppError::Proximity(err) => Some(err.kind()),
            _ => None,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Identity(err) => err.status_code(),
            AppError::Disclosure(_)
            | AppError::Payment(_)
            | AppError::Bypass(_)
            | AppError::Proximity(_) => self
                .kind()
                .map(|kind| kind.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            AppError::Config(_)
            | AppError::Telemetry(_)
            | AppError::Io(_)
            | AppError::Seed(_)
            | AppError::Startup(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(err) => write!(f, "configuration error: {}", err),
            AppError::Telemetry(err) => write!(f, "telemetry error: {}", err),
            AppError::Io(err) => write!(f, "io error: {}", err),
            AppError::Seed(err) => write!(f, "seed error: {}", err),
            AppError::Startup(reason) => write!(f, "startup error: {}", reason),
            AppError::Identity(err) => write!(f, "{}", err),
            AppError::BadRequest(reason) => write!(f, "bad request: {}", reason),
            AppError::Unprocessable(reason) => write!(f, "unprocessable request: {}", reason),
            AppError::Disclosure(err) => write!(f, "{}", err),
            AppError::Payment(err) => write!(f, "{}", err),
            AppError::Bypass(err) => write!(f, "{}", err),
            AppError::Proximity(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Config(err) => Some(err),
            AppError::Telemetry(err) => Some(err),
            AppError::Io(err) => Some(err),
            AppError::Seed(err) => Some(err),
            AppError::Identity(err) => Some(err),
            AppError::BadRequest(_) | AppError::Unprocessable(_) | AppError::Startup(_) => None,
            AppError::Disclosure(err) => Some(err),
            AppError::Payment(err) => Some(err),
            AppError::Bypass(err) => Some(err),
            AppError::Proximity(err) => Some(err),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

impl From<ConfigError> for AppError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<TelemetryError> for AppError {
    fn from(value: TelemetryError) -> Self {
        Self::Telemetry(value)
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<SeedError> for AppError {
    fn from(value: SeedError) -> Self {
        Self::Seed(value)
    }
}

impl From<IdentityError> for AppError {
    fn from(value: IdentityError) -> Self {
        Self::Identity(value)
    }
}

impl From<DisclosureError> for AppError {
    fn from(value: DisclosureError) -> Self {
        Self::Disclosure(value)
    }
}

impl From<PaymentWebhookError> for AppError {
    fn from(value: PaymentWebhookError) -> Self {
        Self::Payment(value)
    }
}

impl From<BypassError> for AppError {
    fn from(value: BypassError) -> Self {
        Self::Bypass(value)
    }
}

impl From<ProximityError> for AppError {
    fn from(value: ProximityError) -> Self {
        Self::Proximity(value)
    }
}

impl From<JsonRejection> for AppError {
    fn from(value: JsonRejection) -> Self {
        if matches!(value, JsonRejection::JsonDataError(_)) {
            Self::Unprocessable(value.body_text())
        } else {
            Self::BadRequest(value.body_text())
        }
    }
}

impl From<axum::extract::rejection::QueryRejection> for AppError {
    fn from(value: axum::extract::rejection::QueryRejection) -> Self {
        Self::BadRequest(value.body_text())
    }
}
