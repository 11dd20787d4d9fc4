//! Caller identity forwarded by the upstream identity provider.
//!
//! Authentication happens before requests reach this service; the gateway
//! strips any client-supplied copies and sets `x-caller-id` / `x-caller-role`
//! on the validated request. Handlers extract a [`CallerIdentity`] and check
//! roles with [`require_role`].

use axum::http::request::Parts;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::domain::UserId;
use crate::error::AppError;

pub const CALLER_ID_HEADER: &str = "x-caller-id";
pub const CALLER_ROLE_HEADER: &str = "x-caller-role";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Buyer,
    Producer,
    Courier,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buyer => "buyer",
            Self::Producer => "producer",
            Self::Courier => "courier",
            Self::Admin => "admin",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "buyer" => Some(Self::Buyer),
            "producer" => Some(Self::Producer),
            "courier" | "repartidor" => Some(Self::Courier),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub user_id: UserId,
    pub role: Role,
}

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("no caller identity on request")]
    Missing,
    #[error("caller role '{0}' is not recognised")]
    UnknownRole(String),
    #[error("role '{required}' required, caller has '{actual}'")]
    Forbidden { required: &'static str, actual: &'static str },
}

impl IdentityError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            IdentityError::Missing | IdentityError::UnknownRole(_) => StatusCode::UNAUTHORIZED,
            IdentityError::Forbidden { .. } => StatusCode::FORBIDDEN,
        }
    }
}

fn header_text<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

impl CallerIdentity {
    pub fn from_parts(parts: &Parts) -> Result<Self, IdentityError> {
        let user_id = header_text(parts, CALLER_ID_HEADER).ok_or(IdentityError::Missing)?;
        let raw_role = header_text(parts, CALLER_ROLE_HEADER).ok_or(IdentityError::Missing)?;
        let role =
            Role::parse(raw_role).ok_or_else(|| IdentityError::UnknownRole(raw_role.to_string()))?;

        Ok(Self {
            user_id: UserId(user_id.to_string()),
            role,
        })
    }
}

#[axum::async_trait]
impl<S: Send + Sync> axum::extract::FromRequestParts<S> for CallerIdentity {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Self::from_parts(parts).map_err(AppError::from)
    }
}

/// Admins pass every role check.
pub fn require_role(caller: &CallerIdentity, required: Role) -> Result<(), IdentityError> {
    if caller.role == required || caller.role == Role::Admin {
        Ok(())
    } else {
        Err(IdentityError::Forbidden {
            required: required.as_str(),
            actual: caller.role.as_str(),
        })
    }
}
