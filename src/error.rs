//! Error kinds shared across the service, and their HTTP surface.
//!
//! One variant per error kind. Anything that reaches a handler as an
//! `Err(AppError)` is rendered as the `{error:{type,title,status,detail}}`
//! envelope; the status code is chosen here so handlers never have to
//! remember the mapping themselves.

use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("unknown service: {0}")]
    Config(String),

    #[error("no usable client location")]
    Geo,

    #[error("rate limited")]
    Admission,

    #[error("no available servers")]
    Locator,

    #[error("internal error: {0}")]
    Internal(String),

    #[error("monitoring token rejected")]
    Unauthorized,

    #[error("unsupported mlab-ns compat option")]
    UnsupportedOption(String),

    #[error("upstream nearest lookup failed")]
    BadGateway,

    #[error("no results")]
    NoContent,
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorEnvelope,
}

#[derive(Serialize)]
struct ErrorEnvelope {
    #[serde(rename = "type")]
    kind: &'static str,
    title: String,
    status: u16,
    detail: String,
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::Config(path) => (
                StatusCode::BAD_REQUEST,
                "config",
                format!("Unknown service: {path}"),
            ),
            AppError::Geo => (
                StatusCode::BAD_REQUEST,
                "geo",
                "no usable client location".to_string(),
            ),
            AppError::Admission => (
                StatusCode::TOO_MANY_REQUESTS,
                "admission",
                "rate limited".to_string(),
            ),
            AppError::Locator => (
                StatusCode::SERVICE_UNAVAILABLE,
                "locator",
                "no available servers".to_string(),
            ),
            AppError::Internal(detail) => {
                tracing::error!(detail = %detail, "internal_error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    detail.clone(),
                )
            }
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "monitoring token rejected".to_string(),
            ),
            AppError::UnsupportedOption(opt) => (
                StatusCode::BAD_REQUEST,
                "unsupported_option",
                format!("unsupported option: {opt}"),
            ),
            AppError::BadGateway => (
                StatusCode::BAD_GATEWAY,
                "bad_gateway",
                "inner nearest lookup failed".to_string(),
            ),
            AppError::NoContent => (StatusCode::NO_CONTENT, "no_content", String::new()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, kind, detail) = self.parts();
        if status == StatusCode::NO_CONTENT {
            return status.into_response();
        }
        let title = match kind {
            "locator" => "no available servers".to_string(),
            _ => detail.clone(),
        };
        let body = ErrorBody {
            error: ErrorEnvelope {
                kind,
                title,
                status: status.as_u16(),
                detail,
            },
        };
        (status, Json(body)).into_response()
    }
}
