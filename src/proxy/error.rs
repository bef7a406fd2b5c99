use crate::auth::AuthError;
use crate::filter::FilterError;
use crate::ratelimit::RateLimited;
use bytes::Bytes;
use http::{HeaderValue, Response, StatusCode};
use serde_json::json;
use thiserror::Error;

use super::{full_body, ProxyBody};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("request blocked: {0}")]
    Blocked(#[from] FilterError),

    #[error("{0}")]
    RateLimited(#[from] RateLimited),

    #[error("no route matches the requested path")]
    RouteNotFound,

    #[error("internal paths are not exposed")]
    InternalPathBlocked,

    #[error("{backend} backend unreachable: {detail}")]
    Upstream { backend: &'static str, detail: String },

    #[error("internal gateway error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Render the error as a JSON response. Upstream and internal detail is
    /// only exposed when `dev_mode` is set; production callers get a generic
    /// message naming the backend at most.
    pub fn to_response(&self, request_id: &str, dev_mode: bool) -> Response<ProxyBody> {
        let (status, error_code, message) = match self {
            GatewayError::Auth(e) => (StatusCode::UNAUTHORIZED, "AUTH_ERROR", e.to_string()),
            GatewayError::Blocked(e) if e.is_payload_too_large() => (
                StatusCode::PAYLOAD_TOO_LARGE,
                "PAYLOAD_TOO_LARGE",
                e.to_string(),
            ),
            GatewayError::Blocked(e) => (StatusCode::FORBIDDEN, "TRAFFIC_BLOCKED", e.to_string()),
            GatewayError::RateLimited(e) => {
                (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED", e.to_string())
            }
            GatewayError::RouteNotFound => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                "no route matches the requested path".to_string(),
            ),
            GatewayError::InternalPathBlocked => (
                StatusCode::FORBIDDEN,
                "FORBIDDEN",
                "access denied".to_string(),
            ),
            GatewayError::Upstream { backend, detail } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "UPSTREAM_ERROR",
                if dev_mode {
                    format!("{} backend unreachable: {}", backend, detail)
                } else {
                    format!("{} backend unreachable", backend)
                },
            ),
            GatewayError::Internal(detail) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                if dev_mode {
                    detail.clone()
                } else {
                    "internal gateway error".to_string()
                },
            ),
        };

        let body_json = json!({
            "error": error_code,
            "message": message,
            "request_id": request_id,
        });

        let mut response = Response::builder()
            .status(status)
            .header("Content-Type", "application/json")
            .body(full_body(Bytes::from(
                serde_json::to_string(&body_json).unwrap_or_default(),
            )))
            .unwrap_or_else(|_| Response::new(full_body("")));

        if let GatewayError::RateLimited(e) = self {
            let headers = response.headers_mut();
            headers.insert("x-ratelimit-limit", header_num(e.limit as i64));
            headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
            headers.insert("x-ratelimit-reset", header_num(e.reset_secs));
            headers.insert("retry-after", header_num(e.reset_secs));
        }

        response
    }
}

fn header_num(value: i64) -> HeaderValue {
    HeaderValue::from_str(&value.to_string()).unwrap_or(HeaderValue::from_static("0"))
}
