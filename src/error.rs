//! Error handling and JSON error responses for the dev server

use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Response, StatusCode};
use serde::Serialize;

/// Error codes for dev-server errors
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DevErrorCode {
    /// No file matched the request path
    NotFound,
    /// Method not supported by the static pipeline
    MethodNotAllowed,
    /// Request path escapes the served root
    Forbidden,
    /// Malformed request (bad percent-encoding, invalid headers)
    BadRequest,
    /// Failed to connect to the proxy target
    ConnectionFailed,
    /// Proxy target did not respond in time
    RequestTimeout,
    /// WebSocket/upgrade tunneling to the target failed
    UpgradeFailed,
    /// Internal server error
    InternalError,
}

impl DevErrorCode {
    /// Get the default HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            DevErrorCode::NotFound => StatusCode::NOT_FOUND,
            DevErrorCode::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            DevErrorCode::Forbidden => StatusCode::FORBIDDEN,
            DevErrorCode::BadRequest => StatusCode::BAD_REQUEST,
            DevErrorCode::ConnectionFailed => StatusCode::BAD_GATEWAY,
            DevErrorCode::RequestTimeout => StatusCode::GATEWAY_TIMEOUT,
            DevErrorCode::UpgradeFailed => StatusCode::BAD_GATEWAY,
            DevErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code as a string for the X-Devgate-Error header
    pub fn as_header_value(&self) -> &'static str {
        match self {
            DevErrorCode::NotFound => "NOT_FOUND",
            DevErrorCode::MethodNotAllowed => "METHOD_NOT_ALLOWED",
            DevErrorCode::Forbidden => "FORBIDDEN",
            DevErrorCode::BadRequest => "BAD_REQUEST",
            DevErrorCode::ConnectionFailed => "CONNECTION_FAILED",
            DevErrorCode::RequestTimeout => "REQUEST_TIMEOUT",
            DevErrorCode::UpgradeFailed => "UPGRADE_FAILED",
            DevErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

/// JSON error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// The error code
    pub code: DevErrorCode,
    /// Human-readable error message
    pub message: String,
    /// HTTP status code (for reference)
    pub status: u16,
}

impl ErrorResponse {
    /// Create a new error response
    pub fn new(code: DevErrorCode, message: impl Into<String>) -> Self {
        Self {
            status: code.status_code().as_u16(),
            code,
            message: message.into(),
        }
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                r#"{{"code":"{}","message":"{}","status":{}}}"#,
                self.code.as_header_value(),
                self.message.replace('\"', "\\\""),
                self.status
            )
        })
    }
}

/// Create a JSON error response with X-Devgate-Error header
pub fn json_error_response(
    code: DevErrorCode,
    message: impl Into<String>,
) -> Response<BoxBody<Bytes, hyper::Error>> {
    let error = ErrorResponse::new(code, message);
    let status = code.status_code();
    let body = error.to_json();

    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("X-Devgate-Error", code.as_header_value())
        .body(Full::new(Bytes::from(body)).map_err(|e| match e {}).boxed())
        .expect("valid response with StatusCode enum and static headers")
}
