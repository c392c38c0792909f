//! Response constructors. All of these are infallible: statuses and header
//! values are static and bodies are already-serialized JSON.

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{
    HeaderValue, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_TYPE,
};
use hyper::{Response, StatusCode};
use serde_json::json;

use super::types::ApiResponse;

pub fn json(status: StatusCode, body: &serde_json::Value) -> ApiResponse {
    let mut resp = Response::new(Full::new(Bytes::from(body.to_string())));
    *resp.status_mut() = status;
    let headers = resp.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    // The game client calls from a browser origin.
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    resp
}

pub fn message(status: StatusCode, text: impl Into<String>) -> ApiResponse {
    json(status, &json!({ "message": text.into() }))
}

pub fn error(status: StatusCode, text: impl Into<String>) -> ApiResponse {
    json(status, &json!({ "error": text.into() }))
}

/// 400 carrying a `{field: [messages]}` map.
pub fn field_errors(errors: serde_json::Value) -> ApiResponse {
    json(StatusCode::BAD_REQUEST, &errors)
}

/// Generic 500. The cause is logged where it happened; callers never see it.
pub fn server_error() -> ApiResponse {
    error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "An internal server error occurred",
    )
}

pub fn preflight() -> ApiResponse {
    let mut resp = Response::new(Full::new(Bytes::new()));
    *resp.status_mut() = StatusCode::OK;
    let headers = resp.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static("*"));
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, PUT, DELETE, OPTIONS"),
    );
    resp
}
