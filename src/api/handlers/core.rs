use hyper::{Method, StatusCode};
use rusqlite::Connection;
use serde_json::json;

use crate::api::respond;
use crate::api::types::{ApiRequest, ApiResponse, AppState};

fn handle_health() -> ApiResponse {
    respond::json(
        StatusCode::OK,
        &json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }),
    )
}

pub fn try_handle(_state: &AppState, _conn: &Connection, req: &ApiRequest) -> Option<ApiResponse> {
    match (req.method, req.path) {
        (&Method::GET, "/health") => Some(handle_health()),
        _ => None,
    }
}
