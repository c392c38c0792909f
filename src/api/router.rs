use hyper::{Method, StatusCode};
use tracing::{error, info};

use super::handlers;
use super::respond;
use super::types::{ApiRequest, ApiResponse, AppState};
use crate::db;

/// Entry point for one collected request. Answers CORS preflights, opens the
/// per-request database connection, routes, and writes the access log line.
pub fn dispatch(state: &AppState, req: &ApiRequest) -> ApiResponse {
    if req.method == Method::OPTIONS {
        return respond::preflight();
    }

    // The original route table carried trailing slashes; accept both forms.
    let path = if req.path.len() > 1 {
        req.path.trim_end_matches('/')
    } else {
        req.path
    };
    let req = ApiRequest {
        method: req.method,
        path,
        headers: req.headers,
        body: req.body,
    };

    let resp = route(state, &req);
    info!(
        method = %req.method,
        path = req.path,
        status = resp.status().as_u16(),
        "request"
    );
    resp
}

fn route(state: &AppState, req: &ApiRequest) -> ApiResponse {
    let conn = match db::connect(&state.db_path) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to open database");
            return respond::server_error();
        }
    };

    if let Some(resp) = handlers::core::try_handle(state, &conn, req) {
        return resp;
    }
    if let Some(resp) = handlers::game::try_handle(state, &conn, req) {
        return resp;
    }
    if let Some(resp) = handlers::schools::try_handle(state, &conn, req) {
        return resp;
    }
    if let Some(resp) = handlers::register::try_handle(state, &conn, req) {
        return resp;
    }
    if let Some(resp) = handlers::auth::try_handle(state, &conn, req) {
        return resp;
    }
    if let Some(resp) = handlers::teacher::try_handle(state, &conn, req) {
        return resp;
    }

    respond::error(StatusCode::NOT_FOUND, "Not found")
}
