//! Handler modules, one per API area, each exposing
//! `try_handle(state, conn, req) -> Option<ApiResponse>`. The router chains
//! them in order; `None` means "not my route".

pub mod auth;
pub mod core;
pub mod game;
pub mod register;
pub mod schools;
pub mod teacher;

use hyper::StatusCode;
use rusqlite::Connection;
use tracing::error;

use super::respond;
use super::types::{ApiRequest, ApiResponse, AppState};
use crate::auth::{permissions, token};
use crate::scope::{self, Viewer};

/// Resolve the bearer token to a live account. 401 when the header is
/// absent, the token fails verification, or the account no longer exists.
pub(crate) fn authenticate(
    state: &AppState,
    conn: &Connection,
    req: &ApiRequest,
) -> Result<Viewer, ApiResponse> {
    let Some(raw) = token::extract_bearer(req.headers) else {
        return Err(respond::error(
            StatusCode::UNAUTHORIZED,
            "Authentication required",
        ));
    };
    let claims = match state.tokens.verify(raw) {
        Ok(c) => c,
        Err(_) => {
            return Err(respond::error(
                StatusCode::UNAUTHORIZED,
                "Invalid or expired token",
            ))
        }
    };
    match scope::resolve_viewer(conn, &claims.sub) {
        Ok(Some(viewer)) => Ok(viewer),
        Ok(None) => Err(respond::error(
            StatusCode::UNAUTHORIZED,
            "Invalid or expired token",
        )),
        Err(e) => {
            error!(error = %e, "viewer lookup failed");
            Err(respond::server_error())
        }
    }
}

/// Gate for the teacher endpoints: authenticated, in the Teachers group and
/// holding a linked profile. Failing either condition is the same blanket
/// 403, before any scoped query runs. Superusers pass outright; the scope
/// layer then decides what they see.
pub(crate) fn require_teacher(
    state: &AppState,
    conn: &Connection,
    req: &ApiRequest,
) -> Result<Viewer, ApiResponse> {
    let viewer = authenticate(state, conn, req)?;
    if viewer.is_superuser {
        return Ok(viewer);
    }
    match permissions::is_teacher(conn, &viewer.account_id) {
        Ok(true) if viewer.teacher_id.is_some() => Ok(viewer),
        Ok(_) => Err(respond::error(
            StatusCode::FORBIDDEN,
            "You do not have permission to perform this action.",
        )),
        Err(e) => {
            error!(error = %e, "permission check failed");
            Err(respond::server_error())
        }
    }
}

/// Parse the body as a JSON object, rejecting anything else with a 400.
pub(crate) fn parse_json_object(
    body: &[u8],
) -> Result<serde_json::Map<String, serde_json::Value>, ApiResponse> {
    let value: serde_json::Value = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(_) => {
            return Err(respond::error(StatusCode::BAD_REQUEST, "Invalid JSON body"));
        }
    };
    match value {
        serde_json::Value::Object(map) => Ok(map),
        _ => Err(respond::error(
            StatusCode::BAD_REQUEST,
            "Expected a JSON object body",
        )),
    }
}
