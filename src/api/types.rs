use std::path::PathBuf;

use bytes::Bytes;
use http_body_util::Full;
use hyper::{HeaderMap, Method, Response};

use crate::auth::TokenIssuer;

/// Shared service state. Each request opens its own short-lived database
/// connection from `db_path`; only the token issuer lives here.
pub struct AppState {
    pub db_path: PathBuf,
    pub tokens: TokenIssuer,
}

impl AppState {
    pub fn new(db_path: PathBuf, tokens: TokenIssuer) -> Self {
        Self { db_path, tokens }
    }
}

/// One collected HTTP request, decoupled from the transport so the whole
/// dispatch path is callable from tests without a socket.
pub struct ApiRequest<'a> {
    pub method: &'a Method,
    pub path: &'a str,
    pub headers: &'a HeaderMap,
    pub body: &'a [u8],
}

pub type ApiResponse = Response<Full<Bytes>>;
