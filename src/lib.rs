//! classkeyd - backend for the classroom game
//!
//! Students play against their class roster: the game client verifies a
//! shared classroom key and appends run results, while teachers manage
//! schools, classrooms, students and the collected statistics through an
//! authenticated API.

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod scope;
pub mod server;

pub use api::{dispatch, ApiRequest, ApiResponse, AppState};
pub use config::Args;
