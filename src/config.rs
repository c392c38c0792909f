//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::path::PathBuf;

/// Backend for the classroom game: public roster/run-statistics endpoints
/// keyed by a shared classroom secret, plus a teacher management API.
#[derive(Parser, Debug, Clone)]
#[command(name = "classkeyd")]
#[command(about = "Classroom game backend: rosters, run statistics, teacher API")]
pub struct Args {
    /// Port to listen on
    #[arg(long, env = "CLASSKEY_PORT", default_value = "8077")]
    pub port: u16,

    /// SQLite database file
    #[arg(long, env = "CLASSKEY_DB", default_value = "classkey.sqlite3")]
    pub db_path: PathBuf,

    /// Secret for signing session tokens (at least 32 characters)
    #[arg(long, env = "CLASSKEY_JWT_SECRET")]
    pub jwt_secret: String,

    /// Session token lifetime in seconds
    #[arg(long, env = "CLASSKEY_TOKEN_EXPIRY", default_value = "86400")]
    pub token_expiry_seconds: i64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "CLASSKEY_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Provision the database (schema, "Teachers" group seed, optional
    /// superuser) and exit instead of serving
    #[arg(long)]
    pub init: bool,

    /// Superuser account to ensure during --init
    #[arg(long, env = "CLASSKEY_ADMIN_USERNAME")]
    pub admin_username: Option<String>,

    /// Password for the --init superuser
    #[arg(long, env = "CLASSKEY_ADMIN_PASSWORD")]
    pub admin_password: Option<String>,

    /// Email for the --init superuser
    #[arg(long, env = "CLASSKEY_ADMIN_EMAIL")]
    pub admin_email: Option<String>,
}

impl Args {
    pub fn validate(&self) -> Result<(), String> {
        if self.port == 0 {
            return Err("CLASSKEY_PORT must be non-zero".to_string());
        }
        if self.jwt_secret.len() < 32 {
            return Err("CLASSKEY_JWT_SECRET must be at least 32 characters".to_string());
        }
        if self.token_expiry_seconds <= 0 {
            return Err("CLASSKEY_TOKEN_EXPIRY must be positive".to_string());
        }
        if self.admin_username.is_some() != self.admin_password.is_some() {
            return Err(
                "CLASSKEY_ADMIN_USERNAME and CLASSKEY_ADMIN_PASSWORD must be provided together"
                    .to_string(),
            );
        }
        Ok(())
    }
}
