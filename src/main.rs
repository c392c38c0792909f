use std::process;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use classkeyd::auth::TokenIssuer;
use classkeyd::{db, server, AppState, Args};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("classkeyd={},info", args.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        process::exit(1);
    }

    // Schema is ensured once here; request handlers open their own
    // short-lived connections.
    let conn = db::open_db(&args.db_path)?;

    if args.init {
        db::seed_teacher_group(&conn)?;
        info!("Teachers group seeded");
        if let (Some(username), Some(password)) = (&args.admin_username, &args.admin_password) {
            db::ensure_superuser(&conn, username, password, args.admin_email.as_deref())?;
            info!("Superuser '{}' ensured", username);
        }
        info!("Provisioning complete: {}", args.db_path.display());
        return Ok(());
    }
    drop(conn);

    info!("======================================");
    info!("  classkeyd - classroom game backend");
    info!("======================================");
    info!("Port: {}", args.port);
    info!("Database: {}", args.db_path.display());
    info!("Token expiry: {}s", args.token_expiry_seconds);
    info!("======================================");

    let state = Arc::new(AppState::new(
        args.db_path.clone(),
        TokenIssuer::new(args.jwt_secret.clone(), args.token_expiry_seconds),
    ));

    server::run(state, args.port).await
}
