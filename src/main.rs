//! Caseguard - access control, audit trail and notifications for case work

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use caseguard::{
    auth::{JwtValidator, SessionProvider},
    config::Args,
    db::{MemoryStore, MongoClient, MongoStore, Store},
    server, CaseCore,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("caseguard={},info", log_level).into()),
        )
        .with(args.log_json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!args.log_json).then(tracing_subscriber::fmt::layer))
        .init();

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Caseguard");
    info!("======================================");
    info!("Listen: {}", args.listen);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("MongoDB: {}", args.mongodb_uri);
    info!(
        "Audit retention: {}",
        args.audit_retention_days
            .map(|d| format!("{} days", d))
            .unwrap_or_else(|| "forever".to_string())
    );
    info!("Sensitive read auditing: {}", args.audit_sensitive_reads);
    info!("======================================");

    let Some(secret) = args.jwt_secret() else {
        error!("JWT_SECRET is required in production mode");
        std::process::exit(1);
    };
    let sessions: Arc<dyn SessionProvider> =
        Arc::new(JwtValidator::new(secret, args.jwt_expiry_seconds)?);

    // MongoDB is optional in dev mode
    let connect = MongoClient::connect(&args.mongodb_uri, &args.mongodb_db, args.mongodb_backoff());
    let mongo = match connect.await {
        Ok(client) => match MongoStore::new(client).await {
            Ok(store) => {
                info!("MongoDB connected successfully");
                Some(store)
            }
            Err(e) => {
                if args.dev_mode {
                    warn!("MongoDB setup failed (dev mode, using in-memory store): {}", e);
                    None
                } else {
                    error!("MongoDB setup failed: {}", e);
                    std::process::exit(1);
                }
            }
        },
        Err(e) => {
            if args.dev_mode {
                warn!("MongoDB connection failed (dev mode, using in-memory store): {}", e);
                None
            } else {
                error!("MongoDB connection failed: {}", e);
                std::process::exit(1);
            }
        }
    };

    match mongo {
        Some(store) => serve(args, Arc::new(store), sessions).await,
        None => serve(args, Arc::new(MemoryStore::new()), sessions).await,
    }
}

async fn serve<S: Store>(
    args: Args,
    store: Arc<S>,
    sessions: Arc<dyn SessionProvider>,
) -> anyhow::Result<()> {
    let core = Arc::new(CaseCore::new(store, args.core_config()));

    match core.verify_audit_chain().await {
        Ok(Ok(count)) => info!(entries = count, "Audit chain verified"),
        Ok(Err(broken)) => error!(
            seq = broken.seq,
            reason = broken.reason,
            "Audit chain is broken"
        ),
        Err(e) => warn!("Audit chain verification skipped: {}", e),
    }

    let state = Arc::new(server::AppState::new(args, core, sessions));
    server::run(state).await?;
    Ok(())
}
