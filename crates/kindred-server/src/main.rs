use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{info, warn};

use kindred_api::AppStateInner;
use kindred_api::storage::LocalBlobStore;
use kindred_db::Database;
use kindred_gateway::Hub;
use kindred_server::build_app;
use kindred_server::config::Config;
use kindred_types::models::AdminRole;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kindred=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Init database, hub and photo storage
    let db = Arc::new(Database::open(&config.db_path)?);
    if let Some(email) = &config.admin_email {
        bootstrap_admin(&db, email)?;
    }
    let hub = Hub::spawn(config.hub());
    let blobs =
        Arc::new(LocalBlobStore::new(config.upload_dir.clone(), config.public_url.clone()).await?);

    let state = AppStateInner::new(db, hub, blobs, config.api.clone());
    let app = build_app(state, &config.upload_dir);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Kindred server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Grant super-admin to an existing account so a fresh deployment has a moderator.
fn bootstrap_admin(db: &Database, email: &str) -> anyhow::Result<()> {
    match db.get_user_by_email(&email.trim().to_lowercase())? {
        Some(user) => {
            db.grant_admin(user.id, AdminRole::SuperAdmin)?;
            info!("Granted super_admin to {} (user {})", email, user.id);
        }
        None => warn!("KINDRED_ADMIN_EMAIL {} has no account yet; register it and restart", email),
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
