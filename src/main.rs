use anyhow::Result;
use axum::Router;
use std::{io::ErrorKind, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod db;
mod errors;
mod handlers;
mod middleware;
mod models;
mod routes;
mod services;
mod state;

use services::{
    blob_store::LocalBlobStore, identity_service::LocalIdentityProvider, tree_service::TreeService,
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting file-tree with config: {:?}", cfg);

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        std::fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Initialize SQLite connection ---
    let db = Arc::new(db::connect(&cfg.database_url).await?);
    db::run_migrations(&db).await?;

    // --- Handle migration mode ---
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Collaborators, built once and shared ---
    let blobs = Arc::new(LocalBlobStore::new(&cfg.storage_dir));
    tracing::info!("Blob storage rooted at {}", blobs.root().display());
    let tree = TreeService::new(db.clone(), blobs);
    let identity = Arc::new(LocalIdentityProvider::new(
        db.clone(),
        &cfg.jwt_secret,
        cfg.access_token_ttl_secs,
        cfg.refresh_token_ttl_secs,
    ));
    if cfg.enforce_token_owner {
        tracing::info!("Bearer tokens are required on /files routes");
    }

    let state = state::AppState {
        tree,
        identity,
        enforce_token_owner: cfg.enforce_token_owner,
    };

    // --- Build router ---
    let app: Router = routes::routes::routes(state, cfg.max_upload_bytes);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
