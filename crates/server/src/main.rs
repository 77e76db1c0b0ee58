mod api;
mod auth;
mod config;
mod magnet;
mod media;
mod state;
mod sync;
mod utils;
mod watch;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use api::api_router;
use auth::AuthStore;
use config::{config_path_from_env, load_or_create_config, resolve_path};
use library::Library;
use magnet::MagnetClient;
use parking_lot::RwLock;
use reqwest::Client;
use state::AppState;
use tower_http::request_id::{MakeRequestUuid, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use transcode::Compressor;
use watch::configure_watcher;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let migrate_only = args.iter().any(|arg| arg == "--migrate-only");
    let create_admin = args.iter().any(|arg| arg == "--create-admin");

    let config_path = config_path_from_env();
    let (config, created) = load_or_create_config(&config_path)?;
    if created {
        info!("Created default config at {:?}", config_path);
    } else {
        info!("Loaded config from {:?}", config_path);
    }

    let bind_addr = format!("0.0.0.0:{}", config.port);
    let session_ttl_secs = if config.session_ttl_secs == 0 {
        60 * 60 * 24 * 30
    } else {
        config.session_ttl_secs
    };

    let index_path = resolve_path(&config_path, &config.index_path);
    if let Some(parent) = index_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let uploads_path = resolve_path(&config_path, &config.uploads_path);

    let db = Library::open_db(&index_path)?;
    let library = Library::with_db(uploads_path.clone(), Arc::clone(&db))?;
    let auth = AuthStore::new(Arc::clone(&db), Duration::from_secs(session_ttl_secs))
        .with_policy(config.auth.password_requirements.clone());
    auth.init_tables()?;

    if migrate_only {
        info!("Tables initialised at {:?}", index_path);
        return Ok(());
    }

    match auth.purge_expired_sessions() {
        Ok(0) => {}
        Ok(removed) => info!("Removed {} expired sessions", removed),
        Err(err) => warn!("Failed to purge sessions: {}", err),
    }
    let admin_email = std::env::var("PHONO_ADMIN_EMAIL").ok();
    let admin_password = std::env::var("PHONO_ADMIN_PASSWORD").ok();
    if let Err(err) = auth.ensure_default_admin(
        admin_email.as_deref(),
        admin_password.as_deref(),
        create_admin,
    ) {
        warn!("Failed to create admin user: {}", err);
    }

    let http_client = Client::builder().user_agent("phono/0.1").build()?;
    let magnet = MagnetClient::new(
        http_client,
        &config.magnet_api.base_url,
        Duration::from_secs(config.magnet_api.timeout_secs),
    );
    let compressor = Compressor::new(config.compression.clone());
    if compressor.options().enabled {
        info!(
            "Compression enabled: {} at {} kbps",
            compressor.options().target_format,
            compressor.options().target_bitrate_kbps
        );
    }

    let state = AppState {
        library,
        auth,
        config: Arc::new(RwLock::new(config)),
        compressor,
        magnet,
        watcher: Arc::new(RwLock::new(None)),
        sync_gate: Arc::new(tokio::sync::Mutex::new(())),
    };

    match sync::run_full_sync(&state).await {
        Ok(report) => {
            if report.imported > 0 || report.removed > 0 {
                info!(
                    "Metadata sync: {} files imported, {} orphaned records removed",
                    report.imported, report.removed
                );
            }
        }
        Err(err) => warn!("Metadata sync failed: {}", err),
    }
    configure_watcher(&state, uploads_path);

    let app = Router::new()
        .nest("/api/v1", api_router(state.clone()))
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Listening on {}", bind_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(err) => {
                warn!("Failed to install terminate signal handler: {}", err);
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {}", err);
        }
    }

    info!("Shutdown signal received.");
}
