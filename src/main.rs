use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use edge_gateway::accounts::{Accounts, HttpAccounts};
use edge_gateway::storage::{MemoryStore, RedisStore, SessionStore};
use edge_gateway::tokens::SessionContext;
use edge_gateway::{api, config::Config, expiration, AppState};

/// Bound on connecting to and talking with Redis
const REDIS_IO_TIMEOUT: Duration = Duration::from_secs(2);

/// Bound on account service calls
const ACCOUNTS_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    match log_format.to_lowercase().as_str() {
        "gcp" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_stackdriver::layer())
                .init();
        }
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_span_list(false),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    info!(version = env!("CARGO_PKG_VERSION"), "edge-gateway starting");

    // Load configuration
    let config = Config::load()?;
    info!(
        upstreams = config.upstreams.len(),
        ttl_seconds = config.sessions.ttl_seconds,
        "Loaded configuration"
    );

    // Select the session store; only the in-memory store needs a sweeper
    let (store, expiration_handle) = match &config.sessions.redis_url {
        Some(url) => {
            let store = RedisStore::open(url, config.sessions.ttl(), REDIS_IO_TIMEOUT)?;
            info!("Using Redis session store");
            (Arc::new(store) as Arc<dyn SessionStore>, None)
        }
        None => {
            let store = Arc::new(MemoryStore::new(config.sessions.ttl()));
            info!("Using in-memory session store");
            let handle = expiration::start_expiration_cleaner(
                Arc::clone(&store),
                config.sessions.cleanup_interval(),
            );
            (store as Arc<dyn SessionStore>, Some(handle))
        }
    };
    let sessions = SessionContext::new(&config.sessions.signing_key, store)?;

    let accounts = match &config.gateway.accounts_url {
        Some(url) => {
            info!(url = %url, "Sign-in enabled");
            Some(Arc::new(HttpAccounts::new(url, ACCOUNTS_TIMEOUT)?) as Arc<dyn Accounts>)
        }
        None => None,
    };

    // Create shared HTTP client for upstream forwarding
    let http_client = reqwest::Client::builder()
        .pool_idle_timeout(Duration::from_secs(90))
        .redirect(reqwest::redirect::Policy::none())
        .build()?;

    // Create shared state
    let state = Arc::new(AppState {
        accounts,
        config: config.clone(),
        http_client,
        sessions,
    });

    // Build and start the HTTP server
    let app = api::create_router(Arc::clone(&state))?;
    let listener = tokio::net::TcpListener::bind(&config.gateway.bind_address).await?;
    info!("Listening on: {}", config.gateway.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Cleanup: abort background tasks
    if let Some(handle) = expiration_handle {
        info!("Shutting down background tasks");
        handle.abort();
    }

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, draining connections");
}
