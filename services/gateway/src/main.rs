use gateway::config::Config;
use gateway::state::AppState;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let config = Config::from_env();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .init();

    info!(redis_url = %redact(&config.redis_url), "connecting to durable queue...");
    let queue = durable_queue::DurableQueue::connect(&config.redis_url, config.queue_prefix.clone())
        .await
        .expect("failed to connect to durable queue");

    info!("connecting to time-series store...");
    let db = ts_store::create_pool(&config.database_url)
        .await
        .expect("failed to connect to time-series store");
    ts_store::run_migrations(&db)
        .await
        .expect("failed to run time-series store migrations");
    info!("migrations applied");

    let port = config.port;
    let state = AppState::new(queue, db, config);
    let router = gateway::build_router(state.clone());

    let bind_addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("failed to bind");
    info!(addr = %bind_addr, "gateway listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(state))
        .await
        .expect("gateway server error");
    info!("gateway shut down gracefully");
}

/// Mask credentials embedded in a `redis://:password@host:port/` URL
/// before it ever reaches a log line.
fn redact(redis_url: &str) -> String {
    match redis_url.split_once('@') {
        Some((_creds, rest)) if redis_url.contains(':') && redis_url.contains('@') => {
            format!("redis://***@{rest}")
        }
        _ => redis_url.to_owned(),
    }
}

/// Waits for SIGTERM or Ctrl-C, tells every connected device actor to
/// flush-and-close (§5 "drain all buffers"), then returns so axum can
/// finish its own graceful shutdown once those connections close.
async fn shutdown_signal(state: AppState) {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, draining device buffers"); },
        _ = terminate => { info!("received SIGTERM, draining device buffers"); },
    }

    let _ = state.shutdown_tx.send(());
}
