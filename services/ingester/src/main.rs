use ingester::config::Config;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let config = Config::from_env();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .init();

    info!("connecting to durable queue...");
    let queue = durable_queue::DurableQueue::connect(&config.redis_url, config.queue_prefix.clone())
        .await
        .expect("failed to connect to durable queue");

    info!("connecting to time-series store...");
    // The gateway owns the schema; the ingester only ever writes rows into
    // tables the gateway has already migrated into existence.
    let db = ts_store::create_pool(&config.database_url)
        .await
        .expect("failed to connect to time-series store");

    info!("starting discovery loop");
    ingester::discovery::run(queue, db, config).await;
}
