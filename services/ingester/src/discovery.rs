// Discovery: a 1 s timer that lists active queue keys and spawns one
// exclusive processing loop per node not already running (§4.3, §5).

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use durable_queue::DurableQueue;
use sqlx::PgPool;
use tokio::time::interval;
use tracing::{info, warn};

use crate::config::Config;
use crate::processor::run_node_loop;

const HEARTBEAT_KEY: &str = "ingester:heartbeat";

/// Process-local presence map: the `processQueues` set from §5, guarding
/// against two loops running for the same node within one ingester
/// process.
type ActiveNodes = Arc<Mutex<HashSet<String>>>;

/// Runs forever: every `discovery_interval_ms`, discover active node
/// queues, spawn a loop for each not already running, and refresh the
/// shared heartbeat key the gateway's `/api/ingester/health` reads.
pub async fn run(queue: DurableQueue, db: PgPool, config: Config) {
    let active: ActiveNodes = Arc::new(Mutex::new(HashSet::new()));
    let mut ticker = interval(Duration::from_millis(config.discovery_interval_ms));

    loop {
        ticker.tick().await;

        if let Err(err) = queue.write_heartbeat(HEARTBEAT_KEY, crate::now_ms()).await {
            warn!(error = %err, "failed to write ingester heartbeat");
        }

        let node_ids = match queue.discover_active_nodes().await {
            Ok(node_ids) => node_ids,
            Err(err) => {
                warn!(error = %err, "discovery scan failed");
                continue;
            }
        };

        for node_id in node_ids {
            let already_running = {
                let mut guard = active.lock().expect("active-nodes lock poisoned");
                if guard.contains(&node_id) {
                    true
                } else {
                    guard.insert(node_id.clone());
                    false
                }
            };
            if already_running {
                continue;
            }

            info!(%node_id, "starting processing loop");
            let queue = queue.clone();
            let db = db.clone();
            let config = config.clone();
            let active = active.clone();
            let spawned_node_id = node_id.clone();
            tokio::spawn(async move {
                run_node_loop(spawned_node_id.clone(), queue, db, config).await;
                active
                    .lock()
                    .expect("active-nodes lock poisoned")
                    .remove(&spawned_node_id);
            });
        }
    }
}
