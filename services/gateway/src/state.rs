use durable_queue::DurableQueue;
use ingest_protocol::NodeInfo;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};

use crate::config::Config;

/// A connected device's gateway-local, volatile state (§3 Device State).
/// The buffer itself lives inside the device's own connection task, not
/// here — this handle is only what the rest of the gateway (REST handlers,
/// other connections) needs to reach or describe that device.
pub struct DeviceHandle {
    pub command_tx: mpsc::Sender<ingest_protocol::CommandFrame>,
    pub connected_at: i64,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    last_data_at: Arc<AtomicI64>,
}

impl DeviceHandle {
    /// `None` until the device's first accepted Reading.
    pub fn last_data_at(&self) -> Option<i64> {
        let v = self.last_data_at.load(Ordering::Relaxed);
        if v == i64::MIN {
            None
        } else {
            Some(v)
        }
    }
}

pub type DeviceRegistry = Arc<RwLock<HashMap<String, DeviceHandle>>>;

#[derive(Clone)]
pub struct AppState {
    pub queue: DurableQueue,
    pub db: PgPool,
    pub config: Arc<Config>,
    pub devices: DeviceRegistry,
    pub dashboard_tx: broadcast::Sender<ingest_protocol::DashboardFrame>,
    pub dashboard_count: Arc<AtomicUsize>,
    pub shutdown_tx: broadcast::Sender<()>,
}

impl AppState {
    pub fn new(queue: DurableQueue, db: PgPool, config: Config) -> Self {
        let (dashboard_tx, _rx) = broadcast::channel(4096);
        let (shutdown_tx, _rx) = broadcast::channel(1);
        Self {
            queue,
            db,
            config: Arc::new(config),
            devices: Arc::new(RwLock::new(HashMap::new())),
            dashboard_tx,
            dashboard_count: Arc::new(AtomicUsize::new(0)),
            shutdown_tx,
        }
    }

    /// Register a newly identified device, overwriting any prior entry for
    /// the same `node_id` (reconnection under a changed socket id is not
    /// fenced — §9).
    pub async fn register_device(
        &self,
        node_id: &str,
        command_tx: mpsc::Sender<ingest_protocol::CommandFrame>,
        connected_at: i64,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Arc<AtomicI64> {
        let last_data_at = Arc::new(AtomicI64::new(i64::MIN));
        self.devices.write().await.insert(
            node_id.to_owned(),
            DeviceHandle {
                command_tx,
                connected_at,
                metadata,
                last_data_at: last_data_at.clone(),
            },
        );
        last_data_at
    }

    pub async fn unregister_device(&self, node_id: &str) {
        self.devices.write().await.remove(node_id);
    }

    pub async fn command_sender(
        &self,
        node_id: &str,
    ) -> Option<mpsc::Sender<ingest_protocol::CommandFrame>> {
        self.devices
            .read()
            .await
            .get(node_id)
            .map(|d| d.command_tx.clone())
    }

    /// Snapshot of connected nodes for `nodes:list` / `GET /api/nodes`.
    pub async fn node_snapshot(&self) -> Vec<NodeInfo> {
        self.devices
            .read()
            .await
            .iter()
            .map(|(node_id, d)| NodeInfo {
                node_id: node_id.clone(),
                metadata: d.metadata.clone(),
                connected_at: d.connected_at,
                last_data_at: d.last_data_at(),
            })
            .collect()
    }

    pub async fn node_count(&self) -> usize {
        self.devices.read().await.len()
    }

    pub fn dashboard_count(&self) -> usize {
        self.dashboard_count.load(Ordering::Relaxed)
    }

    /// Broadcast a frame to every connected dashboard. Best-effort: a lagged
    /// or absent receiver is not an error (§5 "live fan-out is best-effort").
    pub fn broadcast(&self, frame: ingest_protocol::DashboardFrame) {
        let _ = self.dashboard_tx.send(frame);
    }
}

/// Current wall-clock milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
