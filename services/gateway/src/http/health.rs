// `GET /health` and `GET /api/ingester/health` — liveness checks (§4.4,
// §4.4 `[AMBIENT]`). Both report the gateway's own view of the pipeline
// without blocking on the store or queue: a liveness check, not a
// readiness check (§9 Open Questions — additional decisions).

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::state::{now_ms, AppState};

const INGESTER_HEARTBEAT_KEY: &str = "ingester:heartbeat";
/// An ingester refreshes its heartbeat on every 1 s discovery tick; two
/// missed ticks is a generous margin before calling it wedged.
const INGESTER_HEARTBEAT_STALE_MS: i64 = 5_000;

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "connectedNodes": state.node_count().await,
        "connectedDashboards": state.dashboard_count(),
    }))
}

pub async fn ingester_health(State(state): State<AppState>) -> impl IntoResponse {
    let heartbeat = state.queue.read_heartbeat(INGESTER_HEARTBEAT_KEY).await;
    let (status, last_heartbeat) = match heartbeat {
        Ok(Some(ts)) if now_ms() - ts <= INGESTER_HEARTBEAT_STALE_MS => ("ok", Some(ts)),
        Ok(Some(ts)) => ("stale", Some(ts)),
        Ok(None) => ("unknown", None),
        Err(_) => ("unreachable", None),
    };
    Json(serde_json::json!({
        "status": status,
        "lastHeartbeat": last_heartbeat,
    }))
}
