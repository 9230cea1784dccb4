// `GET /api/metrics/:nodeId` — the metrics hash for that node (§4.4, §6).

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use ingest_protocol::NodeMetrics;

use crate::errors::{GatewayError, HttpResult};
use crate::state::AppState;

pub async fn get_metrics(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
) -> HttpResult<impl IntoResponse> {
    let metrics = state
        .queue
        .read_metrics(&node_id)
        .await
        .map_err(GatewayError::internal)?;
    Ok(Json(NodeMetrics {
        total_records: metrics.total_records,
        last_flush: metrics.last_flush,
    }))
}
