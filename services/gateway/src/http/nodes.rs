// `GET /api/nodes` — the connected-node registry snapshot (§4.4).

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::errors::HttpResult;
use crate::state::AppState;

pub async fn list_nodes(State(state): State<AppState>) -> HttpResult<impl IntoResponse> {
    Ok(Json(state.node_snapshot().await))
}
