// `POST /api/command/:nodeId` — dispatch a control command to a connected
// device (§4.1 command table). Unknown commands are 400; unknown or
// disconnected nodes are 404.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::http::StatusCode;
use axum::Json;
use ingest_protocol::{Command, CommandFrame, CommandRequest};

use crate::errors::{GatewayError, HttpResult};
use crate::state::AppState;

pub async fn post_command(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
    Json(body): Json<CommandRequest>,
) -> HttpResult<impl IntoResponse> {
    let Some(command) = Command::parse(&body.command) else {
        return Err(GatewayError::BadRequest(format!(
            "unknown command: {}",
            body.command
        )));
    };

    let Some(sender) = state.command_sender(&node_id).await else {
        return Err(GatewayError::NotFound(format!(
            "node {node_id} not connected"
        )));
    };

    let frame = CommandFrame::new(command, body.data);
    if sender.send(frame).await.is_err() {
        // the device's connection task has already torn down (race with
        // disconnect, §5 "resolution is fail-fast with 404").
        return Err(GatewayError::NotFound(format!(
            "node {node_id} not connected"
        )));
    }

    Ok((StatusCode::OK, Json(serde_json::json!({"success": true}))))
}
