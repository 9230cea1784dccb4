// The gateway's socket surface (§4.1, §6): device/dashboard upgrade,
// the Unknown → Identified state machine, and the two per-connection
// actors (node, dashboard) that own buffer/flush state and live fan-out
// respectively.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use ingest_protocol::{ClientFrame, DashboardFrame, IdentifyRole};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::device::{reading_from_data_frame, reading_from_save_object, synthesize_device_id, DeviceBuffer};
use crate::state::{now_ms, AppState};

/// §4.1/§5: "On connect, start a 3-second identification timer."
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(3);
/// §5: "30 s connect, 60 s ping, 25 s ping interval." Connect timeout is
/// the HTTP upgrade itself, handled by the listener/proxy in front of this
/// service; ping interval and ping timeout are enforced here.
const PING_INTERVAL: Duration = Duration::from_secs(25);
const PING_TIMEOUT: Duration = Duration::from_secs(60);

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

type Sink = SplitSink<WebSocket, Message>;
type Stream = SplitStream<WebSocket>;

/// The pre-identification phase of a connection: `Unknown → (identify |
/// first /save) → Identified` (§9). Neither an expired timer nor a
/// malformed frame closes the socket; only an `identify` with no usable id
/// does (§4.1).
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (sink, mut stream) = socket.split();
    let socket_id = Uuid::new_v4().to_string();
    let connected_at = now_ms();

    let ident_deadline = Instant::now() + IDENTIFY_TIMEOUT;
    let mut ident_timer_fired = false;

    loop {
        tokio::select! {
            () = tokio::time::sleep_until(ident_deadline), if !ident_timer_fired => {
                ident_timer_fired = true;
                debug!(socket_id = %socket_id, "identification timer elapsed without identify/save; still accepting auto-identify");
            }
            msg = stream.next() => {
                match msg {
                    None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return,
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientFrame>(&text) {
                            Ok(ClientFrame::Identify(identify)) => {
                                match identify.role {
                                    IdentifyRole::Node => {
                                        let Some(node_id) = identify.resolved_node_id().map(str::to_owned) else {
                                            debug!(socket_id = %socket_id, "identify frame with no usable node id; disconnecting");
                                            return;
                                        };
                                        return run_node_actor(
                                            sink, stream, state, node_id, identify.metadata,
                                            connected_at, false, None,
                                        ).await;
                                    }
                                    IdentifyRole::Client => {
                                        return run_dashboard_actor(sink, stream, state).await;
                                    }
                                }
                            }
                            Ok(ClientFrame::Save(body)) => {
                                let obj = match body.into_object() {
                                    Ok(obj) => obj,
                                    Err(e) => {
                                        warn!(socket_id = %socket_id, error = %e, "malformed /save payload before identification, dropping");
                                        continue;
                                    }
                                };
                                let device_id = obj
                                    .get("deviceId")
                                    .and_then(serde_json::Value::as_str)
                                    .map(str::to_owned)
                                    .unwrap_or_else(|| synthesize_device_id(&socket_id));
                                let reading = reading_from_save_object(&device_id, &obj, now_ms(), true);
                                let mut metadata = serde_json::Map::new();
                                metadata.insert("autoIdentified".to_owned(), serde_json::Value::Bool(true));
                                return run_node_actor(
                                    sink, stream, state, device_id, metadata,
                                    connected_at, true, Some(reading),
                                ).await;
                            }
                            Ok(ClientFrame::Data(_) | ClientFrame::BulkData(_)) => {
                                warn!(socket_id = %socket_id, "data frame received before identification; dropping (no node id established yet)");
                            }
                            Ok(ClientFrame::Subscribe(_) | ClientFrame::Unsubscribe(_)) => {
                                // room management is only meaningful once identified as a dashboard
                            }
                            Err(e) => {
                                warn!(socket_id = %socket_id, error = %e, "malformed frame before identification, dropping");
                            }
                        }
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

/// Owns one device's buffer/flush/outbound-command state for the lifetime
/// of its connection (§4.1 per-device actor, §5 ordering invariants).
async fn run_node_actor(
    mut sink: Sink,
    mut stream: Stream,
    state: AppState,
    node_id: String,
    metadata: serde_json::Map<String, serde_json::Value>,
    connected_at: i64,
    auto_identified: bool,
    initial_reading: Option<ingest_protocol::Reading>,
) {
    let (command_tx, mut command_rx) = mpsc::channel(32);
    let last_data_at = state
        .register_device(&node_id, command_tx, connected_at, metadata.clone())
        .await;
    state.broadcast(DashboardFrame::NodeConnected {
        node_id: node_id.clone(),
        metadata,
    });
    info!(node_id = %node_id, auto_identified, "node connected");

    let mut buffer = DeviceBuffer::new(node_id.clone(), state.config.buffer_size);
    let mut shutdown_rx = state.shutdown_tx.subscribe();

    if let Some(reading) = initial_reading {
        accept_reading(&state, &mut buffer, &node_id, &last_data_at, reading).await;
    }

    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    ping_interval.tick().await;
    let mut idle_deadline = Instant::now() + PING_TIMEOUT;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                debug!(node_id = %node_id, "shutdown signal received; flushing and closing");
                if let Err(e) = buffer.flush(&state.queue).await {
                    warn!(node_id = %node_id, error = %e, "flush-on-shutdown failed; buffered readings are lost");
                }
                let _ = sink.close().await;
                break;
            }
            _ = ping_interval.tick() => {
                if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
            () = tokio::time::sleep_until(idle_deadline) => {
                warn!(node_id = %node_id, "no frames received within the ping timeout; closing");
                break;
            }
            maybe_cmd = command_rx.recv() => {
                let Some(cmd) = maybe_cmd else { continue };
                let Ok(json) = serde_json::to_string(&cmd) else { continue };
                if sink.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            msg = stream.next() => {
                idle_deadline = Instant::now() + PING_TIMEOUT;
                match msg {
                    None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                    Some(Ok(Message::Text(text))) => {
                        handle_node_frame(&text, &state, &mut buffer, &node_id, &last_data_at, auto_identified).await;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    let _ = buffer.flush(&state.queue).await;
    state.unregister_device(&node_id).await;
    state.broadcast(DashboardFrame::NodeDisconnected {
        node_id: node_id.clone(),
    });
    info!(node_id = %node_id, "node disconnected");
}

async fn handle_node_frame(
    text: &str,
    state: &AppState,
    buffer: &mut DeviceBuffer,
    node_id: &str,
    last_data_at: &Arc<AtomicI64>,
    auto_identified: bool,
) {
    match serde_json::from_str::<ClientFrame>(text) {
        Ok(ClientFrame::Save(body)) => match body.into_object() {
            Ok(obj) => {
                let reading = reading_from_save_object(node_id, &obj, now_ms(), auto_identified);
                accept_reading(state, buffer, node_id, last_data_at, reading).await;
            }
            Err(e) => warn!(node_id = %node_id, error = %e, "malformed /save payload, dropping"),
        },
        Ok(ClientFrame::Data(frame)) => {
            let reading = reading_from_data_frame(frame, now_ms(), auto_identified);
            accept_reading(state, buffer, node_id, last_data_at, reading).await;
        }
        Ok(ClientFrame::BulkData(frames)) => {
            for frame in frames {
                let reading = reading_from_data_frame(frame, now_ms(), auto_identified);
                accept_reading(state, buffer, node_id, last_data_at, reading).await;
            }
        }
        Ok(ClientFrame::Identify(_)) => {
            debug!(node_id = %node_id, "ignoring duplicate identify on an already-identified socket");
        }
        Ok(ClientFrame::Subscribe(_) | ClientFrame::Unsubscribe(_)) => {}
        Err(e) => warn!(node_id = %node_id, error = %e, "malformed frame, dropping"),
    }
}

/// §4.1 "On each accepted Reading": update `lastDataAt`, append to the
/// buffer, broadcast `data:live`, then flush if the buffer has hit
/// `BUFFER_SIZE` — in that order.
async fn accept_reading(
    state: &AppState,
    buffer: &mut DeviceBuffer,
    node_id: &str,
    last_data_at: &Arc<AtomicI64>,
    reading: ingest_protocol::Reading,
) {
    last_data_at.store(reading.ts, Ordering::Relaxed);
    buffer.push(reading.clone());
    state.broadcast(DashboardFrame::DataLive(reading));
    if buffer.should_flush() {
        if let Err(e) = buffer.flush(&state.queue).await {
            warn!(node_id = %node_id, error = %e, "durable-queue flush failed; buffer retained for the next trigger");
        }
    }
}

/// Owns one dashboard's outbound live-fan-out subscription (§4.1 Dashboard
/// connection).
async fn run_dashboard_actor(mut sink: Sink, mut stream: Stream, state: AppState) {
    state.dashboard_count.fetch_add(1, Ordering::Relaxed);
    let mut rx = state.dashboard_tx.subscribe();
    let mut shutdown_rx = state.shutdown_tx.subscribe();

    let snapshot = DashboardFrame::NodesList(state.node_snapshot().await);
    if let Ok(json) = serde_json::to_string(&snapshot) {
        if sink.send(Message::Text(json.into())).await.is_err() {
            state.dashboard_count.fetch_sub(1, Ordering::Relaxed);
            return;
        }
    }

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                let _ = sink.close().await;
                break;
            }
            frame = rx.recv() => {
                match frame {
                    Ok(frame) => {
                        let Ok(json) = serde_json::to_string(&frame) else { continue };
                        if sink.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "dashboard broadcast receiver lagged; frames dropped (best-effort fan-out, §5)");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            msg = stream.next() => {
                match msg {
                    None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                    Some(Ok(Message::Text(text))) => {
                        // subscribe/unsubscribe rooms are reserved for future
                        // selective fan-out; the current design broadcasts
                        // data:live to every dashboard regardless (§4.1).
                        if serde_json::from_str::<ClientFrame>(&text).is_err() {
                            warn!("malformed dashboard frame, dropping");
                        }
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    state.dashboard_count.fetch_sub(1, Ordering::Relaxed);
}
