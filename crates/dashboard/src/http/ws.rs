use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use datapilot_contracts::LogLevel;
use futures::{SinkExt, StreamExt};

use super::{AppState, emit_log};

/// Live log stream. The server only pushes; client frames are ignored (no
/// client-to-server protocol is defined). Periodic pings keep idle
/// connections alive.
pub(super) async fn logs(
    State(app): State<AppState>,
    Path(session_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| stream_logs(app, session_id, socket))
}

async fn stream_logs(app: AppState, session_id: String, socket: WebSocket) {
    let mut conn = app.broadcaster.connect(&session_id);
    crate::metrics::inc_ws_connections();
    tracing::info!(session_id = %session_id, "websocket connected");
    emit_log(&app, &session_id, LogLevel::Info, "WebSocket connected");

    let (mut sink, mut stream) = socket.split();
    let mut ping = tokio::time::interval(Duration::from_secs(app.config.ws_ping_secs.max(1)));
    // The first tick completes immediately; consume it so pings are spaced.
    ping.tick().await;

    loop {
        tokio::select! {
            entry = conn.rx.recv() => {
                // A closed channel means this connection was overwritten by a
                // newer one for the same session id.
                let Some(entry) = entry else { break };
                let Ok(payload) = serde_json::to_string(&entry) else { continue };
                if sink.send(Message::Text(payload.into())).await.is_err() {
                    break;
                }
            }
            _ = ping.tick() => {
                if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
            frame = stream.next() => {
                match frame {
                    None | Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    app.broadcaster.disconnect(&session_id, conn.conn_id);
    crate::metrics::dec_ws_connections();
    tracing::info!(session_id = %session_id, "websocket disconnected");
}
