//! WebSocket upgrade and per-client socket loop.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::extract::rejection::ExtensionRejection;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::Extension;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::connection::ClientConnection;
use super::gateway::{GatewayState, RealtimeGateway};
use super::heartbeat::{HeartbeatResult, run_heartbeat};
use crate::errors::ApiError;
use crate::metrics::{
    WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL, WS_REJECTED_TOTAL,
};
use crate::pipeline::SessionId;

/// Upgrade handler mounted at the configured real-time path.
///
/// The origin check runs before the upgrade headers are inspected, so a
/// disallowed origin is refused with the same 403 as any other request.
pub(crate) async fn upgrade(
    State(gateway): State<RealtimeGateway>,
    headers: HeaderMap,
    session: Result<Extension<SessionId>, ExtensionRejection>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let state = gateway.state();
    if state != GatewayState::Serving {
        counter!(WS_REJECTED_TOTAL, "reason" => "not_ready").increment(1);
        return ApiError::Custom {
            status: StatusCode::SERVICE_UNAVAILABLE,
            code: "NOT_READY".into(),
            message: format!("Real-time gateway is {state}"),
            details: None,
        }
        .into_response();
    }

    let origin = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok());
    if !gateway.shared.cors.allows_origin(origin) {
        counter!(WS_REJECTED_TOTAL, "reason" => "origin").increment(1);
        warn!(origin = origin.unwrap_or_default(), "websocket origin rejected");
        return ApiError::forbidden("Origin not allowed").into_response();
    }

    let settings = &gateway.shared.settings;
    let active = gateway.broadcast().connection_count().await;
    if active >= settings.max_connections {
        counter!(WS_REJECTED_TOTAL, "reason" => "capacity").increment(1);
        warn!(active, max = settings.max_connections, "websocket connection limit reached");
        return too_many_connections();
    }

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };
    let session_id = session.ok().map(|Extension(id)| id.0);
    let max_message_size = settings.max_message_size;

    ws.max_message_size(max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, gateway, session_id))
}

fn too_many_connections() -> Response {
    ApiError::Custom {
        status: StatusCode::SERVICE_UNAVAILABLE,
        code: "TOO_MANY_CONNECTIONS".into(),
        message: "Too many real-time connections".into(),
        details: None,
    }
    .into_response()
}

/// Drive one client until it disconnects or the gateway shuts down.
async fn handle_socket(socket: WebSocket, gateway: RealtimeGateway, session_id: Option<String>) {
    let shared = Arc::clone(&gateway.shared);
    let settings = &shared.settings;
    let (tx, mut rx) = mpsc::channel::<Arc<String>>(settings.send_queue_capacity.max(1));
    let connection = Arc::new(ClientConnection::new(
        format!("conn_{}", Uuid::now_v7().simple()),
        session_id,
        tx,
    ));

    // the cap is checked again here; two upgrades may race past the handler check
    if !shared
        .broadcast
        .try_add(Arc::clone(&connection), settings.max_connections)
        .await
    {
        counter!(WS_REJECTED_TOTAL, "reason" => "capacity").increment(1);
        let mut socket = socket;
        let _ = socket.send(Message::Close(None)).await;
        return;
    }

    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
    info!(
        conn_id = %connection.id,
        session_id = connection.session_id().unwrap_or_default(),
        "websocket client connected"
    );

    let cancel = shared.shutdown.child_token();
    let heartbeat_interval = Duration::from_millis(settings.heartbeat_interval_ms.max(1));
    let heartbeat_timeout = Duration::from_millis(settings.heartbeat_timeout_ms);
    let (mut ws_tx, mut ws_rx) = socket.split();

    shared.handler.on_connect(&gateway, &connection).await;

    // Writer: queued events, periodic ping, close on cancel
    let writer_cancel = cancel.clone();
    let writer_id = connection.id.clone();
    let writer = tokio::spawn(async move {
        let mut ping = tokio::time::interval(heartbeat_interval);
        let _ = ping.tick().await;
        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(text) = msg else { break };
                    if ws_tx.send(Message::Text(text.as_str().into())).await.is_err() {
                        break;
                    }
                }
                _ = ping.tick() => {
                    if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                    trace!(conn_id = %writer_id, "sent ping");
                }
                () = writer_cancel.cancelled() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    let heartbeat = {
        let connection = Arc::clone(&connection);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let result =
                run_heartbeat(Arc::clone(&connection), heartbeat_interval, heartbeat_timeout, cancel.clone())
                    .await;
            if result == HeartbeatResult::TimedOut {
                warn!(
                    conn_id = %connection.id,
                    silent_ms = u64::try_from(connection.last_pong_elapsed().as_millis()).unwrap_or(u64::MAX),
                    "websocket client stopped responding"
                );
                cancel.cancel();
            }
            result
        })
    };

    let reason = loop {
        let frame = tokio::select! {
            frame = ws_rx.next() => frame,
            () = cancel.cancelled() => break "closed_by_server",
        };
        match frame {
            Some(Ok(Message::Text(text))) => {
                connection.mark_alive();
                shared.handler.on_message(&gateway, &connection, text.as_str()).await;
            }
            Some(Ok(Message::Binary(_) | Message::Ping(_) | Message::Pong(_))) => {
                connection.mark_alive();
            }
            Some(Ok(Message::Close(_))) | None => break "closed_by_client",
            Some(Err(e)) => {
                debug!(conn_id = %connection.id, error = %e, "websocket read failed");
                break "read_error";
            }
        }
    };

    cancel.cancel();
    let reason = match heartbeat.await {
        Ok(HeartbeatResult::TimedOut) => "heartbeat_timeout",
        _ => reason,
    };
    let _ = writer.await;

    shared.broadcast.remove(&connection.id).await;
    shared.handler.on_disconnect(&gateway, &connection).await;

    counter!(WS_DISCONNECTIONS_TOTAL, "reason" => reason).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    info!(
        conn_id = %connection.id,
        reason,
        dropped = connection.drop_count(),
        duration_ms = u64::try_from(connection.age().as_millis()).unwrap_or(u64::MAX),
        "websocket client disconnected"
    );
}
