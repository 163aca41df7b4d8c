//! WebSocket endpoint: authenticates the handshake, bridges the socket to
//! the connection registry, and guarantees deregistration on every exit
//! path.

use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::HeaderMap,
    response::Response,
};
use futures::{SinkExt, StreamExt};
use metrics::counter;
use serde::Deserialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use service_core::error::AppError;

use crate::AppState;
use crate::realtime::{ClientMessage, ConnectionHandle, ServerEvent};
use crate::services::{AccessTokenClaims, OrgContext, ServiceError};

/// Per-connection lifecycle. `Closed` is terminal and reachable from any
/// prior state on failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    Connecting,
    Authenticated,
    Subscribed,
    Active,
    Idle,
    Closed,
}

fn transition(state: &mut ConnState, next: ConnState, conn_id: Uuid) {
    if *state != next {
        tracing::debug!(conn_id = %conn_id, from = ?state, to = ?next, "Connection state");
        *state = next;
    }
}

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

/// Upgrade handler. The token is validated before the upgrade completes;
/// a failed validation rejects the connection. There is no anonymous
/// fallback.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Response, AppError> {
    let mut conn_state = ConnState::Connecting;

    let token = query
        .token
        .or_else(|| bearer_token(&headers))
        .ok_or_else(|| {
            ServiceError::ConnectionRejected("missing access token".to_string())
        })?;

    let claims = state.tokens.validate(&token).map_err(|e| {
        counter!("ws_connections_rejected_total").increment(1);
        ServiceError::ConnectionRejected(e.to_string())
    })?;

    // Claim is authoritative for tenant resolution on an authenticated
    // connection.
    let ctx = state.tenants.resolve(Some(&claims), None).await?;

    transition(&mut conn_state, ConnState::Authenticated, claims.jti);
    counter!("ws_handshakes_total").increment(1);

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, claims, ctx, conn_state)))
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.to_string())
}

async fn handle_socket(
    socket: WebSocket,
    state: AppState,
    claims: AccessTokenClaims,
    ctx: OrgContext,
    mut conn_state: ConnState,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let (event_tx, mut event_rx) = mpsc::channel::<ServerEvent>(32);
    let handle = ConnectionHandle::new(claims.sub, event_tx.clone());
    let conn_id = handle.conn_id;
    let liveness = handle.clone();

    state.registry.subscribe(ctx.org_id, handle);
    transition(&mut conn_state, ConnState::Subscribed, conn_id);

    let _ = event_tx
        .send(ServerEvent::Connected {
            org_id: ctx.org_id,
            user_id: claims.sub,
        })
        .await;

    // Forward registry events to the socket; Ping becomes a protocol frame.
    let send_task = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            let message = match &event {
                ServerEvent::Ping => Message::Ping(Vec::new()),
                other => match serde_json::to_string(other) {
                    Ok(json) => Message::Text(json),
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to serialize event");
                        continue;
                    }
                },
            };
            if ws_tx.send(message).await.is_err() {
                break;
            }
        }
    });

    transition(&mut conn_state, ConnState::Active, conn_id);
    let idle_after = state.registry.heartbeat().interval;

    loop {
        match tokio::time::timeout(idle_after, ws_rx.next()).await {
            // Nothing inbound for a full heartbeat interval; the reaper
            // decides eviction, we just note the lull.
            Err(_) => {
                transition(&mut conn_state, ConnState::Idle, conn_id);
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                tracing::debug!(conn_id = %conn_id, error = %e, "WebSocket read failed");
                break;
            }
            Ok(Some(Ok(message))) => {
                liveness.touch();
                transition(&mut conn_state, ConnState::Active, conn_id);

                match message {
                    Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(ClientMessage::Ping) => {
                            let _ = event_tx.send(ServerEvent::Pong).await;
                        }
                        Err(_) => {
                            tracing::debug!(conn_id = %conn_id, "Ignoring unrecognized frame");
                        }
                    },
                    // Protocol-level pings are answered by the stack; both
                    // directions already refreshed liveness above.
                    Message::Ping(_) | Message::Pong(_) => {}
                    Message::Close(_) => break,
                    Message::Binary(_) => {}
                }
            }
        }
    }

    // Synchronous deregistration: no orphaned publish target survives this
    // point, whatever path led here.
    state.registry.unsubscribe(ctx.org_id, conn_id);
    send_task.abort();
    transition(&mut conn_state, ConnState::Closed, conn_id);
}
