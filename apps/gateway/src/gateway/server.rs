//! WebSocket upgrade handler and per-connection event loop.
//!
//! This is the transport boundary: connect, disconnect and client messages
//! are handed to the connection tracker and message relay from here.

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use relay_common::{ClientEvent, ServerEvent};
use tokio::sync::mpsc;

use crate::error::ApiError;
use crate::AppState;

use super::session::SESSION_OUTBOUND_CAPACITY;

/// Standard "going away" close code, sent while draining.
const CLOSE_GOING_AWAY: u16 = 1001;
/// Application-level close code for frames that are not a valid client event.
const CLOSE_INVALID_PAYLOAD: u16 = 4000;

type WsSink = SplitSink<WebSocket, Message>;

pub fn router() -> Router<AppState> {
    Router::new().route("/ws", get(ws_upgrade))
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    if !state.shutdown.is_running() {
        return ApiError::service_unavailable("Gateway is shutting down").into_response();
    }
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: AppState) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel(SESSION_OUTBOUND_CAPACITY);

    let session = state.tracker.on_connect(outbound_tx).await;
    tracing::info!(session_id = %session.session_id, "gateway session established");

    let drain = state.shutdown.drain_token();

    loop {
        tokio::select! {
            // Client sends us a message.
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientEvent>(&text) {
                            Ok(ClientEvent::NewMessage { message }) => {
                                state.relay.on_client_message(&session, message).await;
                            }
                            Err(_) => {
                                let _ = send_close(&mut ws_tx, CLOSE_INVALID_PAYLOAD, "Invalid event").await;
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(?e, session_id = %session.session_id, "ws read error");
                        break;
                    }
                    _ => continue,
                }
            }

            // Event fanned out to this session.
            Some(event) = outbound_rx.recv() => {
                if send_event(&mut ws_tx, &event).await.is_err() {
                    break;
                }
            }

            // Process is draining.
            _ = drain.cancelled() => {
                let _ = send_close(&mut ws_tx, CLOSE_GOING_AWAY, "Server shutting down").await;
                break;
            }
        }
    }

    state.tracker.on_disconnect(&session).await;
    tracing::info!(session_id = %session.session_id, "gateway session ended");
}

async fn send_event(ws_tx: &mut WsSink, event: &ServerEvent) -> Result<(), axum::Error> {
    let json = serde_json::to_string(event).map_err(axum::Error::new)?;
    ws_tx.send(Message::Text(json.into())).await
}

/// Send a WebSocket close frame with a code and reason.
async fn send_close(ws_tx: &mut WsSink, code: u16, reason: &str) -> Result<(), axum::Error> {
    let close_msg = Message::Close(Some(CloseFrame {
        code,
        reason: reason.to_string().into(),
    }));
    ws_tx.send(close_msg).await
}
