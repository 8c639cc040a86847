//! WebSocket upgrade handler
//!
//! Each socket becomes one connection on the channel transport: text frames
//! are parsed as [`ClientMsg`] and pushed to the server, server messages are
//! written back as JSON text.

use std::fmt::Display;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::app::AppState;
use crate::net::protocol::{ClientMsg, ServerMsg};
use crate::net::transport::ConnectionSender;
use crate::net::ConnectionId;
use crate::util::rate_limit::ConnectionRateLimiter;

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let transport = match state.hub.connect() {
        Ok(transport) => transport,
        Err(e) => {
            error!(error = %e, "Game server unavailable, refusing WebSocket");
            return (StatusCode::SERVICE_UNAVAILABLE, "Game server unavailable").into_response();
        }
    };

    let (sender, inbox) = transport.split();
    let rate_limit = state.config.request_rate_limit;
    ws.on_upgrade(move |socket| handle_socket(socket, sender, inbox, rate_limit))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(
    socket: WebSocket,
    sender: ConnectionSender,
    inbox: mpsc::UnboundedReceiver<ServerMsg>,
    rate_limit: u32,
) {
    let connection_id = sender.id();
    info!(connection_id = %connection_id, "New WebSocket connection");

    let (ws_sink, ws_stream) = socket.split();
    let rate_limiter = ConnectionRateLimiter::new(rate_limit);

    let mut writer_handle = tokio::spawn(forward_outbound(ws_sink, inbox, connection_id));

    // The reader owns the sender; dropping it reports the disconnect
    tokio::select! {
        _ = forward_inbound(ws_stream, sender, rate_limiter) => {}
        _ = &mut writer_handle => {
            debug!(connection_id = %connection_id, "Server closed the connection");
        }
    }

    writer_handle.abort();
    info!(connection_id = %connection_id, "WebSocket connection closed");
}

/// Server messages -> socket, then a close frame once the server drops us
async fn forward_outbound<K>(
    mut sink: K,
    mut inbox: mpsc::UnboundedReceiver<ServerMsg>,
    connection_id: ConnectionId,
) where
    K: Sink<Message> + Unpin,
    K::Error: Display,
{
    while let Some(msg) = inbox.recv().await {
        if let Err(e) = send_msg(&mut sink, &msg).await {
            debug!(connection_id = %connection_id, error = %e, "WebSocket send failed");
            break;
        }
    }
    let _ = sink.send(Message::Close(None)).await;
}

/// Socket frames -> game server, until the socket closes or errors
async fn forward_inbound<S, E>(
    mut stream: S,
    sender: ConnectionSender,
    rate_limiter: ConnectionRateLimiter,
) where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let connection_id = sender.id();
    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_message() {
                    warn!(connection_id = %connection_id, "Rate limited client message");
                    continue;
                }

                match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(msg) => {
                        if sender.send(msg).is_err() {
                            debug!(connection_id = %connection_id, "Game server gone");
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(connection_id = %connection_id, error = %e, "Failed to parse client message");
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(connection_id = %connection_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(connection_id = %connection_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(connection_id = %connection_id, error = %e, "WebSocket error");
                break;
            }
        }
    }
}

/// Send a message over WebSocket
async fn send_msg<K>(sink: &mut K, msg: &ServerMsg) -> Result<(), String>
where
    K: Sink<Message> + Unpin,
    K::Error: Display,
{
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
