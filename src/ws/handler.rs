//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::app::AppState;
use crate::lobby::{ConnectionId, SessionContext};
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::ws::protocol::{decode_client_msg, ProtocolError, ServerMsg};

/// WebSocket upgrade handler. Identity is bound by the first join frame.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (conn_id, outbound) = state.fabric.register();
    info!(conn_id = %conn_id, "New WebSocket connection");

    let (ws_sink, ws_stream) = socket.split();
    let writer_handle = tokio::spawn(write_frames(conn_id, ws_sink, outbound));

    let mut ctx = SessionContext::new(conn_id);
    read_frames(&state, &mut ctx, ws_stream).await;

    // Cleanup on disconnect
    state.service.disconnect(&ctx);
    writer_handle.abort();

    info!(conn_id = %conn_id, user_id = ?ctx.user_id, "WebSocket connection closed");
}

/// Writer task: fabric channel -> socket
async fn write_frames(
    conn_id: ConnectionId,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Arc<str>>,
) {
    while let Some(frame) = outbound.recv().await {
        if let Err(e) = ws_sink.send(Message::Text(frame.to_string())).await {
            debug!(conn_id = %conn_id, error = %e, "WebSocket send failed");
            break;
        }
    }
}

/// Reader loop: socket -> lobby service
async fn read_frames(state: &AppState, ctx: &mut SessionContext, mut ws_stream: SplitStream<WebSocket>) {
    let rate_limiter = ConnectionRateLimiter::new();

    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_inbound() {
                    warn!(conn_id = %ctx.conn_id, "Rate limited inbound frame");
                    continue;
                }

                match decode_client_msg(&text) {
                    Ok(msg) => state.service.handle_message(ctx, msg).await,
                    Err(e) => reject(state, ctx, e),
                }
            }
            Ok(Message::Binary(_)) => reject(state, ctx, ProtocolError::Binary),
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(conn_id = %ctx.conn_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(conn_id = %ctx.conn_id, error = %e, "WebSocket error");
                break;
            }
        }
    }
}

/// Answer a bad frame with an error frame; the connection stays open
fn reject(state: &AppState, ctx: &SessionContext, err: ProtocolError) {
    warn!(conn_id = %ctx.conn_id, error = %err, "Rejected client frame");
    state
        .fabric
        .send_to_connection(ctx.conn_id, &ServerMsg::error(err.client_message()));
}
