//! Live channel: one reader loop and one writer task per connected user.
//!
//! The writer owns the socket sink and drains the connection's bounded
//! outbound queue. The reader feeds inbound frames through the ingestion
//! pipeline and is the only task that releases the user's registry entry.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use murmur_shared::{ErrorFrame, InboundFrame, UserId};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::AppState;
use crate::auth::AuthUser;
use crate::ingest::Submission;
use crate::registry::ConnectionHandle;

/// How long the writer gets to flush its close frame before it is aborted.
const WRITER_SHUTDOWN: Duration = Duration::from_secs(2);

/// GET /ws
/// Authenticates before upgrading; a rejected token never gets a socket.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    user: AuthUser,
    ws: WebSocketUpgrade,
) -> Response {
    info!(user = %user.user_id.short(), "WebSocket connection authenticated");
    ws.on_upgrade(move |socket| run_connection(socket, state, user.user_id))
}

pub async fn run_connection(socket: WebSocket, state: AppState, user_id: UserId) {
    let (sink, mut stream) = socket.split();
    let (handle, rx) = ConnectionHandle::new(state.config.outbound_queue_capacity);
    let closed = handle.close_signal();

    state.registry.add(user_id.clone(), handle.clone()).await;
    state.presence.mark_online(&user_id).await;

    let mut writer = tokio::spawn(writer_task(sink, rx, closed.clone()));

    info!(user = %user_id.short(), conn = %handle.id(), "Live channel opened");

    loop {
        let next = tokio::select! {
            _ = closed.cancelled() => {
                debug!(user = %user_id.short(), conn = %handle.id(), "Channel closed by server");
                break;
            }
            next = stream.next() => next,
        };

        match next {
            Some(Ok(Message::Text(text))) => {
                state.presence.mark_online(&user_id).await;

                let frame = match InboundFrame::from_json(text.as_str()) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(user = %user_id.short(), error = %e, "Malformed frame, closing channel");
                        break;
                    }
                };

                let submission = Submission {
                    content: frame.content,
                    recipient: frame.recipient,
                    attachment: None,
                };

                if let Err(e) = state.ingest.submit(&user_id, submission).await {
                    debug!(user = %user_id.short(), error = %e, "Frame rejected");
                    reply_error(&handle, ErrorFrame::new(e.kind(), e.public_message()));
                }
            }
            Some(Ok(Message::Binary(_))) => {
                warn!(user = %user_id.short(), "Binary frame on a text channel, closing");
                break;
            }
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                state.presence.mark_online(&user_id).await;
            }
            Some(Ok(Message::Close(frame))) => {
                debug!(user = %user_id.short(), reason = ?frame, "Client initiated close");
                break;
            }
            Some(Err(e)) => {
                debug!(user = %user_id.short(), error = %e, "WebSocket receive error");
                break;
            }
            None => break,
        }
    }

    let released = state.registry.release(&user_id, handle.id()).await;
    handle.close();

    if tokio::time::timeout(WRITER_SHUTDOWN, &mut writer).await.is_err() {
        writer.abort();
    }

    info!(
        user = %user_id.short(),
        conn = %handle.id(),
        released,
        "Live channel closed"
    );
}

fn reply_error(handle: &ConnectionHandle, frame: ErrorFrame) {
    match frame.to_json() {
        Ok(json) => {
            if let Err(e) = handle.send(Arc::from(json)) {
                debug!(error = %e, "Could not queue error frame");
            }
        }
        Err(e) => warn!(error = %e, "Failed to serialize error frame"),
    }
}

/// Sole owner of the sink. Stops on close signal, queue shutdown, or the
/// first failed write, which it reports by firing the close signal.
async fn writer_task(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Arc<str>>,
    closed: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            payload = rx.recv() => {
                let Some(payload) = payload else { break };
                if let Err(e) = sink.send(Message::Text(payload.to_string().into())).await {
                    debug!(error = %e, "WebSocket send failed");
                    closed.cancel();
                    return;
                }
            }
            _ = closed.cancelled() => break,
        }
    }

    let _ = sink.send(Message::Close(None)).await;
}
