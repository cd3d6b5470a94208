//! WebSocket endpoint for a [`RemotePeer`].
//!
//! The server end of [`WsTransport`](crate::transport::WsTransport): every
//! text frame is a [`WsRequest`], answered by a [`WsReply`] with the same id.

use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;

use crate::error::{MapperError, MapperResult};
use crate::peer::RemotePeer;
use crate::transport::QueryResponse;
use crate::transport::ws::{WsReply, WsRequest};

/// Router exposing `/ws` and `/health`.
pub fn router(peer: Arc<RemotePeer>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(peer)
}

/// Bind `addr` and serve until the listener fails.
pub async fn serve(peer: Arc<RemotePeer>, addr: &str) -> MapperResult<()> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| MapperError::Connection(format!("failed to bind {}: {}", addr, e)))?;
    tracing::info!("peer listening on {}", addr);
    axum::serve(listener, router(peer))
        .await
        .map_err(|e| MapperError::Io(e.to_string()))
}

async fn health_check(State(peer): State<Arc<RemotePeer>>) -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "mappers": peer.mapper_names(),
    }))
}

async fn ws_handler(ws: WebSocketUpgrade, State(peer): State<Arc<RemotePeer>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, peer))
}

async fn handle_socket(socket: WebSocket, peer: Arc<RemotePeer>) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<WsReply>(32);

    let send_task = tokio::spawn(async move {
        while let Some(reply) = rx.recv().await {
            let text = match serde_json::to_string(&reply) {
                Ok(t) => t,
                Err(e) => {
                    tracing::error!("failed to serialize reply: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => match serde_json::from_str::<WsRequest>(text.as_str()) {
                Ok(request) => {
                    let peer = Arc::clone(&peer);
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        let response = peer.handle(&request.event, request.payload).await;
                        let _ = tx
                            .send(WsReply {
                                id: request.id,
                                response,
                            })
                            .await;
                    });
                }
                Err(e) => {
                    tracing::warn!("invalid request frame: {}", e);
                    let _ = tx
                        .send(WsReply {
                            id: 0,
                            response: QueryResponse::err(format!("invalid message: {}", e)),
                        })
                        .await;
                }
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    drop(tx);
    let _ = send_task.await;
    tracing::debug!("peer socket closed");
}
