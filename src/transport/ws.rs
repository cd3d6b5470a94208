//! WebSocket client transport.
//!
//! Requests go out as `{id, event, payload}` text frames and replies come
//! back as `{id, error?, rows?}`; replies are matched to requests by id, so
//! several requests can be in flight on one socket. Once the socket closes,
//! pending and later requests fail with a transport error.

use async_trait::async_trait;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::{QueryRequest, QueryResponse, Transport};
use crate::config::PeerConfig;
use crate::error::{MapperError, MapperResult};
use crate::store::Rows;

/// Request frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsRequest {
    pub id: u64,
    pub event: String,
    pub payload: QueryRequest,
}

/// Reply frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsReply {
    pub id: u64,
    #[serde(flatten)]
    pub response: QueryResponse,
}

type Pending = Arc<DashMap<u64, oneshot::Sender<QueryResponse>>>;

pub struct WsTransport {
    outgoing: mpsc::Sender<String>,
    pending: Pending,
    closed: Arc<AtomicBool>,
    next_id: AtomicU64,
}

/// Mark the socket closed, then drop every waiter so its request fails.
fn shut(closed: &AtomicBool, pending: &Pending) {
    closed.store(true, Ordering::SeqCst);
    if !pending.is_empty() {
        tracing::debug!("peer socket closed, failing {} pending requests", pending.len());
    }
    pending.clear();
}

impl WsTransport {
    /// Open a socket to a peer endpoint such as `ws://127.0.0.1:8080/ws`.
    pub async fn connect(url: &str) -> MapperResult<Self> {
        let (stream, _) = connect_async(url)
            .await
            .map_err(|e| MapperError::Connection(format!("{}: {}", url, e)))?;
        tracing::info!("connected to peer at {}", url);

        let (mut sink, mut source) = stream.split();
        let (outgoing, mut rx) = mpsc::channel::<String>(32);
        let pending: Pending = Arc::new(DashMap::new());
        let closed = Arc::new(AtomicBool::new(false));

        let (outbox, writer_closed) = (Arc::clone(&pending), Arc::clone(&closed));
        tokio::spawn(async move {
            while let Some(text) = rx.recv().await {
                if let Err(e) = sink.send(Message::Text(text)).await {
                    tracing::warn!("peer socket write failed: {}", e);
                    break;
                }
            }
            shut(&writer_closed, &outbox);
        });

        let (inbox, reader_closed) = (Arc::clone(&pending), Arc::clone(&closed));
        tokio::spawn(async move {
            while let Some(Ok(msg)) = source.next().await {
                match msg {
                    Message::Text(text) => match serde_json::from_str::<WsReply>(&text) {
                        Ok(reply) => {
                            if let Some((_, waiter)) = inbox.remove(&reply.id) {
                                let _ = waiter.send(reply.response);
                            } else {
                                tracing::warn!("reply for unknown request {}", reply.id);
                            }
                        }
                        Err(e) => tracing::warn!("invalid reply frame: {}", e),
                    },
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            shut(&reader_closed, &inbox);
        });

        Ok(Self {
            outgoing,
            pending,
            closed,
            next_id: AtomicU64::new(1),
        })
    }

    /// Connect to the peer named in the configuration.
    pub async fn from_config(config: &PeerConfig) -> MapperResult<Self> {
        Self::connect(&config.url).await
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn request(&self, event: &str, request: QueryRequest) -> MapperResult<Rows> {
        if self.is_closed() {
            return Err(MapperError::Transport("socket closed".to_string()));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = serde_json::to_string(&WsRequest {
            id,
            event: event.to_string(),
            payload: request,
        })
        .map_err(|e| MapperError::Transport(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        // A close between the first check and the insert would miss this waiter.
        if self.is_closed() || self.outgoing.send(frame).await.is_err() {
            self.pending.remove(&id);
            return Err(MapperError::Transport("socket closed".to_string()));
        }

        let response = rx
            .await
            .map_err(|_| MapperError::Transport("socket closed before reply".to_string()))?;
        response.into_result()
    }
}
