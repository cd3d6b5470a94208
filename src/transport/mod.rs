//! Request/response channel between a client mapper and its remote peer.

pub mod ws;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::descriptor::Descriptor;
use crate::error::{MapperError, MapperResult};
use crate::store::Rows;

pub use ws::WsTransport;

/// Event name carrying forwarded queries.
pub const QUERY_EVENT: &str = "query";

/// Payload of a `"query"` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    #[serde(rename = "mapperName")]
    pub mapper_name: String,
    #[serde(rename = "queryDescriptor")]
    pub query_descriptor: Descriptor,
}

/// Reply to a request: an error or rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<Rows>,
}

impl QueryResponse {
    pub fn ok(rows: Rows) -> Self {
        Self {
            error: None,
            rows: Some(rows),
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            rows: None,
        }
    }

    /// A reported error becomes [`MapperError::Remote`], verbatim.
    pub fn into_result(self) -> MapperResult<Rows> {
        match self.error {
            Some(message) => Err(MapperError::Remote(message)),
            None => Ok(self.rows.unwrap_or_default()),
        }
    }
}

/// Client side of the channel.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(&self, event: &str, request: QueryRequest) -> MapperResult<Rows>;
}

/// A request travelling through a [`ChannelTransport`].
#[derive(Debug)]
pub struct Envelope {
    pub event: String,
    pub request: QueryRequest,
    pub reply: oneshot::Sender<QueryResponse>,
}

/// In-process transport over tokio channels.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::Sender<Envelope>,
}

impl ChannelTransport {
    pub fn new(tx: mpsc::Sender<Envelope>) -> Self {
        Self { tx }
    }

    /// A transport and the receiving end a peer serves.
    pub fn pair(buffer: usize) -> (Self, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn request(&self, event: &str, request: QueryRequest) -> MapperResult<Rows> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(Envelope {
                event: event.to_string(),
                request,
                reply,
            })
            .await
            .map_err(|_| MapperError::Transport("peer channel closed".to_string()))?;

        let response = response
            .await
            .map_err(|_| MapperError::Transport("peer dropped the request".to_string()))?;
        response.into_result()
    }
}
