//! Server side of the query channel.
//!
//! A [`RemotePeer`] knows mappers by logical name and answers `"query"`
//! events by replaying the descriptor on the named mapper. Failures are sent
//! back as error responses carrying the error text.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::descriptor::Descriptor;
use crate::error::{MapperError, MapperResult};
use crate::mapper::{Entity, Mapper};
use crate::store::Rows;
use crate::transport::{Envelope, QUERY_EVENT, QueryRequest, QueryResponse};

/// Something a descriptor can be replayed on.
#[async_trait]
pub trait RemoteTarget: Send + Sync {
    fn name(&self) -> &str;

    async fn execute_descriptor(&self, descriptor: Descriptor) -> MapperResult<Rows>;
}

#[derive(Default)]
pub struct RemotePeer {
    targets: DashMap<String, Arc<dyn RemoteTarget>>,
}

impl RemotePeer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, target: Arc<dyn RemoteTarget>) {
        let name = target.name().to_string();
        if self.targets.insert(name.clone(), target).is_some() {
            tracing::warn!("mapper '{}' registered twice, keeping the latest", name);
        }
    }

    pub fn register_mapper<E: Entity>(&self, mapper: Mapper<E>) {
        self.register(Arc::new(mapper));
    }

    pub fn mapper_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.targets.iter().map(|t| t.key().clone()).collect();
        names.sort();
        names
    }

    /// Answer one request.
    pub async fn handle(&self, event: &str, request: QueryRequest) -> QueryResponse {
        match self.dispatch(event, request).await {
            Ok(rows) => QueryResponse::ok(rows),
            Err(e) => {
                tracing::warn!("remote query failed: {}", e);
                QueryResponse::err(e.to_string())
            }
        }
    }

    async fn dispatch(&self, event: &str, request: QueryRequest) -> MapperResult<Rows> {
        if event != QUERY_EVENT {
            return Err(MapperError::Transport(format!("unknown event: '{}'", event)));
        }
        let target = self
            .targets
            .get(&request.mapper_name)
            .map(|t| Arc::clone(t.value()))
            .ok_or_else(|| MapperError::UnknownMapper(request.mapper_name.clone()))?;
        target.execute_descriptor(request.query_descriptor).await
    }

    /// Serve requests from an in-process channel until every sender is gone.
    /// Each request is handled on its own task.
    pub fn serve_channel(self: Arc<Self>, mut rx: mpsc::Receiver<Envelope>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                let peer = Arc::clone(&self);
                tokio::spawn(async move {
                    let response = peer.handle(&envelope.event, envelope.request).await;
                    let _ = envelope.reply.send(response);
                });
            }
            tracing::debug!("peer channel closed");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl RemoteTarget for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn execute_descriptor(&self, descriptor: Descriptor) -> MapperResult<Rows> {
            let row = json!({"fields": descriptor.len()});
            Ok(vec![row.as_object().cloned().unwrap_or_default()])
        }
    }

    fn request(mapper: &str) -> QueryRequest {
        QueryRequest {
            mapper_name: mapper.to_string(),
            query_descriptor: Descriptor::default(),
        }
    }

    #[tokio::test]
    async fn test_routes_by_mapper_name() {
        let peer = RemotePeer::new();
        peer.register(Arc::new(Echo));
        let response = peer.handle(QUERY_EVENT, request("echo")).await;
        assert_eq!(response.error, None);
        assert_eq!(response.rows.unwrap()[0]["fields"], 0);
        assert_eq!(peer.mapper_names(), vec!["echo".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_mapper_and_event() {
        let peer = RemotePeer::new();
        peer.register(Arc::new(Echo));

        let response = peer.handle(QUERY_EVENT, request("ghost")).await;
        assert_eq!(response.error.as_deref(), Some("unknown mapper: 'ghost'"));

        let response = peer.handle("subscribe", request("echo")).await;
        assert!(response.error.unwrap().contains("unknown event"));
    }
}
