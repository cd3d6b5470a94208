//! Where a mapper runs.

use std::fmt;
use std::sync::Arc;

use crate::store::Store;
use crate::transport::Transport;

/// Execution context, fixed when a mapper is built.
///
/// A server owns the store and runs queries directly. A client has no
/// schema authority and forwards descriptors to a remote peer.
#[derive(Clone)]
pub enum ExecutionContext {
    Server(Arc<dyn Store>),
    Client(Arc<dyn Transport>),
}

impl ExecutionContext {
    pub fn server(store: Arc<dyn Store>) -> Self {
        Self::Server(store)
    }

    pub fn client(transport: Arc<dyn Transport>) -> Self {
        Self::Client(transport)
    }

    pub fn is_server(&self) -> bool {
        matches!(self, Self::Server(_))
    }

    pub fn store(&self) -> Option<&Arc<dyn Store>> {
        match self {
            Self::Server(store) => Some(store),
            Self::Client(_) => None,
        }
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server(_) => f.write_str("Server"),
            Self::Client(_) => f.write_str("Client"),
        }
    }
}
