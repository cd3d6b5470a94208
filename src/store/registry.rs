//! Process-wide store registry.
//!
//! Mappers built from equal configurations share one store. Equality is
//! decided on the canonical configuration key, not on identity. Entries
//! live for the rest of the process.

use dashmap::DashMap;
use std::sync::{Arc, LazyLock};

use super::PgStore;
use crate::config::StoreConfig;
use crate::error::MapperResult;

static GLOBAL: LazyLock<ConnectionRegistry> = LazyLock::new(ConnectionRegistry::new);

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    stores: DashMap<String, Arc<PgStore>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry shared by the whole process.
    pub fn global() -> &'static ConnectionRegistry {
        &GLOBAL
    }

    /// Store for `config`, created on first request.
    pub fn connection(&self, config: &StoreConfig) -> MapperResult<Arc<PgStore>> {
        let key = config.key();
        if let Some(store) = self.stores.get(&key) {
            return Ok(Arc::clone(store.value()));
        }

        let entry = self.stores.entry(key);
        match entry {
            dashmap::mapref::entry::Entry::Occupied(existing) => Ok(Arc::clone(existing.get())),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let store = Arc::new(PgStore::connect_lazy(config)?);
                tracing::info!("opened store connection for {}", redact(&config.url));
                slot.insert(Arc::clone(&store));
                Ok(store)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }
}

/// Drop credentials from a connection URL for logging.
fn redact(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme), Some(at)) if at > scheme => format!("{}://***{}", &url[..scheme], &url[at..]),
        _ => url.to_string(),
    }
}
