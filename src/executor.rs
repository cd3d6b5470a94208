//! Dual-path query execution.
//!
//! An [`Executor`] is a query in progress, bound to a mapper and a result
//! shaper. Clause methods come from [`QueryExt`]; awaiting the executor
//! consumes it and runs these stages in order:
//!
//! 1. wait for the mapper's table-ready gate,
//! 2. run the entity's `before_query` hook,
//! 3. consult the cache (reads) or clear it (mutations),
//! 4. execute on the store (server) or forward the descriptor (client),
//! 5. run the entity's `after_query` hook, write back to the cache, shape.
//!
//! Any failure rejects the whole execution; nothing is written back to the
//! cache and the shaper never runs.

use futures::future::{BoxFuture, FutureExt};
use std::fmt;
use std::future::IntoFuture;

use crate::context::ExecutionContext;
use crate::descriptor::{self, Descriptor};
use crate::error::MapperResult;
use crate::mapper::{Entity, Mapper};
use crate::query::{Query, QueryExt};
use crate::store::Rows;
use crate::transport::{QUERY_EVENT, QueryRequest};

type Shaper<T> = Box<dyn FnOnce(Rows) -> MapperResult<T> + Send>;

/// Execution stages, as they appear in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Pending,
    AwaitingTableReady,
    AwaitingBeforeHook,
    CacheCheck,
    Executing,
    AwaitingAfterHook,
    Resolved,
    Rejected,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Pending => "pending",
            Stage::AwaitingTableReady => "awaiting-table-ready",
            Stage::AwaitingBeforeHook => "awaiting-before-hook",
            Stage::CacheCheck => "cache-check",
            Stage::Executing => "executing",
            Stage::AwaitingAfterHook => "awaiting-after-hook",
            Stage::Resolved => "resolved",
            Stage::Rejected => "rejected",
        };
        f.write_str(name)
    }
}

/// A query bound to a mapper, resolved by awaiting it.
pub struct Executor<E: Entity, T> {
    mapper: Mapper<E>,
    query: Query,
    shaper: Shaper<T>,
}

impl<E: Entity, T: Send + 'static> Executor<E, T> {
    pub(crate) fn new<F>(mapper: Mapper<E>, query: Query, shaper: F) -> Self
    where
        F: FnOnce(Rows) -> MapperResult<T> + Send + 'static,
    {
        Self {
            mapper,
            query,
            shaper: Box::new(shaper),
        }
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn mapper(&self) -> &Mapper<E> {
        &self.mapper
    }

    /// Rendered text of the query as built so far.
    pub fn to_sql(&self) -> String {
        self.query.to_sql()
    }

    pub fn to_descriptor(&self) -> MapperResult<Descriptor> {
        descriptor::to_descriptor(&self.query)
    }

    /// Replace the result shaper.
    pub fn data_parser<U, F>(self, shaper: F) -> Executor<E, U>
    where
        U: Send + 'static,
        F: FnOnce(Rows) -> MapperResult<U> + Send + 'static,
    {
        Executor::new(self.mapper, self.query, shaper)
    }

    async fn run(self) -> MapperResult<T> {
        let Executor {
            mapper,
            query,
            shaper,
        } = self;
        let key = query.to_sql();
        trace(&mapper, Stage::Pending, &key);

        let result = async {
            trace(&mapper, Stage::AwaitingTableReady, &key);
            mapper.table_ready().await?;

            trace(&mapper, Stage::AwaitingBeforeHook, &key);
            mapper.entity().before_query(&query).await?;

            let cache = mapper.entity().cache();
            let mut cached = None;
            if let Some(cache) = &cache {
                trace(&mapper, Stage::CacheCheck, &key);
                if query.is_read() {
                    cached = cache.get(&key).await;
                    tracing::debug!(
                        "cache {} on '{}'",
                        if cached.is_some() { "hit" } else { "miss" },
                        mapper.name()
                    );
                } else {
                    mapper.entity().clear_cache();
                }
            }

            let served_from_cache = cached.is_some();
            let rows = match cached {
                Some(rows) => rows,
                None => {
                    trace(&mapper, Stage::Executing, &key);
                    dispatch(&mapper, &query).await?
                }
            };

            trace(&mapper, Stage::AwaitingAfterHook, &key);
            let raw = match &cache {
                Some(_) if query.is_read() && !served_from_cache && !rows.is_empty() => {
                    Some(rows.clone())
                }
                _ => None,
            };
            let rows = mapper.entity().after_query(rows).await?;
            if let (Some(cache), Some(raw)) = (&cache, raw) {
                cache.set(&key, raw);
            }

            shaper(rows)
        }
        .await;

        match &result {
            Ok(_) => trace(&mapper, Stage::Resolved, &key),
            Err(e) => {
                tracing::debug!("[{}] {} rejected: {}", mapper.name(), Stage::Rejected, e);
            }
        }
        result
    }
}

async fn dispatch<E: Entity>(mapper: &Mapper<E>, query: &Query) -> MapperResult<Rows> {
    match mapper.context() {
        ExecutionContext::Server(store) => {
            let compiled = query.compile();
            if query.single.debug {
                tracing::info!(
                    "[{}] {} {:?}",
                    mapper.name(),
                    compiled.sql,
                    compiled.bindings
                );
            }
            store.execute(&compiled).await
        }
        ExecutionContext::Client(transport) => {
            let request = QueryRequest {
                mapper_name: mapper.name().to_string(),
                query_descriptor: descriptor::to_descriptor(query)?,
            };
            transport
                .request(QUERY_EVENT, request)
                .await
                .inspect_err(|e| tracing::warn!("remote query on '{}' failed: {}", mapper.name(), e))
        }
    }
}

fn trace<E: Entity>(mapper: &Mapper<E>, stage: Stage, key: &str) {
    tracing::debug!("[{}] {}: {}", mapper.name(), stage, key);
}

impl<E: Entity, T> QueryExt for Executor<E, T> {
    fn query_mut(&mut self) -> &mut Query {
        &mut self.query
    }
}

impl<E: Entity, T: Send + 'static> IntoFuture for Executor<E, T> {
    type Output = MapperResult<T>;
    type IntoFuture = BoxFuture<'static, MapperResult<T>>;

    fn into_future(self) -> Self::IntoFuture {
        self.run().boxed()
    }
}

impl<E: Entity, T> fmt::Debug for Executor<E, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("mapper", &self.mapper.name())
            .field("query", &self.query)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names() {
        assert_eq!(Stage::AwaitingTableReady.to_string(), "awaiting-table-ready");
        assert_eq!(Stage::CacheCheck.to_string(), "cache-check");
    }
}
