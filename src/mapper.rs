//! Entity mappers.
//!
//! An [`Entity`] describes one backing table: its name, its schema hooks,
//! query hooks, cache and result shaping. A [`Mapper`] binds an entity to an
//! [`ExecutionContext`] and hands out [`Executor`]s scoped to the table.
//!
//! ```ignore
//! struct Items;
//!
//! #[async_trait]
//! impl Entity for Items {
//!     type Model = Item;
//!
//!     fn table_name(&self) -> Option<&str> {
//!         Some("items")
//!     }
//!
//!     fn add_columns(&self, table: &mut TableBuilder) {
//!         table.increments("id");
//!         table.string("name").not_nullable();
//!     }
//! }
//!
//! let items = Mapper::new(Items, ExecutionContext::server(store))?;
//! let adults = items.find().where_op("age", Operator::Gte, 18).await?;
//! ```

use async_trait::async_trait;
use futures::future::{self, BoxFuture, FutureExt, Shared};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::cache::CacheEngine;
use crate::context::ExecutionContext;
use crate::descriptor::{self, Descriptor};
use crate::error::{MapperError, MapperResult};
use crate::executor::Executor;
use crate::peer::RemoteTarget;
use crate::query::{Callable, Query, QueryExt, Record, TransformRegistry, Value};
use crate::store::{Rows, Store, TableBuilder};
use crate::validator::{DefaultValidator, QueryValidator};

/// Schema, hooks and shaping for one table.
///
/// Every method has a default; an entity normally overrides
/// [`Entity::table_name`] and [`Entity::add_columns`] and leaves the rest.
#[async_trait]
pub trait Entity: Send + Sync + 'static {
    /// Shape of one row.
    type Model: DeserializeOwned + Send + 'static;

    /// Backing table. A mapper cannot be built without one.
    fn table_name(&self) -> Option<&str> {
        None
    }

    /// Logical name a remote peer knows this mapper by. Defaults to the
    /// table name.
    fn mapper_name(&self) -> Option<&str> {
        None
    }

    fn primary_key(&self) -> &str {
        "id"
    }

    /// When false, a missing table fails the table-ready check instead of
    /// being created.
    fn create_missing_table(&self) -> bool {
        true
    }

    fn before_create_table(&self, _table: &mut TableBuilder) {}

    fn add_columns(&self, _table: &mut TableBuilder) {}

    /// Runs before every execution; an error aborts it.
    async fn before_query(&self, _query: &Query) -> MapperResult<()> {
        Ok(())
    }

    /// Runs on the raw rows of every execution; an error aborts it.
    async fn after_query(&self, rows: Rows) -> MapperResult<Rows> {
        Ok(rows)
    }

    fn cache(&self) -> Option<Arc<dyn CacheEngine>> {
        None
    }

    /// Invalidate cached reads; called before any mutation when a cache is
    /// configured.
    fn clear_cache(&self) {
        if let Some(cache) = self.cache() {
            cache.clear();
        }
    }

    /// Replaces [`DefaultValidator`] for replayed queries.
    fn validator(&self) -> Option<&dyn QueryValidator> {
        None
    }

    /// Transforms remote descriptors may reference.
    fn transforms(&self) -> TransformRegistry {
        TransformRegistry::new()
    }

    fn parse_as_model(&self, rows: Rows) -> MapperResult<Option<Self::Model>> {
        rows.into_iter()
            .next()
            .map(|row| serde_json::from_value(serde_json::Value::Object(row)))
            .transpose()
            .map_err(MapperError::from)
    }

    fn parse_as_collection(&self, rows: Rows) -> MapperResult<Vec<Self::Model>> {
        rows.into_iter()
            .map(|row| serde_json::from_value(serde_json::Value::Object(row)))
            .collect::<Result<Vec<_>, _>>()
            .map_err(MapperError::from)
    }
}

/// Notifications emitted by a mapper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapperEvent {
    TableCreated { table: String },
}

type TableGate = Shared<BoxFuture<'static, MapperResult<()>>>;

struct MapperInner<E: Entity> {
    entity: Arc<E>,
    table: String,
    name: String,
    context: ExecutionContext,
    transforms: TransformRegistry,
    table_ready: TableGate,
    events: broadcast::Sender<MapperEvent>,
}

/// An entity bound to an execution context. Cheap to clone.
pub struct Mapper<E: Entity> {
    inner: Arc<MapperInner<E>>,
}

impl<E: Entity> Clone for Mapper<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: Entity> fmt::Debug for Mapper<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mapper")
            .field("name", &self.inner.name)
            .field("table", &self.inner.table)
            .field("context", &self.inner.context)
            .finish()
    }
}

impl<E: Entity> Mapper<E> {
    /// Bind `entity` to `context` and start the table-ready check.
    ///
    /// In a server context the check runs once per mapper: it creates the
    /// table when missing and then emits [`MapperEvent::TableCreated`]. It is
    /// spawned right away when a tokio runtime is running, otherwise it runs
    /// on the first execution. In a client context the check succeeds
    /// immediately.
    pub fn new(entity: E, context: ExecutionContext) -> MapperResult<Self> {
        let table = entity
            .table_name()
            .filter(|t| !t.is_empty())
            .ok_or(MapperError::TableNameMissing)?
            .to_string();
        let name = entity.mapper_name().unwrap_or(&table).to_string();
        let transforms = entity.transforms();
        let entity = Arc::new(entity);
        let (events, _) = broadcast::channel(16);

        let table_ready: TableGate = match &context {
            ExecutionContext::Client(_) => future::ready(Ok(())).boxed().shared(),
            ExecutionContext::Server(store) => ensure_table(
                Arc::clone(&entity),
                Arc::clone(store),
                table.clone(),
                events.clone(),
            )
            .boxed()
            .shared(),
        };

        if context.is_server() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                let gate = table_ready.clone();
                let table = table.clone();
                handle.spawn(async move {
                    if let Err(e) = gate.await {
                        tracing::warn!("table check for '{}' failed: {}", table, e);
                    }
                });
            }
        }

        tracing::debug!("mapper '{}' bound to table '{}' ({:?})", name, table, context);

        Ok(Self {
            inner: Arc::new(MapperInner {
                entity,
                table,
                name,
                context,
                transforms,
                table_ready,
                events,
            }),
        })
    }

    pub fn entity(&self) -> &E {
        &self.inner.entity
    }

    pub fn table(&self) -> &str {
        &self.inner.table
    }

    /// Logical name used on the wire.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.inner.context
    }

    /// Resolves once the backing table is known to exist.
    pub async fn table_ready(&self) -> MapperResult<()> {
        self.inner.table_ready.clone().await
    }

    /// Receive events emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<MapperEvent> {
        self.inner.events.subscribe()
    }

    /// A registered transform, for use with `where_group` or `modify`.
    pub fn callable(&self, name: &str) -> Option<Callable> {
        self.inner.transforms.callable(name)
    }

    /// Raw rows.
    pub fn query(&self) -> Executor<E, Rows> {
        Executor::new(self.clone(), Query::table(self.table()), Ok)
    }

    /// Rows shaped as a collection of models.
    pub fn find(&self) -> Executor<E, Vec<E::Model>> {
        let entity = Arc::clone(&self.inner.entity);
        self.query()
            .data_parser(move |rows| entity.parse_as_collection(rows))
    }

    /// First row shaped as a model.
    pub fn find_one(&self) -> Executor<E, Option<E::Model>> {
        let entity = Arc::clone(&self.inner.entity);
        self.query()
            .first()
            .data_parser(move |rows| entity.parse_as_model(rows))
    }

    /// Insert one record and return it as stored.
    pub async fn insert<D: Serialize>(&self, data: &D) -> MapperResult<E::Model> {
        let record = to_record(data)?;
        let entity = Arc::clone(&self.inner.entity);
        self.query()
            .insert(vec![record])
            .returning(["*"])
            .data_parser(move |rows| {
                entity
                    .parse_as_model(rows)?
                    .ok_or_else(|| MapperError::Decode("insert returned no row".to_string()))
            })
            .await
    }

    /// Update the record identified by its primary key and return it.
    pub async fn update<D: Serialize>(&self, data: &D) -> MapperResult<E::Model> {
        let mut record = to_record(data)?;
        let pk = self.entity().primary_key().to_string();
        let id = record.remove(&pk).filter(|v| *v != Value::Null).ok_or_else(|| {
            MapperError::Descriptor(format!("update requires primary key '{}'", pk))
        })?;
        let entity = Arc::clone(&self.inner.entity);
        self.query()
            .update(record)
            .where_eq(pk, id)
            .returning(["*"])
            .data_parser(move |rows| {
                entity
                    .parse_as_model(rows)?
                    .ok_or_else(|| MapperError::Decode("update matched no row".to_string()))
            })
            .await
    }

    /// An executor for a descriptor built elsewhere, such as one saved to a
    /// file. Unlike [`Mapper::from_descriptor`] it runs the whole pipeline:
    /// hooks, cache and, in a client context, forwarding to the peer.
    pub fn query_from(&self, descriptor: Descriptor) -> MapperResult<Executor<E, Rows>> {
        let query = descriptor::from_descriptor(
            descriptor,
            Query::table(self.table()),
            &self.inner.transforms,
        )?;
        Ok(Executor::new(self.clone(), query, Ok))
    }

    /// Replay a descriptor received from a client and run it on the store.
    ///
    /// The replayed query is validated against this mapper's table first; a
    /// rejected query never reaches the store. Hooks and cache belong to the
    /// sending side and are not applied here.
    pub async fn from_descriptor(&self, descriptor: Descriptor) -> MapperResult<Rows> {
        let store = self
            .inner
            .context
            .store()
            .ok_or(MapperError::UnsupportedContext("server"))?;
        self.table_ready().await?;

        let query = descriptor::from_descriptor(
            descriptor,
            Query::table(self.table()),
            &self.inner.transforms,
        )?;
        let rendered = query.to_sql();

        let default = DefaultValidator;
        let validator = self.entity().validator().unwrap_or(&default);
        if !validator.validate(&rendered, self.table()) {
            tracing::warn!("rejected replayed query on '{}': {}", self.name(), rendered);
            return Err(MapperError::rejected(rendered));
        }

        tracing::debug!("replaying on '{}': {}", self.name(), rendered);
        store.execute(&query.compile()).await
    }
}

#[async_trait]
impl<E: Entity> RemoteTarget for Mapper<E> {
    fn name(&self) -> &str {
        Mapper::name(self)
    }

    async fn execute_descriptor(&self, descriptor: Descriptor) -> MapperResult<Rows> {
        self.from_descriptor(descriptor).await
    }
}

async fn ensure_table<E: Entity>(
    entity: Arc<E>,
    store: Arc<dyn Store>,
    table: String,
    events: broadcast::Sender<MapperEvent>,
) -> MapperResult<()> {
    if store.has_table(&table).await? {
        tracing::debug!("table '{}' exists", table);
        return Ok(());
    }
    if !entity.create_missing_table() {
        return Err(MapperError::Database(format!("table '{}' does not exist", table)));
    }

    let mut builder = TableBuilder::new(table.as_str());
    entity.before_create_table(&mut builder);
    entity.add_columns(&mut builder);
    store.create_table(&builder).await?;
    tracing::info!("created table '{}'", table);

    let _ = events.send(MapperEvent::TableCreated { table });
    Ok(())
}

/// Flatten a serializable value into an insert/update record. Nested
/// objects and arrays become [`Value::Json`].
fn to_record<D: Serialize>(data: &D) -> MapperResult<Record> {
    let serde_json::Value::Object(fields) = serde_json::to_value(data)? else {
        return Err(MapperError::Descriptor(
            "record data must serialize to an object".to_string(),
        ));
    };
    fields
        .into_iter()
        .map(|(key, value)| Ok((key, Value::try_from(value)?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Item {
        id: i64,
        name: String,
    }

    struct Items;

    #[async_trait]
    impl Entity for Items {
        type Model = Item;
    }

    #[test]
    fn test_default_shaping() {
        let rows: Rows = vec![
            json!({"id": 1, "name": "a"}).as_object().cloned().unwrap(),
            json!({"id": 2, "name": "b"}).as_object().cloned().unwrap(),
        ];
        let one = Items.parse_as_model(rows.clone()).unwrap();
        assert_eq!(one, Some(Item { id: 1, name: "a".into() }));
        assert_eq!(Items.parse_as_collection(rows).unwrap().len(), 2);
        assert_eq!(Items.parse_as_model(Vec::new()).unwrap(), None);
    }

    #[test]
    fn test_shaping_mismatch_is_decode_error() {
        let rows: Rows = vec![json!({"id": "x"}).as_object().cloned().unwrap()];
        assert!(matches!(
            Items.parse_as_collection(rows),
            Err(MapperError::Decode(_))
        ));
    }

    #[test]
    fn test_to_record() {
        let record = to_record(&json!({"name": "a", "tags": ["x"], "age": 3})).unwrap();
        assert_eq!(record["name"], Value::String("a".into()));
        assert_eq!(record["tags"], Value::Json(json!(["x"])));
        assert_eq!(record["age"], Value::Int(3));
        assert!(to_record(&json!([1, 2])).is_err());
    }
}
