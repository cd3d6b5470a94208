#![allow(dead_code)]

use async_trait::async_trait;
use isomapper::prelude::*;
use isomapper::query::CompiledQuery;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// In-memory store that records what it was asked to run.
pub struct FixtureStore {
    rows: Rows,
    table_exists: AtomicBool,
    executions: AtomicUsize,
    has_table_calls: AtomicUsize,
    executed: Mutex<Vec<CompiledQuery>>,
    created: Mutex<Vec<String>>,
}

impl FixtureStore {
    pub fn new(rows: Rows) -> Arc<Self> {
        Arc::new(Self {
            rows,
            table_exists: AtomicBool::new(true),
            executions: AtomicUsize::new(0),
            has_table_calls: AtomicUsize::new(0),
            executed: Mutex::new(Vec::new()),
            created: Mutex::new(Vec::new()),
        })
    }

    pub fn empty() -> Arc<Self> {
        Self::new(Vec::new())
    }

    /// A store whose table has to be created first.
    pub fn without_table(rows: Rows) -> Arc<Self> {
        let store = Self::new(rows);
        store.table_exists.store(false, Ordering::SeqCst);
        store
    }

    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }

    pub fn has_table_calls(&self) -> usize {
        self.has_table_calls.load(Ordering::SeqCst)
    }

    pub fn executed_sql(&self) -> Vec<String> {
        self.executed
            .lock()
            .unwrap()
            .iter()
            .map(|q| q.sql.clone())
            .collect()
    }

    pub fn last(&self) -> Option<CompiledQuery> {
        self.executed.lock().unwrap().last().cloned()
    }

    pub fn created(&self) -> Vec<String> {
        self.created.lock().unwrap().clone()
    }
}

#[async_trait]
impl Store for FixtureStore {
    async fn execute(&self, query: &CompiledQuery) -> MapperResult<Rows> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        self.executed.lock().unwrap().push(query.clone());
        Ok(self.rows.clone())
    }

    async fn has_table(&self, _table: &str) -> MapperResult<bool> {
        self.has_table_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.table_exists.load(Ordering::SeqCst))
    }

    async fn create_table(&self, table: &TableBuilder) -> MapperResult<()> {
        self.created.lock().unwrap().push(table.to_sql());
        self.table_exists.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: i64,
    pub name: String,
}

/// Rows for `items`, as the store hands them back.
pub fn item_rows() -> Rows {
    vec![
        row(json!({"id": 1, "name": "anvil"})),
        row(json!({"id": 2, "name": "bucket"})),
        row(json!({"id": 3, "name": "chisel"})),
    ]
}

pub fn row(value: serde_json::Value) -> Row {
    value.as_object().cloned().unwrap()
}

/// `items` entity with an optional cache.
#[derive(Default)]
pub struct Items {
    pub cache: Option<Arc<QueryCache>>,
}

impl Items {
    pub fn cached() -> (Self, Arc<QueryCache>) {
        let cache = Arc::new(QueryCache::default());
        (
            Self {
                cache: Some(Arc::clone(&cache)),
            },
            cache,
        )
    }
}

#[async_trait]
impl Entity for Items {
    type Model = Item;

    fn table_name(&self) -> Option<&str> {
        Some("items")
    }

    fn add_columns(&self, table: &mut TableBuilder) {
        table.increments("id");
        table.string("name").not_nullable();
        table.integer("age");
    }

    fn cache(&self) -> Option<Arc<dyn CacheEngine>> {
        self.cache
            .as_ref()
            .map(|c| Arc::clone(c) as Arc<dyn CacheEngine>)
    }

    fn transforms(&self) -> TransformRegistry {
        TransformRegistry::new().register("adults", |q: &mut Query| {
            q.edit(|q| q.where_op("age", Operator::Gte, 18));
        })
    }
}

/// An entity whose pre-query hook refuses everything.
pub struct Locked {
    pub cache: Arc<QueryCache>,
}

#[async_trait]
impl Entity for Locked {
    type Model = Item;

    fn table_name(&self) -> Option<&str> {
        Some("items")
    }

    async fn before_query(&self, _query: &Query) -> MapperResult<()> {
        Err(MapperError::hook("items are locked"))
    }

    fn cache(&self) -> Option<Arc<dyn CacheEngine>> {
        Some(Arc::clone(&self.cache) as Arc<dyn CacheEngine>)
    }
}

/// An entity without a table.
pub struct Nameless;

#[async_trait]
impl Entity for Nameless {
    type Model = serde_json::Value;
}

pub fn server<E: Entity>(entity: E, store: &Arc<FixtureStore>) -> Mapper<E> {
    Mapper::new(entity, ExecutionContext::server(Arc::clone(store) as Arc<dyn Store>)).unwrap()
}

/// An entity whose post-query hook refuses the rows it is given.
pub struct Audited {
    pub cache: Arc<QueryCache>,
}

#[async_trait]
impl Entity for Audited {
    type Model = Item;

    fn table_name(&self) -> Option<&str> {
        Some("items")
    }

    async fn after_query(&self, _rows: Rows) -> MapperResult<Rows> {
        Err(MapperError::hook("audit failed"))
    }

    fn cache(&self) -> Option<Arc<dyn CacheEngine>> {
        Some(Arc::clone(&self.cache) as Arc<dyn CacheEngine>)
    }
}

/// Accepts any read, joins included.
pub struct ReadAnything;

impl QueryValidator for ReadAnything {
    fn validate(&self, rendered: &str, _table: &str) -> bool {
        rendered.starts_with("select ")
    }
}

/// `items` with its own replay policy.
pub struct OpenItems;

#[async_trait]
impl Entity for OpenItems {
    type Model = Item;

    fn table_name(&self) -> Option<&str> {
        Some("items")
    }

    fn validator(&self) -> Option<&dyn QueryValidator> {
        Some(&ReadAnything)
    }
}

/// `items` that must already exist.
pub struct ExistingItems;

#[async_trait]
impl Entity for ExistingItems {
    type Model = Item;

    fn table_name(&self) -> Option<&str> {
        Some("items")
    }

    fn create_missing_table(&self) -> bool {
        false
    }
}
