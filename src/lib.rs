//! # isomapper — build a query once, run it anywhere
//!
//! A data mapper for applications that run the same code on a server and on
//! a client. A fluent query is described once; on the server it runs
//! against the store, on the client it is shipped as a plain JSON
//! descriptor to a remote peer that replays it, checks it against a
//! read-only allow-list and returns the rows.
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use isomapper::prelude::*;
//!
//! let store = ConnectionRegistry::global().connection(&config.store)?;
//! let items = Mapper::new(Items, ExecutionContext::server(store))?;
//!
//! let rows = items
//!     .query()
//!     .select(["id", "name"])
//!     .where_op("age", Operator::Gt, 10)
//!     .await?;
//! ```
//!
//! ## Pieces
//!
//! | Module       | Role                                          |
//! |--------------|-----------------------------------------------|
//! | `query`      | Builder state, fluent clauses, SQL rendering  |
//! | `descriptor` | JSON snapshot of builder state                |
//! | `validator`  | Allow-list for replayed queries               |
//! | `cache`      | Read-through cache keyed by rendered text     |
//! | `executor`   | Server/client execution pipeline              |
//! | `mapper`     | Entities, table bootstrap, hooks              |
//! | `peer`       | Answers forwarded queries                     |

pub mod cache;
pub mod config;
pub mod context;
pub mod descriptor;
pub mod error;
pub mod executor;
pub mod mapper;
pub mod peer;
pub mod query;
pub mod server;
pub mod store;
pub mod transport;
pub mod validator;

pub mod prelude {
    pub use crate::cache::{CacheConfig, CacheEngine, QueryCache};
    pub use crate::config::MapperConfig;
    pub use crate::context::ExecutionContext;
    pub use crate::descriptor::{Descriptor, from_descriptor, to_descriptor};
    pub use crate::error::*;
    pub use crate::executor::Executor;
    pub use crate::mapper::{Entity, Mapper, MapperEvent};
    pub use crate::peer::{RemotePeer, RemoteTarget};
    pub use crate::query::{
        Callable, Direction, Operator, Query, QueryExt, Record, TransformRegistry, Value,
    };
    pub use crate::store::{ConnectionRegistry, PgStore, Row, Rows, Store, TableBuilder};
    pub use crate::transport::{ChannelTransport, Transport, WsTransport};
    pub use crate::validator::{DefaultValidator, QueryValidator};
}

/// Render `descriptor` replayed onto an empty query for `table`.
///
/// Callables are compiled against `transforms`.
///
/// # Example
///
/// ```
/// use isomapper::query::{Operator, Query, QueryExt, TransformRegistry};
///
/// let query = Query::table("items").where_op("age", Operator::Gt, 10);
/// let descriptor = isomapper::descriptor::to_descriptor(&query).unwrap();
/// let sql = isomapper::render(descriptor, "items", &TransformRegistry::new()).unwrap();
/// assert_eq!(sql, r#"select * from "items" where "age" > 10"#);
/// ```
pub fn render(
    descriptor: descriptor::Descriptor,
    table: &str,
    transforms: &query::TransformRegistry,
) -> error::MapperResult<String> {
    let query = descriptor::from_descriptor(descriptor, query::Query::table(table), transforms)?;
    Ok(query.to_sql())
}
