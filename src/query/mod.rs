//! Fluent query builder state.
//!
//! A [`Query`] accumulates clauses for one table. Its serialized field names
//! carry the reserved `_` marker so the state can be shipped as a
//! [`Descriptor`](crate::descriptor::Descriptor) and merged back into a fresh
//! builder on the other side.
//!
//! The fluent surface lives on [`QueryExt`], which is implemented both for
//! `Query` itself and for [`Executor`](crate::executor::Executor), so every
//! clause method is available on an executor returned by a mapper.

pub mod callable;
pub mod render;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{MapperError, MapperResult};

pub use callable::{Callable, FunctionCompiler, TransformFn, TransformRegistry};
pub use render::CompiledQuery;

/// Prefix shared by every serialized builder-state field.
pub const STATE_MARKER: char = '_';

/// A single column/value record used by inserts and updates.
pub type Record = BTreeMap<String, Value>;

/// A scalar value inside a clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "serde_json::Value", into = "serde_json::Value")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// An object or array, stored in `json`/`jsonb` columns.
    Json(serde_json::Value),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Value::Json(v) => write!(f, "'{}'", v.to_string().replace('\'', "''")),
        }
    }
}

impl TryFrom<serde_json::Value> for Value {
    type Error = MapperError;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        match value {
            serde_json::Value::Null => Ok(Value::Null),
            serde_json::Value::Bool(b) => Ok(Value::Bool(b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::Int(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(Value::Float(f))
                } else {
                    Err(MapperError::Descriptor(format!("number out of range: {}", n)))
                }
            }
            serde_json::Value::String(s) => Ok(Value::String(s)),
            nested @ (serde_json::Value::Object(_) | serde_json::Value::Array(_)) => {
                Ok(Value::Json(nested))
            }
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Int(n) => serde_json::Value::Number(n.into()),
            Value::Float(n) => serde_json::Number::from_f64(n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s),
            Value::Json(v) => v,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n as i64)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Int(n as i64)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "<>")]
    Ne,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = "like")]
    Like,
    #[serde(rename = "ilike")]
    ILike,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "<>",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::Like => "like",
            Operator::ILike => "ilike",
        }
    }
}

impl FromStr for Operator {
    type Err = MapperError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "=" => Ok(Operator::Eq),
            "<>" | "!=" => Ok(Operator::Ne),
            ">" => Ok(Operator::Gt),
            ">=" => Ok(Operator::Gte),
            "<" => Ok(Operator::Lt),
            "<=" => Ok(Operator::Lte),
            "like" => Ok(Operator::Like),
            "ilike" => Ok(Operator::ILike),
            other => Err(MapperError::Descriptor(format!("invalid operator: '{}'", other))),
        }
    }
}

/// How a predicate attaches to the ones before it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoolOp {
    #[default]
    And,
    Or,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinKind {
    Inner,
    Left,
    LeftOuter,
    Right,
    RightOuter,
    Outer,
    FullOuter,
    Cross,
    /// The table field holds a complete raw join clause.
    Raw,
}

impl JoinKind {
    pub fn keyword(&self) -> &'static str {
        match self {
            JoinKind::Inner => "inner join",
            JoinKind::Left => "left join",
            JoinKind::LeftOuter => "left outer join",
            JoinKind::Right => "right join",
            JoinKind::RightOuter => "right outer join",
            JoinKind::Outer => "outer join",
            JoinKind::FullOuter => "full outer join",
            JoinKind::Cross => "cross join",
            JoinKind::Raw => "",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateFn {
    Count,
    Min,
    Max,
    Sum,
}

impl AggregateFn {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateFn::Count => "count",
            AggregateFn::Min => "min",
            AggregateFn::Max => "max",
            AggregateFn::Sum => "sum",
        }
    }
}

/// Row locking clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Lock {
    ForUpdate,
    ForShare,
}

/// The statement kind the query renders to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    #[default]
    Select,
    First,
    Pluck,
    Insert,
    Update,
    Del,
    Truncate,
}

impl Method {
    /// Reads are cacheable; everything else invalidates.
    pub fn is_read(&self) -> bool {
        matches!(self, Method::Select | Method::First | Method::Pluck)
    }
}

/// `column = column + amount` for increment/decrement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Counter {
    pub column: String,
    pub amount: Value,
    pub decrement: bool,
}

/// Single-valued clauses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Single {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pluck: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub insert: Vec<Record>,
    #[serde(default, skip_serializing_if = "Record::is_empty")]
    pub update: Record,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counter: Option<Counter>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub returning: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock: Option<Lock>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub debug: bool,
}

/// A filter predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Predicate {
    Basic {
        column: String,
        operator: Operator,
        value: Value,
    },
    In {
        column: String,
        values: Vec<Value>,
    },
    Null {
        column: String,
    },
    Between {
        column: String,
        low: Value,
        high: Value,
    },
    Raw {
        sql: String,
        #[serde(default)]
        bindings: Vec<Value>,
    },
    Exists {
        query: Box<Query>,
    },
    /// A parenthesized group produced by running a transform on an empty query.
    Wrapped {
        callback: Callable,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhereClause {
    pub predicate: Predicate,
    #[serde(rename = "bool", default)]
    pub connective: BoolOp,
    #[serde(default)]
    pub not: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinOn {
    pub first: String,
    pub operator: Operator,
    pub second: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinClause {
    pub kind: JoinKind,
    pub table: String,
    #[serde(default)]
    pub on: Option<JoinOn>,
}

/// Multi-valued clauses, kept in insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "grouping", rename_all = "lowercase")]
pub enum Statement {
    Columns {
        value: Vec<String>,
        #[serde(default)]
        distinct: bool,
    },
    Aggregate {
        function: AggregateFn,
        column: String,
    },
    Where(WhereClause),
    Join(JoinClause),
    Group {
        value: Vec<String>,
        #[serde(default)]
        raw: bool,
    },
    Order {
        value: String,
        #[serde(default)]
        direction: Direction,
        #[serde(default)]
        raw: bool,
    },
    Having(WhereClause),
    Union {
        query: Box<Query>,
        #[serde(default)]
        all: bool,
    },
}

/// The accumulated state of a fluent query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    #[serde(rename = "_method", default)]
    pub method: Method,
    #[serde(rename = "_single", default)]
    pub single: Single,
    #[serde(rename = "_statements", default)]
    pub statements: Vec<Statement>,
}

impl Query {
    /// Start a query bound to `table`.
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            single: Single {
                table: Some(table.into()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Target table, if any.
    pub fn table_name(&self) -> Option<&str> {
        self.single.table.as_deref()
    }

    pub fn is_read(&self) -> bool {
        self.method.is_read()
    }

    /// Where clauses in order.
    pub fn wheres(&self) -> impl Iterator<Item = &WhereClause> {
        self.statements.iter().filter_map(|s| match s {
            Statement::Where(clause) => Some(clause),
            _ => None,
        })
    }

    /// Rewrite the query in place with fluent methods; used inside transforms.
    pub fn edit(&mut self, f: impl FnOnce(Query) -> Query) {
        let query = std::mem::take(self);
        *self = f(query);
    }

    /// Bind every callable in this query (and nested queries) through `compiler`.
    pub fn compile_callables(&mut self, compiler: &dyn FunctionCompiler) -> MapperResult<()> {
        for statement in &mut self.statements {
            match statement {
                Statement::Where(clause) | Statement::Having(clause) => match &mut clause.predicate {
                    Predicate::Wrapped { callback } => callback.compile(compiler)?,
                    Predicate::Exists { query } => query.compile_callables(compiler)?,
                    _ => {}
                },
                Statement::Union { query, .. } => query.compile_callables(compiler)?,
                _ => {}
            }
        }
        Ok(())
    }

    fn push_where(&mut self, predicate: Predicate, connective: BoolOp, not: bool) {
        self.statements.push(Statement::Where(WhereClause {
            predicate,
            connective,
            not,
        }));
    }

    fn push_join(&mut self, kind: JoinKind, table: String, on: Option<JoinOn>) {
        self.statements
            .push(Statement::Join(JoinClause { kind, table, on }));
    }
}

fn strings<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}

fn join_on(first: impl Into<String>, second: impl Into<String>) -> Option<JoinOn> {
    Some(JoinOn {
        first: first.into(),
        operator: Operator::Eq,
        second: second.into(),
    })
}

/// Fluent clause methods shared by [`Query`] and executors.
///
/// # Example
/// ```
/// use isomapper::query::{Operator, Query, QueryExt};
///
/// let query = Query::table("items")
///     .select(["id", "name"])
///     .where_op("age", Operator::Gt, 10);
/// assert_eq!(query.to_sql(), r#"select "id", "name" from "items" where "age" > 10"#);
/// ```
pub trait QueryExt: Sized {
    /// Mutable access to the builder state.
    fn query_mut(&mut self) -> &mut Query;

    /// Add result columns. The statement kind is left alone, so `first` and
    /// `pluck` survive a later `select`.
    fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let value = strings(columns);
        if !value.is_empty() {
            self.query_mut().statements.push(Statement::Columns {
                value,
                distinct: false,
            });
        }
        self
    }

    fn column(mut self, column: impl Into<String>) -> Self {
        self.query_mut().statements.push(Statement::Columns {
            value: vec![column.into()],
            distinct: false,
        });
        self
    }

    /// `"column" as "alias"`
    fn column_as(self, column: impl Into<String>, alias: impl Into<String>) -> Self {
        let column = format!("{} as {}", column.into(), alias.into());
        self.column(column)
    }

    fn distinct<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.query_mut().statements.push(Statement::Columns {
            value: strings(columns),
            distinct: true,
        });
        self
    }

    fn from(mut self, table: impl Into<String>) -> Self {
        self.query_mut().single.table = Some(table.into());
        self
    }

    fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.query_mut().single.schema = Some(schema.into());
        self
    }

    fn where_eq(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.where_op(column, Operator::Eq, value)
    }

    fn where_op(mut self, column: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        self.query_mut().push_where(
            Predicate::Basic {
                column: column.into(),
                operator,
                value: value.into(),
            },
            BoolOp::And,
            false,
        );
        self
    }

    fn and_where(self, column: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        self.where_op(column, operator, value)
    }

    fn or_where(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.or_where_op(column, Operator::Eq, value)
    }

    fn or_where_op(mut self, column: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        self.query_mut().push_where(
            Predicate::Basic {
                column: column.into(),
                operator,
                value: value.into(),
            },
            BoolOp::Or,
            false,
        );
        self
    }

    fn where_not(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.query_mut().push_where(
            Predicate::Basic {
                column: column.into(),
                operator: Operator::Eq,
                value: value.into(),
            },
            BoolOp::And,
            true,
        );
        self
    }

    fn where_in<I, V>(mut self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.query_mut().push_where(
            Predicate::In {
                column: column.into(),
                values,
            },
            BoolOp::And,
            false,
        );
        self
    }

    fn where_not_in<I, V>(mut self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.query_mut().push_where(
            Predicate::In {
                column: column.into(),
                values,
            },
            BoolOp::And,
            true,
        );
        self
    }

    fn where_null(mut self, column: impl Into<String>) -> Self {
        self.query_mut()
            .push_where(Predicate::Null { column: column.into() }, BoolOp::And, false);
        self
    }

    fn where_not_null(mut self, column: impl Into<String>) -> Self {
        self.query_mut()
            .push_where(Predicate::Null { column: column.into() }, BoolOp::And, true);
        self
    }

    fn where_exists(mut self, query: Query) -> Self {
        self.query_mut().push_where(
            Predicate::Exists {
                query: Box::new(query),
            },
            BoolOp::And,
            false,
        );
        self
    }

    fn where_not_exists(mut self, query: Query) -> Self {
        self.query_mut().push_where(
            Predicate::Exists {
                query: Box::new(query),
            },
            BoolOp::And,
            true,
        );
        self
    }

    fn where_between(
        mut self,
        column: impl Into<String>,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        self.query_mut().push_where(
            Predicate::Between {
                column: column.into(),
                low: low.into(),
                high: high.into(),
            },
            BoolOp::And,
            false,
        );
        self
    }

    fn where_not_between(
        mut self,
        column: impl Into<String>,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        self.query_mut().push_where(
            Predicate::Between {
                column: column.into(),
                low: low.into(),
                high: high.into(),
            },
            BoolOp::And,
            true,
        );
        self
    }

    /// Raw predicate; `?` placeholders take `bindings` in order.
    fn where_raw(mut self, sql: impl Into<String>, bindings: Vec<Value>) -> Self {
        self.query_mut().push_where(
            Predicate::Raw {
                sql: sql.into(),
                bindings,
            },
            BoolOp::And,
            false,
        );
        self
    }

    fn where_group(mut self, callback: Callable) -> Self {
        self.query_mut()
            .push_where(Predicate::Wrapped { callback }, BoolOp::And, false);
        self
    }

    fn or_where_group(mut self, callback: Callable) -> Self {
        self.query_mut()
            .push_where(Predicate::Wrapped { callback }, BoolOp::Or, false);
        self
    }

    fn inner_join(mut self, table: impl Into<String>, first: impl Into<String>, second: impl Into<String>) -> Self {
        self.query_mut()
            .push_join(JoinKind::Inner, table.into(), join_on(first, second));
        self
    }

    fn left_join(mut self, table: impl Into<String>, first: impl Into<String>, second: impl Into<String>) -> Self {
        self.query_mut()
            .push_join(JoinKind::Left, table.into(), join_on(first, second));
        self
    }

    fn left_outer_join(mut self, table: impl Into<String>, first: impl Into<String>, second: impl Into<String>) -> Self {
        self.query_mut()
            .push_join(JoinKind::LeftOuter, table.into(), join_on(first, second));
        self
    }

    fn right_join(mut self, table: impl Into<String>, first: impl Into<String>, second: impl Into<String>) -> Self {
        self.query_mut()
            .push_join(JoinKind::Right, table.into(), join_on(first, second));
        self
    }

    fn right_outer_join(mut self, table: impl Into<String>, first: impl Into<String>, second: impl Into<String>) -> Self {
        self.query_mut()
            .push_join(JoinKind::RightOuter, table.into(), join_on(first, second));
        self
    }

    fn outer_join(mut self, table: impl Into<String>, first: impl Into<String>, second: impl Into<String>) -> Self {
        self.query_mut()
            .push_join(JoinKind::Outer, table.into(), join_on(first, second));
        self
    }

    fn full_outer_join(mut self, table: impl Into<String>, first: impl Into<String>, second: impl Into<String>) -> Self {
        self.query_mut()
            .push_join(JoinKind::FullOuter, table.into(), join_on(first, second));
        self
    }

    fn cross_join(mut self, table: impl Into<String>) -> Self {
        self.query_mut().push_join(JoinKind::Cross, table.into(), None);
        self
    }

    fn join_raw(mut self, sql: impl Into<String>) -> Self {
        self.query_mut().push_join(JoinKind::Raw, sql.into(), None);
        self
    }

    fn group_by<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.query_mut().statements.push(Statement::Group {
            value: strings(columns),
            raw: false,
        });
        self
    }

    fn group_by_raw(mut self, sql: impl Into<String>) -> Self {
        self.query_mut().statements.push(Statement::Group {
            value: vec![sql.into()],
            raw: true,
        });
        self
    }

    fn order_by(mut self, column: impl Into<String>, direction: Direction) -> Self {
        self.query_mut().statements.push(Statement::Order {
            value: column.into(),
            direction,
            raw: false,
        });
        self
    }

    fn order_by_raw(mut self, sql: impl Into<String>) -> Self {
        self.query_mut().statements.push(Statement::Order {
            value: sql.into(),
            direction: Direction::Asc,
            raw: true,
        });
        self
    }

    fn having(mut self, column: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        self.query_mut().statements.push(Statement::Having(WhereClause {
            predicate: Predicate::Basic {
                column: column.into(),
                operator,
                value: value.into(),
            },
            connective: BoolOp::And,
            not: false,
        }));
        self
    }

    fn offset(mut self, offset: u64) -> Self {
        self.query_mut().single.offset = Some(offset);
        self
    }

    fn limit(mut self, limit: u64) -> Self {
        self.query_mut().single.limit = Some(limit);
        self
    }

    fn union(mut self, query: Query) -> Self {
        self.query_mut().statements.push(Statement::Union {
            query: Box::new(query),
            all: false,
        });
        self
    }

    fn union_all(mut self, query: Query) -> Self {
        self.query_mut().statements.push(Statement::Union {
            query: Box::new(query),
            all: true,
        });
        self
    }

    fn insert<I>(mut self, rows: I) -> Self
    where
        I: IntoIterator<Item = Record>,
    {
        let query = self.query_mut();
        query.method = Method::Insert;
        query.single.insert = rows.into_iter().collect();
        self
    }

    fn returning<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.query_mut().single.returning = strings(columns);
        self
    }

    fn update(mut self, values: Record) -> Self {
        let query = self.query_mut();
        query.method = Method::Update;
        query.single.update = values;
        self
    }

    fn del(mut self) -> Self {
        self.query_mut().method = Method::Del;
        self
    }

    fn truncate(mut self) -> Self {
        self.query_mut().method = Method::Truncate;
        self
    }

    fn increment(mut self, column: impl Into<String>, amount: impl Into<Value>) -> Self {
        let query = self.query_mut();
        query.method = Method::Update;
        query.single.counter = Some(Counter {
            column: column.into(),
            amount: amount.into(),
            decrement: false,
        });
        self
    }

    fn decrement(mut self, column: impl Into<String>, amount: impl Into<Value>) -> Self {
        let query = self.query_mut();
        query.method = Method::Update;
        query.single.counter = Some(Counter {
            column: column.into(),
            amount: amount.into(),
            decrement: true,
        });
        self
    }

    fn for_update(mut self) -> Self {
        self.query_mut().single.lock = Some(Lock::ForUpdate);
        self
    }

    fn for_share(mut self) -> Self {
        self.query_mut().single.lock = Some(Lock::ForShare);
        self
    }

    fn count(self, column: impl Into<String>) -> Self {
        self.aggregate(AggregateFn::Count, column)
    }

    fn min(self, column: impl Into<String>) -> Self {
        self.aggregate(AggregateFn::Min, column)
    }

    fn max(self, column: impl Into<String>) -> Self {
        self.aggregate(AggregateFn::Max, column)
    }

    fn sum(self, column: impl Into<String>) -> Self {
        self.aggregate(AggregateFn::Sum, column)
    }

    /// Aggregate column; `"col as alias"` names the result.
    fn aggregate(mut self, function: AggregateFn, column: impl Into<String>) -> Self {
        self.query_mut().statements.push(Statement::Aggregate {
            function,
            column: column.into(),
        });
        self
    }

    fn pluck(mut self, column: impl Into<String>) -> Self {
        let query = self.query_mut();
        query.method = Method::Pluck;
        query.single.pluck = Some(column.into());
        self
    }

    fn first(mut self) -> Self {
        self.query_mut().method = Method::First;
        self
    }

    /// Apply a transform to the query right away.
    fn modify(mut self, callback: &Callable) -> Self {
        callback.call(self.query_mut());
        self
    }

    /// Log the compiled SQL of this query when it executes.
    fn debug(mut self, enabled: bool) -> Self {
        self.query_mut().single.debug = enabled;
        self
    }
}

impl QueryExt for Query {
    fn query_mut(&mut self) -> &mut Query {
        self
    }
}
