//! Store capability and table definitions.

pub mod postgres;
pub mod registry;

use async_trait::async_trait;

use crate::error::MapperResult;
use crate::query::CompiledQuery;

pub use postgres::PgStore;
pub use registry::ConnectionRegistry;

/// One result row, column name to JSON value.
pub type Row = serde_json::Map<String, serde_json::Value>;

pub type Rows = Vec<Row>;

/// The relational engine as the mapper sees it.
#[async_trait]
pub trait Store: Send + Sync {
    /// Run a compiled statement and return its rows (empty for statements
    /// without a result set).
    async fn execute(&self, query: &CompiledQuery) -> MapperResult<Rows>;

    async fn has_table(&self, table: &str) -> MapperResult<bool>;

    async fn create_table(&self, table: &TableBuilder) -> MapperResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Increments,
    BigIncrements,
    String(u32),
    Text,
    Integer,
    BigInteger,
    Float,
    Decimal(u8, u8),
    Boolean,
    Date,
    Timestamp,
    Json,
    Jsonb,
    Uuid,
}

impl ColumnType {
    pub fn sql(&self) -> String {
        match self {
            ColumnType::Increments => "serial".to_string(),
            ColumnType::BigIncrements => "bigserial".to_string(),
            ColumnType::String(len) => format!("varchar({})", len),
            ColumnType::Text => "text".to_string(),
            ColumnType::Integer => "integer".to_string(),
            ColumnType::BigInteger => "bigint".to_string(),
            ColumnType::Float => "real".to_string(),
            ColumnType::Decimal(p, s) => format!("decimal({}, {})", p, s),
            ColumnType::Boolean => "boolean".to_string(),
            ColumnType::Date => "date".to_string(),
            ColumnType::Timestamp => "timestamptz".to_string(),
            ColumnType::Json => "json".to_string(),
            ColumnType::Jsonb => "jsonb".to_string(),
            ColumnType::Uuid => "uuid".to_string(),
        }
    }
}

/// A column definition. Columns are nullable unless marked otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub kind: ColumnType,
    pub nullable: bool,
    pub default: Option<String>,
    pub primary: bool,
    pub unique: bool,
}

impl ColumnDef {
    fn new(name: impl Into<String>, kind: ColumnType) -> Self {
        let primary = matches!(kind, ColumnType::Increments | ColumnType::BigIncrements);
        Self {
            name: name.into(),
            kind,
            nullable: !primary,
            default: None,
            primary,
            unique: false,
        }
    }

    pub fn not_nullable(&mut self) -> &mut Self {
        self.nullable = false;
        self
    }

    /// Default expression, emitted verbatim.
    pub fn default_to(&mut self, expr: impl Into<String>) -> &mut Self {
        self.default = Some(expr.into());
        self
    }

    pub fn primary(&mut self) -> &mut Self {
        self.primary = true;
        self.nullable = false;
        self
    }

    pub fn unique(&mut self) -> &mut Self {
        self.unique = true;
        self
    }

    fn sql(&self) -> String {
        let mut line = format!("{} {}", quote(&self.name), self.kind.sql());
        if !self.nullable && !self.primary {
            line.push_str(" not null");
        }
        if let Some(default) = &self.default {
            line.push_str(" default ");
            line.push_str(default);
        }
        if self.primary {
            line.push_str(" primary key");
        }
        if self.unique {
            line.push_str(" unique");
        }
        line
    }
}

/// Table definition handed to entity hooks before creation.
#[derive(Debug, Clone, PartialEq)]
pub struct TableBuilder {
    name: String,
    schema: Option<String>,
    columns: Vec<ColumnDef>,
    comment: Option<String>,
}

impl TableBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: None,
            columns: Vec::new(),
            comment: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn with_schema(&mut self, schema: impl Into<String>) -> &mut Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn comment(&mut self, text: impl Into<String>) -> &mut Self {
        self.comment = Some(text.into());
        self
    }

    pub fn column(&mut self, name: impl Into<String>, kind: ColumnType) -> &mut ColumnDef {
        self.columns.push(ColumnDef::new(name, kind));
        let last = self.columns.len() - 1;
        &mut self.columns[last]
    }

    pub fn increments(&mut self, name: impl Into<String>) -> &mut ColumnDef {
        self.column(name, ColumnType::Increments)
    }

    pub fn string(&mut self, name: impl Into<String>) -> &mut ColumnDef {
        self.column(name, ColumnType::String(255))
    }

    pub fn text(&mut self, name: impl Into<String>) -> &mut ColumnDef {
        self.column(name, ColumnType::Text)
    }

    pub fn integer(&mut self, name: impl Into<String>) -> &mut ColumnDef {
        self.column(name, ColumnType::Integer)
    }

    pub fn big_integer(&mut self, name: impl Into<String>) -> &mut ColumnDef {
        self.column(name, ColumnType::BigInteger)
    }

    pub fn float(&mut self, name: impl Into<String>) -> &mut ColumnDef {
        self.column(name, ColumnType::Float)
    }

    pub fn boolean(&mut self, name: impl Into<String>) -> &mut ColumnDef {
        self.column(name, ColumnType::Boolean)
    }

    pub fn json(&mut self, name: impl Into<String>) -> &mut ColumnDef {
        self.column(name, ColumnType::Json)
    }

    pub fn timestamp(&mut self, name: impl Into<String>) -> &mut ColumnDef {
        self.column(name, ColumnType::Timestamp)
    }

    /// `created_at` and `updated_at`, both defaulting to now.
    pub fn timestamps(&mut self) -> &mut Self {
        self.timestamp("created_at").not_nullable().default_to("now()");
        self.timestamp("updated_at").not_nullable().default_to("now()");
        self
    }

    /// Statements creating the table, in execution order.
    pub fn statements(&self) -> Vec<String> {
        let table = match &self.schema {
            Some(schema) => format!("{}.{}", quote(schema), quote(&self.name)),
            None => quote(&self.name),
        };
        let defs: Vec<String> = self.columns.iter().map(ColumnDef::sql).collect();
        let mut statements = vec![format!(
            "create table if not exists {} ({})",
            table,
            defs.join(", ")
        )];
        if let Some(comment) = &self.comment {
            statements.push(format!(
                "comment on table {} is '{}'",
                table,
                comment.replace('\'', "''")
            ));
        }
        statements
    }

    pub fn to_sql(&self) -> String {
        self.statements().join("; ")
    }
}

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}
