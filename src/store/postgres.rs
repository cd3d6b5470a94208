//! PostgreSQL store backed by a sqlx pool.

use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{Column, PgPool, Row as _, TypeInfo};

use super::{Row, Rows, Store, TableBuilder};
use crate::config::StoreConfig;
use crate::error::{MapperError, MapperResult};
use crate::query::{CompiledQuery, Value};

/// A store speaking to PostgreSQL.
#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect eagerly; fails when the server is unreachable.
    pub async fn connect(config: &StoreConfig) -> MapperResult<Self> {
        check_client(config)?;
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await
            .map_err(|e| MapperError::Connection(e.to_string()))?;
        Ok(Self { pool })
    }

    /// Build the pool without connecting; connections open on first use.
    pub fn connect_lazy(config: &StoreConfig) -> MapperResult<Self> {
        check_client(config)?;
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect_lazy(&config.url)
            .map_err(|e| MapperError::Connection(e.to_string()))?;
        Ok(Self { pool })
    }
}

fn check_client(config: &StoreConfig) -> MapperResult<()> {
    match config.client.as_str() {
        "pg" | "postgres" | "postgresql" => Ok(()),
        other => Err(MapperError::Config(format!("unsupported store client: '{}'", other))),
    }
}

#[async_trait]
impl Store for PgStore {
    async fn execute(&self, query: &CompiledQuery) -> MapperResult<Rows> {
        let mut statement = sqlx::query(&query.sql);
        for binding in &query.bindings {
            statement = match binding {
                Value::Null => statement.bind(Option::<String>::None),
                Value::Json(v) => statement.bind(sqlx::types::Json(v)),
                Value::Bool(v) => statement.bind(*v),
                Value::Int(v) => statement.bind(*v),
                Value::Float(v) => statement.bind(*v),
                Value::String(v) => statement.bind(v.as_str()),
            };
        }

        let rows: Vec<PgRow> = statement
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MapperError::Database(e.to_string()))?;

        Ok(rows.iter().map(row_to_map).collect())
    }

    async fn has_table(&self, table: &str) -> MapperResult<bool> {
        let (exists,): (bool,) = sqlx::query_as("select to_regclass($1) is not null")
            .bind(table)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MapperError::Database(e.to_string()))?;
        Ok(exists)
    }

    async fn create_table(&self, table: &TableBuilder) -> MapperResult<()> {
        for sql in table.statements() {
            tracing::debug!("{}", sql);
            sqlx::query(&sql)
                .execute(&self.pool)
                .await
                .map_err(|e| MapperError::Database(e.to_string()))?;
        }
        Ok(())
    }
}

/// Convert a PgRow to a JSON object keyed by column name.
fn row_to_map(row: &PgRow) -> Row {
    let mut map = Row::new();

    for (i, column) in row.columns().iter().enumerate() {
        let name = column.name().to_string();
        let type_name = column.type_info().name();

        let value: serde_json::Value = match type_name {
            "BOOL" => row
                .try_get::<Option<bool>, _>(i)
                .ok()
                .flatten()
                .map(serde_json::Value::Bool)
                .unwrap_or(serde_json::Value::Null),
            "INT2" => row
                .try_get::<Option<i16>, _>(i)
                .ok()
                .flatten()
                .map(|v| serde_json::Value::Number(v.into()))
                .unwrap_or(serde_json::Value::Null),
            "INT4" => row
                .try_get::<Option<i32>, _>(i)
                .ok()
                .flatten()
                .map(|v| serde_json::Value::Number(v.into()))
                .unwrap_or(serde_json::Value::Null),
            "INT8" => row
                .try_get::<Option<i64>, _>(i)
                .ok()
                .flatten()
                .map(|v| serde_json::Value::Number(v.into()))
                .unwrap_or(serde_json::Value::Null),
            "FLOAT4" => row
                .try_get::<Option<f32>, _>(i)
                .ok()
                .flatten()
                .and_then(|v| serde_json::Number::from_f64(v as f64))
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            "FLOAT8" => row
                .try_get::<Option<f64>, _>(i)
                .ok()
                .flatten()
                .and_then(serde_json::Number::from_f64)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            "TIMESTAMPTZ" => row
                .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(i)
                .ok()
                .flatten()
                .map(|v| serde_json::Value::String(v.to_rfc3339()))
                .unwrap_or(serde_json::Value::Null),
            "TIMESTAMP" => row
                .try_get::<Option<chrono::NaiveDateTime>, _>(i)
                .ok()
                .flatten()
                .map(|v| serde_json::Value::String(v.to_string()))
                .unwrap_or(serde_json::Value::Null),
            "DATE" => row
                .try_get::<Option<chrono::NaiveDate>, _>(i)
                .ok()
                .flatten()
                .map(|v| serde_json::Value::String(v.to_string()))
                .unwrap_or(serde_json::Value::Null),
            "UUID" => row
                .try_get::<Option<sqlx::types::Uuid>, _>(i)
                .ok()
                .flatten()
                .map(|v| serde_json::Value::String(v.to_string()))
                .unwrap_or(serde_json::Value::Null),
            "JSON" | "JSONB" => row
                .try_get::<Option<serde_json::Value>, _>(i)
                .ok()
                .flatten()
                .unwrap_or(serde_json::Value::Null),
            _ => row
                .try_get::<Option<String>, _>(i)
                .ok()
                .flatten()
                .map(serde_json::Value::String)
                .unwrap_or(serde_json::Value::Null),
        };

        map.insert(name, value);
    }

    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lazy_connect_does_not_touch_server() {
        let config = StoreConfig {
            url: "postgres://nobody@127.0.0.1:1/none".to_string(),
            ..Default::default()
        };
        assert!(PgStore::connect_lazy(&config).is_ok());
    }

    #[tokio::test]
    async fn test_unknown_client_rejected() {
        let config = StoreConfig {
            client: "oracle".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            PgStore::connect_lazy(&config),
            Err(MapperError::Config(_))
        ));
    }
}
