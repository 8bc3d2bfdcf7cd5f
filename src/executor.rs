//! Query execution
//!
//! The engine only produces [`GeneratedQuery`] values. Running them is behind the
//! [`QueryExecutor`] port; [`PgExecutor`] is the sqlx implementation and
//! [`PoolRegistry`] owns one pool per catalog connection id.

use std::collections::HashMap;
use std::future::Future;
use std::sync::RwLock;

use rust_decimal::Decimal;
use serde_json::{Map, Number, Value};
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Column, PgPool, Postgres, Row, TypeInfo};
use tracing::{debug, warn};

use crate::error::{QueryError, Result};
use crate::sql::GeneratedQuery;

/// One result row keyed by output column name
pub type JsonRow = Map<String, Value>;

/// Runs generated statements
pub trait QueryExecutor: Send + Sync {
    /// Run a query and return every row
    fn execute(&self, query: &GeneratedQuery) -> impl Future<Output = Result<Vec<JsonRow>>> + Send;

    /// Run a query returning a single integer (e.g. a count)
    fn execute_scalar(&self, query: &GeneratedQuery) -> impl Future<Output = Result<i64>> + Send;
}

/// sqlx-backed executor over a PostgreSQL pool
#[derive(Debug, Clone)]
pub struct PgExecutor {
    pool: PgPool,
}

impl PgExecutor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl QueryExecutor for PgExecutor {
    async fn execute(&self, query: &GeneratedQuery) -> Result<Vec<JsonRow>> {
        let mut statement = sqlx::query(&query.sql);
        for value in query.values() {
            statement = bind_json(statement, value);
        }

        let rows = statement.fetch_all(&self.pool).await?;
        debug!(rows = rows.len(), "Query executed");
        rows.iter().map(row_to_json).collect()
    }

    async fn execute_scalar(&self, query: &GeneratedQuery) -> Result<i64> {
        let mut statement = sqlx::query(&query.sql);
        for value in query.values() {
            statement = bind_json(statement, value);
        }

        let row = statement.fetch_one(&self.pool).await?;
        let count: i64 = row.try_get(0)?;
        Ok(count)
    }
}

/// Bind a JSON value with the Rust type matching its variant
///
/// The SQL casts every placeholder to the field's type, so only the variant matters
/// here: integers go as `i64`, other numbers as `numeric`, arrays and objects as
/// `jsonb`.
fn bind_json<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &'q Value,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                query.bind(i)
            } else {
                match n.to_string().parse::<Decimal>() {
                    Ok(d) => query.bind(d),
                    Err(_) => query.bind(n.to_string()),
                }
            }
        }
        Value::String(s) => query.bind(s.as_str()),
        Value::Array(_) | Value::Object(_) => query.bind(value),
    }
}

/// Decode a row into JSON using each column's PostgreSQL type
fn row_to_json(row: &PgRow) -> Result<JsonRow> {
    let mut object = Map::new();

    for column in row.columns() {
        let index = column.ordinal();
        let value = match column.type_info().name() {
            "BOOL" => row.try_get::<Option<bool>, _>(index)?.map(Value::Bool),
            "INT2" => row
                .try_get::<Option<i16>, _>(index)?
                .map(|v| Value::from(i64::from(v))),
            "INT4" => row
                .try_get::<Option<i32>, _>(index)?
                .map(|v| Value::from(i64::from(v))),
            "INT8" => row.try_get::<Option<i64>, _>(index)?.map(Value::from),
            "FLOAT4" | "FLOAT8" => row
                .try_get::<Option<f64>, _>(index)
                .ok()
                .flatten()
                .and_then(Number::from_f64)
                .map(Value::Number),
            "NUMERIC" => row
                .try_get::<Option<Decimal>, _>(index)?
                .map(decimal_to_json),
            "TIMESTAMPTZ" => row
                .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(index)?
                .map(|v| Value::String(v.to_rfc3339())),
            "TIMESTAMP" => row
                .try_get::<Option<chrono::NaiveDateTime>, _>(index)?
                .map(|v| Value::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string())),
            "DATE" => row
                .try_get::<Option<chrono::NaiveDate>, _>(index)?
                .map(|v| Value::String(v.to_string())),
            "UUID" => row
                .try_get::<Option<uuid::Uuid>, _>(index)?
                .map(|v| Value::String(v.to_string())),
            "JSON" | "JSONB" => row.try_get::<Option<Value>, _>(index)?,
            _ => row.try_get::<Option<String>, _>(index)?.map(Value::String),
        };
        object.insert(column.name().to_string(), value.unwrap_or(Value::Null));
    }

    Ok(object)
}

fn decimal_to_json(value: Decimal) -> Value {
    use rust_decimal::prelude::ToPrimitive;

    if value.fract().is_zero() {
        if let Some(i) = value.to_i64() {
            return Value::from(i);
        }
    }
    value
        .to_f64()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(value.to_string()))
}

/// Connection pools keyed by catalog connection id
///
/// Pools are created lazily and live until evicted or closed.
pub struct PoolRegistry {
    pools: RwLock<HashMap<String, PgPool>>,
    max_connections: u32,
}

impl Default for PoolRegistry {
    fn default() -> Self {
        Self::new(10)
    }
}

impl PoolRegistry {
    pub fn new(max_connections: u32) -> Self {
        Self {
            pools: RwLock::new(HashMap::new()),
            max_connections,
        }
    }

    /// Register a connection; the pool connects on first use
    pub fn register(&self, connection_id: &str, database_url: &str) -> Result<()> {
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .connect_lazy(database_url)
            .map_err(|e| {
                QueryError::Connection(format!("Invalid connection '{}': {}", connection_id, e))
            })?;
        self.insert(connection_id, pool)
    }

    /// Register an existing pool
    pub fn insert(&self, connection_id: &str, pool: PgPool) -> Result<()> {
        let mut pools = self.pools.write().map_err(|_| poisoned())?;
        if pools.insert(connection_id.to_string(), pool).is_some() {
            debug!(connection = %connection_id, "Replaced registered pool");
        }
        Ok(())
    }

    pub fn get(&self, connection_id: &str) -> Result<PgPool> {
        let pools = self.pools.read().map_err(|_| poisoned())?;
        pools.get(connection_id).cloned().ok_or_else(|| {
            QueryError::Connection(format!("No pool registered for '{}'", connection_id))
        })
    }

    pub fn executor(&self, connection_id: &str) -> Result<PgExecutor> {
        self.get(connection_id).map(PgExecutor::new)
    }

    pub fn len(&self) -> usize {
        self.pools.read().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and close one pool; returns false if none was registered
    pub async fn evict(&self, connection_id: &str) -> bool {
        let removed = match self.pools.write() {
            Ok(mut pools) => pools.remove(connection_id),
            Err(_) => {
                warn!(connection = %connection_id, "Pool registry lock poisoned, cannot evict");
                return false;
            }
        };

        match removed {
            Some(pool) => {
                pool.close().await;
                debug!(connection = %connection_id, "Pool evicted");
                true
            }
            None => {
                warn!(connection = %connection_id, "Evicting unknown pool");
                false
            }
        }
    }

    /// Close every pool
    pub async fn close_all(&self) {
        let drained: Vec<(String, PgPool)> = match self.pools.write() {
            Ok(mut pools) => pools.drain().collect(),
            Err(_) => {
                warn!("Pool registry lock poisoned, cannot close pools");
                return;
            }
        };

        for (connection_id, pool) in drained {
            pool.close().await;
            debug!(connection = %connection_id, "Pool closed");
        }
    }
}

fn poisoned() -> QueryError {
    QueryError::Connection("Pool registry lock poisoned".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decimal_to_json() {
        assert_eq!(decimal_to_json(Decimal::new(42, 0)), Value::from(42));
        assert_eq!(decimal_to_json(Decimal::new(1250, 2)), Value::from(12.5));
    }

    #[tokio::test]
    async fn test_registry_lifecycle() {
        let registry = PoolRegistry::new(2);
        assert!(registry.is_empty());
        assert!(matches!(registry.get("hr"), Err(QueryError::Connection(_))));

        registry
            .register("hr", "postgres://localhost:5432/hr")
            .unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.executor("hr").is_ok());

        assert!(registry.evict("hr").await);
        assert!(!registry.evict("hr").await);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_close_all_drains() {
        let registry = PoolRegistry::default();
        registry.register("a", "postgres://localhost/a").unwrap();
        registry.register("b", "postgres://localhost/b").unwrap();

        registry.close_all().await;
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_url_rejected() {
        let registry = PoolRegistry::default();
        assert!(matches!(
            registry.register("bad", "not a url"),
            Err(QueryError::Connection(_))
        ));
    }
}
