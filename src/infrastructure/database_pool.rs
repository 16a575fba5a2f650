//! SQLite Connection Pool
//!
//! Pooled rusqlite connections. Queries run on the blocking thread pool;
//! parameters and rows are exchanged as `serde_json` values.

use crate::domain::ports::ConnectionFactory;
use crate::infrastructure::connection_pool::{Pool, PoolConfig, PoolError, PoolStats};
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use serde_json::{Map, Number, Value};
use std::sync::Arc;

/// A row keyed by column name.
pub type Row = Map<String, Value>;

/// Shareable handle to one SQLite connection.
#[derive(Clone)]
pub struct SqliteHandle(Arc<Mutex<Connection>>);

/// Opens SQLite connections to one database file.
pub struct SqliteConnectionFactory {
    path: String,
}

impl SqliteConnectionFactory {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ConnectionFactory for SqliteConnectionFactory {
    type Connection = SqliteHandle;

    fn target(&self) -> &str {
        &self.path
    }

    async fn connect(&self) -> Result<SqliteHandle, PoolError> {
        let path = self.path.clone();
        let conn = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&path)?;
            conn.busy_timeout(std::time::Duration::from_secs(5))?;
            Ok::<_, rusqlite::Error>(conn)
        })
        .await
        .map_err(|e| PoolError::Connect(e.to_string()))?
        .map_err(|e| PoolError::Connect(e.to_string()))?;

        Ok(SqliteHandle(Arc::new(Mutex::new(conn))))
    }
}

/// Pool of SQLite connections.
pub struct DatabasePool {
    pool: Pool<SqliteConnectionFactory>,
}

impl DatabasePool {
    pub fn new(path: impl Into<String>, config: PoolConfig) -> Self {
        Self {
            pool: Pool::new(SqliteConnectionFactory::new(path), config),
        }
    }

    pub fn pool(&self) -> &Pool<SqliteConnectionFactory> {
        &self.pool
    }

    pub async fn initialize(&self) -> Result<(), PoolError> {
        self.pool.initialize().await
    }

    /// Run `f` against a leased connection on the blocking pool.
    async fn run<T, F>(&self, f: F) -> Result<T, PoolError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let lease = self.pool.acquire().await?;
        let handle = lease.0.clone();

        let result = tokio::task::spawn_blocking(move || {
            let mut conn = handle.lock();
            f(&mut *conn)
        })
        .await
        .map_err(|e| PoolError::Query(format!("query task failed: {}", e)))?;

        drop(lease);
        result.map_err(|e| PoolError::Query(e.to_string()))
    }

    /// Execute a statement; returns affected rows.
    pub async fn execute(&self, sql: &str, params: &[Value]) -> Result<usize, PoolError> {
        let sql = sql.to_string();
        let params = to_sql_params(params);
        self.run(move |conn| conn.execute(&sql, params_from_iter(params.iter())))
            .await
    }

    /// Execute several `;`-separated statements without parameters.
    pub async fn execute_batch(&self, sql: &str) -> Result<(), PoolError> {
        let sql = sql.to_string();
        self.run(move |conn| conn.execute_batch(&sql)).await
    }

    /// Fetch all rows.
    pub async fn fetch(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, PoolError> {
        let sql = sql.to_string();
        let params = to_sql_params(params);
        self.run(move |conn| query_rows(conn, &sql, &params, None))
            .await
    }

    /// Fetch the first row, if any.
    pub async fn fetch_one(&self, sql: &str, params: &[Value]) -> Result<Option<Row>, PoolError> {
        let sql = sql.to_string();
        let params = to_sql_params(params);
        let rows = self
            .run(move |conn| query_rows(conn, &sql, &params, Some(1)))
            .await?;
        Ok(rows.into_iter().next())
    }

    /// Fetch the first column of the first row, if any.
    pub async fn fetch_value(&self, sql: &str, params: &[Value]) -> Result<Option<Value>, PoolError> {
        let sql = sql.to_string();
        let params = to_sql_params(params);
        self.run(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params_from_iter(params.iter()))?;
            let value = match rows.next()? {
                Some(row) => Some(to_json(row.get_ref(0)?)),
                None => None,
            };
            Ok(value)
        })
        .await
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub async fn close_all(&self) {
        self.pool.close_all().await
    }
}

fn query_rows(
    conn: &Connection,
    sql: &str,
    params: &[SqlValue],
    limit: Option<usize>,
) -> rusqlite::Result<Vec<Row>> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let mut rows = stmt.query(params_from_iter(params.iter()))?;

    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut map = Map::with_capacity(columns.len());
        for (idx, name) in columns.iter().enumerate() {
            map.insert(name.clone(), to_json(row.get_ref(idx)?));
        }
        out.push(map);
        if limit.is_some_and(|l| out.len() >= l) {
            break;
        }
    }
    Ok(out)
}

fn to_sql_params(params: &[Value]) -> Vec<SqlValue> {
    params.iter().map(to_sql).collect()
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        // Composite values are stored as JSON text
        Value::Array(_) | Value::Object(_) => SqlValue::Text(value.to_string()),
    }
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(hex::encode(bytes)),
    }
}
