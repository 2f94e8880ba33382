//! # Metadata Store
//!
//! A small relational store used by the coin search tools to keep symbol
//! tables. Works against SQLite or PostgreSQL through the sqlx `Any` driver;
//! the backend is picked from the URL scheme.
//!
//! Placeholders are positional (`$1`, `$2`, ...) on both backends.

use std::collections::HashSet;
use std::time::Duration;

use serde_json::{Number, Value};
use sqlx::any::{install_default_drivers, AnyArguments, AnyPoolOptions, AnyRow};
use sqlx::query::Query;
use sqlx::{Any, AnyPool, Row, Transaction, ValueRef};
use thiserror::Error;
use tracing::{debug, info};

/// Custom error types for Database operations.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Unsupported database URL: {0}")]
    UnsupportedUrl(String),
    #[error("Failed to connect to database: {0}")]
    ConnectionError(String),
    #[error("Query execution failed: {0}")]
    QueryError(String),
    #[error("Transaction error: {0}")]
    TransactionError(String),
    #[error("Database connection is closed")]
    Closed,
}

/// Supported backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbKind {
    Sqlite,
    Postgres,
}

impl DbKind {
    /// Detects the backend from a connection URL.
    pub fn from_url(database_url: &str) -> Result<Self, DbError> {
        let lower = database_url.to_ascii_lowercase();
        if lower.starts_with("sqlite:") {
            Ok(Self::Sqlite)
        } else if lower.starts_with("postgres://") || lower.starts_with("postgresql://") {
            Ok(Self::Postgres)
        } else {
            Err(DbError::UnsupportedUrl(database_url.to_string()))
        }
    }

    /// Column definition of an auto-incrementing integer primary key.
    pub fn autoincrement_primary_key(&self) -> &'static str {
        match self {
            Self::Sqlite => "INTEGER PRIMARY KEY AUTOINCREMENT",
            Self::Postgres => "SERIAL PRIMARY KEY",
        }
    }

    fn table_exists_sql(&self) -> &'static str {
        match self {
            Self::Sqlite => "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = $1",
            Self::Postgres => {
                "SELECT 1 FROM information_schema.tables WHERE table_name::text = $1"
            }
        }
    }
}

/// A positional query parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Text(String),
    Int(i64),
    Real(f64),
    Bool(bool),
    /// Bound as a text-typed NULL.
    Null,
}

impl From<&str> for SqlParam {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for SqlParam {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for SqlParam {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for SqlParam {
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}

impl From<f64> for SqlParam {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<bool> for SqlParam {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl<T: Into<SqlParam>> From<Option<T>> for SqlParam {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// A connection pool plus an optional open transaction.
pub struct Database {
    /// The underlying sqlx connection pool.
    pool: AnyPool,
    kind: DbKind,
    /// Open transaction; statements run inside it while set.
    tx: Option<Transaction<'static, Any>>,
    /// Tables already known to exist.
    known_tables: HashSet<String>,
}

impl Database {
    /// Opens a pool for `database_url` (`sqlite:...` or `postgres://...`).
    ///
    /// SQLite pools hold a single connection that is never recycled, so an
    /// in-memory database lives as long as the pool.
    pub async fn connect(database_url: &str) -> Result<Self, DbError> {
        let kind = DbKind::from_url(database_url)?;
        install_default_drivers();

        let options = match kind {
            DbKind::Sqlite => AnyPoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None),
            DbKind::Postgres => AnyPoolOptions::new().max_connections(5),
        };
        let pool = options
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await
            .map_err(|e: sqlx::Error| DbError::ConnectionError(e.to_string()))?;

        info!(?kind, "database connected");
        Ok(Self {
            pool,
            kind,
            tx: None,
            known_tables: HashSet::new(),
        })
    }

    pub fn db_kind(&self) -> DbKind {
        self.kind
    }

    pub fn has_connection(&self) -> bool {
        !self.pool.is_closed()
    }

    /// Commits an open transaction and closes the pool.
    pub async fn close(&mut self) -> Result<(), DbError> {
        if self.pool.is_closed() {
            return Ok(());
        }
        self.commit().await?;
        self.pool.close().await;
        self.known_tables.clear();
        info!("database closed");
        Ok(())
    }

    /// Whether `table_name` exists. Positive answers are remembered.
    pub async fn table_exists(&mut self, table_name: &str) -> Result<bool, DbError> {
        self.ensure_open()?;
        if self.known_tables.contains(table_name) {
            return Ok(true);
        }
        let sql = self.kind.table_exists_sql();
        let rows = self.query(sql, &[SqlParam::from(table_name)]).await?;
        let exists = !rows.is_empty();
        debug!(table = table_name, exists, "table check");
        if exists {
            self.known_tables.insert(table_name.to_string());
        }
        Ok(exists)
    }

    /// Runs a statement returning rows; values keep the column order.
    pub async fn query(&mut self, sql: &str, params: &[SqlParam]) -> Result<Vec<Vec<Value>>, DbError> {
        self.ensure_open()?;
        debug!(sql, ?params, "query");
        let q = bind_params(sqlx::query(sql), params);
        let rows = match self.tx.as_mut() {
            Some(tx) => q.fetch_all(&mut **tx).await,
            None => q.fetch_all(&self.pool).await,
        }
        .map_err(|e: sqlx::Error| DbError::QueryError(e.to_string()))?;

        rows.iter().map(row_to_values).collect()
    }

    /// Runs a statement and returns the number of affected rows.
    pub async fn execute(&mut self, sql: &str, params: &[SqlParam]) -> Result<u64, DbError> {
        self.ensure_open()?;
        debug!(sql, ?params, "execute");
        let q = bind_params(sqlx::query(sql), params);
        let result = match self.tx.as_mut() {
            Some(tx) => q.execute(&mut **tx).await,
            None => q.execute(&self.pool).await,
        }
        .map_err(|e: sqlx::Error| DbError::QueryError(e.to_string()))?;

        Ok(result.rows_affected())
    }

    /// Starts a transaction. Fails if one is already open.
    pub async fn begin(&mut self) -> Result<(), DbError> {
        self.ensure_open()?;
        if self.tx.is_some() {
            return Err(DbError::TransactionError("a transaction is already open".into()));
        }
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e: sqlx::Error| DbError::TransactionError(e.to_string()))?;
        self.tx = Some(tx);
        Ok(())
    }

    /// Commits the open transaction, if any.
    pub async fn commit(&mut self) -> Result<(), DbError> {
        if let Some(tx) = self.tx.take() {
            tx.commit()
                .await
                .map_err(|e: sqlx::Error| DbError::TransactionError(e.to_string()))?;
        }
        Ok(())
    }

    /// Rolls back the open transaction, if any.
    pub async fn rollback(&mut self) -> Result<(), DbError> {
        if let Some(tx) = self.tx.take() {
            tx.rollback()
                .await
                .map_err(|e: sqlx::Error| DbError::TransactionError(e.to_string()))?;
            // Tables created inside the transaction are gone again
            self.known_tables.clear();
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), DbError> {
        if self.pool.is_closed() {
            Err(DbError::Closed)
        } else {
            Ok(())
        }
    }
}

fn bind_params<'q>(
    mut query: Query<'q, Any, AnyArguments<'q>>,
    params: &[SqlParam],
) -> Query<'q, Any, AnyArguments<'q>> {
    for param in params {
        query = match param {
            SqlParam::Text(s) => query.bind(s.clone()),
            SqlParam::Int(i) => query.bind(*i),
            SqlParam::Real(f) => query.bind(*f),
            SqlParam::Bool(b) => query.bind(*b),
            SqlParam::Null => query.bind(Option::<String>::None),
        };
    }
    query
}

fn row_to_values(row: &AnyRow) -> Result<Vec<Value>, DbError> {
    (0..row.len())
        .map(|index| {
            let raw = row
                .try_get_raw(index)
                .map_err(|e| DbError::QueryError(e.to_string()))?;
            if raw.is_null() {
                return Ok(Value::Null);
            }
            if let Ok(v) = row.try_get::<i64, _>(index) {
                return Ok(Value::from(v));
            }
            if let Ok(v) = row.try_get::<f64, _>(index) {
                return Ok(Number::from_f64(v).map_or(Value::Null, Value::Number));
            }
            if let Ok(v) = row.try_get::<String, _>(index) {
                return Ok(Value::String(v));
            }
            if let Ok(v) = row.try_get::<bool, _>(index) {
                return Ok(Value::Bool(v));
            }
            Err(DbError::QueryError(format!("column {index} has an unsupported type")))
        })
        .collect()
}
