//! Storage handle over the SQLite and PostgreSQL drivers.
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::query::Query;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Database, Encode, Type};
use std::str::FromStr;
use tracing::info;

use super::schema::{ColumnType, SqlValue};
use super::target::ConnectionTarget;
use crate::config::{CONNECT_TIMEOUT, MAX_CONNECTIONS};

/// SQL dialect of the connected storage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Sqlite,
    Postgres,
}

impl Backend {
    /// Bind parameter placeholder for the 1-based parameter `index`
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            Backend::Sqlite => "?".to_string(),
            Backend::Postgres => format!("${}", index),
        }
    }
}

/// Inner pool variants
#[derive(Debug, Clone)]
enum PoolInner {
    Sqlite(sqlx::SqlitePool),
    Postgres(sqlx::PgPool),
}

/// Wrap both pool implementations behind one handle.
#[derive(Debug, Clone)]
pub struct Pool {
    inner: PoolInner,
}

/// A row of a batch was rejected by storage
#[derive(Debug)]
pub struct RowInsertError {
    /// Index of the failing row within the batch, or `None` when the
    /// transaction itself could not be opened or committed
    pub row: Option<usize>,
    pub source: sqlx::Error,
}

impl RowInsertError {
    fn at(row: usize) -> impl FnOnce(sqlx::Error) -> Self {
        move |source| Self {
            row: Some(row),
            source,
        }
    }

    fn transaction(source: sqlx::Error) -> Self {
        Self { row: None, source }
    }
}

impl Pool {
    /// Open a pool for the given connection target
    pub async fn connect(target: &ConnectionTarget) -> Result<Self, sqlx::Error> {
        let inner = match target {
            ConnectionTarget::SqliteFile(path) => {
                info!(path = %path.display(), "Opening SQLite database");
                let options = SqliteConnectOptions::new()
                    .filename(path)
                    .create_if_missing(true);
                PoolInner::Sqlite(Self::sqlite_pool(options).await?)
            }
            ConnectionTarget::SqliteUrl(url) => {
                info!(%url, "Opening SQLite database");
                let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
                PoolInner::Sqlite(Self::sqlite_pool(options).await?)
            }
            ConnectionTarget::Postgres(url) => {
                let options = PgConnectOptions::from_str(url)?;
                info!(host = options.get_host(), "Connecting to PostgreSQL");
                let pool = PgPoolOptions::new()
                    .max_connections(MAX_CONNECTIONS)
                    .acquire_timeout(CONNECT_TIMEOUT)
                    .connect_with(options)
                    .await?;
                PoolInner::Postgres(pool)
            }
        };

        Ok(Pool { inner })
    }

    async fn sqlite_pool(options: SqliteConnectOptions) -> Result<sqlx::SqlitePool, sqlx::Error> {
        // A single long-lived connection: in-memory databases vanish with
        // their last connection.
        SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(CONNECT_TIMEOUT)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
    }

    /// Create an in-memory SQLite pool for testing
    #[cfg(test)]
    pub async fn sqlite_in_memory() -> Result<Self, sqlx::Error> {
        Self::connect(&ConnectionTarget::SqliteUrl("sqlite::memory:".to_string())).await
    }

    /// Direct access to the SQLite pool, for assertions in tests
    #[cfg(test)]
    pub fn as_sqlite(&self) -> Option<&sqlx::SqlitePool> {
        match &self.inner {
            PoolInner::Sqlite(pool) => Some(pool),
            PoolInner::Postgres(_) => None,
        }
    }

    pub fn backend(&self) -> Backend {
        match &self.inner {
            PoolInner::Sqlite(_) => Backend::Sqlite,
            PoolInner::Postgres(_) => Backend::Postgres,
        }
    }

    /// Execute a statement without parameters (DDL like CREATE TABLE)
    pub async fn execute_query(&self, sql: &str) -> Result<(), sqlx::Error> {
        match &self.inner {
            PoolInner::Sqlite(pool) => {
                sqlx::query(sql).execute(pool).await?;
            }
            PoolInner::Postgres(pool) => {
                sqlx::query(sql).execute(pool).await?;
            }
        }
        Ok(())
    }

    /// Check the storage catalog for a table with exactly this name
    pub async fn table_exists(&self, table_name: &str) -> Result<bool, sqlx::Error> {
        let found = match &self.inner {
            PoolInner::Sqlite(pool) => {
                sqlx::query_scalar::<_, String>(
                    "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?",
                )
                .bind(table_name)
                .fetch_optional(pool)
                .await?
            }
            PoolInner::Postgres(pool) => {
                sqlx::query_scalar::<_, String>(
                    r#"
                    SELECT table_name::text
                    FROM information_schema.tables
                    WHERE table_schema = current_schema()
                    AND table_name = $1
                    "#,
                )
                .bind(table_name)
                .fetch_optional(pool)
                .await?
            }
        };

        Ok(found.is_some())
    }

    /// Insert every row of `rows` with `insert_sql` inside one transaction.
    ///
    /// Either all rows are committed or none are: on the first rejected row
    /// the transaction is dropped, which rolls it back.
    pub async fn insert_batch(
        &self,
        insert_sql: &str,
        rows: &[Vec<SqlValue>],
    ) -> Result<(), RowInsertError> {
        match &self.inner {
            PoolInner::Sqlite(pool) => {
                let mut tx = pool.begin().await.map_err(RowInsertError::transaction)?;
                for (idx, row) in rows.iter().enumerate() {
                    bind_values(sqlx::query(insert_sql), row)
                        .execute(&mut *tx)
                        .await
                        .map_err(RowInsertError::at(idx))?;
                }
                tx.commit().await.map_err(RowInsertError::transaction)?;
            }
            PoolInner::Postgres(pool) => {
                let mut tx = pool.begin().await.map_err(RowInsertError::transaction)?;
                for (idx, row) in rows.iter().enumerate() {
                    bind_values(sqlx::query(insert_sql), row)
                        .execute(&mut *tx)
                        .await
                        .map_err(RowInsertError::at(idx))?;
                }
                tx.commit().await.map_err(RowInsertError::transaction)?;
            }
        }
        Ok(())
    }

    /// Close all connections, flushing SQLite files
    pub async fn close(&self) {
        match &self.inner {
            PoolInner::Sqlite(pool) => pool.close().await,
            PoolInner::Postgres(pool) => pool.close().await,
        }
    }
}

/// Bind a decoded row to a query, with typed NULLs for empty fields
fn bind_values<'q, DB>(
    mut query: Query<'q, DB, <DB as Database>::Arguments<'q>>,
    values: &'q [SqlValue],
) -> Query<'q, DB, <DB as Database>::Arguments<'q>>
where
    DB: Database,
    &'q str: Encode<'q, DB> + Type<DB>,
    i64: Encode<'q, DB> + Type<DB>,
    f64: Encode<'q, DB> + Type<DB>,
    bool: Encode<'q, DB> + Type<DB>,
    Option<&'q str>: Encode<'q, DB> + Type<DB>,
    Option<i64>: Encode<'q, DB> + Type<DB>,
    Option<f64>: Encode<'q, DB> + Type<DB>,
    Option<bool>: Encode<'q, DB> + Type<DB>,
{
    for value in values {
        query = match value {
            SqlValue::Text(s) => query.bind(s.as_str()),
            SqlValue::Integer(i) => query.bind(*i),
            SqlValue::Real(r) => query.bind(*r),
            SqlValue::Boolean(b) => query.bind(*b),
            SqlValue::Null(ColumnType::Text) => query.bind(None::<&str>),
            SqlValue::Null(ColumnType::Integer) => query.bind(None::<i64>),
            SqlValue::Null(ColumnType::Real) => query.bind(None::<f64>),
            SqlValue::Null(ColumnType::Boolean) => query.bind(None::<bool>),
        };
    }
    query
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn pool_with_table() -> Pool {
        let pool = Pool::sqlite_in_memory().await.unwrap();
        pool.execute_query("CREATE TABLE t (name TEXT(5), flag BOOLEAN(1), n INTEGER(3))")
            .await
            .unwrap();
        pool
    }

    async fn count_rows(pool: &Pool) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM t")
            .fetch_one(pool.as_sqlite().unwrap())
            .await
            .unwrap()
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(Backend::Sqlite.placeholder(3), "?");
        assert_eq!(Backend::Postgres.placeholder(3), "$3");
    }

    #[tokio::test]
    async fn test_table_exists() {
        let pool = pool_with_table().await;
        assert_eq!(pool.backend(), Backend::Sqlite);
        assert!(pool.table_exists("t").await.unwrap());
        assert!(!pool.table_exists("missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_insert_batch_binds_typed_values() {
        let pool = pool_with_table().await;
        let rows = vec![
            vec![
                SqlValue::Text("abc".to_string()),
                SqlValue::Boolean(true),
                SqlValue::Integer(42),
            ],
            vec![
                SqlValue::Null(ColumnType::Text),
                SqlValue::Boolean(false),
                SqlValue::Null(ColumnType::Integer),
            ],
        ];

        pool.insert_batch("INSERT INTO t VALUES (?, ?, ?)", &rows)
            .await
            .unwrap();

        let stored: Vec<(Option<String>, i64, Option<i64>)> =
            sqlx::query_as("SELECT name, flag, n FROM t ORDER BY rowid")
                .fetch_all(pool.as_sqlite().unwrap())
                .await
                .unwrap();
        assert_eq!(
            stored,
            vec![
                (Some("abc".to_string()), 1, Some(42)),
                (None, 0, None),
            ]
        );
    }

    #[tokio::test]
    async fn test_insert_batch_rolls_back_on_failure() {
        let pool = Pool::sqlite_in_memory().await.unwrap();
        pool.execute_query("CREATE TABLE t (name TEXT NOT NULL)")
            .await
            .unwrap();
        let rows = vec![
            vec![SqlValue::Text("ok".to_string())],
            vec![SqlValue::Null(ColumnType::Text)],
            vec![SqlValue::Text("never".to_string())],
        ];

        let err = pool
            .insert_batch("INSERT INTO t VALUES (?)", &rows)
            .await
            .unwrap_err();

        assert_eq!(err.row, Some(1));
        assert!(err.source.to_string().contains("NOT NULL"));
        assert_eq!(count_rows(&pool).await, 0);
    }
}
