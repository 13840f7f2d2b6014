//! SQL User Storage
//!
//! Implements the `UserStorage` port over a pooled PostgreSQL or MySQL
//! connection. Users live in one table:
//!
//! ```text
//! ┌──────────────────────────────┬─────────────────┬──────────┐
//! │ id (text UUID, unique)       │ email (unique)  │ flow     │
//! └──────────────────────────────┴─────────────────┴──────────┘
//! ```
//!
//! Backend failures are classified per dialect by [`SqlDriver`] into
//! connection, duplicate-key and generic query errors.

mod driver;

pub use driver::{SqlDriver, SqlPool};

use async_trait::async_trait;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{validate_table_name, StorageConfig};
use crate::domain::{UserRecord, UserStorage};
use crate::error::{Error, Result};

/// `(id, email, flow)`; `flow` is nullable
type UserRow = (String, String, Option<String>);

/// Run `$body` against whichever pool variant `$pool` holds.
macro_rules! with_pool {
    ($pool:expr, $p:ident => $body:expr) => {
        match $pool {
            SqlPool::Postgres($p) => $body,
            SqlPool::MySql($p) => $body,
        }
    };
}

/// Statements rendered once for the configured table and dialect
#[derive(Debug, Clone)]
struct Queries {
    by_id: String,
    by_email: String,
    page: String,
    insert: String,
    delete: String,
    count: String,
}

impl Queries {
    fn new(driver: SqlDriver, table: &str) -> Self {
        let arg = |n: usize| match driver {
            SqlDriver::Postgres => format!("${}", n),
            SqlDriver::MySql => "?".to_string(),
        };

        Self {
            by_id: format!("SELECT id, email, flow FROM {} WHERE id = {}", table, arg(1)),
            by_email: format!(
                "SELECT id, email, flow FROM {} WHERE email = {}",
                table,
                arg(1)
            ),
            page: format!(
                "SELECT id, email, flow FROM {} ORDER BY id LIMIT {} OFFSET {}",
                table,
                arg(1),
                arg(2)
            ),
            insert: format!(
                "INSERT INTO {} (id, email, flow) VALUES ({}, {}, {})",
                table,
                arg(1),
                arg(2),
                arg(3)
            ),
            delete: format!("DELETE FROM {} WHERE email = {}", table, arg(1)),
            count: format!("SELECT COUNT(*) FROM {}", table),
        }
    }
}

/// Convert a stored row into a VLESS user at level 0. A NULL flow reads as empty.
fn row_to_user((id, email, flow): UserRow) -> Result<UserRecord> {
    let id = Uuid::parse_str(&id)
        .map_err(|e| Error::query(format!("invalid user ID in storage: {}", id), e))?;
    Ok(UserRecord::vless(id, email, flow.unwrap_or_default()))
}

/// User storage backed by a SQL table
#[derive(Debug)]
pub struct SqlUserStorage {
    driver: SqlDriver,
    pool: SqlPool,
    table: String,
    queries: Queries,
}

impl SqlUserStorage {
    /// Connect using the storage section of the configuration.
    pub async fn connect(config: &StorageConfig) -> Result<Self> {
        let driver = SqlDriver::from_kind(config.storage_kind()?)?;
        validate_table_name(&config.table)?;

        let pool = driver
            .connect(&config.dsn, config.pool)
            .await
            .map_err(|e| Error::connection(format!("failed to connect to {}", driver), e))?;

        info!(
            driver = driver.name(),
            table = %config.table,
            pool = config.pool,
            "Connected to SQL storage"
        );
        Self::from_pool(pool, &config.table)
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: SqlPool, table: &str) -> Result<Self> {
        validate_table_name(table)?;
        let driver = match &pool {
            SqlPool::Postgres(_) => SqlDriver::Postgres,
            SqlPool::MySql(_) => SqlDriver::MySql,
        };

        Ok(Self {
            driver,
            pool,
            table: table.to_string(),
            queries: Queries::new(driver, table),
        })
    }

    pub fn driver(&self) -> SqlDriver {
        self.driver
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Classify a failed read or count.
    fn read_error(&self, err: sqlx::Error, context: String) -> Error {
        if matches!(err, sqlx::Error::RowNotFound) {
            Error::NotFound(context)
        } else if self.driver.is_connection_error(&err) {
            Error::connection(context, err)
        } else {
            Error::query(context, err)
        }
    }

    async fn fetch_one_user(&self, sql: &str, key: String) -> Result<Option<UserRow>> {
        with_pool!(&self.pool, pool => {
            sqlx::query_as::<_, UserRow>(sql)
                .bind(key.clone())
                .fetch_optional(pool)
                .await
        })
        .map_err(|e| self.read_error(e, format!("lookup of {}", key)))
    }
}

#[async_trait]
impl UserStorage for SqlUserStorage {
    async fn get_user_by_id(&self, id: Uuid) -> Result<UserRecord> {
        debug!(id = %id, table = %self.table, "Loading user by ID");

        match self.fetch_one_user(&self.queries.by_id, id.to_string()).await? {
            Some(row) => row_to_user(row),
            None => Err(Error::NotFound(format!("user not found with ID: {}", id))),
        }
    }

    async fn get_user_by_email(&self, email: &str) -> Result<UserRecord> {
        debug!(email = %email, table = %self.table, "Loading user by email");

        match self
            .fetch_one_user(&self.queries.by_email, email.to_string())
            .await?
        {
            Some(row) => row_to_user(row),
            None => Err(Error::NotFound(format!("user not found with email: {}", email))),
        }
    }

    async fn get_users(&self, offset: usize, limit: usize) -> Result<Vec<UserRecord>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let offset = i64::try_from(offset).unwrap_or(i64::MAX);

        let rows = with_pool!(&self.pool, pool => {
            sqlx::query_as::<_, UserRow>(&self.queries.page)
                .bind(limit)
                .bind(offset)
                .fetch_all(pool)
                .await
        })
        .map_err(|e| self.read_error(e, format!("page at offset {}", offset)))?;

        debug!(offset, limit, rows = rows.len(), "Loaded page of users");
        rows.into_iter().map(row_to_user).collect()
    }

    async fn add_user(&self, user: &UserRecord) -> Result<()> {
        let account = user
            .vless_account()
            .ok_or_else(|| Error::Validation(format!("not a VLESS user: {}", user.email)))?;
        let id = account.id.to_string();

        let result = with_pool!(&self.pool, pool => {
            sqlx::query(&self.queries.insert)
                .bind(id.clone())
                .bind(user.email.clone())
                .bind(account.flow.clone())
                .execute(pool)
                .await
                .map(|done| done.rows_affected())
        });

        match result {
            Ok(_) => {
                debug!(id = %id, email = %user.email, "Added user");
                Ok(())
            }
            Err(e) if self.driver.is_duplicate_key_error(&e) => {
                warn!(id = %id, email = %user.email, "User already exists");
                Err(Error::duplicate_key(format!("id {} or email {}", id, user.email), e))
            }
            Err(e) if self.driver.is_connection_error(&e) => {
                Err(Error::connection(format!("insert of {}", user.email), e))
            }
            Err(e) => Err(Error::query(format!("insert of {}", user.email), e)),
        }
    }

    async fn del_user(&self, email: &str) -> Result<()> {
        let affected = with_pool!(&self.pool, pool => {
            sqlx::query(&self.queries.delete)
                .bind(email.to_string())
                .execute(pool)
                .await
                .map(|done| done.rows_affected())
        })
        .map_err(|e| {
            if self.driver.is_connection_error(&e) {
                Error::connection(format!("delete of {}", email), e)
            } else {
                Error::query(format!("delete of {}", email), e)
            }
        })?;

        if affected == 0 {
            debug!(email = %email, "No user found to delete");
        } else {
            debug!(email = %email, "Deleted user");
        }
        Ok(())
    }

    async fn get_count(&self) -> Result<u64> {
        let count = with_pool!(&self.pool, pool => {
            sqlx::query_scalar::<_, i64>(&self.queries.count)
                .fetch_one(pool)
                .await
        })
        .map_err(|e| self.read_error(e, "count".to_string()))?;

        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        info!(driver = self.driver.name(), "Closed SQL storage");
        Ok(())
    }

    fn name(&self) -> &'static str {
        self.driver.name()
    }
}
