//! SQL Drivers
//!
//! Per-dialect capabilities: connecting a pool, classifying connection
//! failures and duplicate-key conflicts, and naming the dialect for logs.

use sqlx::mysql::{MySqlDatabaseError, MySqlPool, MySqlPoolOptions};
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::config::StorageKind;
use crate::error::{Error, Result};

/// PostgreSQL `unique_violation`
const PG_UNIQUE_VIOLATION: &str = "23505";

/// MySQL `ER_DUP_ENTRY`
const MYSQL_DUP_ENTRY: u16 = 1062;

/// PostgreSQL SQLSTATEs reporting a missing or failed connection.
pub fn is_pg_connection_code(code: &str) -> bool {
    matches!(
        code,
        "08000" // connection_exception
            | "08003" // connection_does_not_exist
            | "08006" // connection_failure
    )
}

/// MySQL client and server error numbers reporting an unusable connection.
pub fn is_mysql_connection_number(number: u16) -> bool {
    matches!(
        number,
        1042 // ER_BAD_HOST_ERROR
            | 1045 // ER_ACCESS_DENIED_ERROR
            | 1049 // ER_BAD_DB_ERROR
            | 2002 // CR_CONNECTION_ERROR
            | 2003 // CR_CONN_HOST_ERROR
            | 2005 // CR_UNKNOWN_HOST
            | 2006 // CR_SERVER_GONE_ERROR
            | 2013 // CR_SERVER_LOST
    )
}

/// Failures below the SQL layer, common to every dialect.
pub fn is_transport_error(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
    )
}

/// Connected pool for one of the supported dialects
#[derive(Debug, Clone)]
pub enum SqlPool {
    Postgres(PgPool),
    MySql(MySqlPool),
}

impl SqlPool {
    pub async fn close(&self) {
        match self {
            SqlPool::Postgres(pool) => pool.close().await,
            SqlPool::MySql(pool) => pool.close().await,
        }
    }

    pub fn is_closed(&self) -> bool {
        match self {
            SqlPool::Postgres(pool) => pool.is_closed(),
            SqlPool::MySql(pool) => pool.is_closed(),
        }
    }
}

/// Supported SQL dialects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDriver {
    Postgres,
    MySql,
}

impl SqlDriver {
    /// Select the driver for a storage backend type
    pub fn from_kind(kind: StorageKind) -> Result<Self> {
        match kind {
            StorageKind::Postgres => Ok(SqlDriver::Postgres),
            StorageKind::MySql => Ok(SqlDriver::MySql),
            StorageKind::Memory => Err(Error::UnsupportedDriver(kind.to_string())),
        }
    }

    /// Dialect name for logs and error messages
    pub fn name(&self) -> &'static str {
        match self {
            SqlDriver::Postgres => "PostgreSQL",
            SqlDriver::MySql => "MySQL",
        }
    }

    /// Open a pool and establish its first connection.
    pub async fn connect(&self, dsn: &str, pool_size: u32) -> std::result::Result<SqlPool, sqlx::Error> {
        match self {
            SqlDriver::Postgres => {
                let pool = PgPoolOptions::new()
                    .max_connections(pool_size)
                    .connect(dsn)
                    .await?;
                Ok(SqlPool::Postgres(pool))
            }
            SqlDriver::MySql => {
                let pool = MySqlPoolOptions::new()
                    .max_connections(pool_size)
                    .connect(dsn)
                    .await?;
                Ok(SqlPool::MySql(pool))
            }
        }
    }

    /// Whether `err` means the store is unreachable or the connection dropped
    pub fn is_connection_error(&self, err: &sqlx::Error) -> bool {
        if is_transport_error(err) {
            return true;
        }

        let Some(db_err) = err.as_database_error() else {
            return false;
        };

        match self {
            SqlDriver::Postgres => db_err
                .code()
                .is_some_and(|code| is_pg_connection_code(&code)),
            SqlDriver::MySql => db_err
                .try_downcast_ref::<MySqlDatabaseError>()
                .is_some_and(|e| is_mysql_connection_number(e.number())),
        }
    }

    /// Whether `err` is a uniqueness violation
    pub fn is_duplicate_key_error(&self, err: &sqlx::Error) -> bool {
        let Some(db_err) = err.as_database_error() else {
            return false;
        };

        match self {
            SqlDriver::Postgres => db_err
                .code()
                .is_some_and(|code| code == PG_UNIQUE_VIOLATION),
            SqlDriver::MySql => db_err
                .try_downcast_ref::<MySqlDatabaseError>()
                .is_some_and(|e| e.number() == MYSQL_DUP_ENTRY),
        }
    }
}

impl std::fmt::Display for SqlDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_driver_selection() {
        assert_eq!(
            SqlDriver::from_kind(StorageKind::Postgres).unwrap(),
            SqlDriver::Postgres
        );
        assert_eq!(SqlDriver::from_kind(StorageKind::MySql).unwrap(), SqlDriver::MySql);
        assert_matches!(
            SqlDriver::from_kind(StorageKind::Memory),
            Err(Error::UnsupportedDriver(_))
        );
    }

    #[test]
    fn test_driver_names() {
        assert_eq!(SqlDriver::Postgres.name(), "PostgreSQL");
        assert_eq!(SqlDriver::MySql.to_string(), "MySQL");
    }

    #[test]
    fn test_pg_connection_codes() {
        assert!(is_pg_connection_code("08000"));
        assert!(is_pg_connection_code("08003"));
        assert!(is_pg_connection_code("08006"));
        assert!(!is_pg_connection_code("23505"));
        assert!(!is_pg_connection_code("42P01"));
    }

    #[test]
    fn test_mysql_connection_numbers() {
        for number in [1042, 1045, 1049, 2002, 2003, 2005, 2006, 2013] {
            assert!(is_mysql_connection_number(number), "{}", number);
        }
        assert!(!is_mysql_connection_number(MYSQL_DUP_ENTRY));
        assert!(!is_mysql_connection_number(1146));
    }

    #[test]
    fn test_transport_errors_are_connection_errors_for_every_dialect() {
        for driver in [SqlDriver::Postgres, SqlDriver::MySql] {
            assert!(driver.is_connection_error(&sqlx::Error::PoolTimedOut));
            assert!(driver.is_connection_error(&sqlx::Error::PoolClosed));
            assert!(driver.is_connection_error(&sqlx::Error::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "refused",
            ))));
        }
    }

    #[test]
    fn test_non_database_errors_are_not_classified() {
        for driver in [SqlDriver::Postgres, SqlDriver::MySql] {
            let not_found = sqlx::Error::RowNotFound;
            assert!(!driver.is_connection_error(&not_found));
            assert!(!driver.is_duplicate_key_error(&not_found));

            let protocol = sqlx::Error::Protocol("unexpected packet".to_string());
            assert!(!driver.is_connection_error(&protocol));
            assert!(!driver.is_duplicate_key_error(&protocol));
        }
    }
}
