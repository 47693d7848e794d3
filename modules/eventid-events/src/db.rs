//! Pool setup, migrations, and sqlx error classification.

use std::time::Duration;

use eventid_common::{Config, EventIdError};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// SQLSTATE raised by the append-only triggers.
pub const RESTRICT_VIOLATION: &str = "23001";
/// SQLSTATE for a unique constraint hit.
pub const UNIQUE_VIOLATION: &str = "23505";

pub async fn connect(config: &Config) -> Result<PgPool, EventIdError> {
    PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&config.database_url)
        .await
        .map_err(classify)
}

/// Run the embedded migrations. Idempotent.
pub async fn migrate(pool: &PgPool) -> Result<(), EventIdError> {
    sqlx::migrate!("../../migrations")
        .run(pool)
        .await
        .map_err(|e| EventIdError::Database(format!("migration failed: {e}")))
}

/// Map a sqlx error onto the error taxonomy.
pub fn classify(err: sqlx::Error) -> EventIdError {
    match &err {
        sqlx::Error::Database(db) => match db.code() {
            Some(code) => classify_sqlstate(&code, db.message()),
            None => EventIdError::Database(err.to_string()),
        },
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::WorkerCrashed => EventIdError::TransientStorage(err.to_string()),
        _ => EventIdError::Database(err.to_string()),
    }
}

fn classify_sqlstate(code: &str, message: &str) -> EventIdError {
    match code {
        RESTRICT_VIOLATION => EventIdError::ImmutabilityViolation(message.to_string()),
        // serialization failure, deadlock, admin shutdown, too many connections
        "40001" | "40P01" | "57P01" | "57P02" | "57P03" | "53300" => {
            EventIdError::TransientStorage(format!("{code}: {message}"))
        }
        // connection exception class
        c if c.starts_with("08") => EventIdError::TransientStorage(format!("{code}: {message}")),
        _ => EventIdError::Database(format!("{code}: {message}")),
    }
}
