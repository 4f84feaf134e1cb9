//! Maps SeaORM errors onto the domain storage taxonomy.

use sea_orm::{ConnAcquireErr, DbErr};

pub use sms_pool_domain::storage::StorageError;

const BUSY_MARKERS: [&str; 4] = [
    "database is locked",
    "database table is locked",
    "sqlite_busy",
    "busy",
];

/// Lock contention and pool exhaustion are transient; everything else,
/// including a closed connection, is reported as a permanent database error.
pub fn db_error(err: DbErr) -> StorageError {
    match err {
        DbErr::ConnectionAcquire(ConnAcquireErr::Timeout) => {
            return StorageError::Busy(err.to_string())
        }
        DbErr::ConnectionAcquire(ConnAcquireErr::ConnectionClosed) => {
            return StorageError::Database(err.to_string())
        }
        _ => {}
    }

    let message = err.to_string();
    let lowered = message.to_ascii_lowercase();
    if BUSY_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        StorageError::Busy(message)
    } else {
        StorageError::Database(message)
    }
}
