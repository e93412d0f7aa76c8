//! Key/value state of the poller, such as the provider marker.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use super::{format_timestamp, Database, DatabaseError};

/// Reads a stored marker.
pub fn get_marker(db: &Database, key: &str) -> Result<Option<String>, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT value FROM poll_state WHERE key = ?1",
                params![key],
                |r| r.get(0),
            )
            .optional()?)
    })
}

/// Stores a marker, replacing any previous value.
pub fn set_marker(
    db: &Database,
    key: &str,
    value: &str,
    now: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO poll_state (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, format_timestamp(&now)],
        )?;
        Ok(())
    })
}
