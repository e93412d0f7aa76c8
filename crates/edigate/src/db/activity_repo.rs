//! Append-only activity log.

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use super::{format_timestamp, parse_timestamp, Database, DatabaseError};
use crate::activity::{ActivityRefs, Component, Severity};

/// A stored activity log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityEntry {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub severity: Severity,
    pub component: Component,
    pub message: String,
    pub refs: ActivityRefs,
}

struct ActivityRow {
    id: i64,
    created_at: String,
    severity: String,
    component: String,
    message: String,
    document_id: Option<i64>,
    queue_entry_id: Option<i64>,
}

impl ActivityRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            created_at: row.get("created_at")?,
            severity: row.get("severity")?,
            component: row.get("component")?,
            message: row.get("message")?,
            document_id: row.get("document_id")?,
            queue_entry_id: row.get("queue_entry_id")?,
        })
    }

    fn into_entry(self) -> Result<ActivityEntry, DatabaseError> {
        let severity = self
            .severity
            .parse::<Severity>()
            .map_err(|reason| DatabaseError::InvalidValue {
                column: "activity_log.severity",
                value: self.severity.clone(),
                reason,
            })?;
        let component =
            self.component
                .parse::<Component>()
                .map_err(|reason| DatabaseError::InvalidValue {
                    column: "activity_log.component",
                    value: self.component.clone(),
                    reason,
                })?;
        Ok(ActivityEntry {
            id: self.id,
            created_at: parse_timestamp(&self.created_at)?,
            severity,
            component,
            message: self.message,
            refs: ActivityRefs {
                document_id: self.document_id,
                queue_entry_id: self.queue_entry_id,
            },
        })
    }
}

/// Appends an entry and returns its ID.
pub fn insert(
    db: &Database,
    severity: Severity,
    component: Component,
    message: &str,
    refs: ActivityRefs,
    now: DateTime<Utc>,
) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO activity_log (created_at, severity, component, message, document_id, queue_entry_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                format_timestamp(&now),
                severity.as_str(),
                component.as_str(),
                message,
                refs.document_id,
                refs.queue_entry_id,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// The most recent entries, newest first.
pub fn recent(db: &Database, limit: u32) -> Result<Vec<ActivityEntry>, DatabaseError> {
    let rows = db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM activity_log ORDER BY created_at DESC, id DESC LIMIT ?1")?;
        let rows = stmt
            .query_map(params![limit], ActivityRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })?;
    rows.into_iter().map(ActivityRow::into_entry).collect()
}

/// All entries that reference a queue entry, oldest first.
pub fn for_queue_entry(
    db: &Database,
    queue_entry_id: i64,
) -> Result<Vec<ActivityEntry>, DatabaseError> {
    let rows = db.with_conn(|conn| {
        let mut stmt = conn
            .prepare("SELECT * FROM activity_log WHERE queue_entry_id = ?1 ORDER BY id ASC")?;
        let rows = stmt
            .query_map(params![queue_entry_id], ActivityRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })?;
    rows.into_iter().map(ActivityRow::into_entry).collect()
}

/// Counts entries of one severity.
pub fn count_by_severity(db: &Database, severity: Severity) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM activity_log WHERE severity = ?1",
            params![severity.as_str()],
            |r| r.get(0),
        )?)
    })
}
