//! Delivery queue repository.
//!
//! Every state change is a conditional update. `claim` is the only way an
//! entry becomes `in_flight`, and it hands back a fencing token (the new
//! attempt count) that the completion calls must present. A completion
//! whose token no longer matches, for example because the recovery pass
//! already re-queued the entry, changes nothing.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{format_timestamp, parse_timestamp, Database, DatabaseError};
use crate::delivery::DeliveryState;

/// A delivery queue entry.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    pub id: i64,
    pub document_id: i64,
    pub state: DeliveryState,
    pub attempt_count: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub http_status: Option<u16>,
    pub response_body: Option<String>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

struct QueueRow {
    id: i64,
    document_id: i64,
    state: String,
    attempt_count: u32,
    next_attempt_at: String,
    last_attempt_at: Option<String>,
    last_error: Option<String>,
    http_status: Option<u16>,
    response_body: Option<String>,
    delivered_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl QueueRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            document_id: row.get("document_id")?,
            state: row.get("state")?,
            attempt_count: row.get("attempt_count")?,
            next_attempt_at: row.get("next_attempt_at")?,
            last_attempt_at: row.get("last_attempt_at")?,
            last_error: row.get("last_error")?,
            http_status: row.get("http_status")?,
            response_body: row.get("response_body")?,
            delivered_at: row.get("delivered_at")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn into_entry(self) -> Result<QueueEntry, DatabaseError> {
        let state = self
            .state
            .parse::<DeliveryState>()
            .map_err(|reason| DatabaseError::InvalidValue {
                column: "delivery_queue.state",
                value: self.state.clone(),
                reason,
            })?;
        Ok(QueueEntry {
            id: self.id,
            document_id: self.document_id,
            state,
            attempt_count: self.attempt_count,
            next_attempt_at: parse_timestamp(&self.next_attempt_at)?,
            last_attempt_at: self.last_attempt_at.as_deref().map(parse_timestamp).transpose()?,
            last_error: self.last_error,
            http_status: self.http_status,
            response_body: self.response_body,
            delivered_at: self.delivered_at.as_deref().map(parse_timestamp).transpose()?,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

/// The result of a failed attempt, as written back to the entry.
#[derive(Debug, Clone, PartialEq)]
pub struct FailureUpdate {
    /// `AwaitingRetry` or `Abandoned`.
    pub state: DeliveryState,
    pub next_attempt_at: DateTime<Utc>,
    pub error: String,
    pub http_status: Option<u16>,
    pub response_body: Option<String>,
}

/// An in-flight entry that the recovery pass moved out of `in_flight`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveredEntry {
    pub id: i64,
    pub document_id: i64,
    pub attempt_count: u32,
    /// The entry had already used up its attempts and was abandoned.
    pub abandoned: bool,
}

/// Inserts a `pending` entry. Runs inside the ingestion transaction.
pub(crate) fn insert_pending(
    conn: &Connection,
    document_id: i64,
    now: DateTime<Utc>,
) -> Result<i64, DatabaseError> {
    let ts = format_timestamp(&now);
    conn.execute(
        "INSERT INTO delivery_queue (document_id, state, attempt_count, next_attempt_at, created_at, updated_at)
         VALUES (?1, ?2, 0, ?3, ?3, ?3)",
        params![document_id, DeliveryState::Pending.as_str(), ts],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Finds an entry by its ID.
pub fn find_by_id(db: &Database, id: i64) -> Result<Option<QueueEntry>, DatabaseError> {
    let row = db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT * FROM delivery_queue WHERE id = ?1",
                params![id],
                QueueRow::from_row,
            )
            .optional()?)
    })?;
    row.map(QueueRow::into_entry).transpose()
}

/// Finds the entry belonging to a document.
pub fn find_by_document(
    db: &Database,
    document_id: i64,
) -> Result<Option<QueueEntry>, DatabaseError> {
    let row = db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT * FROM delivery_queue WHERE document_id = ?1",
                params![document_id],
                QueueRow::from_row,
            )
            .optional()?)
    })?;
    row.map(QueueRow::into_entry).transpose()
}

/// Entries eligible for an attempt at `now`: every `pending` entry plus
/// `awaiting_retry` entries whose next attempt time has come. Read-only.
pub fn find_due(
    db: &Database,
    now: DateTime<Utc>,
    limit: u32,
) -> Result<Vec<QueueEntry>, DatabaseError> {
    let rows = db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM delivery_queue
             WHERE state = ?1 OR (state = ?2 AND next_attempt_at <= ?3)
             ORDER BY next_attempt_at ASC, id ASC
             LIMIT ?4",
        )?;
        let rows = stmt
            .query_map(
                params![
                    DeliveryState::Pending.as_str(),
                    DeliveryState::AwaitingRetry.as_str(),
                    format_timestamp(&now),
                    limit,
                ],
                QueueRow::from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })?;
    rows.into_iter().map(QueueRow::into_entry).collect()
}

/// Atomically moves a due entry to `in_flight` and counts the attempt.
///
/// Returns the fencing token for the attempt, or `None` if the entry is
/// not (or no longer) due, e.g. because another worker claimed it first.
pub fn claim(db: &Database, id: i64, now: DateTime<Utc>) -> Result<Option<u32>, DatabaseError> {
    db.with_conn(|conn| {
        let ts = format_timestamp(&now);
        Ok(conn
            .query_row(
                "UPDATE delivery_queue
                 SET state = ?2, attempt_count = attempt_count + 1, last_attempt_at = ?3, updated_at = ?3
                 WHERE id = ?1 AND (state = ?4 OR (state = ?5 AND next_attempt_at <= ?3))
                 RETURNING attempt_count",
                params![
                    id,
                    DeliveryState::InFlight.as_str(),
                    ts,
                    DeliveryState::Pending.as_str(),
                    DeliveryState::AwaitingRetry.as_str(),
                ],
                |r| r.get(0),
            )
            .optional()?)
    })
}

/// Marks a claimed entry `delivered`. Returns `false` if the claim was stale.
pub fn complete_delivered(
    db: &Database,
    id: i64,
    token: u32,
    http_status: u16,
    response_body: &str,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let ts = format_timestamp(&now);
        let changed = conn.execute(
            "UPDATE delivery_queue
             SET state = ?3, http_status = ?4, response_body = ?5, last_error = NULL,
                 delivered_at = ?6, updated_at = ?6
             WHERE id = ?1 AND attempt_count = ?2 AND state = ?7",
            params![
                id,
                token,
                DeliveryState::Delivered.as_str(),
                http_status,
                response_body,
                ts,
                DeliveryState::InFlight.as_str(),
            ],
        )?;
        Ok(changed == 1)
    })
}

/// Records a failed attempt on a claimed entry. Returns `false` if the
/// claim was stale.
pub fn complete_failed(
    db: &Database,
    id: i64,
    token: u32,
    update: &FailureUpdate,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE delivery_queue
             SET state = ?3, next_attempt_at = ?4, last_error = ?5, http_status = ?6,
                 response_body = ?7, updated_at = ?8
             WHERE id = ?1 AND attempt_count = ?2 AND state = ?9",
            params![
                id,
                token,
                update.state.as_str(),
                format_timestamp(&update.next_attempt_at),
                update.error,
                update.http_status,
                update.response_body,
                format_timestamp(&now),
                DeliveryState::InFlight.as_str(),
            ],
        )?;
        Ok(changed == 1)
    })
}

/// Moves `in_flight` entries whose attempt started before `stale_before`
/// back to `awaiting_retry`, eligible at `now`. Entries that already used
/// `max_attempts` attempts are abandoned instead.
pub fn recover_stale_in_flight(
    db: &Database,
    now: DateTime<Utc>,
    stale_before: DateTime<Utc>,
    max_attempts: u32,
) -> Result<Vec<RecoveredEntry>, DatabaseError> {
    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;
        let stale: Vec<(i64, i64, u32)> = {
            let mut stmt = tx.prepare(
                "SELECT id, document_id, attempt_count FROM delivery_queue
                 WHERE state = ?1 AND (last_attempt_at IS NULL OR last_attempt_at < ?2)
                 ORDER BY id",
            )?;
            let rows = stmt
                .query_map(
                    params![
                        DeliveryState::InFlight.as_str(),
                        format_timestamp(&stale_before)
                    ],
                    |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
                )?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let ts = format_timestamp(&now);
        let mut recovered = Vec::with_capacity(stale.len());
        for (id, document_id, attempt_count) in stale {
            let abandoned = attempt_count >= max_attempts;
            let (state, message) = if abandoned {
                (
                    DeliveryState::Abandoned,
                    "attempt interrupted and attempt limit reached",
                )
            } else {
                (DeliveryState::AwaitingRetry, "attempt interrupted before completion")
            };
            tx.execute(
                "UPDATE delivery_queue
                 SET state = ?2, next_attempt_at = ?3, last_error = ?4, updated_at = ?3
                 WHERE id = ?1 AND state = ?5",
                params![
                    id,
                    state.as_str(),
                    ts,
                    message,
                    DeliveryState::InFlight.as_str()
                ],
            )?;
            recovered.push(RecoveredEntry {
                id,
                document_id,
                attempt_count,
                abandoned,
            });
        }

        tx.commit()?;
        Ok(recovered)
    })
}

/// Counts entries in every state, including states with no entries.
pub fn count_by_state(db: &Database) -> Result<Vec<(DeliveryState, u64)>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT COUNT(*) FROM delivery_queue WHERE state = ?1")?;
        DeliveryState::ALL
            .into_iter()
            .map(|state| {
                let count: u64 = stmt.query_row(params![state.as_str()], |r| r.get(0))?;
                Ok((state, count))
            })
            .collect()
    })
}
