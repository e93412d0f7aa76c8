//! Document repository (the Document Store).
//!
//! Documents are keyed by `(provider_id, doc_type)`. Ingestion creates the
//! document and its delivery queue entry in one transaction, and does
//! nothing at all for a document that is already stored.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::{format_timestamp, parse_timestamp, queue_repo, Database, DatabaseError};
use crate::document::{Document, DocumentType, ExtractedFields, RawDocument};

/// What happened when a fetched document was handed to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// First sighting: the document and its queue entry were created.
    Created {
        document_id: i64,
        queue_entry_id: i64,
    },
    /// The document was already stored; nothing changed.
    Duplicate { document_id: i64 },
}

impl IngestOutcome {
    pub fn is_created(&self) -> bool {
        matches!(self, IngestOutcome::Created { .. })
    }

    pub fn document_id(&self) -> i64 {
        match *self {
            IngestOutcome::Created { document_id, .. } => document_id,
            IngestOutcome::Duplicate { document_id } => document_id,
        }
    }
}

/// A raw document row from the database.
struct DocumentRow {
    id: i64,
    provider_id: String,
    doc_type: String,
    number: String,
    fields_json: String,
    raw_json: String,
    received_at: String,
}

impl DocumentRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            provider_id: row.get("provider_id")?,
            doc_type: row.get("doc_type")?,
            number: row.get("number")?,
            fields_json: row.get("fields_json")?,
            raw_json: row.get("raw_json")?,
            received_at: row.get("received_at")?,
        })
    }

    fn into_document(self) -> Result<Document, DatabaseError> {
        let doc_type =
            DocumentType::from_code(&self.doc_type).ok_or_else(|| DatabaseError::InvalidValue {
                column: "documents.doc_type",
                value: self.doc_type.clone(),
                reason: "unknown document type".to_string(),
            })?;
        let fields: ExtractedFields = serde_json::from_str(&self.fields_json)?;
        let raw: serde_json::Value = serde_json::from_str(&self.raw_json)?;
        Ok(Document {
            id: self.id,
            provider_id: self.provider_id,
            doc_type,
            number: self.number,
            fields,
            raw,
            received_at: parse_timestamp(&self.received_at)?,
        })
    }
}

/// Stores a fetched document unless it is already known, creating exactly
/// one queue entry for a newly stored document.
pub fn ingest(
    db: &Database,
    raw: &RawDocument,
    fields: &ExtractedFields,
    now: DateTime<Utc>,
) -> Result<IngestOutcome, DatabaseError> {
    let fields_json = serde_json::to_string(fields)?;
    let raw_json = serde_json::to_string(&raw.payload)?;
    let received_at = format_timestamp(&now);

    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;

        let inserted = tx.execute(
            "INSERT OR IGNORE INTO documents (provider_id, doc_type, number, fields_json, raw_json, received_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                raw.provider_id,
                raw.doc_type.code(),
                fields.number(),
                fields_json,
                raw_json,
                received_at,
            ],
        )?;

        let outcome = if inserted == 1 {
            let document_id = tx.last_insert_rowid();
            let queue_entry_id = queue_repo::insert_pending(&tx, document_id, now)?;
            IngestOutcome::Created {
                document_id,
                queue_entry_id,
            }
        } else {
            let document_id: i64 = tx.query_row(
                "SELECT id FROM documents WHERE provider_id = ?1 AND doc_type = ?2",
                params![raw.provider_id, raw.doc_type.code()],
                |r| r.get(0),
            )?;
            IngestOutcome::Duplicate { document_id }
        };

        tx.commit()?;
        Ok(outcome)
    })
}

/// Finds a document by its row ID.
pub fn find_by_id(db: &Database, id: i64) -> Result<Option<Document>, DatabaseError> {
    let row = db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT * FROM documents WHERE id = ?1",
                params![id],
                DocumentRow::from_row,
            )
            .optional()?)
    })?;
    row.map(DocumentRow::into_document).transpose()
}

/// Finds a document by the provider's identifier.
pub fn find_by_provider_id(
    db: &Database,
    provider_id: &str,
    doc_type: DocumentType,
) -> Result<Option<Document>, DatabaseError> {
    let row = db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT * FROM documents WHERE provider_id = ?1 AND doc_type = ?2",
                params![provider_id, doc_type.code()],
                DocumentRow::from_row,
            )
            .optional()?)
    })?;
    row.map(DocumentRow::into_document).transpose()
}

/// Counts stored documents.
pub fn count(db: &Database) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM documents", [], |r| r.get(0))?))
}
