//! XML template repository.
//!
//! One row per document type. The renderer reads the active row at
//! render time, so edits made through `upsert` apply to the next attempt.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::{format_timestamp, Database, DatabaseError};
use crate::document::DocumentType;
use crate::render::{default_template, XmlTemplate};

struct TemplateRow {
    doc_type: String,
    name: String,
    body: String,
    position_template: String,
    content_type: String,
    version: u32,
}

impl TemplateRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            doc_type: row.get("doc_type")?,
            name: row.get("name")?,
            body: row.get("body")?,
            position_template: row.get("position_template")?,
            content_type: row.get("content_type")?,
            version: row.get("version")?,
        })
    }

    fn into_template(self) -> Result<XmlTemplate, DatabaseError> {
        let doc_type =
            DocumentType::from_code(&self.doc_type).ok_or_else(|| DatabaseError::InvalidValue {
                column: "xml_templates.doc_type",
                value: self.doc_type.clone(),
                reason: "unknown document type".to_string(),
            })?;
        Ok(XmlTemplate {
            doc_type,
            name: self.name,
            body: self.body,
            position_template: self.position_template,
            content_type: self.content_type,
            version: self.version,
        })
    }
}

/// The active template for a document type, if there is one.
pub fn find_active(
    db: &Database,
    doc_type: DocumentType,
) -> Result<Option<XmlTemplate>, DatabaseError> {
    let row = db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT * FROM xml_templates WHERE doc_type = ?1 AND is_active = 1",
                params![doc_type.code()],
                TemplateRow::from_row,
            )
            .optional()?)
    })?;
    row.map(TemplateRow::into_template).transpose()
}

/// Creates or replaces the template for `template.doc_type` and makes it
/// active. The stored version is bumped on every replacement; the
/// `version` field of the argument is ignored. Returns the new version.
pub fn upsert(
    db: &Database,
    template: &XmlTemplate,
    now: DateTime<Utc>,
) -> Result<u32, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn.query_row(
            "INSERT INTO xml_templates (doc_type, name, body, position_template, content_type, is_active, version, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, 1, ?6)
             ON CONFLICT(doc_type) DO UPDATE SET
                name = excluded.name,
                body = excluded.body,
                position_template = excluded.position_template,
                content_type = excluded.content_type,
                is_active = 1,
                version = xml_templates.version + 1,
                updated_at = excluded.updated_at
             RETURNING version",
            params![
                template.doc_type.code(),
                template.name,
                template.body,
                template.position_template,
                template.content_type,
                format_timestamp(&now),
            ],
            |r| r.get(0),
        )?)
    })
}

/// Enables or disables the template of a document type. Returns `false`
/// when the type has no template.
pub fn set_active(
    db: &Database,
    doc_type: DocumentType,
    active: bool,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE xml_templates SET is_active = ?2, updated_at = ?3 WHERE doc_type = ?1",
            params![doc_type.code(), active, format_timestamp(&now)],
        )?;
        Ok(changed == 1)
    })
}

/// Installs the built-in template for every type that has none.
/// Existing templates, edited or not, are left alone.
pub fn seed_defaults(db: &Database, now: DateTime<Utc>) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let ts = format_timestamp(&now);
        let mut stmt = conn.prepare(
            "INSERT OR IGNORE INTO xml_templates (doc_type, name, body, position_template, content_type, is_active, version, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, 1, ?6)",
        )?;
        let mut installed = 0;
        for doc_type in DocumentType::ALL {
            let template = default_template(doc_type);
            installed += stmt.execute(params![
                doc_type.code(),
                template.name,
                template.body,
                template.position_template,
                template.content_type,
                ts,
            ])?;
        }
        if installed > 0 {
            log::info!("Installed {} default XML template(s)", installed);
        }
        Ok(installed)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    #[test]
    fn test_defaults_seeded_for_every_type() {
        let db = test_db();
        for doc_type in DocumentType::ALL {
            let template = find_active(&db, doc_type).unwrap().unwrap();
            assert_eq!(template.doc_type, doc_type);
            assert_eq!(template.version, 1);
            assert_eq!(template, default_template(doc_type));
        }
    }

    #[test]
    fn test_upsert_bumps_version() {
        let db = test_db();
        let mut template = default_template(DocumentType::Invoice);
        template.body = "<Invoice>{{number}}</Invoice>".to_string();

        assert_eq!(upsert(&db, &template, Utc::now()).unwrap(), 2);
        assert_eq!(upsert(&db, &template, Utc::now()).unwrap(), 3);

        let stored = find_active(&db, DocumentType::Invoice).unwrap().unwrap();
        assert_eq!(stored.body, "<Invoice>{{number}}</Invoice>");
        assert_eq!(stored.version, 3);
    }

    #[test]
    fn test_seed_does_not_overwrite_edits() {
        let db = test_db();
        let mut template = default_template(DocumentType::Order);
        template.body = "<Custom/>".to_string();
        upsert(&db, &template, Utc::now()).unwrap();

        assert_eq!(seed_defaults(&db, Utc::now()).unwrap(), 0);
        let stored = find_active(&db, DocumentType::Order).unwrap().unwrap();
        assert_eq!(stored.body, "<Custom/>");
    }

    #[test]
    fn test_inactive_template_is_not_found() {
        let db = test_db();
        assert!(set_active(&db, DocumentType::PriceCatalog, false, Utc::now()).unwrap());
        assert!(find_active(&db, DocumentType::PriceCatalog)
            .unwrap()
            .is_none());

        upsert(&db, &default_template(DocumentType::PriceCatalog), Utc::now()).unwrap();
        assert!(find_active(&db, DocumentType::PriceCatalog)
            .unwrap()
            .is_some());
    }
}
