//! SQLite-backed document store.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, trace};

use super::{DocumentStore, Result};
use crate::error::StoreError;
use crate::models::{Document, DocumentStatus, ExtractedField, ExtractionTemplate};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS documents (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    filename TEXT NOT NULL,
    file_size INTEGER NOT NULL,
    uploaded_at TEXT NOT NULL,
    form_type TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    error_message TEXT
);

CREATE TABLE IF NOT EXISTS extracted_fields (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    document_id INTEGER NOT NULL REFERENCES documents(id),
    field_name TEXT NOT NULL,
    field_value TEXT NOT NULL,
    confidence_score REAL,
    justification TEXT,
    extracted_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_extracted_fields_document
    ON extracted_fields(document_id);

CREATE TABLE IF NOT EXISTS templates (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    description TEXT NOT NULL DEFAULT '',
    fields TEXT NOT NULL,
    example_prompt TEXT,
    validation_rules TEXT NOT NULL DEFAULT '{}'
);
";

const DOCUMENT_COLUMNS: &str =
    "id, filename, file_size, uploaded_at, form_type, status, error_message";

const TEMPLATE_COLUMNS: &str = "id, name, description, fields, example_prompt, validation_rules";

/// Document store over a single SQLite connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a database file, creating its directory if needed.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        debug!("Opening database at {}", path.display());
        Self::init(Connection::open(path)?)
    }

    /// Private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn current_status(conn: &Connection, id: i64) -> Result<Option<String>> {
        Ok(conn
            .query_row("SELECT status FROM documents WHERE id = ?1", [id], |row| row.get(0))
            .optional()?)
    }

    /// Guarded status update; the row only changes when coming from a predecessor.
    fn set_status(
        conn: &Connection,
        id: i64,
        status: DocumentStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        let allowed = status
            .predecessors()
            .iter()
            .map(|s| format!("'{}'", s.as_str()))
            .collect::<Vec<_>>()
            .join(", ");
        let updated = if allowed.is_empty() {
            0
        } else {
            conn.execute(
                &format!(
                    "UPDATE documents SET status = ?1, error_message = ?2
                     WHERE id = ?3 AND status IN ({allowed})"
                ),
                params![status.as_str(), error_message, id],
            )?
        };

        if updated == 0 {
            return match Self::current_status(conn, id)? {
                None => Err(StoreError::NotFound(id)),
                Some(from) => Err(StoreError::InvalidTransition {
                    id,
                    from,
                    to: status.to_string(),
                }),
            };
        }

        trace!("Document {} -> {}", id, status);
        Ok(())
    }

    /// Insert rows and return them with their new ids. Callers own the transaction.
    fn insert_fields(conn: &Connection, fields: &[ExtractedField]) -> Result<Vec<ExtractedField>> {
        let mut stmt = conn.prepare(
            "INSERT INTO extracted_fields
             (document_id, field_name, field_value, confidence_score, justification, extracted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;

        let mut stored = Vec::with_capacity(fields.len());
        for field in fields {
            stmt.execute(params![
                field.document_id,
                field.field_name,
                field.value,
                field.confidence.map(f64::from),
                field.justification,
                field.extracted_at,
            ])?;
            stored.push(ExtractedField {
                id: Some(conn.last_insert_rowid()),
                ..field.clone()
            });
        }
        Ok(stored)
    }
}

/// Raw documents row before status decoding.
struct DocumentRow {
    id: i64,
    filename: String,
    file_size: i64,
    uploaded_at: DateTime<Utc>,
    form_type: String,
    status: String,
    error_message: Option<String>,
}

impl DocumentRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            filename: row.get(1)?,
            file_size: row.get(2)?,
            uploaded_at: row.get(3)?,
            form_type: row.get(4)?,
            status: row.get(5)?,
            error_message: row.get(6)?,
        })
    }

    fn into_document(self) -> Result<Document> {
        let status = self.status.parse().map_err(StoreError::Serialization)?;
        Ok(Document {
            id: Some(self.id),
            filename: self.filename,
            file_size: self.file_size.max(0) as u64,
            uploaded_at: self.uploaded_at,
            form_type: self.form_type,
            status,
            error_message: self.error_message,
        })
    }
}

/// Raw templates row before field and rule decoding.
struct TemplateRow {
    id: i64,
    name: String,
    description: String,
    fields: String,
    example_prompt: Option<String>,
    validation_rules: String,
}

impl TemplateRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            fields: row.get(3)?,
            example_prompt: row.get(4)?,
            validation_rules: row.get(5)?,
        })
    }

    fn into_template(self) -> Result<ExtractionTemplate> {
        let validation_rules: BTreeMap<String, serde_json::Value> =
            serde_json::from_str(&self.validation_rules)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;

        Ok(ExtractionTemplate {
            id: Some(self.id),
            name: self.name,
            description: self.description,
            fields: split_fields(&self.fields),
            example_prompt: self.example_prompt,
            validation_rules,
        })
    }
}

fn split_fields(stored: &str) -> Vec<String> {
    stored
        .split(',')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .collect()
}

fn check_template(template: &ExtractionTemplate) -> Result<()> {
    if template.name.trim().is_empty() {
        return Err(StoreError::InvalidTemplate("name must not be empty".to_string()));
    }
    if template.fields.iter().all(|f| f.trim().is_empty()) {
        return Err(StoreError::InvalidTemplate(format!(
            "template '{}' has no fields",
            template.name
        )));
    }
    if let Some(field) = template.fields.iter().find(|f| f.contains(',')) {
        return Err(StoreError::InvalidTemplate(format!(
            "field name '{field}' must not contain a comma"
        )));
    }
    Ok(())
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

impl DocumentStore for SqliteStore {
    fn insert_document(&self, document: &Document) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO documents (filename, file_size, uploaded_at, form_type, status, error_message)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                document.filename,
                document.file_size as i64,
                document.uploaded_at,
                document.form_type,
                document.status.as_str(),
                document.error_message,
            ],
        )?;
        let id = conn.last_insert_rowid();
        trace!("Inserted document {} ({})", id, document.filename);
        Ok(id)
    }

    fn update_document_status(
        &self,
        id: i64,
        status: DocumentStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn()?;
        Self::set_status(&conn, id, status, error_message)
    }

    fn insert_extracted_fields(&self, fields: &[ExtractedField]) -> Result<()> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        Self::insert_fields(&tx, fields)?;
        tx.commit()?;

        trace!("Inserted {} extracted fields", fields.len());
        Ok(())
    }

    fn complete_document(&self, id: i64, fields: &[ExtractedField]) -> Result<Vec<ExtractedField>> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        let stored = Self::insert_fields(&tx, fields)?;
        Self::set_status(&tx, id, DocumentStatus::Completed, None)?;
        tx.commit()?;

        debug!("Document {} completed with {} fields", id, stored.len());
        Ok(stored)
    }

    fn get_document(&self, id: i64) -> Result<Option<Document>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?1"),
                [id],
                DocumentRow::from_row,
            )
            .optional()?;

        row.map(DocumentRow::into_document).transpose()
    }

    fn get_fields_for_document(&self, document_id: i64) -> Result<Vec<ExtractedField>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, document_id, field_name, field_value, confidence_score, justification, extracted_at
             FROM extracted_fields
             WHERE document_id = ?1
             ORDER BY id ASC",
        )?;

        let rows = stmt.query_map([document_id], |row| {
            Ok(ExtractedField {
                id: Some(row.get(0)?),
                document_id: row.get(1)?,
                field_name: row.get(2)?,
                value: row.get(3)?,
                confidence: row.get::<_, Option<f64>>(4)?.map(|c| c as f32),
                justification: row.get(5)?,
                extracted_at: row.get(6)?,
            })
        })?;

        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn list_documents(&self, limit: usize) -> Result<Vec<Document>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents ORDER BY uploaded_at DESC, id DESC LIMIT ?1"
        ))?;

        let rows = stmt
            .query_map([limit as i64], DocumentRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter().map(DocumentRow::into_document).collect()
    }

    fn list_templates(&self) -> Result<Vec<ExtractionTemplate>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {TEMPLATE_COLUMNS} FROM templates ORDER BY name ASC"
        ))?;

        let rows = stmt
            .query_map([], TemplateRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter().map(TemplateRow::into_template).collect()
    }

    fn insert_template(&self, template: &ExtractionTemplate) -> Result<i64> {
        check_template(template)?;

        let fields = template
            .fields
            .iter()
            .map(|f| f.trim())
            .filter(|f| !f.is_empty())
            .collect::<Vec<_>>()
            .join(",");
        let rules = serde_json::to_string(&template.validation_rules)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO templates (name, description, fields, example_prompt, validation_rules)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                template.name,
                template.description,
                fields,
                template.example_prompt,
                rules
            ],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::DuplicateTemplate(template.name.clone())
            } else {
                StoreError::Sqlite(e)
            }
        })?;

        Ok(conn.last_insert_rowid())
    }

    fn find_template(&self, name: &str) -> Result<Option<ExtractionTemplate>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {TEMPLATE_COLUMNS} FROM templates WHERE name = ?1"),
                [name],
                TemplateRow::from_row,
            )
            .optional()?;

        row.map(TemplateRow::into_template).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    fn field(document_id: i64, name: &str, value: &str) -> ExtractedField {
        ExtractedField {
            id: None,
            document_id,
            field_name: name.to_string(),
            value: value.to_string(),
            confidence: Some(0.75),
            justification: Some("header".to_string()),
            extracted_at: Utc::now(),
        }
    }

    #[test]
    fn test_insert_and_get_document() {
        let store = store();
        let doc = Document::new("claim.pdf", 2048, "Insurance Claim");

        let id = store.insert_document(&doc).unwrap();
        let loaded = store.get_document(id).unwrap().unwrap();

        assert_eq!(loaded.id, Some(id));
        assert_eq!(loaded.filename, "claim.pdf");
        assert_eq!(loaded.file_size, 2048);
        assert_eq!(loaded.status, DocumentStatus::Pending);
        assert_eq!(loaded.uploaded_at, doc.uploaded_at);
        assert!(store.get_document(id + 1).unwrap().is_none());
    }

    #[test]
    fn test_status_moves_forward_only() {
        let store = store();
        let id = store
            .insert_document(&Document::new("a.pdf", 500, "Invoice"))
            .unwrap();

        store
            .update_document_status(id, DocumentStatus::Processing, None)
            .unwrap();
        store
            .update_document_status(id, DocumentStatus::Failed, Some("boom"))
            .unwrap();

        let doc = store.get_document(id).unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Failed);
        assert_eq!(doc.error_message.as_deref(), Some("boom"));

        let err = store
            .update_document_status(id, DocumentStatus::Completed, None)
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { ref from, .. } if from == "failed"));

        let err = store
            .update_document_status(id, DocumentStatus::Pending, None)
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
    }

    #[test]
    fn test_status_update_of_unknown_document() {
        let err = store()
            .update_document_status(42, DocumentStatus::Failed, None)
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(42)));
    }

    #[test]
    fn test_fields_round_trip_in_order() {
        let store = store();
        let id = store
            .insert_document(&Document::new("a.pdf", 500, "Invoice"))
            .unwrap();

        store
            .insert_extracted_fields(&[field(id, "name", "Jane"), field(id, "email", "not found")])
            .unwrap();

        let fields = store.get_fields_for_document(id).unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].field_name, "name");
        assert_eq!(fields[1].value, "not found");
        assert_eq!(fields[0].confidence, Some(0.75));
        assert_eq!(fields[0].justification.as_deref(), Some("header"));
    }

    #[test]
    fn test_field_batch_is_atomic() {
        let store = store();
        let id = store
            .insert_document(&Document::new("a.pdf", 500, "Invoice"))
            .unwrap();

        // Second row references a missing document and violates the foreign key.
        let result = store.insert_extracted_fields(&[field(id, "name", "Jane"), field(999, "x", "y")]);

        assert!(result.is_err());
        assert!(store.get_fields_for_document(id).unwrap().is_empty());
    }

    #[test]
    fn test_complete_document_writes_fields_and_status() {
        let store = store();
        let mut doc = Document::new("a.pdf", 500, "Invoice");
        doc.status = DocumentStatus::Processing;
        let id = store.insert_document(&doc).unwrap();

        let stored = store
            .complete_document(id, &[field(id, "name", "Jane"), field(id, "email", "not found")])
            .unwrap();

        assert_eq!(stored.len(), 2);
        assert!(stored.iter().all(|f| f.id.is_some()));
        assert_eq!(store.get_fields_for_document(id).unwrap(), stored);
        assert_eq!(
            store.get_document(id).unwrap().unwrap().status,
            DocumentStatus::Completed
        );
    }

    #[test]
    fn test_complete_document_rolls_back_fields_on_bad_transition() {
        let store = store();
        let mut doc = Document::new("a.pdf", 500, "Invoice");
        doc.status = DocumentStatus::Failed;
        let id = store.insert_document(&doc).unwrap();

        let err = store
            .complete_document(id, &[field(id, "name", "Jane")])
            .unwrap_err();

        assert!(matches!(err, StoreError::InvalidTransition { .. }));
        assert!(store.get_fields_for_document(id).unwrap().is_empty());
        assert_eq!(
            store.get_document(id).unwrap().unwrap().status,
            DocumentStatus::Failed
        );
    }

    #[test]
    fn test_list_documents_newest_first() {
        let store = store();
        let mut first = Document::new("first.pdf", 500, "Invoice");
        first.uploaded_at = Utc::now() - chrono::Duration::minutes(5);
        store.insert_document(&first).unwrap();
        store
            .insert_document(&Document::new("second.pdf", 500, "Invoice"))
            .unwrap();

        let docs = store.list_documents(10).unwrap();
        assert_eq!(docs[0].filename, "second.pdf");
        assert_eq!(docs[1].filename, "first.pdf");

        assert_eq!(store.list_documents(1).unwrap().len(), 1);
    }

    #[test]
    fn test_templates() {
        let store = store();
        let mut template = ExtractionTemplate::new("W-9", "Tax form", ["name", "tin"])
            .with_example_prompt("TIN may be an SSN or EIN");
        template
            .validation_rules
            .insert("tin".to_string(), serde_json::json!({"pattern": "^[0-9-]+$"}));

        store.insert_template(&template).unwrap();
        let loaded = store.find_template("W-9").unwrap().unwrap();

        assert_eq!(loaded.fields, vec!["name", "tin"]);
        assert_eq!(loaded.example_prompt.as_deref(), Some("TIN may be an SSN or EIN"));
        assert_eq!(loaded.validation_rules, template.validation_rules);
        assert!(store.find_template("W-2").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_template_name() {
        let store = store();
        let template = ExtractionTemplate::new("W-9", "", ["name"]);

        store.insert_template(&template).unwrap();
        let err = store.insert_template(&template).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateTemplate(ref n) if n == "W-9"));
    }

    #[test]
    fn test_template_fields_cannot_contain_commas() {
        let template = ExtractionTemplate::new("Bad", "", ["last, first"]);
        let err = store().insert_template(&template).unwrap_err();
        assert!(matches!(err, StoreError::InvalidTemplate(_)));

        let empty = ExtractionTemplate::new("Empty", "", Vec::<String>::new());
        assert!(store().insert_template(&empty).is_err());
    }

    #[test]
    fn test_list_templates_sorted() {
        let store = store();
        for template in ExtractionTemplate::defaults() {
            store.insert_template(&template).unwrap();
        }

        let names: Vec<_> = store
            .list_templates()
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["Customer Registration", "Insurance Claim", "Loan Application"]);
    }

    #[test]
    fn test_open_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("formex.db");

        let store = SqliteStore::open(&path).unwrap();
        store
            .insert_document(&Document::new("a.pdf", 500, "Invoice"))
            .unwrap();
        drop(store);

        let reopened = SqliteStore::open(&path).unwrap();
        assert_eq!(reopened.list_documents(10).unwrap().len(), 1);
    }
}
