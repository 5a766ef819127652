use crate::error::{CellDbError, Result};
use crate::schema::{content_to_string, DatabaseContent};
use crate::store::{decode_document, DocumentStore};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

/// SQLite-backed document store. One row per database page, holding the
/// page's full content as JSON.
pub struct SqliteStore {
    conn: Connection,
    /// Notebook recorded for documents written through [`DocumentStore::save_document`].
    notebook_id: String,
}

impl SqliteStore {
    /// Open or create the store at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = SqliteStore {
            conn,
            notebook_id: String::new(),
        };
        store.initialize_tables()?;
        Ok(store)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = SqliteStore {
            conn,
            notebook_id: String::new(),
        };
        store.initialize_tables()?;
        Ok(store)
    }

    /// Record `notebook_id` on documents saved through the `DocumentStore` interface.
    pub fn with_notebook(mut self, notebook_id: impl Into<String>) -> Self {
        self.notebook_id = notebook_id.into();
        self
    }

    fn initialize_tables(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS documents (
                page_id TEXT PRIMARY KEY,
                notebook_id TEXT NOT NULL DEFAULT '',
                content_json TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_documents_notebook ON documents(notebook_id);
            "
        )?;
        Ok(())
    }

    // ── Documents ────────────────────────────────────────────────────

    /// Upsert a document under an explicit notebook.
    pub fn upsert_document(
        &self,
        page_id: &str,
        notebook_id: &str,
        content: &DatabaseContent,
    ) -> Result<()> {
        let content_json = content_to_string(content)?;
        self.upsert_json(page_id, notebook_id, &content_json)
    }

    /// Upsert raw JSON without parsing it.
    pub fn upsert_json(&self, page_id: &str, notebook_id: &str, content_json: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO documents (page_id, notebook_id, content_json, updated_at)
             VALUES (?1, ?2, ?3, datetime('now'))",
            params![page_id, notebook_id, content_json],
        )?;
        Ok(())
    }

    /// Get a stored document record by page id.
    pub fn get_document(&self, page_id: &str) -> Result<Option<DocumentRecord>> {
        let result = self.conn.query_row(
            "SELECT page_id, notebook_id, content_json, updated_at FROM documents WHERE page_id = ?1",
            params![page_id],
            |row| {
                Ok(DocumentRecord {
                    page_id: row.get(0)?,
                    notebook_id: row.get(1)?,
                    content_json: row.get(2)?,
                    updated_at: row.get(3)?,
                })
            },
        ).optional()?;
        Ok(result)
    }

    /// List stored documents, optionally restricted to one notebook.
    pub fn list_documents(&self, notebook_id: Option<&str>) -> Result<Vec<DocumentRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT page_id, notebook_id, content_json, updated_at FROM documents
             WHERE ?1 IS NULL OR notebook_id = ?1 ORDER BY page_id",
        )?;
        let rows = stmt.query_map(params![notebook_id], |row| {
            Ok(DocumentRecord {
                page_id: row.get(0)?,
                notebook_id: row.get(1)?,
                content_json: row.get(2)?,
                updated_at: row.get(3)?,
            })
        })?;

        let mut docs = Vec::new();
        for row in rows {
            docs.push(row?);
        }
        Ok(docs)
    }

    /// Delete a document. Returns whether it existed.
    pub fn delete_document(&self, page_id: &str) -> Result<bool> {
        let deleted = self.conn.execute(
            "DELETE FROM documents WHERE page_id = ?1",
            params![page_id],
        )?;
        Ok(deleted > 0)
    }

    // ── Transaction Support ──────────────────────────────────────────

    /// Begin a transaction.
    pub fn begin_transaction(&self) -> Result<()> {
        self.conn.execute_batch("BEGIN TRANSACTION")?;
        Ok(())
    }

    /// Commit the current transaction.
    pub fn commit_transaction(&self) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    /// Rollback the current transaction.
    pub fn rollback_transaction(&self) -> Result<()> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    /// Run `f` inside a transaction, committing on success and rolling back on error.
    pub fn in_transaction<T>(&self, f: impl FnOnce(&Self) -> Result<T>) -> Result<T> {
        self.begin_transaction()?;
        match f(self) {
            Ok(value) => {
                self.commit_transaction()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = self.rollback_transaction() {
                    log::warn!("Rollback failed: {rollback}");
                }
                Err(e)
            }
        }
    }
}

impl DocumentStore for SqliteStore {
    fn load_document(&self, page_id: &str) -> Result<DatabaseContent> {
        match self.get_document(page_id)? {
            Some(record) => record.parse_content(),
            None => Err(CellDbError::NotFound {
                page_id: page_id.to_string(),
            }),
        }
    }

    fn save_document(&self, page_id: &str, content: &DatabaseContent) -> Result<()> {
        // Keep the notebook a page was imported under
        let notebook_id = match self.get_document(page_id)? {
            Some(record) if self.notebook_id.is_empty() => record.notebook_id,
            _ => self.notebook_id.clone(),
        };
        self.upsert_document(page_id, &notebook_id, content)
    }
}

/// A record from the documents table
#[derive(Debug, Clone)]
pub struct DocumentRecord {
    pub page_id: String,
    pub notebook_id: String,
    pub content_json: String,
    pub updated_at: String,
}

impl DocumentRecord {
    /// Parse the stored JSON back into database content
    pub fn parse_content(&self) -> Result<DatabaseContent> {
        decode_document(&self.page_id, &self.content_json)
    }
}
