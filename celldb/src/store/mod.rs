use crate::error::{CellDbError, Result};
use crate::schema::{content_to_string, parse_content_str, DatabaseContent};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Host storage for database documents, keyed by page id.
///
/// The engine only reads documents, except for back-relation edits which
/// write the relation's target document back in full.
pub trait DocumentStore {
    /// Load a document. Missing and empty documents fail with `NotFound`.
    fn load_document(&self, page_id: &str) -> Result<DatabaseContent>;

    /// Replace a document.
    fn save_document(&self, page_id: &str, content: &DatabaseContent) -> Result<()>;

    /// Load a document, falling back to fresh default content when it does not exist.
    fn load_or_default(&self, page_id: &str) -> Result<DatabaseContent> {
        match self.load_document(page_id) {
            Err(CellDbError::NotFound { .. }) => Ok(DatabaseContent::default()),
            other => other,
        }
    }
}

impl<S: DocumentStore + ?Sized> DocumentStore for &S {
    fn load_document(&self, page_id: &str) -> Result<DatabaseContent> {
        (**self).load_document(page_id)
    }

    fn save_document(&self, page_id: &str, content: &DatabaseContent) -> Result<()> {
        (**self).save_document(page_id, content)
    }
}

/// Parse stored JSON, treating blank content as a missing document.
pub(crate) fn decode_document(page_id: &str, json: &str) -> Result<DatabaseContent> {
    if json.trim().is_empty() {
        return Err(CellDbError::NotFound {
            page_id: page_id.to_string(),
        });
    }
    parse_content_str(json)
}

/// In-memory document store. Documents are kept as serialized JSON so every
/// load and save goes through the same wire format as a persistent store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, for seeding a store.
    pub fn with_document(self, page_id: &str, content: &DatabaseContent) -> Result<Self> {
        self.save_document(page_id, content)?;
        Ok(self)
    }

    /// Store raw JSON as-is.
    pub fn insert_json(&self, page_id: &str, json: impl Into<String>) -> Result<()> {
        self.lock()?.insert(page_id.to_string(), json.into());
        Ok(())
    }

    pub fn remove(&self, page_id: &str) -> Result<bool> {
        Ok(self.lock()?.remove(page_id).is_some())
    }

    /// Stored page ids, sorted.
    pub fn page_ids(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.lock()?.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, String>>> {
        self.documents
            .lock()
            .map_err(|_| CellDbError::Other("memory store lock poisoned".to_string()))
    }
}

impl DocumentStore for MemoryStore {
    fn load_document(&self, page_id: &str) -> Result<DatabaseContent> {
        let json = self
            .lock()?
            .get(page_id)
            .cloned()
            .ok_or_else(|| CellDbError::NotFound {
                page_id: page_id.to_string(),
            })?;
        decode_document(page_id, &json)
    }

    fn save_document(&self, page_id: &str, content: &DatabaseContent) -> Result<()> {
        let json = content_to_string(content)?;
        self.lock()?.insert(page_id.to_string(), json);
        Ok(())
    }
}
