use thiserror::Error;

#[derive(Error, Debug)]
pub enum CellDbError {
    #[error("Tokenize error at position {position}: {message}")]
    Tokenize { message: String, position: usize },

    #[error("Parse error at position {position}: {message}")]
    Parse { message: String, position: usize },

    #[error("{0}")]
    Eval(String),

    #[error("Circular reference: {}", .0.join(" -> "))]
    CircularReference(Vec<String>),

    #[error("Document not found: {page_id}")]
    NotFound { page_id: String },

    #[error("Relation resolution error: {0}")]
    RelationResolution(String),

    #[error("Property not found: {0}")]
    PropertyNotFound(String),

    #[error("View not found: {0}")]
    ViewNotFound(String),

    #[error("Row not found: {0}")]
    RowNotFound(String),

    #[error("Invalid property '{name}': {reason}")]
    InvalidProperty { name: String, reason: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("{0}")]
    Other(String),
}

impl CellDbError {
    pub(crate) fn eval(message: impl Into<String>) -> Self {
        CellDbError::Eval(message.into())
    }

    /// True for formula syntax and evaluation failures, which are reported per cell.
    pub fn is_formula_error(&self) -> bool {
        matches!(
            self,
            CellDbError::Tokenize { .. }
                | CellDbError::Parse { .. }
                | CellDbError::Eval(_)
                | CellDbError::CircularReference(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CellDbError>;
