pub mod config;
pub mod dependency;
pub mod document;
pub mod error;
pub mod filter;
pub mod format;
pub mod formula;
pub mod relation;
pub mod rollup;
pub mod schema;
pub mod store;
pub mod summary;
pub mod system_db;
pub mod validation;
pub mod view;

pub use config::EngineConfig;
pub use document::CellValue;
pub use error::{CellDbError, Result};
pub use relation::DocumentCache;
pub use schema::{DatabaseContent, DatabaseRow, DatabaseView, PropertyDef, PropertyKind};
pub use store::{DocumentStore, MemoryStore};
pub use system_db::SqliteStore;
pub use view::{materialize, recompute, MaterializedView};
