//! Persistence layer
//!
//! Repository traits over the relational tables the controller consumes,
//! plus the short-term key-value cache. The embedded default implementation
//! keeps every table in its own sled tree with chronologically sortable keys.

mod cache;
mod repository;
mod sled_store;

pub use cache::{keys, read_json, write_json, KvCache, MemoryCache};
pub use repository::{FieldRepository, GateCommandLog, IrrigationRepository};
pub use sled_store::SledStore;

/// Error type for storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },
}

impl From<sled::Error> for StorageError {
    fn from(err: sled::Error) -> Self {
        StorageError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}
