//! SQLite-backed metadata store: projects, file manifests, embeddings, API keys.

pub mod error;
pub mod sqlite;
pub mod types;

pub use error::StoreError;
pub use sqlite::SqliteStore;
pub use types::{
    EmbeddingRow, ManifestEntry, ManifestRow, OwnerId, Project, ProjectId, ProjectUpdate,
};
