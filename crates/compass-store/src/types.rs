use serde::{Deserialize, Serialize};

/// Strongly typed wrapper for project row IDs. Also the event hub topic.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct ProjectId(pub i64);

/// Identity of the user owning projects and API keys.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct OwnerId(pub i64);

impl std::fmt::Display for ProjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for OwnerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Project {
    pub id: ProjectId,
    pub owner_id: OwnerId,
    pub name: String,
    pub repo_url: String,
    pub description: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Partial update; `None` fields keep their stored value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub repo_url: Option<String>,
}

/// One file of a snapshot, as computed by the manifest walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub file_path: String,
    pub file_type: String,
    pub size: i64,
    /// Modification time, seconds since the unix epoch.
    pub last_modified: i64,
    pub is_text: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct ManifestRow {
    pub file_path: String,
    pub file_type: String,
    pub size: i64,
    pub last_modified: i64,
    pub is_text: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// Stored embedding with its vector still serialized.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EmbeddingRow {
    pub id: i64,
    pub file_path: String,
    pub content: String,
    pub embedding: String,
}

impl EmbeddingRow {
    /// Decode the stored JSON vector.
    ///
    /// # Errors
    ///
    /// Returns an error if the column does not hold a JSON array of numbers.
    pub fn vector(&self) -> Result<Vec<f32>, serde_json::Error> {
        serde_json::from_str(&self.embedding)
    }
}
