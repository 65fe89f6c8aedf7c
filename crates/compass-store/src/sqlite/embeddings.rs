use super::SqliteStore;
use crate::error::StoreError;
use crate::types::{EmbeddingRow, ProjectId};

impl SqliteStore {
    /// Append one embedding record; the vector is stored as a JSON array.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the insert fails.
    pub async fn insert_embedding(
        &self,
        project: ProjectId,
        file_path: &str,
        content: &str,
        vector: &[f32],
    ) -> Result<i64, StoreError> {
        let encoded = serde_json::to_string(vector)?;
        let row: (i64,) = sqlx::query_as(
            "INSERT INTO project_embeddings (project_id, file_path, content, embedding) \
             VALUES (?, ?, ?, ?) RETURNING id",
        )
        .bind(project)
        .bind(file_path)
        .bind(content)
        .bind(encoded)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    /// Remove every embedding of a project. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn clear_embeddings(&self, project: ProjectId) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM project_embeddings WHERE project_id = ?")
            .bind(project)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// All embeddings of a project in insertion order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn embeddings(&self, project: ProjectId) -> Result<Vec<EmbeddingRow>, StoreError> {
        let rows = sqlx::query_as::<_, EmbeddingRow>(
            "SELECT id, file_path, content, embedding FROM project_embeddings \
             WHERE project_id = ? ORDER BY id",
        )
        .bind(project)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn count_embeddings(&self, project: ProjectId) -> Result<i64, StoreError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM project_embeddings WHERE project_id = ?")
                .bind(project)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}
