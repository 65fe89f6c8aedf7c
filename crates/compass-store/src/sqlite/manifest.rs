use super::SqliteStore;
use crate::error::StoreError;
use crate::types::{ManifestEntry, ManifestRow, ProjectId};

impl SqliteStore {
    /// Replace a project's manifest wholesale: delete every prior record, then
    /// insert `entries`. Runs in one transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if any statement fails; the transaction is rolled back.
    pub async fn replace_manifest(
        &self,
        project: ProjectId,
        entries: &[ManifestEntry],
    ) -> Result<usize, StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM manifest_entries WHERE project_id = ?")
            .bind(project)
            .execute(&mut *tx)
            .await?;

        for entry in entries {
            sqlx::query(
                "INSERT INTO manifest_entries \
                 (project_id, file_path, file_type, size, last_modified, is_text) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(project)
            .bind(&entry.file_path)
            .bind(&entry.file_type)
            .bind(entry.size)
            .bind(entry.last_modified)
            .bind(entry.is_text)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(entries.len())
    }

    /// Manifest of a project ordered by path.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn manifest(&self, project: ProjectId) -> Result<Vec<ManifestRow>, StoreError> {
        let rows = sqlx::query_as::<_, ManifestRow>(
            "SELECT file_path, file_type, size, last_modified, is_text, created_at, updated_at \
             FROM manifest_entries WHERE project_id = ? ORDER BY file_path",
        )
        .bind(project)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
