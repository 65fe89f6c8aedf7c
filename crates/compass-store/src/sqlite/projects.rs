use super::{SqliteStore, map_unique};
use crate::error::StoreError;
use crate::types::{OwnerId, Project, ProjectId, ProjectUpdate};

const PROJECT_COLUMNS: &str = "id, owner_id, name, repo_url, description, created_at, updated_at";

impl SqliteStore {
    /// Create a project. Names are unique per owner.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Duplicate`] if the owner already has a project
    /// with this name, or a database error.
    pub async fn create_project(
        &self,
        owner: OwnerId,
        name: &str,
        repo_url: &str,
        description: &str,
    ) -> Result<Project, StoreError> {
        sqlx::query_as::<_, Project>(&format!(
            "INSERT INTO projects (owner_id, name, repo_url, description) \
             VALUES (?, ?, ?, ?) RETURNING {PROJECT_COLUMNS}"
        ))
        .bind(owner)
        .bind(name)
        .bind(repo_url)
        .bind(description)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_unique(e, format!("project '{name}'")))
    }

    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn find_project(
        &self,
        owner: OwnerId,
        name: &str,
    ) -> Result<Option<Project>, StoreError> {
        let project = sqlx::query_as::<_, Project>(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects WHERE owner_id = ? AND name = ?"
        ))
        .bind(owner)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(project)
    }

    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn project_by_id(&self, id: ProjectId) -> Result<Option<Project>, StoreError> {
        let project = sqlx::query_as::<_, Project>(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(project)
    }

    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_projects(&self, owner: OwnerId) -> Result<Vec<Project>, StoreError> {
        let projects = sqlx::query_as::<_, Project>(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects WHERE owner_id = ? ORDER BY id"
        ))
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;
        Ok(projects)
    }

    /// Apply a partial update and return the stored row, or `None` if the
    /// project does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Duplicate`] when renaming onto an existing name.
    pub async fn update_project(
        &self,
        id: ProjectId,
        update: &ProjectUpdate,
    ) -> Result<Option<Project>, StoreError> {
        sqlx::query_as::<_, Project>(&format!(
            "UPDATE projects SET \
               name = COALESCE(?, name), \
               description = COALESCE(?, description), \
               repo_url = COALESCE(?, repo_url), \
               updated_at = datetime('now') \
             WHERE id = ? RETURNING {PROJECT_COLUMNS}"
        ))
        .bind(update.name.as_deref())
        .bind(update.description.as_deref())
        .bind(update.repo_url.as_deref())
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            map_unique(
                e,
                format!("project '{}'", update.name.as_deref().unwrap_or_default()),
            )
        })
    }

    /// Delete a project; manifest and embeddings cascade.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn delete_project(&self, id: ProjectId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM projects WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ManifestEntry;

    async fn store() -> SqliteStore {
        SqliteStore::new(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn create_and_find_project() {
        let store = store().await;
        let created = store
            .create_project(OwnerId(1), "demo", "https://example.com/demo.git", "a demo")
            .await
            .unwrap();
        assert_eq!(created.name, "demo");
        assert_eq!(created.owner_id, OwnerId(1));

        let found = store.find_project(OwnerId(1), "demo").await.unwrap();
        assert_eq!(found, Some(created.clone()));
        assert!(store.find_project(OwnerId(2), "demo").await.unwrap().is_none());
        assert_eq!(store.project_by_id(created.id).await.unwrap(), Some(created));
    }

    #[tokio::test]
    async fn duplicate_name_per_owner_rejected() {
        let store = store().await;
        store.create_project(OwnerId(1), "demo", "", "").await.unwrap();
        let err = store.create_project(OwnerId(1), "demo", "", "").await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));

        // Another owner may reuse the name.
        store.create_project(OwnerId(2), "demo", "", "").await.unwrap();
    }

    #[tokio::test]
    async fn list_is_scoped_to_owner() {
        let store = store().await;
        store.create_project(OwnerId(1), "a", "", "").await.unwrap();
        store.create_project(OwnerId(1), "b", "", "").await.unwrap();
        store.create_project(OwnerId(2), "c", "", "").await.unwrap();

        let names: Vec<String> = store
            .list_projects(OwnerId(1))
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn partial_update_keeps_other_fields() {
        let store = store().await;
        let p = store
            .create_project(OwnerId(1), "demo", "https://old", "desc")
            .await
            .unwrap();
        let updated = store
            .update_project(
                p.id,
                &ProjectUpdate {
                    repo_url: Some("https://new".into()),
                    ..ProjectUpdate::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.repo_url, "https://new");
        assert_eq!(updated.name, "demo");
        assert_eq!(updated.description, "desc");

        assert!(
            store
                .update_project(ProjectId(999), &ProjectUpdate::default())
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn delete_cascades_to_manifest_and_embeddings() {
        let store = store().await;
        let p = store.create_project(OwnerId(1), "demo", "", "").await.unwrap();
        store
            .replace_manifest(
                p.id,
                &[ManifestEntry {
                    file_path: "a.go".into(),
                    file_type: "go".into(),
                    size: 10,
                    last_modified: 0,
                    is_text: true,
                }],
            )
            .await
            .unwrap();
        store
            .insert_embedding(p.id, "a.go", "package main", &[0.1, 0.2])
            .await
            .unwrap();

        assert!(store.delete_project(p.id).await.unwrap());
        assert!(store.manifest(p.id).await.unwrap().is_empty());
        assert_eq!(store.count_embeddings(p.id).await.unwrap(), 0);
        assert!(!store.delete_project(p.id).await.unwrap());
    }
}
