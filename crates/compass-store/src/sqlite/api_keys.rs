use super::SqliteStore;
use crate::error::StoreError;
use crate::types::OwnerId;

impl SqliteStore {
    /// Store or replace the provider API key of an owner.
    ///
    /// # Errors
    ///
    /// Returns an error if the upsert fails.
    pub async fn set_api_key(&self, owner: OwnerId, key: &str) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO api_keys (owner_id, api_key) VALUES (?, ?) \
             ON CONFLICT(owner_id) DO UPDATE SET api_key = excluded.api_key, \
             updated_at = datetime('now')",
        )
        .bind(owner)
        .bind(key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn api_key(&self, owner: OwnerId) -> Result<Option<String>, StoreError> {
        let key: Option<String> =
            sqlx::query_scalar("SELECT api_key FROM api_keys WHERE owner_id = ?")
                .bind(owner)
                .fetch_optional(&self.pool)
                .await?;
        Ok(key.filter(|k| !k.is_empty()))
    }

    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn delete_api_key(&self, owner: OwnerId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM api_keys WHERE owner_id = ?")
            .bind(owner)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
