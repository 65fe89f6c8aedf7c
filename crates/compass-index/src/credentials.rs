use compass_llm::Secret;
use compass_store::{OwnerId, SqliteStore};

use crate::error::{IndexError, Result};

/// Resolves the provider key for an owner: stored per-user key first, then
/// the process-wide default.
#[derive(Debug, Clone)]
pub struct CredentialResolver {
    store: SqliteStore,
    default_key: Option<Secret>,
}

impl CredentialResolver {
    #[must_use]
    pub fn new(store: SqliteStore, default_key: Option<Secret>) -> Self {
        Self {
            store,
            default_key: default_key.filter(|k| !k.expose().is_empty()),
        }
    }

    /// # Errors
    ///
    /// Returns [`IndexError::MissingCredential`] if neither key exists, or a
    /// store error if the lookup fails.
    pub async fn resolve(&self, owner: OwnerId) -> Result<Secret> {
        if let Some(key) = self.store.api_key(owner).await? {
            return Ok(Secret::new(key));
        }
        self.default_key
            .clone()
            .ok_or(IndexError::MissingCredential)
    }
}
