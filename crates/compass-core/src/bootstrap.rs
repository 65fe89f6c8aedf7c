//! Application bootstrap: config resolution, store and service construction.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use compass_index::{
    BuildConfig, CredentialResolver, EmbeddingBuilder, EventHub, GitFetcher, ProjectService,
    Retriever, Snapshotter, SourceFetcher,
};
use compass_llm::{OpenAiFactory, ProviderFactory};
use compass_store::SqliteStore;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::vault::VaultProvider;

pub struct AppBuilder {
    config: Config,
    config_path: PathBuf,
}

impl AppBuilder {
    /// Load and validate the config, then resolve secrets through `vault`.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be parsed, fails validation, or
    /// the vault backend fails.
    pub async fn load(config_path: PathBuf, vault: &dyn VaultProvider) -> anyhow::Result<Self> {
        let mut config = Config::load(&config_path)?;
        config.validate()?;
        config.resolve_secrets(vault).await?;
        if config.secrets.openai_api_key.is_none() {
            tracing::warn!("no default API key configured; users must store their own");
        }
        Ok(Self {
            config,
            config_path,
        })
    }

    #[must_use]
    pub fn from_config(config: Config) -> Self {
        Self {
            config,
            config_path: PathBuf::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Open the `SQLite` store, creating its parent directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or database cannot be created or
    /// migrations fail.
    pub async fn build_store(&self) -> anyhow::Result<SqliteStore> {
        let path = &self.config.storage.sqlite_path;
        if path != ":memory:"
            && let Some(parent) = Path::new(path).parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let store = SqliteStore::new(path)
            .await
            .with_context(|| format!("failed to open database at {path}"))?;
        tracing::info!(path, "metadata store ready");
        Ok(store)
    }

    /// Provider factory for the configured OpenAI-compatible endpoint.
    #[must_use]
    pub fn build_factory(&self) -> Arc<dyn ProviderFactory> {
        let llm = &self.config.llm;
        Arc::new(OpenAiFactory::new(
            llm.base_url.clone(),
            llm.model.clone(),
            llm.embedding_model.clone(),
            llm.max_tokens,
        ))
    }

    /// Wire the service with a `git` fetcher and the configured provider.
    #[must_use]
    pub fn build_service(&self, store: SqliteStore, shutdown: CancellationToken) -> ProjectService {
        let fetcher = Arc::new(GitFetcher::new(self.config.index.clone_depth));
        self.build_service_with(store, fetcher, self.build_factory(), shutdown)
    }

    /// Wire the service from explicit collaborators.
    #[must_use]
    pub fn build_service_with(
        &self,
        store: SqliteStore,
        fetcher: Arc<dyn SourceFetcher>,
        factory: Arc<dyn ProviderFactory>,
        shutdown: CancellationToken,
    ) -> ProjectService {
        let index = &self.config.index;
        let hub = EventHub::new(index.subscriber_capacity);
        let credentials =
            CredentialResolver::new(store.clone(), self.config.secrets.openai_api_key.clone());

        let snapshotter = Snapshotter::new(
            store.clone(),
            fetcher,
            PathBuf::from(&self.config.storage.repos_dir),
        )
        .with_binary_threshold(index.binary_threshold_bytes);
        let builder = EmbeddingBuilder::new(
            store.clone(),
            hub.clone(),
            credentials.clone(),
            Arc::clone(&factory),
            BuildConfig::new(index.max_embed_chars, &index.skip_extensions),
        );
        let retriever = Retriever::new(store.clone(), credentials, factory, index.top_k);

        ProjectService::new(store, hub, snapshotter, builder, retriever, shutdown)
            .with_heartbeat(Duration::from_secs(index.heartbeat_secs))
    }
}

/// Priority: explicit CLI path > `COMPASS_CONFIG` env > `config/default.toml`.
#[must_use]
pub fn resolve_config_path(cli: Option<PathBuf>) -> PathBuf {
    if let Some(path) = cli {
        return path;
    }
    if let Ok(path) = std::env::var("COMPASS_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from("config/default.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::MockVaultProvider;
    use compass_llm::mock::{MockFactory, MockProvider};
    use compass_store::OwnerId;
    use serial_test::serial;

    #[test]
    #[serial]
    fn config_path_priority() {
        unsafe { std::env::remove_var("COMPASS_CONFIG") };
        assert_eq!(resolve_config_path(None), PathBuf::from("config/default.toml"));

        unsafe { std::env::set_var("COMPASS_CONFIG", "/etc/compass.toml") };
        assert_eq!(resolve_config_path(None), PathBuf::from("/etc/compass.toml"));
        assert_eq!(
            resolve_config_path(Some(PathBuf::from("cli.toml"))),
            PathBuf::from("cli.toml")
        );
        unsafe { std::env::remove_var("COMPASS_CONFIG") };
    }

    #[tokio::test]
    #[serial]
    async fn load_resolves_default_key() {
        let vault = MockVaultProvider::new().with_secret("OPENAI_API_KEY", "sk-env");
        let app = AppBuilder::load(PathBuf::from("/nonexistent/compass.toml"), &vault)
            .await
            .unwrap();
        assert_eq!(
            app.config().secrets.openai_api_key.as_ref().map(|s| s.expose()),
            Some("sk-env")
        );
    }

    #[tokio::test]
    async fn build_store_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.storage.sqlite_path = dir
            .path()
            .join("nested/compass.db")
            .to_string_lossy()
            .into_owned();
        let store = AppBuilder::from_config(config).build_store().await.unwrap();
        store.create_project(OwnerId(1), "p", "", "").await.unwrap();
        assert!(dir.path().join("nested/compass.db").exists());
    }

    #[tokio::test]
    async fn service_uses_default_key_from_config() {
        let mut config = Config::default();
        config.storage.sqlite_path = ":memory:".into();
        config.secrets.openai_api_key = Some(compass_llm::Secret::new("sk-default"));
        let app = AppBuilder::from_config(config);
        let store = app.build_store().await.unwrap();

        let factory = MockFactory::new(MockProvider::default());
        let service = app.build_service_with(
            store,
            Arc::new(GitFetcher::default()),
            Arc::new(factory.clone()),
            CancellationToken::new(),
        );
        service
            .create_project(OwnerId(1), "demo", "", "")
            .await
            .unwrap();
        service.ask(OwnerId(1), "demo", "hello?").await.unwrap();
        assert_eq!(factory.used_keys(), vec!["sk-default".to_string()]);
    }
}
