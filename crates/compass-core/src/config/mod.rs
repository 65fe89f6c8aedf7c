mod env;
mod types;

#[cfg(test)]
mod tests;

pub use types::*;

use std::path::Path;

use anyhow::{Context, bail};

use crate::vault::{Secret, VaultProvider};

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str::<Self>(&content).context("failed to parse config file")?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Reject values the pipeline cannot run with.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid field.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.max_body_size == 0 {
            bail!("server.max_body_size must be greater than 0");
        }
        if self.storage.sqlite_path.trim().is_empty() {
            bail!("storage.sqlite_path must not be empty");
        }
        if self.storage.repos_dir.trim().is_empty() {
            bail!("storage.repos_dir must not be empty");
        }
        if !self.llm.base_url.starts_with("http://") && !self.llm.base_url.starts_with("https://")
        {
            bail!("llm.base_url must be an http(s) URL, got {}", self.llm.base_url);
        }
        if self.index.clone_depth == 0 {
            bail!("index.clone_depth must be at least 1");
        }
        if self.index.max_embed_chars == 0 {
            bail!("index.max_embed_chars must be at least 1");
        }
        if self.index.top_k == 0 {
            bail!("index.top_k must be at least 1");
        }
        if self.index.subscriber_capacity == 0 {
            bail!("index.subscriber_capacity must be at least 1");
        }
        if self.index.heartbeat_secs == 0 {
            bail!("index.heartbeat_secs must be at least 1");
        }
        Ok(())
    }

    /// Resolve sensitive configuration values through the vault.
    ///
    /// # Errors
    ///
    /// Returns an error if the vault backend fails.
    pub async fn resolve_secrets(&mut self, vault: &dyn VaultProvider) -> anyhow::Result<()> {
        if let Some(val) = vault.get_secret("COMPASS_OPENAI_API_KEY").await? {
            self.secrets.openai_api_key = Some(Secret::new(val));
        } else if let Some(val) = vault.get_secret("OPENAI_API_KEY").await? {
            self.secrets.openai_api_key = Some(Secret::new(val));
        }
        if let Some(val) = vault.get_secret("COMPASS_GATEWAY_TOKEN").await? {
            self.server.auth_token = Some(val);
        }
        Ok(())
    }
}
