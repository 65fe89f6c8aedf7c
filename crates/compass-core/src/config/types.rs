use serde::{Deserialize, Serialize};

use crate::vault::Secret;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(skip)]
    pub secrets: ResolvedSecrets,
}

fn default_bind() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    8080
}

fn default_rate_limit() -> u32 {
    120
}

fn default_max_body_size() -> usize {
    1_048_576
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bearer token required on `/api` routes when set.
    #[serde(default, skip_serializing)]
    pub auth_token: Option<String>,
    /// Requests per minute per client IP; 0 disables the limit.
    #[serde(default = "default_rate_limit")]
    pub rate_limit: u32,
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            auth_token: None,
            rate_limit: default_rate_limit(),
            max_body_size: default_max_body_size(),
        }
    }
}

fn default_sqlite_path() -> String {
    "./data/compass.db".into()
}

fn default_repos_dir() -> String {
    "./data/repos".into()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,
    #[serde(default = "default_repos_dir")]
    pub repos_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_path: default_sqlite_path(),
            repos_dir: default_repos_dir(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}

fn default_model() -> String {
    "gpt-4o-mini".into()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}

fn default_max_tokens() -> u32 {
    1024
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            embedding_model: default_embedding_model(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_clone_depth() -> u32 {
    1
}

fn default_binary_threshold() -> u64 {
    compass_index::snapshot::DEFAULT_BINARY_THRESHOLD
}

fn default_max_embed_chars() -> usize {
    compass_index::builder::DEFAULT_MAX_EMBED_CHARS
}

fn default_top_k() -> usize {
    compass_index::retriever::DEFAULT_TOP_K
}

fn default_skip_extensions() -> Vec<String> {
    compass_index::builder::DEFAULT_SKIP_EXTENSIONS
        .iter()
        .map(|e| (*e).to_owned())
        .collect()
}

fn default_subscriber_capacity() -> usize {
    compass_index::hub::DEFAULT_CAPACITY
}

fn default_heartbeat_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IndexConfig {
    #[serde(default = "default_clone_depth")]
    pub clone_depth: u32,
    /// Files above this size are recorded as binary and cannot be viewed.
    #[serde(default = "default_binary_threshold")]
    pub binary_threshold_bytes: u64,
    #[serde(default = "default_max_embed_chars")]
    pub max_embed_chars: usize,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_skip_extensions")]
    pub skip_extensions: Vec<String>,
    #[serde(default = "default_subscriber_capacity")]
    pub subscriber_capacity: usize,
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            clone_depth: default_clone_depth(),
            binary_threshold_bytes: default_binary_threshold(),
            max_embed_chars: default_max_embed_chars(),
            top_k: default_top_k(),
            skip_extensions: default_skip_extensions(),
            subscriber_capacity: default_subscriber_capacity(),
            heartbeat_secs: default_heartbeat_secs(),
        }
    }
}

#[derive(Debug, Default)]
pub struct ResolvedSecrets {
    /// Process-wide fallback used when an owner has no stored key.
    pub openai_api_key: Option<Secret>,
}
