use std::io::Write;

use serial_test::serial;

use super::*;
use crate::vault::MockVaultProvider;

const ENV_KEYS: [&str; 16] = [
    "COMPASS_BIND",
    "COMPASS_PORT",
    "COMPASS_RATE_LIMIT",
    "COMPASS_MAX_BODY_SIZE",
    "COMPASS_SQLITE_PATH",
    "COMPASS_REPOS_DIR",
    "COMPASS_LLM_BASE_URL",
    "COMPASS_LLM_MODEL",
    "COMPASS_LLM_EMBEDDING_MODEL",
    "COMPASS_LLM_MAX_TOKENS",
    "COMPASS_INDEX_CLONE_DEPTH",
    "COMPASS_INDEX_MAX_EMBED_CHARS",
    "COMPASS_INDEX_TOP_K",
    "COMPASS_INDEX_HEARTBEAT_SECS",
    "COMPASS_INDEX_SKIP_EXTENSIONS",
    "COMPASS_GATEWAY_TOKEN",
];

fn clear_env() {
    for key in ENV_KEYS {
        unsafe { std::env::remove_var(key) };
    }
}

#[test]
#[serial]
fn defaults_when_file_missing() {
    clear_env();
    let config = Config::load(Path::new("/nonexistent/compass.toml")).unwrap();
    assert_eq!(config.server.bind, "127.0.0.1");
    assert_eq!(config.server.port, 8080);
    assert_eq!(config.server.rate_limit, 120);
    assert_eq!(config.server.max_body_size, 1_048_576);
    assert!(config.server.auth_token.is_none());
    assert_eq!(config.storage.sqlite_path, "./data/compass.db");
    assert_eq!(config.storage.repos_dir, "./data/repos");
    assert_eq!(config.llm.base_url, "https://api.openai.com/v1");
    assert_eq!(config.llm.model, "gpt-4o-mini");
    assert_eq!(config.llm.embedding_model, "text-embedding-3-small");
    assert_eq!(config.index.clone_depth, 1);
    assert_eq!(config.index.binary_threshold_bytes, 5 * 1024 * 1024);
    assert_eq!(config.index.max_embed_chars, 3000);
    assert_eq!(config.index.top_k, 3);
    assert_eq!(config.index.skip_extensions, vec!["png", "exe"]);
    assert_eq!(config.index.subscriber_capacity, 10);
    assert_eq!(config.index.heartbeat_secs, 30);
    config.validate().unwrap();
}

#[test]
#[serial]
fn parses_partial_file() {
    clear_env();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[server]
port = 9090

[llm]
model = "gpt-4.1"

[index]
top_k = 5
skip_extensions = ["png", "jpg"]
"#
    )
    .unwrap();

    let config = Config::load(file.path()).unwrap();
    assert_eq!(config.server.port, 9090);
    assert_eq!(config.server.bind, "127.0.0.1");
    assert_eq!(config.llm.model, "gpt-4.1");
    assert_eq!(config.llm.max_tokens, 1024);
    assert_eq!(config.index.top_k, 5);
    assert_eq!(config.index.skip_extensions, vec!["png", "jpg"]);
}

#[test]
#[serial]
fn invalid_toml_is_an_error() {
    clear_env();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "[server\nport = ").unwrap();
    assert!(Config::load(file.path()).is_err());
}

#[test]
#[serial]
fn env_overrides_apply() {
    clear_env();
    unsafe {
        std::env::set_var("COMPASS_PORT", "7000");
        std::env::set_var("COMPASS_SQLITE_PATH", "/tmp/c.db");
        std::env::set_var("COMPASS_LLM_BASE_URL", "http://localhost:11434/v1");
        std::env::set_var("COMPASS_INDEX_TOP_K", "7");
        std::env::set_var("COMPASS_INDEX_SKIP_EXTENSIONS", "png, exe ,zip");
    }
    let config = Config::load(Path::new("/nonexistent/compass.toml")).unwrap();
    clear_env();

    assert_eq!(config.server.port, 7000);
    assert_eq!(config.storage.sqlite_path, "/tmp/c.db");
    assert_eq!(config.llm.base_url, "http://localhost:11434/v1");
    assert_eq!(config.index.top_k, 7);
    assert_eq!(config.index.skip_extensions, vec!["png", "exe", "zip"]);
}

#[test]
#[serial]
fn invalid_env_values_ignored() {
    clear_env();
    unsafe {
        std::env::set_var("COMPASS_PORT", "not-a-port");
        std::env::set_var("COMPASS_LLM_MAX_TOKENS", "lots");
    }
    let config = Config::load(Path::new("/nonexistent/compass.toml")).unwrap();
    clear_env();
    assert_eq!(config.server.port, 8080);
    assert_eq!(config.llm.max_tokens, 1024);
}

#[test]
fn validate_rejects_bad_values() {
    let mut config = Config::default();
    config.index.top_k = 0;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.llm.base_url = "ftp://example.com".into();
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.index.clone_depth = 0;
    assert!(config.validate().is_err());
}

#[tokio::test]
async fn resolve_secrets_prefers_prefixed_key() {
    let vault = MockVaultProvider::new()
        .with_secret("COMPASS_OPENAI_API_KEY", "sk-compass")
        .with_secret("OPENAI_API_KEY", "sk-plain")
        .with_secret("COMPASS_GATEWAY_TOKEN", "tok");
    let mut config = Config::default();
    config.resolve_secrets(&vault).await.unwrap();
    assert_eq!(
        config.secrets.openai_api_key.as_ref().map(Secret::expose),
        Some("sk-compass")
    );
    assert_eq!(config.server.auth_token.as_deref(), Some("tok"));
}

#[tokio::test]
async fn resolve_secrets_falls_back_to_plain_key() {
    let vault = MockVaultProvider::new().with_secret("OPENAI_API_KEY", "sk-plain");
    let mut config = Config::default();
    config.resolve_secrets(&vault).await.unwrap();
    assert_eq!(
        config.secrets.openai_api_key.as_ref().map(Secret::expose),
        Some("sk-plain")
    );
    assert!(config.server.auth_token.is_none());
}

#[test]
fn auth_token_not_serialized() {
    let mut config = Config::default();
    config.server.auth_token = Some("secret".into());
    let out = toml::to_string(&config).unwrap();
    assert!(!out.contains("secret"));
}
