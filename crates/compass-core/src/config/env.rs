use super::Config;

impl Config {
    pub(crate) fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_server();
        self.apply_env_overrides_llm();
        self.apply_env_overrides_index();
    }

    fn apply_env_overrides_server(&mut self) {
        if let Ok(v) = std::env::var("COMPASS_BIND") {
            self.server.bind = v;
        }
        if let Ok(v) = std::env::var("COMPASS_PORT")
            && let Ok(port) = v.parse::<u16>()
        {
            self.server.port = port;
        }
        if let Ok(v) = std::env::var("COMPASS_RATE_LIMIT")
            && let Ok(limit) = v.parse::<u32>()
        {
            self.server.rate_limit = limit;
        }
        if let Ok(v) = std::env::var("COMPASS_MAX_BODY_SIZE")
            && let Ok(size) = v.parse::<usize>()
        {
            self.server.max_body_size = size;
        }
        if let Ok(v) = std::env::var("COMPASS_SQLITE_PATH") {
            self.storage.sqlite_path = v;
        }
        if let Ok(v) = std::env::var("COMPASS_REPOS_DIR") {
            self.storage.repos_dir = v;
        }
    }

    fn apply_env_overrides_llm(&mut self) {
        if let Ok(v) = std::env::var("COMPASS_LLM_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Ok(v) = std::env::var("COMPASS_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Ok(v) = std::env::var("COMPASS_LLM_EMBEDDING_MODEL") {
            self.llm.embedding_model = v;
        }
        if let Ok(v) = std::env::var("COMPASS_LLM_MAX_TOKENS") {
            if let Ok(n) = v.parse::<u32>() {
                self.llm.max_tokens = n;
            } else {
                tracing::warn!("ignoring invalid COMPASS_LLM_MAX_TOKENS value: {v}");
            }
        }
    }

    fn apply_env_overrides_index(&mut self) {
        if let Ok(v) = std::env::var("COMPASS_INDEX_CLONE_DEPTH")
            && let Ok(depth) = v.parse::<u32>()
        {
            self.index.clone_depth = depth;
        }
        if let Ok(v) = std::env::var("COMPASS_INDEX_MAX_EMBED_CHARS")
            && let Ok(n) = v.parse::<usize>()
        {
            self.index.max_embed_chars = n;
        }
        if let Ok(v) = std::env::var("COMPASS_INDEX_TOP_K")
            && let Ok(k) = v.parse::<usize>()
        {
            self.index.top_k = k;
        }
        if let Ok(v) = std::env::var("COMPASS_INDEX_HEARTBEAT_SECS")
            && let Ok(secs) = v.parse::<u64>()
        {
            self.index.heartbeat_secs = secs;
        }
        if let Ok(v) = std::env::var("COMPASS_INDEX_SKIP_EXTENSIONS") {
            self.index.skip_extensions = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
    }
}
