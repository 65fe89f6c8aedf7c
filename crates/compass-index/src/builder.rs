//! Background embedding build: walk the snapshot, embed each text file,
//! persist the vectors, and report progress through the hub.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use compass_llm::{AnyProvider, LlmProvider, ProviderFactory};
use compass_store::{Project, ProjectId, SqliteStore};
use serde::Serialize;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::credentials::CredentialResolver;
use crate::error::{IndexError, Result};
use crate::hub::{EventHub, EventKind, ProgressEvent};
use crate::snapshot::{relative_path, source_walker};

pub const DEFAULT_MAX_EMBED_CHARS: usize = 3000;

/// Extensions never sent to the embedding provider.
pub const DEFAULT_SKIP_EXTENSIONS: &[&str] = &["png", "exe"];

#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Content is truncated to this many characters before embedding.
    pub max_chars: usize,
    /// Lowercase extensions without the leading dot.
    pub skip_extensions: Vec<String>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            max_chars: DEFAULT_MAX_EMBED_CHARS,
            skip_extensions: DEFAULT_SKIP_EXTENSIONS
                .iter()
                .map(|e| (*e).to_owned())
                .collect(),
        }
    }
}

impl BuildConfig {
    #[must_use]
    pub fn new(max_chars: usize, skip_extensions: &[String]) -> Self {
        Self {
            max_chars: max_chars.max(1),
            skip_extensions: skip_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    fn skips(&self, path: &Path) -> bool {
        path.extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .is_some_and(|ext| self.skip_extensions.iter().any(|s| *s == ext))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    Embedded,
    Skipped(String),
    Failed(String),
}

/// Fold of per-file outcomes for one build.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildReport {
    pub embedded: usize,
    pub skipped: usize,
    pub failed: usize,
    /// `(path, reason)` for every failed file.
    pub failures: Vec<(String, String)>,
    pub duration_ms: u64,
}

impl BuildReport {
    fn record(&mut self, path: &str, outcome: FileOutcome) {
        match outcome {
            FileOutcome::Embedded => self.embedded += 1,
            FileOutcome::Skipped(_) => self.skipped += 1,
            FileOutcome::Failed(reason) => {
                self.failed += 1;
                self.failures.push((path.to_owned(), reason));
            }
        }
    }
}

/// Supervises one spawned build.
#[derive(Debug)]
pub struct BuildHandle {
    project: ProjectId,
    task: JoinHandle<Result<BuildReport>>,
}

impl BuildHandle {
    #[must_use]
    pub fn project(&self) -> ProjectId {
        self.project
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the build to finish.
    ///
    /// # Errors
    ///
    /// Returns the build's error, or [`IndexError::Other`] if the task panicked.
    pub async fn wait(self) -> Result<BuildReport> {
        self.task
            .await
            .map_err(|e| IndexError::Other(format!("build task failed: {e}")))?
    }
}

type LockMap = HashMap<ProjectId, Arc<tokio::sync::Mutex<()>>>;

#[derive(Clone)]
pub struct EmbeddingBuilder {
    store: SqliteStore,
    hub: EventHub,
    credentials: CredentialResolver,
    factory: Arc<dyn ProviderFactory>,
    config: BuildConfig,
    locks: Arc<Mutex<LockMap>>,
}

impl EmbeddingBuilder {
    #[must_use]
    pub fn new(
        store: SqliteStore,
        hub: EventHub,
        credentials: CredentialResolver,
        factory: Arc<dyn ProviderFactory>,
        config: BuildConfig,
    ) -> Self {
        Self {
            store,
            hub,
            credentials,
            factory,
            config,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Run [`build`](Self::build) on a background task.
    #[must_use]
    pub fn spawn(&self, project: Project, root: PathBuf, cancel: CancellationToken) -> BuildHandle {
        self.spawn_then(project, root, cancel, || {})
    }

    /// Like [`spawn`](Self::spawn), calling `on_finish` once the build ends.
    pub(crate) fn spawn_then(
        &self,
        project: Project,
        root: PathBuf,
        cancel: CancellationToken,
        on_finish: impl FnOnce() + Send + 'static,
    ) -> BuildHandle {
        let builder = self.clone();
        let id = project.id;
        let task = tokio::spawn(async move {
            let result = builder.build(&project, &root, &cancel).await;
            on_finish();
            result
        });
        BuildHandle { project: id, task }
    }

    /// Embed every eligible file under `root`, replacing the project's
    /// previous embeddings.
    ///
    /// Publishes `start` once a credential resolves, then `complete` or
    /// `error`. Per-file failures are counted in the report only.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::MissingCredential`], [`IndexError::Cancelled`],
    /// or a store error. Each is also published as an `error` event.
    pub async fn build(
        &self,
        project: &Project,
        root: &Path,
        cancel: &CancellationToken,
    ) -> Result<BuildReport> {
        let lock = self.project_lock(project.id);
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(IndexError::Cancelled),
            guard = lock.lock_owned() => {
                let result = self.run(project, root, cancel).await;
                drop(guard);
                result
            }
        };
        self.prune_lock(project.id);

        match &result {
            Ok(report) => {
                tracing::info!(
                    project = %project.id,
                    embedded = report.embedded,
                    skipped = report.skipped,
                    failed = report.failed,
                    duration_ms = report.duration_ms,
                    "embedding build complete"
                );
                self.publish(
                    project.id,
                    EventKind::Complete,
                    json!({
                        "message": "embedding build complete",
                        "project_id": project.id,
                        "embedded": report.embedded,
                        "skipped": report.skipped,
                        "failed": report.failed,
                        "duration_ms": report.duration_ms,
                    }),
                );
            }
            Err(e) => {
                tracing::error!(project = %project.id, "embedding build failed: {e}");
                self.publish(
                    project.id,
                    EventKind::Error,
                    json!({
                        "message": format!("embedding build failed: {e}"),
                        "project_id": project.id,
                        "error": e.to_string(),
                    }),
                );
            }
        }
        result
    }

    async fn run(
        &self,
        project: &Project,
        root: &Path,
        cancel: &CancellationToken,
    ) -> Result<BuildReport> {
        let start = Instant::now();
        let key = self.credentials.resolve(project.owner_id).await?;

        self.publish(
            project.id,
            EventKind::Start,
            json!({
                "message": "embedding build started",
                "project_id": project.id,
            }),
        );

        let cleared = self.store.clear_embeddings(project.id).await?;
        if cleared > 0 {
            tracing::debug!(project = %project.id, cleared, "cleared previous embeddings");
        }

        let walk_root = root.to_path_buf();
        let files = tokio::task::spawn_blocking(move || collect_files(&walk_root))
            .await
            .map_err(|e| IndexError::Other(format!("file walk panicked: {e}")))?;

        let provider = self.factory.create(&key);
        let total = files.len();
        tracing::info!(project = %project.id, total, "embedding build started");

        let mut report = BuildReport::default();
        for (i, path) in files.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(IndexError::Cancelled);
            }
            let rel = relative_path(root, path);
            let outcome = self
                .embed_file(&provider, project.id, path, &rel, cancel)
                .await?;
            match &outcome {
                FileOutcome::Embedded => tracing::debug!(
                    project = %project.id,
                    file = %rel,
                    progress = format_args!("{}/{total}", i + 1),
                    "embedded"
                ),
                FileOutcome::Skipped(reason) => {
                    tracing::debug!(project = %project.id, file = %rel, reason, "skipped");
                }
                FileOutcome::Failed(reason) => {
                    tracing::warn!(project = %project.id, file = %rel, reason, "embedding failed");
                }
            }
            report.record(&rel, outcome);
        }

        report.duration_ms = start.elapsed().as_millis().try_into().unwrap_or(u64::MAX);
        Ok(report)
    }

    /// Only cancellation escapes as an error; everything else is an outcome.
    async fn embed_file(
        &self,
        provider: &AnyProvider,
        project: ProjectId,
        path: &Path,
        rel: &str,
        cancel: &CancellationToken,
    ) -> Result<FileOutcome> {
        if self.config.skips(path) {
            return Ok(FileOutcome::Skipped("denylisted extension".into()));
        }

        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) => return Ok(FileOutcome::Failed(format!("read failed: {e}"))),
        };
        let Ok(text) = String::from_utf8(bytes) else {
            return Ok(FileOutcome::Skipped("not UTF-8 text".into()));
        };
        if text.trim().is_empty() {
            return Ok(FileOutcome::Skipped("empty".into()));
        }
        let content = truncate_chars(&text, self.config.max_chars);

        let vector = tokio::select! {
            res = provider.embed(content) => match res {
                Ok(v) => v,
                Err(e) => return Ok(FileOutcome::Failed(format!("embedding request failed: {e}"))),
            },
            () = cancel.cancelled() => return Err(IndexError::Cancelled),
        };

        match self
            .store
            .insert_embedding(project, rel, content, &vector)
            .await
        {
            Ok(_) => Ok(FileOutcome::Embedded),
            Err(e) => Ok(FileOutcome::Failed(format!("persist failed: {e}"))),
        }
    }

    fn project_lock(&self, project: ProjectId) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(project)
            .or_default()
            .clone()
    }

    /// Drop the project's lock entry unless another build still holds it.
    fn prune_lock(&self, project: ProjectId) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(&project)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&project);
        }
    }

    fn publish(&self, topic: ProjectId, kind: EventKind, payload: serde_json::Value) {
        self.hub.publish(&ProgressEvent::new(topic, kind, payload));
    }
}

fn collect_files(root: &Path) -> Vec<PathBuf> {
    source_walker(root)
        .build()
        .filter_map(|entry| match entry {
            Ok(e) if e.file_type().is_some_and(|ft| ft.is_file()) => Some(e.into_path()),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!("skipping unreadable entry: {e}");
                None
            }
        })
        .collect()
}

/// Longest prefix of `text` holding at most `max` characters.
fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
