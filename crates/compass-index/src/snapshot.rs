//! Snapshot store: shallow clone into a per-project directory plus manifest.

use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Instant, UNIX_EPOCH};

use compass_store::{ManifestEntry, Project, SqliteStore};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::{IndexError, Result};

/// Files above this size are classified as binary.
pub const DEFAULT_BINARY_THRESHOLD: u64 = 5 * 1024 * 1024;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Materializes a remote repository into a local directory.
pub trait SourceFetcher: Send + Sync {
    /// Copy `url` into `dest`, which does not exist yet.
    fn fetch<'a>(
        &'a self,
        url: &'a str,
        dest: &'a Path,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<()>>;
}

/// Shallow `git clone` through the system `git` binary.
#[derive(Debug, Clone)]
pub struct GitFetcher {
    depth: u32,
}

impl GitFetcher {
    #[must_use]
    pub fn new(depth: u32) -> Self {
        Self {
            depth: depth.max(1),
        }
    }
}

impl Default for GitFetcher {
    fn default() -> Self {
        Self::new(1)
    }
}

impl SourceFetcher for GitFetcher {
    fn fetch<'a>(
        &'a self,
        url: &'a str,
        dest: &'a Path,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let child = Command::new("git")
                .arg("clone")
                .arg("--depth")
                .arg(self.depth.to_string())
                .arg("--")
                .arg(url)
                .arg(dest)
                .env("GIT_TERMINAL_PROMPT", "0")
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| IndexError::Ingest(format!("failed to run git: {e}")))?;

            tokio::select! {
                out = child.wait_with_output() => {
                    let out = out.map_err(|e| IndexError::Ingest(format!("git clone failed: {e}")))?;
                    if out.status.success() {
                        Ok(())
                    } else {
                        let stderr = String::from_utf8_lossy(&out.stderr);
                        Err(IndexError::Ingest(format!(
                            "git clone exited with {}: {}",
                            out.status,
                            stderr.trim()
                        )))
                    }
                }
                () = cancel.cancelled() => {
                    tracing::info!(url, "clone cancelled");
                    Err(IndexError::Cancelled)
                }
            }
        })
    }
}

/// Outcome of a successful ingest.
#[derive(Debug, Clone)]
pub struct SnapshotReport {
    pub root: PathBuf,
    pub files: usize,
    pub duration_ms: u64,
}

/// Owns the repository directories and the manifest of each project.
#[derive(Clone)]
pub struct Snapshotter {
    store: SqliteStore,
    fetcher: Arc<dyn SourceFetcher>,
    repos_dir: PathBuf,
    binary_threshold: u64,
}

impl Snapshotter {
    #[must_use]
    pub fn new(store: SqliteStore, fetcher: Arc<dyn SourceFetcher>, repos_dir: PathBuf) -> Self {
        Self {
            store,
            fetcher,
            repos_dir,
            binary_threshold: DEFAULT_BINARY_THRESHOLD,
        }
    }

    #[must_use]
    pub fn with_binary_threshold(mut self, bytes: u64) -> Self {
        self.binary_threshold = bytes;
        self
    }

    #[must_use]
    pub fn binary_threshold(&self) -> u64 {
        self.binary_threshold
    }

    /// Directory exclusively owned by the project: `<repos>/<owner>/<project>`.
    #[must_use]
    pub fn project_dir(&self, project: &Project) -> PathBuf {
        self.repos_dir
            .join(project.owner_id.to_string())
            .join(project.id.to_string())
    }

    /// Replace the project's snapshot and manifest with a fresh clone.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Ingest`] if the clone or walk fails,
    /// [`IndexError::Cancelled`] if `cancel` fires, or a store error.
    pub async fn ingest(
        &self,
        project: &Project,
        cancel: &CancellationToken,
    ) -> Result<SnapshotReport> {
        let start = Instant::now();
        let url = project.repo_url.trim();
        if url.is_empty() {
            return Err(IndexError::InvalidInput("project has no repository URL".into()));
        }
        if cancel.is_cancelled() {
            return Err(IndexError::Cancelled);
        }

        let root = self.project_dir(project);
        match tokio::fs::remove_dir_all(&root).await {
            Ok(()) => tracing::debug!(project = %project.id, "removed previous snapshot"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(IndexError::Ingest(format!(
                    "cannot clear {}: {e}",
                    root.display()
                )));
            }
        }
        if let Some(parent) = root.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                IndexError::Ingest(format!("cannot create {}: {e}", parent.display()))
            })?;
        }

        tracing::info!(project = %project.id, url, "cloning repository");
        self.fetcher.fetch(url, &root, cancel).await?;

        let walk_root = root.clone();
        let threshold = self.binary_threshold;
        let walk_cancel = cancel.clone();
        let entries = tokio::task::spawn_blocking(move || {
            walk_manifest(&walk_root, threshold, &walk_cancel)
        })
        .await
        .map_err(|e| IndexError::Other(format!("manifest walk panicked: {e}")))??;

        let files = self.store.replace_manifest(project.id, &entries).await?;
        let duration_ms = start.elapsed().as_millis().try_into().unwrap_or(u64::MAX);
        tracing::info!(project = %project.id, files, duration_ms, "snapshot ingested");

        Ok(SnapshotReport {
            root,
            files,
            duration_ms,
        })
    }
}

/// Describe every non-hidden file below `root`.
///
/// # Errors
///
/// Returns [`IndexError::Ingest`] on an unreadable entry and
/// [`IndexError::Cancelled`] if `cancel` fires mid-walk.
pub fn walk_manifest(
    root: &Path,
    binary_threshold: u64,
    cancel: &CancellationToken,
) -> Result<Vec<ManifestEntry>> {
    let mut entries = Vec::new();
    for entry in source_walker(root).build() {
        if cancel.is_cancelled() {
            return Err(IndexError::Cancelled);
        }
        let entry = entry.map_err(|e| IndexError::Ingest(format!("walk failed: {e}")))?;
        if !entry.file_type().is_some_and(|ft| ft.is_file()) {
            continue;
        }
        let meta = entry
            .metadata()
            .map_err(|e| IndexError::Ingest(format!("stat failed: {e}")))?;
        let size = meta.len();
        let last_modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX));

        entries.push(ManifestEntry {
            file_path: relative_path(root, entry.path()),
            file_type: extension(entry.path()),
            size: i64::try_from(size).unwrap_or(i64::MAX),
            last_modified,
            is_text: size <= binary_threshold,
        });
    }
    Ok(entries)
}

/// Walker that skips hidden entries and nothing else.
pub(crate) fn source_walker(root: &Path) -> ignore::WalkBuilder {
    let mut builder = ignore::WalkBuilder::new(root);
    builder
        .hidden(true)
        .ignore(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .parents(false)
        .follow_links(false)
        .sort_by_file_name(std::cmp::Ord::cmp);
    builder
}

pub(crate) fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// `/`-separated path of `path` relative to `root`.
pub(crate) fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn extension(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Join a client-supplied relative path onto `root`, refusing escapes.
pub(crate) fn resolve_relative(root: &Path, relative: &str) -> Result<PathBuf> {
    let rel = Path::new(relative.trim_start_matches('/'));
    if rel.as_os_str().is_empty() {
        return Err(IndexError::InvalidPath("empty path".into()));
    }
    if rel
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(IndexError::InvalidPath(relative.to_owned()));
    }
    Ok(root.join(rel))
}

/// Canonicalize `path` and require it to stay below `root` once symlinks
/// are resolved.
pub(crate) fn confine(root: &Path, path: &Path, relative: &str) -> Result<PathBuf> {
    let not_found = |e: std::io::Error| {
        if e.kind() == std::io::ErrorKind::NotFound {
            IndexError::FileNotFound(relative.to_owned())
        } else {
            e.into()
        }
    };
    let base = std::fs::canonicalize(root).map_err(not_found)?;
    let real = std::fs::canonicalize(path).map_err(not_found)?;
    if real.starts_with(&base) {
        Ok(real)
    } else {
        tracing::warn!(path = relative, "path resolves outside the snapshot");
        Err(IndexError::InvalidPath(relative.to_owned()))
    }
}

/// Read one snapshot file as text.
///
/// # Errors
///
/// Returns [`IndexError::InvalidPath`] for escaping paths (symlinks
/// included) and directories, [`IndexError::FileNotFound`] if absent, and
/// [`IndexError::FileTooLarge`] above `limit` bytes.
pub async fn read_file(root: &Path, relative: &str, limit: u64) -> Result<String> {
    let joined = resolve_relative(root, relative)?;
    let root = root.to_path_buf();
    let rel = relative.to_owned();
    let path = tokio::task::spawn_blocking(move || confine(&root, &joined, &rel))
        .await
        .map_err(|e| IndexError::Other(format!("path check failed: {e}")))??;
    let meta = tokio::fs::metadata(&path).await?;
    if meta.is_dir() {
        return Err(IndexError::InvalidPath(format!("{relative} is a directory")));
    }
    if meta.len() > limit {
        return Err(IndexError::FileTooLarge {
            size: meta.len(),
            limit,
        });
    }
    let bytes = tokio::fs::read(&path).await?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
