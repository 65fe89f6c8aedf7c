//! Owner-scoped facade over the pipeline, used by the HTTP layer.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use compass_llm::Secret;
use compass_store::{ManifestRow, OwnerId, Project, ProjectId, ProjectUpdate, SqliteStore};
use tokio_util::sync::CancellationToken;

use crate::builder::{BuildHandle, EmbeddingBuilder};
use crate::error::{IndexError, Result};
use crate::hub::EventHub;
use crate::retriever::Retriever;
use crate::session::{DEFAULT_HEARTBEAT, EventSession};
use crate::snapshot::{Snapshotter, read_file};
use crate::tree::{FileNode, build_file_tree};

/// Result of a successful import. The build keeps running in the background.
#[derive(Debug)]
pub struct ImportOutcome {
    pub path: PathBuf,
    pub files: usize,
    pub build: BuildHandle,
}

/// Cancellation handle of the running import or build of one project.
struct Job {
    seq: u64,
    token: CancellationToken,
}

type JobMap = HashMap<ProjectId, Job>;

#[derive(Clone)]
pub struct ProjectService {
    store: SqliteStore,
    hub: EventHub,
    snapshotter: Snapshotter,
    builder: EmbeddingBuilder,
    retriever: Retriever,
    jobs: Arc<Mutex<JobMap>>,
    next_job: Arc<AtomicU64>,
    shutdown: CancellationToken,
    heartbeat: Duration,
}

impl ProjectService {
    #[must_use]
    pub fn new(
        store: SqliteStore,
        hub: EventHub,
        snapshotter: Snapshotter,
        builder: EmbeddingBuilder,
        retriever: Retriever,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            hub,
            snapshotter,
            builder,
            retriever,
            jobs: Arc::new(Mutex::new(HashMap::new())),
            next_job: Arc::new(AtomicU64::new(0)),
            shutdown,
            heartbeat: DEFAULT_HEARTBEAT,
        }
    }

    #[must_use]
    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    #[must_use]
    pub fn hub(&self) -> &EventHub {
        &self.hub
    }

    #[must_use]
    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    /// # Errors
    ///
    /// Returns [`IndexError::InvalidInput`] for a blank name or a duplicate
    /// store error if the owner already uses it.
    pub async fn create_project(
        &self,
        owner: OwnerId,
        name: &str,
        repo_url: &str,
        description: &str,
    ) -> Result<Project> {
        let name = validate_name(name)?;
        let project = self
            .store
            .create_project(owner, name, repo_url.trim(), description)
            .await?;
        tracing::info!(project = %project.id, owner = %owner, name, "project created");
        Ok(project)
    }

    /// # Errors
    ///
    /// Returns a store error if the query fails.
    pub async fn list_projects(&self, owner: OwnerId) -> Result<Vec<Project>> {
        Ok(self.store.list_projects(owner).await?)
    }

    /// Look up a project owned by `owner`.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::ProjectNotFound`] if it does not exist or belongs
    /// to someone else.
    pub async fn project(&self, owner: OwnerId, name: &str) -> Result<Project> {
        self.store
            .find_project(owner, name)
            .await?
            .ok_or(IndexError::ProjectNotFound)
    }

    /// # Errors
    ///
    /// Returns [`IndexError::ProjectNotFound`], [`IndexError::InvalidInput`]
    /// for a blank new name, or a duplicate store error.
    pub async fn update_project(
        &self,
        owner: OwnerId,
        name: &str,
        mut update: ProjectUpdate,
    ) -> Result<Project> {
        if let Some(new_name) = update.name.as_deref() {
            update.name = Some(validate_name(new_name)?.to_owned());
        }
        let project = self.project(owner, name).await?;
        self.store
            .update_project(project.id, &update)
            .await?
            .ok_or(IndexError::ProjectNotFound)
    }

    /// Delete the project, its records, and its snapshot directory.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::ProjectNotFound`] or a store error.
    pub async fn delete_project(&self, owner: OwnerId, name: &str) -> Result<()> {
        let project = self.project(owner, name).await?;
        self.cancel_job(project.id);
        self.store.delete_project(project.id).await?;

        let dir = self.snapshotter.project_dir(&project);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(project = %project.id, "failed to remove snapshot: {e}"),
        }
        tracing::info!(project = %project.id, "project deleted");
        Ok(())
    }

    /// Re-ingest the project and start an embedding build in the background.
    ///
    /// Any in-flight job for the same project is cancelled first.
    ///
    /// # Errors
    ///
    /// Returns ingestion errors synchronously. Build errors only reach the
    /// event stream and the returned [`BuildHandle`].
    pub async fn import(&self, owner: OwnerId, name: &str) -> Result<ImportOutcome> {
        let project = self.project(owner, name).await?;
        let cancel = self.shutdown.child_token();
        let seq = self.next_job.fetch_add(1, Ordering::Relaxed);
        let job = Job {
            seq,
            token: cancel.clone(),
        };
        if let Some(previous) = self
            .jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(project.id, job)
        {
            tracing::info!(project = %project.id, "cancelling previous job");
            previous.token.cancel();
        }

        let report = match self.snapshotter.ingest(&project, &cancel).await {
            Ok(report) => report,
            Err(e) => {
                finish_job(&self.jobs, project.id, seq);
                return Err(e);
            }
        };
        let jobs = Arc::clone(&self.jobs);
        let id = project.id;
        let build = self.builder.spawn_then(project, report.root.clone(), cancel, move || {
            finish_job(&jobs, id, seq);
        });
        Ok(ImportOutcome {
            path: report.root,
            files: report.files,
            build,
        })
    }

    /// Cancel the in-flight import or build of a project.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::ProjectNotFound`] or a store error.
    pub async fn cancel(&self, owner: OwnerId, name: &str) -> Result<bool> {
        let project = self.project(owner, name).await?;
        Ok(self.cancel_job(project.id))
    }

    fn cancel_job(&self, project: ProjectId) -> bool {
        let token = self
            .jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&project);
        match token {
            Some(Job { token, .. }) if !token.is_cancelled() => {
                token.cancel();
                tracing::info!(project = %project, "job cancelled");
                true
            }
            _ => false,
        }
    }

    /// Cancel every in-flight job.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// # Errors
    ///
    /// Returns [`IndexError::ProjectNotFound`] or a store error.
    pub async fn manifest(&self, owner: OwnerId, name: &str) -> Result<Vec<ManifestRow>> {
        let project = self.project(owner, name).await?;
        Ok(self.store.manifest(project.id).await?)
    }

    /// File tree of the project's snapshot, optionally below `path`.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::ProjectNotFound`] or [`IndexError::InvalidPath`].
    pub async fn files(&self, owner: OwnerId, name: &str, path: &str) -> Result<Vec<FileNode>> {
        let project = self.project(owner, name).await?;
        let root = self.snapshotter.project_dir(&project);
        let path = path.to_owned();
        tokio::task::spawn_blocking(move || build_file_tree(&root, &path))
            .await
            .map_err(|e| IndexError::Other(format!("tree walk panicked: {e}")))?
    }

    /// # Errors
    ///
    /// Returns [`IndexError::ProjectNotFound`], [`IndexError::InvalidPath`],
    /// [`IndexError::FileNotFound`], or [`IndexError::FileTooLarge`].
    pub async fn content(&self, owner: OwnerId, name: &str, path: &str) -> Result<String> {
        let project = self.project(owner, name).await?;
        let root = self.snapshotter.project_dir(&project);
        read_file(&root, path, self.snapshotter.binary_threshold()).await
    }

    /// # Errors
    ///
    /// See [`Retriever::answer`].
    pub async fn ask(&self, owner: OwnerId, name: &str, question: &str) -> Result<String> {
        let project = self.project(owner, name).await?;
        self.retriever.answer(&project, question).await
    }

    /// Open an event session on the project's topic.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::ProjectNotFound`] or a store error.
    pub async fn events(&self, owner: OwnerId, name: &str) -> Result<EventSession> {
        let project = self.project(owner, name).await?;
        Ok(EventSession::new(
            self.hub.subscribe(project.id),
            self.heartbeat,
            self.shutdown.clone(),
        ))
    }

    /// Masked form of the owner's stored key, if any.
    ///
    /// # Errors
    ///
    /// Returns a store error if the lookup fails.
    pub async fn api_key(&self, owner: OwnerId) -> Result<Option<String>> {
        Ok(self
            .store
            .api_key(owner)
            .await?
            .map(|k| Secret::new(k).masked()))
    }

    /// # Errors
    ///
    /// Returns [`IndexError::InvalidInput`] for a blank key or a store error.
    pub async fn set_api_key(&self, owner: OwnerId, key: &str) -> Result<()> {
        let key = key.trim();
        if key.is_empty() {
            return Err(IndexError::InvalidInput("API key must not be empty".into()));
        }
        self.store.set_api_key(owner, key).await?;
        tracing::info!(owner = %owner, "API key updated");
        Ok(())
    }

    /// # Errors
    ///
    /// Returns a store error if the delete fails.
    pub async fn delete_api_key(&self, owner: OwnerId) -> Result<bool> {
        Ok(self.store.delete_api_key(owner).await?)
    }
}

/// Forget a finished job unless a newer one replaced it.
fn finish_job(jobs: &Mutex<JobMap>, project: ProjectId, seq: u64) {
    let mut jobs = jobs.lock().unwrap_or_else(PoisonError::into_inner);
    if jobs.get(&project).is_some_and(|job| job.seq == seq) {
        jobs.remove(&project);
    }
}

fn validate_name(name: &str) -> Result<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(IndexError::InvalidInput("project name is required".into()));
    }
    if name.contains('/') || name.contains('\\') {
        return Err(IndexError::InvalidInput(
            "project name must not contain path separators".into(),
        ));
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::BuildConfig;
    use crate::credentials::CredentialResolver;
    use crate::hub::EventKind;
    use crate::retriever::DEFAULT_TOP_K;
    use crate::snapshot::tests::{FixtureFetcher, scenario_files};
    use compass_llm::mock::{MockFactory, MockProvider};
    use compass_store::StoreError;

    struct Fixture {
        service: ProjectService,
        factory: MockFactory,
        _dir: tempfile::TempDir,
    }

    async fn fixture(default_key: Option<&str>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::new(":memory:").await.unwrap();
        let hub = EventHub::default();
        let files = scenario_files();
        let borrowed: Vec<(&str, &[u8])> = files.iter().map(|(p, c)| (*p, c.as_slice())).collect();
        let snapshotter = Snapshotter::new(
            store.clone(),
            Arc::new(FixtureFetcher::with_files(&borrowed)),
            dir.path().join("repos"),
        );
        let factory = MockFactory::new(MockProvider::default());
        let credentials = CredentialResolver::new(store.clone(), default_key.map(Secret::new));
        let builder = EmbeddingBuilder::new(
            store.clone(),
            hub.clone(),
            credentials.clone(),
            Arc::new(factory.clone()),
            BuildConfig::default(),
        );
        let retriever = Retriever::new(
            store.clone(),
            credentials,
            Arc::new(factory.clone()),
            DEFAULT_TOP_K,
        );
        let service = ProjectService::new(
            store,
            hub,
            snapshotter,
            builder,
            retriever,
            CancellationToken::new(),
        );
        Fixture {
            service,
            factory,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn import_ingests_and_builds() {
        let f = fixture(Some("k")).await;
        f.service
            .create_project(OwnerId(1), "demo", "https://example.com/demo.git", "")
            .await
            .unwrap();

        let outcome = f.service.import(OwnerId(1), "demo").await.unwrap();
        assert_eq!(outcome.files, 2);
        let report = outcome.build.wait().await.unwrap();
        assert_eq!(report.embedded, 2);

        let manifest = f.service.manifest(OwnerId(1), "demo").await.unwrap();
        let paths: Vec<&str> = manifest.iter().map(|r| r.file_path.as_str()).collect();
        assert_eq!(paths, vec!["a.go", "sub/b.md"]);

        let tree = f.service.files(OwnerId(1), "demo", "").await.unwrap();
        assert_eq!(tree[0].title, "sub");
        assert_eq!(tree[1].title, "a.go");

        let content = f.service.content(OwnerId(1), "demo", "sub/b.md").await.unwrap();
        assert_eq!(content.len(), 2048);

        let answer = f.service.ask(OwnerId(1), "demo", "what?").await.unwrap();
        assert_eq!(answer, "mock response");
    }

    #[tokio::test]
    async fn import_without_credential_still_succeeds() {
        let f = fixture(None).await;
        f.service
            .create_project(OwnerId(1), "demo", "https://example.com/demo.git", "")
            .await
            .unwrap();
        let mut session = f.service.events(OwnerId(1), "demo").await.unwrap();
        assert_eq!(session.next_frame().await.unwrap().event, "connected");

        let outcome = f.service.import(OwnerId(1), "demo").await.unwrap();
        assert_eq!(outcome.files, 2);
        assert!(matches!(
            outcome.build.wait().await.unwrap_err(),
            IndexError::MissingCredential
        ));

        let frame = session.next_frame().await.unwrap();
        assert_eq!(frame.event, EventKind::Error.as_str());
        let project = f.service.project(OwnerId(1), "demo").await.unwrap();
        assert_eq!(f.service.store().count_embeddings(project.id).await.unwrap(), 0);
        assert_eq!(f.factory.provider.embed_calls(), 0);
    }

    #[tokio::test]
    async fn projects_are_owner_scoped() {
        let f = fixture(Some("k")).await;
        f.service
            .create_project(OwnerId(1), "demo", "https://x", "")
            .await
            .unwrap();
        assert!(matches!(
            f.service.project(OwnerId(2), "demo").await.unwrap_err(),
            IndexError::ProjectNotFound
        ));
        assert!(matches!(
            f.service.import(OwnerId(2), "demo").await.unwrap_err(),
            IndexError::ProjectNotFound
        ));
        assert!(matches!(
            f.service.create_project(OwnerId(1), "demo", "", "").await.unwrap_err(),
            IndexError::Store(StoreError::Duplicate(_))
        ));
        assert!(matches!(
            f.service.create_project(OwnerId(1), " ", "", "").await.unwrap_err(),
            IndexError::InvalidInput(_)
        ));
    }

    #[tokio::test]
    async fn update_and_delete() {
        let f = fixture(Some("k")).await;
        f.service
            .create_project(OwnerId(1), "demo", "https://x", "")
            .await
            .unwrap();
        let updated = f
            .service
            .update_project(
                OwnerId(1),
                "demo",
                ProjectUpdate {
                    name: Some("renamed".into()),
                    ..ProjectUpdate::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.name, "renamed");

        f.service.import(OwnerId(1), "renamed").await.unwrap();
        f.service.delete_project(OwnerId(1), "renamed").await.unwrap();
        assert!(f.service.list_projects(OwnerId(1)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reimport_cancels_previous_job() {
        let f = fixture(Some("k")).await;
        f.service
            .create_project(OwnerId(1), "demo", "https://x", "")
            .await
            .unwrap();
        let first = f.service.import(OwnerId(1), "demo").await.unwrap();
        let second = f.service.import(OwnerId(1), "demo").await.unwrap();
        // The first build either finished already or was cancelled.
        let _ = first.build.wait().await;
        assert_eq!(second.build.wait().await.unwrap().embedded, 2);
        assert!(f.service.jobs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn finished_jobs_are_forgotten() {
        let f = fixture(Some("k")).await;
        f.service
            .create_project(OwnerId(1), "demo", "https://x", "")
            .await
            .unwrap();
        let outcome = f.service.import(OwnerId(1), "demo").await.unwrap();
        outcome.build.wait().await.unwrap();

        assert!(f.service.jobs.lock().unwrap().is_empty());
        assert!(!f.service.cancel(OwnerId(1), "demo").await.unwrap());
    }

    #[tokio::test]
    async fn failed_ingest_leaves_no_job() {
        let f = fixture(Some("k")).await;
        f.service
            .create_project(OwnerId(1), "demo", "", "")
            .await
            .unwrap();
        assert!(f.service.import(OwnerId(1), "demo").await.is_err());
        assert!(f.service.jobs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn shutdown_ends_event_sessions() {
        let f = fixture(Some("k")).await;
        f.service
            .create_project(OwnerId(1), "demo", "https://x", "")
            .await
            .unwrap();
        let mut session = f.service.events(OwnerId(1), "demo").await.unwrap();
        assert_eq!(session.next_frame().await.unwrap().event, "connected");

        f.service.shutdown();
        let frame = tokio::time::timeout(Duration::from_secs(1), session.next_frame())
            .await
            .unwrap();
        assert!(frame.is_none());
    }

    #[tokio::test]
    async fn api_key_masked_round_trip() {
        let f = fixture(None).await;
        assert!(f.service.api_key(OwnerId(1)).await.unwrap().is_none());
        f.service
            .set_api_key(OwnerId(1), "sk-abcdefghijklmnop")
            .await
            .unwrap();
        assert_eq!(
            f.service.api_key(OwnerId(1)).await.unwrap().as_deref(),
            Some("sk-a****mnop")
        );
        assert!(f.service.delete_api_key(OwnerId(1)).await.unwrap());
        assert!(matches!(
            f.service.set_api_key(OwnerId(1), "  ").await.unwrap_err(),
            IndexError::InvalidInput(_)
        ));
    }
}
