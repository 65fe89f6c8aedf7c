//! Ingestion, embedding, and retrieval pipeline.
//!
//! A project is snapshotted with a shallow clone, described by a file
//! manifest, embedded file by file in a background task, and queried by
//! ranking stored vectors against the embedded question. Build progress is
//! fanned out to live subscribers through the [`EventHub`](hub::EventHub).

pub mod builder;
pub mod credentials;
pub mod error;
pub mod hub;
pub mod retriever;
pub mod service;
pub mod session;
pub mod similarity;
pub mod snapshot;
pub mod tree;

pub use builder::{BuildConfig, BuildHandle, BuildReport, EmbeddingBuilder, FileOutcome};
pub use credentials::CredentialResolver;
pub use error::{IndexError, Result};
pub use hub::{EventHub, EventKind, ProgressEvent, Subscription};
pub use retriever::Retriever;
pub use service::{ImportOutcome, ProjectService};
pub use session::{EventSession, SessionFrame};
pub use snapshot::{GitFetcher, SnapshotReport, Snapshotter, SourceFetcher};
pub use tree::FileNode;
