//! Question answering over a project's stored embeddings.

use std::fmt::Write;
use std::sync::Arc;

use compass_llm::{LlmProvider, Message, ProviderFactory};
use compass_store::{EmbeddingRow, Project, SqliteStore};

use crate::credentials::CredentialResolver;
use crate::error::{IndexError, Result};
use crate::similarity::cosine_similarity;

pub const DEFAULT_TOP_K: usize = 3;

pub const PERSONA: &str = "You are an expert in code and software architecture.";

/// Stored chunk with its similarity to the question.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub file_path: String,
    pub content: String,
    pub score: f64,
}

#[derive(Clone)]
pub struct Retriever {
    store: SqliteStore,
    credentials: CredentialResolver,
    factory: Arc<dyn ProviderFactory>,
    top_k: usize,
}

impl Retriever {
    #[must_use]
    pub fn new(
        store: SqliteStore,
        credentials: CredentialResolver,
        factory: Arc<dyn ProviderFactory>,
        top_k: usize,
    ) -> Self {
        Self {
            store,
            credentials,
            factory,
            top_k: top_k.max(1),
        }
    }

    /// Answer `question` from the project's most similar chunks.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::MissingCredential`] without a key,
    /// [`IndexError::Retrieval`] if either provider call fails, or a store
    /// error.
    pub async fn answer(&self, project: &Project, question: &str) -> Result<String> {
        let question = question.trim();
        if question.is_empty() {
            return Err(IndexError::InvalidInput("question must not be empty".into()));
        }

        let key = self.credentials.resolve(project.owner_id).await?;
        let provider = self.factory.create(&key);

        let query = provider.embed(question).await.map_err(IndexError::Retrieval)?;
        let rows = self.store.embeddings(project.id).await?;
        let total = rows.len();
        let chunks = rank_chunks(&query, rows, self.top_k);
        tracing::info!(
            project = %project.id,
            candidates = total,
            selected = chunks.len(),
            "answering question"
        );

        let context = format_context(&chunks);
        let messages = [Message::system(PERSONA), Message::user(build_prompt(&context, question))];
        provider.chat(&messages).await.map_err(IndexError::Retrieval)
    }
}

/// Score every row against `query` and keep the `k` best, highest first.
///
/// Ties keep load order. Rows whose stored vector cannot be decoded are
/// skipped.
#[must_use]
pub fn rank_chunks(query: &[f32], rows: Vec<EmbeddingRow>, k: usize) -> Vec<ScoredChunk> {
    let mut scored: Vec<ScoredChunk> = rows
        .into_iter()
        .filter_map(|row| match row.vector() {
            Ok(vector) => Some(ScoredChunk {
                score: cosine_similarity(query, &vector),
                file_path: row.file_path,
                content: row.content,
            }),
            Err(e) => {
                tracing::warn!(file = %row.file_path, id = row.id, "malformed stored vector: {e}");
                None
            }
        })
        .collect();
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored.truncate(k);
    scored
}

#[must_use]
pub fn format_context(chunks: &[ScoredChunk]) -> String {
    let mut out = String::new();
    for chunk in chunks {
        let _ = write!(out, "\n[file: {}]\n{}\n", chunk.file_path, chunk.content);
    }
    out
}

#[must_use]
pub fn build_prompt(context: &str, question: &str) -> String {
    format!(
        "You are a code analysis expert. Answer based on the following repository content:\n\
         {context}\n\nQuestion: {question}"
    )
}
