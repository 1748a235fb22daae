//! Schema context retrieval. Table descriptions are embedded once at
//! startup; each question then pulls the closest few as prompt context.
//! With nothing embedded, a static description block stands in.

use crate::catalog;
use crate::error::{PipelineError, Result};
use crate::providers::GenerativeProvider;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// How many table descriptions a retrieval returns at most.
pub const CONTEXT_TOP_K: usize = 5;

struct ContextDocument {
    table: &'static str,
    text: String,
    embedding: Vec<f32>,
}

pub struct SchemaContextProvider {
    provider: Arc<dyn GenerativeProvider>,
    documents: RwLock<Vec<ContextDocument>>,
}

impl SchemaContextProvider {
    pub fn new(provider: Arc<dyn GenerativeProvider>) -> Self {
        Self {
            provider,
            documents: RwLock::new(Vec::new()),
        }
    }

    /// Embed every table description. A table whose embedding fails is
    /// skipped; retrieval falls back to the static block when nothing
    /// embeds. Returns how many documents were stored.
    pub async fn initialize(&self) -> usize {
        let mut documents = Vec::new();
        for table in catalog::TABLES {
            let text = table.describe();
            match self.provider.embed(&text).await {
                Ok(embedding) if !embedding.is_empty() => {
                    documents.push(ContextDocument {
                        table: table.name,
                        text,
                        embedding,
                    });
                }
                Ok(_) => warn!("Empty embedding for table {}", table.name),
                Err(e) => warn!("Embedding failed for table {}: {}", table.name, e),
            }
        }
        let count = documents.len();
        info!("Schema context holds {} embedded documents", count);
        *self.documents.write().await = documents;
        count
    }

    /// Context block for one question: the closest descriptions by cosine
    /// similarity, best first. Rate limiting propagates untouched; any other
    /// embedding failure surfaces as a Context error. An empty store or a
    /// degenerate ranking serves the static block instead.
    pub async fn retrieve(&self, question: &str) -> Result<String> {
        let documents = self.documents.read().await;
        if documents.is_empty() {
            return Ok(default_context());
        }

        let query_embedding = match self.provider.embed(question).await {
            Ok(embedding) => embedding,
            Err(e) if e.is_rate_limited() => return Err(e),
            Err(e) => {
                return Err(PipelineError::Context(format!(
                    "question embedding failed: {}",
                    e
                )))
            }
        };

        let mut scored: Vec<(f32, &ContextDocument)> = documents
            .iter()
            .map(|doc| (cosine_similarity(&query_embedding, &doc.embedding), doc))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        if scored.first().map_or(true, |(score, _)| *score <= 0.0) {
            return Ok(default_context());
        }
        let block = scored
            .iter()
            .take(CONTEXT_TOP_K)
            .map(|(_, doc)| doc.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        Ok(block)
    }

    /// Names of the tables currently embedded, for diagnostics.
    pub async fn embedded_tables(&self) -> Vec<&'static str> {
        self.documents.read().await.iter().map(|d| d.table).collect()
    }
}

/// Static fallback: the first top-K table descriptions in catalog order,
/// root first. Same size as a ranked retrieval result.
pub fn default_context() -> String {
    catalog::TABLES
        .iter()
        .take(CONTEXT_TOP_K)
        .map(|t| t.describe())
        .collect::<Vec<_>>()
        .join("\n")
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::Generation;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Keyword-flag embeddings: enough structure for similarity ranking.
    struct KeywordEmbedder {
        calls: AtomicUsize,
        rate_limit_after: Option<usize>,
        break_after: Option<usize>,
    }

    impl KeywordEmbedder {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                rate_limit_after: None,
                break_after: None,
            }
        }

        fn rate_limited_after(calls: usize) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                rate_limit_after: Some(calls),
                break_after: None,
            }
        }

        fn broken_after(calls: usize) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                rate_limit_after: None,
                break_after: Some(calls),
            }
        }
    }

    #[async_trait]
    impl GenerativeProvider for KeywordEmbedder {
        fn name(&self) -> &str {
            "keyword-embedder"
        }

        async fn generate(&self, _prompt: &str) -> crate::error::Result<Generation> {
            Ok(Generation {
                text: "[]".to_string(),
                usage: None,
            })
        }

        async fn embed(&self, text: &str) -> crate::error::Result<Vec<f32>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(limit) = self.rate_limit_after {
                if call >= limit {
                    return Err(PipelineError::RateLimited("quota exhausted".to_string()));
                }
            }
            if let Some(limit) = self.break_after {
                if call >= limit {
                    return Err(PipelineError::Llm("embedding backend unavailable".to_string()));
                }
            }
            let lowered = text.to_lowercase();
            Ok(vec![
                lowered.contains("profession") as u8 as f32,
                lowered.contains("city") as u8 as f32,
                lowered.contains("diet") as u8 as f32,
                1.0,
            ])
        }
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_default_context_is_first_top_k() {
        let block = default_context();
        assert_eq!(block.lines().count(), CONTEXT_TOP_K);
        assert!(block.starts_with("Table profiles"));
        for table in catalog::TABLES.iter().take(CONTEXT_TOP_K) {
            assert!(block.contains(table.name), "missing {}", table.name);
        }
    }

    #[tokio::test]
    async fn test_uninitialized_store_serves_static_block() {
        let provider = Arc::new(KeywordEmbedder::new());
        let context = SchemaContextProvider::new(provider);
        let block = context.retrieve("doctor brides in Pune").await.unwrap();
        assert_eq!(block, default_context());
    }

    #[tokio::test]
    async fn test_retrieval_ranks_matching_table_first() {
        let provider = Arc::new(KeywordEmbedder::new());
        let context = SchemaContextProvider::new(provider);
        assert_eq!(context.initialize().await, catalog::TABLES.len());

        let block = context.retrieve("which profession do they have").await.unwrap();
        let first_line = block.lines().next().unwrap_or("");
        assert!(first_line.contains("careers"), "got: {}", first_line);
        assert_eq!(block.lines().count(), CONTEXT_TOP_K);
    }

    #[tokio::test]
    async fn test_rate_limit_propagates_from_retrieval() {
        let table_count = catalog::TABLES.len();
        let provider = Arc::new(KeywordEmbedder::rate_limited_after(table_count));
        let context = SchemaContextProvider::new(provider);
        assert_eq!(context.initialize().await, table_count);

        let err = context.retrieve("any question").await.unwrap_err();
        assert!(err.is_rate_limited());
    }

    #[tokio::test]
    async fn test_embed_failure_surfaces_as_context_error() {
        let table_count = catalog::TABLES.len();
        let provider = Arc::new(KeywordEmbedder::broken_after(table_count));
        let context = SchemaContextProvider::new(provider);
        assert_eq!(context.initialize().await, table_count);

        let err = context.retrieve("any question").await.unwrap_err();
        assert!(matches!(err, PipelineError::Context(_)));
        assert!(!err.is_rate_limited());
    }

    #[tokio::test]
    async fn test_embedding_failures_skip_tables() {
        // Every embed call fails, so nothing is stored.
        let provider = Arc::new(KeywordEmbedder::rate_limited_after(0));
        let context = SchemaContextProvider::new(provider);
        assert_eq!(context.initialize().await, 0);
        assert!(context.embedded_tables().await.is_empty());
    }
}
