//! Knowledge index: ingestion and similarity search with a relevance floor.

use super::backend::VectorBackend;
use super::chunker::split_into_chunks;
use super::embedding::Embedder;
use super::{KnowledgeError, KnowledgeResult};
use crate::config::KnowledgeConfig;
use crate::models::KnowledgeChunk;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// A named `(top_k, min_score)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchProfile {
    pub top_k: usize,
    pub min_score: f32,
}

impl SearchProfile {
    /// User-facing lookups: few, highly relevant results.
    pub const LOOKUP: SearchProfile = SearchProfile {
        top_k: 3,
        min_score: 0.7,
    };

    /// Prompt context gathering: more results, lower floor.
    pub const BROAD_CONTEXT: SearchProfile = SearchProfile {
        top_k: 5,
        min_score: 0.5,
    };
}

/// One ranked search result. `score = 1 - cosine distance`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub chunk_id: String,
    pub document_name: String,
    pub content: String,
    pub category: Option<String>,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestReport {
    pub document_id: String,
    pub document_name: String,
    pub chunks: usize,
}

/// Embeds and stores reference chunks; answers similarity queries.
///
/// Failures from the embedder or backend propagate; callers decide whether a
/// missing knowledge section is acceptable.
pub struct KnowledgeIndex {
    embedder: Arc<dyn Embedder>,
    backend: Arc<dyn VectorBackend>,
    candidate_factor: usize,
    chunk_size: usize,
    chunk_overlap: usize,
}

impl KnowledgeIndex {
    pub fn new(embedder: Arc<dyn Embedder>, backend: Arc<dyn VectorBackend>, cfg: &KnowledgeConfig) -> Self {
        Self {
            embedder,
            backend,
            candidate_factor: cfg.candidate_factor.max(1),
            chunk_size: cfg.chunk_size,
            chunk_overlap: cfg.chunk_overlap,
        }
    }

    /// Rank stored chunks against `query`.
    ///
    /// Pulls `top_k * candidate_factor` nearest chunks first, then drops those below
    /// `min_score`, then truncates to `top_k`.
    pub async fn search(&self, query: &str, top_k: usize, min_score: f32) -> KnowledgeResult<Vec<SearchHit>> {
        if top_k == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let vector = self.embedder.embed(query).await?;
        let candidates = self
            .backend
            .nearest(&vector, top_k.saturating_mul(self.candidate_factor))
            .await?;
        let pool = candidates.len();

        let hits: Vec<SearchHit> = candidates
            .into_iter()
            .map(|c| SearchHit {
                score: 1.0 - c.distance,
                chunk_id: c.chunk.id,
                document_name: c.chunk.document_name,
                content: c.chunk.content,
                category: c.chunk.category,
            })
            .filter(|h| h.score >= min_score)
            .take(top_k)
            .collect();

        debug!(
            "Knowledge search: {} candidates, {} above {:.2}",
            pool,
            hits.len(),
            min_score
        );
        Ok(hits)
    }

    pub async fn search_with(&self, query: &str, profile: SearchProfile) -> KnowledgeResult<Vec<SearchHit>> {
        self.search(query, profile.top_k, profile.min_score).await
    }

    /// Chunk, embed and store a reference document.
    pub async fn ingest_document(
        &self,
        name: &str,
        text: &str,
        category: Option<&str>,
    ) -> KnowledgeResult<IngestReport> {
        let pieces = split_into_chunks(text, self.chunk_size, self.chunk_overlap);
        if pieces.is_empty() {
            return Err(KnowledgeError::EmptyDocument);
        }
        let document_id = Uuid::new_v4().to_string();
        let category = category.map(str::trim).filter(|c| !c.is_empty()).map(str::to_string);

        let mut chunks = Vec::with_capacity(pieces.len());
        for (i, content) in pieces.into_iter().enumerate() {
            let embedding = self.embedder.embed(&content).await?;
            if embedding.len() != self.embedder.dimensions() {
                return Err(KnowledgeError::DimensionMismatch {
                    expected: self.embedder.dimensions(),
                    actual: embedding.len(),
                });
            }
            chunks.push(KnowledgeChunk {
                id: Uuid::new_v4().to_string(),
                document_id: document_id.clone(),
                document_name: name.to_string(),
                content,
                embedding,
                category: category.clone(),
                chunk_index: i as u32,
            });
        }
        let count = chunks.len();
        self.backend.upsert(chunks).await?;
        info!(
            "✓ Indexed '{}' as {} chunk(s) in {} backend",
            name,
            count,
            self.backend.backend_name()
        );
        Ok(IngestReport {
            document_id,
            document_name: name.to_string(),
            chunks: count,
        })
    }

    pub async fn remove_document(&self, document_id: &str) -> KnowledgeResult<usize> {
        self.backend.remove_document(document_id).await
    }

    pub async fn chunk_count(&self) -> KnowledgeResult<usize> {
        self.backend.len().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::{HashingEmbedder, MemoryVectorBackend, ScoredChunk};
    use async_trait::async_trait;

    fn index() -> KnowledgeIndex {
        KnowledgeIndex::new(
            Arc::new(HashingEmbedder::new(256)),
            Arc::new(MemoryVectorBackend::new()),
            &KnowledgeConfig::default(),
        )
    }

    #[tokio::test]
    async fn search_respects_top_k_and_floor() {
        let idx = index();
        for doc in [
            "chest pain troponin ecg",
            "chest pain troponin ecg aspirin",
            "chest pain troponin",
            "chest pain",
            "asthma inhaler spacer",
            "otitis media amoxicillin",
        ] {
            idx.ingest_document(doc, doc, None).await.unwrap();
        }

        let hits = idx.search("chest pain troponin ecg", 3, 0.9).await.unwrap();
        assert!(hits.len() <= 3);
        assert!(!hits.is_empty());
        assert!(hits.iter().all(|h| h.score >= 0.9));
        assert_eq!(hits[0].content, "chest pain troponin ecg");

        let broad = idx.search_with("chest pain", SearchProfile::BROAD_CONTEXT).await.unwrap();
        assert!(broad.len() <= 5);
        assert!(broad.iter().all(|h| h.score >= 0.5));
        for pair in broad.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[tokio::test]
    async fn zero_top_k_returns_nothing() {
        let idx = index();
        idx.ingest_document("a", "hypertension follow up", None).await.unwrap();
        assert!(idx.search("hypertension", 0, 0.0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_document_is_rejected() {
        let idx = index();
        assert!(matches!(
            idx.ingest_document("blank", "   ", None).await,
            Err(KnowledgeError::EmptyDocument)
        ));
    }

    /// Returns fixed candidates and records the requested pool size.
    struct FixedBackend {
        distances: Vec<f32>,
        requested: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl VectorBackend for FixedBackend {
        async fn upsert(&self, _chunks: Vec<KnowledgeChunk>) -> KnowledgeResult<()> {
            Ok(())
        }
        async fn nearest(&self, _query: &[f32], limit: usize) -> KnowledgeResult<Vec<ScoredChunk>> {
            self.requested.store(limit, std::sync::atomic::Ordering::SeqCst);
            Ok(self
                .distances
                .iter()
                .enumerate()
                .take(limit)
                .map(|(i, d)| ScoredChunk {
                    chunk: KnowledgeChunk {
                        id: format!("c{}", i),
                        document_id: "d".into(),
                        document_name: "guide".into(),
                        content: format!("chunk {}", i),
                        embedding: vec![1.0],
                        category: Some("cardiology".into()),
                        chunk_index: i as u32,
                    },
                    distance: *d,
                })
                .collect())
        }
        async fn remove_document(&self, _document_id: &str) -> KnowledgeResult<usize> {
            Ok(0)
        }
        async fn len(&self) -> KnowledgeResult<usize> {
            Ok(self.distances.len())
        }
        fn backend_name(&self) -> &'static str {
            "fixed"
        }
    }

    #[tokio::test]
    async fn widened_pool_fills_results_past_low_scores() {
        // Scores: 0.95, 0.6, 0.9, 0.85, 0.8, 0.75
        let backend = Arc::new(FixedBackend {
            distances: vec![0.05, 0.4, 0.1, 0.15, 0.2, 0.25],
            requested: std::sync::atomic::AtomicUsize::new(0),
        });
        let idx = KnowledgeIndex::new(
            Arc::new(HashingEmbedder::new(8)),
            backend.clone(),
            &KnowledgeConfig::default(),
        );
        let hits = idx.search("anything", 3, 0.7).await.unwrap();
        assert_eq!(backend.requested.load(std::sync::atomic::Ordering::SeqCst), 6);
        let ids: Vec<_> = hits.iter().map(|h| h.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["c0", "c2", "c3"]);
        assert_eq!(hits[0].category.as_deref(), Some("cardiology"));
    }
}
