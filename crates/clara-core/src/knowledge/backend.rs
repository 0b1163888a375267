//! Chunk storage with exact cosine-distance nearest-neighbour scans.
//!
//! Two backends share the trait: an in-memory map (tests, ephemeral deployments)
//! and a sled tree that survives restarts.

use super::KnowledgeResult;
use crate::models::KnowledgeChunk;
use async_trait::async_trait;
use dashmap::DashMap;
use tracing::warn;

const CHUNK_TREE: &str = "knowledge_chunks";

/// A stored chunk and its cosine distance to the query (0 = identical direction).
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: KnowledgeChunk,
    pub distance: f32,
}

#[async_trait]
pub trait VectorBackend: Send + Sync {
    async fn upsert(&self, chunks: Vec<KnowledgeChunk>) -> KnowledgeResult<()>;

    /// Up to `limit` chunks ordered by ascending cosine distance.
    async fn nearest(&self, query: &[f32], limit: usize) -> KnowledgeResult<Vec<ScoredChunk>>;

    /// Remove every chunk of a document; returns how many were removed.
    async fn remove_document(&self, document_id: &str) -> KnowledgeResult<usize>;

    async fn len(&self) -> KnowledgeResult<usize>;

    fn backend_name(&self) -> &'static str;
}

/// Cosine distance `1 - cos(a, b)`. `None` when lengths differ or either vector is zero.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let mut dot = 0.0f32;
    let mut na = 0.0f32;
    let mut nb = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return None;
    }
    let cos = (dot / (na.sqrt() * nb.sqrt())).clamp(-1.0, 1.0);
    Some(1.0 - cos)
}

fn rank(
    query: &[f32],
    chunks: impl Iterator<Item = KnowledgeChunk>,
    limit: usize,
) -> Vec<ScoredChunk> {
    let mut scored: Vec<ScoredChunk> = chunks
        .filter_map(|chunk| match cosine_distance(query, &chunk.embedding) {
            Some(distance) => Some(ScoredChunk { chunk, distance }),
            None => {
                warn!(
                    "Skipping chunk {} ({} dims, query {} dims)",
                    chunk.id,
                    chunk.embedding.len(),
                    query.len()
                );
                None
            }
        })
        .collect();
    scored.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    scored.truncate(limit);
    scored
}

/// In-memory backend keyed by chunk id.
#[derive(Debug, Default)]
pub struct MemoryVectorBackend {
    chunks: DashMap<String, KnowledgeChunk>,
}

impl MemoryVectorBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorBackend for MemoryVectorBackend {
    async fn upsert(&self, chunks: Vec<KnowledgeChunk>) -> KnowledgeResult<()> {
        for chunk in chunks {
            self.chunks.insert(chunk.id.clone(), chunk);
        }
        Ok(())
    }

    async fn nearest(&self, query: &[f32], limit: usize) -> KnowledgeResult<Vec<ScoredChunk>> {
        let snapshot: Vec<KnowledgeChunk> = self.chunks.iter().map(|e| e.value().clone()).collect();
        Ok(rank(query, snapshot.into_iter(), limit))
    }

    async fn remove_document(&self, document_id: &str) -> KnowledgeResult<usize> {
        let before = self.chunks.len();
        self.chunks.retain(|_, c| c.document_id != document_id);
        Ok(before - self.chunks.len())
    }

    async fn len(&self) -> KnowledgeResult<usize> {
        Ok(self.chunks.len())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

/// Sled-persisted backend; each chunk is a JSON value under its id.
pub struct SledVectorBackend {
    tree: sled::Tree,
}

impl SledVectorBackend {
    pub fn from_db(db: &sled::Db) -> KnowledgeResult<Self> {
        Ok(Self {
            tree: db.open_tree(CHUNK_TREE)?,
        })
    }

    fn load_all(&self) -> KnowledgeResult<Vec<KnowledgeChunk>> {
        let mut out = Vec::with_capacity(self.tree.len());
        for item in self.tree.iter() {
            let (_, v) = item?;
            out.push(serde_json::from_slice(&v)?);
        }
        Ok(out)
    }
}

#[async_trait]
impl VectorBackend for SledVectorBackend {
    async fn upsert(&self, chunks: Vec<KnowledgeChunk>) -> KnowledgeResult<()> {
        let mut batch = sled::Batch::default();
        for chunk in &chunks {
            batch.insert(chunk.id.as_bytes(), serde_json::to_vec(chunk)?);
        }
        self.tree.apply_batch(batch)?;
        self.tree.flush()?;
        Ok(())
    }

    async fn nearest(&self, query: &[f32], limit: usize) -> KnowledgeResult<Vec<ScoredChunk>> {
        let all = self.load_all()?;
        Ok(rank(query, all.into_iter(), limit))
    }

    async fn remove_document(&self, document_id: &str) -> KnowledgeResult<usize> {
        let mut removed = 0;
        for chunk in self.load_all()? {
            if chunk.document_id == document_id {
                self.tree.remove(chunk.id.as_bytes())?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn len(&self) -> KnowledgeResult<usize> {
        Ok(self.tree.len())
    }

    fn backend_name(&self) -> &'static str {
        "sled"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, doc: &str, embedding: Vec<f32>) -> KnowledgeChunk {
        KnowledgeChunk {
            id: id.to_string(),
            document_id: doc.to_string(),
            document_name: format!("{}.md", doc),
            content: format!("content of {}", id),
            embedding,
            category: None,
            chunk_index: 0,
        }
    }

    #[test]
    fn cosine_distance_bounds() {
        assert!(cosine_distance(&[1.0, 0.0], &[1.0, 0.0]).unwrap().abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[0.0, 1.0]).unwrap() - 1.0).abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[-1.0, 0.0]).unwrap() - 2.0).abs() < 1e-6);
        assert!(cosine_distance(&[1.0], &[1.0, 0.0]).is_none());
        assert!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]).is_none());
    }

    #[tokio::test]
    async fn memory_nearest_orders_by_distance() {
        let b = MemoryVectorBackend::new();
        b.upsert(vec![
            chunk("far", "d1", vec![0.0, 1.0]),
            chunk("near", "d1", vec![1.0, 0.1]),
            chunk("mid", "d2", vec![1.0, 1.0]),
            chunk("bad", "d2", vec![1.0]),
        ])
        .await
        .unwrap();

        let hits = b.nearest(&[1.0, 0.0], 2).await.unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["near", "mid"]);

        assert_eq!(b.remove_document("d2").await.unwrap(), 2);
        assert_eq!(b.len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn sled_backend_persists_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        {
            let b = SledVectorBackend::from_db(&db).unwrap();
            b.upsert(vec![chunk("a", "d1", vec![1.0, 0.0]), chunk("b", "d1", vec![0.0, 1.0])])
                .await
                .unwrap();
        }
        let b = SledVectorBackend::from_db(&db).unwrap();
        assert_eq!(b.len().await.unwrap(), 2);
        let hits = b.nearest(&[0.0, 1.0], 1).await.unwrap();
        assert_eq!(hits[0].chunk.id, "b");
        assert_eq!(b.remove_document("d1").await.unwrap(), 2);
        assert_eq!(b.len().await.unwrap(), 0);
    }
}
