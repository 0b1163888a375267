//! Builds a ready-to-serve service graph from `ClaraConfig`.

use crate::broadcast::{Broadcaster, ChannelBroadcaster};
use crate::config::{ClaraConfig, StorageBackend};
use crate::context::ContextAggregator;
use crate::knowledge::{
    Embedder, HashingEmbedder, KnowledgeError, KnowledgeIndex, MemoryVectorBackend, OpenAiEmbedder,
    SledVectorBackend, VectorBackend,
};
use crate::llm::{ChatCompleter, LlmError, OpenRouterClient, UnconfiguredCompleter};
use crate::patient::{ContextError, HttpPatientContextClient, PatientContextSource};
use crate::pipeline::SuggestionPipeline;
use crate::session::{LiveSessionService, SessionError};
use crate::skills::{SkillCatalog, SkillError};
use crate::store::{MemoryStore, SessionStore, SledStore, StoreError};
use crate::transcription::{TranscribeError, Transcriber, WhisperApiTranscriber};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("Failed to open sled database: {0}")]
    Sled(#[from] sled::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Knowledge(#[from] KnowledgeError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    PatientContext(#[from] ContextError),

    #[error(transparent)]
    Transcription(#[from] TranscribeError),

    #[error(transparent)]
    Skills(#[from] SkillError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// The wired components the gateway needs.
pub struct ClaraRuntime {
    pub sessions: Arc<LiveSessionService>,
    pub knowledge: Arc<KnowledgeIndex>,
    pub events: Arc<ChannelBroadcaster>,
}

impl ClaraRuntime {
    pub fn build(cfg: &ClaraConfig) -> Result<Self, BootstrapError> {
        let store: Arc<dyn SessionStore>;
        let vectors: Arc<dyn VectorBackend>;
        match cfg.storage_backend {
            StorageBackend::Sled => {
                let path = cfg.sled_path("clara");
                let db = sled::open(&path)?;
                info!("✓ Sled storage at {}", path.display());
                store = Arc::new(SledStore::from_db(db.clone())?);
                vectors = Arc::new(SledVectorBackend::from_db(&db)?);
            }
            StorageBackend::Memory => {
                warn!("⚠ Using in-memory storage; sessions and knowledge are lost on restart");
                store = Arc::new(MemoryStore::new());
                vectors = Arc::new(MemoryVectorBackend::new());
            }
        }

        let embedder: Arc<dyn Embedder> = match OpenAiEmbedder::from_config(&cfg.embedding)? {
            Some(e) => {
                info!("✓ Embeddings via {} ({})", cfg.embedding.api_base, cfg.embedding.model);
                Arc::new(e)
            }
            None => {
                warn!("⚠ No embedding API key, using local hashing embedder");
                Arc::new(HashingEmbedder::new(cfg.embedding.dimensions))
            }
        };
        let knowledge = Arc::new(KnowledgeIndex::new(embedder, vectors, &cfg.knowledge));

        let patients: Option<Arc<dyn PatientContextSource>> =
            match HttpPatientContextClient::from_config(&cfg.patient_context)? {
                Some(c) => Some(Arc::new(c)),
                None => {
                    info!("Patient context source not configured");
                    None
                }
            };

        let mut skills = SkillCatalog::builtin();
        if let Some(ref path) = cfg.skills_path {
            skills = skills.with_skills(SkillCatalog::load_toml(Path::new(path))?);
        }

        let llm: Arc<dyn ChatCompleter> = match OpenRouterClient::from_config(&cfg.llm)? {
            Some(c) => {
                let c: Arc<dyn ChatCompleter> = Arc::new(c);
                info!("✓ LLM bridge ready (model {})", c.model());
                c
            }
            None => {
                warn!("⚠ No LLM API key (CLARA__LLM__API_KEY / OPENROUTER_API_KEY); suggestions disabled");
                Arc::new(UnconfiguredCompleter)
            }
        };

        let transcriber: Option<Arc<dyn Transcriber>> = WhisperApiTranscriber::from_config(&cfg.transcription)?
            .map(|t| Arc::new(t) as Arc<dyn Transcriber>);

        let aggregator = ContextAggregator::new(
            Arc::clone(&knowledge),
            patients,
            Arc::new(skills),
            cfg.knowledge.broad,
            cfg.pipeline.recent_window,
        );
        let pipeline = Arc::new(SuggestionPipeline::new(
            aggregator,
            llm,
            Arc::clone(&store),
            cfg.pipeline.recent_window,
        ));

        let events = Arc::new(ChannelBroadcaster::new());
        let broadcaster: Arc<dyn Broadcaster> = events.clone();
        let sessions = Arc::new(LiveSessionService::new(
            store,
            pipeline,
            broadcaster,
            transcriber,
            &cfg.scheduler,
            &cfg.speaker,
        )?);

        Ok(Self {
            sessions,
            knowledge,
            events,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn builds_offline_memory_runtime() {
        let cfg = ClaraConfig {
            storage_backend: StorageBackend::Memory,
            ..ClaraConfig::default()
        };
        let rt = ClaraRuntime::build(&cfg).unwrap();
        let session = rt.sessions.start_session("dr-1", None).await.unwrap();
        assert!(session.is_active());
        assert_eq!(rt.knowledge.chunk_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn builds_sled_runtime_under_storage_path() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ClaraConfig {
            storage_path: dir.path().to_string_lossy().into_owned(),
            ..ClaraConfig::default()
        };
        let rt = ClaraRuntime::build(&cfg).unwrap();
        rt.knowledge
            .ingest_document("triage.md", "Chest pain with diaphoresis warrants an ECG.", None)
            .await
            .unwrap();
        assert_eq!(rt.knowledge.chunk_count().await.unwrap(), 1);
        assert!(dir.path().join("clara").exists());
    }
}
