//! In-process fakes for the external capabilities.
#![allow(dead_code)]

use async_trait::async_trait;
use clara_core::knowledge::{HashingEmbedder, KnowledgeIndex, KnowledgeResult, ScoredChunk, VectorBackend};
use clara_core::{
    ChatCompleter, ChatCompletion, ContextAggregator, ContextError, KnowledgeChunk, KnowledgeConfig, LlmError,
    LlmResult, PatientContext, PatientContextSource, SessionStore, SkillCatalog, SuggestionPipeline, TokenUsage,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const TWO_ITEMS: &str = r#"Here are my suggestions:
```json
{"suggestions": [
  {"content": "Confirm the penicillin allergy before prescribing amoxicillin", "type": "safety", "urgency": "high", "confidence": 0.92},
  {"content": "Ask about fever duration and maximum temperature", "type": "question", "urgency": "medium", "confidence": 0.7}
]}
```"#;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Chat completer that replays a fixed reply (or error) and records prompts.
pub struct ScriptedLlm {
    reply: Option<String>,
    delay: Duration,
    prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl ScriptedLlm {
    pub fn replying(text: &str) -> Self {
        Self {
            reply: Some(text.to_string()),
            delay: Duration::ZERO,
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: None,
            ..Self::replying("")
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl ChatCompleter for ScriptedLlm {
    async fn complete(&self, _system: &str, user: &str) -> LlmResult<ChatCompletion> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(user.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.reply {
            Some(ref text) => Ok(ChatCompletion {
                text: text.clone(),
                model: "scripted".to_string(),
                usage: Some(TokenUsage {
                    prompt_tokens: 120,
                    completion_tokens: 40,
                }),
            }),
            None => Err(LlmError::Api {
                status: 502,
                body: "bad gateway".to_string(),
            }),
        }
    }

    fn model(&self) -> &str {
        "scripted"
    }
}

/// Patient source returning a fixed context, or an upstream error.
pub struct StaticPatients {
    pub context: Option<PatientContext>,
    pub fail: bool,
    pub calls: AtomicUsize,
}

impl StaticPatients {
    pub fn with_allergy(allergy: &str) -> Self {
        Self {
            context: Some(PatientContext {
                allergies: vec![allergy.to_string()],
                ..Default::default()
            }),
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            context: None,
            fail: true,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl PatientContextSource for StaticPatients {
    async fn fetch_patient_context(&self, _patient_id: &str) -> Result<Option<PatientContext>, ContextError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ContextError::Upstream {
                status: 500,
                body: "practice system unavailable".to_string(),
            });
        }
        Ok(self.context.clone())
    }
}

/// Vector backend that ignores the query and returns preset neighbours.
pub struct FixedNeighbours {
    neighbours: Vec<ScoredChunk>,
}

impl FixedNeighbours {
    /// `(content, distance)` pairs, already in ascending distance order.
    pub fn new(items: &[(&str, f32)]) -> Self {
        let neighbours = items
            .iter()
            .enumerate()
            .map(|(i, (content, distance))| ScoredChunk {
                chunk: KnowledgeChunk {
                    id: format!("chunk-{}", i),
                    document_id: "doc-1".to_string(),
                    document_name: "Primary care guideline".to_string(),
                    content: content.to_string(),
                    embedding: vec![0.0; 4],
                    category: Some("guideline".to_string()),
                    chunk_index: i as u32,
                },
                distance: *distance,
            })
            .collect();
        Self { neighbours }
    }

    pub fn empty() -> Self {
        Self { neighbours: Vec::new() }
    }
}

#[async_trait]
impl VectorBackend for FixedNeighbours {
    async fn upsert(&self, _chunks: Vec<KnowledgeChunk>) -> KnowledgeResult<()> {
        Ok(())
    }

    async fn nearest(&self, _query: &[f32], limit: usize) -> KnowledgeResult<Vec<ScoredChunk>> {
        Ok(self.neighbours.iter().take(limit).cloned().collect())
    }

    async fn remove_document(&self, _document_id: &str) -> KnowledgeResult<usize> {
        Ok(0)
    }

    async fn len(&self) -> KnowledgeResult<usize> {
        Ok(self.neighbours.len())
    }

    fn backend_name(&self) -> &'static str {
        "fixed"
    }
}

pub fn pipeline(
    store: Arc<dyn SessionStore>,
    llm: Arc<dyn ChatCompleter>,
    patients: Option<Arc<dyn PatientContextSource>>,
    neighbours: FixedNeighbours,
) -> SuggestionPipeline {
    let cfg = KnowledgeConfig::default();
    let index = Arc::new(KnowledgeIndex::new(
        Arc::new(HashingEmbedder::new(32)),
        Arc::new(neighbours),
        &cfg,
    ));
    let aggregator = ContextAggregator::new(index, patients, Arc::new(SkillCatalog::builtin()), cfg.broad, 10);
    SuggestionPipeline::new(aggregator, llm, store, 10)
}
