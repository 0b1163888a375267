//! Live session orchestration: transcript intake, speaker labelling, batch and
//! on-demand suggestion generation, session teardown.

use crate::broadcast::{Broadcaster, SessionEvent};
use crate::config::{SchedulerConfig, SpeakerConfig};
use crate::models::{ModelError, Session, Suggestion, TranscriptLine, TriggerSource};
use crate::pipeline::SuggestionPipeline;
use crate::scheduler::{HandlerError, SchedulerError, SessionBatchScheduler, TriggerHandler, TriggerReason};
use crate::speaker::SpeakerInference;
use crate::store::{SessionStore, StoreError};
use crate::transcription::Transcriber;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session {0} not found")]
    NotFound(String),

    #[error("Session {0} is not active")]
    NotActive(String),

    #[error("Invalid input: {0}")]
    InvalidInput(#[from] ModelError),

    #[error("No transcription backend configured")]
    TranscriptionUnavailable,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
}

/// Bridges scheduler triggers to the pipeline and pushes non-empty results to clients.
pub struct PipelineTrigger {
    pipeline: Arc<SuggestionPipeline>,
    broadcaster: Arc<dyn Broadcaster>,
}

impl PipelineTrigger {
    pub fn new(pipeline: Arc<SuggestionPipeline>, broadcaster: Arc<dyn Broadcaster>) -> Self {
        Self { pipeline, broadcaster }
    }
}

#[async_trait]
impl TriggerHandler for PipelineTrigger {
    async fn on_trigger(
        &self,
        session_id: String,
        reason: TriggerReason,
        cancel: CancellationToken,
    ) -> Result<(), HandlerError> {
        debug!(session_id = %session_id, reason = reason.as_str(), "Batch generation starting");
        let suggestions = self.pipeline.generate(&session_id, TriggerSource::Batch, &cancel).await;
        if !suggestions.is_empty() && !cancel.is_cancelled() {
            self.broadcaster.broadcast(
                &session_id,
                SessionEvent::SuggestionsReady {
                    source: TriggerSource::Batch,
                    suggestions,
                },
            );
        }
        Ok(())
    }
}

pub struct LiveSessionService {
    store: Arc<dyn SessionStore>,
    scheduler: SessionBatchScheduler,
    pipeline: Arc<SuggestionPipeline>,
    broadcaster: Arc<dyn Broadcaster>,
    transcriber: Option<Arc<dyn Transcriber>>,
    speaker: SpeakerInference,
    /// Serialises transcript intake and teardown per session.
    locks: DashMap<String, Arc<Mutex<()>>>,
    on_demand: DashMap<String, CancellationToken>,
}

impl LiveSessionService {
    pub fn new(
        store: Arc<dyn SessionStore>,
        pipeline: Arc<SuggestionPipeline>,
        broadcaster: Arc<dyn Broadcaster>,
        transcriber: Option<Arc<dyn Transcriber>>,
        scheduler: &SchedulerConfig,
        speaker: &SpeakerConfig,
    ) -> SessionResult<Self> {
        let handler = Arc::new(PipelineTrigger::new(Arc::clone(&pipeline), Arc::clone(&broadcaster)));
        let scheduler = SessionBatchScheduler::new(scheduler, handler)?;
        Ok(Self {
            store,
            scheduler,
            pipeline,
            broadcaster,
            transcriber,
            speaker: SpeakerInference::new(speaker.turn_gap_ms),
            locks: DashMap::new(),
            on_demand: DashMap::new(),
        })
    }

    pub fn scheduler(&self) -> &SessionBatchScheduler {
        &self.scheduler
    }

    fn session_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        Arc::clone(
            self.locks
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }

    /// Drop the lock entry created for an id that is unknown or already ended.
    fn forget_inactive(&self, session_id: &str, err: SessionError) -> SessionError {
        if matches!(err, SessionError::NotFound(_) | SessionError::NotActive(_)) {
            self.locks.remove(session_id);
        }
        err
    }

    async fn require_active(&self, session_id: &str) -> SessionResult<Session> {
        let session = self
            .store
            .get_session(session_id)
            .await?
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        if !session.is_active() {
            return Err(SessionError::NotActive(session_id.to_string()));
        }
        Ok(session)
    }

    pub async fn start_session(&self, doctor_id: &str, patient_id: Option<&str>) -> SessionResult<Session> {
        let session = Session::new(doctor_id, patient_id)?;
        self.store.create_session(&session).await?;
        info!(
            session_id = %session.id,
            doctor_id = %session.doctor_id,
            patient_linked = session.patient_id.is_some(),
            "✓ Session started"
        );
        Ok(session)
    }

    pub async fn get_session(&self, session_id: &str) -> SessionResult<Session> {
        self.store
            .get_session(session_id)
            .await?
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))
    }

    pub async fn active_sessions(&self) -> SessionResult<Vec<Session>> {
        Ok(self.store.active_sessions().await?)
    }

    pub async fn submit_transcript(
        &self,
        session_id: &str,
        text: &str,
        confidence: Option<f32>,
    ) -> SessionResult<Option<TranscriptLine>> {
        self.submit_transcript_at(session_id, text, confidence, Utc::now())
            .await
    }

    /// Append a line received at `at`. Blank text produces no line.
    ///
    /// A timestamp older than the session's last line is raised to it so that
    /// insertion order and timestamp order agree.
    pub async fn submit_transcript_at(
        &self,
        session_id: &str,
        text: &str,
        confidence: Option<f32>,
        at: DateTime<Utc>,
    ) -> SessionResult<Option<TranscriptLine>> {
        if text.trim().is_empty() {
            return Ok(None);
        }
        let lock = self.session_lock(session_id);
        let guard = lock.lock().await;
        if let Err(e) = self.require_active(session_id).await {
            drop(guard);
            return Err(self.forget_inactive(session_id, e));
        }

        let previous = self.store.last_line(session_id).await?;
        let at = previous.as_ref().map_or(at, |p| at.max(p.timestamp));
        let speaker = self.speaker.infer(previous.as_ref(), at);
        let line = TranscriptLine::new(speaker, text, at, confidence.map(|c| c.clamp(0.0, 1.0)));
        self.store.append_line(session_id, &line).await?;

        self.broadcaster.broadcast(
            session_id,
            SessionEvent::TranscriptAppended { line: line.clone() },
        );
        self.scheduler.on_transcript_line(session_id, &line);
        drop(guard);
        Ok(Some(line))
    }

    /// Transcribe an audio chunk and submit the text. Silence or a failed
    /// transcription yields no line and no scheduler event.
    pub async fn ingest_audio(&self, session_id: &str, audio: &[u8]) -> SessionResult<Option<TranscriptLine>> {
        let transcriber = self
            .transcriber
            .as_ref()
            .ok_or(SessionError::TranscriptionUnavailable)?;
        self.require_active(session_id).await?;

        let text = match transcriber.transcribe(audio).await {
            Ok(Some(text)) => text,
            Ok(None) => return Ok(None),
            Err(e) => {
                warn!(session_id = %session_id, "⚠ Transcription failed: {}", e);
                return Ok(None);
            }
        };
        self.submit_transcript(session_id, &text, None).await
    }

    /// Clinician-initiated generation, outside the batch schedule.
    pub async fn request_suggestions(&self, session_id: &str) -> SessionResult<Vec<Suggestion>> {
        // Checked under the session lock so a concurrent end_session cannot slip in
        // between the check and registering the token.
        let cancel = {
            let lock = self.session_lock(session_id);
            let guard = lock.lock().await;
            if let Err(e) = self.require_active(session_id).await {
                drop(guard);
                return Err(self.forget_inactive(session_id, e));
            }
            self.on_demand
                .entry(session_id.to_string())
                .or_default()
                .clone()
        };
        let suggestions = self
            .pipeline
            .generate(session_id, TriggerSource::OnDemand, &cancel)
            .await;
        if !suggestions.is_empty() {
            self.broadcaster.broadcast(
                session_id,
                SessionEvent::SuggestionsReady {
                    source: TriggerSource::OnDemand,
                    suggestions: suggestions.clone(),
                },
            );
        }
        Ok(suggestions)
    }

    pub async fn list_suggestions(&self, session_id: &str) -> SessionResult<Vec<Suggestion>> {
        self.get_session(session_id).await?;
        Ok(self.store.list_suggestions(session_id).await?)
    }

    pub async fn recent_transcript(&self, session_id: &str, limit: usize) -> SessionResult<Vec<TranscriptLine>> {
        self.get_session(session_id).await?;
        Ok(self.store.recent_lines(session_id, limit).await?)
    }

    /// Complete the session and release its scheduler state. Calling it again
    /// returns the already-completed session.
    pub async fn end_session(&self, session_id: &str) -> SessionResult<Session> {
        let lock = self.session_lock(session_id);
        let (session, was_active) = {
            let guard = lock.lock().await;
            let current = match self.get_session(session_id).await {
                Ok(current) => current,
                Err(e) => {
                    drop(guard);
                    return Err(self.forget_inactive(session_id, e));
                }
            };
            if !current.is_active() {
                (current, false)
            } else {
                let ended = self
                    .store
                    .complete_session(session_id, Utc::now())
                    .await?
                    .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
                (ended, true)
            }
        };

        self.scheduler.cleanup_session(session_id);
        if let Some((_, cancel)) = self.on_demand.remove(session_id) {
            cancel.cancel();
        }
        self.locks.remove(session_id);

        if was_active {
            self.broadcaster.broadcast(
                session_id,
                SessionEvent::SessionEnded {
                    session_id: session_id.to_string(),
                },
            );
            info!(session_id = %session_id, "✓ Session ended");
        }
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::ChannelBroadcaster;
    use crate::config::KnowledgeConfig;
    use crate::context::ContextAggregator;
    use crate::knowledge::{HashingEmbedder, KnowledgeIndex, MemoryVectorBackend, SearchProfile};
    use crate::llm::{ChatCompleter, ChatCompletion, LlmResult};
    use crate::skills::SkillCatalog;
    use crate::store::MemoryStore;
    use std::time::Duration;

    struct SlowLlm;

    #[async_trait]
    impl ChatCompleter for SlowLlm {
        async fn complete(&self, _system: &str, _user: &str) -> LlmResult<ChatCompletion> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(ChatCompletion {
                text: r#"{"suggestions":[{"type":"clinical","content":"Check vitals","urgency":"low","confidence":0.6}]}"#
                    .to_string(),
                model: "slow".to_string(),
                usage: None,
            })
        }

        fn model(&self) -> &str {
            "slow"
        }
    }

    fn service() -> Arc<LiveSessionService> {
        let store: Arc<dyn SessionStore> = Arc::new(MemoryStore::new());
        let knowledge = Arc::new(KnowledgeIndex::new(
            Arc::new(HashingEmbedder::new(64)),
            Arc::new(MemoryVectorBackend::new()),
            &KnowledgeConfig::default(),
        ));
        let aggregator = ContextAggregator::new(
            knowledge,
            None,
            Arc::new(SkillCatalog::builtin()),
            SearchProfile::BROAD_CONTEXT,
            10,
        );
        let pipeline = Arc::new(SuggestionPipeline::new(aggregator, Arc::new(SlowLlm), Arc::clone(&store), 10));
        Arc::new(
            LiveSessionService::new(
                store,
                pipeline,
                Arc::new(ChannelBroadcaster::new()),
                None,
                &SchedulerConfig::default(),
                &SpeakerConfig::default(),
            )
            .unwrap(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn end_session_cancels_on_demand_work_and_leaves_no_tokens() {
        let svc = service();
        let session = svc.start_session("dr-1", None).await.unwrap();
        svc.submit_transcript(&session.id, "How are you feeling today?", None)
            .await
            .unwrap();

        let in_flight = {
            let svc = Arc::clone(&svc);
            let id = session.id.clone();
            tokio::spawn(async move { svc.request_suggestions(&id).await })
        };
        while svc.on_demand.is_empty() {
            tokio::task::yield_now().await;
        }

        svc.end_session(&session.id).await.unwrap();
        assert!(svc.on_demand.is_empty());
        assert!(in_flight.await.unwrap().unwrap().is_empty());

        let err = svc.request_suggestions(&session.id).await.unwrap_err();
        assert!(matches!(err, SessionError::NotActive(_)));
        assert!(svc.on_demand.is_empty());
        assert!(svc.locks.is_empty());
        assert!(svc.list_suggestions(&session.id).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_calls_do_not_leave_session_locks() {
        let svc = service();
        let session = svc.start_session("dr-2", Some("P9")).await.unwrap();
        svc.end_session(&session.id).await.unwrap();

        assert!(matches!(
            svc.submit_transcript(&session.id, "still there?", None).await,
            Err(SessionError::NotActive(_))
        ));
        assert!(matches!(
            svc.submit_transcript("missing", "hello", None).await,
            Err(SessionError::NotFound(_))
        ));
        assert!(matches!(svc.end_session("missing").await, Err(SessionError::NotFound(_))));
        assert!(svc.locks.is_empty());
    }
}
