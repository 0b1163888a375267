//! clara-core: live-session clinical suggestion pipeline.
//!
//! Transcript lines are labelled by speaker, counted by a per-session batch
//! scheduler, and on trigger turned into validated suggestions using retrieved
//! guidelines, patient background and matched clinical skills.

mod broadcast;
mod config;
mod context;
mod llm;
mod models;
mod patient;
mod runtime;
mod scheduler;
mod session;
mod skills;
mod speaker;
mod transcription;
pub mod knowledge;
pub mod pipeline;
pub mod prompts;
pub mod store;

pub use broadcast::{Broadcaster, ChannelBroadcaster, SessionEvent};
pub use self::config::{
    ClaraConfig, EmbeddingConfig, KnowledgeConfig, LlmConfig, PatientContextConfig, PipelineConfig, SchedulerConfig,
    SpeakerConfig, StorageBackend, TranscriptionConfig,
};
pub use context::{AggregatedContext, ContextAggregator};
pub use llm::{ChatCompleter, ChatCompletion, LlmError, LlmResult, OpenRouterClient, TokenUsage, UnconfiguredCompleter};
pub use models::{
    KnowledgeChunk, ModelError, PatientContext, Session, SessionStatus, Speaker, Suggestion, TranscriptLine,
    TriggerSource,
};
pub use patient::{ContextError, HttpPatientContextClient, PatientContextSource};
pub use pipeline::{PipelineError, SuggestionPipeline};
pub use runtime::{BootstrapError, ClaraRuntime};
pub use scheduler::{HandlerError, SchedulerError, SessionBatchScheduler, TriggerHandler, TriggerReason};
pub use session::{LiveSessionService, PipelineTrigger, SessionError, SessionResult};
pub use skills::{ClinicalSkill, SkillCatalog, SkillError, SkillPriority};
pub use speaker::{SpeakerInference, DEFAULT_TURN_GAP_MS};
pub use store::{MemoryStore, SessionStore, SledStore, StoreError, StoreResult};
pub use transcription::{TranscribeError, Transcriber, WhisperApiTranscriber};
