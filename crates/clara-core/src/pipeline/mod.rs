//! Suggestion pipeline: aggregate context, prompt the model, sanitize its reply,
//! persist what survives.

pub mod parse;

pub use parse::{extract_json_object, parse_suggestions, SanitizedSuggestion};

use crate::context::ContextAggregator;
use crate::llm::{ChatCompleter, LlmError};
use crate::models::{ModelError, Suggestion, TriggerSource};
use crate::prompts::{build_suggestion_prompt, SUGGESTION_SYSTEM};
use crate::store::{SessionStore, StoreError};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Invalid suggestion: {0}")]
    Suggestion(#[from] ModelError),

    #[error("Generation cancelled")]
    Cancelled,
}

pub struct SuggestionPipeline {
    aggregator: ContextAggregator,
    llm: Arc<dyn ChatCompleter>,
    store: Arc<dyn SessionStore>,
    recent_window: usize,
}

impl SuggestionPipeline {
    pub fn new(
        aggregator: ContextAggregator,
        llm: Arc<dyn ChatCompleter>,
        store: Arc<dyn SessionStore>,
        recent_window: usize,
    ) -> Self {
        Self {
            aggregator,
            llm,
            store,
            recent_window: recent_window.max(1),
        }
    }

    /// Generate suggestions for a session. Never fails: any error is logged with the
    /// session id and reported as an empty result.
    pub async fn generate(&self, session_id: &str, source: TriggerSource, cancel: &CancellationToken) -> Vec<Suggestion> {
        match self.try_generate(session_id, source, cancel).await {
            Ok(suggestions) => suggestions,
            Err(PipelineError::Cancelled) => {
                debug!(session_id = %session_id, "Suggestion generation cancelled");
                Vec::new()
            }
            Err(e) => {
                warn!(session_id = %session_id, source = source.as_str(), "⚠ Suggestion generation failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Fallible core of [`generate`](Self::generate). Returns an empty list for a
    /// missing or ended session, an empty transcript, or an unusable model reply.
    pub async fn try_generate(
        &self,
        session_id: &str,
        source: TriggerSource,
        cancel: &CancellationToken,
    ) -> Result<Vec<Suggestion>, PipelineError> {
        let Some(session) = self.store.get_session(session_id).await? else {
            debug!(session_id = %session_id, "Skipping generation for unknown session");
            return Ok(Vec::new());
        };
        if !session.is_active() {
            return Ok(Vec::new());
        }

        let lines = self.store.recent_lines(session_id, self.recent_window).await?;
        let aggregated = tokio::select! {
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            ctx = self.aggregator.aggregate(&lines, session.patient_id.as_deref()) => ctx,
        };
        let Some(ctx) = aggregated else {
            return Ok(Vec::new());
        };

        let prompt = build_suggestion_prompt(&ctx);
        let started = Instant::now();
        let completion = tokio::select! {
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            res = self.llm.complete(SUGGESTION_SYSTEM, &prompt) => res?,
        };
        let usage = completion.usage.unwrap_or_default();
        info!(
            session_id = %session_id,
            model = %completion.model,
            latency_ms = started.elapsed().as_millis() as u64,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            "LLM suggestion call complete"
        );

        let suggestions = parse_suggestions(&completion.text)
            .into_iter()
            .map(|s| Suggestion::new(session_id, &s.content, &s.kind, &s.urgency, s.confidence, source))
            .collect::<Result<Vec<_>, _>>()?;
        if suggestions.is_empty() {
            debug!(session_id = %session_id, "Model reply yielded no suggestions");
            return Ok(suggestions);
        }

        // Past the last await on the model: discard quietly if the session ended meanwhile.
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        match self.store.get_session(session_id).await? {
            Some(s) if s.is_active() => {}
            _ => {
                debug!(session_id = %session_id, "Session ended during generation, discarding {} suggestions", suggestions.len());
                return Ok(Vec::new());
            }
        }

        self.store.save_suggestions(session_id, &suggestions).await?;
        info!(
            session_id = %session_id,
            source = source.as_str(),
            "✓ Generated {} suggestions",
            suggestions.len()
        );
        Ok(suggestions)
    }
}
