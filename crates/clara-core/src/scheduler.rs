//! Session batch scheduler: decides when a session's suggestions are regenerated.
//!
//! Per session it keeps a patient-utterance counter and one debounce timer. A
//! trigger fires on every `utterance_threshold`-th patient line, or when the
//! debounce window elapses with at least one uncounted patient line. Either
//! way the counter and timer are reset together under the session's map entry
//! lock, and the window is always measured from the last reset.
//!
//! Triggers are fire-and-forget: the handler runs on its own task and its
//! errors are logged here, never propagated.

use crate::config::SchedulerConfig;
use crate::models::{Speaker, TranscriptLine};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerReason {
    PatientUtteranceThreshold,
    TimeThreshold,
}

impl TriggerReason {
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerReason::PatientUtteranceThreshold => "patient_utterance_threshold",
            TriggerReason::TimeThreshold => "time_threshold",
        }
    }
}

/// Receives triggers. `cancel` fires when the session is cleaned up.
#[async_trait]
pub trait TriggerHandler: Send + Sync {
    async fn on_trigger(
        &self,
        session_id: String,
        reason: TriggerReason,
        cancel: CancellationToken,
    ) -> Result<(), HandlerError>;
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Invalid scheduler config: {0}")]
    InvalidConfig(String),
}

struct SessionTriggerState {
    utterances: u32,
    timer: Option<JoinHandle<()>>,
    /// Bumped on every rearm; a timer whose generation no longer matches lost a race.
    generation: u64,
    cancel: CancellationToken,
}

impl SessionTriggerState {
    fn new() -> Self {
        Self {
            utterances: 0,
            timer: None,
            generation: 0,
            cancel: CancellationToken::new(),
        }
    }
}

struct SchedulerInner {
    threshold: u32,
    debounce: Duration,
    handler: Arc<dyn TriggerHandler>,
    sessions: DashMap<String, SessionTriggerState>,
}

impl SchedulerInner {
    /// Cancel any live timer and arm a fresh one for a full window.
    fn arm_timer(inner: &Arc<Self>, session_id: &str, state: &mut SessionTriggerState) {
        if let Some(old) = state.timer.take() {
            old.abort();
        }
        state.generation = state.generation.wrapping_add(1);
        let generation = state.generation;
        let weak: Weak<Self> = Arc::downgrade(inner);
        let id = session_id.to_string();
        let delay = inner.debounce;
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                Self::on_timer_expired(&inner, &id, generation);
            }
        }));
    }

    fn on_timer_expired(inner: &Arc<Self>, session_id: &str, generation: u64) {
        let Some(mut entry) = inner.sessions.get_mut(session_id) else {
            warn!("⚠ Debounce timer fired for unknown session {:?}, dropping", session_id);
            return;
        };
        let state = entry.value_mut();
        if state.generation != generation {
            debug!(session_id = %session_id, "Stale debounce timer discarded");
            return;
        }
        // This task is the live timer; detach it rather than abort itself.
        state.timer = None;
        let pending = state.utterances;
        state.utterances = 0;
        Self::arm_timer(inner, session_id, state);
        let cancel = state.cancel.clone();
        drop(entry);

        if pending > 0 {
            inner.fire(session_id, TriggerReason::TimeThreshold, cancel);
        }
    }

    fn fire(&self, session_id: &str, reason: TriggerReason, cancel: CancellationToken) {
        info!(session_id = %session_id, reason = reason.as_str(), "Suggestion trigger");
        let handler = Arc::clone(&self.handler);
        let id = session_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = handler.on_trigger(id.clone(), reason, cancel).await {
                error!(session_id = %id, reason = reason.as_str(), "Trigger handler failed: {}", e);
            }
        });
    }
}

impl Drop for SchedulerInner {
    fn drop(&mut self) {
        for entry in self.sessions.iter() {
            if let Some(ref timer) = entry.timer {
                timer.abort();
            }
        }
    }
}

/// Cheap to clone; clones share state. Must be used inside a tokio runtime.
#[derive(Clone)]
pub struct SessionBatchScheduler {
    inner: Arc<SchedulerInner>,
}

impl SessionBatchScheduler {
    pub fn new(config: &SchedulerConfig, handler: Arc<dyn TriggerHandler>) -> Result<Self, SchedulerError> {
        config.validate().map_err(SchedulerError::InvalidConfig)?;
        Ok(Self {
            inner: Arc::new(SchedulerInner {
                threshold: config.utterance_threshold,
                debounce: config.debounce(),
                handler,
                sessions: DashMap::new(),
            }),
        })
    }

    /// Record a transcript line. State is created lazily on a session's first line,
    /// which also arms its timer. Only patient lines count.
    ///
    /// Returns the trigger reason when this line fired a trigger.
    pub fn on_transcript_line(&self, session_id: &str, line: &TranscriptLine) -> Option<TriggerReason> {
        let mut entry = self
            .inner
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(SessionTriggerState::new);
        let state = entry.value_mut();
        if state.timer.is_none() {
            SchedulerInner::arm_timer(&self.inner, session_id, state);
        }
        if line.speaker != Speaker::Patient {
            return None;
        }

        state.utterances += 1;
        if state.utterances < self.inner.threshold {
            return None;
        }
        state.utterances = 0;
        SchedulerInner::arm_timer(&self.inner, session_id, state);
        let cancel = state.cancel.clone();
        drop(entry);

        let reason = TriggerReason::PatientUtteranceThreshold;
        self.inner.fire(session_id, reason, cancel);
        Some(reason)
    }

    /// Release a session's state: abort its timer, cancel in-flight triggers.
    /// Returns `false` if there was nothing to clean up.
    pub fn cleanup_session(&self, session_id: &str) -> bool {
        match self.inner.sessions.remove(session_id) {
            Some((_, state)) => {
                if let Some(timer) = state.timer {
                    timer.abort();
                }
                state.cancel.cancel();
                info!(session_id = %session_id, "Scheduler state released");
                true
            }
            None => {
                debug!(session_id = %session_id, "No scheduler state to release");
                false
            }
        }
    }

    pub fn pending_utterances(&self, session_id: &str) -> Option<u32> {
        self.inner.sessions.get(session_id).map(|s| s.utterances)
    }

    pub fn has_live_timer(&self, session_id: &str) -> bool {
        self.inner
            .sessions
            .get(session_id)
            .and_then(|s| s.timer.as_ref().map(|t| !t.is_finished()))
            .unwrap_or(false)
    }

    pub fn active_sessions(&self) -> usize {
        self.inner.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TriggerHandler for Counting {
        async fn on_trigger(&self, _id: String, _reason: TriggerReason, _cancel: CancellationToken) -> Result<(), HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn scheduler(handler: Arc<Counting>) -> SessionBatchScheduler {
        SessionBatchScheduler::new(&SchedulerConfig::default(), handler).unwrap()
    }

    #[test]
    fn zero_threshold_rejected() {
        let cfg = SchedulerConfig {
            utterance_threshold: 0,
            debounce_secs: 60,
        };
        let handler: Arc<dyn TriggerHandler> = Arc::new(Counting::default());
        assert!(matches!(
            SessionBatchScheduler::new(&cfg, handler),
            Err(SchedulerError::InvalidConfig(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn timer_callback_for_unknown_session_is_dropped() {
        let handler = Arc::new(Counting::default());
        let s = scheduler(handler.clone());
        SchedulerInner::on_timer_expired(&s.inner, "no-such-session", 1);
        SchedulerInner::on_timer_expired(&s.inner, "", 0);
        tokio::task::yield_now().await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
        assert_eq!(s.active_sessions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_generation_is_ignored() {
        let handler = Arc::new(Counting::default());
        let s = scheduler(handler.clone());
        let line = TranscriptLine::new(Speaker::Patient, "it hurts", Utc::now(), None);
        s.on_transcript_line("s1", &line);
        let current = s.inner.sessions.get("s1").unwrap().generation;

        SchedulerInner::on_timer_expired(&s.inner, "s1", current.wrapping_sub(1));
        tokio::task::yield_now().await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
        assert_eq!(s.pending_utterances("s1"), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn doctor_lines_arm_timer_but_do_not_count() {
        let s = scheduler(Arc::new(Counting::default()));
        let line = TranscriptLine::new(Speaker::Doctor, "hello", Utc::now(), None);
        assert_eq!(s.on_transcript_line("s1", &line), None);
        assert_eq!(s.pending_utterances("s1"), Some(0));
        assert!(s.has_live_timer("s1"));
    }
}
