//! In-memory store backed by `DashMap`.

use super::{SessionStore, StoreError, StoreResult};
use crate::models::{Session, Suggestion, TranscriptLine};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: DashMap<String, Session>,
    transcripts: DashMap<String, Vec<TranscriptLine>>,
    suggestions: DashMap<String, Vec<Suggestion>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create_session(&self, session: &Session) -> StoreResult<()> {
        self.sessions.insert(session.id.clone(), session.clone());
        self.transcripts.entry(session.id.clone()).or_default();
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> StoreResult<Option<Session>> {
        Ok(self.sessions.get(session_id).map(|s| s.clone()))
    }

    async fn complete_session(&self, session_id: &str, ended_at: DateTime<Utc>) -> StoreResult<Option<Session>> {
        Ok(self.sessions.get_mut(session_id).map(|mut s| {
            s.complete(ended_at);
            s.clone()
        }))
    }

    async fn active_sessions(&self) -> StoreResult<Vec<Session>> {
        Ok(self
            .sessions
            .iter()
            .filter(|s| s.is_active())
            .map(|s| s.clone())
            .collect())
    }

    async fn append_line(&self, session_id: &str, line: &TranscriptLine) -> StoreResult<()> {
        if !self.sessions.contains_key(session_id) {
            return Err(StoreError::SessionNotFound(session_id.to_string()));
        }
        self.transcripts
            .entry(session_id.to_string())
            .or_default()
            .push(line.clone());
        Ok(())
    }

    async fn last_line(&self, session_id: &str) -> StoreResult<Option<TranscriptLine>> {
        Ok(self
            .transcripts
            .get(session_id)
            .and_then(|lines| lines.last().cloned()))
    }

    async fn recent_lines(&self, session_id: &str, limit: usize) -> StoreResult<Vec<TranscriptLine>> {
        Ok(self
            .transcripts
            .get(session_id)
            .map(|lines| {
                let start = lines.len().saturating_sub(limit);
                lines[start..].to_vec()
            })
            .unwrap_or_default())
    }

    async fn save_suggestions(&self, session_id: &str, suggestions: &[Suggestion]) -> StoreResult<()> {
        self.suggestions
            .entry(session_id.to_string())
            .or_default()
            .extend_from_slice(suggestions);
        Ok(())
    }

    async fn list_suggestions(&self, session_id: &str) -> StoreResult<Vec<Suggestion>> {
        Ok(self
            .suggestions
            .get(session_id)
            .map(|s| s.clone())
            .unwrap_or_default())
    }
}
