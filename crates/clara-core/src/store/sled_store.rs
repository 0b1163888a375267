//! Sled-backed store. One tree per entity; transcript and suggestion keys are
//! `session_id \0 seq` with a big-endian sequence so prefix scans return
//! insertion order.

use super::{SessionStore, StoreError, StoreResult};
use crate::models::{Session, Suggestion, TranscriptLine};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use std::path::Path;
use tracing::info;

const SESSIONS_TREE: &str = "sessions";
const TRANSCRIPTS_TREE: &str = "transcripts";
const SUGGESTIONS_TREE: &str = "suggestions";

pub struct SledStore {
    db: sled::Db,
    sessions: sled::Tree,
    transcripts: sled::Tree,
    suggestions: sled::Tree,
}

fn prefix(session_id: &str) -> Vec<u8> {
    let mut key = session_id.as_bytes().to_vec();
    key.push(0);
    key
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    Ok(serde_json::from_slice(bytes)?)
}

impl SledStore {
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let db = sled::open(path.as_ref())?;
        info!("✓ Session store opened at {}", path.as_ref().display());
        Self::from_db(db)
    }

    pub fn from_db(db: sled::Db) -> StoreResult<Self> {
        Ok(Self {
            sessions: db.open_tree(SESSIONS_TREE)?,
            transcripts: db.open_tree(TRANSCRIPTS_TREE)?,
            suggestions: db.open_tree(SUGGESTIONS_TREE)?,
            db,
        })
    }

    fn sequenced_key(&self, session_id: &str) -> StoreResult<Vec<u8>> {
        let mut key = prefix(session_id);
        key.extend_from_slice(&self.db.generate_id()?.to_be_bytes());
        Ok(key)
    }
}

#[async_trait]
impl SessionStore for SledStore {
    async fn create_session(&self, session: &Session) -> StoreResult<()> {
        self.sessions
            .insert(session.id.as_bytes(), serde_json::to_vec(session)?)?;
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> StoreResult<Option<Session>> {
        self.sessions
            .get(session_id.as_bytes())?
            .map(|v| decode(&v))
            .transpose()
    }

    async fn complete_session(&self, session_id: &str, ended_at: DateTime<Utc>) -> StoreResult<Option<Session>> {
        let Some(mut session) = self.get_session(session_id).await? else {
            return Ok(None);
        };
        session.complete(ended_at);
        self.sessions
            .insert(session.id.as_bytes(), serde_json::to_vec(&session)?)?;
        Ok(Some(session))
    }

    async fn active_sessions(&self) -> StoreResult<Vec<Session>> {
        let mut out = Vec::new();
        for item in self.sessions.iter() {
            let (_, v) = item?;
            let session: Session = decode(&v)?;
            if session.is_active() {
                out.push(session);
            }
        }
        Ok(out)
    }

    async fn append_line(&self, session_id: &str, line: &TranscriptLine) -> StoreResult<()> {
        if !self.sessions.contains_key(session_id.as_bytes())? {
            return Err(StoreError::SessionNotFound(session_id.to_string()));
        }
        let key = self.sequenced_key(session_id)?;
        self.transcripts.insert(key, serde_json::to_vec(line)?)?;
        Ok(())
    }

    async fn last_line(&self, session_id: &str) -> StoreResult<Option<TranscriptLine>> {
        match self.transcripts.scan_prefix(prefix(session_id)).next_back() {
            Some(item) => {
                let (_, v) = item?;
                Ok(Some(decode(&v)?))
            }
            None => Ok(None),
        }
    }

    async fn recent_lines(&self, session_id: &str, limit: usize) -> StoreResult<Vec<TranscriptLine>> {
        let mut lines = Vec::with_capacity(limit);
        for item in self.transcripts.scan_prefix(prefix(session_id)).rev().take(limit) {
            let (_, v) = item?;
            lines.push(decode(&v)?);
        }
        lines.reverse();
        Ok(lines)
    }

    async fn save_suggestions(&self, session_id: &str, suggestions: &[Suggestion]) -> StoreResult<()> {
        let mut batch = sled::Batch::default();
        for s in suggestions {
            batch.insert(self.sequenced_key(session_id)?, serde_json::to_vec(s)?);
        }
        self.suggestions.apply_batch(batch)?;
        self.suggestions.flush()?;
        Ok(())
    }

    async fn list_suggestions(&self, session_id: &str) -> StoreResult<Vec<Suggestion>> {
        let mut out = Vec::new();
        for item in self.suggestions.scan_prefix(prefix(session_id)) {
            let (_, v) = item?;
            out.push(decode(&v)?);
        }
        Ok(out)
    }
}
