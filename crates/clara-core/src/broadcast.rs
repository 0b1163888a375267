//! Live session events pushed to connected clients.

use crate::models::{Suggestion, TranscriptLine, TriggerSource};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    TranscriptAppended {
        line: TranscriptLine,
    },
    SuggestionsReady {
        source: TriggerSource,
        suggestions: Vec<Suggestion>,
    },
    SessionEnded {
        session_id: String,
    },
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::TranscriptAppended { .. } => "transcript_appended",
            SessionEvent::SuggestionsReady { .. } => "suggestions_ready",
            SessionEvent::SessionEnded { .. } => "session_ended",
        }
    }
}

/// Fire-and-forget delivery; implementations must not block.
pub trait Broadcaster: Send + Sync {
    fn broadcast(&self, session_id: &str, event: SessionEvent);
}

/// One `tokio::sync::broadcast` channel per session, created on first use.
#[derive(Debug, Default)]
pub struct ChannelBroadcaster {
    channels: DashMap<String, broadcast::Sender<SessionEvent>>,
}

impl ChannelBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, session_id: &str) -> broadcast::Receiver<SessionEvent> {
        self.channels
            .entry(session_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Drop the session's sender; subscribers see the stream end.
    pub fn close(&self, session_id: &str) {
        self.channels.remove(session_id);
    }

    pub fn open_channels(&self) -> usize {
        self.channels.len()
    }
}

impl Broadcaster for ChannelBroadcaster {
    fn broadcast(&self, session_id: &str, event: SessionEvent) {
        let Some(tx) = self.channels.get(session_id) else {
            return;
        };
        let name = event.name();
        // Err only means nobody is listening right now.
        if tx.send(event).is_err() {
            debug!(session_id = %session_id, "No subscribers for {}", name);
        }
    }
}
