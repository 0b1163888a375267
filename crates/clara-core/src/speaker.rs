//! Speaker inference from ordering and timing alone.
//!
//! The doctor opens every session. After that a pause longer than the turn gap
//! means the other party is now talking; anything shorter is the same speaker
//! continuing.

use crate::models::{Speaker, TranscriptLine};
use chrono::{DateTime, Duration, Utc};

/// Default pause after which the speaker is assumed to have changed.
pub const DEFAULT_TURN_GAP_MS: i64 = 3000;

/// Stateless speaker labeller. Holds only the gap threshold.
#[derive(Debug, Clone, Copy)]
pub struct SpeakerInference {
    turn_gap: Duration,
}

impl Default for SpeakerInference {
    fn default() -> Self {
        Self::new(DEFAULT_TURN_GAP_MS)
    }
}

impl SpeakerInference {
    pub fn new(turn_gap_ms: i64) -> Self {
        Self {
            turn_gap: Duration::milliseconds(turn_gap_ms.max(0)),
        }
    }

    /// Label a line arriving at `now` given the most recent prior line of the session.
    ///
    /// The comparison is strict: a gap of exactly the threshold keeps the speaker.
    pub fn infer(&self, previous: Option<&TranscriptLine>, now: DateTime<Utc>) -> Speaker {
        match previous {
            None => Speaker::Doctor,
            Some(prev) => {
                let gap = now - prev.timestamp;
                if gap > self.turn_gap {
                    prev.speaker.opposite()
                } else {
                    prev.speaker
                }
            }
        }
    }
}
