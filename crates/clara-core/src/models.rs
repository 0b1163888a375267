//! Entities flowing through the live-session pipeline: sessions, transcript lines,
//! suggestions and knowledge chunks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Errors raised when an entity is constructed with values that break its invariants.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("suggestion content must not be blank")]
    BlankContent,

    #[error("confidence {0} is outside [0, 1]")]
    ConfidenceOutOfRange(f32),

    #[error("{0} must not be blank")]
    BlankField(&'static str),
}

/// Who spoke a transcript line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Doctor,
    Patient,
}

impl Speaker {
    pub fn opposite(self) -> Self {
        match self {
            Speaker::Doctor => Speaker::Patient,
            Speaker::Patient => Speaker::Doctor,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Speaker::Doctor => "Doctor",
            Speaker::Patient => "Patient",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
}

/// One clinical encounter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub doctor_id: String,
    pub patient_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: SessionStatus,
}

impl Session {
    pub fn new(doctor_id: &str, patient_id: Option<&str>) -> Result<Self, ModelError> {
        let doctor_id = doctor_id.trim();
        if doctor_id.is_empty() {
            return Err(ModelError::BlankField("doctor_id"));
        }
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            doctor_id: doctor_id.to_string(),
            patient_id: patient_id
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty()),
            started_at: Utc::now(),
            ended_at: None,
            status: SessionStatus::Active,
        })
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    /// Marks the session completed. Idempotent: a second call keeps the first end time.
    pub fn complete(&mut self, at: DateTime<Utc>) {
        if self.status == SessionStatus::Completed {
            return;
        }
        self.status = SessionStatus::Completed;
        self.ended_at = Some(at);
    }
}

/// A single utterance. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptLine {
    pub id: String,
    pub speaker: Speaker,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

impl TranscriptLine {
    pub fn new(speaker: Speaker, text: &str, timestamp: DateTime<Utc>, confidence: Option<f32>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            speaker,
            text: text.trim().to_string(),
            timestamp,
            confidence,
        }
    }
}

/// What caused a suggestion generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    Batch,
    OnDemand,
}

impl TriggerSource {
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerSource::Batch => "batch",
            TriggerSource::OnDemand => "on_demand",
        }
    }
}

/// A validated clinical suggestion. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub id: String,
    pub session_id: String,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub urgency: String,
    pub confidence: f32,
    pub source: TriggerSource,
    pub triggered_at: DateTime<Utc>,
}

impl Suggestion {
    /// Builds a suggestion from already-sanitized fields.
    ///
    /// Blank content or a confidence outside `[0, 1]` is a caller bug and is rejected.
    pub fn new(
        session_id: &str,
        content: &str,
        kind: &str,
        urgency: &str,
        confidence: f32,
        source: TriggerSource,
    ) -> Result<Self, ModelError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ModelError::BlankContent);
        }
        if !(0.0..=1.0).contains(&confidence) {
            return Err(ModelError::ConfidenceOutOfRange(confidence));
        }
        if kind.trim().is_empty() {
            return Err(ModelError::BlankField("type"));
        }
        if urgency.trim().is_empty() {
            return Err(ModelError::BlankField("urgency"));
        }
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            content: content.to_string(),
            kind: kind.trim().to_string(),
            urgency: urgency.trim().to_string(),
            confidence,
            source,
            triggered_at: Utc::now(),
        })
    }
}

/// An embedded slice of a reference document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeChunk {
    pub id: String,
    pub document_id: String,
    pub document_name: String,
    pub content: String,
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub category: Option<String>,
    pub chunk_index: u32,
}

/// Patient background fetched from the practice system.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientContext {
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub allergies: Vec<String>,
    #[serde(default)]
    pub medications: Vec<String>,
    #[serde(default)]
    pub conditions: Vec<String>,
    #[serde(default)]
    pub recent_visit_reason: Option<String>,
}

impl PatientContext {
    pub fn is_empty(&self) -> bool {
        self.age.is_none()
            && self.gender.is_none()
            && self.allergies.is_empty()
            && self.medications.is_empty()
            && self.conditions.is_empty()
            && self.recent_visit_reason.is_none()
    }

    /// Renders the populated fields as prompt bullet lines.
    pub fn format_for_prompt(&self) -> String {
        let mut out = Vec::new();
        if let Some(age) = self.age {
            out.push(format!("- Age: {}", age));
        }
        if let Some(ref gender) = self.gender {
            out.push(format!("- Gender: {}", gender));
        }
        if !self.allergies.is_empty() {
            out.push(format!("- Allergies: {}", self.allergies.join(", ")));
        }
        if !self.medications.is_empty() {
            out.push(format!("- Active medications: {}", self.medications.join(", ")));
        }
        if !self.conditions.is_empty() {
            out.push(format!("- Chronic conditions: {}", self.conditions.join(", ")));
        }
        if let Some(ref reason) = self.recent_visit_reason {
            out.push(format!("- Recent visit reason: {}", reason));
        }
        out.join("\n")
    }
}
