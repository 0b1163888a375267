//! Context aggregation: fan out to the knowledge index and the patient source,
//! fan in, and degrade to a missing section when either fails.

use crate::knowledge::{KnowledgeIndex, SearchHit, SearchProfile};
use crate::models::{PatientContext, TranscriptLine};
use crate::patient::PatientContextSource;
use crate::skills::{ClinicalSkill, SkillCatalog};
use std::sync::Arc;
use tracing::{debug, warn};

/// Everything a suggestion prompt is built from. Optional sections are empty or `None`.
#[derive(Debug, Clone, Default)]
pub struct AggregatedContext {
    /// `Speaker: text` lines, oldest first.
    pub conversation: String,
    pub knowledge: Vec<SearchHit>,
    pub patient: Option<PatientContext>,
    pub skill: Option<ClinicalSkill>,
}

pub struct ContextAggregator {
    knowledge: Arc<KnowledgeIndex>,
    patients: Option<Arc<dyn PatientContextSource>>,
    skills: Arc<SkillCatalog>,
    profile: SearchProfile,
    recent_window: usize,
}

impl ContextAggregator {
    pub fn new(
        knowledge: Arc<KnowledgeIndex>,
        patients: Option<Arc<dyn PatientContextSource>>,
        skills: Arc<SkillCatalog>,
        profile: SearchProfile,
        recent_window: usize,
    ) -> Self {
        Self {
            knowledge,
            patients,
            skills,
            profile,
            recent_window: recent_window.max(1),
        }
    }

    /// Build context from the session's recent lines.
    ///
    /// Returns `None` when there are no lines. Knowledge search and patient fetch run
    /// concurrently; a failure in either leaves that section empty.
    pub async fn aggregate(&self, lines: &[TranscriptLine], patient_id: Option<&str>) -> Option<AggregatedContext> {
        if lines.is_empty() {
            return None;
        }
        let mut window: Vec<&TranscriptLine> = lines.iter().collect();
        window.sort_by_key(|l| l.timestamp);
        let start = window.len().saturating_sub(self.recent_window);
        let window = &window[start..];

        let query = window
            .iter()
            .map(|l| l.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let conversation = window
            .iter()
            .map(|l| format!("{}: {}", l.speaker.label(), l.text))
            .collect::<Vec<_>>()
            .join("\n");

        let (knowledge, patient) = tokio::join!(self.search_knowledge(&query), self.fetch_patient(patient_id));
        let skill = self.skills.match_conversation(&query).cloned();

        debug!(
            "Aggregated context: {} lines, {} knowledge hits, patient={}, skill={:?}",
            window.len(),
            knowledge.len(),
            patient.is_some(),
            skill.as_ref().map(|s| s.name.as_str())
        );

        Some(AggregatedContext {
            conversation,
            knowledge,
            patient,
            skill,
        })
    }

    async fn search_knowledge(&self, query: &str) -> Vec<SearchHit> {
        match self.knowledge.search_with(query, self.profile).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!("⚠ Knowledge search failed, continuing without guidelines: {}", e);
                Vec::new()
            }
        }
    }

    async fn fetch_patient(&self, patient_id: Option<&str>) -> Option<PatientContext> {
        let (Some(source), Some(id)) = (self.patients.as_ref(), patient_id) else {
            return None;
        };
        match source.fetch_patient_context(id).await {
            Ok(ctx) => ctx.filter(|c| !c.is_empty()),
            Err(e) => {
                warn!("⚠ Patient context fetch failed for {}: {}", id, e);
                None
            }
        }
    }
}
