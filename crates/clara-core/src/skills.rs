//! Clinical skills: static, keyword-triggered prompt blocks ranked by priority.
//!
//! Matching is a pure lookup with no I/O. The catalog is sorted once at
//! construction so the first match is always the highest-priority one.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Skill priority (higher = more urgent).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkillPriority {
    /// Routine reminders
    Low = 1,
    /// Standard follow-up guidance
    Normal = 2,
    /// Conditions needing prompt attention
    High = 3,
    /// Safety-critical presentations
    Critical = 4,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClinicalSkill {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub priority: SkillPriority,
    /// Lowercased on load.
    pub keywords: Vec<String>,
    /// Injected verbatim into the suggestion prompt.
    pub content: String,
}

impl ClinicalSkill {
    fn new(name: &str, priority: SkillPriority, keywords: &[&str], description: &str, content: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            priority,
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
            content: content.to_string(),
        }
    }

    fn matches(&self, haystack_lower: &str) -> bool {
        self.keywords
            .iter()
            .any(|k| !k.is_empty() && haystack_lower.contains(k.as_str()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SkillError {
    #[error("Failed to read skills file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid skills file: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Deserialize)]
struct SkillFile {
    #[serde(default, rename = "skill")]
    skills: Vec<ClinicalSkill>,
}

#[derive(Debug, Clone, Default)]
pub struct SkillCatalog {
    skills: Vec<ClinicalSkill>,
}

impl SkillCatalog {
    /// Catalog sorted by descending priority; ties keep insertion order.
    pub fn new(mut skills: Vec<ClinicalSkill>) -> Self {
        for s in &mut skills {
            s.keywords = s.keywords.iter().map(|k| k.trim().to_lowercase()).collect();
        }
        skills.sort_by(|a, b| b.priority.cmp(&a.priority));
        Self { skills }
    }

    pub fn builtin() -> Self {
        Self::new(vec![
            ClinicalSkill::new(
                "chest_pain_triage",
                SkillPriority::Critical,
                &["chest pain", "chest tightness", "pressure in my chest", "radiating to my arm"],
                "Acute coronary syndrome screen",
                "Chest pain protocol: establish onset, character, radiation and duration. \
                 Ask about exertional component, diaphoresis, dyspnoea, nausea. \
                 Consider ECG and troponin; document cardiac risk factors.",
            ),
            ClinicalSkill::new(
                "pediatric_fever",
                SkillPriority::High,
                &["fever", "temperature", "feverish", "febrile"],
                "Fever assessment with pediatric red flags",
                "Fever workup: record maximum temperature and duration. \
                 Screen for rash, neck stiffness, lethargy, poor feeding, reduced urine output. \
                 Weight-based antipyretic dosing for children.",
            ),
            ClinicalSkill::new(
                "mental_health_screen",
                SkillPriority::High,
                &["depressed", "anxious", "can't sleep", "hopeless", "panic"],
                "Mood and risk screening",
                "Mental health screen: consider PHQ-9 / GAD-7. \
                 Ask directly and sensitively about self-harm and suicidal ideation. \
                 Check sleep, appetite, substance use and support network.",
            ),
            ClinicalSkill::new(
                "medication_reconciliation",
                SkillPriority::Normal,
                &["medication", "pills", "prescription", "dose", "side effect"],
                "Reconcile current medications",
                "Medication reconciliation: confirm each active medication, dose and adherence. \
                 Cross-check against documented allergies and look for interactions.",
            ),
            ClinicalSkill::new(
                "diabetes_follow_up",
                SkillPriority::Normal,
                &["diabetes", "blood sugar", "glucose", "insulin", "a1c"],
                "Routine diabetes review",
                "Diabetes follow-up: review recent HbA1c and home glucose readings, \
                 hypoglycaemic episodes, foot and eye checks, renal function.",
            ),
        ])
    }

    /// Read `[[skill]]` tables from a TOML file.
    pub fn load_toml(path: &Path) -> Result<Vec<ClinicalSkill>, SkillError> {
        let raw = std::fs::read_to_string(path)?;
        let parsed: SkillFile = toml::from_str(&raw)?;
        info!("✓ Loaded {} skills from {}", parsed.skills.len(), path.display());
        Ok(parsed.skills)
    }

    /// Merge extra skills into the catalog, keeping priority order.
    pub fn with_skills(self, extra: Vec<ClinicalSkill>) -> Self {
        let mut all = self.skills;
        all.extend(extra);
        Self::new(all)
    }

    /// Highest-priority skill whose keyword appears in `text` (case-insensitive).
    pub fn match_conversation(&self, text: &str) -> Option<&ClinicalSkill> {
        let lower = text.to_lowercase();
        self.skills.iter().find(|s| s.matches(&lower))
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    pub fn skills(&self) -> &[ClinicalSkill] {
        &self.skills
    }
}
