//! Clara configuration: built-in defaults, an optional TOML file, then `CLARA__*`
//! environment overrides.
//!
//! | Env | Default | Description |
//! |-----|---------|-------------|
//! | CLARA_CONFIG | config/clara | Path of the TOML file (extension optional). |
//! | CLARA__PORT | 8010 | Gateway HTTP port. |
//! | CLARA__STORAGE_BACKEND | sled | `sled` or `memory`. |
//! | CLARA__SCHEDULER__UTTERANCE_THRESHOLD | 5 | Patient lines per batch trigger. |
//! | CLARA__SCHEDULER__DEBOUNCE_SECS | 60 | Time-based trigger window. |
//! | CLARA__LLM__API_KEY | (OPENROUTER_API_KEY) | Chat completion key. |

use crate::knowledge::SearchProfile;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "config/clara";

fn default_app_name() -> String {
    "Clara Live Assist".to_string()
}

fn default_port() -> u16 {
    8010
}

fn default_storage_path() -> String {
    "./data".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Sled,
    Memory,
}

/// Top-level configuration for the core and the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaraConfig {
    #[serde(default = "default_app_name")]
    pub app_name: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Base directory for sled databases.
    #[serde(default = "default_storage_path")]
    pub storage_path: String,
    #[serde(default)]
    pub storage_backend: StorageBackend,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub speaker: SpeakerConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub knowledge: KnowledgeConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub patient_context: PatientContextConfig,
    #[serde(default)]
    pub transcription: TranscriptionConfig,
    /// Optional TOML file with extra clinical skills.
    #[serde(default)]
    pub skills_path: Option<String>,
}

impl Default for ClaraConfig {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            port: default_port(),
            storage_path: default_storage_path(),
            storage_backend: StorageBackend::default(),
            scheduler: SchedulerConfig::default(),
            speaker: SpeakerConfig::default(),
            pipeline: PipelineConfig::default(),
            knowledge: KnowledgeConfig::default(),
            llm: LlmConfig::default(),
            embedding: EmbeddingConfig::default(),
            patient_context: PatientContextConfig::default(),
            transcription: TranscriptionConfig::default(),
            skills_path: None,
        }
    }
}

impl ClaraConfig {
    /// Load config from file and environment. Precedence: env `CLARA__*` > file > defaults.
    pub fn load() -> Result<Self, ::config::ConfigError> {
        let path = std::env::var("CLARA_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(Path::new(&path))
    }

    /// Load from an explicit file path; a missing file is not an error.
    pub fn load_from(path: &Path) -> Result<Self, ::config::ConfigError> {
        let builder = ::config::Config::builder()
            .set_default("app_name", default_app_name())?
            .set_default("port", default_port() as i64)?
            .set_default("storage_path", default_storage_path())?;

        let builder = if path.exists() || path.with_extension("toml").exists() {
            builder.add_source(::config::File::with_name(&path.to_string_lossy()))
        } else {
            builder
        };

        let built = builder
            .add_source(
                ::config::Environment::with_prefix("CLARA")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let cfg: ClaraConfig = built.try_deserialize()?;
        cfg.scheduler
            .validate()
            .map_err(::config::ConfigError::Message)?;
        Ok(cfg)
    }

    pub fn sled_path(&self, name: &str) -> std::path::PathBuf {
        Path::new(&self.storage_path).join(name)
    }
}

fn default_utterance_threshold() -> u32 {
    5
}

fn default_debounce_secs() -> u64 {
    60
}

/// Batch trigger policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_utterance_threshold")]
    pub utterance_threshold: u32,
    #[serde(default = "default_debounce_secs")]
    pub debounce_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            utterance_threshold: default_utterance_threshold(),
            debounce_secs: default_debounce_secs(),
        }
    }
}

impl SchedulerConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_secs(self.debounce_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.utterance_threshold == 0 {
            return Err("scheduler.utterance_threshold must be at least 1".to_string());
        }
        if self.debounce_secs == 0 {
            return Err("scheduler.debounce_secs must be at least 1".to_string());
        }
        Ok(())
    }
}

fn default_turn_gap_ms() -> i64 {
    crate::speaker::DEFAULT_TURN_GAP_MS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeakerConfig {
    #[serde(default = "default_turn_gap_ms")]
    pub turn_gap_ms: i64,
}

impl Default for SpeakerConfig {
    fn default() -> Self {
        Self {
            turn_gap_ms: default_turn_gap_ms(),
        }
    }
}

fn default_recent_window() -> usize {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Most recent transcript lines fed to a suggestion prompt.
    #[serde(default = "default_recent_window")]
    pub recent_window: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            recent_window: default_recent_window(),
        }
    }
}

fn default_lookup_profile() -> SearchProfile {
    SearchProfile::LOOKUP
}

fn default_broad_profile() -> SearchProfile {
    SearchProfile::BROAD_CONTEXT
}

fn default_candidate_factor() -> usize {
    2
}

fn default_chunk_size() -> usize {
    1000
}

fn default_chunk_overlap() -> usize {
    200
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    /// User-facing search.
    #[serde(default = "default_lookup_profile")]
    pub lookup: SearchProfile,
    /// Context gathering for suggestion prompts.
    #[serde(default = "default_broad_profile")]
    pub broad: SearchProfile,
    /// Candidates fetched per requested result before the score floor applies.
    #[serde(default = "default_candidate_factor")]
    pub candidate_factor: usize,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            lookup: default_lookup_profile(),
            broad: default_broad_profile(),
            candidate_factor: default_candidate_factor(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_llm_api_base() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_llm_model() -> String {
    "meta-llama/llama-3.3-70b-instruct".to_string()
}

fn default_temperature() -> f32 {
    0.3
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_llm_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_api_base")]
    pub api_base: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: default_llm_api_base(),
            api_key: None,
            model: default_llm_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

impl LlmConfig {
    /// Priority: config file / CLARA__LLM__API_KEY > OPENROUTER_API_KEY.
    /// A blank configured key counts as absent.
    pub fn resolved_api_key(&self) -> Option<String> {
        first_non_blank(self.api_key.as_deref(), std::env::var("OPENROUTER_API_KEY").ok())
    }
}

fn first_non_blank(configured: Option<&str>, fallback: Option<String>) -> Option<String> {
    let non_blank = |k: &str| {
        let k = k.trim();
        (!k.is_empty()).then(|| k.to_string())
    };
    configured
        .and_then(non_blank)
        .or_else(|| fallback.as_deref().and_then(non_blank))
}

fn default_embedding_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_dimensions() -> usize {
    384
}

fn default_http_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_api_base")]
    pub api_base: String,
    /// Without a key the local hashing embedder is used.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_embedding_dimensions")]
    pub dimensions: usize,
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            api_base: default_embedding_api_base(),
            api_key: None,
            model: default_embedding_model(),
            dimensions: default_embedding_dimensions(),
            timeout_secs: default_http_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientContextConfig {
    /// Base URL of the practice API. Unset disables patient context.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for PatientContextConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_token: None,
            timeout_secs: default_http_timeout_secs(),
        }
    }
}

fn default_transcription_model() -> String {
    "whisper-1".to_string()
}

fn default_transcription_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    #[serde(default = "default_embedding_api_base")]
    pub api_base: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_transcription_model")]
    pub model: String,
    #[serde(default = "default_transcription_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            api_base: default_embedding_api_base(),
            api_key: None,
            model: default_transcription_model(),
            timeout_secs: default_transcription_timeout_secs(),
        }
    }
}
