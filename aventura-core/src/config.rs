//! Story configuration.
//!
//! Collects every knob the orchestration core honors: narration mode,
//! memory/chapter thresholds, entry selection policy, and the mapping from
//! pipeline roles to provider model ids.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Temperature for narrator generations.
pub const NARRATION_TEMPERATURE: f32 = 0.8;

/// Temperature for structured calls (classification, retrieval, tools).
pub const STRUCTURED_TEMPERATURE: f32 = 0.7;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("chapterThreshold must be at least 1 (got {0})")]
    ChapterThreshold(u32),

    #[error("recentWindow must be at least 1")]
    RecentWindow,

    #[error("historyTokenBudget must be at least 1")]
    HistoryBudget,
}

/// Narration mode for a story.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoryMode {
    Adventure,
    CreativeWriting,
}

/// Pipeline roles that resolve to a provider model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelRole {
    Narrator,
    Classifier,
    Retrieval,
    Summarization,
    Suggestions,
}

/// Quality tier mapping each role to a default model id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    Swift,
    Balanced,
    Vivid,
}

impl QualityTier {
    /// Default model id for a role at this tier.
    pub fn default_model(&self, role: ModelRole) -> &'static str {
        match self {
            QualityTier::Swift => "gpt-4o-mini",
            QualityTier::Balanced => match role {
                ModelRole::Narrator | ModelRole::Summarization => "gpt-4o",
                _ => "gpt-4o-mini",
            },
            QualityTier::Vivid => match role {
                ModelRole::Narrator | ModelRole::Summarization => "gpt-4.1",
                ModelRole::Classifier => "gpt-4o",
                _ => "gpt-4o-mini",
            },
        }
    }
}

/// Per-role model overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoleModels {
    pub narrator: Option<String>,
    pub classifier: Option<String>,
    pub retrieval: Option<String>,
    pub summarization: Option<String>,
    pub suggestions: Option<String>,
}

impl RoleModels {
    fn get(&self, role: ModelRole) -> Option<&str> {
        match role {
            ModelRole::Narrator => self.narrator.as_deref(),
            ModelRole::Classifier => self.classifier.as_deref(),
            ModelRole::Retrieval => self.retrieval.as_deref(),
            ModelRole::Summarization => self.summarization.as_deref(),
            ModelRole::Suggestions => self.suggestions.as_deref(),
        }
    }
}

/// Long-term memory and chapter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MemoryConfig {
    /// Entries past the last boundary before a chapter is considered.
    pub chapter_threshold: u32,
    /// Trailing entries never consumed by a chapter.
    pub chapter_buffer: u32,
    /// Whether threshold-triggered chapter creation is enabled.
    pub auto_summarize: bool,
    /// Whether chapter retrieval runs at all.
    pub enable_retrieval: bool,
    /// Cap on chapters queried per retrieval.
    pub max_chapters_per_retrieval: usize,
    /// Whether chapters may be grouped into arcs.
    pub enable_arcs: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            chapter_threshold: 50,
            chapter_buffer: 10,
            auto_summarize: true,
            enable_retrieval: true,
            max_chapters_per_retrieval: 4,
            enable_arcs: false,
        }
    }
}

/// How aggressively entries are injected into prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InjectionScope {
    /// Full tiered selection.
    Auto,
    /// Every entry except mode-never ones.
    All,
    /// State-based (Tier 1) selection only.
    StateOnly,
}

/// Entry selection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EntryConfig {
    /// Whether Tier-3 model-assisted selection may run.
    pub enable_llm_selection: bool,
    /// Pool size above which Tier 3 kicks in.
    pub llm_threshold: usize,
    /// Injection aggressiveness.
    pub injection_mode: InjectionScope,
    /// Token budget for injected entries.
    pub max_entry_tokens: usize,
}

impl Default for EntryConfig {
    fn default() -> Self {
        Self {
            enable_llm_selection: true,
            llm_threshold: 30,
            injection_mode: InjectionScope::Auto,
            max_entry_tokens: 2000,
        }
    }
}

/// Complete configuration for one story.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoryConfig {
    pub mode: StoryMode,
    pub memory: MemoryConfig,
    pub entries: EntryConfig,
    pub quality: QualityTier,
    pub models: RoleModels,
    /// Recent messages included in decision prompts and Tier-2 matching.
    pub recent_window: usize,
    /// Token budget for the narrator conversation window.
    pub history_token_budget: usize,
}

impl Default for StoryConfig {
    fn default() -> Self {
        Self {
            mode: StoryMode::Adventure,
            memory: MemoryConfig::default(),
            entries: EntryConfig::default(),
            quality: QualityTier::Balanced,
            models: RoleModels::default(),
            recent_window: 6,
            history_token_budget: 8000,
        }
    }
}

impl StoryConfig {
    pub fn new(mode: StoryMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub fn with_memory(mut self, memory: MemoryConfig) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_entries(mut self, entries: EntryConfig) -> Self {
        self.entries = entries;
        self
    }

    pub fn with_quality(mut self, quality: QualityTier) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_models(mut self, models: RoleModels) -> Self {
        self.models = models;
        self
    }

    pub fn with_recent_window(mut self, window: usize) -> Self {
        self.recent_window = window;
        self
    }

    /// Resolve the model id for a role: per-role override first, quality
    /// tier default otherwise.
    pub fn resolve_model(&self, role: ModelRole) -> String {
        self.models
            .get(role)
            .map(str::to_string)
            .unwrap_or_else(|| self.quality.default_model(role).to_string())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.memory.chapter_threshold < 1 {
            return Err(ConfigError::ChapterThreshold(self.memory.chapter_threshold));
        }
        if self.recent_window < 1 {
            return Err(ConfigError::RecentWindow);
        }
        if self.history_token_budget < 1 {
            return Err(ConfigError::HistoryBudget);
        }
        Ok(())
    }
}
