//! Structured classification of narration passages.
//!
//! After each narration the classifier turns free-form prose into a typed
//! delta: entry updates, new entries, a scene block, chapter analysis, and
//! voice context. The model must answer with a single JSON document; a
//! reply that fails to parse is retried with a stricter reminder and
//! exponential backoff, and exhausting the retries is non-fatal (the turn
//! simply proceeds without state updates).

use crate::config::{ModelRole, StoryConfig, StoryMode, STRUCTURED_TEMPERATURE};
use crate::world::EntryType;
use provider::{ChatMessage, CompletionRequest, Provider, ProviderError, RetryPolicy};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Attempts before classification is abandoned.
const MAX_SCHEMA_ATTEMPTS: u32 = 5;

/// Token budget for classification responses.
const CLASSIFY_MAX_TOKENS: usize = 2000;

const REMINDER: &str = "Your previous reply was not valid JSON. Respond with ONLY one valid \
JSON object matching the schema. No prose, no markdown fences.";

/// Errors from classification.
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Response failed schema validation after {attempts} attempts: {message}")]
    Schema { attempts: u32, message: String },
}

/// A visual element worth illustrating, surfaced to image consumers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VisualElement {
    pub text_span: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub importance: f32,
    pub image_prompt: String,
    pub generate_immediately: bool,
}

/// A patch for an entry's mutable fields. Only fields present in the JSON
/// are assigned; everything else keeps its current value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EntryChanges {
    pub description: Option<String>,
    pub aliases: Option<Vec<String>>,
    pub priority: Option<i32>,
    pub keywords: Option<Vec<String>>,
    pub is_present: Option<bool>,
    pub disposition: Option<String>,
    pub relationship: Option<i32>,
    pub is_current_location: Option<bool>,
    pub in_inventory: Option<bool>,
    pub holder: Option<String>,
    pub reputation: Option<i32>,
    pub occurred: Option<bool>,
}

/// An update to a known entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EntryUpdate {
    pub entry_id: String,
    pub changes: EntryChanges,
}

/// A world-model entry the classifier wants created.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub initial_state: Option<EntryChanges>,
}

/// Scene-level changes: location and presence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SceneUpdate {
    pub new_location_name: Option<String>,
    pub present_character_ids: Vec<String>,
    /// Opaque progression marker (none/minutes/hours/days), forwarded
    /// unchanged to consumers.
    pub time_progression: Option<String>,
}

/// The entry-delta portion of a classification.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EntryUpdates {
    pub updates: Vec<EntryUpdate>,
    pub new_entries: Vec<NewEntry>,
    pub scene: Option<SceneUpdate>,
}

/// Chapter bookkeeping from the classifier.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChapterAnalysis {
    pub should_create_chapter: bool,
    pub reason: String,
    pub suggested_title: Option<String>,
}

/// Voice hints for TTS consumers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VoiceContext {
    pub primary_speaker: Option<String>,
    pub mood: String,
}

/// The full classification document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClassificationResult {
    pub visual_elements: Vec<VisualElement>,
    pub entry_updates: EntryUpdates,
    pub chapter_analysis: ChapterAnalysis,
    pub voice_context: VoiceContext,
    /// Creative-mode payload, forwarded verbatim.
    pub creative_updates: Option<serde_json::Value>,
}

/// Classify a narration passage into a structured delta.
pub async fn classify(
    provider: &dyn Provider,
    config: &StoryConfig,
    narration: &str,
    user_action: &str,
    world_snapshot: &str,
) -> Result<ClassificationResult, ClassifierError> {
    let mut messages = vec![
        ChatMessage::system(build_instructions(config.mode)),
        ChatMessage::user(format!(
            "## Player Action\n{user_action}\n\n\
             ## Narration\n{narration}\n\n\
             ## Known Entries\n{world_snapshot}"
        )),
    ];

    let backoff = RetryPolicy::default();
    let mut attempt = 0;
    loop {
        let request = CompletionRequest::new(config.resolve_model(ModelRole::Classifier))
            .with_messages(messages.clone())
            .with_temperature(STRUCTURED_TEMPERATURE)
            .with_max_tokens(CLASSIFY_MAX_TOKENS);

        let raw = provider.complete(request).await?.content;

        match parse_classification(&raw) {
            Ok(result) => return Ok(result),
            Err(e) => {
                attempt += 1;
                if attempt >= MAX_SCHEMA_ATTEMPTS {
                    return Err(ClassifierError::Schema {
                        attempts: attempt,
                        message: e.to_string(),
                    });
                }
                tracing::warn!(attempt, error = %e, "classification parse failed, retrying with reminder");
                let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=250));
                tokio::time::sleep(backoff.backoff(attempt - 1) + jitter).await;
                messages.push(ChatMessage::assistant(raw));
                messages.push(ChatMessage::user(REMINDER));
            }
        }
    }
}

/// Parse a raw model reply into a classification result.
pub fn parse_classification(raw: &str) -> Result<ClassificationResult, serde_json::Error> {
    serde_json::from_str(extract_json(raw))
}

fn build_instructions(mode: StoryMode) -> String {
    let mut instructions = String::from(
        "You classify a narration passage from an interactive story into a \
structured state delta.\n\n\
Respond with ONLY a JSON object of this shape:\n\
{\n\
  \"visualElements\": [{\"textSpan\", \"type\", \"importance\", \"imagePrompt\", \"generateImmediately\"}],\n\
  \"entryUpdates\": {\n\
    \"updates\": [{\"entryId\", \"changes\"}],\n\
    \"newEntries\": [{\"name\", \"type\", \"description\", \"aliases\", \"initialState\"}],\n\
    \"scene\": {\"newLocationName\", \"presentCharacterIds\", \"timeProgression\"}\n\
  },\n\
  \"chapterAnalysis\": {\"shouldCreateChapter\", \"reason\", \"suggestedTitle\"},\n\
  \"voiceContext\": {\"primarySpeaker\", \"mood\"}\n\
}\n\n\
Rules:\n\
- Be conservative: record only changes the passage clearly supports.\n\
- Use newEntries only when no known entry matches the name or an alias \
(matching is case-insensitive).\n\
- entryId values must come from the known-entries list verbatim.\n\
- presentCharacterIds may only name known characters or characters you \
are creating in newEntries.\n\
- Entry types are: character, location, item, faction, concept, event.",
    );
    if mode == StoryMode::CreativeWriting {
        instructions.push_str(
            "\n- You may add a \"creativeUpdates\" object with free-form \
creative-mode notes; it is passed through untouched.",
        );
    }
    instructions
}

/// Extract the JSON body from a reply that may wrap it in markdown fences.
pub(crate) fn extract_json(text: &str) -> &str {
    let trimmed = text.trim();
    for fence in ["```json", "```"] {
        let Some(open) = trimmed.find(fence) else {
            continue;
        };
        let body = &trimmed[open + fence.len()..];
        if let Some(close) = body.find("```") {
            return body[..close].trim();
        }
    }
    trimmed
}
