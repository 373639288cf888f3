//! Creative-mode continuation suggestions.
//!
//! After each narration in creative-writing mode, three single-sentence
//! continuations are requested in the background. Failures of any kind
//! produce an empty list; the turn never waits on or fails because of
//! suggestions.

use crate::classifier::extract_json;
use crate::config::{ModelRole, StoryConfig, STRUCTURED_TEMPERATURE};
use provider::{ChatMessage, CompletionRequest, Provider};
use serde::{Deserialize, Serialize};

/// How many continuations to request.
const SUGGESTION_COUNT: usize = 3;

/// Token budget for the suggestions response.
const SUGGESTIONS_MAX_TOKENS: usize = 300;

/// The flavor of a suggested continuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SuggestionKind {
    Action,
    Dialogue,
    Revelation,
    Twist,
}

/// One suggested continuation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    pub text: String,
    #[serde(rename = "type")]
    pub kind: SuggestionKind,
}

/// Request follow-up suggestions for the latest passage.
///
/// Returns an empty list on any provider or parse failure.
pub async fn generate(
    provider: &dyn Provider,
    config: &StoryConfig,
    narration: &str,
    input: &str,
) -> Vec<Suggestion> {
    let prompt = format!(
        "The writer and narrator are mid-scene in a collaborative story.\n\n\
         ## Writer's Direction\n{input}\n\n\
         ## Latest Passage\n{narration}\n\n\
         Offer {SUGGESTION_COUNT} distinct single-sentence ways the writer \
         could continue: vary between concrete actions, spoken dialogue, \
         revelations, and twists.\n\
         Respond with ONLY a JSON array of {SUGGESTION_COUNT} strings."
    );

    let request = CompletionRequest::new(config.resolve_model(ModelRole::Suggestions))
        .with_message(ChatMessage::user(prompt))
        .with_temperature(STRUCTURED_TEMPERATURE)
        .with_max_tokens(SUGGESTIONS_MAX_TOKENS);

    let raw = match provider.complete(request).await {
        Ok(completion) => completion.content,
        Err(e) => {
            tracing::warn!(error = %e, "suggestion generation failed");
            return Vec::new();
        }
    };

    let texts: Vec<String> = match serde_json::from_str(extract_json(&raw)) {
        Ok(texts) => texts,
        Err(e) => {
            tracing::warn!(error = %e, "unparseable suggestions response");
            return Vec::new();
        }
    };

    texts
        .into_iter()
        .take(SUGGESTION_COUNT)
        .map(|text| Suggestion {
            kind: infer_kind(&text),
            text,
        })
        .collect()
}

/// Infer the suggestion flavor from its phrasing.
fn infer_kind(text: &str) -> SuggestionKind {
    let trimmed = text.trim_start();
    if trimmed.starts_with('"') || trimmed.starts_with('\u{201C}') {
        return SuggestionKind::Dialogue;
    }

    let lower = text.to_lowercase();
    const TWIST_MARKERS: [&str; 4] = ["suddenly", "twist", "but then", "out of nowhere"];
    if TWIST_MARKERS.iter().any(|m| lower.contains(m)) {
        return SuggestionKind::Twist;
    }

    const REVELATION_MARKERS: [&str; 5] = ["realize", "reveal", "discover", "truth", "recognize"];
    if REVELATION_MARKERS.iter().any(|m| lower.contains(m)) {
        return SuggestionKind::Revelation;
    }

    SuggestionKind::Action
}
