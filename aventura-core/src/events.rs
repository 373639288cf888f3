//! Core event union.
//!
//! Every cross-component signal is one variant of [`CoreEvent`], a closed
//! tagged union: each tag maps to a statically known payload shape, and an
//! unknown tag is a compile error rather than a runtime surprise.

use crate::chapters::Chapter;
use crate::classifier::ClassificationResult;
use crate::config::StoryMode;
use crate::id::{EntryId, MessageId};
use crate::suggestions::Suggestion;
use serde::{Deserialize, Serialize};

/// Discriminator for subscribing to one event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    UserInput,
    ContextReady,
    ResponseStreaming,
    SentenceComplete,
    NarrativeResponse,
    ClassificationComplete,
    SuggestionsReady,
    StateUpdated,
    ChapterCreated,
    SaveComplete,
    Error,
}

/// An immutable event record published on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CoreEvent {
    #[serde(rename_all = "camelCase")]
    UserInput { content: String, mode: StoryMode },

    #[serde(rename_all = "camelCase")]
    ContextReady {
        retrieved_context: Option<String>,
        selected_entries: Vec<EntryId>,
    },

    #[serde(rename_all = "camelCase")]
    ResponseStreaming { chunk: String, accumulated: String },

    #[serde(rename_all = "camelCase")]
    SentenceComplete { text: String },

    #[serde(rename_all = "camelCase")]
    NarrativeResponse {
        message_id: MessageId,
        content: String,
    },

    #[serde(rename_all = "camelCase")]
    ClassificationComplete {
        message_id: MessageId,
        result: ClassificationResult,
    },

    #[serde(rename_all = "camelCase")]
    SuggestionsReady { suggestions: Vec<Suggestion> },

    #[serde(rename_all = "camelCase")]
    StateUpdated { entries: Vec<EntryId> },

    #[serde(rename_all = "camelCase")]
    ChapterCreated { chapter: Chapter },

    SaveComplete,

    #[serde(rename_all = "camelCase")]
    Error { source: String, message: String },
}

impl CoreEvent {
    /// The discriminator tag for this event.
    pub fn kind(&self) -> EventKind {
        match self {
            CoreEvent::UserInput { .. } => EventKind::UserInput,
            CoreEvent::ContextReady { .. } => EventKind::ContextReady,
            CoreEvent::ResponseStreaming { .. } => EventKind::ResponseStreaming,
            CoreEvent::SentenceComplete { .. } => EventKind::SentenceComplete,
            CoreEvent::NarrativeResponse { .. } => EventKind::NarrativeResponse,
            CoreEvent::ClassificationComplete { .. } => EventKind::ClassificationComplete,
            CoreEvent::SuggestionsReady { .. } => EventKind::SuggestionsReady,
            CoreEvent::StateUpdated { .. } => EventKind::StateUpdated,
            CoreEvent::ChapterCreated { .. } => EventKind::ChapterCreated,
            CoreEvent::SaveComplete => EventKind::SaveComplete,
            CoreEvent::Error { .. } => EventKind::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        let event = CoreEvent::SentenceComplete {
            text: "The door opens.".to_string(),
        };
        assert_eq!(event.kind(), EventKind::SentenceComplete);
        assert_eq!(CoreEvent::SaveComplete.kind(), EventKind::SaveComplete);
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = CoreEvent::UserInput {
            content: "I open the door.".to_string(),
            mode: StoryMode::Adventure,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "userInput");
        assert_eq!(json["content"], "I open the door.");
    }
}
