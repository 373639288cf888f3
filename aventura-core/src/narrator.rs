//! Narrator pipeline: prompt assembly and streaming.
//!
//! The prompt is assembled in a fixed order: the mode system prompt, a
//! `[STORY CONTEXT]` block (location, present characters, inventory,
//! selected entries, retrieved chapter memory), then the recent
//! conversation under a token budget. The oldest messages fall out first;
//! the current user input is never evicted.

use crate::config::{ModelRole, StoryConfig, StoryMode, NARRATION_TEMPERATURE};
use crate::entries::EntryEngine;
use crate::estimate_tokens;
use crate::id::EntryId;
use crate::story::{EntryRole, StoryLog};
use crate::world::EntryState;
use provider::{ChatMessage, ChunkStream, CompletionRequest, Provider, ProviderError};

/// Assemble the full message list for a narrator generation.
pub fn assemble(
    config: &StoryConfig,
    entries: &EntryEngine,
    selected: &[EntryId],
    retrieved: Option<&str>,
    story: &StoryLog,
    input: &str,
) -> Vec<ChatMessage> {
    let mut system = match config.mode {
        StoryMode::Adventure => include_str!("prompts/adventure.txt").to_string(),
        StoryMode::CreativeWriting => include_str!("prompts/creative.txt").to_string(),
    };

    system.push_str("\n[STORY CONTEXT]\n");

    if let Some(location) = entries.current_location() {
        system.push_str(&format!("Current location: {}", location.name));
        if !location.description.is_empty() {
            system.push_str(&format!(" — {}", location.description));
        }
        system.push('\n');
    }

    let present = entries.present_characters();
    if !present.is_empty() {
        system.push_str("Present characters:\n");
        for character in present {
            if let EntryState::Character {
                disposition: Some(disposition),
                ..
            } = &character.state
            {
                system.push_str(&format!("- {} ({disposition})\n", character.name));
            } else {
                system.push_str(&format!("- {}\n", character.name));
            }
        }
    }

    let inventory = entries.inventory();
    if !inventory.is_empty() {
        system.push_str("Inventory:\n");
        for item in inventory {
            system.push_str(&format!("- {}\n", item.name));
        }
    }

    let rendered = entries.render_selection(selected);
    if !rendered.is_empty() {
        system.push_str("Relevant entries:\n");
        system.push_str(&rendered);
    }

    if let Some(retrieved) = retrieved {
        system.push_str("Retrieved memory from earlier chapters:\n");
        system.push_str(retrieved);
        system.push('\n');
    }

    let mut messages = vec![ChatMessage::system(system)];
    messages.extend(conversation_window(config, story, input));
    messages.push(ChatMessage::user(input));
    messages
}

/// The recent conversation that fits in the history budget, oldest first.
///
/// The current input is appended by the caller and never counts against
/// the budget; the log's trailing copy of it is excluded here.
fn conversation_window(config: &StoryConfig, story: &StoryLog, input: &str) -> Vec<ChatMessage> {
    let mut entries = story.entries();
    if let Some(last) = entries.last() {
        if last.role == EntryRole::UserAction && last.content == input {
            entries = &entries[..entries.len() - 1];
        }
    }

    let mut budget = config.history_token_budget;
    let mut window = Vec::new();
    for entry in entries.iter().rev() {
        let role = match entry.role {
            EntryRole::UserAction => provider::Role::User,
            EntryRole::Narration => provider::Role::Assistant,
            // System notices are diagnostics, not fiction.
            EntryRole::System => continue,
        };
        let cost = estimate_tokens(&entry.content);
        if cost > budget {
            break;
        }
        budget -= cost;
        window.push(ChatMessage {
            role,
            content: entry.content.clone(),
        });
    }
    window.reverse();
    window
}

/// Open the narrator stream for an assembled prompt.
pub async fn stream(
    provider: &dyn Provider,
    config: &StoryConfig,
    messages: Vec<ChatMessage>,
) -> Result<ChunkStream, ProviderError> {
    let request = CompletionRequest::new(config.resolve_model(ModelRole::Narrator))
        .with_messages(messages)
        .with_temperature(NARRATION_TEMPERATURE);
    provider.stream(request).await
}
