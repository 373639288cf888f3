//! World-model entries.
//!
//! An [`Entry`] is a tracked piece of the fictional world: a character, a
//! location, an item, a faction, a concept, or an event. Each carries a
//! static description, a per-type dynamic state, an injection policy that
//! governs when it enters prompts, and mention provenance.

use crate::id::{EntryId, MessageId};
use serde::{Deserialize, Serialize};

/// Relationship bounds for character state.
pub const RELATIONSHIP_MIN: i32 = -100;
pub const RELATIONSHIP_MAX: i32 = 100;

/// Kind of a world-model entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntryType {
    Character,
    Location,
    Item,
    Faction,
    Concept,
    Event,
}

impl EntryType {
    pub fn name(&self) -> &'static str {
        match self {
            EntryType::Character => "Character",
            EntryType::Location => "Location",
            EntryType::Item => "Item",
            EntryType::Faction => "Faction",
            EntryType::Concept => "Concept",
            EntryType::Event => "Event",
        }
    }
}

/// Per-type dynamic state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum EntryState {
    Character {
        is_present: bool,
        disposition: Option<String>,
        /// Clamped to [-100, 100].
        relationship: i32,
    },
    Location {
        is_current_location: bool,
        visited: bool,
    },
    Item {
        in_inventory: bool,
        holder: Option<String>,
    },
    Faction {
        reputation: i32,
    },
    Concept {},
    Event {
        occurred: bool,
    },
}

impl EntryState {
    /// Default state for an entry type.
    pub fn defaults_for(entry_type: EntryType) -> Self {
        match entry_type {
            EntryType::Character => EntryState::Character {
                is_present: false,
                disposition: None,
                relationship: 0,
            },
            EntryType::Location => EntryState::Location {
                is_current_location: false,
                visited: false,
            },
            EntryType::Item => EntryState::Item {
                in_inventory: false,
                holder: None,
            },
            EntryType::Faction => EntryState::Faction { reputation: 0 },
            EntryType::Concept => EntryState::Concept {},
            EntryType::Event => EntryState::Event { occurred: false },
        }
    }
}

/// When an entry is injected into prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InjectionMode {
    Always,
    Keyword,
    Relevant,
    Never,
}

/// Injection policy for one entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InjectionPolicy {
    pub mode: InjectionMode,
    pub keywords: Vec<String>,
    pub priority: i32,
}

impl Default for InjectionPolicy {
    fn default() -> Self {
        Self {
            mode: InjectionMode::Relevant,
            keywords: Vec::new(),
            priority: 0,
        }
    }
}

/// Who created an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CreatedBy {
    Setup,
    Classifier,
    User,
}

/// Mention provenance for one entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provenance {
    pub first_mentioned: Option<MessageId>,
    pub last_mentioned: Option<MessageId>,
    pub mention_count: u32,
    pub created_by: CreatedBy,
}

impl Provenance {
    pub fn new(created_by: CreatedBy) -> Self {
        Self {
            first_mentioned: None,
            last_mentioned: None,
            mention_count: 0,
            created_by,
        }
    }
}

/// A world-model record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub id: EntryId,
    pub name: String,
    pub entry_type: EntryType,
    pub description: String,
    pub aliases: Vec<String>,
    pub state: EntryState,
    pub injection: InjectionPolicy,
    pub provenance: Provenance,
}

impl Entry {
    /// Create an entry with type-default state.
    pub fn new(entry_type: EntryType, name: impl Into<String>, created_by: CreatedBy) -> Self {
        Self {
            id: EntryId::new(),
            name: name.into(),
            entry_type,
            description: String::new(),
            aliases: Vec::new(),
            state: EntryState::defaults_for(entry_type),
            injection: InjectionPolicy::default(),
            provenance: Provenance::new(created_by),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    pub fn with_state(mut self, state: EntryState) -> Self {
        self.state = state;
        self
    }

    pub fn with_injection(mut self, injection: InjectionPolicy) -> Self {
        self.injection = injection;
        self
    }

    /// Case-insensitive exact match on name or alias.
    pub fn matches_name(&self, query: &str) -> bool {
        let query = query.to_lowercase();
        if self.name.to_lowercase() == query {
            return true;
        }
        self.aliases.iter().any(|a| a.to_lowercase() == query)
    }

    /// Whether the entry's live state forces selection (Tier 1).
    pub fn is_state_selected(&self) -> bool {
        match &self.state {
            EntryState::Character { is_present, .. } => *is_present,
            EntryState::Location {
                is_current_location,
                ..
            } => *is_current_location,
            EntryState::Item { in_inventory, .. } => *in_inventory,
            _ => false,
        }
    }

    /// Record a mention by a narration entry.
    ///
    /// Mentions are keyed to the message id, so re-recording the same
    /// message is a no-op and counts stay stable under re-application.
    pub fn record_mention(&mut self, message_id: MessageId) {
        if self.provenance.last_mentioned == Some(message_id) {
            return;
        }
        if self.provenance.first_mentioned.is_none() {
            self.provenance.first_mentioned = Some(message_id);
        }
        self.provenance.last_mentioned = Some(message_id);
        self.provenance.mention_count += 1;
    }

    /// One-line digest used in compact model prompts.
    pub fn digest(&self) -> String {
        let description = if self.description.chars().count() > 120 {
            let truncated: String = self.description.chars().take(120).collect();
            format!("{truncated}…")
        } else {
            self.description.clone()
        };
        format!("{} ({}): {}", self.name, self.entry_type.name(), description)
    }
}

/// Clamp a relationship level into its legal range.
pub fn clamp_relationship(value: i32) -> i32 {
    value.clamp(RELATIONSHIP_MIN, RELATIONSHIP_MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_defaults_by_type() {
        let character = Entry::new(EntryType::Character, "Thornwick", CreatedBy::Setup);
        assert!(matches!(
            character.state,
            EntryState::Character {
                is_present: false,
                relationship: 0,
                ..
            }
        ));

        let location = Entry::new(EntryType::Location, "The Mill", CreatedBy::Setup);
        assert!(!location.is_state_selected());
    }

    #[test]
    fn test_name_matching_is_case_insensitive() {
        let entry = Entry::new(EntryType::Character, "Thornwick", CreatedBy::Setup)
            .with_alias("The Old Miller");

        assert!(entry.matches_name("thornwick"));
        assert!(entry.matches_name("THE OLD MILLER"));
        assert!(!entry.matches_name("thorn"));
    }

    #[test]
    fn test_state_selection_flags() {
        let mut entry = Entry::new(EntryType::Item, "Rusty Key", CreatedBy::Setup);
        assert!(!entry.is_state_selected());

        entry.state = EntryState::Item {
            in_inventory: true,
            holder: None,
        };
        assert!(entry.is_state_selected());
    }

    #[test]
    fn test_mention_is_idempotent_per_message() {
        let mut entry = Entry::new(EntryType::Character, "Mira", CreatedBy::Classifier);
        let message = MessageId::new();

        entry.record_mention(message);
        entry.record_mention(message);

        assert_eq!(entry.provenance.mention_count, 1);
        assert_eq!(entry.provenance.first_mentioned, Some(message));

        let next = MessageId::new();
        entry.record_mention(next);
        assert_eq!(entry.provenance.mention_count, 2);
        assert_eq!(entry.provenance.first_mentioned, Some(message));
        assert_eq!(entry.provenance.last_mentioned, Some(next));
    }

    #[test]
    fn test_relationship_clamp() {
        assert_eq!(clamp_relationship(500), RELATIONSHIP_MAX);
        assert_eq!(clamp_relationship(-500), RELATIONSHIP_MIN);
        assert_eq!(clamp_relationship(42), 42);
    }
}
