//! Entry engine: the single owner of the world-model entry table.
//!
//! All other components read entries through snapshots captured at phase
//! boundaries and request changes via classification deltas; nothing else
//! mutates the table.

mod apply;
mod selection;

use crate::bus::EventBus;
use crate::id::EntryId;
use crate::world::{Entry, EntryState, EntryType};
use std::collections::HashMap;
use std::sync::Arc;

/// The entry table with its case-insensitive name index.
pub struct EntryEngine {
    entries: HashMap<EntryId, Entry>,
    name_index: HashMap<String, EntryId>,
    bus: Arc<EventBus>,
}

impl EntryEngine {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            entries: HashMap::new(),
            name_index: HashMap::new(),
            bus,
        }
    }

    /// Insert an entry, indexing its name and aliases case-insensitively.
    ///
    /// Names and aliases are unique within a story; a colliding alias keeps
    /// its first owner.
    pub fn insert(&mut self, entry: Entry) -> EntryId {
        let id = entry.id;
        self.index_name(&entry.name, id);
        for alias in &entry.aliases {
            self.index_name(alias, id);
        }
        self.entries.insert(id, entry);
        id
    }

    fn index_name(&mut self, name: &str, id: EntryId) {
        let key = name.to_lowercase();
        if let Some(existing) = self.name_index.get(&key) {
            if *existing != id {
                tracing::warn!(name, "alias collision, keeping first owner");
                return;
            }
        }
        self.name_index.insert(key, id);
    }

    /// Rebuild index entries for one entry after its aliases changed.
    fn reindex(&mut self, id: EntryId) {
        self.name_index.retain(|_, owner| *owner != id);
        if let Some(entry) = self.entries.get(&id) {
            let name = entry.name.clone();
            let aliases = entry.aliases.clone();
            self.index_name(&name, id);
            for alias in &aliases {
                self.index_name(alias, id);
            }
        }
    }

    pub fn get(&self, id: EntryId) -> Option<&Entry> {
        self.entries.get(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn all(&self) -> impl Iterator<Item = &Entry> {
        self.entries.values()
    }

    /// Find an entry id by exact name or alias (case-insensitive).
    pub fn find_id_by_name(&self, name: &str) -> Option<EntryId> {
        self.name_index.get(&name.to_lowercase()).copied()
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Entry> {
        self.find_id_by_name(name).and_then(|id| self.entries.get(&id))
    }

    /// The entry currently flagged as the scene location, if any.
    pub fn current_location(&self) -> Option<&Entry> {
        self.entries.values().find(|e| {
            matches!(
                e.state,
                EntryState::Location {
                    is_current_location: true,
                    ..
                }
            )
        })
    }

    /// Characters flagged present in the scene.
    pub fn present_characters(&self) -> Vec<&Entry> {
        let mut present: Vec<&Entry> = self
            .entries
            .values()
            .filter(|e| {
                matches!(
                    e.state,
                    EntryState::Character {
                        is_present: true,
                        ..
                    }
                )
            })
            .collect();
        present.sort_by(|a, b| a.name.cmp(&b.name));
        present
    }

    /// Items currently in the player inventory.
    pub fn inventory(&self) -> Vec<&Entry> {
        let mut items: Vec<&Entry> = self
            .entries
            .values()
            .filter(|e| {
                matches!(
                    e.state,
                    EntryState::Item {
                        in_inventory: true,
                        ..
                    }
                )
            })
            .collect();
        items.sort_by(|a, b| a.name.cmp(&b.name));
        items
    }

    /// Compact world digest handed to the classifier: every entry with its
    /// id, type, and live state.
    pub fn snapshot_digest(&self) -> String {
        let mut lines: Vec<String> = self
            .entries
            .values()
            .map(|e| format!("{} | {} | {}", e.id, e.digest(), state_note(&e.state)))
            .collect();
        lines.sort();
        lines.join("\n")
    }

    pub(crate) fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Ids of all character entries.
    pub(crate) fn character_ids(&self) -> Vec<EntryId> {
        self.entries
            .values()
            .filter(|e| e.entry_type == EntryType::Character)
            .map(|e| e.id)
            .collect()
    }

    pub(crate) fn get_mut(&mut self, id: EntryId) -> Option<&mut Entry> {
        self.entries.get_mut(&id)
    }
}

fn state_note(state: &EntryState) -> String {
    match state {
        EntryState::Character {
            is_present,
            disposition,
            relationship,
        } => {
            let mut note = if *is_present { "present" } else { "absent" }.to_string();
            if let Some(d) = disposition {
                note.push_str(&format!(", {d}"));
            }
            note.push_str(&format!(", relationship {relationship}"));
            note
        }
        EntryState::Location {
            is_current_location,
            visited,
        } => match (is_current_location, visited) {
            (true, _) => "current location".to_string(),
            (false, true) => "visited".to_string(),
            (false, false) => "unvisited".to_string(),
        },
        EntryState::Item {
            in_inventory,
            holder,
        } => {
            if *in_inventory {
                "in inventory".to_string()
            } else if let Some(h) = holder {
                format!("held by {h}")
            } else {
                "loose".to_string()
            }
        }
        EntryState::Faction { reputation } => format!("reputation {reputation}"),
        EntryState::Concept {} => "concept".to_string(),
        EntryState::Event { occurred } => {
            if *occurred { "occurred" } else { "foreshadowed" }.to_string()
        }
    }
}

/// Check whether `text` contains `word` as a whole word.
///
/// A match only counts when the characters adjacent to it (if any) are
/// non-alphanumeric, so multi-word names match as phrases and "thorn"
/// does not fire inside "thornwick". Both arguments must already be
/// lowercased.
pub(crate) fn contains_word(text: &str, word: &str) -> bool {
    if word.is_empty() {
        return false;
    }

    let clear = |neighbor: Option<char>| neighbor.map_or(true, |c| !c.is_ascii_alphanumeric());

    text.match_indices(word).any(|(at, matched)| {
        let before = text[..at].chars().next_back();
        let after = text[at + matched.len()..].chars().next();
        clear(before) && clear(after)
    })
}
