//! Application of classification deltas to the entry table.
//!
//! Order is fixed: updates, then new entries, then the scene block.
//! Unknown entry ids are dropped. Re-applying the same classification
//! result leaves the table in the same final state: field assignments are
//! absolute, creations dedupe by name, and mention bumps are keyed to the
//! narration id.

use super::EntryEngine;
use crate::classifier::{EntryChanges, EntryUpdates, NewEntry, SceneUpdate};
use crate::events::CoreEvent;
use crate::id::{EntryId, MessageId};
use crate::world::{clamp_relationship, CreatedBy, Entry, EntryState, EntryType};
use std::collections::HashSet;

impl EntryEngine {
    /// Apply a classification delta produced for the given narration entry.
    ///
    /// Emits `StateUpdated` with the ids that changed (possibly empty) and
    /// returns them.
    pub fn apply(&mut self, narration_id: MessageId, updates: &EntryUpdates) -> Vec<EntryId> {
        let mut changed: Vec<EntryId> = Vec::new();
        let mut seen: HashSet<EntryId> = HashSet::new();

        for update in &updates.updates {
            let Ok(id) = update.entry_id.parse::<EntryId>() else {
                tracing::debug!(entry_id = %update.entry_id, "dropping malformed entry reference");
                continue;
            };
            if self.get(id).is_none() {
                tracing::debug!(entry_id = %update.entry_id, "dropping unknown entry reference");
                continue;
            }
            self.apply_changes(id, &update.changes, narration_id);
            if seen.insert(id) {
                changed.push(id);
            }
        }

        for new_entry in &updates.new_entries {
            if let Some(id) = self.create_entry(new_entry, narration_id) {
                if seen.insert(id) {
                    changed.push(id);
                }
            }
        }

        if let Some(scene) = &updates.scene {
            for id in self.apply_scene(scene) {
                if seen.insert(id) {
                    changed.push(id);
                }
            }
        }

        self.bus().emit(CoreEvent::StateUpdated {
            entries: changed.clone(),
        });
        changed
    }

    /// Assign only the fields present in `changes`; fields that do not
    /// apply to the entry's type are ignored.
    fn apply_changes(&mut self, id: EntryId, changes: &EntryChanges, narration_id: MessageId) {
        let mut aliases_changed = false;
        {
            let entry = self.get_mut(id).expect("caller checked existence");

            if let Some(description) = &changes.description {
                entry.description = description.clone();
            }
            if let Some(aliases) = &changes.aliases {
                entry.aliases = aliases.clone();
                aliases_changed = true;
            }
            if let Some(priority) = changes.priority {
                entry.injection.priority = priority;
            }
            if let Some(keywords) = &changes.keywords {
                entry.injection.keywords = keywords.clone();
            }

            apply_state_patch(&mut entry.state, changes);
            entry.record_mention(narration_id);
        }
        if aliases_changed {
            self.reindex(id);
        }
    }

    /// Create an entry for a classifier `newEntries` record.
    ///
    /// If a known entry already matches by name or alias the creation is
    /// skipped and the match just gets a mention.
    fn create_entry(&mut self, new_entry: &NewEntry, narration_id: MessageId) -> Option<EntryId> {
        if let Some(existing) = self.find_id_by_name(&new_entry.name).or_else(|| {
            new_entry
                .aliases
                .iter()
                .find_map(|a| self.find_id_by_name(a))
        }) {
            tracing::debug!(name = %new_entry.name, "new entry matches known entry, recording mention only");
            if let Some(entry) = self.get_mut(existing) {
                entry.record_mention(narration_id);
            }
            return Some(existing);
        }

        let mut entry = Entry::new(new_entry.entry_type, &new_entry.name, CreatedBy::Classifier)
            .with_description(&new_entry.description);
        for alias in &new_entry.aliases {
            entry.aliases.push(alias.clone());
        }
        if let Some(initial) = &new_entry.initial_state {
            apply_state_patch(&mut entry.state, initial);
        }
        entry.record_mention(narration_id);

        Some(self.insert(entry))
    }

    /// Apply the scene block: location flag uniqueness, then presence.
    fn apply_scene(&mut self, scene: &SceneUpdate) -> Vec<EntryId> {
        let mut changed = Vec::new();

        if let Some(location_name) = &scene.new_location_name {
            match self.find_id_by_name(location_name) {
                Some(target) if self.get(target).map(|e| e.entry_type) == Some(EntryType::Location) => {
                    let location_ids: Vec<EntryId> = self
                        .all()
                        .filter(|e| e.entry_type == EntryType::Location)
                        .map(|e| e.id)
                        .collect();
                    for id in location_ids {
                        let make_current = id == target;
                        let entry = self.get_mut(id).expect("id from iteration");
                        if let EntryState::Location {
                            is_current_location,
                            visited,
                        } = &mut entry.state
                        {
                            if *is_current_location != make_current {
                                *is_current_location = make_current;
                                changed.push(id);
                            }
                            if make_current && !*visited {
                                *visited = true;
                            }
                        }
                    }
                }
                _ => {
                    tracing::warn!(location = %location_name, "scene names unknown location, leaving current location unchanged");
                }
            }
        }

        // Presence only flips when the classifier names someone; an empty
        // list is a no-op rather than a mass departure.
        if !scene.present_character_ids.is_empty() {
            let present: HashSet<EntryId> = scene
                .present_character_ids
                .iter()
                .filter_map(|raw| {
                    raw.parse::<EntryId>()
                        .ok()
                        .filter(|id| self.get(*id).is_some())
                        .or_else(|| self.find_id_by_name(raw))
                })
                .collect();

            for id in self.character_ids() {
                let should_be_present = present.contains(&id);
                let entry = self.get_mut(id).expect("id from iteration");
                if let EntryState::Character { is_present, .. } = &mut entry.state {
                    if *is_present != should_be_present {
                        *is_present = should_be_present;
                        changed.push(id);
                    }
                }
            }
        }

        changed
    }
}

/// Assign state fields present in the patch onto the matching variant.
fn apply_state_patch(state: &mut EntryState, changes: &EntryChanges) {
    match state {
        EntryState::Character {
            is_present,
            disposition,
            relationship,
        } => {
            if let Some(value) = changes.is_present {
                *is_present = value;
            }
            if let Some(value) = &changes.disposition {
                *disposition = Some(value.clone());
            }
            if let Some(value) = changes.relationship {
                *relationship = clamp_relationship(value);
            }
        }
        EntryState::Location {
            is_current_location,
            ..
        } => {
            if let Some(value) = changes.is_current_location {
                *is_current_location = value;
            }
        }
        EntryState::Item {
            in_inventory,
            holder,
        } => {
            if let Some(value) = changes.in_inventory {
                *in_inventory = value;
            }
            if let Some(value) = &changes.holder {
                *holder = Some(value.clone());
            }
        }
        EntryState::Faction { reputation } => {
            if let Some(value) = changes.reputation {
                *reputation = value;
            }
        }
        EntryState::Concept {} => {}
        EntryState::Event { occurred } => {
            if let Some(value) = changes.occurred {
                *occurred = value;
            }
        }
    }
}
