//! Tiered entry selection.
//!
//! Tier 1 costs nothing: live state and always-inject policies. Tier 2
//! costs nothing: whole-word name matching against the recent window.
//! Tier 3 asks a model, and only when the leftover pool is large enough to
//! be worth the call; it runs alongside chapter retrieval so it adds no
//! critical-path latency.

use super::{contains_word, EntryEngine};
use crate::classifier::extract_json;
use crate::config::{InjectionScope, ModelRole, StoryConfig, STRUCTURED_TEMPERATURE};
use crate::estimate_tokens;
use crate::id::EntryId;
use crate::world::{Entry, InjectionMode};
use provider::{ChatMessage, CompletionRequest, Provider};
use std::cmp::Reverse;
use std::collections::HashSet;

/// Cap on entries a Tier-3 call may add.
const TIER3_MAX: usize = 10;

/// Token budget for the Tier-3 response.
const TIER3_MAX_TOKENS: usize = 400;

impl EntryEngine {
    /// Select the entries to inject for this turn.
    ///
    /// Returns ids ordered by injection priority, then mention count, and
    /// truncated to the configured token budget.
    pub async fn select(
        &self,
        provider: &dyn Provider,
        config: &StoryConfig,
        input: &str,
        recent_text: &str,
    ) -> Vec<EntryId> {
        let scope = config.entries.injection_mode;
        let mut picked: Vec<EntryId> = Vec::new();
        let mut seen: HashSet<EntryId> = HashSet::new();

        // Tier 1: state-based.
        for entry in self.all() {
            if entry.injection.mode == InjectionMode::Never {
                continue;
            }
            let forced = entry.is_state_selected() || entry.injection.mode == InjectionMode::Always;
            let take = match scope {
                InjectionScope::All => true,
                _ => forced,
            };
            if take && seen.insert(entry.id) {
                picked.push(entry.id);
            }
        }

        if scope == InjectionScope::StateOnly || scope == InjectionScope::All {
            return self.finish_selection(picked, config);
        }

        // Tier 2: whole-word name matching over the recent window + input.
        let haystack = format!("{recent_text}\n{input}").to_lowercase();
        let mut pool: Vec<&Entry> = Vec::new();
        for entry in self.all() {
            if seen.contains(&entry.id) || entry.injection.mode == InjectionMode::Never {
                continue;
            }
            if self.matches_window(entry, &haystack) {
                seen.insert(entry.id);
                picked.push(entry.id);
            } else {
                pool.push(entry);
            }
        }

        // Tier 3: model-assisted, only past the threshold.
        if config.entries.enable_llm_selection && pool.len() > config.entries.llm_threshold {
            for id in self.select_with_model(provider, config, input, &pool).await {
                if seen.insert(id) {
                    picked.push(id);
                }
            }
        }

        self.finish_selection(picked, config)
    }

    fn matches_window(&self, entry: &Entry, haystack: &str) -> bool {
        if contains_word(haystack, &entry.name.to_lowercase()) {
            return true;
        }
        if entry
            .aliases
            .iter()
            .any(|a| contains_word(haystack, &a.to_lowercase()))
        {
            return true;
        }
        entry.injection.mode == InjectionMode::Keyword
            && entry
                .injection
                .keywords
                .iter()
                .any(|k| contains_word(haystack, &k.to_lowercase()))
    }

    /// Ask the retrieval model for relevant entries from a large pool.
    ///
    /// Failures degrade to the zero-latency tiers; unknown ids from the
    /// model are discarded.
    async fn select_with_model(
        &self,
        provider: &dyn Provider,
        config: &StoryConfig,
        input: &str,
        pool: &[&Entry],
    ) -> Vec<EntryId> {
        let candidates: String = pool
            .iter()
            .map(|e| format!("{} | {}\n", e.id, e.digest()))
            .collect();

        let prompt = format!(
            "You are selecting background lore entries relevant to a player's \
             next action in an interactive story.\n\n\
             ## Player Action\n\"{input}\"\n\n\
             ## Candidate Entries\n{candidates}\n\
             ## Instructions\n\
             Pick at most {TIER3_MAX} entries whose presence would improve the \
             narration of this action. Be selective; an empty list is a valid \
             answer.\n\
             Respond with ONLY a JSON array of entry ids, for example:\n\
             [\"id1\", \"id2\"]"
        );

        let request = CompletionRequest::new(config.resolve_model(ModelRole::Retrieval))
            .with_message(ChatMessage::user(prompt))
            .with_temperature(STRUCTURED_TEMPERATURE)
            .with_max_tokens(TIER3_MAX_TOKENS);

        let response = match provider.complete(request).await {
            Ok(completion) => completion.content,
            Err(e) => {
                tracing::warn!(error = %e, "model-assisted entry selection failed, using zero-latency tiers");
                return Vec::new();
            }
        };

        let ids: Vec<String> = match serde_json::from_str(extract_json(&response)) {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!(error = %e, "unparseable entry selection response");
                return Vec::new();
            }
        };

        ids.iter()
            .take(TIER3_MAX)
            .filter_map(|raw| raw.parse::<EntryId>().ok())
            .filter(|id| self.get(*id).is_some())
            .collect()
    }

    /// Order by priority then mention count, truncate to the token budget.
    fn finish_selection(&self, mut picked: Vec<EntryId>, config: &StoryConfig) -> Vec<EntryId> {
        picked.sort_by_key(|id| {
            let entry = self.get(*id).expect("selected id must exist");
            (
                Reverse(entry.injection.priority),
                Reverse(entry.provenance.mention_count),
            )
        });

        let mut budget = config.entries.max_entry_tokens;
        let mut result = Vec::new();
        for id in picked {
            let entry = self.get(id).expect("selected id must exist");
            let cost = estimate_tokens(&entry.digest());
            if cost > budget {
                break;
            }
            budget -= cost;
            result.push(id);
        }
        result
    }

    /// Render the selected entries for the narrator prompt.
    pub fn render_selection(&self, ids: &[EntryId]) -> String {
        let mut out = String::new();
        for id in ids {
            if let Some(entry) = self.get(*id) {
                out.push_str(&format!("- {}\n", entry.digest()));
            }
        }
        out
    }
}
