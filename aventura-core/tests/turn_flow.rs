//! Full-turn tests against the mock provider.
//!
//! These drive the coordinator through complete turns and check the
//! orchestration contract: which provider roles get called, which events
//! fire and in what order, and how the world model ends up.

use aventura_core::classifier::ClassificationResult;
use aventura_core::config::{MemoryConfig, StoryConfig, StoryMode};
use aventura_core::events::{CoreEvent, EventKind};
use aventura_core::testing::{
    assert_emitted, assert_not_emitted, TurnHarness, CLASSIFIER_MODEL, RETRIEVAL_MODEL,
    SUGGESTIONS_MODEL, SUMMARIZATION_MODEL,
};
use aventura_core::world::{CreatedBy, Entry, EntryType};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn chapter_request_classification() -> &'static str {
    r#"{"chapterAnalysis": {"shouldCreateChapter": true, "reason": "scene break",
        "suggestedTitle": "The Oak Door"}}"#
}

fn boundary_json(end: u64) -> String {
    format!("{{\"optimalEndIndex\": {end}, \"suggestedTitle\": \"The Oak Door\"}}")
}

fn summary_json() -> &'static str {
    r#"{"summary": "The door was opened and the mill explored.",
        "keywords": ["door"], "characters": [], "locations": ["The Mill"],
        "plotThreads": [], "emotionalTone": "curious"}"#
}

#[tokio::test]
async fn fresh_story_skips_retrieval_and_applies_nothing() {
    let mut harness = TurnHarness::new();
    harness.script_narration("You push the oak door open; it groans on rusted hinges.");
    harness.script_empty_classification();

    let report = harness.turn("I open the door.").await.unwrap();

    assert!(!report.cancelled);
    assert!(report.classified);
    assert!(report.message_id.is_some());
    assert_eq!(
        report.content,
        "You push the oak door open; it groans on rusted hinges."
    );
    assert!(report.chapter_created.is_none());

    // No chapters exist, so retrieval made zero provider calls; the entry
    // pool is tiny, so selection made zero provider calls.
    assert_eq!(harness.provider.calls_for(RETRIEVAL_MODEL), 0);
    assert_eq!(harness.provider.calls_for(SUMMARIZATION_MODEL), 0);

    // Exactly one user entry and one narration entry were appended.
    let story = harness.coordinator.story();
    assert_eq!(story.len(), 2);
    assert_eq!(story.entries()[0].content, "I open the door.");

    // StateUpdated fired with no changed entries.
    let state_updates: Vec<_> = harness
        .bus
        .recent_events()
        .into_iter()
        .filter_map(|r| match r.event {
            CoreEvent::StateUpdated { entries } => Some(entries),
            _ => None,
        })
        .collect();
    assert_eq!(state_updates.len(), 1);
    assert!(state_updates[0].is_empty());

    assert_not_emitted(&harness, EventKind::SuggestionsReady);
    assert!(!harness.coordinator.is_busy());
}

#[tokio::test]
async fn events_follow_phase_order() {
    let mut harness = TurnHarness::new();
    harness.script_narration("The hinges give. Dust falls.");
    harness.script_empty_classification();

    harness.turn("I push harder.").await.unwrap();

    let kinds = harness.event_kinds();
    let index_of = |kind: EventKind| kinds.iter().position(|k| *k == kind).unwrap();

    let user_input = index_of(EventKind::UserInput);
    let context_ready = index_of(EventKind::ContextReady);
    let first_chunk = index_of(EventKind::ResponseStreaming);
    let narrative = index_of(EventKind::NarrativeResponse);
    let classified = index_of(EventKind::ClassificationComplete);
    let state_updated = index_of(EventKind::StateUpdated);

    assert!(user_input < context_ready);
    assert!(context_ready <= first_chunk);
    assert!(first_chunk <= narrative);
    assert!(narrative <= classified);
    assert!(classified <= state_updated);
}

#[tokio::test]
async fn sentences_stream_in_terminator_order() {
    let mut harness = TurnHarness::new();
    harness.script_narration("The door opens. A cold wind blows! Then silence");
    harness.script_empty_classification();

    harness.turn("I open the door.").await.unwrap();

    let sentences: Vec<String> = harness
        .bus
        .recent_events()
        .into_iter()
        .filter_map(|r| match r.event {
            CoreEvent::SentenceComplete { text } => Some(text),
            _ => None,
        })
        .collect();

    // Two terminated sentences plus the flushed tail.
    assert_eq!(
        sentences,
        vec!["The door opens.", "A cold wind blows!", "Then silence"]
    );
}

#[tokio::test]
async fn name_match_selects_entry_without_provider_call() {
    let mut harness = TurnHarness::new();
    let thornwick = harness.seed_entry(Entry::new(
        EntryType::Character,
        "Thornwick",
        CreatedBy::Setup,
    ));
    harness.seed_entry(Entry::new(EntryType::Character, "Mira", CreatedBy::Setup));

    harness.script_narration("Thornwick. You have not spoken that name in years.");
    harness.script_empty_classification();

    harness.turn("Remember Thornwick?").await.unwrap();

    let selected = harness
        .bus
        .recent_events()
        .into_iter()
        .find_map(|r| match r.event {
            CoreEvent::ContextReady {
                selected_entries, ..
            } => Some(selected_entries),
            _ => None,
        })
        .unwrap();

    assert_eq!(selected, vec![thornwick]);
    assert_eq!(harness.provider.calls_for(RETRIEVAL_MODEL), 0);
}

#[tokio::test]
async fn chapter_created_at_threshold_and_visible_next_turn() {
    let config = StoryConfig::default().with_memory(MemoryConfig {
        chapter_threshold: 5,
        chapter_buffer: 2,
        ..MemoryConfig::default()
    });
    let mut harness = TurnHarness::with_config(config);

    // Three quiet turns: six story entries, no chapter yet.
    for i in 0..3 {
        harness.script_narration(format!("Narration {i}."));
        harness.script_empty_classification();
        let report = harness.turn(&format!("Action {i}.")).await.unwrap();
        assert!(report.chapter_created.is_none());
    }
    assert!(harness.coordinator.chapters().is_empty());

    // Fourth turn: the classifier requests a chapter. By Phase 4 the log
    // holds 8 entries; the buffer keeps the last 2 out, and the boundary
    // analysis picks entry 5 as the scene break.
    harness.script_narration("Narration 3.");
    harness.script_classification(chapter_request_classification());
    harness
        .provider
        .push_response(SUMMARIZATION_MODEL, boundary_json(5));
    harness
        .provider
        .push_response(SUMMARIZATION_MODEL, summary_json());

    let report = harness.turn("Action 3.").await.unwrap();
    assert_eq!(report.chapter_created, Some(1));

    let chapters = harness.coordinator.chapters().chapters();
    assert_eq!(chapters.len(), 1);
    let chapter = &chapters[0];
    assert_eq!(chapter.number, 1);
    assert_eq!(chapter.start_seq, 1);
    assert_eq!(chapter.end_seq, 5);
    assert_eq!(chapter.entry_count, 5);
    assert_eq!(chapter.title, "The Oak Door");
    assert!(!chapter.summary.is_empty());

    assert_emitted(&harness, EventKind::ChapterCreated);

    let story = harness.coordinator.story();
    assert!(story.by_seq(5).unwrap().chapter_id.is_some());
    assert!(story.by_seq(6).unwrap().chapter_id.is_none());

    // Sequences stay strictly monotone across turns.
    let seqs: Vec<u64> = story.entries().iter().map(|e| e.seq).collect();
    assert!(seqs.windows(2).all(|w| w[0] < w[1]));

    // The new chapter is visible to the very next turn's retrieval.
    harness.provider.push_response(RETRIEVAL_MODEL, "[]");
    harness.script_narration("Narration 4.");
    harness.script_empty_classification();
    harness.turn("Action 4.").await.unwrap();
    assert_eq!(harness.provider.calls_for(RETRIEVAL_MODEL), 1);
}

#[tokio::test(start_paused = true)]
async fn classifier_retries_invalid_json_with_reminder() {
    let mut harness = TurnHarness::new();
    harness.script_narration("The ledger lies open.");
    harness.script_classification("Sure! {\"entryUpdates\":");
    harness.script_classification("{}");

    let report = harness.turn("I read the ledger.").await.unwrap();

    assert!(report.classified);
    assert_eq!(harness.provider.calls_for(CLASSIFIER_MODEL), 2);
    assert_emitted(&harness, EventKind::ClassificationComplete);
}

#[tokio::test(start_paused = true)]
async fn classification_failure_is_non_fatal_and_skips_apply() {
    let mut harness = TurnHarness::new();
    harness.script_narration("The ledger lies open.");
    for _ in 0..5 {
        harness.script_classification("not json at all");
    }

    let report = harness.turn("I read the ledger.").await.unwrap();

    assert!(!report.classified);
    assert!(report.message_id.is_some());
    assert_eq!(harness.provider.calls_for(CLASSIFIER_MODEL), 5);
    assert_not_emitted(&harness, EventKind::ClassificationComplete);
    assert_not_emitted(&harness, EventKind::StateUpdated);
    assert!(!harness.coordinator.is_busy());
}

#[tokio::test]
async fn empty_narration_creates_no_entry() {
    let mut harness = TurnHarness::new();
    harness.script_narration("");

    let report = harness.turn("I say nothing.").await.unwrap();

    assert!(report.message_id.is_none());
    assert_eq!(harness.coordinator.story().len(), 1);
    assert_not_emitted(&harness, EventKind::NarrativeResponse);
    assert_eq!(harness.provider.calls_for(CLASSIFIER_MODEL), 0);
}

#[tokio::test]
async fn generation_failure_appends_system_entry() {
    let mut harness = TurnHarness::new();
    harness.provider.push_http_error(
        aventura_core::testing::NARRATOR_MODEL,
        503,
    );

    let result = harness.turn("I open the door.").await;
    assert!(result.is_err());

    let story = harness.coordinator.story();
    assert_eq!(story.len(), 2);
    assert_eq!(
        story.entries()[1].role,
        aventura_core::story::EntryRole::System
    );
    assert_not_emitted(&harness, EventKind::NarrativeResponse);
    assert_emitted(&harness, EventKind::Error);
    assert!(!harness.coordinator.is_busy());
}

#[tokio::test]
async fn cancellation_mid_stream_leaves_user_entry_and_no_narration() {
    let mut harness = TurnHarness::new();
    let chunks: Vec<String> = (0..10).map(|i| format!("chunk {i}. ")).collect();
    harness.script_narration_chunks(chunks);

    let handle = harness.coordinator.cancel_handle();
    let seen = Arc::new(AtomicUsize::new(0));
    {
        let seen = seen.clone();
        let handle = handle.clone();
        harness.bus.subscribe(EventKind::ResponseStreaming, move |_| {
            if seen.fetch_add(1, Ordering::SeqCst) + 1 == 3 {
                handle.cancel();
            }
            Ok(())
        });
    }

    let report = harness.turn("I keep reading.").await.unwrap();

    assert!(report.cancelled);
    assert!(report.message_id.is_none());

    // The three delivered chunks kept their order; nothing followed.
    let streamed: Vec<String> = harness
        .bus
        .recent_events()
        .into_iter()
        .filter_map(|r| match r.event {
            CoreEvent::ResponseStreaming { chunk, .. } => Some(chunk),
            _ => None,
        })
        .collect();
    assert_eq!(streamed, vec!["chunk 0. ", "chunk 1. ", "chunk 2. "]);

    assert_not_emitted(&harness, EventKind::NarrativeResponse);
    assert_not_emitted(&harness, EventKind::ClassificationComplete);

    // The user entry is not rolled back and the coordinator is idle again.
    assert_eq!(harness.coordinator.story().len(), 1);
    assert!(!harness.coordinator.is_busy());
}

#[tokio::test]
async fn classification_deltas_update_world() {
    let mut harness = TurnHarness::new();
    let mira = harness.seed_entry(Entry::new(EntryType::Character, "Mira", CreatedBy::Setup));
    harness.seed_entry(Entry::new(EntryType::Location, "The Mill", CreatedBy::Setup));

    harness.script_narration("Mira steps into the mill, wary of the dark.");
    harness.script_classification(format!(
        r#"{{"entryUpdates": {{
            "updates": [{{"entryId": "{mira}", "changes": {{"isPresent": true, "disposition": "wary"}}}}],
            "newEntries": [],
            "scene": {{"newLocationName": "The Mill", "presentCharacterIds": ["{mira}"],
                       "timeProgression": "minutes"}}
        }}}}"#
    ));

    harness.turn("I call Mira inside.").await.unwrap();

    let entries = harness.coordinator.entries();
    let mill = entries.current_location().unwrap();
    assert_eq!(mill.name, "The Mill");
    let present = entries.present_characters();
    assert_eq!(present.len(), 1);
    assert_eq!(present[0].name, "Mira");
    assert_eq!(present[0].provenance.mention_count, 1);

    // The classification document is surfaced verbatim to consumers.
    let result: ClassificationResult = harness
        .bus
        .recent_events()
        .into_iter()
        .find_map(|r| match r.event {
            CoreEvent::ClassificationComplete { result, .. } => Some(result),
            _ => None,
        })
        .unwrap();
    assert_eq!(
        result
            .entry_updates
            .scene
            .unwrap()
            .time_progression
            .as_deref(),
        Some("minutes")
    );
}

#[tokio::test]
async fn creative_mode_emits_suggestions_in_background() {
    let mut harness = TurnHarness::with_config(StoryConfig::new(StoryMode::CreativeWriting));
    harness.script_narration("The cellar yawns below.");
    harness.script_empty_classification();
    harness.provider.push_response(
        SUGGESTIONS_MODEL,
        r#"["Search the cellar for the ledger.",
            "\"Who left this open?\" you whisper.",
            "Suddenly the lamp gutters out."]"#,
    );

    harness.turn("I descend the stair.").await.unwrap();

    // Suggestions are fire-and-forget; give the spawned task a moment.
    let mut suggestions = None;
    for _ in 0..200 {
        suggestions = harness
            .bus
            .recent_events()
            .into_iter()
            .find_map(|r| match r.event {
                CoreEvent::SuggestionsReady { suggestions } => Some(suggestions),
                _ => None,
            });
        if suggestions.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let suggestions = suggestions.expect("SuggestionsReady within deadline");
    assert_eq!(suggestions.len(), 3);
}

#[tokio::test]
async fn adventure_mode_never_requests_suggestions() {
    let mut harness = TurnHarness::new();
    harness.script_narration("Nothing stirs.");
    harness.script_empty_classification();

    harness.turn("I wait.").await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(harness.provider.calls_for(SUGGESTIONS_MODEL), 0);
    assert_not_emitted(&harness, EventKind::SuggestionsReady);
}
