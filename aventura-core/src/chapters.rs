//! Chapter engine: long-term memory over the story log.
//!
//! Chapters partition a prefix of the entry log into closed, contiguous,
//! summarized ranges. The engine owns the chapter list exclusively. It
//! answers two questions per turn: which past chapters are worth querying
//! for a new input (retrieval), and whether enough has happened since the
//! last boundary to close a new chapter (auto-creation).

use crate::bus::EventBus;
use crate::classifier::{extract_json, ChapterAnalysis};
use crate::config::{ModelRole, StoryConfig, STRUCTURED_TEMPERATURE};
use crate::events::CoreEvent;
use crate::id::{ArcId, ChapterId, MessageId};
use crate::story::StoryLog;
use chrono::Utc;
use futures::future::join_all;
use provider::{ChatMessage, CompletionRequest, Provider};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Token budget for the retrieval decision.
const DECISION_MAX_TOKENS: usize = 600;

/// Token budget for one chapter query answer.
const QUERY_MAX_TOKENS: usize = 600;

/// Token budget for boundary analysis.
const BOUNDARY_MAX_TOKENS: usize = 300;

/// Token budget for a chapter summary.
const SUMMARY_MAX_TOKENS: usize = 1200;

/// Retrieval metadata attached to every chapter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChapterMetadata {
    pub keywords: Vec<String>,
    pub characters: Vec<String>,
    pub locations: Vec<String>,
    pub plot_threads: Vec<String>,
    pub emotional_tone: String,
}

/// A closed, summarized range of story entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    pub id: ChapterId,
    /// Ordinal starting at 1, contiguous per story.
    pub number: u32,
    pub title: String,
    pub start_entry_id: MessageId,
    pub end_entry_id: MessageId,
    pub start_seq: u64,
    pub end_seq: u64,
    pub entry_count: u64,
    pub summary: String,
    pub metadata: ChapterMetadata,
    pub arc_id: Option<ArcId>,
    pub created_at_ms: i64,
}

/// One chapter the decision model wants queried.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChapterSelection {
    chapter_number: u32,
    question: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BoundaryAnalysis {
    optimal_end_index: u64,
    #[serde(default)]
    suggested_title: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SummaryResponse {
    summary: String,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default)]
    characters: Vec<String>,
    #[serde(default)]
    locations: Vec<String>,
    #[serde(default)]
    plot_threads: Vec<String>,
    #[serde(default)]
    emotional_tone: String,
}

/// The chapter list and its retrieval/creation logic.
pub struct ChapterEngine {
    chapters: Vec<Chapter>,
    bus: Arc<EventBus>,
}

impl ChapterEngine {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            chapters: Vec::new(),
            bus,
        }
    }

    pub fn chapters(&self) -> &[Chapter] {
        &self.chapters
    }

    pub fn len(&self) -> usize {
        self.chapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chapters.is_empty()
    }

    /// Sequence of the last closed entry (0 when no chapter exists).
    pub fn last_boundary_seq(&self) -> u64 {
        self.chapters.last().map(|c| c.end_seq).unwrap_or(0)
    }

    // =========================================================================
    // Retrieval
    // =========================================================================

    /// Decide which chapters matter for this input and query them.
    ///
    /// Returns the combined retrieved context, or `None` when nothing was
    /// retrieved. With no chapters (or retrieval disabled) this returns
    /// immediately without any provider call.
    pub async fn retrieve(
        &self,
        provider: &dyn Provider,
        config: &StoryConfig,
        story: &StoryLog,
        input: &str,
    ) -> Option<String> {
        if self.chapters.is_empty() || !config.memory.enable_retrieval {
            return None;
        }

        let selections = self.decide(provider, config, story, input).await?;
        if selections.is_empty() {
            return None;
        }

        let queries = selections.iter().map(|selection| {
            let chapter = self
                .chapters
                .iter()
                .find(|c| c.number == selection.chapter_number)
                .expect("selection filtered to known chapters");
            self.query_chapter(provider, config, story, chapter, &selection.question)
        });

        let mut answers: Vec<(u32, String)> =
            join_all(queries).await.into_iter().flatten().collect();
        if answers.is_empty() {
            return None;
        }
        answers.sort_by_key(|(number, _)| *number);

        let combined = answers
            .into_iter()
            .map(|(number, answer)| format!("## From Chapter {number}\n{answer}"))
            .collect::<Vec<_>>()
            .join("\n\n");
        Some(combined)
    }

    /// Ask the decision model which chapters to query.
    ///
    /// An empty list is a frequent, valid answer; a malformed reply is
    /// treated the same way (conservative).
    async fn decide(
        &self,
        provider: &dyn Provider,
        config: &StoryConfig,
        story: &StoryLog,
        input: &str,
    ) -> Option<Vec<ChapterSelection>> {
        let digest: String = self
            .chapters
            .iter()
            .map(|c| {
                format!(
                    "Chapter {}: {}\n  characters: {}\n  locations: {}\n",
                    c.number,
                    c.summary,
                    c.metadata.characters.join(", "),
                    c.metadata.locations.join(", "),
                )
            })
            .collect();

        let recent = story
            .recent(config.recent_window)
            .iter()
            .map(|e| e.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            "You decide whether past chapters of a story hold information \
             needed to narrate the player's next action.\n\n\
             ## Recent Messages\n{recent}\n\n\
             ## Player Action\n\"{input}\"\n\n\
             ## Past Chapters\n{digest}\n\
             ## Instructions\n\
             List only chapters that likely contain facts this action depends \
             on, with one specific question each. Most actions need nothing: \
             an empty list is the usual answer.\n\
             Respond with ONLY a JSON array:\n\
             [{{\"chapterNumber\": 2, \"question\": \"...\"}}]"
        );

        let request = CompletionRequest::new(config.resolve_model(ModelRole::Retrieval))
            .with_message(ChatMessage::user(prompt))
            .with_temperature(STRUCTURED_TEMPERATURE)
            .with_max_tokens(DECISION_MAX_TOKENS);

        let raw = match provider.complete(request).await {
            Ok(completion) => completion.content,
            Err(e) => {
                tracing::warn!(error = %e, "retrieval decision failed, skipping retrieval");
                return None;
            }
        };

        let parsed: Vec<ChapterSelection> = match serde_json::from_str(extract_json(&raw)) {
            Ok(selections) => selections,
            Err(e) => {
                tracing::warn!(error = %e, "unparseable retrieval decision, skipping retrieval");
                return None;
            }
        };

        // The model lists selections most-relevant first; dedupe, drop
        // unknown chapters, and cap the fan-out.
        let mut seen = std::collections::HashSet::new();
        let selections: Vec<ChapterSelection> = parsed
            .into_iter()
            .filter(|s| self.chapters.iter().any(|c| c.number == s.chapter_number))
            .filter(|s| seen.insert(s.chapter_number))
            .take(config.memory.max_chapters_per_retrieval)
            .collect();

        Some(selections)
    }

    /// Answer one question against one chapter's full content.
    ///
    /// A failed query yields `None`; the rest of the retrieval proceeds.
    async fn query_chapter(
        &self,
        provider: &dyn Provider,
        config: &StoryConfig,
        story: &StoryLog,
        chapter: &Chapter,
        question: &str,
    ) -> Option<(u32, String)> {
        let transcript = story.transcript(chapter.start_seq, chapter.end_seq);
        let prompt = format!(
            "Answer the question using only this chapter of a story.\n\n\
             ## Chapter {} — {}\n{transcript}\n\
             ## Question\n{question}\n\n\
             Answer in two or three sentences. If the chapter does not \
             answer the question, say so briefly.",
            chapter.number, chapter.title
        );

        let request = CompletionRequest::new(config.resolve_model(ModelRole::Retrieval))
            .with_message(ChatMessage::user(prompt))
            .with_temperature(STRUCTURED_TEMPERATURE)
            .with_max_tokens(QUERY_MAX_TOKENS);

        match provider.complete(request).await {
            Ok(completion) => Some((chapter.number, completion.content)),
            Err(e) => {
                tracing::warn!(chapter = chapter.number, error = %e, "chapter query failed, skipping segment");
                None
            }
        }
    }

    // =========================================================================
    // Auto-creation
    // =========================================================================

    /// Close a new chapter if the threshold (or the classifier) says so.
    ///
    /// The trailing `chapterBuffer` entries are never consumed, so the next
    /// turn keeps its local context. Any provider or parse failure aborts
    /// creation; the entries stay open for the next evaluation.
    pub async fn maybe_create(
        &mut self,
        provider: &dyn Provider,
        config: &StoryConfig,
        story: &mut StoryLog,
        analysis: Option<&ChapterAnalysis>,
    ) -> Option<Chapter> {
        let last_end = self.last_boundary_seq();
        let open = story.last_seq().saturating_sub(last_end);
        let threshold = config.memory.chapter_threshold as u64;
        let buffer = config.memory.chapter_buffer as u64;

        let requested = analysis.is_some_and(|a| a.should_create_chapter);
        let threshold_hit = config.memory.auto_summarize && open >= threshold + buffer;
        if !requested && !threshold_hit {
            return None;
        }

        let available = open.saturating_sub(buffer);
        if available < 1 {
            tracing::debug!(open, buffer, "chapter requested but buffer leaves nothing to close");
            return None;
        }

        let start_seq = last_end + 1;
        let candidate_end = last_end + available;

        let (end_seq, boundary_title) = match self
            .analyze_boundary(provider, config, story, start_seq, candidate_end)
            .await
        {
            Some(boundary) => (
                boundary.optimal_end_index.clamp(start_seq, candidate_end),
                boundary.suggested_title,
            ),
            None => (candidate_end, None),
        };

        let summary = self
            .summarize(provider, config, story, start_seq, end_seq)
            .await?;

        let number = self.chapters.len() as u32 + 1;
        let title = boundary_title
            .or_else(|| analysis.and_then(|a| a.suggested_title.clone()))
            .unwrap_or_else(|| format!("Chapter {number}"));

        let chapter = Chapter {
            id: ChapterId::new(),
            number,
            title,
            start_entry_id: story.by_seq(start_seq)?.id,
            end_entry_id: story.by_seq(end_seq)?.id,
            start_seq,
            end_seq,
            entry_count: end_seq - start_seq + 1,
            summary: summary.summary,
            metadata: ChapterMetadata {
                keywords: summary.keywords,
                characters: summary.characters,
                locations: summary.locations,
                plot_threads: summary.plot_threads,
                emotional_tone: summary.emotional_tone,
            },
            arc_id: None,
            created_at_ms: Utc::now().timestamp_millis(),
        };

        story.assign_chapter(start_seq, end_seq, chapter.id);
        self.chapters.push(chapter.clone());
        tracing::info!(number, start_seq, end_seq, "chapter created");
        self.bus.emit(CoreEvent::ChapterCreated {
            chapter: chapter.clone(),
        });

        Some(chapter)
    }

    /// Pick a natural scene break inside the candidate range.
    async fn analyze_boundary(
        &self,
        provider: &dyn Provider,
        config: &StoryConfig,
        story: &StoryLog,
        start_seq: u64,
        candidate_end: u64,
    ) -> Option<BoundaryAnalysis> {
        let transcript = story.transcript(start_seq, candidate_end);
        let prompt = format!(
            "These story entries will be closed into a chapter. Pick the \
             entry index that best ends the chapter on a natural scene \
             break, between {start_seq} and {candidate_end} inclusive, and \
             suggest a short evocative title.\n\n{transcript}\n\
             Respond with ONLY JSON:\n\
             {{\"optimalEndIndex\": {candidate_end}, \"suggestedTitle\": \"...\"}}"
        );

        let request = CompletionRequest::new(config.resolve_model(ModelRole::Summarization))
            .with_message(ChatMessage::user(prompt))
            .with_temperature(STRUCTURED_TEMPERATURE)
            .with_max_tokens(BOUNDARY_MAX_TOKENS);

        let raw = match provider.complete(request).await {
            Ok(completion) => completion.content,
            Err(e) => {
                tracing::warn!(error = %e, "boundary analysis failed, using full candidate range");
                return None;
            }
        };

        match serde_json::from_str(extract_json(&raw)) {
            Ok(boundary) => Some(boundary),
            Err(e) => {
                tracing::warn!(error = %e, "unparseable boundary analysis, using full candidate range");
                None
            }
        }
    }

    /// Summarize the closing range. A missing or empty summary aborts
    /// chapter creation.
    async fn summarize(
        &self,
        provider: &dyn Provider,
        config: &StoryConfig,
        story: &StoryLog,
        start_seq: u64,
        end_seq: u64,
    ) -> Option<SummaryResponse> {
        let transcript = story.transcript(start_seq, end_seq);
        let prompt = format!(
            "Summarize this chapter of an interactive story for long-term \
             memory. Keep every plot-relevant fact, name, and unresolved \
             thread.\n\n{transcript}\n\
             Respond with ONLY JSON:\n\
             {{\"summary\": \"...\", \"keywords\": [], \"characters\": [], \
             \"locations\": [], \"plotThreads\": [], \"emotionalTone\": \"...\"}}"
        );

        let request = CompletionRequest::new(config.resolve_model(ModelRole::Summarization))
            .with_message(ChatMessage::user(prompt))
            .with_temperature(STRUCTURED_TEMPERATURE)
            .with_max_tokens(SUMMARY_MAX_TOKENS);

        let raw = match provider.complete(request).await {
            Ok(completion) => completion.content,
            Err(e) => {
                tracing::warn!(error = %e, "chapter summarization failed, aborting creation");
                return None;
            }
        };

        match serde_json::from_str::<SummaryResponse>(extract_json(&raw)) {
            Ok(summary) if !summary.summary.trim().is_empty() => Some(summary),
            Ok(_) => {
                tracing::warn!("empty chapter summary, aborting creation");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "unparseable chapter summary, aborting creation");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MemoryConfig, ModelRole};
    use crate::story::EntryRole;
    use crate::testing::MockProvider;

    fn setup() -> (ChapterEngine, StoryLog, StoryConfig) {
        let engine = ChapterEngine::new(Arc::new(EventBus::new()));
        (engine, StoryLog::new(), StoryConfig::default())
    }

    fn fill(story: &mut StoryLog, n: usize) {
        for i in 0..n {
            let role = if i % 2 == 0 {
                EntryRole::UserAction
            } else {
                EntryRole::Narration
            };
            story.append(role, format!("story beat {i}"));
        }
    }

    fn summary_json() -> String {
        r#"{"summary": "The miller's debt came due.", "keywords": ["debt"],
            "characters": ["Thornwick"], "locations": ["The Mill"],
            "plotThreads": ["the ledger"], "emotionalTone": "uneasy"}"#
            .to_string()
    }

    #[tokio::test]
    async fn test_no_chapters_skips_retrieval_without_calls() {
        let (engine, story, config) = setup();
        let provider = MockProvider::new();

        let retrieved = engine.retrieve(&provider, &config, &story, "I look.").await;
        assert!(retrieved.is_none());
        assert_eq!(provider.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_retrieval_disabled_skips_without_calls() {
        let (mut engine, mut story, mut config) = setup();
        config.memory.enable_retrieval = false;
        fill(&mut story, 8);
        seed_chapter(&mut engine, &mut story, &config, 1, 4).await;

        let provider = MockProvider::new();
        let retrieved = engine.retrieve(&provider, &config, &story, "I look.").await;
        assert!(retrieved.is_none());
        assert_eq!(provider.total_calls(), 0);
    }

    /// Create one chapter directly through the engine with scripted calls.
    async fn seed_chapter(
        engine: &mut ChapterEngine,
        story: &mut StoryLog,
        config: &StoryConfig,
        start: u64,
        end: u64,
    ) {
        let summarizer = config.resolve_model(ModelRole::Summarization);
        let provider = MockProvider::new()
            .with_response(
                &summarizer,
                format!("{{\"optimalEndIndex\": {end}, \"suggestedTitle\": \"Seeded\"}}"),
            )
            .with_response(&summarizer, summary_json());
        let analysis = ChapterAnalysis {
            should_create_chapter: true,
            reason: "test".to_string(),
            suggested_title: None,
        };
        let mut seed_config = config.clone();
        seed_config.memory.chapter_buffer = (story.last_seq() - end) as u32;
        seed_config.memory.chapter_threshold = 1;
        let chapter = engine
            .maybe_create(&provider, &seed_config, story, Some(&analysis))
            .await
            .expect("seed chapter");
        assert_eq!(chapter.start_seq, start);
        assert_eq!(chapter.end_seq, end);
    }

    #[tokio::test]
    async fn test_empty_decision_is_valid_and_queries_nothing() {
        let (mut engine, mut story, config) = setup();
        fill(&mut story, 8);
        seed_chapter(&mut engine, &mut story, &config, 1, 4).await;

        let provider =
            MockProvider::new().with_response(config.resolve_model(ModelRole::Retrieval), "[]");
        let retrieved = engine.retrieve(&provider, &config, &story, "I wait.").await;

        assert!(retrieved.is_none());
        assert_eq!(provider.total_calls(), 1);
    }

    #[tokio::test]
    async fn test_malformed_decision_is_conservative() {
        let (mut engine, mut story, config) = setup();
        fill(&mut story, 8);
        seed_chapter(&mut engine, &mut story, &config, 1, 4).await;

        let provider = MockProvider::new().with_response(
            config.resolve_model(ModelRole::Retrieval),
            "I think chapter 1 is relevant!",
        );
        let retrieved = engine.retrieve(&provider, &config, &story, "I wait.").await;

        assert!(retrieved.is_none());
        assert_eq!(provider.total_calls(), 1);
    }

    #[tokio::test]
    async fn test_queries_combined_in_chapter_order() {
        let (mut engine, mut story, config) = setup();
        fill(&mut story, 16);
        seed_chapter(&mut engine, &mut story, &config, 1, 4).await;
        seed_chapter(&mut engine, &mut story, &config, 5, 8).await;

        let retrieval = config.resolve_model(ModelRole::Retrieval);
        // Decision lists chapter 2 first; combination must still come out
        // in ascending chapter order.
        let provider = MockProvider::new()
            .with_response(
                &retrieval,
                r#"[{"chapterNumber": 2, "question": "What debt?"},
                    {"chapterNumber": 1, "question": "Who is the miller?"}]"#,
            )
            .with_response(&retrieval, "Answer about the debt.")
            .with_response(&retrieval, "Answer about the miller.");

        let retrieved = engine
            .retrieve(&provider, &config, &story, "I ask about the ledger.")
            .await
            .expect("retrieval");

        let first = retrieved.find("## From Chapter 1").unwrap();
        let second = retrieved.find("## From Chapter 2").unwrap();
        assert!(first < second);
        assert_eq!(provider.total_calls(), 3);
    }

    #[tokio::test]
    async fn test_selection_cap_and_unknown_chapters() {
        let (mut engine, mut story, mut config) = setup();
        config.memory.max_chapters_per_retrieval = 2;
        fill(&mut story, 20);
        for i in 0..4 {
            let start = i * 4 + 1;
            seed_chapter(&mut engine, &mut story, &config, start, start + 3).await;
        }

        let retrieval = config.resolve_model(ModelRole::Retrieval);
        let provider = MockProvider::new()
            .with_response(
                &retrieval,
                r#"[{"chapterNumber": 3, "question": "q3"},
                    {"chapterNumber": 99, "question": "unknown"},
                    {"chapterNumber": 1, "question": "q1"},
                    {"chapterNumber": 2, "question": "q2"}]"#,
            )
            .with_response(&retrieval, "answer a")
            .with_response(&retrieval, "answer b");

        let retrieved = engine
            .retrieve(&provider, &config, &story, "I reminisce.")
            .await
            .expect("retrieval");

        // Unknown chapter dropped; cap keeps the first two valid picks.
        assert!(retrieved.contains("## From Chapter 3"));
        assert!(retrieved.contains("## From Chapter 1"));
        assert!(!retrieved.contains("## From Chapter 2"));
        assert_eq!(provider.total_calls(), 3);
    }

    #[tokio::test]
    async fn test_failed_chapter_query_skips_segment() {
        let (mut engine, mut story, config) = setup();
        fill(&mut story, 16);
        seed_chapter(&mut engine, &mut story, &config, 1, 4).await;
        seed_chapter(&mut engine, &mut story, &config, 5, 8).await;

        let retrieval = config.resolve_model(ModelRole::Retrieval);
        let provider = MockProvider::new()
            .with_response(
                &retrieval,
                r#"[{"chapterNumber": 1, "question": "q1"},
                    {"chapterNumber": 2, "question": "q2"}]"#,
            )
            .with_http_error(&retrieval, 500)
            .with_response(&retrieval, "surviving answer");

        let retrieved = engine
            .retrieve(&provider, &config, &story, "I recall.")
            .await
            .expect("retrieval survives partial failure");

        assert!(!retrieved.contains("## From Chapter 1"));
        assert!(retrieved.contains("## From Chapter 2"));
    }

    #[tokio::test]
    async fn test_threshold_with_buffer_creates_chapter_of_size_n() {
        let (mut engine, mut story, _) = setup();
        let config = StoryConfig::default().with_memory(MemoryConfig {
            chapter_threshold: 5,
            chapter_buffer: 2,
            ..MemoryConfig::default()
        });
        fill(&mut story, 7);

        let summarizer = config.resolve_model(ModelRole::Summarization);
        let provider = MockProvider::new()
            .with_response(
                &summarizer,
                r#"{"optimalEndIndex": 5, "suggestedTitle": "The Crossing"}"#,
            )
            .with_response(&summarizer, summary_json());

        let chapter = engine
            .maybe_create(&provider, &config, &mut story, None)
            .await
            .expect("chapter at threshold");

        assert_eq!(chapter.number, 1);
        assert_eq!(chapter.start_seq, 1);
        assert_eq!(chapter.end_seq, 5);
        assert_eq!(chapter.entry_count, 5);
        assert_eq!(chapter.title, "The Crossing");
        // Buffer entries 6..7 stay outside any chapter.
        assert!(story.by_seq(6).unwrap().chapter_id.is_none());
        assert!(story.by_seq(7).unwrap().chapter_id.is_none());
        assert!(story.by_seq(5).unwrap().chapter_id.is_some());
    }

    #[tokio::test]
    async fn test_below_threshold_does_nothing() {
        let (mut engine, mut story, _) = setup();
        let config = StoryConfig::default().with_memory(MemoryConfig {
            chapter_threshold: 5,
            chapter_buffer: 2,
            ..MemoryConfig::default()
        });
        fill(&mut story, 6);

        let provider = MockProvider::new();
        let chapter = engine
            .maybe_create(&provider, &config, &mut story, None)
            .await;
        assert!(chapter.is_none());
        assert_eq!(provider.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_classifier_request_overrides_threshold() {
        let (mut engine, mut story, _) = setup();
        let config = StoryConfig::default().with_memory(MemoryConfig {
            chapter_threshold: 50,
            chapter_buffer: 2,
            ..MemoryConfig::default()
        });
        fill(&mut story, 6);

        let summarizer = config.resolve_model(ModelRole::Summarization);
        let provider = MockProvider::new()
            .with_response(
                &summarizer,
                r#"{"optimalEndIndex": 4, "suggestedTitle": null}"#,
            )
            .with_response(&summarizer, summary_json());

        let analysis = ChapterAnalysis {
            should_create_chapter: true,
            reason: "major scene change".to_string(),
            suggested_title: Some("The Ledger".to_string()),
        };

        let chapter = engine
            .maybe_create(&provider, &config, &mut story, Some(&analysis))
            .await
            .expect("classifier-driven chapter");

        assert_eq!(chapter.end_seq, 4);
        assert_eq!(chapter.title, "The Ledger");
    }

    #[tokio::test]
    async fn test_buffer_never_consumed() {
        let (mut engine, mut story, _) = setup();
        let config = StoryConfig::default().with_memory(MemoryConfig {
            chapter_threshold: 5,
            chapter_buffer: 4,
            ..MemoryConfig::default()
        });
        fill(&mut story, 4);

        let analysis = ChapterAnalysis {
            should_create_chapter: true,
            reason: "requested".to_string(),
            suggested_title: None,
        };
        let provider = MockProvider::new();

        let chapter = engine
            .maybe_create(&provider, &config, &mut story, Some(&analysis))
            .await;
        assert!(chapter.is_none());
        assert_eq!(provider.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_auto_summarize_disabled_ignores_threshold() {
        let (mut engine, mut story, _) = setup();
        let config = StoryConfig::default().with_memory(MemoryConfig {
            chapter_threshold: 2,
            chapter_buffer: 1,
            auto_summarize: false,
            ..MemoryConfig::default()
        });
        fill(&mut story, 10);

        let provider = MockProvider::new();
        let chapter = engine
            .maybe_create(&provider, &config, &mut story, None)
            .await;
        assert!(chapter.is_none());
        assert_eq!(provider.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_boundary_clamped_into_candidate_range() {
        let (mut engine, mut story, _) = setup();
        let config = StoryConfig::default().with_memory(MemoryConfig {
            chapter_threshold: 5,
            chapter_buffer: 2,
            ..MemoryConfig::default()
        });
        fill(&mut story, 7);

        let summarizer = config.resolve_model(ModelRole::Summarization);
        // The model overshoots into the buffer; the engine must clamp.
        let provider = MockProvider::new()
            .with_response(
                &summarizer,
                r#"{"optimalEndIndex": 7, "suggestedTitle": "Too Far"}"#,
            )
            .with_response(&summarizer, summary_json());

        let chapter = engine
            .maybe_create(&provider, &config, &mut story, None)
            .await
            .expect("chapter");
        assert_eq!(chapter.end_seq, 5);
    }

    #[tokio::test]
    async fn test_summary_failure_aborts_creation() {
        let (mut engine, mut story, _) = setup();
        let config = StoryConfig::default().with_memory(MemoryConfig {
            chapter_threshold: 5,
            chapter_buffer: 2,
            ..MemoryConfig::default()
        });
        fill(&mut story, 7);

        let summarizer = config.resolve_model(ModelRole::Summarization);
        let provider = MockProvider::new()
            .with_response(
                &summarizer,
                r#"{"optimalEndIndex": 5, "suggestedTitle": "x"}"#,
            )
            .with_http_error(&summarizer, 500);

        let chapter = engine
            .maybe_create(&provider, &config, &mut story, None)
            .await;
        assert!(chapter.is_none());
        assert!(engine.is_empty());
        assert!(story.by_seq(1).unwrap().chapter_id.is_none());
    }

    #[tokio::test]
    async fn test_numbers_are_contiguous_and_ranges_partition() {
        let (mut engine, mut story, config) = setup();
        fill(&mut story, 20);
        seed_chapter(&mut engine, &mut story, &config, 1, 6).await;
        seed_chapter(&mut engine, &mut story, &config, 7, 12).await;
        seed_chapter(&mut engine, &mut story, &config, 13, 16).await;

        let chapters = engine.chapters();
        let numbers: Vec<u32> = chapters.iter().map(|c| c.number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);

        for pair in chapters.windows(2) {
            assert!(pair[0].end_seq < pair[1].start_seq);
            assert_eq!(pair[0].end_seq + 1, pair[1].start_seq);
        }
    }
}
