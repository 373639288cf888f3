//! Turn coordinator: the five-phase state machine driving each turn.
//!
//! Idle → Retrieving → Generating → Classifying → Applying → Idle. Chapter
//! retrieval and entry selection run concurrently in Retrieving; entry
//! application and chapter creation run concurrently in Applying;
//! suggestions are fire-and-forget. Any terminal failure appends a
//! system story entry and returns to Idle.

use crate::bus::EventBus;
use crate::chapters::ChapterEngine;
use crate::classifier;
use crate::config::{ConfigError, StoryConfig, StoryMode};
use crate::entries::EntryEngine;
use crate::events::CoreEvent;
use crate::id::MessageId;
use crate::narrator;
use crate::sentence::SentenceSplitter;
use crate::story::{EntryRole, StoryLog};
use crate::suggestions;
use futures::StreamExt;
use provider::{Provider, ProviderError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Errors surfaced to the caller of a turn.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("a turn is already in progress")]
    Busy,

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),
}

/// Phase of the turn state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Idle,
    Retrieving,
    Generating,
    Classifying,
    Applying,
}

/// Handle to cancel the turn in flight.
///
/// Cancellation stops the stream, drops in-flight work at the next
/// suspension point, and returns the coordinator to Idle without a
/// narration entry. The already-appended user entry is not rolled back.
#[derive(Clone)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// What a completed turn produced.
#[derive(Debug, Clone)]
pub struct TurnReport {
    /// Id of the narration entry, when one was appended.
    pub message_id: Option<MessageId>,
    /// Full narration text (possibly partial if cancelled).
    pub content: String,
    /// The turn was cancelled before completing.
    pub cancelled: bool,
    /// A classification was obtained and applied.
    pub classified: bool,
    /// Number of the chapter created this turn, if any.
    pub chapter_created: Option<u32>,
}

impl TurnReport {
    fn cancelled(content: String) -> Self {
        Self {
            message_id: None,
            content,
            cancelled: true,
            classified: false,
            chapter_created: None,
        }
    }
}

/// Drives one story's turns.
pub struct TurnCoordinator {
    provider: Arc<dyn Provider>,
    bus: Arc<EventBus>,
    config: StoryConfig,
    story: StoryLog,
    entries: EntryEngine,
    chapters: ChapterEngine,
    phase: TurnPhase,
    busy: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
}

impl TurnCoordinator {
    /// Create a coordinator; the configuration is validated up front.
    pub fn new(
        provider: Arc<dyn Provider>,
        bus: Arc<EventBus>,
        config: StoryConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            provider,
            entries: EntryEngine::new(bus.clone()),
            chapters: ChapterEngine::new(bus.clone()),
            bus,
            config,
            story: StoryLog::new(),
            phase: TurnPhase::Idle,
            busy: Arc::new(AtomicBool::new(false)),
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Handle for cancelling the current (or next) turn.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            flag: self.cancel.clone(),
        }
    }

    pub fn config(&self) -> &StoryConfig {
        &self.config
    }

    pub fn story(&self) -> &StoryLog {
        &self.story
    }

    pub fn entries(&self) -> &EntryEngine {
        &self.entries
    }

    /// Mutable entry access for setup-time seeding.
    pub fn entries_mut(&mut self) -> &mut EntryEngine {
        &mut self.entries
    }

    pub fn chapters(&self) -> &ChapterEngine {
        &self.chapters
    }

    /// Run one full turn for a user input.
    ///
    /// Rejected with [`TurnError::Busy`] while a turn is in flight.
    pub async fn process_input(&mut self, input: &str) -> Result<TurnReport, TurnError> {
        if self.busy.swap(true, Ordering::SeqCst) {
            return Err(TurnError::Busy);
        }
        self.cancel.store(false, Ordering::SeqCst);

        let result = self.run_turn(input).await;

        self.phase = TurnPhase::Idle;
        self.busy.store(false, Ordering::SeqCst);
        result
    }

    async fn run_turn(&mut self, input: &str) -> Result<TurnReport, TurnError> {
        self.story.append(EntryRole::UserAction, input);
        self.bus.emit(CoreEvent::UserInput {
            content: input.to_string(),
            mode: self.config.mode,
        });

        // Phase 1: retrieval and selection, concurrently.
        self.phase = TurnPhase::Retrieving;
        let recent_text = self
            .story
            .recent(self.config.recent_window)
            .iter()
            .map(|e| e.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        let provider = self.provider.clone();
        let (retrieved, selected) = tokio::join!(
            self.chapters
                .retrieve(provider.as_ref(), &self.config, &self.story, input),
            self.entries
                .select(provider.as_ref(), &self.config, input, &recent_text),
        );

        if self.cancel.load(Ordering::SeqCst) {
            tracing::debug!("turn cancelled after retrieval");
            return Ok(TurnReport::cancelled(String::new()));
        }

        self.bus.emit(CoreEvent::ContextReady {
            retrieved_context: retrieved.clone(),
            selected_entries: selected.clone(),
        });

        // Phase 2: stream the narration.
        self.phase = TurnPhase::Generating;
        let messages = narrator::assemble(
            &self.config,
            &self.entries,
            &selected,
            retrieved.as_deref(),
            &self.story,
            input,
        );

        let mut stream = match narrator::stream(provider.as_ref(), &self.config, messages).await {
            Ok(stream) => stream,
            Err(ProviderError::Config(message)) => {
                return self.fail_turn(
                    format!("The story provider is not configured: {message}"),
                    ProviderError::Config(message.clone()),
                );
            }
            Err(e) => {
                return self.fail_turn(format!("The narrator is unavailable: {e}"), e);
            }
        };

        let mut accumulated = String::new();
        let mut splitter = SentenceSplitter::new();
        while let Some(item) = stream.next().await {
            if self.cancel.load(Ordering::SeqCst) {
                drop(stream);
                tracing::debug!("turn cancelled mid-stream");
                return Ok(TurnReport::cancelled(accumulated));
            }
            match item {
                Ok(chunk) => {
                    if !chunk.content.is_empty() {
                        accumulated.push_str(&chunk.content);
                        self.bus.emit(CoreEvent::ResponseStreaming {
                            chunk: chunk.content.clone(),
                            accumulated: accumulated.clone(),
                        });
                        for sentence in splitter.push(&chunk.content) {
                            self.bus.emit(CoreEvent::SentenceComplete { text: sentence });
                        }
                    }
                    if chunk.done {
                        break;
                    }
                }
                Err(e) => {
                    drop(stream);
                    return self.fail_turn(format!("The narration was interrupted: {e}"), e);
                }
            }
        }
        drop(stream);

        if let Some(tail) = splitter.flush() {
            self.bus.emit(CoreEvent::SentenceComplete { text: tail });
        }

        if accumulated.trim().is_empty() {
            tracing::warn!("narrator produced no output, ending turn");
            return Ok(TurnReport {
                message_id: None,
                content: String::new(),
                cancelled: false,
                classified: false,
                chapter_created: None,
            });
        }

        let narration_id = self.story.append(EntryRole::Narration, &accumulated);
        self.bus.emit(CoreEvent::NarrativeResponse {
            message_id: narration_id,
            content: accumulated.clone(),
        });

        // Phase 3: classification. Failure skips the apply phase entirely.
        self.phase = TurnPhase::Classifying;
        let snapshot = self.entries.snapshot_digest();
        let classification = match classifier::classify(
            provider.as_ref(),
            &self.config,
            &accumulated,
            input,
            &snapshot,
        )
        .await
        {
            Ok(result) => {
                self.bus.emit(CoreEvent::ClassificationComplete {
                    message_id: narration_id,
                    result: result.clone(),
                });
                Some(result)
            }
            Err(e) => {
                tracing::warn!(error = %e, "classification failed, proceeding without state updates");
                None
            }
        };

        if self.cancel.load(Ordering::SeqCst) {
            tracing::debug!("turn cancelled after classification");
            return Ok(TurnReport::cancelled(accumulated));
        }

        let Some(result) = classification else {
            return Ok(TurnReport {
                message_id: Some(narration_id),
                content: accumulated,
                cancelled: false,
                classified: false,
                chapter_created: None,
            });
        };

        // Phase 4: apply deltas and evaluate chapters, concurrently;
        // suggestions fire in the background and are not awaited.
        self.phase = TurnPhase::Applying;
        if self.config.mode == StoryMode::CreativeWriting {
            let provider = self.provider.clone();
            let bus = self.bus.clone();
            let config = self.config.clone();
            let narration = accumulated.clone();
            let direction = input.to_string();
            tokio::spawn(async move {
                let suggestions =
                    suggestions::generate(provider.as_ref(), &config, &narration, &direction).await;
                bus.emit(CoreEvent::SuggestionsReady { suggestions });
            });
        }

        let Self {
            ref mut entries,
            ref mut chapters,
            ref mut story,
            ref config,
            ..
        } = *self;
        let (_changed, chapter) = tokio::join!(
            async { entries.apply(narration_id, &result.entry_updates) },
            chapters.maybe_create(
                provider.as_ref(),
                config,
                story,
                Some(&result.chapter_analysis)
            ),
        );

        tracing::info!(
            narration = %narration_id,
            chapter = chapter.as_ref().map(|c| c.number),
            "turn complete"
        );

        Ok(TurnReport {
            message_id: Some(narration_id),
            content: accumulated,
            cancelled: false,
            classified: true,
            chapter_created: chapter.map(|c| c.number),
        })
    }

    /// Terminal failure: record a short diagnostic as a system entry,
    /// surface an error event, and hand the error back to the caller.
    fn fail_turn(
        &mut self,
        message: String,
        error: ProviderError,
    ) -> Result<TurnReport, TurnError> {
        tracing::error!(%message, "turn failed");
        self.story.append(EntryRole::System, &message);
        self.bus.emit(CoreEvent::Error {
            source: "coordinator".to_string(),
            message,
        });
        Err(TurnError::Provider(error))
    }
}
