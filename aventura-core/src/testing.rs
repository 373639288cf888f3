//! Testing utilities.
//!
//! - [`MockProvider`] answers provider calls from per-model scripted
//!   queues, with failure injection and a recorded call log.
//! - [`TurnHarness`] wires a coordinator to mock models, one distinct
//!   model id per pipeline role, for deterministic full-turn tests
//!   without API calls.

use crate::bus::EventBus;
use crate::config::{RoleModels, StoryConfig};
use crate::coordinator::{TurnCoordinator, TurnError, TurnReport};
use crate::events::EventKind;
use crate::id::EntryId;
use crate::world::Entry;
use async_trait::async_trait;
use provider::{
    ChunkStream, Completion, CompletionRequest, FinishReason, ModelInfo, Provider, ProviderError,
    StreamChunk, TokenUsage, ToolCompletion,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// Model id the harness assigns to the narrator role.
pub const NARRATOR_MODEL: &str = "mock-narrator";
/// Model id the harness assigns to the classifier role.
pub const CLASSIFIER_MODEL: &str = "mock-classifier";
/// Model id the harness assigns to the retrieval role.
pub const RETRIEVAL_MODEL: &str = "mock-retrieval";
/// Model id the harness assigns to the summarization role.
pub const SUMMARIZATION_MODEL: &str = "mock-summarizer";
/// Model id the harness assigns to the suggestions role.
pub const SUGGESTIONS_MODEL: &str = "mock-suggestions";

/// Stream chunk size for scripted text responses.
const MOCK_CHUNK_CHARS: usize = 16;

/// One scripted provider response.
#[derive(Debug, Clone)]
enum Scripted {
    Text(String),
    Chunks(Vec<String>),
    HttpError(u16),
    NetworkError,
}

/// What kind of provider call was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Complete,
    Stream,
    Tools,
    ListModels,
}

/// A recorded provider call.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub model: String,
    pub kind: CallKind,
}

#[derive(Default)]
struct MockInner {
    scripts: HashMap<String, VecDeque<Scripted>>,
    calls: Vec<RecordedCall>,
}

/// A provider that answers from scripted per-model queues.
#[derive(Default)]
pub struct MockProvider {
    inner: Mutex<MockInner>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a text response for a model (builder form).
    pub fn with_response(self, model: impl Into<String>, text: impl Into<String>) -> Self {
        self.push_response(model, text);
        self
    }

    /// Queue explicit stream chunks for a model (builder form).
    pub fn with_stream_chunks(self, model: impl Into<String>, chunks: Vec<String>) -> Self {
        self.push_stream_chunks(model, chunks);
        self
    }

    /// Queue an HTTP failure for a model (builder form).
    pub fn with_http_error(self, model: impl Into<String>, status: u16) -> Self {
        self.push_http_error(model, status);
        self
    }

    /// Queue a network failure for a model (builder form).
    pub fn with_network_error(self, model: impl Into<String>) -> Self {
        self.push(model.into(), Scripted::NetworkError);
        self
    }

    pub fn push_response(&self, model: impl Into<String>, text: impl Into<String>) {
        self.push(model.into(), Scripted::Text(text.into()));
    }

    pub fn push_stream_chunks(&self, model: impl Into<String>, chunks: Vec<String>) {
        self.push(model.into(), Scripted::Chunks(chunks));
    }

    pub fn push_http_error(&self, model: impl Into<String>, status: u16) {
        self.push(model.into(), Scripted::HttpError(status));
    }

    fn push(&self, model: String, scripted: Scripted) {
        self.inner
            .lock()
            .unwrap()
            .scripts
            .entry(model)
            .or_default()
            .push_back(scripted);
    }

    fn pop(&self, model: &str, kind: CallKind) -> Result<Scripted, ProviderError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(RecordedCall {
            model: model.to_string(),
            kind,
        });
        inner
            .scripts
            .get_mut(model)
            .and_then(VecDeque::pop_front)
            .ok_or_else(|| {
                ProviderError::Config(format!("no scripted response for model {model}"))
            })
    }

    fn resolve(&self, scripted: Scripted) -> Result<String, ProviderError> {
        match scripted {
            Scripted::Text(text) => Ok(text),
            Scripted::Chunks(chunks) => Ok(chunks.concat()),
            Scripted::HttpError(status) => Err(ProviderError::Http {
                status,
                body: "scripted failure".to_string(),
            }),
            Scripted::NetworkError => Err(ProviderError::Network("scripted failure".to_string())),
        }
    }

    /// Every recorded call, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn total_calls(&self) -> usize {
        self.inner.lock().unwrap().calls.len()
    }

    pub fn calls_for(&self, model: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.model == model)
            .count()
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, ProviderError> {
        let scripted = self.pop(&request.model, CallKind::Complete)?;
        let content = self.resolve(scripted)?;
        Ok(Completion {
            content,
            usage: TokenUsage::default(),
            model: request.model,
        })
    }

    async fn stream(&self, request: CompletionRequest) -> Result<ChunkStream, ProviderError> {
        let scripted = self.pop(&request.model, CallKind::Stream)?;
        let chunks = match scripted {
            Scripted::Text(text) => split_chunks(&text, MOCK_CHUNK_CHARS),
            Scripted::Chunks(chunks) => chunks,
            Scripted::HttpError(status) => {
                return Err(ProviderError::Http {
                    status,
                    body: "scripted failure".to_string(),
                })
            }
            Scripted::NetworkError => {
                return Err(ProviderError::Network("scripted failure".to_string()))
            }
        };

        let mut items: Vec<Result<StreamChunk, ProviderError>> = chunks
            .into_iter()
            .map(|content| {
                Ok(StreamChunk {
                    content,
                    done: false,
                })
            })
            .collect();
        items.push(Ok(StreamChunk {
            content: String::new(),
            done: true,
        }));

        Ok(Box::pin(futures::stream::iter(items)))
    }

    async fn complete_with_tools(
        &self,
        request: CompletionRequest,
    ) -> Result<ToolCompletion, ProviderError> {
        let scripted = self.pop(&request.model, CallKind::Tools)?;
        let content = self.resolve(scripted)?;
        Ok(ToolCompletion {
            content: Some(content),
            tool_calls: Vec::new(),
            finish_reason: FinishReason::Stop,
            usage: TokenUsage::default(),
        })
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, ProviderError> {
        self.inner.lock().unwrap().calls.push(RecordedCall {
            model: String::new(),
            kind: CallKind::ListModels,
        });
        Ok(Vec::new())
    }

    async fn validate_credentials(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

fn split_chunks(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(size)
        .map(|chunk| chunk.iter().collect())
        .collect()
}

/// A coordinator wired to mock models, one per pipeline role.
pub struct TurnHarness {
    pub provider: Arc<MockProvider>,
    pub bus: Arc<EventBus>,
    pub coordinator: TurnCoordinator,
}

impl TurnHarness {
    pub fn new() -> Self {
        Self::with_config(StoryConfig::default())
    }

    /// Build a harness over a config; role models are replaced with the
    /// harness mock ids so each role scripts independently.
    pub fn with_config(mut config: StoryConfig) -> Self {
        config.models = RoleModels {
            narrator: Some(NARRATOR_MODEL.to_string()),
            classifier: Some(CLASSIFIER_MODEL.to_string()),
            retrieval: Some(RETRIEVAL_MODEL.to_string()),
            summarization: Some(SUMMARIZATION_MODEL.to_string()),
            suggestions: Some(SUGGESTIONS_MODEL.to_string()),
        };

        let bus = Arc::new(EventBus::new());
        let provider = Arc::new(MockProvider::new());
        let coordinator = TurnCoordinator::new(provider.clone(), bus.clone(), config)
            .expect("harness config is valid");

        Self {
            provider,
            bus,
            coordinator,
        }
    }

    pub fn script_narration(&self, text: impl Into<String>) {
        self.provider.push_response(NARRATOR_MODEL, text);
    }

    pub fn script_narration_chunks(&self, chunks: Vec<String>) {
        self.provider.push_stream_chunks(NARRATOR_MODEL, chunks);
    }

    pub fn script_classification(&self, json: impl Into<String>) {
        self.provider.push_response(CLASSIFIER_MODEL, json);
    }

    /// Script a classification with no deltas and no chapter request.
    pub fn script_empty_classification(&self) {
        self.script_classification("{}");
    }

    pub fn seed_entry(&mut self, entry: Entry) -> EntryId {
        self.coordinator.entries_mut().insert(entry)
    }

    pub async fn turn(&mut self, input: &str) -> Result<TurnReport, TurnError> {
        self.coordinator.process_input(input).await
    }

    /// Kinds of every event delivered so far, in delivery order.
    pub fn event_kinds(&self) -> Vec<EventKind> {
        self.bus
            .recent_events()
            .iter()
            .map(|r| r.event.kind())
            .collect()
    }
}

impl Default for TurnHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Assert an event kind was delivered during the run.
#[track_caller]
pub fn assert_emitted(harness: &TurnHarness, kind: EventKind) {
    assert!(
        harness.event_kinds().contains(&kind),
        "expected {kind:?} to have been emitted; got {:?}",
        harness.event_kinds()
    );
}

/// Assert an event kind was never delivered during the run.
#[track_caller]
pub fn assert_not_emitted(harness: &TurnHarness, kind: EventKind) {
    assert!(
        !harness.event_kinds().contains(&kind),
        "expected {kind:?} to not have been emitted"
    );
}
