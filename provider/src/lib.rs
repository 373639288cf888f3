//! Unified LLM provider adapter.
//!
//! This crate provides a single capability interface over chat-completion
//! providers:
//! - Non-streaming and streaming completions
//! - Tool-calling completions
//! - Model listing and credential validation
//! - Shared retry policy with exponential backoff
//!
//! Concrete providers implement [`Provider`] and are looked up by name
//! through a [`ProviderRegistry`]; adding a provider is adding one record.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio_stream::Stream;

pub mod openai;
pub mod retry;
pub mod sse;

pub use openai::OpenAiProvider;
pub use retry::RetryPolicy;

/// Default token ceiling for completions.
pub const DEFAULT_MAX_TOKENS: usize = 8192;

/// Errors that can occur when talking to a provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP error (status {status}): {body}")]
    Http { status: u16, body: String },

    #[error("Request aborted")]
    Abort,

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl ProviderError {
    /// Whether the retry policy may re-issue the request.
    ///
    /// Network failures and 5xx responses are transient; everything else
    /// (4xx, parse, config, abort) fails immediately.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Network(_) => true,
            ProviderError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Message role in a completion request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single message in a completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Definition of a callable tool exposed to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema for the tool parameters.
    pub parameters: serde_json::Value,
}

/// Tool choice policy for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolChoice {
    /// Model decides whether to call a tool.
    Auto,
    /// Model must not call tools.
    None,
    /// Model must call some tool.
    Required,
    /// Model must call the named tool.
    Tool(String),
}

/// Request for a completion.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Model id to use.
    pub model: String,
    /// Ordered conversation messages.
    pub messages: Vec<ChatMessage>,
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Top-p sampling.
    pub top_p: Option<f32>,
    /// Maximum tokens to generate.
    pub max_tokens: usize,
    /// Stop sequences.
    pub stop_sequences: Option<Vec<String>>,
    /// Tool definitions, if the request may call tools.
    pub tools: Option<Vec<ToolDefinition>>,
    /// Tool choice policy.
    pub tool_choice: Option<ToolChoice>,
    /// Opaque extra fields merged into the wire request verbatim.
    pub extra_body: Option<serde_json::Map<String, serde_json::Value>>,
}

impl CompletionRequest {
    /// Create a request for the given model.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            messages: Vec::new(),
            temperature: None,
            top_p: None,
            max_tokens: DEFAULT_MAX_TOKENS,
            stop_sequences: None,
            tools: None,
            tool_choice: None,
            extra_body: None,
        }
    }

    pub fn with_message(mut self, message: ChatMessage) -> Self {
        self.messages.push(message);
        self
    }

    pub fn with_messages(mut self, messages: Vec<ChatMessage>) -> Self {
        self.messages = messages;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_stop_sequences(mut self, stop: Vec<String>) -> Self {
        self.stop_sequences = Some(stop);
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_tool_choice(mut self, choice: ToolChoice) -> Self {
        self.tool_choice = Some(choice);
        self
    }

    pub fn with_extra_body(
        mut self,
        extra: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        self.extra_body = Some(extra);
        self
    }
}

/// Token usage reported by the provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: usize,
    #[serde(default)]
    pub completion_tokens: usize,
    #[serde(default)]
    pub total_tokens: usize,
    #[serde(default)]
    pub reasoning_tokens: Option<usize>,
}

/// A full, non-streaming completion.
#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
    pub usage: TokenUsage,
    pub model: String,
}

/// Reason the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Other,
}

impl FinishReason {
    fn from_wire(value: &str) -> Self {
        match value {
            "stop" => FinishReason::Stop,
            "length" => FinishReason::Length,
            "tool_calls" => FinishReason::ToolCalls,
            "content_filter" => FinishReason::ContentFilter,
            _ => FinishReason::Other,
        }
    }
}

/// A tool call requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON arguments string as produced by the model.
    pub arguments: String,
}

/// Result of a tool-enabled completion.
#[derive(Debug, Clone)]
pub struct ToolCompletion {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: FinishReason,
    pub usage: TokenUsage,
}

/// A chunk of streamed completion content.
///
/// The final chunk of a stream has `done = true`; consumers must treat the
/// first such chunk (or end-of-stream) as terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamChunk {
    pub content: String,
    pub done: bool,
}

/// Boxed stream of completion chunks.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, ProviderError>> + Send>>;

/// Basic model metadata from the models listing.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelInfo {
    pub id: String,
}

/// Capability interface implemented by every provider.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Send a completion request and return the full response.
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, ProviderError>;

    /// Send a completion request and stream the response.
    async fn stream(&self, request: CompletionRequest) -> Result<ChunkStream, ProviderError>;

    /// Send a tool-enabled completion request.
    async fn complete_with_tools(
        &self,
        request: CompletionRequest,
    ) -> Result<ToolCompletion, ProviderError>;

    /// List the models available through this provider.
    async fn list_models(&self) -> Result<Vec<ModelInfo>, ProviderError>;

    /// Check that the configured credentials are usable.
    async fn validate_credentials(&self) -> Result<(), ProviderError>;

    /// Provider name used for registry lookup.
    fn name(&self) -> &str;
}

/// Registry of configured providers, keyed by name.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under its own name, replacing any previous
    /// registration with the same name.
    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    /// Look up a provider by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).cloned()
    }

    /// Names of all registered providers.
    pub fn names(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }
}
