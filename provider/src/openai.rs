//! OpenAI-compatible chat-completions provider.
//!
//! Works against any endpoint speaking the chat-completions wire protocol
//! (OpenAI, OpenRouter, most self-hosted gateways): POST `/chat/completions`
//! with bearer auth, SSE framing for streams, GET `/models` for the listing.

use crate::retry::RetryPolicy;
use crate::sse::{SseData, SseFramer};
use crate::{
    ChunkStream, Completion, CompletionRequest, FinishReason, ModelInfo, Provider, ProviderError,
    Role, StreamChunk, TokenUsage, ToolCall, ToolChoice, ToolCompletion,
};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default base URL when none is configured.
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Hard bound on the models listing.
const LIST_MODELS_TIMEOUT: Duration = Duration::from_secs(15);

/// Provider speaking the OpenAI chat-completions protocol.
pub struct OpenAiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    name: String,
    retry: RetryPolicy,
}

impl OpenAiProvider {
    /// Create a provider against the given base URL.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            name: "openai".to_string(),
            retry: RetryPolicy::default(),
        }
    }

    /// Create a provider from `OPENAI_API_KEY` (and optional `OPENAI_BASE_URL`).
    pub fn from_env() -> Result<Self, ProviderError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| ProviderError::Config("OPENAI_API_KEY not set".to_string()))?;
        let base_url =
            std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Ok(Self::new(base_url, api_key))
    }

    /// Override the registry name (useful when registering several
    /// OpenAI-compatible endpoints side by side).
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Override the retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn build_headers(&self) -> Result<HeaderMap, ProviderError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let bearer = format!("Bearer {}", self.api_key);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&bearer)
                .map_err(|e| ProviderError::Config(format!("Invalid API key: {e}")))?,
        );
        Ok(headers)
    }

    /// POST the completions body, retrying transient failures, and return
    /// the successful response.
    async fn post_completions(
        &self,
        body: serde_json::Value,
    ) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let headers = self.build_headers()?;

        self.retry
            .run(|_| {
                let request = self
                    .client
                    .post(&url)
                    .headers(headers.clone())
                    .json(&body);
                async move {
                    let response = request
                        .send()
                        .await
                        .map_err(|e| ProviderError::Network(e.to_string()))?;

                    if !response.status().is_success() {
                        let status = response.status().as_u16();
                        let body = response.text().await.unwrap_or_default();
                        return Err(ProviderError::Http { status, body });
                    }
                    Ok(response)
                }
            })
            .await
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, ProviderError> {
        let body = build_body(&request, false);
        let response = self.post_completions(body).await?;

        let api: ApiResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        let choice = api
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Parse("response had no choices".to_string()))?;

        Ok(Completion {
            content: choice.message.content.unwrap_or_default(),
            usage: api.usage.unwrap_or_default(),
            model: api.model,
        })
    }

    async fn stream(&self, request: CompletionRequest) -> Result<ChunkStream, ProviderError> {
        let body = build_body(&request, true);
        let response = self.post_completions(body).await?;

        Ok(sse_chunk_stream(response.bytes_stream()))
    }

    async fn complete_with_tools(
        &self,
        request: CompletionRequest,
    ) -> Result<ToolCompletion, ProviderError> {
        let body = build_body(&request, false);
        let response = self.post_completions(body).await?;

        let api: ApiResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        let choice = api
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Parse("response had no choices".to_string()))?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| ToolCall {
                id: call.id,
                name: call.function.name,
                arguments: call.function.arguments,
            })
            .collect();

        Ok(ToolCompletion {
            content: choice.message.content,
            tool_calls,
            finish_reason: choice
                .finish_reason
                .as_deref()
                .map(FinishReason::from_wire)
                .unwrap_or(FinishReason::Other),
            usage: api.usage.unwrap_or_default(),
        })
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let headers = self.build_headers()?;

        let request = self.client.get(&url).headers(headers).send();
        let response = tokio::time::timeout(LIST_MODELS_TIMEOUT, request)
            .await
            .map_err(|_| ProviderError::Abort)?
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Http { status, body });
        }

        let listing: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        let data = listing
            .get("data")
            .and_then(|d| d.as_array())
            .ok_or_else(|| ProviderError::Parse("models listing had no data array".to_string()))?;

        let models = data
            .iter()
            .filter_map(|entry| {
                entry
                    .get("id")
                    .and_then(|id| id.as_str())
                    .map(|id| ModelInfo { id: id.to_string() })
            })
            .collect();

        Ok(models)
    }

    async fn validate_credentials(&self) -> Result<(), ProviderError> {
        self.list_models().await.map(|_| ())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Turn a raw byte stream of SSE frames into a chunk stream.
///
/// The framer keeps partial lines across reads; `done` fuses the stream
/// after the first terminal chunk. A trailing `None` marks end-of-upstream
/// so the framer can flush an unterminated last line even when the server
/// never sent `[DONE]`.
fn sse_chunk_stream<S, B, E>(upstream: S) -> ChunkStream
where
    S: futures::Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let stream = upstream
        .map(Some)
        .chain(futures::stream::once(futures::future::ready(None)))
        .scan((SseFramer::new(), false), |(framer, done), item| {
            let items: Vec<Result<StreamChunk, ProviderError>> = if *done {
                Vec::new()
            } else {
                match item {
                    Some(Ok(bytes)) => {
                        let text = String::from_utf8_lossy(bytes.as_ref());
                        let mut out = Vec::new();
                        for data in framer.push(&text) {
                            match chunk_from_sse(data) {
                                Some(chunk) => {
                                    if chunk.done {
                                        *done = true;
                                    }
                                    out.push(Ok(chunk));
                                    if *done {
                                        break;
                                    }
                                }
                                None => continue,
                            }
                        }
                        out
                    }
                    Some(Err(e)) => {
                        *done = true;
                        vec![Err(ProviderError::Network(e.to_string()))]
                    }
                    None => {
                        *done = true;
                        framer
                            .finish()
                            .and_then(chunk_from_sse)
                            .map(Ok)
                            .into_iter()
                            .collect()
                    }
                }
            };
            futures::future::ready(Some(items))
        })
        .flat_map(futures::stream::iter);

    Box::pin(stream)
}

/// Map one framed SSE payload to a stream chunk.
///
/// Unparseable payloads yield `None` and are dropped.
fn chunk_from_sse(data: SseData) -> Option<StreamChunk> {
    match data {
        SseData::Done => Some(StreamChunk {
            content: String::new(),
            done: true,
        }),
        SseData::Payload(json) => match serde_json::from_str::<ApiStreamChunk>(&json) {
            Ok(chunk) => {
                let choice = chunk.choices.into_iter().next()?;
                Some(StreamChunk {
                    content: choice.delta.content.unwrap_or_default(),
                    done: choice.finish_reason.is_some(),
                })
            }
            Err(e) => {
                tracing::debug!(error = %e, "dropping unparseable stream payload");
                None
            }
        },
    }
}

/// Serialize the wire request, merging `extra_body` passthrough fields.
fn build_body(request: &CompletionRequest, stream: bool) -> serde_json::Value {
    let api = ApiRequest {
        model: &request.model,
        messages: request
            .messages
            .iter()
            .map(|m| ApiMessage {
                role: role_name(m.role),
                content: &m.content,
            })
            .collect(),
        temperature: request.temperature,
        top_p: request.top_p,
        max_tokens: request.max_tokens,
        stop: request.stop_sequences.as_deref(),
        stream,
        tools: request.tools.as_ref().map(|tools| {
            tools
                .iter()
                .map(|t| ApiTool {
                    r#type: "function",
                    function: ApiFunction {
                        name: &t.name,
                        description: &t.description,
                        parameters: &t.parameters,
                    },
                })
                .collect()
        }),
        tool_choice: request.tool_choice.as_ref().map(tool_choice_value),
    };

    let mut body = serde_json::to_value(&api).unwrap_or_default();
    if let (Some(obj), Some(extra)) = (body.as_object_mut(), request.extra_body.as_ref()) {
        for (key, value) in extra {
            obj.insert(key.clone(), value.clone());
        }
    }
    body
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn tool_choice_value(choice: &ToolChoice) -> serde_json::Value {
    match choice {
        ToolChoice::Auto => serde_json::Value::String("auto".to_string()),
        ToolChoice::None => serde_json::Value::String("none".to_string()),
        ToolChoice::Required => serde_json::Value::String("required".to_string()),
        ToolChoice::Tool(name) => serde_json::json!({
            "type": "function",
            "function": { "name": name }
        }),
    }
}

// Wire request/response types.

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    max_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<&'a [String]>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ApiTool<'a>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ApiTool<'a> {
    r#type: &'static str,
    function: ApiFunction<'a>,
}

#[derive(Debug, Serialize)]
struct ApiFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: String,
    choices: Vec<ApiChoice>,
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ApiToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ApiToolCall {
    id: String,
    function: ApiFunctionCall,
}

#[derive(Debug, Deserialize)]
struct ApiFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ApiStreamChunk {
    choices: Vec<ApiStreamChoice>,
}

#[derive(Debug, Deserialize)]
struct ApiStreamChoice {
    delta: ApiDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiDelta {
    content: Option<String>,
}
