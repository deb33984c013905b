//! OpenAI-compatible Chat Completions and Embeddings provider

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{ChatClient, EmbeddingClient};
use crate::{
    error::{Error, Result},
    stream::{ChatUpdate, ChatUpdateStream, FinishReason, ToolCallAccumulator},
    types::{ChatRequest, Content, Message, Role},
};

/// Default API endpoint
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI API client.
///
/// Chat Completions keeps no server-side history, so streamed updates never
/// carry a conversation id and `ChatRequest::conversation_id` is ignored.
pub struct OpenAIProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    headers: HashMap<String, String>,
}

impl OpenAIProvider {
    /// Create a new OpenAI provider with an API key
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            headers: HashMap::new(),
        }
    }

    /// Create from environment variable
    pub fn from_env() -> Result<Self> {
        let api_key = super::get_api_key(None, "OPENAI_API_KEY")?;
        Ok(Self::new(api_key))
    }

    /// Point the provider at another OpenAI-compatible endpoint
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Add an extra header sent with every request
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Base URL requests are sent to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|_| Error::InvalidApiKey)?;
        headers.insert(reqwest::header::AUTHORIZATION, auth);
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );

        for (key, value) in &self.headers {
            let name = key
                .parse::<HeaderName>()
                .map_err(|e| Error::InvalidConfig(format!("header name '{}': {}", key, e)))?;
            let val = value
                .parse::<HeaderValue>()
                .map_err(|e| Error::InvalidConfig(format!("header '{}': {}", key, e)))?;
            headers.insert(name, val);
        }
        Ok(headers)
    }

    fn build_request(&self, request: &ChatRequest) -> OpenAIRequest {
        let messages = request.messages.iter().flat_map(convert_message).collect();

        let tools = if request.tools.is_empty() {
            None
        } else {
            Some(
                request
                    .tools
                    .iter()
                    .map(|t| OpenAITool {
                        tool_type: "function".to_string(),
                        function: OpenAIFunction {
                            name: t.name.clone(),
                            description: Some(t.description.clone()),
                            parameters: Some(t.parameters.clone()),
                        },
                    })
                    .collect(),
            )
        };

        let has_tools = tools.is_some();
        OpenAIRequest {
            model: request.model.clone(),
            messages,
            stream: true,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            tools,
            tool_choice: if has_tools {
                Some(serde_json::json!("auto"))
            } else {
                None
            },
        }
    }
}

#[async_trait]
impl ChatClient for OpenAIProvider {
    async fn stream(&self, request: &ChatRequest) -> Result<ChatUpdateStream> {
        let body = self.build_request(request);
        let url = format!("{}/chat/completions", self.base_url);
        tracing::debug!(
            "POST {} ({} messages, {} tools)",
            url,
            body.messages.len(),
            request.tools.len()
        );

        let request_builder = self
            .client
            .post(&url)
            .headers(self.request_headers()?)
            .json(&body);

        let event_source = EventSource::new(request_builder)
            .map_err(|e| Error::Sse(format!("Failed to create event source: {}", e)))?;

        Ok(Box::pin(create_stream(event_source)))
    }
}

#[async_trait]
impl EmbeddingClient for OpenAIProvider {
    async fn embed(&self, model: &str, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(vec![]);
        }

        let url = format!("{}/embeddings", self.base_url);
        let response = self
            .client
            .post(&url)
            .headers(self.request_headers()?)
            .json(&EmbeddingRequest {
                model: model.to_string(),
                input: inputs.to_vec(),
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(error_from_status(status, &text));
        }

        let mut body: EmbeddingResponse = response.json().await?;
        if body.data.len() != inputs.len() {
            return Err(Error::UnexpectedResponse(format!(
                "expected {} embeddings, got {}",
                inputs.len(),
                body.data.len()
            )));
        }
        body.data.sort_by_key(|d| d.index);
        Ok(body.data.into_iter().map(|d| d.embedding).collect())
    }
}

/// Map a non-success HTTP status and body to an error
fn error_from_status(status: reqwest::StatusCode, body: &str) -> Error {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Error::RateLimited { retry_after: None };
    }
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Error::InvalidApiKey;
    }
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => Error::api(
            envelope.error.error_type.unwrap_or_else(|| status.to_string()),
            envelope.error.message,
        ),
        Err(_) => Error::api(status.to_string(), body.to_string()),
    }
}

fn convert_message(msg: &Message) -> Vec<OpenAIMessage> {
    match msg.role {
        Role::System | Role::User => vec![OpenAIMessage {
            role: msg.role.as_str().to_string(),
            content: Some(msg.text()),
            tool_calls: None,
            tool_call_id: None,
        }],
        Role::Assistant => {
            let tool_calls: Vec<OpenAIToolCall> = msg
                .tool_calls()
                .into_iter()
                .map(|(id, name, arguments)| OpenAIToolCall {
                    id: id.to_string(),
                    call_type: "function".to_string(),
                    function: OpenAIFunctionCall {
                        name: name.to_string(),
                        arguments: arguments.to_string(),
                    },
                })
                .collect();

            let text = msg.text();
            let content = if text.is_empty() && !tool_calls.is_empty() {
                None
            } else {
                Some(text)
            };

            vec![OpenAIMessage {
                role: "assistant".to_string(),
                content,
                tool_calls: if tool_calls.is_empty() {
                    None
                } else {
                    Some(tool_calls)
                },
                tool_call_id: None,
            }]
        }
        Role::Tool => msg
            .content
            .iter()
            .filter_map(|c| match c {
                Content::ToolResult {
                    call_id, output, ..
                } => Some(OpenAIMessage {
                    role: "tool".to_string(),
                    content: Some(output.clone()),
                    tool_calls: None,
                    tool_call_id: Some(call_id.clone()),
                }),
                _ => None,
            })
            .collect(),
    }
}

/// Turns parsed stream chunks into chat updates.
///
/// Text deltas are emitted as they arrive; tool calls are only emitted once
/// complete, in a single update at the end of the response.
#[derive(Debug, Default)]
struct ChunkDecoder {
    tool_calls: ToolCallAccumulator,
    finish_reason: Option<FinishReason>,
}

impl ChunkDecoder {
    fn decode(&mut self, chunk: StreamChunk) -> Vec<ChatUpdate> {
        let mut updates = Vec::new();
        for choice in chunk.choices {
            if let Some(content) = choice.delta.content {
                if !content.is_empty() {
                    updates.push(ChatUpdate::text_delta(content));
                }
            }

            for tc in choice.delta.tool_calls.unwrap_or_default() {
                let (name, arguments) = match tc.function {
                    Some(f) => (f.name, f.arguments),
                    None => (None, None),
                };
                self.tool_calls.push(
                    tc.index,
                    tc.id.as_deref(),
                    name.as_deref(),
                    arguments.as_deref(),
                );
            }

            if let Some(reason) = choice.finish_reason.as_deref() {
                self.finish_reason = FinishReason::parse(reason);
            }
        }
        updates
    }

    fn finish(self) -> Option<ChatUpdate> {
        let calls = self.tool_calls.finish();
        if calls.is_empty() && self.finish_reason.is_none() {
            return None;
        }
        let mut update = ChatUpdate::with_contents(Role::Assistant, calls);
        update.finish_reason = self.finish_reason;
        Some(update)
    }
}

fn create_stream(mut event_source: EventSource) -> impl futures::Stream<Item = Result<ChatUpdate>> {
    stream! {
        let mut decoder = ChunkDecoder::default();

        while let Some(event) = event_source.next().await {
            match event {
                Ok(Event::Open) => {}
                Ok(Event::Message(msg)) => {
                    if msg.data == "[DONE]" {
                        break;
                    }

                    match serde_json::from_str::<StreamChunk>(&msg.data) {
                        Ok(chunk) => {
                            for update in decoder.decode(chunk) {
                                yield Ok(update);
                            }
                        }
                        Err(e) => {
                            event_source.close();
                            yield Err(Error::UnexpectedResponse(format!(
                                "Failed to parse chunk: {}",
                                e
                            )));
                            return;
                        }
                    }
                }
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(reqwest_eventsource::Error::InvalidStatusCode(status, response)) => {
                    event_source.close();
                    let text = response.text().await.unwrap_or_default();
                    yield Err(error_from_status(status, &text));
                    return;
                }
                Err(e) => {
                    event_source.close();
                    yield Err(Error::Sse(e.to_string()));
                    return;
                }
            }
        }

        event_source.close();
        if let Some(update) = decoder.finish() {
            yield Ok(update);
        }
    }
}

// Request/Response types

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAITool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct OpenAIMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAIToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct OpenAITool {
    #[serde(rename = "type")]
    tool_type: String,
    function: OpenAIFunction,
}

#[derive(Debug, Serialize)]
struct OpenAIFunction {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct OpenAIToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: String,
    function: OpenAIFunctionCall,
}

#[derive(Debug, Serialize)]
struct OpenAIFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
    #[serde(rename = "type")]
    error_type: Option<String>,
}

// Streaming response types

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<StreamToolCall>>,
}

#[derive(Debug, Deserialize)]
struct StreamToolCall {
    index: usize,
    id: Option<String>,
    function: Option<StreamFunction>,
}

#[derive(Debug, Deserialize)]
struct StreamFunction {
    name: Option<String>,
    arguments: Option<String>,
}
