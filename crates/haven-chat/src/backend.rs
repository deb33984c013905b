//! Model backend abstraction and the function-invoking implementation

use std::{sync::Arc, time::Duration};

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use haven_ai::{
    ChatClient, ChatRequest, ChatUpdate, ChatUpdateStream, Content, Error, Message, Result, Role,
};
use tokio_util::sync::CancellationToken;

use crate::tool::ToolRegistry;

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// No retries at all
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Calculate delay for a given attempt (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_secs =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_secs_f64(delay_secs.min(self.max_delay.as_secs_f64()))
    }
}

/// Per-turn options passed to the backend
#[derive(Debug, Clone, Default)]
pub struct TurnOptions {
    /// Server-side conversation to continue, if the backend issued one
    pub conversation_id: Option<String>,
}

/// Streaming model backend driven by a chat session.
///
/// The backend owns tool invocation: when the model asks for a tool, the
/// backend calls into `tools` mid-stream and keeps streaming afterwards.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Start a streaming turn. The stream is lazy, finite and not restartable.
    async fn stream(
        &self,
        messages: Vec<Message>,
        tools: Arc<ToolRegistry>,
        options: TurnOptions,
        cancel: CancellationToken,
    ) -> Result<ChatUpdateStream>;
}

/// Wraps a [`ChatClient`] and runs the model's tool calls through the tool table
pub struct FunctionInvokingBackend {
    client: Arc<dyn ChatClient>,
    model: String,
    max_iterations: usize,
    retry_config: RetryConfig,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
}

impl FunctionInvokingBackend {
    /// Default number of tool rounds per turn
    pub const DEFAULT_MAX_ITERATIONS: usize = 10;

    pub fn new(client: Arc<dyn ChatClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            max_iterations: Self::DEFAULT_MAX_ITERATIONS,
            retry_config: RetryConfig::default(),
            max_tokens: None,
            temperature: None,
        }
    }

    /// Set the maximum number of tool rounds per turn
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Set retry configuration
    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

/// Open a stream, retrying transient failures with backoff
async fn open_stream(
    client: &dyn ChatClient,
    request: &ChatRequest,
    retry_config: &RetryConfig,
    cancel: &CancellationToken,
) -> Result<ChatUpdateStream> {
    let mut attempt = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Err(Error::Aborted);
        }

        match client.stream(request).await {
            Ok(stream) => return Ok(stream),
            Err(e) if e.is_retryable() && attempt < retry_config.max_retries => {
                let delay = retry_config.delay_for_attempt(attempt);
                tracing::warn!(
                    "Request failed (attempt {}/{}): {}. Retrying in {:?}...",
                    attempt + 1,
                    retry_config.max_retries + 1,
                    e,
                    delay
                );
                attempt += 1;
                tokio::select! {
                    _ = cancel.cancelled() => return Err(Error::Aborted),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => return Err(e),
        }
    }
}

#[async_trait]
impl ModelBackend for FunctionInvokingBackend {
    async fn stream(
        &self,
        messages: Vec<Message>,
        tools: Arc<ToolRegistry>,
        options: TurnOptions,
        cancel: CancellationToken,
    ) -> Result<ChatUpdateStream> {
        let client = self.client.clone();
        let model = self.model.clone();
        let max_iterations = self.max_iterations;
        let retry_config = self.retry_config.clone();
        let max_tokens = self.max_tokens;
        let temperature = self.temperature;

        let update_stream: ChatUpdateStream = Box::pin(stream! {
            let mut messages = messages;
            let mut conversation_id = options.conversation_id;
            let mut iteration = 0usize;

            loop {
                // The last round offers no tools so the model has to answer
                let offer_tools = iteration < max_iterations && !tools.is_empty();
                let request = ChatRequest {
                    model: model.clone(),
                    messages: messages.clone(),
                    tools: if offer_tools { tools.definitions() } else { vec![] },
                    conversation_id: conversation_id.clone(),
                    max_tokens,
                    temperature,
                };

                let mut inner =
                    match open_stream(client.as_ref(), &request, &retry_config, &cancel).await {
                        Ok(s) => s,
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    };

                let mut text = String::new();
                let mut calls: Vec<Content> = vec![];

                loop {
                    let item = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => None,
                        item = inner.next() => item,
                    };
                    let Some(item) = item else { break };

                    let update = match item {
                        Ok(update) => update,
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    };
                    if let Some(id) = &update.conversation_id {
                        conversation_id = Some(id.clone());
                    }
                    text.push_str(&update.text());
                    calls.extend(update.tool_calls().cloned());
                    yield Ok(update);
                }

                if cancel.is_cancelled() {
                    return;
                }
                if calls.is_empty() {
                    return;
                }
                if !offer_tools {
                    tracing::warn!(
                        "Model requested {} tool call(s) after the last tool round; ignoring",
                        calls.len()
                    );
                    return;
                }

                let mut results = Vec::with_capacity(calls.len());
                for call in &calls {
                    if let Content::ToolCall { id, name, arguments } = call {
                        let result = tools.invoke(name, arguments.clone(), cancel.clone()).await;
                        results.push(Content::tool_result(id.clone(), result.output, result.is_error));
                    }
                }
                if cancel.is_cancelled() {
                    return;
                }

                yield Ok(ChatUpdate::with_contents(Role::Tool, results.clone()));

                let result_message = Message::with_content(Role::Tool, results);
                if conversation_id.is_some() {
                    messages = vec![result_message];
                } else {
                    let mut call_content = Vec::with_capacity(calls.len() + 1);
                    if !text.is_empty() {
                        call_content.push(Content::text(text));
                    }
                    call_content.extend(calls);
                    messages.push(Message::with_content(Role::Assistant, call_content));
                    messages.push(result_message);
                }

                iteration += 1;
                tracing::debug!("Tool round {} complete", iteration);
            }
        });

        Ok(update_stream)
    }
}
