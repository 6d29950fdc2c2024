//! LLM transport trait, retrying caller, and an OpenAI-compatible client.
//!
//! The transport owns its own low-level retry with linear backoff. When
//! those retries are exhausted the caller degrades to a sentinel reply —
//! zeroed token counts and a fixed failure string — instead of erroring,
//! so stages treat transport failure as just another unparseable response.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::config::LlmSettings;
use crate::conversation::{Conversation, Role};
use crate::error::{Error, Result};

/// Content of a reply whose transport retries were all exhausted.
pub const TRANSPORT_FAILURE_SENTINEL: &str = "The LLM call still failed after multiple retries.";

/// A request to the language model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRequest {
    /// Ordered conversation to send
    pub conversation: Conversation,
    /// Model identifier
    pub model: String,
    /// Sampling temperature
    pub temperature: f64,
    /// Maximum tokens to generate
    pub max_tokens: u32,
}

/// A reply from the language model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmReply {
    /// Prompt token count
    pub input_tokens: u64,
    /// Completion token count
    pub output_tokens: u64,
    /// Reasoning text, empty for non-reasoning models
    pub reasoning: String,
    /// Generated content text
    pub content: String,
}

impl LlmReply {
    /// Create a reply carrying content only.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            input_tokens: 0,
            output_tokens: 0,
            reasoning: String::new(),
            content: content.into(),
        }
    }

    /// The sentinel reply produced when transport retries are exhausted.
    pub fn transport_failure() -> Self {
        Self::new(TRANSPORT_FAILURE_SENTINEL)
    }

    /// Whether this reply is the transport-failure sentinel. Callers must
    /// treat it as a soft failure, never parse it as content.
    pub fn is_transport_failure(&self) -> bool {
        self.content == TRANSPORT_FAILURE_SENTINEL
    }
}

/// Low-level transport: one conversation in, one reply out.
#[async_trait]
pub trait LlmTransport: Send + Sync {
    /// Send a conversation and return the generated reply.
    async fn complete(&self, request: &LlmRequest) -> Result<LlmReply>;
}

/// Retrying caller wrapping a transport.
///
/// Retries up to `max_retries` times with linear backoff (sleep
/// proportional to the attempt number) and returns the sentinel reply on
/// total exhaustion rather than erroring.
#[derive(Clone)]
pub struct LlmCaller {
    transport: Arc<dyn LlmTransport>,
    settings: LlmSettings,
}

impl LlmCaller {
    /// Create a caller over a transport.
    pub fn new(transport: Arc<dyn LlmTransport>, settings: LlmSettings) -> Self {
        Self {
            transport,
            settings,
        }
    }

    /// The configured settings.
    pub fn settings(&self) -> &LlmSettings {
        &self.settings
    }

    /// Send a conversation, retrying on transport errors.
    pub async fn call(&self, conversation: &Conversation) -> LlmReply {
        let request = LlmRequest {
            conversation: conversation.clone(),
            model: self.settings.model.clone(),
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_output_tokens,
        };

        for attempt in 1..=self.settings.max_retries {
            match self.transport.complete(&request).await {
                Ok(reply) => return reply,
                Err(e) => {
                    warn!(attempt, error = %e, "LLM call failed");
                    if attempt < self.settings.max_retries {
                        tokio::time::sleep(Duration::from_secs(attempt as u64)).await;
                    }
                }
            }
        }

        LlmReply::transport_failure()
    }
}

/// OpenAI-compatible chat-completions client (DeepSeek-style reasoning
/// models included).
pub struct OpenAiCompatClient {
    settings: LlmSettings,
    http: Client,
}

impl OpenAiCompatClient {
    /// Create a client from validated settings.
    pub fn new(settings: LlmSettings) -> Result<Self> {
        settings.validate()?;
        let http = Client::builder()
            .timeout(Duration::from_secs(600))
            .build()
            .map_err(|e| Error::config(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { settings, http })
    }
}

// OpenAI-compatible API types
#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: ChatUsage,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[async_trait]
impl LlmTransport for OpenAiCompatClient {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmReply> {
        let messages: Vec<ChatMessage> = request
            .conversation
            .turns()
            .iter()
            .map(|t| ChatMessage {
                role: match t.role {
                    Role::System => "system".to_string(),
                    Role::User => "user".to_string(),
                    Role::Assistant => "assistant".to_string(),
                },
                content: t.content.clone(),
            })
            .collect();

        let api_request = ChatRequest {
            model: request.model.clone(),
            messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: false,
        };

        let url = format!("{}/chat/completions", self.settings.url.trim_end_matches('/'));

        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.settings.key))
            .header("content-type", "application/json")
            .json(&api_request)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Transport(format!("failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(Error::Transport(format!("API error ({status}): {body}")));
        }

        let api_response: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| Error::Transport(format!("failed to parse response: {e}")))?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::Transport("no choices in response".to_string()))?;

        Ok(LlmReply {
            input_tokens: api_response.usage.prompt_tokens,
            output_tokens: api_response.usage.completion_tokens,
            reasoning: choice.message.reasoning_content.unwrap_or_default(),
            content: choice.message.content.unwrap_or_default(),
        })
    }
}
