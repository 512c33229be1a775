//! Provider-agnostic request/response shapes and the streaming provider
//! trait every adapter implements.

use bia_domain::message::{ContentBlock, Message, ToolCallStub};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tool-choice policy passed to the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    Auto,
    Required,
    None,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub model: String,
    pub response_format: Value,
    pub tool_choice: Option<ToolChoice>,
    pub include_web_search: bool,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            model: String::new(),
            response_format: serde_json::json!({"type": "text"}),
            tool_choice: Some(ToolChoice::Auto),
            include_web_search: false,
        }
    }
}

/// A tool exposed to the LLM as a function-call schema descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub settings: LlmSettings,
    pub tools: Vec<ToolDefinition>,
    pub user_info: Option<UserInfo>,
}

/// `{content, content_blocks, role:"assistant", tool_calls, stream_id,
/// finish_reason, citations, web_search_results}` — the assembled
/// response after a stream has fully drained.
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub content: String,
    pub content_blocks: Vec<ContentBlock>,
    /// Client-side tool calls only — server-side ids (`srvtoolu_*`) are
    /// filtered out and represented solely via `content_blocks`.
    pub tool_calls: Vec<ToolCallStub>,
    pub stream_id: String,
    pub finish_reason: Option<String>,
    pub citations: Vec<Value>,
    pub web_search_results: Vec<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u64>,
}

/// Usage totals with defaults filled (cost defaults to 0.0 when absent).
#[derive(Debug, Clone, Default)]
pub struct Usage {
    pub total_tokens: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub completion_tokens_details: Option<TokenDetails>,
    pub prompt_tokens_details: Option<TokenDetails>,
    pub cost: f64,
}

/// Events emitted while draining a streamed chat completion, assembled by
/// a small state machine keyed on the provider's `index` field (see
/// `assembly::StreamAssembler`) rather than collected eagerly — the
/// provider may interleave content and tool-call fragments.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    ContentDelta(String),
    /// One fragment of a tool call at a stable `index`. `id`/`name` arrive
    /// once near the start; `arguments_delta` accumulates across many
    /// events for the same index.
    ToolCallDelta {
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments_delta: Option<String>,
    },
    Citations(Vec<Value>),
    WebSearchResults(Vec<Value>),
    Done {
        finish_reason: Option<String>,
        usage: Option<Usage>,
        cost: Option<f64>,
        overhead_ms: Option<u64>,
        provider_call_id: Option<String>,
    },
}

pub type BoxStream<'a, T> = std::pin::Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Trait every LLM adapter implements: send a request, get a stream of
/// raw provider events back.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    async fn chat_stream(
        &self,
        req: &ChatRequest,
    ) -> bia_domain::error::Result<BoxStream<'static, bia_domain::error::Result<StreamEvent>>>;

    fn provider_id(&self) -> &str;
}
