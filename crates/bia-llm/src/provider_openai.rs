//! OpenAI-compatible streaming adapter. Works with OpenAI, Azure OpenAI,
//! and any endpoint following the OpenAI chat-completions contract.

use bia_domain::error::{Error, Result};
use bia_domain::message::{Message, Role};
use serde_json::Value;

use crate::sse::sse_response_stream;
use crate::traits::{BoxStream, ChatRequest, LlmProvider, StreamEvent, TokenDetails, Usage};

pub struct OpenAiCompatProvider {
    id: String,
    base_url: String,
    api_key: String,
    default_model: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn new(
        id: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        default_model: impl Into<String>,
        timeout_ms: u64,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            id: id.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            default_model: default_model.into(),
            client,
        })
    }

    fn build_body(&self, req: &ChatRequest) -> Value {
        let messages: Vec<Value> = req.messages.iter().map(msg_to_openai).collect();
        let mut body = serde_json::json!({
            "model": if req.settings.model.is_empty() { &self.default_model } else { &req.settings.model },
            "messages": messages,
            "stream": true,
            "stream_options": {"include_usage": true},
        });
        if !req.tools.is_empty() {
            let tools: Vec<Value> = req
                .tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = Value::Array(tools);
        }
        if req.settings.include_web_search {
            body["web_search_options"] = serde_json::json!({});
        }
        body
    }
}

fn msg_to_openai(m: &Message) -> Value {
    let role = match m.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };
    let mut v = serde_json::json!({ "role": role });
    if let Some(content) = &m.content {
        v["content"] = Value::String(content.clone());
    }
    if let Some(id) = &m.tool_call_id {
        v["tool_call_id"] = Value::String(id.clone());
    }
    if let Some(calls) = &m.tool_calls {
        v["tool_calls"] = serde_json::to_value(calls).unwrap_or_default();
    }
    v
}

fn parse_usage(v: &Value) -> Option<Usage> {
    let details = |key: &str| -> Option<TokenDetails> {
        v.get(key).map(|d| TokenDetails {
            cached_tokens: d.get("cached_tokens").and_then(Value::as_u64),
            reasoning_tokens: d.get("reasoning_tokens").and_then(Value::as_u64),
        })
    };
    Some(Usage {
        total_tokens: v.get("total_tokens")?.as_u64()?,
        prompt_tokens: v.get("prompt_tokens")?.as_u64()?,
        completion_tokens: v.get("completion_tokens")?.as_u64()?,
        completion_tokens_details: details("completion_tokens_details"),
        prompt_tokens_details: details("prompt_tokens_details"),
        cost: 0.0,
    })
}

/// Parse one `data:` payload into zero or more `StreamEvent`s.
fn parse_chunk(data: &str) -> Vec<Result<StreamEvent>> {
    if data.trim() == "[DONE]" {
        return Vec::new();
    }

    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return vec![Err(Error::Json(e))],
    };

    let mut events = Vec::new();

    let choice = v.get("choices").and_then(|c| c.as_array()).and_then(|a| a.first());

    if let Some(hidden) = v.get("_hidden_params") {
        // carried only when the adapter's transport echoes it back (test doubles do).
        let cost = hidden.get("response_cost").and_then(Value::as_f64);
        let overhead_ms = hidden.get("overhead_ms").and_then(Value::as_u64);
        let call_id = hidden
            .get("litellm_call_id")
            .and_then(Value::as_str)
            .map(String::from);
        if cost.is_some() || overhead_ms.is_some() || call_id.is_some() {
            events.push(Ok(StreamEvent::Done {
                finish_reason: None,
                usage: None,
                cost,
                overhead_ms,
                provider_call_id: call_id,
            }));
        }
    }

    let choice = match choice {
        Some(c) => c,
        None => {
            if let Some(usage) = v.get("usage").and_then(parse_usage) {
                events.push(Ok(StreamEvent::Done {
                    finish_reason: None,
                    usage: Some(usage),
                    cost: None,
                    overhead_ms: None,
                    provider_call_id: None,
                }));
            }
            return events;
        }
    };

    let delta = choice.get("delta").cloned().unwrap_or(Value::Null);

    if let Some(fr) = choice.get("finish_reason").and_then(Value::as_str) {
        let usage = v.get("usage").and_then(parse_usage);
        events.push(Ok(StreamEvent::Done {
            finish_reason: Some(fr.to_string()),
            usage,
            cost: None,
            overhead_ms: None,
            provider_call_id: None,
        }));
        return events;
    }

    if let Some(text) = delta.get("content").and_then(Value::as_str) {
        if !text.is_empty() {
            events.push(Ok(StreamEvent::ContentDelta(text.to_string())));
        }
    }

    if let Some(tc_arr) = delta.get("tool_calls").and_then(Value::as_array) {
        for tc in tc_arr {
            let index = tc.get("index").and_then(Value::as_u64).unwrap_or(0) as usize;
            let id = tc.get("id").and_then(Value::as_str).map(String::from);
            let name = tc
                .get("function")
                .and_then(|f| f.get("name"))
                .and_then(Value::as_str)
                .map(String::from);
            let arguments_delta = tc
                .get("function")
                .and_then(|f| f.get("arguments"))
                .and_then(Value::as_str)
                .map(String::from);
            events.push(Ok(StreamEvent::ToolCallDelta {
                index,
                id,
                name,
                arguments_delta,
            }));
        }
    }

    if let Some(citations) = delta
        .get("provider_specific_fields")
        .and_then(|p| p.get("citations"))
        .and_then(Value::as_array)
    {
        events.push(Ok(StreamEvent::Citations(citations.clone())));
    }
    if let Some(results) = delta
        .get("provider_specific_fields")
        .and_then(|p| p.get("web_search_results"))
        .and_then(Value::as_array)
    {
        events.push(Ok(StreamEvent::WebSearchResults(results.clone())));
    }

    events
}

#[async_trait::async_trait]
impl LlmProvider for OpenAiCompatProvider {
    async fn chat_stream(&self, req: &ChatRequest) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(req);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Provider {
                provider: self.id.clone(),
                message: format!("{status}: {text}"),
            });
        }

        Ok(sse_response_stream(response, parse_chunk))
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_content_delta() {
        let data = serde_json::json!({
            "choices": [{"delta": {"content": "hi"}}]
        })
        .to_string();
        let events = parse_chunk(&data);
        assert!(matches!(&events[0], Ok(StreamEvent::ContentDelta(s)) if s == "hi"));
    }

    #[test]
    fn parses_tool_call_delta_by_index() {
        let data = serde_json::json!({
            "choices": [{"delta": {"tool_calls": [{"index": 0, "id": "call_1", "function": {"name": "Foo", "arguments": "{}"}}]}}]
        })
        .to_string();
        let events = parse_chunk(&data);
        match &events[0] {
            Ok(StreamEvent::ToolCallDelta { index, id, .. }) => {
                assert_eq!(*index, 0);
                assert_eq!(id.as_deref(), Some("call_1"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parses_finish_reason_as_done() {
        let data = serde_json::json!({
            "choices": [{"delta": {}, "finish_reason": "stop"}],
            "usage": {"total_tokens": 5, "prompt_tokens": 3, "completion_tokens": 2}
        })
        .to_string();
        let events = parse_chunk(&data);
        match &events[0] {
            Ok(StreamEvent::Done { finish_reason, usage, .. }) => {
                assert_eq!(finish_reason.as_deref(), Some("stop"));
                assert_eq!(usage.as_ref().unwrap().total_tokens, 5);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn done_sentinel_yields_no_events() {
        assert!(parse_chunk("[DONE]").is_empty());
    }
}
