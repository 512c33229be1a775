//! Streaming response assembly — the canonical LLM Bridge operation.
//!
//! Consumes a provider's raw event stream and accumulates `content`,
//! `content_blocks`, and `tool_calls` (the last assembled incrementally by
//! stable `index`, growing the backing list with placeholders as needed,
//! matching the streamed-tool-call-fragment state machine the DESIGN NOTES
//! call for). Records one `LlmDebug` entry per call.

use std::time::Instant;

use bia_domain::debug::LlmDebug;
use bia_domain::error::Result;
use bia_domain::ids::new_stream_id;
use bia_domain::message::{ContentBlock, ToolCallStub};
use futures_util::StreamExt;

use crate::traits::{ChatRequest, ChatResponse, LlmProvider, StreamEvent, TokenDetails, Usage};

/// Server-side tool ids carry this prefix and must never reach the
/// orchestrator's `tool_calls` — only as opaque `content_blocks`.
const SERVER_TOOL_ID_PREFIX: &str = "srvtoolu_";

#[derive(Default)]
struct PartialToolCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

fn ensure_slot(calls: &mut Vec<PartialToolCall>, index: usize) {
    while calls.len() <= index {
        calls.push(PartialToolCall::default());
    }
}

/// Drain a provider's stream into a finished response plus its debug
/// record. `on_content` is invoked once per non-empty text delta with
/// `(delta, stream_id)`, mirroring the source's content-streaming callback.
pub async fn llm_request<F>(
    provider: &dyn LlmProvider,
    req: ChatRequest,
    mut on_content: Option<F>,
) -> Result<(ChatResponse, LlmDebug)>
where
    F: FnMut(&str, &str),
{
    let stream_id = new_stream_id();
    let started = Instant::now();
    let model = req.settings.model.clone();

    let mut stream = provider.chat_stream(&req).await?;

    let mut content = String::new();
    let mut tool_calls: Vec<PartialToolCall> = Vec::new();
    let mut citations = Vec::new();
    let mut web_search_results = Vec::new();
    let mut finish_reason = None;
    let mut usage: Option<Usage> = None;
    let mut cost = None;
    let mut overhead_ms = None;
    let mut provider_call_id = None;

    while let Some(event) = stream.next().await {
        match event? {
            StreamEvent::ContentDelta(delta) => {
                if !delta.is_empty() {
                    if let Some(cb) = on_content.as_mut() {
                        cb(&delta, &stream_id);
                    }
                    content.push_str(&delta);
                }
            }
            StreamEvent::ToolCallDelta {
                index,
                id,
                name,
                arguments_delta,
            } => {
                ensure_slot(&mut tool_calls, index);
                let slot = &mut tool_calls[index];
                if let Some(id) = id {
                    slot.id = Some(id);
                }
                if let Some(name) = name {
                    slot.name = Some(name);
                }
                if let Some(delta) = arguments_delta {
                    slot.arguments.push_str(&delta);
                }
            }
            StreamEvent::Citations(mut c) => citations.append(&mut c),
            StreamEvent::WebSearchResults(mut w) => web_search_results.append(&mut w),
            StreamEvent::Done {
                finish_reason: fr,
                usage: u,
                cost: c,
                overhead_ms: o,
                provider_call_id: id,
            } => {
                finish_reason = fr;
                if u.is_some() {
                    usage = u;
                }
                if c.is_some() {
                    cost = c;
                }
                if o.is_some() {
                    overhead_ms = o;
                }
                if id.is_some() {
                    provider_call_id = id;
                }
            }
        }
    }

    let mut content_blocks = Vec::new();
    if !content.is_empty() {
        content_blocks.push(ContentBlock::text(content.clone()));
    }
    for blob in &web_search_results {
        content_blocks.push(ContentBlock::Opaque(blob.clone()));
    }

    let client_tool_calls: Vec<ToolCallStub> = tool_calls
        .into_iter()
        .filter(|tc| {
            tc.id
                .as_deref()
                .map(|id| !id.starts_with(SERVER_TOOL_ID_PREFIX))
                .unwrap_or(true)
        })
        .map(|tc| {
            ToolCallStub::new(
                tc.id.unwrap_or_default(),
                tc.name.unwrap_or_default(),
                tc.arguments,
            )
        })
        .collect();

    let usage = usage.unwrap_or_default();
    let duration = started.elapsed().as_secs_f64();

    let response = ChatResponse {
        content,
        content_blocks,
        tool_calls: client_tool_calls,
        stream_id: stream_id.clone(),
        finish_reason,
        citations,
        web_search_results,
    };

    let extra = serde_json::json!({
        "request": {
            "model": model,
            "messages": serde_json::to_value(&req.messages).unwrap_or_default(),
        },
        "response": {
            "content": response.content,
            "finish_reason": response.finish_reason,
            "tool_calls": serde_json::to_value(&response.tool_calls).unwrap_or_default(),
        },
    });

    let debug = LlmDebug {
        model,
        duration,
        total_tokens: usage.total_tokens,
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
        cost: cost.unwrap_or(usage.cost),
        completion_tokens_details: usage.completion_tokens_details.map(to_domain_details),
        prompt_tokens_details: usage.prompt_tokens_details.map(to_domain_details),
        finish_reason: response.finish_reason.clone(),
        llm_call_id: Some(provider_call_id.unwrap_or(stream_id)),
        llm_overhead_time_ms: overhead_ms,
        extra: Some(extra),
    };

    Ok((response, debug))
}

fn to_domain_details(t: TokenDetails) -> bia_domain::debug::TokenDetails {
    bia_domain::debug::TokenDetails {
        cached_tokens: t.cached_tokens,
        reasoning_tokens: t.reasoning_tokens,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::BoxStream;
    use async_trait::async_trait;

    struct FakeProvider {
        events: Vec<StreamEvent>,
    }

    #[async_trait]
    impl LlmProvider for FakeProvider {
        async fn chat_stream(
            &self,
            _req: &ChatRequest,
        ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
            let events: Vec<Result<StreamEvent>> =
                self.events.clone().into_iter().map(Ok).collect();
            Ok(Box::pin(futures_util::stream::iter(events)))
        }

        fn provider_id(&self) -> &str {
            "fake"
        }
    }

    #[tokio::test]
    async fn assembles_text_and_filters_server_tool_ids() {
        let provider = FakeProvider {
            events: vec![
                StreamEvent::ContentDelta("hello ".into()),
                StreamEvent::ContentDelta("world".into()),
                StreamEvent::ToolCallDelta {
                    index: 0,
                    id: Some("call_abc".into()),
                    name: Some("ExecuteSQLQuery".into()),
                    arguments_delta: Some("{\"sql\":".into()),
                },
                StreamEvent::ToolCallDelta {
                    index: 0,
                    id: None,
                    name: None,
                    arguments_delta: Some("\"select 1\"}".into()),
                },
                StreamEvent::ToolCallDelta {
                    index: 1,
                    id: Some("srvtoolu_web".into()),
                    name: Some("web_search".into()),
                    arguments_delta: Some("{}".into()),
                },
                StreamEvent::Done {
                    finish_reason: Some("tool_calls".into()),
                    usage: Some(Usage {
                        total_tokens: 10,
                        prompt_tokens: 6,
                        completion_tokens: 4,
                        completion_tokens_details: None,
                        prompt_tokens_details: None,
                        cost: 0.002,
                    }),
                    cost: None,
                    overhead_ms: Some(5),
                    provider_call_id: Some("prov-call-1".into()),
                },
            ],
        };

        let req = ChatRequest::default();
        let (response, debug) = llm_request(&provider, req, None::<fn(&str, &str)>)
            .await
            .unwrap();

        assert_eq!(response.content, "hello world");
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].id, "call_abc");
        assert_eq!(response.tool_calls[0].function.arguments, "{\"sql\":\"select 1\"}");
        assert_eq!(debug.total_tokens, 10);
        assert_eq!(debug.llm_call_id.as_deref(), Some("prov-call-1"));
        assert!(debug.extra.is_some());
    }

    #[tokio::test]
    async fn on_content_callback_fires_per_delta() {
        let provider = FakeProvider {
            events: vec![
                StreamEvent::ContentDelta("a".into()),
                StreamEvent::ContentDelta("b".into()),
                StreamEvent::Done {
                    finish_reason: Some("stop".into()),
                    usage: None,
                    cost: None,
                    overhead_ms: None,
                    provider_call_id: None,
                },
            ],
        };
        let mut received = Vec::new();
        let (_, _) = llm_request(
            &provider,
            ChatRequest::default(),
            Some(|delta: &str, _id: &str| received.push(delta.to_string())),
        )
        .await
        .unwrap();
        assert_eq!(received, vec!["a".to_string(), "b".to_string()]);
    }
}
