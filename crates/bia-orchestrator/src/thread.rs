//! Task↔Thread Translator — converts between the task DAG and the linear
//! chat history an LLM-driven agent presents as its message thread.

use bia_domain::agent::AgentCall;
use bia_domain::compressed::{ChildBatch, Compressed};
use bia_domain::log::Task;
use bia_domain::message::{ContentBlock, Message, ToolCallStub};
use serde_json::Value;

const TALK_TO_USER: &str = "TalkToUser";
/// Server-side web search results already ride along in the assistant
/// message's `content_blocks`; replaying them as a second tool call/result
/// pair would duplicate them in the thread.
const WEB_SEARCH: &str = "web_search";

/// Convert one LLM response's tool calls (plus any accompanying text) into
/// the list of child calls to dispatch. A non-empty `content_blocks` or
/// `content` is represented first as a `TalkToUser` call so the assistant's
/// words become a task alongside its tool calls.
pub fn tool_calls_to_agent_calls(
    tool_calls: &[ToolCallStub],
    content: &str,
    citations: &[Value],
    content_blocks: &[ContentBlock],
) -> Vec<AgentCall> {
    let mut calls = Vec::new();

    if !content_blocks.is_empty() {
        calls.push(AgentCall::new(
            TALK_TO_USER,
            serde_json::json!({ "content_blocks": content_blocks }),
        ));
    } else if !content.is_empty() {
        calls.push(AgentCall::new(
            TALK_TO_USER,
            serde_json::json!({
                "content_blocks": [{"type": "text", "text": content}],
                "citations": citations,
            }),
        ));
    }

    for tc in tool_calls {
        match serde_json::from_str::<Value>(&tc.function.arguments) {
            Ok(args) => {
                calls.push(AgentCall::new(tc.function.name.clone(), args).with_id(tc.id.clone()));
            }
            Err(_) => {
                calls.push(
                    AgentCall::new(
                        tc.function.name.clone(),
                        serde_json::json!({ "_original_args": tc.function.arguments }),
                    )
                    .with_id(tc.id.clone())
                    .with_error("Invalid JSON in arguments"),
                );
            }
        }
    }

    calls
}

/// One resolved child: the task plus whatever result it has settled on (if
/// any). A batch with any unresolved child stops the walk in
/// [`task_batch_to_thread`].
struct ResolvedChild {
    task: Task,
    result: Option<Value>,
}

/// Convert completed batches of a task's children into a thread: one
/// assistant message per batch (content merged from `TalkToUser` children,
/// `tool_calls` from the rest) followed by one `tool` message per completed
/// non-`TalkToUser` child. Stops at the first batch containing a pending
/// child, so the LLM sees open tool calls with no synthesized response.
pub fn task_batch_to_thread(compressed: &Compressed, batches: &[ChildBatch]) -> Vec<Message> {
    let mut messages = Vec::new();

    for batch in batches {
        let children: Vec<ResolvedChild> = batch
            .child_unique_ids
            .iter()
            .filter_map(|id| {
                let ct = compressed.get(id)?;
                Some(ResolvedChild {
                    task: ct.task.clone(),
                    result: ct.result.clone(),
                })
            })
            .collect();

        if children.iter().any(|c| c.result.is_none()) {
            break;
        }

        let mut content_blocks: Vec<ContentBlock> = Vec::new();
        let mut tool_calls: Vec<ToolCallStub> = Vec::new();
        let mut tool_messages: Vec<Message> = Vec::new();

        for child in &children {
            let result = child.result.clone().unwrap_or(Value::Null);
            if child.task.agent == TALK_TO_USER {
                if let Some(blocks) = result.get("content_blocks").and_then(Value::as_array) {
                    for b in blocks {
                        if let Ok(block) = serde_json::from_value::<ContentBlock>(b.clone()) {
                            content_blocks.push(block);
                        }
                    }
                }
            } else if child.task.agent == WEB_SEARCH {
                // represented only via the assistant's content_blocks
            } else {
                let arguments = serde_json::to_string(&child.task.args).unwrap_or_default();
                tool_calls.push(ToolCallStub::new(
                    child.task.unique_id.clone(),
                    child.task.agent.clone(),
                    arguments,
                ));
                let content = match &result {
                    Value::String(s) => s.clone(),
                    other => serde_json::to_string(other).unwrap_or_default(),
                };
                tool_messages.push(Message::tool_result(child.task.unique_id.clone(), content));
            }
        }

        if !content_blocks.is_empty() || !tool_calls.is_empty() {
            messages.push(Message {
                role: bia_domain::message::Role::Assistant,
                content: None,
                content_blocks: if content_blocks.is_empty() { None } else { Some(content_blocks) },
                tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
                tool_call_id: None,
            });
        }
        messages.extend(tool_messages);
    }

    messages
}

/// Walk previous roots (via `previous_unique_id`, already resolved by the
/// orchestrator's [`bia_domain::agent::Dispatcher::previous_root_tasks`])
/// into a thread of prior turns, oldest first.
pub fn root_tasks_to_thread(previous_roots: &[Task], compressed: &Compressed) -> Vec<Message> {
    let mut messages = Vec::new();
    for root in previous_roots.iter().rev() {
        if let Some(goal) = root.args.get("goal").and_then(Value::as_str) {
            messages.push(Message::user(goal));
        }
        let batches: Vec<ChildBatch> = compressed
            .get(&root.unique_id)
            .map(|ct| ct.child_batches.clone())
            .unwrap_or_default();
        messages.extend(task_batch_to_thread(compressed, &batches));
    }
    messages
}
