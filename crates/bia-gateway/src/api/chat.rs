//! Conversation HTTP API — `/chat`, `/chat/stream`, `/chat/close`.
//!
//! All three share the same request shape and the same turn-processing
//! steps: find the latest root (and where its diff begins), apply any
//! client-supplied tool completions, then either run a fresh turn or
//! resume the existing one.

use axum::extract::State;
use axum::http::header;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json};
use serde::Deserialize;
use serde_json::Value;

use bia_domain::agent::AgentCall;
use bia_domain::log::ConversationLog;
use bia_orchestrator::{CompletedToolCall, Orchestrator, StreamEvent};

use crate::derived;
use crate::state::AppState;

#[derive(Debug, Deserialize, Clone)]
pub struct CompletedToolCallInput {
    pub tool_call_id: String,
    pub content: String,
}

impl From<CompletedToolCallInput> for CompletedToolCall {
    fn from(v: CompletedToolCallInput) -> Self {
        CompletedToolCall {
            tool_call_id: v.tool_call_id,
            content: v.content,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatInput {
    pub log: ConversationLog,
    #[serde(default)]
    pub user_message: Option<String>,
    #[serde(default)]
    pub completed_tool_calls: Vec<CompletedToolCallInput>,
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default)]
    pub agent_args: Option<Value>,
    #[serde(default)]
    pub session_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CloseInput {
    pub log: ConversationLog,
}

/// Applies completed tool calls, then either runs a fresh turn (if
/// `user_message`/`agent` is present) or resumes the existing one. Returns
/// `None` when there is nothing further to do — pending leaves remain and
/// the caller supplied no new work — mirroring the "short-circuit" rule in
/// the shared processing steps.
async fn drive_turn(orchestrator: &Orchestrator, input: &ChatInput) -> bia_domain::error::Result<()> {
    let completed: Vec<CompletedToolCall> = input
        .completed_tool_calls
        .iter()
        .cloned()
        .map(CompletedToolCall::from)
        .collect();
    orchestrator.apply_completed_tool_calls(&completed);

    let pending = orchestrator.pending_leaves_of_latest_root();
    let has_new_work = input.user_message.is_some() || input.agent.is_some();

    if !pending.is_empty() && !has_new_work {
        return Ok(());
    }

    if has_new_work {
        let agent = input.agent.clone().unwrap_or_else(|| "Analyst".to_string());
        let mut args = input.agent_args.clone().unwrap_or_else(|| serde_json::json!({}));
        if let Some(msg) = &input.user_message {
            if let Some(obj) = args.as_object_mut() {
                obj.entry("goal").or_insert_with(|| Value::String(msg.clone()));
            }
        }
        let previous_id = orchestrator.latest_root_id();
        orchestrator
            .run(vec![AgentCall::new(agent, args)], previous_id)
            .await?;
    } else {
        orchestrator.resume().await?;
    }

    Ok(())
}

pub async fn chat(State(state): State<AppState>, Json(body): Json<ChatInput>) -> impl IntoResponse {
    let orchestrator = Orchestrator::new(body.log.clone(), state.registry.clone(), None);

    if let Err(e) = drive_turn(&orchestrator, &body).await {
        tracing::error!(error = %e, "turn processing failed");
        return Json(serde_json::json!({ "error": e.to_string() })).into_response();
    }

    Json(derived::build_response(&orchestrator)).into_response()
}

/// Runs the turn to completion and builds the final response, all inside
/// one task that owns the only handle to `orchestrator`. The orchestrator
/// holds the SSE sender internally, so the channel only closes — letting
/// the generator's drain loop below terminate — once this task's local
/// `orchestrator` drops at the end of the block.
async fn run_turn_to_completion(
    orchestrator: Orchestrator,
    body: ChatInput,
) -> bia_domain::error::Result<Value> {
    drive_turn(&orchestrator, &body).await?;
    Ok(derived::build_response(&orchestrator))
}

pub async fn chat_stream(
    State(state): State<AppState>,
    Json(body): Json<ChatInput>,
) -> impl IntoResponse {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let orchestrator = Orchestrator::new(body.log.clone(), state.registry.clone(), Some(tx));
    let handle = tokio::spawn(run_turn_to_completion(orchestrator, body));

    let stream = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            yield Ok::<_, std::convert::Infallible>(sse_event(event));
        }
        match handle.await {
            Ok(Ok(done)) => yield Ok(Event::default()
                .event("done")
                .data(serde_json::to_string(&done).unwrap_or_default())),
            Ok(Err(e)) => {
                tracing::error!(error = %e, "turn processing failed");
                yield Ok(error_event(&e.to_string()));
            }
            Err(join_err) => {
                tracing::error!(error = %join_err, "turn processing task panicked");
                yield Ok(error_event(&join_err.to_string()));
            }
        }
    };

    (
        [
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
            (header::HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Sse::new(stream).keep_alive(KeepAlive::default()),
    )
        .into_response()
}

fn sse_event(event: StreamEvent) -> Event {
    let payload = match event {
        StreamEvent::Content { delta, .. } => serde_json::json!({
            "type": "StreamedContent",
            "payload": { "chunk": delta },
        }),
        StreamEvent::ToolCreated(task) => serde_json::json!({
            "type": "ToolCreated",
            "payload": {
                "id": task.unique_id,
                "type": "function",
                "function": { "name": task.agent, "arguments": task.args },
            },
        }),
        StreamEvent::ToolCompleted(task, result) => serde_json::json!({
            "type": "ToolCompleted",
            "payload": {
                "role": "tool",
                "tool_call_id": task.unique_id,
                "content": result,
                "function": { "name": task.agent, "arguments": task.args },
                "created_at": task.created_at,
            },
        }),
    };
    Event::default()
        .event("streaming_event")
        .data(payload.to_string())
}

fn error_event(message: &str) -> Event {
    let correlation_id = bia_domain::ids::new_task_id();
    tracing::error!(correlation_id = %correlation_id, error = %message, "chat turn error");
    let payload = serde_json::json!({
        "type": "error",
        "error": message,
        "error_id": correlation_id,
        "timestamp": chrono::Utc::now(),
    });
    Event::default().event("error").data(payload.to_string())
}

pub async fn chat_close(State(state): State<AppState>, Json(body): Json<CloseInput>) -> impl IntoResponse {
    let orchestrator = Orchestrator::new(body.log, state.registry.clone(), None);
    orchestrator.interrupt_pending_leaves_of_latest_root();
    Json(serde_json::json!({ "logDiff": orchestrator.log_diff() })).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_tool_call_converts_into_orchestrator_type() {
        let input = CompletedToolCallInput {
            tool_call_id: "t1".into(),
            content: "42".into(),
        };
        let completed: CompletedToolCall = input.into();
        assert_eq!(completed.tool_call_id, "t1");
        assert_eq!(completed.content, "42");
    }

    #[tokio::test]
    async fn close_on_empty_log_yields_empty_log_diff() {
        use bia_domain::registry::AgentRegistry;
        use std::sync::Arc;

        let registry = Arc::new(AgentRegistry::new());
        let orchestrator = Orchestrator::new(Vec::new(), registry, None);
        orchestrator.interrupt_pending_leaves_of_latest_root();
        assert!(orchestrator.log_diff().is_empty());
    }
}
