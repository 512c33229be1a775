//! Builds the response views layered on top of a raw log diff:
//! `pending_tool_calls`, `completed_tool_calls`, and `llm_calls`. These are
//! computed fresh on every response, never persisted to the log.

use std::collections::HashMap;

use bia_domain::log::{LogEntry, Task};
use bia_orchestrator::Orchestrator;
use serde_json::Value;

fn task_by_id<'a>(log: &'a [LogEntry], id: &str) -> Option<&'a Task> {
    log.iter().find_map(|e| match e.as_task() {
        Some(t) if t.unique_id == id => Some(t),
        _ => None,
    })
}

fn result_by_id(log: &[LogEntry], id: &str) -> Option<Value> {
    log.iter().find_map(|e| match e.as_task_result() {
        Some(r) if r.task_unique_id == id => Some(r.result.clone()),
        _ => None,
    })
}

fn function_view(task: &Task) -> Value {
    serde_json::json!({
        "name": task.agent,
        "arguments": serde_json::to_string(&task.args).unwrap_or_default(),
    })
}

/// One pending leaf of the latest root, with its already-completed children
/// (if any) attached as `child_tasks_batch` — a list of batches, one per
/// `run_id`, each a list of `{tool_call_id, agent, args, result}` — work
/// the client dispatched under this tool call while it's still waiting on
/// the leaf itself.
fn pending_tool_call(full_log: &[LogEntry], task: &Task) -> Value {
    let children: Vec<&Task> = full_log
        .iter()
        .filter_map(LogEntry::as_task)
        .filter(|t| t.parent_unique_id.as_deref() == Some(task.unique_id.as_str()))
        .collect();

    let mut function = function_view(task);

    if !children.is_empty() {
        let mut run_order: Vec<String> = Vec::new();
        let mut by_run_id: HashMap<String, Vec<Value>> = HashMap::new();

        for child in &children {
            let Some(result) = result_by_id(full_log, &child.unique_id) else {
                continue;
            };
            let entry = serde_json::json!({
                "tool_call_id": child.unique_id,
                "agent": child.agent,
                "args": child.args,
                "result": result,
            });
            by_run_id.entry(child.run_id.clone()).or_insert_with(|| {
                run_order.push(child.run_id.clone());
                Vec::new()
            }).push(entry);
        }

        let batches: Vec<Value> = run_order
            .into_iter()
            .map(|run_id| Value::Array(by_run_id.remove(&run_id).unwrap_or_default()))
            .collect();
        if !batches.is_empty() {
            function["child_tasks_batch"] = Value::Array(batches);
        }
    }

    serde_json::json!({
        "id": task.unique_id,
        "type": "function",
        "function": function,
    })
}

/// Tasks this response's diff completed, joined against the full log for
/// their declaration (name/args/run_id).
fn completed_tool_calls(full_log: &[LogEntry], diff: &[LogEntry]) -> Vec<Value> {
    diff.iter()
        .filter_map(|e| e.as_task_result())
        .filter_map(|r| {
            let task = task_by_id(full_log, &r.task_unique_id)?;
            Some(serde_json::json!({
                "role": "tool",
                "tool_call_id": task.unique_id,
                "content": r.result,
                "run_id": task.run_id,
                "function": function_view(task),
                "created_at": r.created_at,
            }))
        })
        .collect()
}

/// Strips `extra` out of every `LlmDebug` entry in `diff` in place (so the
/// persisted log diff stays lean) and returns it collected into the
/// `llm_calls` map, keyed by `llm_call_id`.
fn strip_llm_calls(diff: &mut [LogEntry]) -> HashMap<String, Value> {
    let mut out = HashMap::new();
    for entry in diff.iter_mut() {
        if let LogEntry::TaskDebug(debug) = entry {
            for call in debug.llm_debug.iter_mut() {
                let extra = call.take_extra();
                let id = call.llm_call_id.clone().unwrap_or_default();
                out.insert(
                    id,
                    serde_json::json!({
                        "model": call.model,
                        "duration": call.duration,
                        "total_tokens": call.total_tokens,
                        "prompt_tokens": call.prompt_tokens,
                        "completion_tokens": call.completion_tokens,
                        "cost": call.cost,
                        "finish_reason": call.finish_reason,
                        "extra": extra,
                    }),
                );
            }
        }
    }
    out
}

/// Assembles the shared response body for `/chat` and the `done` SSE event:
/// `{logDiff, pending_tool_calls, completed_tool_calls, llm_calls}`.
pub fn build_response(orchestrator: &Orchestrator) -> Value {
    let full_log = orchestrator.full_log();
    let mut diff = orchestrator.log_diff();

    let pending: Vec<Value> = orchestrator
        .pending_leaves_of_latest_root()
        .iter()
        .filter_map(|id| task_by_id(&full_log, id))
        .map(|task| pending_tool_call(&full_log, task))
        .collect();
    let completed = completed_tool_calls(&full_log, &diff);
    let calls = strip_llm_calls(&mut diff);

    serde_json::json!({
        "logDiff": diff,
        "pending_tool_calls": pending,
        "completed_tool_calls": completed,
        "llm_calls": calls,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bia_domain::log::{LogEntry, Task as LogTask, TaskResult};
    use bia_domain::registry::AgentRegistry;
    use chrono::Utc;
    use std::sync::Arc;

    #[test]
    fn empty_log_yields_empty_views() {
        let orchestrator = Orchestrator::new(Vec::new(), Arc::new(AgentRegistry::new()), None);
        let response = build_response(&orchestrator);
        assert_eq!(response["pending_tool_calls"], serde_json::json!([]));
        assert_eq!(response["completed_tool_calls"], serde_json::json!([]));
        assert_eq!(response["llm_calls"], serde_json::json!({}));
    }

    fn task(id: &str, parent: Option<&str>, run_id: &str, agent: &str) -> LogEntry {
        LogEntry::Task(LogTask {
            unique_id: id.into(),
            parent_unique_id: parent.map(String::from),
            previous_unique_id: None,
            run_id: run_id.into(),
            agent: agent.into(),
            args: serde_json::json!({}),
            created_at: Utc::now(),
        })
    }

    fn result(id: &str, value: Value) -> LogEntry {
        LogEntry::TaskResult(TaskResult {
            task_unique_id: id.into(),
            result: value,
            created_at: Utc::now(),
        })
    }

    #[test]
    fn child_tasks_batch_groups_children_by_run_id() {
        let log = vec![
            task("leaf", None, "run-0", "ExecuteSQLQuery"),
            task("c1", Some("leaf"), "run-1", "SearchDBSchema"),
            task("c2", Some("leaf"), "run-1", "EditFile"),
            task("c3", Some("leaf"), "run-2", "Navigate"),
            result("c1", serde_json::json!("schema result")),
            result("c2", serde_json::json!("edit result")),
            result("c3", serde_json::json!("nav result")),
        ];

        let leaf = task_by_id(&log, "leaf").unwrap();
        let value = pending_tool_call(&log, leaf);
        let batches = value["function"]["child_tasks_batch"].as_array().unwrap();

        assert_eq!(batches.len(), 2, "one batch per distinct run_id");
        let batch_sizes: Vec<usize> = batches.iter().map(|b| b.as_array().unwrap().len()).collect();
        assert!(batch_sizes.contains(&2), "run-1's two children share a batch");
        assert!(batch_sizes.contains(&1), "run-2's one child is its own batch");
    }
}
