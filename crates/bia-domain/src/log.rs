//! Append-only conversation log — the three entry kinds that carry all the
//! state needed to reconstruct a run.
//!
//! Entries round-trip through JSON without loss. Field names on the wire
//! are prefixed (`_type`, `_parent_unique_id`, ...) to distinguish
//! orchestrator-owned bookkeeping from agent-owned `args`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One invocation of an agent or tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub unique_id: String,
    #[serde(rename = "_parent_unique_id")]
    pub parent_unique_id: Option<String>,
    #[serde(rename = "_previous_unique_id")]
    pub previous_unique_id: Option<String>,
    #[serde(rename = "_run_id")]
    pub run_id: String,
    pub agent: String,
    pub args: Value,
    pub created_at: DateTime<Utc>,
}

/// Completion of a task. `result` is opaque to the orchestrator — a string
/// or a mapping, never interpreted here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    #[serde(rename = "_task_unique_id")]
    pub task_unique_id: String,
    pub result: Value,
    pub created_at: DateTime<Utc>,
}

/// Per-task execution metrics, recorded on a best-effort basis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDebug {
    #[serde(rename = "_task_unique_id")]
    pub task_unique_id: String,
    pub duration: f64,
    /// External wire name is camelCase `llmDebug`, unlike the rest of the
    /// log's snake_case/underscore-prefixed fields — kept exactly as the
    /// protocol defines it rather than normalized.
    #[serde(default, rename = "llmDebug")]
    pub llm_debug: Vec<crate::debug::LlmDebug>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<Value>,
    pub created_at: DateTime<Utc>,
}

/// One entry of the append-only log, discriminated by `_type` on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "_type", rename_all = "snake_case")]
pub enum LogEntry {
    Task(Task),
    TaskResult(TaskResult),
    TaskDebug(TaskDebug),
}

impl LogEntry {
    pub fn as_task(&self) -> Option<&Task> {
        match self {
            LogEntry::Task(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_task_result(&self) -> Option<&TaskResult> {
        match self {
            LogEntry::TaskResult(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_task_debug(&self) -> Option<&TaskDebug> {
        match self {
            LogEntry::TaskDebug(d) => Some(d),
            _ => None,
        }
    }
}

/// An ordered sequence of log entries. Plain `Vec<LogEntry>` with a few
/// convenience accessors; the orchestrator never mutates or removes an
/// entry once appended, only pushes new ones.
pub type ConversationLog = Vec<LogEntry>;

/// Find the most recent root task (`parent_unique_id == None`) in the log,
/// scanning from the end. Returns its index in `log` and a clone of the
/// task, or `None` if the log has no root yet.
pub fn latest_root(log: &ConversationLog) -> Option<(usize, Task)> {
    log.iter().enumerate().rev().find_map(|(i, e)| match e {
        LogEntry::Task(t) if t.parent_unique_id.is_none() => Some((i, t.clone())),
        _ => None,
    })
}
