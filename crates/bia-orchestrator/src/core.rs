//! The Orchestrator — the scheduler that drives the task DAG.
//!
//! Single-request scoped: one instance is built from one conversation log,
//! used for at most one `run`/`resume` call plus whatever recursive
//! `dispatch` calls that triggers, and discarded. There is no cross-request
//! shared mutable orchestrator state; the log itself is the only thing that
//! persists, via whatever the caller does with `log_diff()`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use bia_domain::agent::{
    missing_params_sentinel, normalize_args, Agent, AgentCall, AgentCtx, Dispatcher, Outcome,
    INTERRUPTED,
};
use bia_domain::compressed::Compressed;
use bia_domain::debug::LlmDebug;
use bia_domain::error::{Error, Result};
use bia_domain::ids::new_task_id;
use bia_domain::log::{self, ConversationLog, LogEntry, Task, TaskDebug, TaskResult};
use bia_domain::registry::AgentRegistry;
use chrono::Utc;
use futures_util::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;

/// A client-supplied completion for a pending tool call.
#[derive(Debug, Clone)]
pub struct CompletedToolCall {
    pub tool_call_id: String,
    pub content: String,
}

/// Streaming lifecycle notifications. Emitted on a channel rather than via
/// direct closure calls so the SSE endpoint can own a single consumer that
/// formats events, and so emission never blocks task execution.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    ToolCreated(Task),
    ToolCompleted(Task, Value),
    Content { delta: String, stream_id: String },
}

struct State {
    log: ConversationLog,
    compressed: Compressed,
    /// Tasks that have already had `reduce()+run()` invoked this request —
    /// enforces the single-execution rule across concurrently-advancing
    /// leaves that share an ancestor.
    executed: HashSet<String>,
    /// LLM Bridge calls recorded against a task while it is still running,
    /// flushed into one `TaskDebug` entry when the task settles.
    llm_debug: HashMap<String, Vec<LlmDebug>>,
}

struct Inner {
    registry: Arc<AgentRegistry>,
    events: Option<UnboundedSender<StreamEvent>>,
    state: Mutex<State>,
}

#[derive(Clone)]
pub struct Orchestrator(Arc<Inner>);

impl Orchestrator {
    pub fn new(
        log: ConversationLog,
        registry: Arc<AgentRegistry>,
        events: Option<UnboundedSender<StreamEvent>>,
    ) -> Self {
        let compressed = Compressed::rebuild(&log);
        Self(Arc::new(Inner {
            registry,
            events,
            state: Mutex::new(State {
                log,
                compressed,
                executed: HashSet::new(),
                llm_debug: HashMap::new(),
            }),
        }))
    }

    /// Entries appended since this orchestrator was built from its input
    /// log — exactly the diff this request owns.
    pub fn log_diff(&self) -> Vec<LogEntry> {
        let state = self.0.state.lock();
        let start = state.compressed.log_start_index;
        state.log[start..].to_vec()
    }

    pub fn full_log(&self) -> Vec<LogEntry> {
        self.0.state.lock().log.clone()
    }

    pub fn latest_root_id(&self) -> Option<String> {
        let state = self.0.state.lock();
        log::latest_root(&state.log).map(|(_, t)| t.unique_id)
    }

    pub fn pending_leaves_of_latest_root(&self) -> Vec<String> {
        let state = self.0.state.lock();
        match log::latest_root(&state.log) {
            Some((_, task)) => state.compressed.pending_leaves(&task.unique_id),
            None => Vec::new(),
        }
    }

    /// Apply client-supplied completions: for each whose `tool_call_id`
    /// names a current pending leaf of the latest root, append a
    /// `TaskResult`. Returns how many were applied.
    pub fn apply_completed_tool_calls(&self, completed: &[CompletedToolCall]) -> usize {
        let pending: HashSet<String> = self.pending_leaves_of_latest_root().into_iter().collect();
        let mut state = self.0.state.lock();
        let mut applied = 0;
        for c in completed {
            if !pending.contains(&c.tool_call_id) {
                continue;
            }
            if !state
                .compressed
                .get(&c.tool_call_id)
                .map(|ct| ct.is_pending())
                .unwrap_or(false)
            {
                continue;
            }
            let value = Value::String(c.content.clone());
            state.compressed.set_result(&c.tool_call_id, value.clone());
            state.log.push(LogEntry::TaskResult(TaskResult {
                task_unique_id: c.tool_call_id.clone(),
                result: value,
                created_at: Utc::now(),
            }));
            applied += 1;
        }
        applied
    }

    /// Mark every remaining pending leaf of the latest root as interrupted.
    /// Used by `chat/close`.
    pub fn interrupt_pending_leaves_of_latest_root(&self) -> usize {
        let leaves = self.pending_leaves_of_latest_root();
        let mut state = self.0.state.lock();
        let mut count = 0;
        for id in leaves {
            if !state.compressed.get(&id).map(|ct| ct.is_pending()).unwrap_or(false) {
                continue;
            }
            let value = Value::String(INTERRUPTED.to_string());
            state.compressed.set_result(&id, value.clone());
            state.log.push(LogEntry::TaskResult(TaskResult {
                task_unique_id: id,
                result: value,
                created_at: Utc::now(),
            }));
            count += 1;
        }
        count
    }

    /// Root tasks of prior turns, most-recent-first, walking the
    /// `previous_unique_id` chain backward from the latest root.
    fn previous_root_tasks_locked(&self) -> Vec<Task> {
        let state = self.0.state.lock();
        let mut out = Vec::new();
        let root = match log::latest_root(&state.log) {
            Some((_, t)) => t,
            None => return out,
        };
        let mut prev_id = root.previous_unique_id;
        while let Some(id) = prev_id {
            match state.compressed.get(&id) {
                Some(ct) => {
                    prev_id = ct.task.previous_unique_id.clone();
                    out.push(ct.task.clone());
                }
                None => break,
            }
        }
        out
    }

    fn emit(&self, event: StreamEvent) {
        if let Some(tx) = &self.0.events {
            let _ = tx.send(event);
        }
    }

    /// Generates one shared `run_id` and one task per call, appends all
    /// `Task` entries before any of them begin executing, then advances
    /// each concurrently and aggregates the outcome.
    async fn execute_batch(
        &self,
        parent_id: Option<&str>,
        calls: Vec<AgentCall>,
        previous_id: Option<String>,
    ) -> Result<Outcome> {
        if calls.is_empty() {
            return Ok(Outcome::Done(Value::Array(Vec::new())));
        }

        let run_id = new_task_id();
        let mut tasks = Vec::with_capacity(calls.len());
        let mut errored: Vec<(String, String)> = Vec::new();

        {
            let mut state = self.0.state.lock();
            for call in calls {
                let unique_id = call.unique_id.clone().unwrap_or_else(new_task_id);
                let task = Task {
                    unique_id: unique_id.clone(),
                    parent_unique_id: parent_id.map(String::from),
                    previous_unique_id: if parent_id.is_none() {
                        previous_id.clone()
                    } else {
                        None
                    },
                    run_id: run_id.clone(),
                    agent: call.agent,
                    args: call.args,
                    created_at: Utc::now(),
                };
                state.log.push(LogEntry::Task(task.clone()));
                state.compressed.insert(task.clone());
                if let Some(error) = call.error {
                    errored.push((unique_id, error));
                }
                tasks.push(task);
            }
        }

        for task in &tasks {
            self.emit(StreamEvent::ToolCreated(task.clone()));
        }

        // Invalid-JSON tool calls are recorded as their own result
        // immediately and never reach `advance` — they are never executed.
        for (id, error) in &errored {
            let value = Value::String(error.clone());
            let task = tasks.iter().find(|t| &t.unique_id == id).cloned();
            self.record_result(id, value.clone());
            if let Some(task) = task {
                self.emit(StreamEvent::ToolCompleted(task, value));
            }
        }

        let errored_ids: HashSet<&str> = errored.iter().map(|(id, _)| id.as_str()).collect();
        let outcomes = futures_util::future::join_all(tasks.iter().filter_map(|t| {
            if errored_ids.contains(t.unique_id.as_str()) {
                None
            } else {
                Some(self.advance(t.unique_id.clone()))
            }
        }))
        .await;

        let mut combined = aggregate(outcomes)?;
        if !errored.is_empty() {
            let error_values: Vec<Value> = errored
                .iter()
                .map(|(_, e)| Value::String(e.clone()))
                .collect();
            combined = match combined {
                Outcome::Done(Value::Array(mut values)) => {
                    values.extend(error_values);
                    Outcome::Done(Value::Array(values))
                }
                Outcome::Done(other) => {
                    let mut values = vec![other];
                    values.extend(error_values);
                    Outcome::Done(Value::Array(values))
                }
                suspended => suspended,
            };
        }
        Ok(combined)
    }

    /// Recursively advance task `id`: if it already has a result, return
    /// it; if any child is still pending, it cannot advance; otherwise
    /// instantiate its agent, call `reduce()` then `run()` exactly once
    /// this request, and on completion recurse into its parent (whose
    /// children are now all settled).
    fn advance(&self, id: String) -> BoxFuture<'_, Result<Outcome>> {
        async move {
            if let Some(result) = self.existing_result(&id) {
                return Ok(Outcome::Done(result));
            }
            if self.has_pending_children(&id) {
                return Ok(Outcome::Suspended(vec![id]));
            }
            if !self.try_mark_executed(&id) {
                return Ok(self.current_outcome(&id));
            }

            let outcome = self.run_one(&id).await?;

            if matches!(outcome, Outcome::Done(_)) {
                if let Some(parent_id) = self.parent_of(&id) {
                    if !self.has_pending_children(&parent_id) {
                        return self.advance(parent_id).await;
                    }
                }
            }

            Ok(outcome)
        }
        .boxed()
    }

    /// Normalize args, instantiate the agent, and drive one
    /// `reduce()+run()` cycle. Missing required params short-circuit
    /// before the agent is ever constructed.
    async fn run_one(&self, id: &str) -> Result<Outcome> {
        let (task, child_batches) = {
            let state = self.0.state.lock();
            let ct = state
                .compressed
                .get(id)
                .ok_or_else(|| Error::Other(format!("unknown task {id}")))?;
            (ct.task.clone(), ct.child_batches.clone())
        };

        let spec = self
            .0
            .registry
            .spec(&task.agent)
            .ok_or_else(|| Error::UnknownAgent(task.agent.clone()))?;

        let normalized = match normalize_args(spec, &task.args) {
            Ok(v) => v,
            Err(missing) => {
                let value = Value::String(missing_params_sentinel(&missing));
                self.record_result(&task.unique_id, value.clone());
                self.emit(StreamEvent::ToolCompleted(task, value.clone()));
                return Ok(Outcome::Done(value));
            }
        };

        let mut agent: Box<dyn Agent> = self.0.registry.instantiate(&task.agent, normalized)?;
        agent.reduce(&child_batches).await;
        let ctx = AgentCtx {
            unique_id: task.unique_id.clone(),
            dispatcher: Arc::new(self.clone()) as Arc<dyn Dispatcher>,
        };
        let outcome = agent.run(&ctx).await?;
        self.flush_llm_debug(&task.unique_id);

        if let Outcome::Done(value) = &outcome {
            self.record_result(&task.unique_id, value.clone());
            self.emit(StreamEvent::ToolCompleted(task, value.clone()));
        }

        Ok(outcome)
    }

    /// Top-level creation of one or more root tasks for a turn.
    pub async fn run(&self, calls: Vec<AgentCall>, previous_id: Option<String>) -> Result<Outcome> {
        self.execute_batch(None, calls, previous_id).await
    }

    /// Advance every pending leaf of the latest root as far as it will go.
    pub async fn resume(&self) -> Result<Outcome> {
        let root_id = match self.latest_root_id() {
            Some(id) => id,
            None => return Ok(Outcome::Done(Value::Null)),
        };
        let leaves = {
            let state = self.0.state.lock();
            state.compressed.pending_leaves(&root_id)
        };
        if leaves.is_empty() {
            return Ok(Outcome::Done(Value::Null));
        }
        let outcomes =
            futures_util::future::join_all(leaves.into_iter().map(|id| self.advance(id))).await;
        aggregate(outcomes)
    }

    fn existing_result(&self, id: &str) -> Option<Value> {
        let state = self.0.state.lock();
        state.compressed.get(id).and_then(|ct| ct.result.clone())
    }

    fn has_pending_children(&self, id: &str) -> bool {
        let state = self.0.state.lock();
        let child_ids: Vec<String> = match state.compressed.get(id) {
            Some(ct) => ct.all_child_ids().map(String::from).collect(),
            None => return false,
        };
        child_ids
            .iter()
            .any(|cid| state.compressed.get(cid).map(|c| c.is_pending()).unwrap_or(false))
    }

    fn try_mark_executed(&self, id: &str) -> bool {
        self.0.state.lock().executed.insert(id.to_string())
    }

    fn current_outcome(&self, id: &str) -> Outcome {
        match self.existing_result(id) {
            Some(v) => Outcome::Done(v),
            None => Outcome::Suspended(vec![id.to_string()]),
        }
    }

    fn parent_of(&self, id: &str) -> Option<String> {
        let state = self.0.state.lock();
        state.compressed.get(id).and_then(|ct| ct.task.parent_unique_id.clone())
    }

    fn record_result(&self, id: &str, value: Value) {
        let mut state = self.0.state.lock();
        state.compressed.set_result(id, value.clone());
        state.log.push(LogEntry::TaskResult(TaskResult {
            task_unique_id: id.to_string(),
            result: value,
            created_at: Utc::now(),
        }));
    }

    /// Write one `TaskDebug` entry covering every LLM call recorded against
    /// `id` during this execution, if any.
    fn flush_llm_debug(&self, id: &str) {
        let mut state = self.0.state.lock();
        let calls = match state.llm_debug.remove(id) {
            Some(c) if !c.is_empty() => c,
            _ => return,
        };
        let duration = calls.iter().map(|c| c.duration).sum();
        state.log.push(LogEntry::TaskDebug(TaskDebug {
            task_unique_id: id.to_string(),
            duration,
            llm_debug: calls,
            extra: None,
            created_at: Utc::now(),
        }));
    }
}

fn aggregate(outcomes: Vec<Result<Outcome>>) -> Result<Outcome> {
    let mut suspended = Vec::new();
    let mut done_values = Vec::new();
    for outcome in outcomes {
        match outcome? {
            Outcome::Suspended(ids) => suspended.extend(ids),
            Outcome::Done(value) => done_values.push(value),
        }
    }
    if !suspended.is_empty() {
        Ok(Outcome::Suspended(suspended))
    } else {
        Ok(Outcome::Done(Value::Array(done_values)))
    }
}

#[async_trait]
impl Dispatcher for Orchestrator {
    async fn dispatch(&self, parent_id: &str, calls: Vec<AgentCall>) -> Result<Outcome> {
        self.execute_batch(Some(parent_id), calls, None).await
    }

    fn previous_root_tasks(&self) -> Vec<Task> {
        self.previous_root_tasks_locked()
    }

    fn record_llm_debug(&self, task_id: &str, debug: LlmDebug) {
        self.0
            .state
            .lock()
            .llm_debug
            .entry(task_id.to_string())
            .or_default()
            .push(debug);
    }

    fn resolve_batches(&self, batches: &[bia_domain::compressed::ChildBatch]) -> Vec<bia_domain::message::Message> {
        let state = self.0.state.lock();
        crate::thread::task_batch_to_thread(&state.compressed, batches)
    }

    fn previous_conversation_thread(&self) -> Vec<bia_domain::message::Message> {
        let previous_roots = self.previous_root_tasks_locked();
        let state = self.0.state.lock();
        crate::thread::root_tasks_to_thread(&previous_roots, &state.compressed)
    }

    fn emit_content(&self, delta: &str, stream_id: &str) {
        self.emit(StreamEvent::Content {
            delta: delta.to_string(),
            stream_id: stream_id.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bia_domain::agent::{AgentSpec, ParamSpec, ParamType};
    use bia_domain::compressed::ChildBatch;

    struct MultiToolAgent {
        batches: Vec<ChildBatch>,
    }

    #[async_trait]
    impl Agent for MultiToolAgent {
        async fn reduce(&mut self, batches: &[ChildBatch]) {
            self.batches = batches.to_vec();
        }

        async fn run(&mut self, ctx: &AgentCtx) -> Result<Outcome> {
            if self.batches.is_empty() {
                let calls = vec![
                    AgentCall::new("UserInputTool", Value::Null),
                    AgentCall::new("UserInputTool", Value::Null),
                ];
                ctx.dispatcher.dispatch(&ctx.unique_id, calls).await
            } else {
                Ok(Outcome::Done(Value::String("All tools completed".into())))
            }
        }
    }

    struct UserInputTool;

    #[async_trait]
    impl Agent for UserInputTool {
        async fn reduce(&mut self, _batches: &[ChildBatch]) {}

        async fn run(&mut self, ctx: &AgentCtx) -> Result<Outcome> {
            Ok(Outcome::Suspended(vec![ctx.unique_id.clone()]))
        }
    }

    fn registry() -> Arc<AgentRegistry> {
        let mut r = AgentRegistry::new();
        r.register(
            AgentSpec {
                name: "MultiToolAgent".into(),
                description: "".into(),
                params: vec![ParamSpec::optional("goal", ParamType::String, Value::String(String::new()), "")],
            },
            Arc::new(|_args| Ok(Box::new(MultiToolAgent { batches: Vec::new() }) as Box<dyn Agent>)),
        );
        r.register(
            AgentSpec {
                name: "UserInputTool".into(),
                description: "".into(),
                params: vec![],
            },
            Arc::new(|_args| Ok(Box::new(UserInputTool) as Box<dyn Agent>)),
        );
        Arc::new(r)
    }

    #[tokio::test]
    async fn scenario_1_parallel_tools_in_one_batch() {
        let orch = Orchestrator::new(Vec::new(), registry(), None);
        let outcome = orch
            .run(vec![AgentCall::new("MultiToolAgent", Value::Null)], None)
            .await
            .unwrap();

        let ids = outcome.suspended_ids();
        assert_eq!(ids.len(), 2);

        let diff = orch.log_diff();
        let tasks = diff.iter().filter(|e| e.as_task().is_some()).count();
        let results = diff.iter().filter(|e| e.as_task_result().is_some()).count();
        assert_eq!(tasks, 3);
        assert_eq!(results, 0);
        assert_eq!(orch.pending_leaves_of_latest_root().len(), 2);
    }

    #[tokio::test]
    async fn scenario_2_partial_completion() {
        let orch = Orchestrator::new(Vec::new(), registry(), None);
        orch.run(vec![AgentCall::new("MultiToolAgent", Value::Null)], None)
            .await
            .unwrap();
        let child_ids = orch.pending_leaves_of_latest_root();

        let applied = orch.apply_completed_tool_calls(&[
            CompletedToolCall {
                tool_call_id: child_ids[0].clone(),
                content: "42".into(),
            },
            CompletedToolCall {
                tool_call_id: "not-a-real-id".into(),
                content: "ignored".into(),
            },
        ]);
        assert_eq!(applied, 1);

        let remaining = orch.pending_leaves_of_latest_root();
        assert_eq!(remaining, vec![child_ids[1].clone()]);
    }

    #[tokio::test]
    async fn scenario_3_noop_resume() {
        let orch = Orchestrator::new(Vec::new(), registry(), None);
        orch.run(vec![AgentCall::new("MultiToolAgent", Value::Null)], None)
            .await
            .unwrap();
        let before = orch.pending_leaves_of_latest_root();
        let log_len_before = orch.full_log().len();

        let applied = orch.apply_completed_tool_calls(&[]);
        assert_eq!(applied, 0);
        assert_eq!(orch.full_log().len(), log_len_before);
        assert_eq!(orch.pending_leaves_of_latest_root(), before);
    }

    #[tokio::test]
    async fn scenario_4_finish_the_turn() {
        // Request 1: create the parent + two children.
        let orch1 = Orchestrator::new(Vec::new(), registry(), None);
        orch1
            .run(vec![AgentCall::new("MultiToolAgent", Value::Null)], None)
            .await
            .unwrap();
        let mut log = orch1.full_log();
        let child_ids = orch1.pending_leaves_of_latest_root();

        // Request 2: complete the first child only, no resume (still pending).
        let orch2 = Orchestrator::new(log.clone(), registry(), None);
        orch2.apply_completed_tool_calls(&[CompletedToolCall {
            tool_call_id: child_ids[0].clone(),
            content: "a".into(),
        }]);
        log = orch2.full_log();

        // Request 3: complete the second child, then resume — the parent
        // should now finish.
        let orch3 = Orchestrator::new(log, registry(), None);
        let applied = orch3.apply_completed_tool_calls(&[CompletedToolCall {
            tool_call_id: child_ids[1].clone(),
            content: "b".into(),
        }]);
        assert_eq!(applied, 1);
        assert!(orch3.pending_leaves_of_latest_root().is_empty());

        let outcome = orch3.resume().await.unwrap();
        match outcome {
            Outcome::Done(Value::Array(values)) => {
                assert!(values.iter().any(|v| v == "All tools completed"));
            }
            other => panic!("expected Done, got {other:?}"),
        }

        let diff = orch3.log_diff();
        let results: Vec<&TaskResult> = diff.iter().filter_map(|e| e.as_task_result()).collect();
        // the second child's result plus the parent's final result.
        assert_eq!(results.len(), 2);
        assert!(orch3.pending_leaves_of_latest_root().is_empty());
    }

    #[tokio::test]
    async fn scenario_6_interrupt() {
        let orch1 = Orchestrator::new(Vec::new(), registry(), None);
        orch1
            .run(vec![AgentCall::new("MultiToolAgent", Value::Null)], None)
            .await
            .unwrap();
        let log = orch1.full_log();

        let orch2 = Orchestrator::new(log, registry(), None);
        let leaves_before = orch2.pending_leaves_of_latest_root();
        assert_eq!(leaves_before.len(), 2);

        let count = orch2.interrupt_pending_leaves_of_latest_root();
        assert_eq!(count, 2);

        let diff = orch2.log_diff();
        let results: Vec<&TaskResult> = diff.iter().filter_map(|e| e.as_task_result()).collect();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.result == Value::String(INTERRUPTED.to_string())));
    }

    #[tokio::test]
    async fn missing_required_param_never_instantiates_agent() {
        let mut registry = AgentRegistry::new();
        registry.register(
            AgentSpec {
                name: "NeedsGoal".into(),
                description: "".into(),
                params: vec![ParamSpec::required("goal", ParamType::String, "")],
            },
            Arc::new(|_args| Err(Error::Other("should never be instantiated".into()))),
        );
        let orch = Orchestrator::new(Vec::new(), Arc::new(registry), None);
        let outcome = orch
            .run(vec![AgentCall::new("NeedsGoal", Value::Null)], None)
            .await
            .unwrap();
        match outcome {
            Outcome::Done(Value::Array(values)) => {
                assert_eq!(values.len(), 1);
                assert!(values[0].as_str().unwrap().contains("Required parameters missing"));
            }
            other => panic!("expected Done, got {other:?}"),
        }
    }
}
