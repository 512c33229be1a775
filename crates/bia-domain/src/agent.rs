//! Agent/Tool trait model and the argument schema shared between
//! invocation-time validation and LLM tool-schema generation.
//!
//! Replaces the source's decorator-based registration and
//! constructor-signature introspection (see the DESIGN NOTES: "global
//! registration via decorators", "duck-typed args dicts") with explicit
//! values: a factory closure plus a declared `AgentSpec`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::compressed::ChildBatch;
use crate::error::Result;
use crate::log::Task;

/// JSON-schema-ish type tag for one declared parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array(Box<ParamType>),
    Object,
    Enum(Vec<String>),
}

/// One declared constructor parameter. Used both to validate/fill-default
/// supplied args (`normalize_args`) and to generate the JSON-schema
/// function descriptor handed to the LLM.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: String,
    pub type_tag: ParamType,
    pub required: bool,
    pub default: Option<Value>,
    pub description: String,
}

impl ParamSpec {
    pub fn required(name: impl Into<String>, type_tag: ParamType, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_tag,
            required: true,
            default: None,
            description: description.into(),
        }
    }

    pub fn optional(
        name: impl Into<String>,
        type_tag: ParamType,
        default: Value,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            type_tag,
            required: false,
            default: Some(default),
            description: description.into(),
        }
    }
}

/// The declared shape of an agent: its registered name and parameter list.
/// Reserved constructor args (`_unique_id`, `orchestrator`) are supplied by
/// the framework and never appear here.
#[derive(Clone)]
pub struct AgentSpec {
    pub name: String,
    pub description: String,
    pub params: Vec<ParamSpec>,
}

/// Result of advancing an agent one step.
///
/// Replaces the source's `UserInputException` control-flow signal: instead
/// of an exception unwinding the call stack, `run`/`dispatch` return a
/// value the caller inspects. `Suspended` carries every leaf task id still
/// awaiting a client-supplied completion beneath this call — a dispatch
/// that fans out to several tools which all suspend immediately collects
/// all of their ids here, mirroring the aggregated `UserInput(ids[])`
/// signal the source raises after a batch settles.
#[derive(Debug, Clone)]
pub enum Outcome {
    Done(Value),
    Suspended(Vec<String>),
}

impl Outcome {
    pub fn suspended_ids(&self) -> &[String] {
        match self {
            Outcome::Suspended(ids) => ids,
            Outcome::Done(_) => &[],
        }
    }
}

/// One agent call: a name plus args, optionally with a caller-supplied id.
///
/// `error` is set by the Task↔Thread Translator when a tool call's raw
/// argument string fails to parse as JSON — the orchestrator records it as
/// the task's result immediately and never instantiates the agent.
#[derive(Debug, Clone)]
pub struct AgentCall {
    pub agent: String,
    pub args: Value,
    pub unique_id: Option<String>,
    pub error: Option<String>,
}

impl AgentCall {
    pub fn new(agent: impl Into<String>, args: Value) -> Self {
        Self {
            agent: agent.into(),
            args,
            unique_id: None,
            error: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.unique_id = Some(id.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Handle an agent's `run()` uses to dispatch child calls and to read
/// cross-turn history. Implemented by the orchestrator; kept as a trait
/// here so `bia-domain` stays free of scheduling logic.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, parent_id: &str, calls: Vec<AgentCall>) -> Result<Outcome>;

    /// Root tasks of prior turns in this conversation, most-recent-first.
    fn previous_root_tasks(&self) -> Vec<Task>;

    /// Accumulate one LLM Bridge call's debug record against `task_id`.
    /// Flushed into a single `TaskDebug` log entry when the task settles.
    /// No-op by default so dispatchers in tests that never call the LLM
    /// bridge don't need to implement it.
    fn record_llm_debug(&self, _task_id: &str, _debug: crate::debug::LlmDebug) {}

    /// Resolve this turn's prior batches (as handed to `reduce()`) into the
    /// linear message thread an LLM-driven agent presents to a provider.
    /// Empty by default; the orchestrator is the only implementor that can
    /// see the compressed task DAG needed to answer this.
    fn resolve_batches(&self, _batches: &[ChildBatch]) -> Vec<crate::message::Message> {
        Vec::new()
    }

    /// The thread of prior turns in this conversation, oldest first. Empty
    /// by default, same rationale as [`Dispatcher::resolve_batches`].
    fn previous_conversation_thread(&self) -> Vec<crate::message::Message> {
        Vec::new()
    }

    /// Forward one streamed content delta to whatever is watching this
    /// turn's SSE channel. No-op by default.
    fn emit_content(&self, _delta: &str, _stream_id: &str) {}
}

/// Per-task context supplied to a freshly-instantiated agent.
#[derive(Clone)]
pub struct AgentCtx {
    pub unique_id: String,
    pub dispatcher: Arc<dyn Dispatcher>,
}

/// A registered unit of execution. `reduce` must be idempotent: it is
/// invoked with the full current batch list every time the task is
/// resumed, not just once.
#[async_trait]
pub trait Agent: Send {
    async fn reduce(&mut self, child_batches: &[ChildBatch]);
    async fn run(&mut self, ctx: &AgentCtx) -> Result<Outcome>;
}

pub type AgentFactory =
    Arc<dyn Fn(Value) -> Result<Box<dyn Agent>> + Send + Sync>;

/// Build the normalized args map for an agent invocation: fill defaults for
/// missing optional params, pass through unknown keys (forward
/// compatibility with client-driven tools), and report every required
/// param that is still missing.
pub fn normalize_args(spec: &AgentSpec, supplied: &Value) -> std::result::Result<Value, Vec<String>> {
    let supplied_map = supplied.as_object().cloned().unwrap_or_default();
    let mut normalized = serde_json::Map::new();
    let mut missing = Vec::new();

    for p in &spec.params {
        match supplied_map.get(&p.name) {
            Some(v) => {
                normalized.insert(p.name.clone(), v.clone());
            }
            None => match &p.default {
                Some(d) => {
                    normalized.insert(p.name.clone(), d.clone());
                }
                None if p.required => missing.push(p.name.clone()),
                None => {}
            },
        }
    }

    for (k, v) in supplied_map {
        normalized.entry(k).or_insert(v);
    }

    if missing.is_empty() {
        Ok(Value::Object(normalized))
    } else {
        Err(missing)
    }
}

fn param_type_schema(t: &ParamType) -> Value {
    match t {
        ParamType::String => serde_json::json!({"type": "string"}),
        ParamType::Integer => serde_json::json!({"type": "integer"}),
        ParamType::Number => serde_json::json!({"type": "number"}),
        ParamType::Boolean => serde_json::json!({"type": "boolean"}),
        ParamType::Object => serde_json::json!({"type": "object"}),
        ParamType::Array(inner) => serde_json::json!({
            "type": "array",
            "items": param_type_schema(inner),
        }),
        ParamType::Enum(values) => serde_json::json!({
            "type": "string",
            "enum": values,
        }),
    }
}

/// Convert a declared agent spec into the `{name, description,
/// parameters:{type, properties, required}}` function descriptor an LLM
/// provider expects, by introspecting the registered constructor metadata.
pub fn tool_schema(spec: &AgentSpec) -> Value {
    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();
    for p in &spec.params {
        let mut prop = param_type_schema(&p.type_tag);
        prop["description"] = Value::String(p.description.clone());
        properties.insert(p.name.clone(), prop);
        if p.required {
            required.push(Value::String(p.name.clone()));
        }
    }
    serde_json::json!({
        "name": spec.name,
        "description": spec.description,
        "parameters": {
            "type": "object",
            "properties": Value::Object(properties),
            "required": required,
        }
    })
}

/// The sentinel result recorded as a task's `TaskResult` when required
/// params are missing — the LLM sees this string and may retry.
pub fn missing_params_sentinel(missing: &[String]) -> String {
    format!("<ERROR>Required parameters missing: {}</ERROR>", missing.join(", "))
}

/// `result == "<Interrupted />"`, the sentinel `chat/close` writes for
/// every pending leaf of the latest root. A normal completion value, not
/// an error.
pub const INTERRUPTED: &str = "<Interrupted />";

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> AgentSpec {
        AgentSpec {
            name: "Example".into(),
            description: "".into(),
            params: vec![
                ParamSpec::required("goal", ParamType::String, "the task"),
                ParamSpec::optional("limit", ParamType::Integer, Value::from(10), "max items"),
            ],
        }
    }

    #[test]
    fn fills_defaults_for_missing_optionals() {
        let args = serde_json::json!({"goal": "do it"});
        let normalized = normalize_args(&spec(), &args).unwrap();
        assert_eq!(normalized["limit"], 10);
        assert_eq!(normalized["goal"], "do it");
    }

    #[test]
    fn reports_missing_required() {
        let args = serde_json::json!({});
        let err = normalize_args(&spec(), &args).unwrap_err();
        assert_eq!(err, vec!["goal".to_string()]);
    }

    #[test]
    fn sentinel_text_matches_protocol_shape() {
        let text = missing_params_sentinel(&["goal".to_string(), "limit".to_string()]);
        assert_eq!(text, "<ERROR>Required parameters missing: goal, limit</ERROR>");
    }

    #[test]
    fn tool_schema_marks_required_params() {
        let schema = tool_schema(&spec());
        assert_eq!(schema["name"], "Example");
        assert_eq!(schema["parameters"]["required"], serde_json::json!(["goal"]));
        assert_eq!(schema["parameters"]["properties"]["limit"]["type"], "integer");
    }

    #[test]
    fn unknown_keys_pass_through() {
        let args = serde_json::json!({"goal": "x", "extra_client_field": 1});
        let normalized = normalize_args(&spec(), &args).unwrap();
        assert_eq!(normalized["extra_client_field"], 1);
    }
}
