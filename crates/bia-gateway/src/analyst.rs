//! The Analyst — the one agent that actually drives an LLM. Every other
//! registered agent either completes immediately (`TalkToUser`) or
//! suspends unconditionally (`PresentFinalAnswer`, the domain tools in
//! [`crate::tools`]); this is the loop that calls the model, turns its
//! response into child tool calls, and dispatches them.

use std::sync::Arc;

use async_trait::async_trait;
use bia_domain::agent::{
    tool_schema, Agent, AgentCtx, AgentSpec, Dispatcher, Outcome, ParamSpec, ParamType,
};
use bia_domain::compressed::ChildBatch;
use bia_domain::error::Result;
use bia_domain::message::Message;
use bia_domain::registry::AgentRegistry;
use bia_llm::{llm_request, ChatRequest, LlmProvider, LlmSettings, ToolDefinition};
use bia_orchestrator::thread::tool_calls_to_agent_calls;
use serde_json::Value;

pub fn analyst_spec() -> AgentSpec {
    AgentSpec {
        name: "Analyst".into(),
        description: "Drives the conversation: calls the model and dispatches its tool calls."
            .into(),
        params: vec![ParamSpec::required(
            "goal",
            ParamType::String,
            "the user's request for this turn",
        )],
    }
}

struct Analyst {
    tools: Vec<ToolDefinition>,
    llm: Arc<dyn LlmProvider>,
    model: String,
    max_iterations: u32,
    goal: String,
    batches: Vec<ChildBatch>,
}

fn max_iterations_message() -> Value {
    serde_json::json!({
        "content_blocks": [{
            "type": "text",
            "text": "Maximum tool iterations reached for this turn.",
        }],
    })
}

#[async_trait]
impl Agent for Analyst {
    async fn reduce(&mut self, batches: &[ChildBatch]) {
        self.batches = batches.to_vec();
    }

    async fn run(&mut self, ctx: &AgentCtx) -> Result<Outcome> {
        if self.batches.len() as u32 >= self.max_iterations {
            return Ok(Outcome::Done(max_iterations_message()));
        }

        let mut thread = ctx.dispatcher.previous_conversation_thread();
        thread.push(Message::user(self.goal.clone()));
        thread.extend(ctx.dispatcher.resolve_batches(&self.batches));

        let request = ChatRequest {
            messages: thread,
            settings: LlmSettings {
                model: self.model.clone(),
                ..Default::default()
            },
            tools: self.tools.clone(),
            user_info: None,
        };

        let dispatcher = ctx.dispatcher.clone();
        let on_content = move |delta: &str, stream_id: &str| dispatcher.emit_content(delta, stream_id);
        let (response, debug) = llm_request(self.llm.as_ref(), request, Some(on_content)).await?;
        ctx.dispatcher.record_llm_debug(&ctx.unique_id, debug);

        let calls = tool_calls_to_agent_calls(
            &response.tool_calls,
            &response.content,
            &response.citations,
            &response.content_blocks,
        );

        if calls.is_empty() {
            return Ok(Outcome::Done(serde_json::json!({
                "content_blocks": response.content_blocks,
            })));
        }

        ctx.dispatcher.dispatch(&ctx.unique_id, calls).await
    }
}

/// Register the Analyst, whose tool list is every other declared agent
/// except `TalkToUser` — the model never "calls" that one, it is
/// synthesized from plain assistant text by the Task↔Thread Translator.
pub fn register_analyst(
    registry: &mut AgentRegistry,
    llm: Arc<dyn LlmProvider>,
    model: String,
    max_iterations: u32,
) {
    let tools: Vec<ToolDefinition> = registry
        .specs()
        .filter(|s| s.name != "TalkToUser")
        .map(|spec| {
            let schema = tool_schema(spec);
            ToolDefinition {
                name: spec.name.clone(),
                description: spec.description.clone(),
                parameters: schema["parameters"].clone(),
            }
        })
        .collect();

    registry.register(
        analyst_spec(),
        Arc::new(move |args: Value| {
            let goal = args
                .get("goal")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            Ok(Box::new(Analyst {
                tools: tools.clone(),
                llm: llm.clone(),
                model: model.clone(),
                max_iterations,
                goal,
                batches: Vec::new(),
            }) as Box<dyn Agent>)
        }),
    );
}
