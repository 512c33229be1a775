//! The three fixed sentinel agents that are always registered, plus the
//! registration helper that wires them (and any domain tools) into an
//! [`AgentRegistry`].

use std::sync::Arc;

use async_trait::async_trait;
use bia_domain::agent::{Agent, AgentCtx, AgentSpec, Outcome, ParamSpec, ParamType};
use bia_domain::compressed::ChildBatch;
use bia_domain::error::Result;
use bia_domain::registry::AgentRegistry;
use serde_json::Value;

/// Represents an assistant "chat" message as a task. Executes server-side:
/// its `run()` returns its own arguments wrapped as a result, never
/// suspending.
pub struct TalkToUser {
    args: Value,
}

#[async_trait]
impl Agent for TalkToUser {
    async fn reduce(&mut self, _batches: &[ChildBatch]) {}

    async fn run(&mut self, _ctx: &AgentCtx) -> Result<Outcome> {
        Ok(Outcome::Done(self.args.clone()))
    }
}

pub fn talk_to_user_spec() -> AgentSpec {
    AgentSpec {
        name: "TalkToUser".into(),
        description: "Presents a chat message to the user; completes immediately.".into(),
        params: vec![
            ParamSpec::optional(
                "content_blocks",
                ParamType::Array(Box::new(ParamType::Object)),
                Value::Array(Vec::new()),
                "structured content blocks to show the user",
            ),
            ParamSpec::optional(
                "content",
                ParamType::String,
                Value::String(String::new()),
                "plain-text fallback content",
            ),
            ParamSpec::optional(
                "citations",
                ParamType::Array(Box::new(ParamType::Object)),
                Value::Array(Vec::new()),
                "citations accompanying the message",
            ),
        ],
    }
}

/// A client-side "final answer" tool: like any domain tool, it suspends
/// unconditionally, expecting the client to record that the turn's answer
/// was presented and supply a completion on the next request.
pub struct PresentFinalAnswer;

#[async_trait]
impl Agent for PresentFinalAnswer {
    async fn reduce(&mut self, _batches: &[ChildBatch]) {}

    async fn run(&mut self, ctx: &AgentCtx) -> Result<Outcome> {
        Ok(Outcome::Suspended(vec![ctx.unique_id.clone()]))
    }
}

pub fn present_final_answer_spec() -> AgentSpec {
    AgentSpec {
        name: "PresentFinalAnswer".into(),
        description: "Presents the turn's final answer to the user.".into(),
        params: vec![ParamSpec::required("answer", ParamType::String, "the final answer text")],
    }
}

/// Registers the three fixed sentinel agents. Domain tools are registered
/// separately by whatever process composes the full registry (outside this
/// module's scope).
pub fn register_sentinels(registry: &mut AgentRegistry) {
    registry.register(
        talk_to_user_spec(),
        Arc::new(|args| Ok(Box::new(TalkToUser { args }) as Box<dyn Agent>)),
    );
    registry.register(
        present_final_answer_spec(),
        Arc::new(|_args| Ok(Box::new(PresentFinalAnswer) as Box<dyn Agent>)),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    #[tokio::test]
    async fn talk_to_user_completes_without_suspending() {
        let mut registry = AgentRegistry::new();
        register_sentinels(&mut registry);
        let args = serde_json::json!({"content": "hello"});
        let mut agent = registry.instantiate("TalkToUser", args.clone()).unwrap();
        agent.reduce(&[]).await;
        let ctx = AgentCtx {
            unique_id: "t1".into(),
            dispatcher: test_dispatcher(),
        };
        let outcome = agent.run(&ctx).await.unwrap();
        assert!(matches!(outcome, Outcome::Done(v) if v == args));
    }

    #[tokio::test]
    async fn present_final_answer_always_suspends() {
        let mut registry = AgentRegistry::new();
        register_sentinels(&mut registry);
        let mut agent = registry
            .instantiate("PresentFinalAnswer", serde_json::json!({"answer": "42"}))
            .unwrap();
        agent.reduce(&[]).await;
        let ctx = AgentCtx {
            unique_id: "t2".into(),
            dispatcher: test_dispatcher(),
        };
        let outcome = agent.run(&ctx).await.unwrap();
        assert_eq!(outcome.suspended_ids(), &["t2".to_string()]);
    }

    fn test_dispatcher() -> Arc<dyn bia_domain::agent::Dispatcher> {
        struct NullDispatcher;
        #[async_trait]
        impl bia_domain::agent::Dispatcher for NullDispatcher {
            async fn dispatch(
                &self,
                _parent_id: &str,
                _calls: Vec<bia_domain::agent::AgentCall>,
            ) -> Result<Outcome> {
                unreachable!("not exercised by these tests")
            }
            fn previous_root_tasks(&self) -> Vec<bia_domain::log::Task> {
                Vec::new()
            }
        }
        Arc::new(NullDispatcher)
    }
}
