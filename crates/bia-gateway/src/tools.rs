//! Domain tool stand-ins. Their semantics (what `ExecuteSQLQuery` actually
//! does against a warehouse, what `EditFile` touches on disk) are out of
//! scope here — the orchestrator only ever sees their name, declared args,
//! and opaque result. Each one is a pure `Tool`: `reduce` is a no-op,
//! `run` suspends unconditionally so the client executes the real work.

use std::sync::Arc;

use async_trait::async_trait;
use bia_domain::agent::{Agent, AgentCtx, AgentSpec, Outcome, ParamSpec, ParamType};
use bia_domain::compressed::ChildBatch;
use bia_domain::error::Result;
use bia_domain::registry::AgentRegistry;
use serde_json::Value;

struct SuspendingTool;

#[async_trait]
impl Agent for SuspendingTool {
    async fn reduce(&mut self, _batches: &[ChildBatch]) {}

    async fn run(&mut self, ctx: &AgentCtx) -> Result<Outcome> {
        Ok(Outcome::Suspended(vec![ctx.unique_id.clone()]))
    }
}

fn register_tool(registry: &mut AgentRegistry, spec: AgentSpec) {
    registry.register(spec, Arc::new(|_args| Ok(Box::new(SuspendingTool) as Box<dyn Agent>)));
}

/// Register the domain tools an analyst-style turn can dispatch.
pub fn register_domain_tools(registry: &mut AgentRegistry) {
    register_tool(
        registry,
        AgentSpec {
            name: "ExecuteSQLQuery".into(),
            description: "Runs a SQL query against the connected warehouse and returns its rows."
                .into(),
            params: vec![
                ParamSpec::required("sql", ParamType::String, "the query to run"),
                ParamSpec::optional(
                    "connection_name",
                    ParamType::String,
                    Value::String("default".into()),
                    "which configured connection to run against",
                ),
            ],
        },
    );

    register_tool(
        registry,
        AgentSpec {
            name: "SearchDBSchema".into(),
            description: "Searches table/column names and descriptions in the connected schema."
                .into(),
            params: vec![ParamSpec::required(
                "query",
                ParamType::String,
                "free-text search term",
            )],
        },
    );

    register_tool(
        registry,
        AgentSpec {
            name: "EditFile".into(),
            description: "Applies an edit to a file in the client's workspace.".into(),
            params: vec![
                ParamSpec::required("path", ParamType::String, "file to edit"),
                ParamSpec::required("contents", ParamType::String, "new file contents"),
            ],
        },
    );

    register_tool(
        registry,
        AgentSpec {
            name: "Navigate".into(),
            description: "Directs the client UI to a specific page or view.".into(),
            params: vec![ParamSpec::required(
                "destination",
                ParamType::String,
                "the view to navigate to",
            )],
        },
    );
}
