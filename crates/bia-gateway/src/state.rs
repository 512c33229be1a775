//! Shared application state passed to all API handlers.
//!
//! Lean by design: unlike a full product gateway (sessions, memory,
//! skills, schedules, MCP), this state carries only what driving the
//! conversation core actually needs — config, the agent registry, and the
//! LLM provider.

use std::sync::Arc;

use bia_llm::LlmProvider;
use bia_domain::registry::AgentRegistry;

use crate::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<AgentRegistry>,
    pub llm: Arc<dyn LlmProvider>,
}
