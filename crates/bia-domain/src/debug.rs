//! Per-LLM-call debug accounting attached to a `TaskDebug` entry.
//!
//! `extra` carries the full request/response payload for a call; it is
//! stripped before the record is persisted in a log diff and returned
//! separately to the caller, keyed by `llm_call_id` (see `bia_llm::debug`).

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmDebug {
    pub model: String,
    pub duration: f64,
    pub total_tokens: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    #[serde(default)]
    pub cost: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens_details: Option<TokenDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens_details: Option<TokenDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_overhead_time_ms: Option<u64>,
    /// Full request/response payload; stripped before persisting a log diff.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<Value>,
}

impl LlmDebug {
    /// Detach `extra`, leaving a lean record fit for persisting in a log
    /// diff. Returns the detached payload so the caller can key it by
    /// `llm_call_id` in the response's `llm_calls` map.
    pub fn take_extra(&mut self) -> Option<Value> {
        self.extra.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_extra_strips_and_returns() {
        let mut dbg = LlmDebug {
            model: "gpt-4o".into(),
            duration: 1.2,
            total_tokens: 10,
            prompt_tokens: 6,
            completion_tokens: 4,
            cost: 0.001,
            completion_tokens_details: None,
            prompt_tokens_details: None,
            finish_reason: Some("stop".into()),
            llm_call_id: Some("call_abc".into()),
            llm_overhead_time_ms: Some(12),
            extra: Some(serde_json::json!({"prompt": "hi"})),
        };
        let extra = dbg.take_extra();
        assert!(extra.is_some());
        assert!(dbg.extra.is_none());
    }
}
