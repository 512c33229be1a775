//! Agent Registry — a name→factory table populated at process start.
//!
//! Replaces the source's `@register_agent` decorator with explicit
//! registration, per the DESIGN NOTES ("global registration via
//! decorators: replace with an explicit `register(name, factory)` table").

use std::collections::HashMap;

use serde_json::Value;

use crate::agent::{Agent, AgentFactory, AgentSpec};
use crate::error::{Error, Result};

struct Entry {
    spec: AgentSpec,
    factory: AgentFactory,
}

#[derive(Default)]
pub struct AgentRegistry {
    entries: HashMap<String, Entry>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, spec: AgentSpec, factory: AgentFactory) {
        self.entries.insert(spec.name.clone(), Entry { spec, factory });
    }

    pub fn spec(&self, name: &str) -> Option<&AgentSpec> {
        self.entries.get(name).map(|e| &e.spec)
    }

    pub fn specs(&self) -> impl Iterator<Item = &AgentSpec> {
        self.entries.values().map(|e| &e.spec)
    }

    pub fn instantiate(&self, name: &str, normalized_args: Value) -> Result<Box<dyn Agent>> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| Error::UnknownAgent(name.to_string()))?;
        (entry.factory)(normalized_args)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentCtx, Outcome, ParamType};
    use crate::compressed::ChildBatch;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct Noop;

    #[async_trait]
    impl Agent for Noop {
        async fn reduce(&mut self, _batches: &[ChildBatch]) {}
        async fn run(&mut self, _ctx: &AgentCtx) -> Result<Outcome> {
            Ok(Outcome::Done(Value::String("ok".into())))
        }
    }

    #[test]
    fn register_and_instantiate() {
        let mut registry = AgentRegistry::new();
        registry.register(
            AgentSpec {
                name: "Noop".into(),
                description: "does nothing".into(),
                params: vec![],
            },
            Arc::new(|_args| Ok(Box::new(Noop) as Box<dyn Agent>)),
        );
        assert!(registry.contains("Noop"));
        assert!(registry.instantiate("Noop", Value::Null).is_ok());
        assert!(registry.instantiate("Missing", Value::Null).is_err());
        let _ = ParamType::String;
    }
}
