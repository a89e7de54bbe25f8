use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::intent::IntentRef;

/// A declared ability of an agent to handle one intent reference.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capability {
    pub intent: IntentRef,
    #[serde(default)]
    pub input_schema: Value,
    #[serde(default)]
    pub output_schema: Value,
    /// Ordered fallback chain tried after this agent fails.
    #[serde(default)]
    pub fallback_agents: Vec<String>,
}

impl Capability {
    pub fn new(intent: IntentRef) -> Self {
        Self {
            intent,
            input_schema: Value::Null,
            output_schema: Value::Null,
            fallback_agents: Vec::new(),
        }
    }

    pub fn with_fallbacks<I, S>(mut self, agents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fallback_agents = agents.into_iter().map(Into::into).collect();
        self
    }
}

/// Registered identity of an agent plus its capability list.
///
/// `node_id` and `node_priority` participate in the router's deterministic
/// candidate ordering: agents without a node come first, then lower
/// priority, then lexicographic name.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default)]
    pub node_priority: i64,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
}

impl AgentDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            node_id: None,
            node_priority: 0,
            capabilities: Vec::new(),
        }
    }

    pub fn on_node(mut self, node_id: impl Into<String>, priority: i64) -> Self {
        self.node_id = Some(node_id.into());
        self.node_priority = priority;
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.node_priority = priority;
        self
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.push(capability);
        self
    }

    /// The capability matching an intent reference, if declared.
    pub fn capability_for(&self, intent: &IntentRef) -> Option<&Capability> {
        self.capabilities.iter().find(|c| &c.intent == intent)
    }

    pub fn supports(&self, intent: &IntentRef) -> bool {
        self.capability_for(intent).is_some()
    }
}
