use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::contract::ExecutionContract;
use crate::PROTOCOL_VERSION;

/// Reference to a versioned intent. Equality is exact on both fields.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IntentRef {
    pub name: String,
    pub version: String,
}

impl IntentRef {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl std::fmt::Display for IntentRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.name, self.version)
    }
}

/// Execution context shared across the steps of a workflow.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentContext {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub workflow_id: String,
    #[serde(default)]
    pub memory: Map<String, Value>,
    #[serde(default)]
    pub history: Vec<Value>,
}

/// Scheduling priority hint carried in envelope metadata.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// Envelope metadata: correlation identifiers and timestamps.
///
/// Everything in here is volatile with respect to idempotency-key
/// derivation; two envelopes that differ only in metadata deduplicate to
/// the same execution.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentMetadata {
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_agent: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    pub trace_id: String,
    pub request_id: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Default for IntentMetadata {
    fn default() -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            source_agent: None,
            priority: Priority::Normal,
            trace_id: uuid::Uuid::new_v4().to_string(),
            request_id: uuid::Uuid::new_v4().to_string(),
            tags: Vec::new(),
        }
    }
}

/// Routing strategy requested by the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoutingStrategy {
    #[default]
    Direct,
    Fallback,
    Broadcast,
    Parallel,
}

impl std::fmt::Display for RoutingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RoutingStrategy::Direct => "DIRECT",
            RoutingStrategy::Fallback => "FALLBACK",
            RoutingStrategy::Broadcast => "BROADCAST",
            RoutingStrategy::Parallel => "PARALLEL",
        };
        f.write_str(s)
    }
}

/// Caller-supplied routing options.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingOptions {
    #[serde(default)]
    pub strategy: RoutingStrategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_agent: Option<String>,
    /// Envelope-level fallback override; takes precedence over the
    /// capability-declared fallback chain.
    #[serde(default)]
    pub fallback_agents: Vec<String>,
}

/// Router-maintained routing trail. Append-only.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingMetadata {
    /// Every agent the router attempted, in attempt order.
    #[serde(default)]
    pub decision_path: Vec<String>,
    #[serde(default)]
    pub retry_count: u32,
}

/// The routable unit of work: an intent plus payload, context, and
/// routing instructions.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentEnvelope {
    pub version: String,
    pub intent: IntentRef,
    #[serde(default)]
    pub payload: Map<String, Value>,
    #[serde(default)]
    pub context: IntentContext,
    #[serde(default)]
    pub metadata: IntentMetadata,
    #[serde(default)]
    pub routing: RoutingOptions,
    #[serde(default)]
    pub routing_metadata: RoutingMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract: Option<ExecutionContract>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl IntentEnvelope {
    pub fn new(intent: IntentRef, payload: Map<String, Value>) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            intent,
            payload,
            context: IntentContext::default(),
            metadata: IntentMetadata::default(),
            routing: RoutingOptions::default(),
            routing_metadata: RoutingMetadata::default(),
            contract: None,
            idempotency_key: None,
        }
    }

    pub fn with_strategy(mut self, strategy: RoutingStrategy) -> Self {
        self.routing.strategy = strategy;
        self
    }

    pub fn with_target(mut self, agent: impl Into<String>) -> Self {
        self.routing.target_agent = Some(agent.into());
        self
    }

    pub fn with_contract(mut self, contract: ExecutionContract) -> Self {
        self.contract = Some(contract);
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_wire_format_uses_camel_case() {
        let mut payload = Map::new();
        payload.insert("a".into(), Value::from(17));
        let env = IntentEnvelope::new(IntentRef::new("sum", "1.0"), payload)
            .with_strategy(RoutingStrategy::Fallback)
            .with_idempotency_key("K1");

        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["routing"]["strategy"], "FALLBACK");
        assert_eq!(json["idempotencyKey"], "K1");
        assert!(json["routingMetadata"]["decisionPath"]
            .as_array()
            .unwrap()
            .is_empty());
        assert!(json["metadata"]["traceId"].is_string());
    }

    #[test]
    fn envelope_roundtrip() {
        let env = IntentEnvelope::new(IntentRef::new("echo", "2.1"), Map::new())
            .with_target("EchoAgent");
        let json = serde_json::to_string(&env).unwrap();
        let restored: IntentEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.intent, env.intent);
        assert_eq!(restored.routing.target_agent.as_deref(), Some("EchoAgent"));
        assert_eq!(restored.routing.strategy, RoutingStrategy::Direct);
    }

    #[test]
    fn minimal_envelope_deserializes_with_defaults() {
        let json = r#"{"version":"1.0","intent":{"name":"sum","version":"1.0"}}"#;
        let env: IntentEnvelope = serde_json::from_str(json).unwrap();
        assert!(env.payload.is_empty());
        assert_eq!(env.routing.strategy, RoutingStrategy::Direct);
        assert!(env.idempotency_key.is_none());
    }

    #[test]
    fn intent_ref_equality_is_exact() {
        assert_eq!(IntentRef::new("sum", "1.0"), IntentRef::new("sum", "1.0"));
        assert_ne!(IntentRef::new("sum", "1.0"), IntentRef::new("sum", "1.1"));
        assert_ne!(IntentRef::new("sum", "1.0"), IntentRef::new("add", "1.0"));
    }
}
