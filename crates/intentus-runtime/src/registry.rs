use std::sync::{Arc, RwLock};

use thiserror::Error;
use tracing::debug;

use intentus_protocol::IntentRef;

use crate::agent::Agent;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("agent '{0}' is already registered")]
    DuplicateAgent(String),

    #[error("registry lock poisoned")]
    LockError,
}

/// In-memory agent registry.
///
/// Returns candidates in insertion order; the router re-sorts them into
/// its deterministic total order before any strategy runs.
pub struct AgentRegistry {
    agents: RwLock<Vec<Arc<dyn Agent>>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(Vec::new()),
        }
    }

    pub fn register(&self, agent: Arc<dyn Agent>) -> Result<(), RegistryError> {
        let mut agents = self.agents.write().map_err(|_| RegistryError::LockError)?;
        let name = agent.definition().name.clone();
        if agents.iter().any(|a| a.definition().name == name) {
            return Err(RegistryError::DuplicateAgent(name));
        }
        debug!(agent = %name, "agent registered");
        agents.push(agent);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.agents
            .read()
            .ok()?
            .iter()
            .find(|a| a.definition().name == name)
            .cloned()
    }

    /// Agents whose capability list includes this exact intent reference,
    /// in registration order.
    pub fn find_agents_for_intent(&self, intent: &IntentRef) -> Vec<Arc<dyn Agent>> {
        self.agents
            .read()
            .map(|agents| {
                agents
                    .iter()
                    .filter(|a| a.definition().supports(intent))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn list(&self) -> Vec<String> {
        self.agents
            .read()
            .map(|agents| {
                agents
                    .iter()
                    .map(|a| a.definition().name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.agents.read().map(|a| a.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentError;
    use async_trait::async_trait;
    use intentus_protocol::{AgentDefinition, AgentResponse, Capability, IntentEnvelope};

    struct StubAgent {
        definition: AgentDefinition,
    }

    #[async_trait]
    impl Agent for StubAgent {
        fn definition(&self) -> &AgentDefinition {
            &self.definition
        }

        async fn handle(&self, _envelope: &IntentEnvelope) -> Result<AgentResponse, AgentError> {
            Ok(AgentResponse::success(serde_json::Value::Null))
        }
    }

    fn stub(name: &str, intent: IntentRef) -> Arc<dyn Agent> {
        Arc::new(StubAgent {
            definition: AgentDefinition::new(name).with_capability(Capability::new(intent)),
        })
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let registry = AgentRegistry::new();
        registry
            .register(stub("A", IntentRef::new("sum", "1.0")))
            .unwrap();
        let err = registry
            .register(stub("A", IntentRef::new("other", "1.0")))
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateAgent(_)));
    }

    #[test]
    fn lookup_matches_exact_intent_reference() {
        let registry = AgentRegistry::new();
        registry
            .register(stub("A", IntentRef::new("sum", "1.0")))
            .unwrap();
        registry
            .register(stub("B", IntentRef::new("sum", "2.0")))
            .unwrap();

        let found = registry.find_agents_for_intent(&IntentRef::new("sum", "1.0"));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].definition().name, "A");
        assert!(registry
            .find_agents_for_intent(&IntentRef::new("sum", "3.0"))
            .is_empty());
    }

    #[test]
    fn candidates_come_back_in_insertion_order() {
        let registry = AgentRegistry::new();
        for name in ["C", "A", "B"] {
            registry
                .register(stub(name, IntentRef::new("sum", "1.0")))
                .unwrap();
        }
        let names: Vec<_> = registry
            .find_agents_for_intent(&IntentRef::new("sum", "1.0"))
            .iter()
            .map(|a| a.definition().name.clone())
            .collect();
        assert_eq!(names, vec!["C", "A", "B"]);
    }
}
