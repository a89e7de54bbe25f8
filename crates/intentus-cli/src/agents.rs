//! Reference agents registered by the CLI runtime.
//!
//! `route` and `estimate` run against in-process agents; this module
//! provides a small loan-processing roster demonstrating fallback pairs,
//! side-effect classes, and failure injection.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use intentus_protocol::{
    AgentDefinition, AgentResponse, Capability, ErrorCode, ErrorInfo, IntentEnvelope, IntentRef,
    RecoveryStrategy, SideEffectClass,
};
use intentus_runtime::{Agent, AgentError, AgentRegistry, RegistryError};

/// Adds two numeric payload fields. The minimal smoke-test agent.
struct ArithmeticAgent {
    definition: AgentDefinition,
}

impl ArithmeticAgent {
    fn new() -> Self {
        Self {
            definition: AgentDefinition::new("arithmetic-agent")
                .with_priority(10)
                .with_capability(Capability::new(IntentRef::new("sum", "1.0"))),
        }
    }
}

#[async_trait]
impl Agent for ArithmeticAgent {
    fn definition(&self) -> &AgentDefinition {
        &self.definition
    }

    async fn handle(&self, envelope: &IntentEnvelope) -> Result<AgentResponse, AgentError> {
        let a = envelope.payload.get("a").and_then(Value::as_f64);
        let b = envelope.payload.get("b").and_then(Value::as_f64);
        match (a, b) {
            (Some(a), Some(b)) => Ok(AgentResponse::success(json!({"sum": a + b}))
                .with_metadata("agent", self.definition.name.clone())),
            _ => Ok(AgentResponse::failure(
                ErrorInfo::new(
                    ErrorCode::AgentError,
                    "payload must contain numeric fields 'a' and 'b'",
                )
                .with_subtype("invalid_payload"),
            )),
        }
    }
}

/// Primary fraud screener. Fails when the payload sets `failPrimary`,
/// which demonstrates the fallback chain to the backup screener.
struct FraudScreenerAgent {
    definition: AgentDefinition,
}

impl FraudScreenerAgent {
    fn new() -> Self {
        Self {
            definition: AgentDefinition::new("fraud-screener")
                .with_priority(10)
                .with_capability(
                    Capability::new(IntentRef::new("loan.fraud.screen", "1.0"))
                        .with_fallbacks(["backup-fraud-screener"]),
                ),
        }
    }
}

#[async_trait]
impl Agent for FraudScreenerAgent {
    fn definition(&self) -> &AgentDefinition {
        &self.definition
    }

    async fn handle(&self, envelope: &IntentEnvelope) -> Result<AgentResponse, AgentError> {
        if envelope
            .payload
            .get("failPrimary")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            return Ok(AgentResponse::failure(
                ErrorInfo::new(ErrorCode::AgentError, "screening backend unavailable")
                    .retryable()
                    .with_recovery(RecoveryStrategy::Fallback),
            ));
        }
        Ok(AgentResponse::success(
            json!({"screened": true, "riskFlags": [], "screener": "primary"}),
        ))
    }
}

/// Backup screener behind the primary, lower preference.
struct BackupFraudScreenerAgent {
    definition: AgentDefinition,
}

impl BackupFraudScreenerAgent {
    fn new() -> Self {
        Self {
            definition: AgentDefinition::new("backup-fraud-screener")
                .with_priority(20)
                .with_capability(Capability::new(IntentRef::new("loan.fraud.screen", "1.0"))),
        }
    }
}

#[async_trait]
impl Agent for BackupFraudScreenerAgent {
    fn definition(&self) -> &AgentDefinition {
        &self.definition
    }

    async fn handle(&self, _envelope: &IntentEnvelope) -> Result<AgentResponse, AgentError> {
        Ok(AgentResponse::success(
            json!({"screened": true, "riskFlags": [], "screener": "backup"}),
        ))
    }
}

/// Scores an application from `amount` and `income`.
struct RiskAssessorAgent {
    definition: AgentDefinition,
}

impl RiskAssessorAgent {
    fn new() -> Self {
        Self {
            definition: AgentDefinition::new("risk-assessor")
                .with_priority(10)
                .with_capability(Capability::new(IntentRef::new("loan.risk.assess", "1.0"))),
        }
    }
}

#[async_trait]
impl Agent for RiskAssessorAgent {
    fn definition(&self) -> &AgentDefinition {
        &self.definition
    }

    async fn handle(&self, envelope: &IntentEnvelope) -> Result<AgentResponse, AgentError> {
        let amount = envelope
            .payload
            .get("amount")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        let income = envelope
            .payload
            .get("income")
            .and_then(Value::as_f64)
            .unwrap_or(1.0);
        let ratio = if income > 0.0 { amount / income } else { f64::MAX };
        let band = if ratio < 0.2 {
            "low"
        } else if ratio < 0.5 {
            "medium"
        } else {
            "high"
        };
        Ok(AgentResponse::success(json!({"riskBand": band, "ratio": ratio})))
    }

    fn estimate_cost(&self, _envelope: &IntentEnvelope) -> f64 {
        5.0
    }
}

/// Books the final credit decision. Irreversible: once started, no
/// fallback and no automatic recovery.
struct CreditDecisionAgent {
    definition: AgentDefinition,
}

impl CreditDecisionAgent {
    fn new() -> Self {
        Self {
            definition: AgentDefinition::new("credit-decision-engine")
                .with_priority(10)
                .with_capability(Capability::new(IntentRef::new("loan.credit.decide", "1.0"))),
        }
    }
}

#[async_trait]
impl Agent for CreditDecisionAgent {
    fn definition(&self) -> &AgentDefinition {
        &self.definition
    }

    async fn handle(&self, envelope: &IntentEnvelope) -> Result<AgentResponse, AgentError> {
        let approved = envelope
            .payload
            .get("riskBand")
            .and_then(Value::as_str)
            .map(|band| band != "high")
            .unwrap_or(false);
        Ok(AgentResponse::success(
            json!({"approved": approved, "booked": true}),
        ))
    }

    fn side_effect(&self) -> SideEffectClass {
        SideEffectClass::Irreversible
    }

    fn estimate_cost(&self, _envelope: &IntentEnvelope) -> f64 {
        25.0
    }
}

/// Build the registry the CLI runtime routes against.
pub fn reference_registry() -> Result<Arc<AgentRegistry>, RegistryError> {
    let registry = Arc::new(AgentRegistry::new());
    registry.register(Arc::new(ArithmeticAgent::new()))?;
    registry.register(Arc::new(FraudScreenerAgent::new()))?;
    registry.register(Arc::new(BackupFraudScreenerAgent::new()))?;
    registry.register(Arc::new(RiskAssessorAgent::new()))?;
    registry.register(Arc::new(CreditDecisionAgent::new()))?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    #[tokio::test]
    async fn arithmetic_agent_sums() {
        let agent = ArithmeticAgent::new();
        let mut payload = Map::new();
        payload.insert("a".into(), Value::from(17));
        payload.insert("b".into(), Value::from(25));
        let envelope = IntentEnvelope::new(IntentRef::new("sum", "1.0"), payload);
        let response = agent.handle(&envelope).await.unwrap();
        assert_eq!(response.payload.unwrap()["sum"], 42.0);
    }

    #[tokio::test]
    async fn primary_screener_fails_on_demand() {
        let agent = FraudScreenerAgent::new();
        let mut payload = Map::new();
        payload.insert("failPrimary".into(), Value::Bool(true));
        let envelope = IntentEnvelope::new(IntentRef::new("loan.fraud.screen", "1.0"), payload);
        let response = agent.handle(&envelope).await.unwrap();
        assert!(!response.is_success());
    }

    #[test]
    fn reference_registry_registers_all_agents() {
        let registry = reference_registry().unwrap();
        assert_eq!(registry.len(), 5);
        assert_eq!(
            registry
                .find_agents_for_intent(&IntentRef::new("loan.fraud.screen", "1.0"))
                .len(),
            2
        );
    }
}
