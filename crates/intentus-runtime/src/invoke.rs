use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use intentus_protocol::{
    AgentResponse, ErrorCode, ErrorInfo, IntentEnvelope, RecoveryStrategy,
};

use crate::agent::Agent;

/// Result of one guarded agent invocation.
pub struct AttemptOutcome {
    pub result: Result<AgentResponse, ErrorInfo>,
    pub timed_out: bool,
}

/// The single invocation wrapper: every agent call in the router goes
/// through here.
///
/// - The call runs in its own task so a panicking agent is caught and
///   normalized instead of unwinding through the router.
/// - A deadline watchdog returns TIMEOUT to the caller when `timeout_ms`
///   elapses; the detached task may keep running, its result is dropped.
/// - Structured error responses from the agent pass through unchanged.
pub async fn invoke_with_deadline(
    agent: Arc<dyn Agent>,
    envelope: IntentEnvelope,
    timeout_ms: u64,
) -> AttemptOutcome {
    let agent_name = agent.definition().name.clone();
    let handle = tokio::spawn(async move { agent.handle(&envelope).await });

    match tokio::time::timeout(Duration::from_millis(timeout_ms), handle).await {
        Err(_) => {
            warn!(agent = %agent_name, timeout_ms, "agent invocation exceeded deadline");
            AttemptOutcome {
                result: Err(ErrorInfo::new(
                    ErrorCode::Timeout,
                    format!("agent '{agent_name}' exceeded {timeout_ms}ms deadline"),
                )
                .retryable()
                .with_subtype("timeout_ms")
                .with_recovery(RecoveryStrategy::Fallback)),
                timed_out: true,
            }
        }
        Ok(Err(join_err)) => {
            // Task failure: agent panicked (or was cancelled externally).
            let reason = if join_err.is_panic() {
                "agent panicked"
            } else {
                "agent task was cancelled"
            };
            warn!(agent = %agent_name, reason, "agent invocation failed abnormally");
            AttemptOutcome {
                result: Err(ErrorInfo::new(
                    ErrorCode::InternalAgentError,
                    format!("{reason} in '{agent_name}'"),
                )
                .with_recovery(RecoveryStrategy::Fallback)),
                timed_out: false,
            }
        }
        Ok(Ok(Err(agent_err))) => {
            let mut error = ErrorInfo::new(
                ErrorCode::InternalAgentError,
                format!("agent '{agent_name}' failed: {agent_err}"),
            )
            .with_recovery(RecoveryStrategy::Fallback);
            // The agent's declared retryability threads through to the
            // response and the step.failed WAL payload.
            if agent_err.retryable {
                error = error.retryable();
            }
            AttemptOutcome {
                result: Err(error),
                timed_out: false,
            }
        }
        Ok(Ok(Ok(response))) => {
            if response.is_success() {
                AttemptOutcome {
                    result: Ok(response),
                    timed_out: false,
                }
            } else {
                let error = response.error.clone().unwrap_or_else(|| {
                    ErrorInfo::new(
                        ErrorCode::AgentError,
                        format!("agent '{agent_name}' returned an error without details"),
                    )
                });
                AttemptOutcome {
                    result: Err(error),
                    timed_out: false,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentError;
    use async_trait::async_trait;
    use intentus_protocol::{AgentDefinition, Capability, IntentRef};
    use serde_json::json;

    struct SlowAgent {
        definition: AgentDefinition,
    }

    #[async_trait]
    impl Agent for SlowAgent {
        fn definition(&self) -> &AgentDefinition {
            &self.definition
        }
        async fn handle(&self, _env: &IntentEnvelope) -> Result<AgentResponse, AgentError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(AgentResponse::success(json!(null)))
        }
    }

    struct ErringAgent {
        definition: AgentDefinition,
        retryable: bool,
    }

    #[async_trait]
    impl Agent for ErringAgent {
        fn definition(&self) -> &AgentDefinition {
            &self.definition
        }
        async fn handle(&self, _env: &IntentEnvelope) -> Result<AgentResponse, AgentError> {
            if self.retryable {
                Err(AgentError::retryable("backend briefly unavailable"))
            } else {
                Err(AgentError::new("backend permanently gone"))
            }
        }
    }

    struct PanickyAgent {
        definition: AgentDefinition,
    }

    #[async_trait]
    impl Agent for PanickyAgent {
        fn definition(&self) -> &AgentDefinition {
            &self.definition
        }
        async fn handle(&self, _env: &IntentEnvelope) -> Result<AgentResponse, AgentError> {
            panic!("unexpected agent state");
        }
    }

    fn definition(name: &str) -> AgentDefinition {
        AgentDefinition::new(name).with_capability(Capability::new(IntentRef::new("t", "1.0")))
    }

    fn envelope() -> IntentEnvelope {
        IntentEnvelope::new(IntentRef::new("t", "1.0"), serde_json::Map::new())
    }

    #[tokio::test]
    async fn deadline_returns_timeout_while_agent_still_runs() {
        let agent = Arc::new(SlowAgent {
            definition: definition("Slow"),
        });
        let outcome = invoke_with_deadline(agent, envelope(), 10).await;
        assert!(outcome.timed_out);
        let err = outcome.result.unwrap_err();
        assert_eq!(err.code, ErrorCode::Timeout);
        assert_eq!(err.subtype(), Some("timeout_ms"));
    }

    #[tokio::test]
    async fn agent_error_retryability_threads_through() {
        let agent = Arc::new(ErringAgent {
            definition: definition("Flaky"),
            retryable: true,
        });
        let outcome = invoke_with_deadline(agent, envelope(), 1_000).await;
        let err = outcome.result.unwrap_err();
        assert_eq!(err.code, ErrorCode::InternalAgentError);
        assert!(err.retryable);

        let agent = Arc::new(ErringAgent {
            definition: definition("Broken"),
            retryable: false,
        });
        let outcome = invoke_with_deadline(agent, envelope(), 1_000).await;
        assert!(!outcome.result.unwrap_err().retryable);
    }

    #[tokio::test]
    async fn panic_is_normalized_to_internal_agent_error() {
        let agent = Arc::new(PanickyAgent {
            definition: definition("Panicky"),
        });
        let outcome = invoke_with_deadline(agent, envelope(), 1_000).await;
        assert!(!outcome.timed_out);
        let err = outcome.result.unwrap_err();
        assert_eq!(err.code, ErrorCode::InternalAgentError);
        assert!(!err.retryable);
    }
}
