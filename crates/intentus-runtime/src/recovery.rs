use std::sync::Arc;

use tracing::{info, warn};

use intentus_crypto::WalSigner;
use intentus_store::{RecoveryAnalysis, RecoveryDecision, StoreLayout};
use intentus_wal::WalWriter;

use crate::error::RouterError;
use crate::registry::AgentRegistry;

/// Outcome of a resume attempt.
#[derive(Clone, Debug)]
pub enum RecoveryOutcome {
    /// The in-flight step was cleared (compensated when reversible) and
    /// the execution closed; the intent can be resubmitted.
    Resumed {
        execution_id: String,
        compensated_step: Option<String>,
    },
    /// Operator intervention remains required.
    Blocked {
        execution_id: String,
        reason: String,
    },
}

/// Drives recovery decisions that need agent participation.
///
/// The scan itself is read-only (`intentus_store::RecoveryManager`); this
/// coordinator performs the writes: recovery markers in the WAL and the
/// compensation hook for reversible in-flight steps. An irreversible step
/// whose completion is not recorded is never re-executed here or anywhere
/// else.
pub struct RecoveryCoordinator {
    registry: Arc<AgentRegistry>,
    layout: StoreLayout,
    signer: Option<Arc<WalSigner>>,
}

impl RecoveryCoordinator {
    pub fn new(
        registry: Arc<AgentRegistry>,
        layout: StoreLayout,
        signer: Option<Arc<WalSigner>>,
    ) -> Self {
        Self {
            registry,
            layout,
            signer,
        }
    }

    /// Act on a recovery analysis.
    ///
    /// RESUME clears the in-flight step, compensating through the
    /// agent's declared hook when the step is reversible, then closes
    /// the execution so a fresh submission can re-run the intent.
    /// A missing or failing compensation hook blocks instead.
    pub async fn resume(&self, analysis: &RecoveryAnalysis) -> Result<RecoveryOutcome, RouterError> {
        let execution_id = analysis.execution_id.clone();
        let mut wal =
            WalWriter::open_existing(&self.layout.wal_dir(), &execution_id, self.signer.clone())?;

        if analysis.decision == RecoveryDecision::Block {
            wal.recovery_started("blocked", &analysis.reason)?;
            warn!(
                execution_id = %execution_id,
                reason = %analysis.reason,
                "recovery blocked, operator action required"
            );
            return Ok(RecoveryOutcome::Blocked {
                execution_id,
                reason: analysis.reason.clone(),
            });
        }

        wal.recovery_started("resuming", &analysis.reason)?;
        let mut compensated_step = None;

        if let Some(step_id) = &analysis.pending_step_id {
            let reversible = analysis.pending_side_effect.as_deref() == Some("reversible");
            if reversible {
                let agent_name = analysis.pending_agent.clone().unwrap_or_default();
                let Some(agent) = self.registry.get(&agent_name) else {
                    wal.recovery_completed("blocked")?;
                    return Ok(RecoveryOutcome::Blocked {
                        execution_id,
                        reason: format!("compensation agent '{agent_name}' is not registered"),
                    });
                };
                if !agent.supports_compensation() {
                    wal.recovery_completed("blocked")?;
                    return Ok(RecoveryOutcome::Blocked {
                        execution_id,
                        reason: format!("agent '{agent_name}' declares no compensation hook"),
                    });
                }
                if let Err(e) = agent.compensate(step_id).await {
                    wal.recovery_completed("blocked")?;
                    return Ok(RecoveryOutcome::Blocked {
                        execution_id,
                        reason: format!("compensation failed: {e}"),
                    });
                }
                wal.step_skipped(step_id, "compensated during recovery")?;
                compensated_step = Some(step_id.clone());
            } else {
                // Read-only in-flight work is safe to drop outright.
                wal.step_skipped(step_id, "read-only step dropped during recovery")?;
            }
        }

        wal.recovery_completed("resumed")?;
        wal.execution_aborted("recovery: in-flight step cleared, resubmit to re-run")?;
        info!(execution_id = %execution_id, "execution recovered");

        Ok(RecoveryOutcome::Resumed {
            execution_id,
            compensated_step,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{Agent, AgentError};
    use async_trait::async_trait;
    use intentus_protocol::{
        AgentDefinition, AgentResponse, Capability, IntentEnvelope, IntentRef, SideEffectClass,
    };
    use intentus_store::RecoveryManager;
    use intentus_wal::WalReader;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct ReversibleAgent {
        definition: AgentDefinition,
        compensated: Arc<AtomicBool>,
        with_hook: bool,
    }

    #[async_trait]
    impl Agent for ReversibleAgent {
        fn definition(&self) -> &AgentDefinition {
            &self.definition
        }
        async fn handle(&self, _env: &IntentEnvelope) -> Result<AgentResponse, AgentError> {
            Ok(AgentResponse::success(json!(null)))
        }
        fn side_effect(&self) -> SideEffectClass {
            SideEffectClass::Reversible
        }
        fn supports_compensation(&self) -> bool {
            self.with_hook
        }
        async fn compensate(&self, _step_id: &str) -> Result<(), AgentError> {
            self.compensated.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn seeded_layout(dir: &tempfile::TempDir, agent_name: &str) -> StoreLayout {
        let layout = StoreLayout::new(dir.path());
        layout.ensure().unwrap();
        let mut writer = WalWriter::create(&layout.wal_dir(), "exec-1", None).unwrap();
        writer
            .execution_started("envhash", "write", "cfg", true)
            .unwrap();
        writer
            .step_started("step-1", agent_name, "reversible", json!({}), "in")
            .unwrap();
        layout
    }

    fn registry_with(agent: ReversibleAgent) -> Arc<AgentRegistry> {
        let registry = Arc::new(AgentRegistry::new());
        registry.register(Arc::new(agent)).unwrap();
        registry
    }

    fn reversible(name: &str, compensated: Arc<AtomicBool>, with_hook: bool) -> ReversibleAgent {
        ReversibleAgent {
            definition: AgentDefinition::new(name)
                .with_capability(Capability::new(IntentRef::new("write", "1.0"))),
            compensated,
            with_hook,
        }
    }

    #[tokio::test]
    async fn resume_compensates_reversible_step_and_closes_execution() {
        let dir = tempfile::tempdir().unwrap();
        let layout = seeded_layout(&dir, "Writer");
        let compensated = Arc::new(AtomicBool::new(false));
        let registry = registry_with(reversible("Writer", compensated.clone(), true));

        let manager = RecoveryManager::new(layout.clone());
        let analysis = manager.analyze("exec-1", None).unwrap().unwrap();
        assert_eq!(analysis.decision, RecoveryDecision::Resume);

        let coordinator = RecoveryCoordinator::new(registry, layout.clone(), None);
        let outcome = coordinator.resume(&analysis).await.unwrap();
        match outcome {
            RecoveryOutcome::Resumed {
                compensated_step, ..
            } => assert_eq!(compensated_step.as_deref(), Some("step-1")),
            other => panic!("expected resume, got {other:?}"),
        }
        assert!(compensated.load(Ordering::SeqCst));

        // WAL is terminal and clean afterwards.
        let reader = WalReader::load_execution(&layout.wal_dir(), "exec-1").unwrap();
        reader.verify(None, false).unwrap();
        assert!(reader.is_complete());
        assert!(manager.analyze("exec-1", None).unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_compensation_hook_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let layout = seeded_layout(&dir, "Writer");
        let compensated = Arc::new(AtomicBool::new(false));
        let registry = registry_with(reversible("Writer", compensated.clone(), false));

        let manager = RecoveryManager::new(layout.clone());
        let analysis = manager.analyze("exec-1", None).unwrap().unwrap();

        let coordinator = RecoveryCoordinator::new(registry, layout, None);
        let outcome = coordinator.resume(&analysis).await.unwrap();
        match outcome {
            RecoveryOutcome::Blocked { reason, .. } => {
                assert!(reason.contains("no compensation hook"));
            }
            other => panic!("expected block, got {other:?}"),
        }
        assert!(!compensated.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn blocked_analysis_writes_marker_and_stays_blocked() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        layout.ensure().unwrap();
        let mut writer = WalWriter::create(&layout.wal_dir(), "exec-1", None).unwrap();
        writer
            .execution_started("envhash", "transfer", "cfg", true)
            .unwrap();
        writer
            .step_started("step-1", "Mover", "irreversible", json!({}), "in")
            .unwrap();

        let manager = RecoveryManager::new(layout.clone());
        let analysis = manager.analyze("exec-1", None).unwrap().unwrap();
        assert_eq!(analysis.decision, RecoveryDecision::Block);

        let registry = Arc::new(AgentRegistry::new());
        let coordinator = RecoveryCoordinator::new(registry, layout.clone(), None);
        let outcome = coordinator.resume(&analysis).await.unwrap();
        assert!(matches!(outcome, RecoveryOutcome::Blocked { .. }));

        // Still incomplete: only the operator can abort it.
        let reader = WalReader::load_execution(&layout.wal_dir(), "exec-1").unwrap();
        assert!(!reader.is_complete());
    }
}
