use std::collections::HashSet;
use std::sync::Arc;

use intentus_protocol::{ContractViolation, ExecutionContract, SideEffectClass};

use crate::agent::Agent;

/// Per-execution contract enforcement state.
///
/// Tracks completed step ids for exactly-once, and whether an
/// irreversible step has started, which cuts off further fallback.
pub struct ContractEngine {
    completed_steps: HashSet<String>,
    irreversible_started: bool,
    highest_rank: u8,
}

impl ContractEngine {
    pub fn new() -> Self {
        Self {
            completed_steps: HashSet::new(),
            irreversible_started: false,
            highest_rank: 0,
        }
    }

    /// Static validation across every candidate that may be attempted.
    /// Runs before any WAL entry exists.
    pub fn preflight(
        contract: &ExecutionContract,
        candidates: &[Arc<dyn Agent>],
    ) -> Result<(), ContractViolation> {
        for agent in candidates {
            contract.validate(agent.side_effect())?;
        }
        Ok(())
    }

    /// Gate a new attempt of `step_id` under the contract.
    pub fn begin_step(
        &mut self,
        step_id: &str,
        exactly_once: bool,
    ) -> Result<(), ContractViolation> {
        if exactly_once && self.completed_steps.contains(step_id) {
            return Err(ContractViolation::DuplicateStep {
                step_id: step_id.to_string(),
            });
        }
        Ok(())
    }

    /// Note that a step with this side-effect class has started.
    /// Returns `true` when the chain escalated to a higher class (the
    /// escalation is allowed but recorded).
    pub fn note_started(&mut self, side_effect: SideEffectClass) -> bool {
        if side_effect == SideEffectClass::Irreversible {
            self.irreversible_started = true;
        }
        let escalated = side_effect.rank() > self.highest_rank;
        if escalated {
            self.highest_rank = side_effect.rank();
        }
        escalated
    }

    pub fn complete_step(&mut self, step_id: &str) {
        self.completed_steps.insert(step_id.to_string());
    }

    /// Once an irreversible step has started, no further fallback
    /// candidate may be tried.
    pub fn may_continue_fallback(&self) -> bool {
        !self.irreversible_started
    }

    pub fn irreversible_started(&self) -> bool {
        self.irreversible_started
    }
}

impl Default for ContractEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exactly_once_rejects_repeated_step() {
        let mut engine = ContractEngine::new();
        engine.begin_step("step-1", true).unwrap();
        engine.complete_step("step-1");

        let err = engine.begin_step("step-1", true).unwrap_err();
        assert_eq!(err.reason_code(), "exactly_once");
        // Without the exactly-once contract the re-attempt is allowed.
        engine.begin_step("step-1", false).unwrap();
    }

    #[test]
    fn irreversible_start_cuts_off_fallback() {
        let mut engine = ContractEngine::new();
        engine.note_started(SideEffectClass::ReadOnly);
        assert!(engine.may_continue_fallback());

        engine.note_started(SideEffectClass::Irreversible);
        assert!(!engine.may_continue_fallback());
    }

    #[test]
    fn escalation_is_flagged_once_per_class() {
        let mut engine = ContractEngine::new();
        assert!(!engine.note_started(SideEffectClass::ReadOnly));
        assert!(engine.note_started(SideEffectClass::Reversible));
        assert!(!engine.note_started(SideEffectClass::Reversible));
        assert!(engine.note_started(SideEffectClass::Irreversible));
    }
}
