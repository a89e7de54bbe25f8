use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{info, warn};

use intentus_crypto::hash_value;
use intentus_protocol::{
    AgentResponse, ErrorCode, ErrorInfo, ExecutionContract, IntentEnvelope, IntentRef,
    RecoveryStrategy, SideEffectClass,
};
use intentus_store::RecordBuilder;
use intentus_wal::{WalEntry, WalError, WalWriter};

use crate::agent::Agent;
use crate::contract::ContractEngine;
use crate::fingerprint::ExecutionFingerprint;
use crate::invoke::invoke_with_deadline;
use crate::registry::AgentRegistry;

/// WAL writer and record builder kept in lockstep: every entry appended
/// to the journal is mirrored into the record.
pub(crate) struct ExecutionJournal {
    wal: WalWriter,
    recorder: RecordBuilder,
}

impl ExecutionJournal {
    pub(crate) fn new(wal: WalWriter, recorder: RecordBuilder) -> Self {
        Self { wal, recorder }
    }

    pub(crate) fn into_recorder(self) -> RecordBuilder {
        self.recorder
    }

    fn observe(&mut self, entry: WalEntry) -> WalEntry {
        self.recorder.observe(&entry);
        entry
    }

    pub(crate) fn execution_started(
        &mut self,
        envelope_hash: &str,
        intent_name: &str,
        config_hash: &str,
        require_determinism: bool,
    ) -> Result<WalEntry, WalError> {
        let entry =
            self.wal
                .execution_started(envelope_hash, intent_name, config_hash, require_determinism)?;
        Ok(self.observe(entry))
    }

    pub(crate) fn execution_completed(
        &mut self,
        response_hash: &str,
        fingerprint: &str,
    ) -> Result<WalEntry, WalError> {
        let entry = self.wal.execution_completed(response_hash, fingerprint)?;
        Ok(self.observe(entry))
    }

    pub(crate) fn execution_failed(
        &mut self,
        failure_type: &str,
        reason: &str,
        recoverable: bool,
    ) -> Result<WalEntry, WalError> {
        let entry = self.wal.execution_failed(failure_type, reason, recoverable)?;
        Ok(self.observe(entry))
    }

    fn contract_validated(&mut self, step_id: &str, contract: Value) -> Result<(), WalError> {
        let entry = self.wal.contract_validated(step_id, contract)?;
        self.observe(entry);
        Ok(())
    }

    fn contract_violated(
        &mut self,
        step_id: &str,
        reason: &str,
        detail: &str,
    ) -> Result<(), WalError> {
        let entry = self.wal.contract_violated(step_id, reason, detail)?;
        self.observe(entry);
        Ok(())
    }

    fn step_started(
        &mut self,
        step_id: &str,
        agent_name: &str,
        side_effect: &str,
        contract: Value,
        input_hash: &str,
    ) -> Result<(), WalError> {
        let entry = self
            .wal
            .step_started(step_id, agent_name, side_effect, contract, input_hash)?;
        self.observe(entry);
        Ok(())
    }

    fn step_completed(
        &mut self,
        step_id: &str,
        agent_name: &str,
        output_hash: &str,
    ) -> Result<(), WalError> {
        let entry = self.wal.step_completed(step_id, agent_name, output_hash)?;
        self.observe(entry);
        Ok(())
    }

    fn step_failed(
        &mut self,
        step_id: &str,
        agent_name: &str,
        failure_type: &str,
        reason: &str,
        recoverable: bool,
    ) -> Result<(), WalError> {
        let entry = self
            .wal
            .step_failed(step_id, agent_name, failure_type, reason, recoverable)?;
        self.observe(entry);
        Ok(())
    }

    fn fallback_triggered(
        &mut self,
        from_agent: &str,
        to_agent: &str,
        reason: &str,
    ) -> Result<(), WalError> {
        let entry = self.wal.fallback_triggered(from_agent, to_agent, reason)?;
        self.observe(entry);
        Ok(())
    }

    fn fallback_exhausted(&mut self, attempts: usize, last_error: &str) -> Result<(), WalError> {
        let entry = self.wal.fallback_exhausted(attempts, last_error)?;
        self.observe(entry);
        Ok(())
    }
}

/// Mutable state threaded through one strategy dispatch.
pub(crate) struct StrategyRun<'a> {
    pub registry: &'a AgentRegistry,
    pub envelope: &'a mut IntentEnvelope,
    pub contract: ExecutionContract,
    /// Whether the caller declared a contract; implicit default contracts
    /// are enforced but not journaled as `contract.validated`.
    pub explicit_contract: bool,
    pub journal: &'a mut ExecutionJournal,
    pub fingerprint: &'a mut ExecutionFingerprint,
    pub engine: ContractEngine,
    pub execution_order: usize,
    pub intent_hash: String,
    pub input_hash: String,
}

/// Deterministic candidate order: agents without a node come first, then
/// lower node priority, then lexicographic name. Stable, and a function
/// of registry state only.
pub(crate) fn deterministic_order(mut candidates: Vec<Arc<dyn Agent>>) -> Vec<Arc<dyn Agent>> {
    candidates.sort_by(|a, b| {
        let da = a.definition();
        let db = b.definition();
        (da.node_id.is_some(), da.node_priority, &da.name).cmp(&(
            db.node_id.is_some(),
            db.node_priority,
            &db.name,
        ))
    });
    candidates
}

/// Deterministic step id: stable across executions so fingerprints and
/// retry patterns can be compared between runs.
pub(crate) fn step_id(execution_order: usize, intent: &IntentRef, agent_name: &str) -> String {
    let tree = json!({
        "executionOrder": execution_order,
        "intent": {"name": intent.name, "version": intent.version},
        "agentName": agent_name,
    });
    format!("step_{}", &hash_value(&tree)[..24])
}

fn output_hash_of(response: &AgentResponse) -> String {
    match &response.payload {
        Some(payload) => hash_value(payload),
        None => hash_value(&Value::Null),
    }
}

/// One guarded attempt: contract gate, `step.started` durable before the
/// side effect, invocation under the deadline watchdog, completion entry,
/// fingerprint update.
///
/// Outer `Err` is a core failure (WAL write failed) that aborts the
/// strategy; the inner result is the attempt outcome.
async fn attempt(
    run: &mut StrategyRun<'_>,
    agent: &Arc<dyn Agent>,
) -> Result<Result<AgentResponse, ErrorInfo>, WalError> {
    run.execution_order += 1;
    let agent_name = agent.definition().name.clone();
    let side_effect = agent.side_effect();
    let step = step_id(run.execution_order, &run.envelope.intent, &agent_name);

    if let Err(violation) = run.engine.begin_step(&step, run.contract.exactly_once) {
        run.journal
            .contract_violated(&step, violation.reason_code(), &violation.to_string())?;
        return Ok(Err(ErrorInfo::new(
            ErrorCode::ContractViolation,
            violation.to_string(),
        )
        .with_subtype(violation.reason_code())));
    }

    let contract_json = serde_json::to_value(&run.contract).unwrap_or(Value::Null);
    if run.explicit_contract {
        run.journal.contract_validated(&step, contract_json.clone())?;
    }
    run.journal.step_started(
        &step,
        &agent_name,
        side_effect.as_str(),
        contract_json,
        &run.input_hash,
    )?;
    if run.engine.note_started(side_effect) && side_effect != SideEffectClass::ReadOnly {
        info!(
            step = %step,
            class = side_effect.as_str(),
            "side-effect class escalated along the chain"
        );
    }

    run.envelope
        .routing_metadata
        .decision_path
        .push(agent_name.clone());

    let outcome =
        invoke_with_deadline(agent.clone(), run.envelope.clone(), run.contract.timeout_ms).await;

    match outcome.result {
        Ok(response) => {
            let output_hash = output_hash_of(&response);
            run.journal.step_completed(&step, &agent_name, &output_hash)?;
            run.fingerprint.record_step(
                &step,
                &run.intent_hash,
                &agent_name,
                &run.input_hash,
                Some(output_hash),
                run.envelope.routing_metadata.retry_count,
                run.contract.timeout_ms,
            );
            run.engine.complete_step(&step);
            Ok(Ok(response))
        }
        Err(error) => {
            if outcome.timed_out {
                run.journal
                    .contract_violated(&step, "timeout_ms", &error.message)?;
            }
            run.journal.step_failed(
                &step,
                &agent_name,
                &error.code.to_string(),
                &error.message,
                error.retryable,
            )?;
            run.fingerprint.record_step(
                &step,
                &run.intent_hash,
                &agent_name,
                &run.input_hash,
                None,
                run.envelope.routing_metadata.retry_count,
                run.contract.timeout_ms,
            );
            Ok(Err(error))
        }
    }
}

/// DIRECT: exactly one attempt against the target agent (or the first
/// ordered candidate); errors return as-is, no fallback.
pub(crate) async fn run_direct(
    run: &mut StrategyRun<'_>,
    ordered: &[Arc<dyn Agent>],
) -> Result<AgentResponse, WalError> {
    let agent = match run.envelope.routing.target_agent.clone() {
        Some(target) => match ordered.iter().find(|a| a.definition().name == target) {
            Some(agent) => agent.clone(),
            None => {
                return Ok(AgentResponse::failure(
                    ErrorInfo::new(
                        ErrorCode::RoutingError,
                        format!(
                            "target agent '{target}' is not registered for intent {}",
                            run.envelope.intent
                        ),
                    )
                    .with_subtype("target_not_registered"),
                ));
            }
        },
        None => ordered[0].clone(),
    };

    match attempt(run, &agent).await? {
        Ok(response) => Ok(response),
        Err(error) => Ok(AgentResponse::failure(error)),
    }
}

/// Effective fallback chain: an envelope-level override wins, then the
/// primary capability's declared chain, then the ordered candidate list.
fn fallback_chain(
    run: &StrategyRun<'_>,
    ordered: &[Arc<dyn Agent>],
) -> Vec<Arc<dyn Agent>> {
    let primary = ordered[0].clone();
    let override_names = &run.envelope.routing.fallback_agents;
    let capability_names = primary
        .definition()
        .capability_for(&run.envelope.intent)
        .map(|c| c.fallback_agents.clone())
        .unwrap_or_default();

    let names = if !override_names.is_empty() {
        override_names.clone()
    } else {
        capability_names
    };

    if names.is_empty() {
        return ordered.to_vec();
    }

    let mut chain = vec![primary.clone()];
    for name in names {
        if name == primary.definition().name {
            continue;
        }
        match run.registry.get(&name) {
            Some(agent) => chain.push(agent),
            None => warn!(agent = %name, "fallback agent not registered, skipping"),
        }
    }
    chain
}

/// FALLBACK: sequential attempts over the chain, first success wins.
/// An irreversible step that has started cuts the chain off; exhaustion
/// is journaled and the last error returned.
pub(crate) async fn run_fallback(
    run: &mut StrategyRun<'_>,
    ordered: &[Arc<dyn Agent>],
) -> Result<AgentResponse, WalError> {
    let chain = fallback_chain(run, ordered);
    let mut last_error: Option<ErrorInfo> = None;
    let mut attempts = 0usize;

    for (i, agent) in chain.iter().enumerate() {
        if i > 0 {
            let from = chain[i - 1].definition().name.clone();
            let reason = last_error
                .as_ref()
                .map(|e| e.code.to_string())
                .unwrap_or_else(|| "unknown".into());
            run.journal
                .fallback_triggered(&from, &agent.definition().name, &reason)?;
        }

        attempts += 1;
        match attempt(run, agent).await? {
            Ok(response) => return Ok(response),
            Err(error) => {
                // An irreversible step that started and failed is
                // terminal: no further candidate may run.
                if agent.side_effect() == SideEffectClass::Irreversible {
                    let failed = ErrorInfo::new(ErrorCode::IrreversibleStepFailed, error.message)
                        .with_subtype("irreversible_step_failed")
                        .with_detail("cause", error.code.to_string())
                        .with_recovery(RecoveryStrategy::ManualIntervention);
                    return Ok(AgentResponse::failure(failed));
                }
                let stop = matches!(
                    error.recovery,
                    Some(RecoveryStrategy::Abort) | Some(RecoveryStrategy::ManualIntervention)
                ) || !run.engine.may_continue_fallback();
                last_error = Some(error);
                if stop {
                    break;
                }
            }
        }
    }

    let last = last_error.unwrap_or_else(|| {
        ErrorInfo::new(ErrorCode::RoutingError, "no fallback candidate could be attempted")
    });
    run.journal.fallback_exhausted(attempts, &last.message)?;
    Ok(AgentResponse::failure(last))
}

/// BROADCAST: every candidate runs sequentially in order; the last
/// successful response wins, otherwise the last error.
pub(crate) async fn run_broadcast(
    run: &mut StrategyRun<'_>,
    ordered: &[Arc<dyn Agent>],
) -> Result<AgentResponse, WalError> {
    let mut last_success: Option<AgentResponse> = None;
    let mut last_error: Option<ErrorInfo> = None;

    for agent in ordered {
        match attempt(run, agent).await? {
            Ok(response) => last_success = Some(response),
            Err(error) => last_error = Some(error),
        }
    }

    Ok(match (last_success, last_error) {
        (Some(response), _) => response,
        (None, Some(error)) => AgentResponse::failure(error),
        (None, None) => AgentResponse::failure(ErrorInfo::new(
            ErrorCode::RoutingError,
            "broadcast had no candidates to execute",
        )),
    })
}

/// PARALLEL: all candidates launch concurrently in deterministic order;
/// the first success (by completion) wins, losers run to completion and
/// their results are discarded.
///
/// Only reachable when determinism is not required: completion order, and
/// therefore the WAL trace, is not reproducible.
pub(crate) async fn run_parallel(
    run: &mut StrategyRun<'_>,
    ordered: &[Arc<dyn Agent>],
) -> Result<AgentResponse, WalError> {
    struct Launch {
        step_id: String,
        agent_name: String,
    }

    let contract_json = serde_json::to_value(&run.contract).unwrap_or(Value::Null);
    let mut launches = Vec::with_capacity(ordered.len());
    let mut join_set = tokio::task::JoinSet::new();

    // Launch order is deterministic: step.started entries and the
    // decision path are journaled before any worker runs.
    for agent in ordered {
        run.execution_order += 1;
        let agent_name = agent.definition().name.clone();
        let step = step_id(run.execution_order, &run.envelope.intent, &agent_name);

        if run.explicit_contract {
            run.journal.contract_validated(&step, contract_json.clone())?;
        }
        run.journal.step_started(
            &step,
            &agent_name,
            agent.side_effect().as_str(),
            contract_json.clone(),
            &run.input_hash,
        )?;
        run.engine.note_started(agent.side_effect());
        run.envelope
            .routing_metadata
            .decision_path
            .push(agent_name.clone());

        let index = launches.len();
        launches.push(Launch {
            step_id: step,
            agent_name,
        });

        let agent = agent.clone();
        let envelope = run.envelope.clone();
        let timeout_ms = run.contract.timeout_ms;
        join_set.spawn(async move {
            let outcome = invoke_with_deadline(agent, envelope, timeout_ms).await;
            (index, outcome)
        });
    }

    let mut first_success: Option<AgentResponse> = None;
    let mut last_error: Option<ErrorInfo> = None;

    while let Some(joined) = join_set.join_next().await {
        let (index, outcome) = match joined {
            Ok(pair) => pair,
            Err(e) => {
                last_error = Some(ErrorInfo::new(
                    ErrorCode::InternalAgentError,
                    format!("parallel worker failed: {e}"),
                ));
                continue;
            }
        };
        let launch = &launches[index];

        match outcome.result {
            Ok(response) => {
                let output_hash = output_hash_of(&response);
                run.journal
                    .step_completed(&launch.step_id, &launch.agent_name, &output_hash)?;
                run.fingerprint.record_step(
                    &launch.step_id,
                    &run.intent_hash,
                    &launch.agent_name,
                    &run.input_hash,
                    Some(output_hash),
                    run.envelope.routing_metadata.retry_count,
                    run.contract.timeout_ms,
                );
                run.engine.complete_step(&launch.step_id);
                // First success wins; later successes are discarded.
                if first_success.is_none() {
                    first_success = Some(response);
                }
            }
            Err(error) => {
                if outcome.timed_out {
                    run.journal
                        .contract_violated(&launch.step_id, "timeout_ms", &error.message)?;
                }
                run.journal.step_failed(
                    &launch.step_id,
                    &launch.agent_name,
                    &error.code.to_string(),
                    &error.message,
                    error.retryable,
                )?;
                run.fingerprint.record_step(
                    &launch.step_id,
                    &run.intent_hash,
                    &launch.agent_name,
                    &run.input_hash,
                    None,
                    run.envelope.routing_metadata.retry_count,
                    run.contract.timeout_ms,
                );
                last_error = Some(error);
            }
        }
    }

    Ok(match (first_success, last_error) {
        (Some(response), _) => response,
        (None, Some(error)) => AgentResponse::failure(error),
        (None, None) => AgentResponse::failure(ErrorInfo::new(
            ErrorCode::RoutingError,
            "parallel dispatch had no candidates to execute",
        )),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use intentus_protocol::AgentDefinition;

    struct OrderStub {
        definition: AgentDefinition,
    }

    #[async_trait::async_trait]
    impl Agent for OrderStub {
        fn definition(&self) -> &AgentDefinition {
            &self.definition
        }
        async fn handle(
            &self,
            _env: &IntentEnvelope,
        ) -> Result<AgentResponse, crate::agent::AgentError> {
            Ok(AgentResponse::success(Value::Null))
        }
    }

    fn agent(name: &str, node: Option<(&str, i64)>) -> Arc<dyn Agent> {
        let mut definition = AgentDefinition::new(name);
        if let Some((node_id, priority)) = node {
            definition = definition.on_node(node_id, priority);
        }
        Arc::new(OrderStub { definition })
    }

    #[test]
    fn ordering_prefers_nodeless_then_priority_then_name() {
        let candidates = vec![
            agent("Zeta", None),
            agent("Remote", Some(("n1", 1))),
            agent("Alpha", None),
            agent("Closer", Some(("n2", 0))),
        ];
        let ordered: Vec<String> = deterministic_order(candidates)
            .iter()
            .map(|a| a.definition().name.clone())
            .collect();
        assert_eq!(ordered, vec!["Alpha", "Zeta", "Closer", "Remote"]);
    }

    #[test]
    fn ordering_breaks_priority_ties_by_name() {
        let candidates = vec![agent("beta", None), agent("alpha", None)];
        let ordered: Vec<String> = deterministic_order(candidates)
            .iter()
            .map(|a| a.definition().name.clone())
            .collect();
        assert_eq!(ordered, vec!["alpha", "beta"]);
    }

    #[test]
    fn step_ids_are_stable_across_runs() {
        let intent = IntentRef::new("sum", "1.0");
        let a = step_id(1, &intent, "A");
        let b = step_id(1, &intent, "A");
        assert_eq!(a, b);
        assert!(a.starts_with("step_"));
        assert_eq!(a.len(), "step_".len() + 24);
        assert_ne!(step_id(2, &intent, "A"), a);
        assert_ne!(step_id(1, &intent, "B"), a);
    }
}
