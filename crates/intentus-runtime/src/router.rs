use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use intentus_crypto::{hash_of, hash_value, WalSigner};
use intentus_protocol::{
    AgentResponse, ComplianceConfig, ComplianceError, ErrorCode, ErrorInfo, IntentEnvelope,
    RoutingStrategy, PROTOCOL_VERSION,
};
use intentus_store::{
    derive_key, IdempotencyIndex, LockManager, RecordBuilder, RecordStore, RetrievalEngine,
    StoreLayout,
};
use intentus_wal::{WalError, WalWriter};

use crate::agent::Agent;
use crate::contract::ContractEngine;
use crate::error::RouterError;
use crate::fingerprint::ExecutionFingerprint;
use crate::middleware::{run_after, run_before, RouterHook};
use crate::registry::AgentRegistry;
use crate::strategy::{self, deterministic_order, ExecutionJournal, StrategyRun};

/// Router construction parameters. Built once at startup and passed by
/// reference through the runtime handle; there is no process-global state.
pub struct RouterConfig {
    pub base_dir: PathBuf,
    pub compliance: ComplianceConfig,
    /// Marker that a PII redaction policy is configured (REGULATED).
    pub pii_policy_configured: bool,
    pub lock_ttl: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("./intentusnet-data"),
            compliance: ComplianceConfig::default(),
            pii_policy_configured: false,
            lock_ttl: Duration::from_secs(60 * 60),
        }
    }
}

/// What `route` hands back. `execution_id` is `None` when the request was
/// rejected before an execution began (no WAL exists).
#[derive(Clone, Debug)]
pub struct RouteOutcome {
    pub execution_id: Option<String>,
    pub response: AgentResponse,
    pub deduplicated: bool,
}

/// The deterministic intent router.
///
/// `route` never returns an error: every failure becomes an
/// `AgentResponse { status: error }`. Core failures (a WAL append that
/// cannot complete) are normalized the same way, with their cause logged.
pub struct IntentRouter {
    registry: Arc<AgentRegistry>,
    config: RouterConfig,
    layout: StoreLayout,
    records: RecordStore,
    locks: LockManager,
    idempotency: Mutex<IdempotencyIndex>,
    hooks: Vec<Box<dyn RouterHook>>,
    signer: Option<Arc<WalSigner>>,
    config_hash: String,
}

impl IntentRouter {
    /// Validate compliance requirements and open the persistent layout.
    /// Any missing REGULATED requirement fails construction with an
    /// explicit diagnostic.
    pub fn new(
        registry: Arc<AgentRegistry>,
        config: RouterConfig,
        signer: Option<Arc<WalSigner>>,
    ) -> Result<Self, RouterError> {
        config.compliance.validate()?;
        if config.compliance.require_signed_wal && signer.is_none() {
            return Err(ComplianceError::SignerRequired {
                mode: config.compliance.mode,
            }
            .into());
        }
        if config.compliance.require_pii_policy && !config.pii_policy_configured {
            return Err(ComplianceError::PiiPolicyRequired {
                mode: config.compliance.mode,
            }
            .into());
        }

        let layout = StoreLayout::new(&config.base_dir);
        layout.ensure()?;
        let records = RecordStore::new(&layout);
        let locks = LockManager::new(layout.locks_dir()).with_ttl(config.lock_ttl);
        let idempotency = Mutex::new(IdempotencyIndex::load(layout.idempotency_index_path())?);

        let config_hash = hash_value(&json!({
            "complianceMode": config.compliance.mode,
            "requireDeterminism": config.compliance.require_determinism,
            "walSigning": signer.is_some(),
            "protocolVersion": PROTOCOL_VERSION,
        }));

        info!(
            mode = %config.compliance.mode,
            base_dir = %config.base_dir.display(),
            signing = signer.is_some(),
            "intent router initialized"
        );

        Ok(Self {
            registry,
            config,
            layout,
            records,
            locks,
            idempotency,
            hooks: Vec::new(),
            signer,
            config_hash,
        })
    }

    pub fn add_hook(&mut self, hook: Box<dyn RouterHook>) {
        self.hooks.push(hook);
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    pub fn config_hash(&self) -> &str {
        &self.config_hash
    }

    /// Pre-execution cost estimate for an envelope against the primary
    /// candidate, without executing anything.
    pub fn estimate_cost(&self, envelope: &IntentEnvelope) -> Option<f64> {
        let candidates = self.registry.find_agents_for_intent(&envelope.intent);
        if candidates.is_empty() {
            return None;
        }
        let ordered = deterministic_order(candidates);
        Some(Self::primary(&ordered, envelope).estimate_cost(envelope))
    }

    fn primary<'a>(
        ordered: &'a [Arc<dyn Agent>],
        envelope: &IntentEnvelope,
    ) -> &'a Arc<dyn Agent> {
        if let Some(target) = &envelope.routing.target_agent {
            if let Some(agent) = ordered.iter().find(|a| &a.definition().name == target) {
                return agent;
            }
        }
        &ordered[0]
    }

    /// Route one envelope. Always returns an outcome; never panics or
    /// propagates internal errors to the caller.
    pub async fn route(&self, mut envelope: IntentEnvelope) -> RouteOutcome {
        run_before(&self.hooks, &envelope);

        let explicit_contract = envelope.contract.is_some();
        let contract = envelope.contract.clone().unwrap_or_default();

        // Resolve the dedup key: caller-supplied, or derived from the
        // envelope when the contract demands idempotency.
        let idempotency_key = envelope.idempotency_key.clone().or_else(|| {
            if contract.idempotent_required {
                derive_key(&envelope).ok()
            } else {
                None
            }
        });

        if let Some(key) = &idempotency_key {
            if let Some(execution_id) = self.lookup_idempotent(key) {
                info!(execution_id = %execution_id, "idempotency key hit, no new execution");
                let response = match RetrievalEngine::new(self.layout.clone())
                    .retrieve(&execution_id, None)
                {
                    Ok(result) => result.response,
                    Err(err) => AgentResponse::failure(
                        ErrorInfo::new(
                            ErrorCode::ContractViolation,
                            format!(
                                "duplicate submission: prior execution {execution_id} is not retrievable ({err})"
                            ),
                        )
                        .with_subtype("duplicate_submission"),
                    ),
                };
                run_after(&self.hooks, &envelope, &response);
                return RouteOutcome {
                    execution_id: Some(execution_id),
                    response,
                    deduplicated: true,
                };
            }
        }

        // PARALLEL is rejected at dispatch under determinism; nothing is
        // journaled.
        if envelope.routing.strategy == RoutingStrategy::Parallel
            && self.config.compliance.require_determinism
        {
            let response = AgentResponse::failure(
                ErrorInfo::new(
                    ErrorCode::DeterminismViolation,
                    format!(
                        "PARALLEL strategy is not allowed under '{}' compliance",
                        self.config.compliance.mode
                    ),
                )
                .with_subtype("parallel_forbidden"),
            );
            return self.finish_unstarted(&envelope, response);
        }

        let candidates = self.registry.find_agents_for_intent(&envelope.intent);
        if candidates.is_empty() {
            let response = AgentResponse::failure(ErrorInfo::new(
                ErrorCode::CapabilityNotFound,
                format!("no registered agent matches intent {}", envelope.intent),
            ));
            return self.finish_unstarted(&envelope, response);
        }
        let ordered = deterministic_order(candidates);

        // Contract preflight over every candidate that may be attempted.
        // Fails before the WAL file exists.
        if let Err(violation) = ContractEngine::preflight(&contract, &ordered) {
            let response = AgentResponse::failure(
                ErrorInfo::new(ErrorCode::ContractViolation, violation.to_string())
                    .with_subtype(violation.reason_code()),
            );
            return self.finish_unstarted(&envelope, response);
        }

        // Budget gate, also before execution.started.
        let estimated = Self::primary(&ordered, &envelope).estimate_cost(&envelope);
        if estimated > contract.max_cost_units {
            let response = AgentResponse::failure(
                ErrorInfo::new(
                    ErrorCode::BudgetExceeded,
                    format!(
                        "estimated cost {estimated} exceeds budget {}",
                        contract.max_cost_units
                    ),
                )
                .with_detail("estimatedCost", estimated)
                .with_detail("maxCostUnits", contract.max_cost_units),
            );
            return self.finish_unstarted(&envelope, response);
        }

        match self
            .execute(
                &mut envelope,
                ordered,
                contract,
                explicit_contract,
                idempotency_key,
            )
            .await
        {
            Ok(outcome) => {
                run_after(&self.hooks, &envelope, &outcome.response);
                outcome
            }
            Err(err) => {
                warn!(error = %err, "core failure while routing");
                let response = AgentResponse::failure(Self::core_failure(&err));
                run_after(&self.hooks, &envelope, &response);
                RouteOutcome {
                    execution_id: None,
                    response,
                    deduplicated: false,
                }
            }
        }
    }

    fn lookup_idempotent(&self, key: &str) -> Option<String> {
        self.idempotency
            .lock()
            .ok()
            .and_then(|index| index.get(key).map(str::to_string))
    }

    fn finish_unstarted(&self, envelope: &IntentEnvelope, response: AgentResponse) -> RouteOutcome {
        run_after(&self.hooks, envelope, &response);
        RouteOutcome {
            execution_id: None,
            response,
            deduplicated: false,
        }
    }

    fn core_failure(err: &RouterError) -> ErrorInfo {
        match err {
            RouterError::Wal(WalError::Integrity { kind, seq }) => ErrorInfo::new(
                ErrorCode::WalIntegrityError,
                format!("WAL integrity failure at seq {seq}"),
            )
            .with_subtype(kind.as_str()),
            other => ErrorInfo::new(
                ErrorCode::InternalAgentError,
                format!("core failure during routing: {other}"),
            )
            .with_subtype("core_failure"),
        }
    }

    /// The journaled section: everything from `execution.started` to the
    /// persisted record happens here, under the execution lock.
    async fn execute(
        &self,
        envelope: &mut IntentEnvelope,
        ordered: Vec<Arc<dyn Agent>>,
        contract: intentus_protocol::ExecutionContract,
        explicit_contract: bool,
        idempotency_key: Option<String>,
    ) -> Result<RouteOutcome, RouterError> {
        let execution_id = Uuid::new_v4().to_string();
        let envelope_hash = hash_of(&*envelope)?;

        let lock = self.locks.acquire(&execution_id)?;
        let wal = WalWriter::create(&self.layout.wal_dir(), &execution_id, self.signer.clone())?;
        let recorder = RecordBuilder::new(&execution_id, &envelope_hash, envelope.intent.clone());
        let mut journal = ExecutionJournal::new(wal, recorder);

        journal.execution_started(
            &envelope_hash,
            &envelope.intent.name,
            &self.config_hash,
            self.config.compliance.require_determinism,
        )?;

        let mut fingerprint = ExecutionFingerprint::new();
        let intent_hash = hash_of(&envelope.intent)?;
        let input_hash = hash_value(&Value::Object(envelope.payload.clone()));
        let strategy_kind = envelope.routing.strategy;

        let response = {
            let mut run = StrategyRun {
                registry: self.registry.as_ref(),
                envelope: &mut *envelope,
                contract,
                explicit_contract,
                journal: &mut journal,
                fingerprint: &mut fingerprint,
                engine: ContractEngine::new(),
                execution_order: 0,
                intent_hash,
                input_hash,
            };
            match strategy_kind {
                RoutingStrategy::Direct => strategy::run_direct(&mut run, &ordered).await?,
                RoutingStrategy::Fallback => strategy::run_fallback(&mut run, &ordered).await?,
                RoutingStrategy::Broadcast => strategy::run_broadcast(&mut run, &ordered).await?,
                RoutingStrategy::Parallel => strategy::run_parallel(&mut run, &ordered).await?,
            }
        };

        fingerprint.set_execution_order(&envelope.routing_metadata.decision_path);
        let fingerprint_hash = fingerprint.compute();

        if response.is_success() {
            let response_hash = hash_of(&response)?;
            journal.execution_completed(&response_hash, &fingerprint_hash)?;
        } else {
            let error = response
                .error
                .clone()
                .unwrap_or_else(|| ErrorInfo::new(ErrorCode::RoutingError, "routing failed"));
            journal.execution_failed(&error.code.to_string(), &error.message, error.retryable)?;
        }

        let record = journal.into_recorder().finalize(response.clone())?;
        self.records.save(&record)?;

        if let Some(key) = &idempotency_key {
            if let Ok(mut index) = self.idempotency.lock() {
                index.record(key, &execution_id)?;
            }
        }

        lock.release();
        info!(
            execution_id = %execution_id,
            intent = %envelope.intent,
            strategy = %strategy_kind,
            success = response.is_success(),
            "intent routed"
        );

        Ok(RouteOutcome {
            execution_id: Some(execution_id),
            response,
            deduplicated: false,
        })
    }
}
