//! `intentusnet`: operator CLI for the deterministic execution runtime.

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

use intentus_crypto::{KeyRegistry, WalSigner};
use intentus_protocol::{ComplianceConfig, ComplianceMode, IntentEnvelope};
use intentus_runtime::{IntentRouter, RecoveryCoordinator, RecoveryOutcome, RouterConfig};
use intentus_store::{
    RecordStore, RecoveryDecision, RecoveryManager, RetrievalEngine, StoreError, StoreLayout,
};
use intentus_wal::WalReader;

mod agents;
mod output;

use output::{print_value, OutputFormat};

#[derive(Parser)]
#[command(name = "intentusnet", about = "IntentusNet deterministic execution runtime")]
#[command(version)]
struct Cli {
    /// Base data directory (wal/, records/, locks/, idempotency/)
    #[arg(
        long,
        global = true,
        env = "INTENTUSNET_BASE_DIR",
        default_value = "./intentusnet-data"
    )]
    base_dir: PathBuf,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Table)]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute an intent envelope against the local runtime
    Route {
        /// Path to the envelope JSON file
        envelope: PathBuf,

        /// Compliance mode for this run
        #[arg(long, value_enum, default_value_t = ModeArg::Standard)]
        mode: ModeArg,

        /// Hex-encoded Ed25519 signing key file (required for regulated)
        #[arg(long)]
        sign_key: Option<PathBuf>,

        /// Name of the configured PII redaction policy (regulated)
        #[arg(long)]
        pii_policy: Option<String>,
    },

    /// Introspect recorded executions
    Executions {
        #[command(subcommand)]
        command: ExecutionsCommands,
    },

    /// Print the stored response for an execution (no agent runs)
    Retrieve {
        execution_id: String,
    },

    /// Manage incomplete executions
    Recovery {
        #[command(subcommand)]
        command: RecoveryCommands,
    },

    /// Inspect and verify write-ahead logs
    Wal {
        #[command(subcommand)]
        command: WalCommands,
    },

    /// Verify record ↔ WAL consistency
    Records {
        #[command(subcommand)]
        command: RecordsCommands,
    },

    /// Pre-execution cost check against a budget
    Estimate {
        /// Path to the envelope JSON file
        envelope: PathBuf,

        /// Budget in cost units
        #[arg(long)]
        budget: f64,
    },
}

#[derive(Subcommand)]
enum ExecutionsCommands {
    /// List recorded executions
    List,
    /// Show one execution record
    Show { execution_id: String },
    /// Print the WAL timeline of an execution
    Trace { execution_id: String },
    /// Compare two execution records
    Diff { first: String, second: String },
}

#[derive(Subcommand)]
enum RecoveryCommands {
    /// Find executions whose WAL lacks a terminal entry
    Scan,
    /// Resume an incomplete execution (compensating when reversible)
    Resume {
        execution_id: String,
        /// Bearer token; required when INTENTUSNET_AUTH_TOKEN is set
        #[arg(long)]
        auth_token: Option<String>,
    },
    /// Abort an incomplete execution
    Abort {
        execution_id: String,
        #[arg(long, default_value = "operator abort")]
        reason: String,
        /// Bearer token; required when INTENTUSNET_AUTH_TOKEN is set
        #[arg(long)]
        auth_token: Option<String>,
    },
}

#[derive(Subcommand)]
enum WalCommands {
    /// Dump the entries of one WAL
    Inspect { execution_id: String },
    /// Verify hash chains and signatures (all WALs when no id given)
    Verify {
        execution_id: Option<String>,
        /// Hex-encoded Ed25519 public key files for signature checks
        #[arg(long)]
        key_file: Vec<PathBuf>,
        /// Fail entries that carry no signature
        #[arg(long)]
        require_signatures: bool,
    },
}

#[derive(Subcommand)]
enum RecordsCommands {
    /// Check record ↔ WAL consistency (all records when no id given)
    Verify { execution_id: Option<String> },
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ModeArg {
    Development,
    Standard,
    Regulated,
}

impl ModeArg {
    fn to_mode(self) -> ComplianceMode {
        match self {
            ModeArg::Development => ComplianceMode::Development,
            ModeArg::Standard => ComplianceMode::Standard,
            ModeArg::Regulated => ComplianceMode::Regulated,
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let code = run(cli).await;
    std::process::exit(code);
}

async fn run(cli: Cli) -> i32 {
    let layout = StoreLayout::new(&cli.base_dir);
    let format = cli.output;

    match cli.command {
        Commands::Route {
            envelope,
            mode,
            sign_key,
            pii_policy,
        } => route(&cli.base_dir, format, &envelope, mode, sign_key, pii_policy).await,
        Commands::Executions { command } => executions(layout, format, command),
        Commands::Retrieve { execution_id } => retrieve(layout, format, &execution_id),
        Commands::Recovery { command } => recovery(layout, format, command).await,
        Commands::Wal { command } => wal(layout, format, command),
        Commands::Records { command } => records_verify(layout, format, command),
        Commands::Estimate { envelope, budget } => {
            estimate(&cli.base_dir, format, &envelope, budget)
        }
    }
}

// ── route ────────────────────────────────────────────────────────────

async fn route(
    base_dir: &PathBuf,
    format: OutputFormat,
    envelope_path: &PathBuf,
    mode: ModeArg,
    sign_key: Option<PathBuf>,
    pii_policy: Option<String>,
) -> i32 {
    if read_only_mode() {
        eprintln!("INTENTUSNET_MODE=read_only: route is not permitted");
        return 1;
    }

    let envelope = match load_envelope(envelope_path) {
        Ok(env) => env,
        Err(message) => {
            eprintln!("{message}");
            return 1;
        }
    };

    let router = match build_router(base_dir, mode, sign_key, pii_policy) {
        Ok(router) => router,
        Err(message) => {
            eprintln!("{message}");
            return 1;
        }
    };

    let outcome = router.route(envelope).await;
    print_value(
        format,
        &json!({
            "executionId": outcome.execution_id,
            "deduplicated": outcome.deduplicated,
            "response": outcome.response,
        }),
    );
    if outcome.response.is_success() {
        0
    } else {
        1
    }
}

fn build_router(
    base_dir: &PathBuf,
    mode: ModeArg,
    sign_key: Option<PathBuf>,
    pii_policy: Option<String>,
) -> Result<IntentRouter, String> {
    let registry = agents::reference_registry().map_err(|e| e.to_string())?;
    let signer = match sign_key {
        Some(path) => Some(Arc::new(
            WalSigner::load(&path).map_err(|e| format!("signing key: {e}"))?,
        )),
        None => None,
    };
    let config = RouterConfig {
        base_dir: base_dir.clone(),
        compliance: ComplianceConfig::for_mode(mode.to_mode()),
        pii_policy_configured: pii_policy.is_some(),
        ..RouterConfig::default()
    };
    IntentRouter::new(registry, config, signer).map_err(|e| format!("router init: {e}"))
}

fn load_envelope(path: &PathBuf) -> Result<IntentEnvelope, String> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read envelope {}: {e}", path.display()))?;
    serde_json::from_str(&text).map_err(|e| format!("invalid envelope {}: {e}", path.display()))
}

// ── executions ───────────────────────────────────────────────────────

fn executions(layout: StoreLayout, format: OutputFormat, command: ExecutionsCommands) -> i32 {
    let store = RecordStore::new(&layout);
    match command {
        ExecutionsCommands::List => {
            let ids = match store.list() {
                Ok(ids) => ids,
                Err(e) => {
                    eprintln!("{e}");
                    return 1;
                }
            };
            let mut rows = Vec::new();
            for id in ids {
                match store.load(&id) {
                    Ok(record) => rows.push(json!({
                        "executionId": record.execution_id,
                        "intent": record.intent.to_string(),
                        "status": record.response.status,
                        "startedAt": record.started_at,
                        "finishedAt": record.finished_at,
                        "events": record.events.len(),
                    })),
                    Err(e) => rows.push(json!({
                        "executionId": id,
                        "status": "unreadable",
                        "error": e.to_string(),
                    })),
                }
            }
            print_value(format, &Value::Array(rows));
            0
        }
        ExecutionsCommands::Show { execution_id } => match store.load(&execution_id) {
            Ok(record) => {
                print_value(format, &serde_json::to_value(&record).unwrap_or_default());
                0
            }
            Err(e) => {
                eprintln!("{e}");
                1
            }
        },
        ExecutionsCommands::Trace { execution_id } => {
            let reader = match WalReader::load_execution(&layout.wal_dir(), &execution_id) {
                Ok(reader) => reader,
                Err(e) => {
                    eprintln!("{e}");
                    return 1;
                }
            };
            let rows: Vec<Value> = reader
                .entries()
                .iter()
                .map(|entry| {
                    json!({
                        "seq": entry.seq,
                        "entryType": entry.entry_type.as_str(),
                        "stepId": entry.step_id(),
                        "agentName": entry.agent_name(),
                        "timestampIso": entry.timestamp_iso,
                    })
                })
                .collect();
            print_value(format, &Value::Array(rows));
            0
        }
        ExecutionsCommands::Diff { first, second } => {
            let (a, b) = match (store.load(&first), store.load(&second)) {
                (Ok(a), Ok(b)) => (a, b),
                (Err(e), _) | (_, Err(e)) => {
                    eprintln!("{e}");
                    return 1;
                }
            };
            let fp_a = load_fingerprint(&layout, &first);
            let fp_b = load_fingerprint(&layout, &second);
            print_value(format, &diff_records(&a, &b, fp_a, fp_b));
            0
        }
    }
}

/// Execution fingerprint from the WAL's `execution.completed` payload.
fn load_fingerprint(layout: &StoreLayout, execution_id: &str) -> Option<String> {
    let reader = WalReader::load_execution(&layout.wal_dir(), execution_id).ok()?;
    reader
        .entries()
        .iter()
        .find(|e| e.entry_type == intentus_wal::WalEntryType::ExecutionCompleted)
        .and_then(|e| e.payload.get("fingerprint"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Field-by-field comparison of two records; used to investigate drift
/// between runs of the same envelope.
fn diff_records(
    a: &intentus_store::ExecutionRecord,
    b: &intentus_store::ExecutionRecord,
    fingerprint_a: Option<String>,
    fingerprint_b: Option<String>,
) -> Value {
    let mut differences: Vec<String> = Vec::new();

    let fingerprint_same = match (&fingerprint_a, &fingerprint_b) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    };
    if !fingerprint_same {
        differences.push("fingerprints differ: DETERMINISM_VIOLATION (drift)".into());
    }

    if a.intent != b.intent {
        differences.push("intents differ".into());
    }
    if a.envelope_hash != b.envelope_hash {
        differences.push("envelope hashes differ".into());
    }

    let path_of = |record: &intentus_store::ExecutionRecord| -> Vec<String> {
        record
            .events
            .iter()
            .filter(|e| e.entry_type == "step.started")
            .filter_map(|e| e.agent_name.clone())
            .collect()
    };
    let path_a = path_of(a);
    let path_b = path_of(b);
    if path_a != path_b {
        differences.push("decision paths differ".into());
    }

    let response_same = serde_json::to_value(&a.response).ok()
        == serde_json::to_value(&b.response).ok();
    if !response_same {
        differences.push("final responses differ".into());
    }
    if a.events.len() != b.events.len() {
        differences.push(format!(
            "event counts differ: {} vs {}",
            a.events.len(),
            b.events.len()
        ));
    }
    if a.replayable != b.replayable {
        differences.push("replayability differs".into());
    }

    json!({
        "executionIdA": a.execution_id,
        "executionIdB": b.execution_id,
        "decisionPathA": path_a,
        "decisionPathB": path_b,
        "responseSame": response_same,
        "fingerprintA": fingerprint_a,
        "fingerprintB": fingerprint_b,
        "fingerprintSame": fingerprint_same,
        "eventCountA": a.events.len(),
        "eventCountB": b.events.len(),
        "differences": differences,
    })
}

// ── retrieve ─────────────────────────────────────────────────────────

fn retrieve(layout: StoreLayout, format: OutputFormat, execution_id: &str) -> i32 {
    match RetrievalEngine::new(layout).retrieve(execution_id, None) {
        Ok(result) => {
            print_value(format, &serde_json::to_value(&result).unwrap_or_default());
            0
        }
        Err(StoreError::RecordNotFound(id)) => {
            eprintln!("no recorded execution {id}");
            1
        }
        Err(e) => {
            eprintln!("retrieval failed ({}): {e}", e.kind());
            1
        }
    }
}

// ── recovery ─────────────────────────────────────────────────────────

async fn recovery(layout: StoreLayout, format: OutputFormat, command: RecoveryCommands) -> i32 {
    let manager = RecoveryManager::new(layout.clone());
    match command {
        RecoveryCommands::Scan => {
            let analyses = match manager.scan(None) {
                Ok(analyses) => analyses,
                Err(e) => {
                    eprintln!("{e}");
                    return 2;
                }
            };
            let any_blocked = analyses
                .iter()
                .any(|a| a.decision == RecoveryDecision::Block);
            print_value(format, &serde_json::to_value(&analyses).unwrap_or_default());
            if any_blocked {
                2
            } else {
                0
            }
        }
        RecoveryCommands::Resume {
            execution_id,
            auth_token,
        } => {
            if read_only_mode() {
                eprintln!("INTENTUSNET_MODE=read_only: resume is not permitted");
                return 2;
            }
            if let Err(message) = authorize_destructive(
                &format!("resume execution {execution_id}"),
                auth_token.as_deref(),
            ) {
                eprintln!("{message}");
                return 2;
            }
            let analysis = match manager.analyze(&execution_id, None) {
                Ok(Some(analysis)) => analysis,
                Ok(None) => {
                    println!("execution {execution_id} is already terminal");
                    return 0;
                }
                Err(e) => {
                    eprintln!("{e}");
                    return 2;
                }
            };
            let registry = match agents::reference_registry() {
                Ok(registry) => registry,
                Err(e) => {
                    eprintln!("{e}");
                    return 2;
                }
            };
            let coordinator = RecoveryCoordinator::new(registry, layout, None);
            match coordinator.resume(&analysis).await {
                Ok(RecoveryOutcome::Resumed {
                    execution_id,
                    compensated_step,
                }) => {
                    print_value(
                        format,
                        &json!({
                            "executionId": execution_id,
                            "outcome": "resumed",
                            "compensatedStep": compensated_step,
                        }),
                    );
                    0
                }
                Ok(RecoveryOutcome::Blocked {
                    execution_id,
                    reason,
                }) => {
                    print_value(
                        format,
                        &json!({
                            "executionId": execution_id,
                            "outcome": "blocked",
                            "reason": reason,
                        }),
                    );
                    2
                }
                Err(e) => {
                    eprintln!("{e}");
                    2
                }
            }
        }
        RecoveryCommands::Abort {
            execution_id,
            reason,
            auth_token,
        } => {
            if read_only_mode() {
                eprintln!("INTENTUSNET_MODE=read_only: abort is not permitted");
                return 2;
            }
            if let Err(message) = authorize_destructive(
                &format!("abort execution {execution_id}"),
                auth_token.as_deref(),
            ) {
                eprintln!("{message}");
                return 2;
            }
            match manager.abort(&execution_id, &reason) {
                Ok(()) => {
                    print_value(
                        format,
                        &json!({"executionId": execution_id, "outcome": "aborted", "reason": reason}),
                    );
                    0
                }
                Err(e) => {
                    eprintln!("{e}");
                    2
                }
            }
        }
    }
}

// ── wal ──────────────────────────────────────────────────────────────

fn wal(layout: StoreLayout, format: OutputFormat, command: WalCommands) -> i32 {
    match command {
        WalCommands::Inspect { execution_id } => {
            let reader = match WalReader::load_execution(&layout.wal_dir(), &execution_id) {
                Ok(reader) => reader,
                Err(e) => {
                    eprintln!("{e}");
                    return 1;
                }
            };
            let rows: Vec<Value> = reader
                .entries()
                .iter()
                .map(|e| serde_json::to_value(e).unwrap_or_default())
                .collect();
            print_value(format, &Value::Array(rows));
            if let Some(seq) = reader.truncated_after() {
                eprintln!("warning: WAL truncated after seq {seq}");
            }
            0
        }
        WalCommands::Verify {
            execution_id,
            key_file,
            require_signatures,
        } => {
            let mut keys = KeyRegistry::new();
            for path in &key_file {
                if let Err(e) = keys.add_from_file(path) {
                    eprintln!("key file {}: {e}", path.display());
                    return 1;
                }
            }

            let ids = match execution_id {
                Some(id) => vec![id],
                None => match layout.list_executions() {
                    Ok(ids) => ids,
                    Err(e) => {
                        eprintln!("{e}");
                        return 1;
                    }
                },
            };

            let mut corrupted = false;
            let mut rows = Vec::new();
            for id in ids {
                let status = WalReader::load_execution(&layout.wal_dir(), &id)
                    .and_then(|reader| reader.verify(Some(&keys), require_signatures));
                match status {
                    Ok(()) => rows.push(json!({"executionId": id, "status": "verified"})),
                    Err(e) => {
                        corrupted = true;
                        rows.push(json!({
                            "executionId": id,
                            "status": "corrupted",
                            "subtype": e.integrity_kind().map(|k| k.as_str()),
                            "detail": e.to_string(),
                        }));
                    }
                }
            }
            print_value(format, &Value::Array(rows));
            if corrupted {
                1
            } else {
                0
            }
        }
    }
}

// ── records ──────────────────────────────────────────────────────────

fn records_verify(layout: StoreLayout, format: OutputFormat, command: RecordsCommands) -> i32 {
    let RecordsCommands::Verify { execution_id } = command;
    let store = RecordStore::new(&layout);
    let engine = RetrievalEngine::new(layout);

    let ids = match execution_id {
        Some(id) => vec![id],
        None => match store.list() {
            Ok(ids) => ids,
            Err(e) => {
                eprintln!("{e}");
                return 1;
            }
        },
    };

    let mut inconsistent = false;
    let mut rows = Vec::new();
    for id in ids {
        match engine.verify(&id, None) {
            Ok(()) => rows.push(json!({"executionId": id, "status": "consistent"})),
            Err(e) => {
                inconsistent = true;
                rows.push(json!({
                    "executionId": id,
                    "status": "inconsistent",
                    "kind": e.kind(),
                    "detail": e.to_string(),
                }));
            }
        }
    }
    print_value(format, &Value::Array(rows));
    if inconsistent {
        1
    } else {
        0
    }
}

// ── estimate ─────────────────────────────────────────────────────────

fn estimate(base_dir: &PathBuf, format: OutputFormat, envelope_path: &PathBuf, budget: f64) -> i32 {
    let envelope = match load_envelope(envelope_path) {
        Ok(env) => env,
        Err(message) => {
            eprintln!("{message}");
            return 1;
        }
    };
    let router = match build_router(base_dir, ModeArg::Standard, None, None) {
        Ok(router) => router,
        Err(message) => {
            eprintln!("{message}");
            return 1;
        }
    };

    match router.estimate_cost(&envelope) {
        None => {
            eprintln!("no registered agent matches intent {}", envelope.intent);
            1
        }
        Some(estimated) => {
            let within = estimated <= budget;
            print_value(
                format,
                &json!({
                    "intent": envelope.intent.to_string(),
                    "estimatedCost": estimated,
                    "budget": budget,
                    "withinBudget": within,
                }),
            );
            if within {
                0
            } else {
                1
            }
        }
    }
}

// ── environment helpers ──────────────────────────────────────────────

fn read_only_mode() -> bool {
    std::env::var("INTENTUSNET_MODE")
        .map(|v| v == "read_only")
        .unwrap_or(false)
}

/// Gate for destructive operations: bearer token match when
/// INTENTUSNET_AUTH_TOKEN is set, interactive confirmation unless
/// INTENTUSNET_AUTO_CONFIRM=1.
fn authorize_destructive(action: &str, provided_token: Option<&str>) -> Result<(), String> {
    if let Ok(required) = std::env::var("INTENTUSNET_AUTH_TOKEN") {
        if !required.is_empty() && provided_token != Some(required.as_str()) {
            return Err(format!(
                "{action}: --auth-token is required and must match INTENTUSNET_AUTH_TOKEN"
            ));
        }
    }

    let auto_confirm = std::env::var("INTENTUSNET_AUTO_CONFIRM")
        .map(|v| v == "1")
        .unwrap_or(false);
    if auto_confirm {
        return Ok(());
    }

    eprintln!("About to {action}. Type 'yes' to continue:");
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(|e| format!("cannot read confirmation: {e}"))?;
    if line.trim() == "yes" {
        Ok(())
    } else {
        Err(format!("{action}: not confirmed"))
    }
}
