//! Integration tests for Water
//!
//! These drive the coordinator through its public API with scripted
//! collaborators and exercise the `water` binary's offline subcommands.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_cmd::Command;
use async_trait::async_trait;
use predicates::prelude::*;
use serde_json::{Value, json};
use tempfile::TempDir;

use water::collaborator::{
    ApplyReply, CollaboratorError, CollaboratorRegistry, GuidelineComponent, ReadinessReply, TargetComponent,
    VerifyReply,
};
use water::config::{Config, GraphConfig};
use water::domain::{
    Change, Concern, ConcernKind, FailureStage, PropagationContext, PropagationRecord, RunStatus, ValidationResult,
};
use water::events::{EventBus, read_run_events, spawn_event_logger};
use water::graph::StaticGraph;
use water::oracle::{Oracle, OracleError, PromptKind};
use water::propagation::{CancelHandle, Coordinator, RunControl};
use water::state::{StateManager, keys};

const TARGETS: [&str; 3] = ["environmental_analysis", "root_system", "tree_placement"];

// =============================================================================
// Test doubles
// =============================================================================

type CallLog = Arc<Mutex<Vec<String>>>;

/// Oracle that is never available but counts how often it was asked
#[derive(Default)]
struct CountingOracle {
    calls: AtomicUsize,
}

#[async_trait]
impl Oracle for CountingOracle {
    async fn generate(&self, _kind: PromptKind, _context: &Value) -> Result<Value, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(OracleError::Unavailable)
    }
}

/// Oracle that answers every prompt after a second and is never satisfied
#[derive(Default)]
struct SlowOracle {
    calls: AtomicUsize,
}

#[async_trait]
impl Oracle for SlowOracle {
    async fn generate(&self, kind: PromptKind, context: &Value) -> Result<Value, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(1)).await;
        Ok(match kind {
            PromptKind::PropagationAnalysis => json!({"propagation_analysis": {"propagation_order": []}}),
            PromptKind::ContextGeneration => json!({"rich_context": {"summary": "draft"}}),
            PromptKind::AdaptationGuidance => json!({"adaptation_guidance": {"steps": []}}),
            PromptKind::Reflection => json!({"reflection_results": {
                "overall_assessment": {"decision_quality_score": 3},
                "critical_improvements": [{"aspect": "coverage"}]
            }}),
            PromptKind::Revision => json!({"revision_results": {
                "revised_output": context["output_result"].clone(),
                "revision_summary": {
                    "confidence": {"score": 4},
                    "decision_changes": {"significant_content_changes": true}
                }
            }}),
        })
    }
}

#[derive(Default)]
struct Behavior {
    not_ready: bool,
    readiness_delay: Option<Duration>,
    apply_failure: Option<String>,
    cancel_on_readiness: Option<CancelHandle>,
    cancel_on_apply: Option<CancelHandle>,
}

struct RecordingComponent {
    id: String,
    log: CallLog,
    behavior: Behavior,
}

#[async_trait]
impl TargetComponent for RecordingComponent {
    fn id(&self) -> &str {
        &self.id
    }

    async fn check_readiness(
        &self,
        _origin_id: &str,
        _context: &PropagationContext,
    ) -> Result<ReadinessReply, CollaboratorError> {
        self.log.lock().unwrap().push(format!("readiness:{}", self.id));
        if let Some(handle) = &self.behavior.cancel_on_readiness {
            handle.cancel();
        }
        if let Some(delay) = self.behavior.readiness_delay {
            tokio::time::sleep(delay).await;
        }
        if self.behavior.not_ready {
            return Ok(ReadinessReply::not_ready(vec![Concern::new(
                ConcernKind::ComponentState,
                "busy with another update",
            )]));
        }
        Ok(ReadinessReply::ready())
    }

    async fn apply_update(
        &self,
        _origin_id: &str,
        _context: &PropagationContext,
        _guidance: Option<&Value>,
        _change: &Change,
    ) -> Result<ApplyReply, CollaboratorError> {
        self.log.lock().unwrap().push(format!("apply:{}", self.id));
        if let Some(handle) = &self.behavior.cancel_on_apply {
            handle.cancel();
        }
        match &self.behavior.apply_failure {
            Some(reason) => Ok(ApplyReply::failed(reason.clone())),
            None => Ok(ApplyReply::applied()),
        }
    }

    async fn verify_update(&self, _update_id: &str) -> Result<VerifyReply, CollaboratorError> {
        self.log.lock().unwrap().push(format!("verify:{}", self.id));
        Ok(VerifyReply::verified())
    }
}

struct Harness {
    coordinator: Coordinator,
    oracle: Arc<CountingOracle>,
    state: StateManager,
    log: CallLog,
}

fn harness_with(config: Config, mut behavior: impl FnMut(&str) -> Behavior) -> Harness {
    let log: CallLog = Arc::new(Mutex::new(Vec::new()));
    let mut registry = CollaboratorRegistry::new();
    for target in TARGETS {
        registry.register(Arc::new(RecordingComponent {
            id: target.to_string(),
            log: log.clone(),
            behavior: behavior(target),
        }));
    }
    let oracle = Arc::new(CountingOracle::default());
    let state = StateManager::spawn_memory();
    let coordinator = Coordinator::new(
        &config,
        Arc::new(StaticGraph::from_config(&config.graph)),
        oracle.clone(),
        state.clone(),
        Arc::new(EventBus::with_default_capacity()),
        registry,
    );
    Harness {
        coordinator,
        oracle,
        state,
        log,
    }
}

fn harness(behavior: impl FnMut(&str) -> Behavior) -> Harness {
    harness_with(Config::default(), behavior)
}

fn change(origin: &str, payload: Value) -> Change {
    Change::new(origin, payload, ValidationResult::approved())
}

fn calls(log: &CallLog, prefix: &str) -> Vec<String> {
    log.lock()
        .unwrap()
        .iter()
        .filter(|c| c.starts_with(prefix))
        .cloned()
        .collect()
}

// =============================================================================
// Coordinator Tests
// =============================================================================

#[tokio::test]
async fn test_leaf_origin_contacts_nobody() {
    let h = harness(|_| Behavior::default());

    let record = h
        .coordinator
        .coordinate(&change("tree_placement", json!({"update_id": "upd-leaf"})))
        .await
        .unwrap();

    assert!(record.success);
    assert_eq!(record.metrics.affected_count, 0);
    assert!(record.outcomes.is_empty());
    assert!(record.failures.is_empty());
    assert_eq!(h.oracle.calls.load(Ordering::SeqCst), 0);
    assert!(h.log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_one_not_ready_target_blocks_every_apply() {
    let h = harness(|target| Behavior {
        not_ready: target == "environmental_analysis",
        ..Default::default()
    });

    let record = h
        .coordinator
        .coordinate(&change("garden_planner", json!({"interfaces": ["soil"]})))
        .await
        .unwrap();

    assert_eq!(record.status, RunStatus::Rejected);
    assert!(!record.success);
    assert!(record.outcomes.is_empty());
    assert_eq!(record.failures.len(), 1);
    assert_eq!(record.failures[0].target, "environmental_analysis");
    assert_eq!(record.failures[0].concerns[0].kind, ConcernKind::ComponentState);
    assert_eq!(record.skipped, vec!["root_system", "tree_placement"]);
    assert_eq!(calls(&h.log, "readiness:").len(), 3);
    assert!(calls(&h.log, "apply:").is_empty());
}

#[tokio::test]
async fn test_failed_apply_does_not_stop_later_targets() {
    let h = harness(|target| Behavior {
        apply_failure: (target == "root_system").then(|| "incompatible soil schema".to_string()),
        ..Default::default()
    });

    let record = h
        .coordinator
        .coordinate(&change("garden_planner", json!({})))
        .await
        .unwrap();

    assert_eq!(record.status, RunStatus::Failed);
    assert!(!record.success);
    assert_eq!(
        record.outcomes.keys().collect::<Vec<_>>(),
        vec!["environmental_analysis", "tree_placement"]
    );
    let failure = record.failure_for("root_system").unwrap();
    assert_eq!(failure.stage, FailureStage::Apply);
    assert_eq!(failure.reason, "incompatible soil schema");
    assert_eq!(record.metrics.success_count, 2);
    assert_eq!(record.metrics.failure_count, 1);
    assert!(record.is_partitioned());
}

#[tokio::test]
async fn test_static_order_without_oracle() {
    let h = harness(|_| Behavior::default());

    let record = h
        .coordinator
        .coordinate(&change("garden_planner", json!({})))
        .await
        .unwrap();

    assert!(record.success);
    assert_eq!(
        calls(&h.log, "apply:"),
        vec!["apply:environmental_analysis", "apply:root_system", "apply:tree_placement"]
    );
    assert!(h.oracle.calls.load(Ordering::SeqCst) > 0);
}

#[tokio::test(start_paused = true)]
async fn test_readiness_timeout_counts_as_not_ready() {
    let mut config = Config::default();
    config.coordinator.collaborator_timeout_ms = 1_000;
    let h = harness_with(config, |target| Behavior {
        readiness_delay: (target == "root_system").then_some(Duration::from_secs(60)),
        ..Default::default()
    });

    let record = h
        .coordinator
        .coordinate(&change("garden_planner", json!({})))
        .await
        .unwrap();

    assert_eq!(record.status, RunStatus::Rejected);
    let failure = record.failure_for("root_system").unwrap();
    assert_eq!(failure.concerns[0].kind, ConcernKind::SystemError);
    assert!(failure.concerns[0].description.contains("timed out"));
    assert_eq!(
        calls(&h.log, "readiness:"),
        vec![
            "readiness:environmental_analysis",
            "readiness:root_system",
            "readiness:tree_placement"
        ]
    );
    assert!(calls(&h.log, "apply:").is_empty());
}

#[tokio::test]
async fn test_cancel_mid_commit_verifies_applied_target() {
    let (control, handle) = RunControl::new(None);
    let h = harness(|target| Behavior {
        cancel_on_apply: (target == "environmental_analysis").then(|| handle.clone()),
        ..Default::default()
    });

    let record = h
        .coordinator
        .coordinate_with(&change("garden_planner", json!({})), &control)
        .await
        .unwrap();

    assert_eq!(record.status, RunStatus::Cancelled);
    assert!(!record.success);
    assert!(record.outcomes.contains_key("environmental_analysis"));
    assert_eq!(record.failures.len(), 2);
    assert!(record.failures.iter().all(|f| f.stage == FailureStage::Cancelled));
    assert_eq!(
        calls(&h.log, "apply:").len() + calls(&h.log, "verify:").len(),
        2,
        "only the first target is applied and verified"
    );
}

#[tokio::test]
async fn test_cancel_during_readiness_keeps_partial_snapshot() {
    let (control, handle) = RunControl::new(None);
    let h = harness(|target| Behavior {
        cancel_on_readiness: (target == "environmental_analysis").then(|| handle.clone()),
        ..Default::default()
    });

    let record = h
        .coordinator
        .coordinate_with(&change("garden_planner", json!({})), &control)
        .await
        .unwrap();

    assert_eq!(record.status, RunStatus::Cancelled);
    assert!(record.outcomes.is_empty());
    assert_eq!(record.skipped.len(), 3);
    assert_eq!(calls(&h.log, "readiness:"), vec!["readiness:environmental_analysis"]);

    let snapshot: Value = h
        .state
        .get_json(&keys::readiness(&record.request_id))
        .await
        .unwrap()
        .expect("partial readiness snapshot");
    let targets: Vec<&String> = snapshot.as_object().unwrap().keys().collect();
    assert_eq!(targets, ["environmental_analysis"]);
    assert_eq!(snapshot["environmental_analysis"]["ready"], true);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_bounds_slow_oracle() {
    let mut config = Config::default();
    config.coordinator.run_deadline_ms = Some(2_500);
    let log: CallLog = Arc::new(Mutex::new(Vec::new()));
    let mut registry = CollaboratorRegistry::new();
    for target in TARGETS {
        registry.register(Arc::new(RecordingComponent {
            id: target.to_string(),
            log: log.clone(),
            behavior: Behavior::default(),
        }));
    }
    let oracle = Arc::new(SlowOracle::default());
    let coordinator = Coordinator::new(
        &config,
        Arc::new(StaticGraph::from_config(&config.graph)),
        oracle.clone(),
        StateManager::spawn_memory(),
        Arc::new(EventBus::with_default_capacity()),
        registry,
    );
    let started = tokio::time::Instant::now();

    let record = coordinator
        .coordinate(&change("garden_planner", json!({})))
        .await
        .unwrap();

    assert_eq!(record.status, RunStatus::Cancelled);
    assert_eq!(record.skipped.len(), 3);
    // analysis, reflection, revision; the next reflection would start past the deadline
    assert_eq!(oracle.calls.load(Ordering::SeqCst), 3);
    assert!(started.elapsed() <= Duration::from_secs(3));
    assert!(log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_snapshots_written_at_phase_boundaries() {
    let h = harness(|_| Behavior::default());
    let record = h
        .coordinator
        .coordinate(&change("garden_planner", json!({})))
        .await
        .unwrap();
    let id = &record.request_id;

    assert!(h.state.get(&keys::request(id)).await.unwrap().is_some());
    assert!(h.state.get(&keys::readiness(id)).await.unwrap().is_some());
    for target in TARGETS {
        assert!(h.state.get(&keys::context(id, target)).await.unwrap().is_some());
    }
    let stored = h.coordinator.load_record(id).await.unwrap();
    assert_eq!(stored, Some(record));
}

// =============================================================================
// Durable store and event log
// =============================================================================

#[tokio::test]
async fn test_guideline_components_over_sqlite() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db = temp_dir.path().join("state.db");
    let config = Config::default();
    let graph = StaticGraph::from_config(&GraphConfig::default());

    let state = StateManager::spawn_sqlite(&db).unwrap();
    let mut registry = CollaboratorRegistry::new();
    for target in TARGETS {
        registry.register(Arc::new(GuidelineComponent::new(target, state.clone())));
    }
    let bus = Arc::new(EventBus::with_default_capacity());
    let logger = spawn_event_logger(bus.clone(), temp_dir.path().join("runs"));
    let coordinator = Coordinator::new(
        &config,
        Arc::new(graph),
        Arc::new(CountingOracle::default()),
        state.clone(),
        bus.clone(),
        registry,
    );

    let payload = json!({
        "update_id": "upd-soil",
        "interfaces": {"soil": "v2"},
        "dependencies": ["irrigation"]
    });
    let record = coordinator.coordinate(&change("garden_planner", payload)).await.unwrap();
    assert!(record.success, "record: {:?}", record);
    assert_eq!(record.metrics.success_count, 3);

    drop(coordinator);
    drop(bus);
    tokio::time::timeout(Duration::from_secs(5), logger)
        .await
        .expect("logger should stop once the bus is gone")
        .unwrap();
    state.shutdown().await.unwrap();

    // Reopen the database and read everything back
    let reopened = StateManager::spawn_sqlite(&db).unwrap();
    let stored: PropagationRecord = reopened.require_json(&keys::result(&record.request_id)).await.unwrap();
    assert_eq!(stored, record);
    let guideline = reopened.get(&keys::guideline("root_system")).await.unwrap().unwrap();
    assert_eq!(guideline["interfaces"], json!({"soil": "v2"}));
    assert_eq!(guideline["dependencies"], json!(["irrigation"]));

    let events = read_run_events(temp_dir.path().join("runs"), &record.request_id).unwrap();
    let types: Vec<&str> = events.iter().map(|e| e.event.event_type()).collect();
    assert_eq!(types.first(), Some(&"propagation.requested"));
    assert_eq!(types.last(), Some(&"propagation.completed"));
    assert!(types.contains(&"propagation.phase"));
}

// =============================================================================
// CLI Tests
// =============================================================================

fn water(temp_dir: &TempDir) -> Command {
    let config = temp_dir.path().join("water.yml");
    if !config.exists() {
        let storage = format!(
            "storage:\n  path: {}\n  events-dir: {}\noracle:\n  mode: offline\n",
            temp_dir.path().join("state.db").display(),
            temp_dir.path().join("runs").display()
        );
        std::fs::write(&config, storage).unwrap();
    }
    let mut cmd = Command::cargo_bin("water").unwrap();
    cmd.env("XDG_DATA_HOME", temp_dir.path())
        .env("NO_COLOR", "1")
        .arg("--config")
        .arg(&config);
    cmd
}

#[test]
fn test_cli_graph() {
    let temp_dir = TempDir::new().unwrap();
    water(&temp_dir)
        .args(["graph", "garden_planner"])
        .assert()
        .success()
        .stdout(predicate::str::contains("environmental_analysis"))
        .stdout(predicate::str::contains("tree_placement"))
        .stdout(predicate::str::contains("Static order:"));
}

#[test]
fn test_cli_graph_unknown_component() {
    let temp_dir = TempDir::new().unwrap();
    water(&temp_dir)
        .args(["graph", "weather_station"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown component"));
}

#[test]
fn test_cli_run_then_show() {
    let temp_dir = TempDir::new().unwrap();
    let change_file = temp_dir.path().join("change.yml");
    std::fs::write(
        &change_file,
        concat!(
            "origin_id: root_system\npayload:\n  update_id: upd-cli\n  behavior: deeper roots\n",
            "validation_result:\n  validation_category: approved\n",
        ),
    )
    .unwrap();

    let output = water(&temp_dir)
        .args(["run", "--offline", "--format", "json", "--change"])
        .arg(&change_file)
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let record: PropagationRecord = serde_json::from_slice(&output.stdout).unwrap();
    assert!(record.success);
    assert_eq!(record.affected, vec!["tree_placement"]);

    water(&temp_dir)
        .args(["show", &record.request_id])
        .assert()
        .success()
        .stdout(predicate::str::contains(record.request_id.as_str()))
        .stdout(predicate::str::contains("succeeded"));
}
