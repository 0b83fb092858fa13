//! End-to-end reconciliation tests against the memory provider.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use common::{FailingReporter, TestEngine, acl_type, topic, topic_type};
use drift_engine::config::DELETE_ORPHANS;
use drift_engine::handler::NoopHandler;
use drift_engine::memory::MemoryCollector;
use drift_engine::report::ExclusionReason;
use drift_engine::transform::{ListConverter, Transformation};
use drift_engine::validation::NameRequired;
use drift_engine::{
    ChangeComputer, ChangeErrorKind, ChangeFilter, ChangeResult, ChangeStatus, Configuration,
    ConfigError, Controller, DefaultController, EngineError, MemoryBackend, Operation, Provider,
    ReconciliationContext, ReconciliationMode, RegistryBuilder, Resource, ResourceChange,
    ResourceType, Selectors, annotations,
};
use serde_json::json;

fn ops(list: &drift_engine::ChangeList) -> Vec<(String, Operation)> {
    list.changes
        .iter()
        .map(|c| (c.key.clone(), c.operation))
        .collect()
}

// =============================================================================
// Diff and example scenario
// =============================================================================

#[tokio::test]
async fn test_example_scenario() {
    let t = TestEngine::new();
    t.seed(&[topic("t1", 3)]).await;
    let expected = vec![topic("t1", 6), topic("t2", 1)];
    let ctx = ReconciliationContext::default();

    let diff = t
        .engine
        .get_diff(expected.clone(), &ChangeFilter::all(), &ctx)
        .await
        .unwrap();
    assert_eq!(
        ops(&diff),
        vec![("t1".into(), Operation::Update), ("t2".into(), Operation::Add)]
    );
    let partitions = &diff.changes[0].state_changes[0];
    assert_eq!(partitions.name, "partitions");
    assert_eq!(partitions.before, Some(json!(3)));
    assert_eq!(partitions.after, Some(json!(6)));

    let report = t
        .engine
        .reconcile(expected, ReconciliationMode::Create, &ctx)
        .await
        .unwrap();
    let applied: Vec<(&str, Operation)> = report
        .results
        .iter()
        .map(|r| (r.change.key.as_str(), r.change.operation))
        .collect();
    assert_eq!(applied, vec![("t2", Operation::Add)]);
    assert_eq!(t.partitions("t1").await, Some(3));
    assert_eq!(t.partitions("t2").await, Some(1));

    // The update the mode filtered out is still accounted for.
    assert_eq!(report.excluded.len(), 1);
    assert_eq!(report.excluded[0].name, "t1");
    assert_eq!(
        report.excluded[0].reason,
        ExclusionReason::Mode {
            operation: Operation::Update
        }
    );
    assert_eq!(report.summary().excluded, 1);
}

#[tokio::test]
async fn test_plan_is_idempotent() {
    let t = TestEngine::new();
    t.seed(&[topic("a", 1), topic("b", 2)]).await;
    let ctx = ReconciliationContext::default()
        .with_configuration(Configuration::new().with(DELETE_ORPHANS, true));
    let expected = vec![topic("b", 4), topic("c", 1)];

    let first = t
        .engine
        .get_diff(expected.clone(), &ChangeFilter::all(), &ctx)
        .await
        .unwrap();
    let second = t
        .engine
        .get_diff(expected, &ChangeFilter::all(), &ctx)
        .await
        .unwrap();
    assert_eq!(first.changes, second.changes);
    assert_eq!(t.backend.mutations(), 0);
}

#[tokio::test]
async fn test_full_reconcile_converges() {
    let t = TestEngine::new();
    t.seed(&[topic("a", 1), topic("b", 2), topic("orphan", 1)]).await;
    let ctx = ReconciliationContext::default()
        .with_configuration(Configuration::new().with(DELETE_ORPHANS, true));
    let expected = vec![topic("a", 1), topic("b", 5), topic("c", 3)];

    let report = t
        .engine
        .reconcile(expected.clone(), ReconciliationMode::Full, &ctx)
        .await
        .unwrap();
    assert!(report.is_success());
    let summary = report.summary();
    assert_eq!(summary.count(Operation::Add), 1);
    assert_eq!(summary.count(Operation::Update), 1);
    assert_eq!(summary.count(Operation::Delete), 1);
    assert_eq!(summary.count(Operation::None), 1);

    let diff = t
        .engine
        .get_diff(expected, &ChangeFilter::changed_only(), &ctx)
        .await
        .unwrap();
    assert!(diff.changes.is_empty());
    assert!(!diff.has_drift());
}

// =============================================================================
// Modes, dry run and annotations
// =============================================================================

#[tokio::test]
async fn test_mode_filtering() {
    let cases = [
        (ReconciliationMode::Create, vec![Operation::Add, Operation::None]),
        (ReconciliationMode::Update, vec![Operation::Update, Operation::None]),
        (ReconciliationMode::Delete, vec![Operation::Delete, Operation::None]),
    ];
    for (mode, expected_ops) in cases {
        let t = TestEngine::new();
        t.seed(&[topic("same", 1), topic("changed", 1), topic("orphan", 1)]).await;
        let ctx = ReconciliationContext::default()
            .with_configuration(Configuration::new().with(DELETE_ORPHANS, true));

        let report = t
            .engine
            .reconcile(
                vec![topic("same", 1), topic("changed", 2), topic("new", 1)],
                mode,
                &ctx,
            )
            .await
            .unwrap();
        let mut got: Vec<Operation> = report.results.iter().map(|r| r.change.operation).collect();
        got.sort();
        assert_eq!(got, expected_ops, "mode {}", mode);
    }
}

#[tokio::test]
async fn test_dry_run_is_a_no_op() {
    let t = TestEngine::new();
    t.seed(&[topic("t1", 3)]).await;
    let ctx = ReconciliationContext::dry_run();

    let report = t
        .engine
        .reconcile(vec![topic("t1", 6), topic("t2", 1)], ReconciliationMode::Full, &ctx)
        .await
        .unwrap();

    assert!(report.dry_run);
    assert_eq!(report.results.len(), 2);
    assert!(report.results.iter().all(|r| r.is_ok() && r.duration.is_zero()));
    assert_eq!(t.backend.mutations(), 0);
    assert_eq!(t.partitions("t1").await, Some(3));
    assert_eq!(*t.reporter.calls.lock().await, 0);
}

#[tokio::test]
async fn test_deletion_annotation_overrides() {
    let t = TestEngine::new();
    t.seed(&[topic("t1", 3)]).await;
    let ctx = ReconciliationContext::default();
    let expected = vec![
        topic("t1", 6).with_annotation(annotations::DELETE, "true"),
        topic("never-existed", 1).with_annotation(annotations::DELETE, "true"),
    ];

    let report = t
        .engine
        .reconcile(expected, ReconciliationMode::Full, &ctx)
        .await
        .unwrap();

    assert!(report.results.iter().all(|r| r.change.operation == Operation::Delete));
    // Deleting a resource that is already gone succeeds.
    assert!(report.is_success());
    assert!(t.backend.is_empty().await);
}

#[tokio::test]
async fn test_orphan_policy_toggle() {
    let t = TestEngine::new();
    t.seed(&[topic("keep", 1), topic("orphan", 1)]).await;

    let kept = t
        .engine
        .get_diff(vec![topic("keep", 1)], &ChangeFilter::all(), &ReconciliationContext::default())
        .await
        .unwrap();
    assert_eq!(ops(&kept), vec![("keep".into(), Operation::None)]);

    let ctx = ReconciliationContext::default()
        .with_configuration(Configuration::new().with(DELETE_ORPHANS, true));
    let deleted = t
        .engine
        .get_diff(vec![topic("keep", 1)], &ChangeFilter::all(), &ctx)
        .await
        .unwrap();
    assert_eq!(
        ops(&deleted),
        vec![("keep".into(), Operation::None), ("orphan".into(), Operation::Delete)]
    );
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_partial_failure_isolated() {
    let t = TestEngine::new();
    t.backend.poison("b").await;

    let report = t
        .engine
        .reconcile(
            vec![topic("a", 1), topic("b", 1), topic("c", 1)],
            ReconciliationMode::Full,
            &ReconciliationContext::default(),
        )
        .await
        .unwrap();

    let statuses: Vec<ChangeStatus> = report.results.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![ChangeStatus::Ok, ChangeStatus::Failed, ChangeStatus::Ok]
    );
    assert_eq!(report.results[1].errors[0].kind, ChangeErrorKind::Rejected);
    assert_eq!(report.failed().count(), 1);
    assert_eq!(t.partitions("c").await, Some(1));
}

#[tokio::test]
async fn test_unknown_type_is_fatal() {
    let t = TestEngine::new();
    let quota = ResourceType::new("kafka.drift.io", "v1", "Quota");

    let err = t
        .engine
        .reconcile(
            vec![topic("a", 1), Resource::new(&quota, "q")],
            ReconciliationMode::Full,
            &ReconciliationContext::default(),
        )
        .await
        .unwrap_err();

    match &err {
        EngineError::ControllerNotFound { resource_type } => assert_eq!(*resource_type, quota),
        other => panic!("expected ControllerNotFound, got {:?}", other),
    }
    assert!(err.to_string().contains("kafka.drift.io/v1/Quota"));
    // Resolution happens before any type is planned or executed.
    assert_eq!(t.backend.mutations(), 0);
}

fn thing_type() -> ResourceType {
    ResourceType::new("things.drift.io", "v1", "Thing")
}

/// Controller that plans normally but fails every execution.
struct BrokenController {
    resource_type: ResourceType,
}

#[async_trait]
impl Controller for BrokenController {
    fn resource_type(&self) -> &ResourceType {
        &self.resource_type
    }

    fn supported_modes(&self) -> &[ReconciliationMode] {
        &ReconciliationMode::ALL
    }

    async fn plan(
        &self,
        resources: Vec<Resource>,
        _context: &ReconciliationContext,
    ) -> drift_engine::Result<Vec<ResourceChange>> {
        ChangeComputer::new().compute(&self.resource_type, &[], &resources)
    }

    async fn execute(
        &self,
        _changes: Vec<ResourceChange>,
        _context: &ReconciliationContext,
    ) -> drift_engine::Result<Vec<ChangeResult>> {
        Err(EngineError::Config(ConfigError::TypeMismatch {
            key: "handler.timeout-secs".into(),
            expected: "integer",
        }))
    }
}

struct BrokenProvider;

impl Provider for BrokenProvider {
    fn name(&self) -> &str {
        "broken"
    }

    fn register(&self, registry: &mut RegistryBuilder) -> drift_engine::Result<()> {
        registry.controller(Arc::new(BrokenController {
            resource_type: thing_type(),
        }));
        Ok(())
    }
}

#[tokio::test]
async fn test_controller_failure_keeps_earlier_results() {
    let t = TestEngine::with_providers(vec![Arc::new(BrokenProvider)]);

    let report = t
        .engine
        .reconcile(
            vec![topic("t1", 1), Resource::new(&thing_type(), "x")],
            ReconciliationMode::Full,
            &ReconciliationContext::default(),
        )
        .await
        .unwrap();

    let outcomes: Vec<(&str, ChangeStatus)> = report
        .results
        .iter()
        .map(|r| (r.change.key.as_str(), r.status))
        .collect();
    assert_eq!(
        outcomes,
        vec![("t1", ChangeStatus::Ok), ("x", ChangeStatus::Failed)]
    );
    assert_eq!(report.results[1].errors[0].kind, ChangeErrorKind::Controller);
    assert!(report.results[1].errors[0].message.contains("handler.timeout-secs"));
    assert!(!report.is_success());

    assert_eq!(t.backend.mutations(), 1);
    assert_eq!(t.partitions("t1").await, Some(1));
    assert_eq!(*t.reporter.calls.lock().await, 1);
    assert_eq!(
        *t.reporter.reported.lock().await,
        vec!["t1".to_string(), "x".to_string()]
    );
}

/// Registers a Create-only controller for a dedicated type.
struct CreateOnlyProvider {
    backend: Arc<MemoryBackend>,
}

fn schema_type() -> ResourceType {
    ResourceType::new("registry.drift.io", "v1", "Schema")
}

impl Provider for CreateOnlyProvider {
    fn name(&self) -> &str {
        "create-only"
    }

    fn register(&self, registry: &mut RegistryBuilder) -> drift_engine::Result<()> {
        let controller = DefaultController::builder(Arc::new(MemoryCollector::new(
            schema_type(),
            Arc::clone(&self.backend),
        )))
        .handler(NoopHandler::shared([Operation::Add]))
        .modes([ReconciliationMode::Create])
        .build()?;
        registry.controller(Arc::new(controller));
        Ok(())
    }
}

#[tokio::test]
async fn test_unsupported_mode_is_rejected() {
    let t = TestEngine::with_providers(vec![Arc::new(CreateOnlyProvider {
        backend: Arc::new(MemoryBackend::new()),
    })]);

    let err = t
        .engine
        .reconcile(
            vec![topic("a", 1), Resource::new(&schema_type(), "s")],
            ReconciliationMode::Full,
            &ReconciliationContext::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::UnsupportedMode { mode: ReconciliationMode::Full, .. }
    ));
    assert_eq!(t.backend.mutations(), 0);

    let report = t
        .engine
        .reconcile(
            vec![Resource::new(&schema_type(), "s")],
            ReconciliationMode::Create,
            &ReconciliationContext::default(),
        )
        .await
        .unwrap();
    assert!(report.is_success());
}

struct ValidationProvider;

impl Provider for ValidationProvider {
    fn name(&self) -> &str {
        "validation"
    }

    fn register(&self, registry: &mut RegistryBuilder) -> drift_engine::Result<()> {
        registry
            .validation(Arc::new(NameRequired))
            .validation(Arc::new(
                drift_engine::validation::RequiredSpecFields::new(topic_type(), &["partitions"]),
            ));
        Ok(())
    }
}

#[tokio::test]
async fn test_validation_errors_aggregated_and_abort() {
    let t = TestEngine::with_providers(vec![Arc::new(ValidationProvider)]);
    let invalid = vec![
        topic("ok", 1),
        topic("", 1),
        Resource::new(&topic_type(), "no-partitions"),
    ];

    let result = t
        .engine
        .validate(invalid.clone(), &ReconciliationContext::default())
        .await
        .unwrap();
    assert_eq!(result.errors.len(), 2);

    let err = t
        .engine
        .reconcile(invalid, ReconciliationMode::Full, &ReconciliationContext::default())
        .await
        .unwrap_err();
    match err {
        EngineError::Validation(result) => assert_eq!(result.errors.len(), 2),
        other => panic!("expected validation error, got {:?}", other),
    }
    assert!(t.backend.is_empty().await);
}

// =============================================================================
// Selection, exclusions and reporting
// =============================================================================

#[tokio::test]
async fn test_every_input_is_accounted_for() {
    let t = TestEngine::new();
    let ctx = ReconciliationContext::default()
        .with_selectors(Selectors::parse(["metadata.labels.team=data"]).unwrap());

    let report = t
        .engine
        .reconcile(
            vec![
                topic("selected", 1).with_label("team", "data"),
                topic("other-team", 1).with_label("team", "web"),
                topic("scratch", 1)
                    .with_label("team", "data")
                    .with_annotation(annotations::TRANSIENT, "true"),
            ],
            ReconciliationMode::Full,
            &ctx,
        )
        .await
        .unwrap();

    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].change.key, "selected");
    let excluded: Vec<(&str, &ExclusionReason)> = report
        .excluded
        .iter()
        .map(|e| (e.name.as_str(), &e.reason))
        .collect();
    assert_eq!(
        excluded,
        vec![
            ("other-team", &ExclusionReason::Selector),
            ("scratch", &ExclusionReason::Transient),
        ]
    );
}

struct DropScratch;

impl Transformation for DropScratch {
    fn name(&self) -> &str {
        "drop-scratch"
    }

    fn transform(
        &self,
        resource: Resource,
        _context: &ReconciliationContext,
    ) -> Result<Option<Resource>, String> {
        if resource.name().starts_with("scratch-") {
            Ok(None)
        } else {
            Ok(Some(resource.with_label("managed-by", "drift")))
        }
    }
}

struct PipelineProvider;

impl Provider for PipelineProvider {
    fn name(&self) -> &str {
        "pipeline"
    }

    fn register(&self, registry: &mut RegistryBuilder) -> drift_engine::Result<()> {
        registry
            .converter(Arc::new(ListConverter))
            .transformation(Arc::new(DropScratch));
        Ok(())
    }
}

#[tokio::test]
async fn test_conversion_and_transformation_run_before_selection() {
    let t = TestEngine::with_providers(vec![Arc::new(PipelineProvider)]);
    let list: Resource = serde_json::from_value(json!({
        "apiVersion": "v1",
        "kind": "List",
        "metadata": {"name": "bundle"},
        "spec": {"items": [
            {
                "apiVersion": "kafka.drift.io/v1",
                "kind": "Topic",
                "metadata": {"name": "orders"},
                "spec": {"partitions": 3}
            },
            {
                "apiVersion": "kafka.drift.io/v1",
                "kind": "Topic",
                "metadata": {"name": "scratch-1"},
                "spec": {"partitions": 1}
            }
        ]}
    }))
    .unwrap();
    // Selects on a label added by the transformation.
    let ctx = ReconciliationContext::default()
        .with_selectors(Selectors::parse(["metadata.labels.managed-by=drift"]).unwrap());

    let report = t
        .engine
        .reconcile(vec![list], ReconciliationMode::Full, &ctx)
        .await
        .unwrap();

    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].change.key, "orders");
    assert_eq!(
        report.excluded[0].reason,
        ExclusionReason::Transformation {
            name: "drop-scratch".into()
        }
    );
    let stored = t.backend.get(&topic_type(), "orders").await.unwrap();
    assert_eq!(stored.label("managed-by"), Some("drift"));
}

#[tokio::test]
async fn test_no_report_changes_are_not_reported() {
    let t = TestEngine::new();
    let report = t
        .engine
        .reconcile(
            vec![
                topic("loud", 1),
                topic("quiet", 1).with_annotation(annotations::NO_REPORT, "true"),
            ],
            ReconciliationMode::Full,
            &ReconciliationContext::default(),
        )
        .await
        .unwrap();

    assert_eq!(report.results.len(), 2);
    assert_eq!(*t.reporter.reported.lock().await, vec!["loud".to_string()]);
}

#[tokio::test]
async fn test_reporter_failure_does_not_fail_run() {
    let backend = Arc::new(MemoryBackend::new());
    let engine = drift_engine::Engine::new(drift_engine::ProviderRegistry::new(vec![Arc::new(
        drift_engine::MemoryProvider::new(Arc::clone(&backend), vec![topic_type()]),
    )]))
    .with_reporter(Arc::new(FailingReporter));

    let report = engine
        .reconcile(
            vec![topic("a", 1)],
            ReconciliationMode::Full,
            &ReconciliationContext::default(),
        )
        .await
        .unwrap();
    assert!(report.is_success());
    assert_eq!(backend.mutations(), 1);
}

#[tokio::test]
async fn test_types_execute_in_input_order() {
    let t = TestEngine::new();
    let acl = Resource::new(&acl_type(), "orders-read").with_spec(json!({"principal": "User:a"}));

    let report = t
        .engine
        .reconcile(
            vec![acl, topic("orders", 1)],
            ReconciliationMode::Full,
            &ReconciliationContext::default(),
        )
        .await
        .unwrap();
    let kinds: Vec<&str> = report
        .results
        .iter()
        .map(|r| r.change.resource_type.kind.as_str())
        .collect();
    assert_eq!(kinds, vec!["Acl", "Topic"]);
}
