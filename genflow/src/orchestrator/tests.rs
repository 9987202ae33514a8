use super::*;
use crate::core::{FailPolicy, QualityReason, QualityStatus, StageName};
use crate::errors::PersistenceError;
use crate::events::CollectingEventSink;
use crate::ports::{InMemoryRunRepository, MockArtifactRepository, QualityVerdict};
use crate::testing::{
    test_config, FakeGenerationProvider, FakeMetadataClient, FakeQualityGate, TestPorts,
};
use async_trait::async_trait;
use pretty_assertions::assert_eq;
use std::sync::atomic::AtomicUsize;

struct Harness {
    ports: TestPorts,
    sink: Arc<CollectingEventSink>,
    orchestrator: Orchestrator,
    dir: tempfile::TempDir,
}

fn harness(ports: TestPorts) -> Harness {
    let sink = Arc::new(CollectingEventSink::new());
    let orchestrator = Orchestrator::builder(
        ports.artifacts.clone(),
        ports.runs.clone(),
        ports.provider.clone(),
        ports.image_ops.clone(),
    )
    .with_stage_ports(ports.stage_ports())
    .with_quality_gate(ports.quality_gate.clone())
    .with_event_sink(sink.clone())
    .with_cleanup_timeout(Duration::from_secs(1))
    .build();

    Harness {
        ports,
        sink,
        orchestrator,
        dir: tempfile::tempdir().unwrap(),
    }
}

impl Harness {
    fn config(&self) -> JobConfig {
        test_config(self.dir.path())
    }

    async fn wait_for_generation_calls(&self, n: usize) {
        for _ in 0..200 {
            if self.ports.provider.call_count() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("provider never received {n} calls");
    }
}

/// Run store that refuses to record a terminal status.
struct TerminalWriteFails(Arc<InMemoryRunRepository>);

#[async_trait]
impl RunRepository for TerminalWriteFails {
    async fn save(&self, run: &Run) -> Result<()> {
        self.0.save(run).await
    }

    async fn update(&self, run: &Run) -> Result<()> {
        if run.status.is_terminal() {
            return Err(PersistenceError::new("run", run.id, "disk full").into());
        }
        self.0.update(run).await
    }

    async fn update_statistics(&self, id: Uuid, successful_items: u32, failed_items: u32) -> Result<()> {
        self.0.update_statistics(id, successful_items, failed_items).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<Run>> {
        self.0.get(id).await
    }
}

#[tokio::test]
async fn test_run_processes_count_times_variations() {
    let h = harness(TestPorts::new());
    let mut config = h.config();
    config.generation.count = 2;
    config.generation.variations = 3;

    let run = h.orchestrator.start(config).await.unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.total_items, 6);
    assert_eq!(run.successful_items, 6);
    assert_eq!(run.failed_items, 0);
    assert_eq!(h.ports.provider.call_count(), 6);
    assert_eq!(h.ports.runs.statistics_writes(), 6);

    let artifacts = h.ports.artifacts.by_run(run.id);
    assert_eq!(artifacts.len(), 6);
    for artifact in &artifacts {
        assert_eq!(artifact.quality_status, QualityStatus::Approved);
        let final_path = artifact.final_path.as_ref().unwrap();
        assert!(final_path.starts_with(h.dir.path().join("out")));
    }

    assert_eq!(h.sink.events_of_type("item-completed").len(), 6);
    assert_eq!(h.sink.terminal_count(), 1);
    assert_eq!(h.orchestrator.get_status().state, OrchestratorState::Completed);

    let stored = h.ports.runs.snapshot(run.id).unwrap();
    assert_eq!(stored.status, RunStatus::Completed);
    assert!(stored.resolved_items() <= stored.total_items);
}

#[tokio::test]
async fn test_snapshot_is_redacted() {
    let h = harness(TestPorts::new());
    let run = h.orchestrator.start(h.config()).await.unwrap();

    let snapshot = run.config_snapshot.to_string();
    assert!(!snapshot.contains("test-generation-key"));
    assert_eq!(run.config_fingerprint.len(), 64);
}

#[tokio::test]
async fn test_every_result_becomes_an_artifact() {
    let h = harness(TestPorts::new().with_provider(FakeGenerationProvider::new().with_results_per_call(3)));

    let run = h.orchestrator.start(h.config()).await.unwrap();

    assert_eq!(run.successful_items, 1);
    match &h.sink.events_of_type("item-completed")[0] {
        GenflowEvent::ItemCompleted { artifact_ids, .. } => assert_eq!(artifact_ids.len(), 3),
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn test_generation_is_retried() {
    let h = harness(TestPorts::new().with_provider(FakeGenerationProvider::new().with_failures(2)));
    let mut config = h.config();
    config.generation.retry_attempts = 3;

    let run = h.orchestrator.start(config).await.unwrap();

    assert_eq!(run.successful_items, 1);
    assert_eq!(h.ports.provider.call_count(), 3);
}

#[tokio::test]
async fn test_exhausted_retries_fail_the_item() {
    let h = harness(TestPorts::new().with_provider(FakeGenerationProvider::failing()));
    let mut config = h.config();
    config.generation.count = 2;
    config.generation.retry_attempts = 2;

    let run = h.orchestrator.start(config).await.unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.failed_items, 2);
    assert_eq!(h.ports.provider.call_count(), 4);
    assert!(h.ports.artifacts.is_empty());

    let failed = h.sink.events_of_type("item-failed");
    assert_eq!(failed.len(), 2);
    match &failed[0] {
        GenflowEvent::ItemFailed { reason, error, .. } => {
            assert_eq!(reason, "generation_failed");
            assert!(error.as_deref().unwrap().contains("service unavailable"));
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn test_soft_enhancement_failure_still_approves() {
    let h = harness(TestPorts::new());
    h.ports.image_ops.fail_on("sharpen");
    let mut config = h.config();
    config.processing.settings.image_enhancement = true;
    config.processing.settings.image_convert = true;
    config.processing.fail_policy = FailPolicy::strict([StageName::Conversion]);

    let run = h.orchestrator.start(config).await.unwrap();

    assert_eq!(run.successful_items, 1);
    let artifact = &h.ports.artifacts.by_run(run.id)[0];
    assert_eq!(artifact.quality_status, QualityStatus::Approved);
    assert!(h.ports.image_ops.calls().contains(&"convert:png".to_string()));
}

#[tokio::test]
async fn test_hard_conversion_failure_rejects_artifact() {
    let h = harness(TestPorts::new());
    h.ports.image_ops.fail_on("convert");
    let mut config = h.config();
    config.processing.settings.image_enhancement = true;
    config.processing.settings.image_convert = true;
    config.processing.fail_policy = FailPolicy::strict([StageName::Conversion]);

    let run = h.orchestrator.start(config).await.unwrap();

    assert_eq!(run.failed_items, 1);
    let artifact = &h.ports.artifacts.by_run(run.id)[0];
    assert_eq!(artifact.quality_status, QualityStatus::QcFailed);
    assert_eq!(
        artifact.quality_reason.as_deref(),
        Some("processing_failed:conversion")
    );
    assert!(artifact.final_path.is_none());
    assert!(!h.ports.image_ops.calls().contains(&"place".to_string()));
}

#[tokio::test]
async fn test_inactive_stage_never_hard_fails() {
    let h = harness(TestPorts::new());
    h.ports.image_ops.fail_on("convert");
    let mut config = h.config();
    config.processing.fail_policy = FailPolicy::strict([StageName::Conversion]);

    let run = h.orchestrator.start(config).await.unwrap();

    assert_eq!(run.successful_items, 1);
}

#[tokio::test]
async fn test_quality_rejection() {
    let h = harness(TestPorts::new().with_quality_gate(FakeQualityGate::rejecting("blurry")));
    let mut config = h.config();
    config.ai.quality_check = true;

    let run = h.orchestrator.start(config).await.unwrap();

    assert_eq!(run.failed_items, 1);
    let artifact = &h.ports.artifacts.by_run(run.id)[0];
    assert_eq!(artifact.quality_status, QualityStatus::QcFailed);
    assert_eq!(artifact.quality_reason.as_deref(), Some("qc_rejected:blurry"));
    assert!(artifact.final_path.is_none());

    match &h.sink.events_of_type("item-failed")[0] {
        GenflowEvent::ItemFailed { reason, .. } => assert_eq!(reason, "qc_rejected:blurry"),
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn test_quality_gate_error_and_timeout() {
    let h = harness(
        TestPorts::new()
            .with_quality_gate(FakeQualityGate::failing().with_delay(Duration::from_millis(1))),
    );
    let mut config = h.config();
    config.ai.quality_check = true;

    let run = h.orchestrator.start(config).await.unwrap();
    let artifact = &h.ports.artifacts.by_run(run.id)[0];
    assert_eq!(artifact.quality_reason.as_deref(), Some("qc_error"));

    let h = harness(
        TestPorts::new()
            .with_quality_gate(FakeQualityGate::passing().with_delay(Duration::from_millis(200))),
    );
    let mut config = h.config();
    config.ai.quality_check = true;
    config.timeouts.quality_check_ms = 10;

    let run = h.orchestrator.start(config).await.unwrap();
    let artifact = &h.ports.artifacts.by_run(run.id)[0];
    assert_eq!(artifact.quality_reason.as_deref(), Some("qc_error"));
}

#[tokio::test]
async fn test_metadata_only_for_approved_artifacts() {
    let ports = TestPorts::new()
        .with_quality_gate(FakeQualityGate::scripted(vec![
            Some(QualityVerdict::pass()),
            Some(QualityVerdict::reject("cropped")),
        ]))
        .with_metadata(FakeMetadataClient::new());
    let h = harness(ports);
    let mut config = h.config();
    config.generation.count = 2;
    config.ai.quality_check = true;
    config.ai.metadata = true;

    let run = h.orchestrator.start(config).await.unwrap();

    assert_eq!(run.successful_items, 1);
    assert_eq!(run.failed_items, 1);
    assert_eq!(h.ports.metadata.call_count(), 1);

    let described: Vec<_> = h
        .ports
        .artifacts
        .by_run(run.id)
        .into_iter()
        .filter(|a| a.metadata.is_some())
        .collect();
    assert_eq!(described.len(), 1);
    assert_eq!(described[0].quality_status, QualityStatus::Approved);
}

#[tokio::test]
async fn test_artifact_save_failure_fails_item() {
    let ports = TestPorts::new();
    let mut artifacts = MockArtifactRepository::new();
    artifacts
        .expect_save()
        .times(1)
        .returning(|a| Err(PersistenceError::new("artifact", a.id, "disk full").into()));

    let sink = Arc::new(CollectingEventSink::new());
    let orchestrator = Orchestrator::builder(
        Arc::new(artifacts),
        ports.runs.clone(),
        ports.provider.clone(),
        ports.image_ops.clone(),
    )
    .with_event_sink(sink.clone())
    .build();
    let dir = tempfile::tempdir().unwrap();

    let run = orchestrator.start(test_config(dir.path())).await.unwrap();

    assert_eq!(run.failed_items, 1);
    match &sink.events_of_type("item-failed")[0] {
        GenflowEvent::ItemFailed { reason, .. } => assert_eq!(reason, "persistence_failed"),
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn test_invalid_config_fails_before_any_call() {
    let h = harness(TestPorts::new());
    let mut config = h.config();
    config.api_keys.generation = None;
    config.generation.count = 0;

    let err = h.orchestrator.start(config).await.unwrap_err();

    match err {
        GenflowError::Validation(v) => assert_eq!(v.fields.len(), 2),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(h.ports.provider.call_count(), 0);
    assert!(h.ports.runs.is_empty());
    assert_eq!(h.orchestrator.get_status().state, OrchestratorState::Failed);

    let events = h.sink.events();
    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], GenflowEvent::RunError { run_id: None, .. }));
}

#[tokio::test]
async fn test_stop_ends_run_as_stopped() {
    let h = harness(
        TestPorts::new()
            .with_provider(FakeGenerationProvider::new().with_delay(Duration::from_millis(50))),
    );
    let mut config = h.config();
    config.generation.count = 5;

    let orchestrator = h.orchestrator.clone();
    let task = tokio::spawn(async move { orchestrator.start(config).await });
    h.wait_for_generation_calls(1).await;
    assert!(h.orchestrator.stop());

    let run = task.await.unwrap().unwrap();

    assert_eq!(run.status, RunStatus::Stopped);
    assert!(run.resolved_items() < run.total_items);
    assert_eq!(h.ports.provider.call_count(), 1);
    assert_eq!(h.ports.artifacts.len() as u32, run.successful_items);
    assert_eq!(h.sink.terminal_count(), 1);
    assert!(!h.orchestrator.stop());
}

#[tokio::test]
async fn test_force_stop_mid_generation() {
    let h = harness(
        TestPorts::new()
            .with_provider(FakeGenerationProvider::new().with_delay(Duration::from_secs(60))),
    );
    let orchestrator = h.orchestrator.clone();
    let config = h.config();
    let task = tokio::spawn(async move { orchestrator.start(config).await });
    h.wait_for_generation_calls(1).await;

    let released = Arc::new(AtomicUsize::new(0));
    let counter = released.clone();
    h.orchestrator.register_handle("child-process", move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    assert!(h.orchestrator.force_stop().await.unwrap());

    assert_eq!(released.load(Ordering::SeqCst), 1);
    assert_eq!(h.sink.terminal_count(), 1);
    match &h.sink.events_of_type("run-completed")[0] {
        GenflowEvent::RunCompleted { status, .. } => assert_eq!(*status, RunStatus::Stopped),
        other => panic!("unexpected event: {other:?}"),
    }

    let run = tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(run.status, RunStatus::Stopped);
    assert_eq!(h.ports.runs.snapshot(run.id).unwrap().status, RunStatus::Stopped);
    assert_eq!(h.orchestrator.get_status().state, OrchestratorState::Stopped);
    assert_eq!(h.sink.terminal_count(), 1);
    assert!(!h.orchestrator.force_stop().await.unwrap());
}

#[tokio::test]
async fn test_second_start_is_rejected_while_active() {
    let h = harness(
        TestPorts::new()
            .with_provider(FakeGenerationProvider::new().with_delay(Duration::from_secs(60))),
    );
    let orchestrator = h.orchestrator.clone();
    let config = h.config();
    let task = tokio::spawn(async move { orchestrator.start(config).await });
    h.wait_for_generation_calls(1).await;

    let err = h.orchestrator.start(h.config()).await.unwrap_err();
    assert_eq!(err.kind(), "ValidationError");

    h.orchestrator.force_stop().await.unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_progress_reports_counters() {
    let h = harness(TestPorts::new());
    let mut config = h.config();
    config.generation.count = 3;

    h.orchestrator.start(config).await.unwrap();

    let progress = h.orchestrator.get_progress();
    assert_eq!(progress.total, 3);
    assert_eq!(progress.successful, 3);
    assert_eq!(progress.item, 3);
    assert!(progress.step.is_none());
    assert!(!h.sink.events_of_type("progress").is_empty());
}

#[tokio::test]
async fn test_final_run_write_failure_fails_the_run() {
    let ports = TestPorts::new();
    let sink = Arc::new(CollectingEventSink::new());
    let orchestrator = Orchestrator::builder(
        ports.artifacts.clone(),
        Arc::new(TerminalWriteFails(ports.runs.clone())),
        ports.provider.clone(),
        ports.image_ops.clone(),
    )
    .with_stage_ports(ports.stage_ports())
    .with_quality_gate(ports.quality_gate.clone())
    .with_event_sink(sink.clone())
    .build();
    let dir = tempfile::tempdir().unwrap();

    let err = orchestrator.start(test_config(dir.path())).await.unwrap_err();

    assert_eq!(err.quality_reason(), QualityReason::PersistenceFailed);
    assert!(sink.events_of_type("run-completed").is_empty());
    let errors = sink.events_of_type("run-error");
    assert_eq!(errors.len(), 1);
    assert!(matches!(
        &errors[0],
        GenflowEvent::RunError { run_id: Some(_), error } if error.starts_with("persistence_failed")
    ));
    assert_eq!(sink.terminal_count(), 1);

    let status = orchestrator.get_status();
    assert_eq!(status.state, OrchestratorState::Failed);
    assert!(status.last_error.unwrap().starts_with("persistence_failed"));
}
