mod common;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use common::*;
use pairprep::adapter::{
    Adapter, AdapterError, AdapterOutput, Invocation, ParameterExtractor, TemplateDeployer,
};
use pairprep::engine::{
    progress, Orchestrator, Outcome, ProgressEvent, RunLog, RunReporter, StagePipeline, Workspace,
    SKIP_CANCELLED, SKIP_COMPLETE,
};
use pairprep::workflow::{Artifacts, DeployPolicy, Sample, StageKind, DEPLOY_MARKER, SAMPLE_LOG};

fn samples(keys: &[&str]) -> Vec<Sample> {
    keys.iter()
        .enumerate()
        .map(|(i, key)| Sample::new(*key, 3715 + i as u64, 2179 + i as u64))
        .collect()
}

#[tokio::test]
async fn test_samples_processed_in_input_order() {
    let dir = create_test_dir();
    let run_log = RunLog::create(&dir.path().join("logs")).unwrap();
    let log = new_call_log();

    let orchestrator = Orchestrator::new(fake_pipeline(&log), dir.path().join("work"));
    let outcomes = orchestrator.run(&samples(&["3", "1", "2"]), &run_log).await;

    let keys: Vec<&str> = outcomes.iter().map(|o| o.key()).collect();
    assert_eq!(keys, vec!["3", "1", "2"]);
    assert!(outcomes.iter().all(|o| o.outcome.is_success()));

    let calls = calls(&log);
    assert_eq!(calls.len(), 3 * 13);
    assert_eq!(
        &calls[..4],
        &["Fetch:MOA", "Fetch:MOB", "Convert:MOA", "Convert:MOB"]
    );
    assert_eq!(calls[12], "Deploy:3");
    assert_eq!(calls[25], "Deploy:1");
    assert_eq!(calls[38], "Deploy:2");
}

#[tokio::test]
async fn test_failing_sample_does_not_stop_batch() {
    let dir = create_test_dir();
    let run_log = RunLog::create(&dir.path().join("logs")).unwrap();
    let log = new_call_log();

    let pipeline = fake_pipeline(&log)
        .with_adapter(FakeAdapter::new(StageKind::Optimize, log.clone()).failing_for("2"));
    let orchestrator = Orchestrator::new(pipeline, dir.path().join("work"));
    let outcomes = orchestrator.run(&samples(&["1", "2"]), &run_log).await;

    assert!(outcomes[0].outcome.is_success());
    match &outcomes[1].outcome {
        Outcome::Failed { stage, reason } => {
            assert_eq!(*stage, StageKind::Optimize);
            assert!(reason.starts_with("MOA: "), "{}", reason);
            assert!(reason.contains("exited with code 1"), "{}", reason);
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(outcomes[1].last_stage, Some(StageKind::Optimize));

    let calls = calls(&log);
    assert!(calls.contains(&"Deploy:1".to_string()));
    assert!(!calls.contains(&"Deploy:2".to_string()));

    let finished = Workspace::new(dir.path().join("work/1"));
    assert!(finished.is_complete());
    for name in Artifacts::final_set() {
        assert_eq!(
            std::fs::read_to_string(finished.path(&name)).unwrap(),
            TOPOLOGY_WITH_ATOMTYPES,
            "{}",
            name
        );
    }
    assert_eq!(
        std::fs::read_to_string(finished.path("MOA.mol2")).unwrap(),
        "Convert output\n"
    );
    assert_eq!(
        std::fs::read_to_string(finished.path("deployed.txt")).unwrap(),
        "Deploy output\n"
    );
    assert!(!Workspace::new(dir.path().join("work/2")).has_final_artifacts());

    let stats = RunReporter::summarize(&outcomes);
    assert_eq!((stats.succeeded, stats.failed, stats.skipped), (1, 1, 0));
    assert_eq!(RunReporter::error_lines(&outcomes).len(), 1);
    assert!(RunReporter::error_lines(&outcomes)[0].starts_with("2\tOptimize: "));
}

#[tokio::test]
async fn test_missing_parameter_section_fails_extraction() {
    let dir = create_test_dir();
    let run_log = RunLog::create(&dir.path().join("logs")).unwrap();
    let log = new_call_log();

    let pipeline = fake_pipeline(&log)
        .with_adapter(
            FakeAdapter::new(StageKind::GenerateTopology, log.clone())
                .with_content(TOPOLOGY_WITHOUT_ATOMTYPES),
        )
        .with_adapter(ParameterExtractor::new("atomtypes"));
    let orchestrator = Orchestrator::new(pipeline, dir.path().join("work"));
    let outcomes = orchestrator.run(&samples(&["1"]), &run_log).await;

    match &outcomes[0].outcome {
        Outcome::Failed { stage, reason } => {
            assert_eq!(*stage, StageKind::ExtractParameters);
            assert!(reason.contains("section [ atomtypes ] not found"), "{}", reason);
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert!(!calls(&log).iter().any(|c| c.starts_with("Deploy")));

    let ws = Workspace::new(dir.path().join("work/1"));
    assert_eq!(
        std::fs::read_to_string(ws.path("MOA_GMX.itp")).unwrap(),
        TOPOLOGY_WITHOUT_ATOMTYPES
    );
    assert!(!ws.path("MOA_GMX_prm.itp").exists());
}

#[tokio::test]
async fn test_completed_samples_are_skipped() {
    let dir = create_test_dir();
    let run_log = RunLog::create(&dir.path().join("logs")).unwrap();
    let batch = samples(&["1", "2"]);

    let first = new_call_log();
    let outcomes = Orchestrator::new(fake_pipeline(&first), dir.path().join("work"))
        .run(&batch, &run_log)
        .await;
    assert!(outcomes.iter().all(|o| o.outcome.is_success()));

    let second = new_call_log();
    let outcomes = Orchestrator::new(fake_pipeline(&second), dir.path().join("work"))
        .run(&batch, &run_log)
        .await;
    assert!(outcomes.iter().all(|o| o.outcome
        == Outcome::Skipped {
            reason: SKIP_COMPLETE.to_string()
        }));
    assert!(calls(&second).is_empty());

    let forced = new_call_log();
    let outcomes = Orchestrator::new(fake_pipeline(&forced), dir.path().join("work"))
        .skip_completed(false)
        .run(&batch, &run_log)
        .await;
    assert!(outcomes.iter().all(|o| o.outcome.is_success()));
    assert_eq!(calls(&forced).len(), 2 * 13);
}

#[tokio::test]
async fn test_partial_workspace_is_reprocessed() {
    let dir = create_test_dir();
    let run_log = RunLog::create(&dir.path().join("logs")).unwrap();
    let ws = Workspace::new(dir.path().join("work/1"));
    ws.ensure().unwrap();
    std::fs::write(ws.path("MOA_GMX.itp"), "left over").unwrap();

    let log = new_call_log();
    let outcomes = Orchestrator::new(fake_pipeline(&log), dir.path().join("work"))
        .run(&samples(&["1"]), &run_log)
        .await;

    assert!(outcomes[0].outcome.is_success());
    assert_eq!(calls(&log).len(), 13);
}

/// Deploys nothing but raises the shared cancellation flag
struct CancellingDeployer {
    flag: Arc<AtomicBool>,
}

#[async_trait]
impl Adapter for CancellingDeployer {
    fn stage(&self) -> StageKind {
        StageKind::Deploy
    }

    async fn invoke(
        &self,
        _workspace: &Workspace,
        _invocation: &Invocation<'_>,
    ) -> Result<AdapterOutput, AdapterError> {
        self.flag.store(true, Ordering::SeqCst);
        Ok(AdapterOutput::default())
    }
}

#[tokio::test]
async fn test_cancellation_skips_remaining_samples() {
    let dir = create_test_dir();
    let run_log = RunLog::create(&dir.path().join("logs")).unwrap();
    let log = new_call_log();
    let flag = Arc::new(AtomicBool::new(false));

    let pipeline = fake_pipeline(&log).with_adapter(CancellingDeployer { flag: flag.clone() });
    let outcomes = Orchestrator::new(pipeline, dir.path().join("work"))
        .cancel_flag(flag)
        .run(&samples(&["1", "2", "3"]), &run_log)
        .await;

    assert_eq!(outcomes.len(), 3);
    assert!(outcomes[0].outcome.is_success());
    for outcome in &outcomes[1..] {
        assert_eq!(
            outcome.outcome,
            Outcome::Skipped {
                reason: SKIP_CANCELLED.to_string()
            }
        );
    }
    assert_eq!(calls(&log).len(), 12);
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let dir = create_test_dir();
    let run_log = RunLog::create(&dir.path().join("logs")).unwrap();
    let log = new_call_log();

    let orchestrator = Orchestrator::new(fake_pipeline(&log), dir.path().join("work"));
    orchestrator.cancel_handle().store(true, Ordering::SeqCst);
    let outcomes = orchestrator.run(&samples(&["1", "2"]), &run_log).await;

    assert!(outcomes.iter().all(|o| o.outcome.is_skipped()));
    assert!(calls(&log).is_empty());
    assert!(!dir.path().join("work/1").exists());
}

#[tokio::test]
async fn test_best_effort_deploy_records_warning() {
    let dir = create_test_dir();
    let run_log = RunLog::create(&dir.path().join("logs")).unwrap();
    let log = new_call_log();

    let pipeline = fake_pipeline(&log)
        .with_adapter(TemplateDeployer::new(dir.path().join("no-such-template")));
    let outcomes = Orchestrator::new(pipeline, dir.path().join("work"))
        .run(&samples(&["1"]), &run_log)
        .await;

    assert!(outcomes[0].outcome.is_success());
    assert_eq!(outcomes[0].warnings.len(), 1);
    assert!(outcomes[0].warnings[0].starts_with("template deployment skipped: "));
}

#[tokio::test]
async fn test_strict_deploy_fails_sample() {
    let dir = create_test_dir();
    let run_log = RunLog::create(&dir.path().join("logs")).unwrap();
    let log = new_call_log();

    let pipeline = fake_pipeline(&log)
        .with_adapter(TemplateDeployer::new(dir.path().join("no-such-template")))
        .deploy_policy(DeployPolicy::Strict);
    let outcomes = Orchestrator::new(pipeline, dir.path().join("work"))
        .run(&samples(&["1"]), &run_log)
        .await;

    match &outcomes[0].outcome {
        Outcome::Failed { stage, .. } => assert_eq!(*stage, StageKind::Deploy),
        other => panic!("expected failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_template_is_deployed_into_workspace() {
    let dir = create_test_dir();
    let run_log = RunLog::create(&dir.path().join("logs")).unwrap();
    let template = write_template_dir(dir.path());
    let log = new_call_log();

    let pipeline = fake_pipeline(&log).with_adapter(TemplateDeployer::new(template));
    let outcomes = Orchestrator::new(pipeline, dir.path().join("work"))
        .run(&samples(&["1"]), &run_log)
        .await;

    assert!(outcomes[0].outcome.is_success());
    assert!(outcomes[0].warnings.is_empty());
    let ws = Workspace::new(dir.path().join("work/1"));
    assert!(ws.is_ready("md.mdp"));
    assert!(ws.is_ready("toppar/forcefield.itp"));
}

#[tokio::test]
async fn test_panicking_adapter_is_isolated() {
    let dir = create_test_dir();
    let run_log = RunLog::create(&dir.path().join("logs")).unwrap();
    let log = new_call_log();

    let pipeline =
        fake_pipeline(&log).with_adapter(FakeAdapter::new(StageKind::Convert, log.clone()).panicking());
    let outcomes = Orchestrator::new(pipeline, dir.path().join("work"))
        .run(&samples(&["1", "2"]), &run_log)
        .await;

    assert_eq!(outcomes.len(), 2);
    for outcome in &outcomes {
        match &outcome.outcome {
            Outcome::Failed { stage, reason } => {
                assert_eq!(*stage, StageKind::Convert);
                assert!(reason.contains("adapter panicked"), "{}", reason);
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_missing_adapter_fails_stage() {
    let dir = create_test_dir();
    let run_log = RunLog::create(&dir.path().join("logs")).unwrap();
    let log = new_call_log();

    let pipeline = StagePipeline::new()
        .with_adapter(FakeAdapter::new(StageKind::Fetch, log.clone()))
        .with_adapter(FakeAdapter::new(StageKind::Convert, log.clone()));
    assert_eq!(pipeline.missing_stages().len(), 5);

    let outcomes = Orchestrator::new(pipeline, dir.path().join("work"))
        .run(&samples(&["1"]), &run_log)
        .await;
    match &outcomes[0].outcome {
        Outcome::Failed { stage, reason } => {
            assert_eq!(*stage, StageKind::Optimize);
            assert!(reason.contains("No adapter registered for Optimize"), "{}", reason);
        }
        other => panic!("expected failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_logs_and_progress_events() {
    let dir = create_test_dir();
    let run_log = RunLog::create(&dir.path().join("logs")).unwrap();
    let log = new_call_log();
    let (tx, mut rx) = progress::channel();

    let pipeline = fake_pipeline(&log)
        .with_adapter(FakeAdapter::new(StageKind::Fetch, log.clone()).failing_for("2"));
    let orchestrator = Orchestrator::new(pipeline, dir.path().join("work")).progress(tx);
    orchestrator.run(&samples(&["1", "2"]), &run_log).await;
    drop(orchestrator);

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    assert!(matches!(events.first(), Some(ProgressEvent::Started { total: 2 })));
    assert!(matches!(
        events.last(),
        Some(ProgressEvent::Finished {
            processed: 2,
            cancelled: false
        })
    ));
    let finished = events
        .iter()
        .filter(|e| matches!(e, ProgressEvent::SampleFinished { .. }))
        .count();
    assert_eq!(finished, 2);

    let run_text = std::fs::read_to_string(run_log.path()).unwrap();
    assert!(run_text.contains(" - INFO - Sample 1 completed in "));
    assert!(run_text.contains(" - ERROR - Sample 2 failed at Fetch after "));

    let sample_text = std::fs::read_to_string(dir.path().join("work/2").join(SAMPLE_LOG)).unwrap();
    assert!(sample_text.contains("Fetch [MOA] failed after "));
    assert!(sample_text.contains("simulated failure"));
}

fn deploying_pipeline(log: &CallLog, template: &Path, policy: DeployPolicy) -> StagePipeline {
    fake_pipeline(log)
        .with_adapter(TemplateDeployer::new(template))
        .deploy_policy(policy)
}

#[tokio::test]
async fn test_workspace_overlapping_template_is_refused() {
    let dir = create_test_dir();
    let run_log = RunLog::create(&dir.path().join("logs")).unwrap();
    let work = dir.path().join("work");
    let template = write_template_dir(&work);
    let log = new_call_log();

    let pipeline = deploying_pipeline(&log, &template, DeployPolicy::BestEffort);
    let outcomes = Orchestrator::new(pipeline, &work)
        .run(&samples(&["File", "2"]), &run_log)
        .await;

    match &outcomes[0].outcome {
        Outcome::Failed { stage, reason } => {
            assert_eq!(*stage, StageKind::Fetch);
            assert!(reason.contains("overlaps reserved directory"), "{}", reason);
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert!(outcomes[1].outcome.is_success());
    assert!(outcomes[1].warnings.is_empty());
    assert_eq!(calls(&log).len(), 12);

    assert_eq!(
        std::fs::read_to_string(template.join("md.mdp")).unwrap(),
        "integrator = md\n"
    );
    let mut entries: Vec<String> = std::fs::read_dir(&template)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    entries.sort();
    assert_eq!(entries, vec!["md.mdp", "toppar"]);

    let deployed = Workspace::new(work.join("2"));
    assert_eq!(
        std::fs::read_to_string(deployed.path("md.mdp")).unwrap(),
        "integrator = md\n"
    );
}

#[tokio::test]
async fn test_workspace_overlapping_log_dir_is_refused() {
    let dir = create_test_dir();
    let logs = dir.path().join("logs");
    let run_log = RunLog::create(&logs).unwrap();
    run_log.info("before samples");
    let log = new_call_log();

    let outcomes = Orchestrator::new(fake_pipeline(&log), dir.path())
        .reserve(&logs)
        .run(&samples(&["logs", "1"]), &run_log)
        .await;

    assert!(matches!(
        &outcomes[0].outcome,
        Outcome::Failed { stage: StageKind::Fetch, reason } if reason.contains("overlaps")
    ));
    assert!(outcomes[1].outcome.is_success());
    assert!(!calls(&log).iter().any(|c| c == "Deploy:logs"));
    assert!(!logs.join(SAMPLE_LOG).exists());
    assert!(!logs.join("MOA.sdf").exists());
}

#[tokio::test]
async fn test_strict_deploy_failure_is_retried_on_next_run() {
    let dir = create_test_dir();
    let run_log = RunLog::create(&dir.path().join("logs")).unwrap();
    let template = dir.path().join("File");
    let batch = samples(&["1"]);
    let ws = Workspace::new(dir.path().join("work/1"));

    let first = new_call_log();
    let outcomes = Orchestrator::new(
        deploying_pipeline(&first, &template, DeployPolicy::Strict),
        dir.path().join("work"),
    )
    .run(&batch, &run_log)
    .await;
    assert!(matches!(
        outcomes[0].outcome,
        Outcome::Failed { stage: StageKind::Deploy, .. }
    ));
    assert_eq!(calls(&first).len(), 12);
    assert!(ws.has_final_artifacts());
    assert!(!ws.is_complete());

    let second = new_call_log();
    let outcomes = Orchestrator::new(
        deploying_pipeline(&second, &template, DeployPolicy::Strict),
        dir.path().join("work"),
    )
    .run(&batch, &run_log)
    .await;
    assert!(matches!(
        outcomes[0].outcome,
        Outcome::Failed { stage: StageKind::Deploy, .. }
    ));
    assert!(calls(&second).is_empty());
    assert_eq!(outcomes[0].stages.len(), 1);

    write_template_dir(dir.path());
    let third = new_call_log();
    let outcomes = Orchestrator::new(
        deploying_pipeline(&third, &template, DeployPolicy::Strict),
        dir.path().join("work"),
    )
    .run(&batch, &run_log)
    .await;
    assert!(outcomes[0].outcome.is_success(), "{:?}", outcomes[0]);
    assert!(calls(&third).is_empty());
    assert!(ws.is_ready("md.mdp"));
    assert!(ws.is_complete());
    let manifest = std::fs::read_to_string(ws.path(DEPLOY_MARKER)).unwrap();
    assert_eq!(manifest, "md.mdp\ntoppar/forcefield.itp\n");

    let fourth = new_call_log();
    let outcomes = Orchestrator::new(
        deploying_pipeline(&fourth, &template, DeployPolicy::Strict),
        dir.path().join("work"),
    )
    .run(&batch, &run_log)
    .await;
    assert_eq!(
        outcomes[0].outcome,
        Outcome::Skipped {
            reason: SKIP_COMPLETE.to_string()
        }
    );
}

#[tokio::test]
async fn test_best_effort_deploy_is_retried_on_next_run() {
    let dir = create_test_dir();
    let run_log = RunLog::create(&dir.path().join("logs")).unwrap();
    let template = dir.path().join("File");
    let batch = samples(&["1"]);
    let ws = Workspace::new(dir.path().join("work/1"));

    let first = new_call_log();
    let outcomes = Orchestrator::new(
        deploying_pipeline(&first, &template, DeployPolicy::BestEffort),
        dir.path().join("work"),
    )
    .run(&batch, &run_log)
    .await;
    assert!(outcomes[0].outcome.is_success());
    assert_eq!(outcomes[0].warnings.len(), 1);
    assert!(!ws.is_complete());

    write_template_dir(dir.path());
    let second = new_call_log();
    let outcomes = Orchestrator::new(
        deploying_pipeline(&second, &template, DeployPolicy::BestEffort),
        dir.path().join("work"),
    )
    .run(&batch, &run_log)
    .await;
    assert!(outcomes[0].outcome.is_success());
    assert!(outcomes[0].warnings.is_empty());
    assert!(calls(&second).is_empty());
    assert!(ws.is_ready("toppar/forcefield.itp"));
    assert!(ws.is_complete());
}

#[tokio::test]
async fn test_forced_run_clears_previous_deployment() {
    let dir = create_test_dir();
    let run_log = RunLog::create(&dir.path().join("logs")).unwrap();
    let template = write_template_dir(dir.path());
    let batch = samples(&["1"]);
    let ws = Workspace::new(dir.path().join("work/1"));

    let log = new_call_log();
    Orchestrator::new(
        deploying_pipeline(&log, &template, DeployPolicy::Strict),
        dir.path().join("work"),
    )
    .run(&batch, &run_log)
    .await;
    assert!(ws.is_complete());

    std::fs::remove_dir_all(&template).unwrap();
    let forced = new_call_log();
    let outcomes = Orchestrator::new(
        deploying_pipeline(&forced, &template, DeployPolicy::Strict),
        dir.path().join("work"),
    )
    .skip_completed(false)
    .run(&batch, &run_log)
    .await;
    assert!(matches!(
        outcomes[0].outcome,
        Outcome::Failed { stage: StageKind::Deploy, .. }
    ));
    assert!(!ws.is_deployed());

    let resumed = new_call_log();
    let outcomes = Orchestrator::new(
        deploying_pipeline(&resumed, &template, DeployPolicy::Strict),
        dir.path().join("work"),
    )
    .run(&batch, &run_log)
    .await;
    assert!(!outcomes[0].outcome.is_skipped());
    assert!(calls(&resumed).is_empty());
}
