//! Test: Error cascade - stage faults, recovery stages and build status

use crate::helpers::*;
use cascade::core::{stage_config, RunState, StageConfig, StageSource};
use cascade::persistence::BuildStatus;
use cascade::{PipelineError, SettingsOverride};
use serde_json::json;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

/// [A, B, C] with B forced to fail
#[tokio::test]
async fn test_forced_failure_rejects_with_stage_name() {
    let env = TestEnv::new();
    let log = run_log();
    let events = EventLog::new();
    let mut pipeline = env.pipeline("web");
    pipeline.add("A", tracking_stage(&log), StageConfig::new()).unwrap();
    pipeline
        .add("B", tracking_stage(&log), stage_config(json!({ "forceFailure": true })))
        .unwrap();
    pipeline.add("C", tracking_stage(&log), StageConfig::new()).unwrap();

    let err = pipeline
        .run(&SettingsOverride::new(), sink(&events))
        .await
        .unwrap_err();

    assert!(err.to_string().contains("'B'"));
    assert!(err.stage_fault().unwrap().forced);
    assert_eq!(entries(&log), vec!["A"]);
    assert_eq!(pipeline.workspace.errors.len(), 1);
    assert_eq!(env.latest("web").await.status, BuildStatus::Failed);
    assert_eq!(events.count("success"), 0);
    assert_eq!(events.count("failed"), 1);
    // B is reported before it is rejected
    assert_eq!(
        events.entries(),
        vec![
            "start 0.0.1".to_string(),
            "stage A 0/3".to_string(),
            "stage B 1/3".to_string(),
            format!("failed {}", err),
        ]
    );
}

/// [A, B, C, D] with B failing and D a recovery stage that also fails
#[tokio::test]
async fn test_recovery_failure_does_not_mask_original() {
    let env = TestEnv::new();
    let log = run_log();
    let mut pipeline = env.pipeline("web");
    pipeline.add("A", tracking_stage(&log), StageConfig::new()).unwrap();
    pipeline.add("B", failing_stage(&log, "tests failed"), StageConfig::new()).unwrap();
    pipeline.add("C", tracking_stage(&log), StageConfig::new()).unwrap();
    pipeline
        .add("D", failing_stage(&log, "chat webhook down").on_error(), StageConfig::new())
        .unwrap();

    let err = pipeline.run(&SettingsOverride::new(), None).await.unwrap_err();

    assert_eq!(entries(&log), vec!["A", "B", "D"]);
    assert_eq!(pipeline.workspace.errors.len(), 2);
    let fault = err.stage_fault().unwrap();
    assert_eq!(fault.stage, "B");
    assert_eq!(fault.message, "tests failed");
    assert_eq!(pipeline.workspace.errors[1].message, "chat webhook down");
}

#[tokio::test]
async fn test_recovery_stage_runs_after_failure() {
    let env = TestEnv::new();
    let log = run_log();
    let mut pipeline = env.pipeline("web");
    pipeline.add("build", failing_stage(&log, "compile error"), StageConfig::new()).unwrap();
    pipeline.add("deploy", tracking_stage(&log), StageConfig::new()).unwrap();
    pipeline.add("report", tracking_stage(&log).on_error(), StageConfig::new()).unwrap();
    pipeline.add("notify", "notify", StageConfig::new()).unwrap();

    pipeline.run(&SettingsOverride::new(), None).await.unwrap_err();

    assert_eq!(entries(&log), vec!["build", "report"]);
    assert_eq!(pipeline.workspace.errors.len(), 1);

    // The built-in notify stage ran in the recovery pass and saw the failure
    let summary = pipeline.get_stage("notify").unwrap().1.config["summary"]
        .as_str()
        .unwrap()
        .to_string();
    assert!(summary.contains("failed"));
    assert!(summary.contains("compile error"));
}

#[tokio::test]
async fn test_recovery_pass_continues_after_recovery_failure() {
    let env = TestEnv::new();
    let log = run_log();
    let events = EventLog::new();
    let mut pipeline = env.pipeline("web");
    pipeline.add("a", failing_stage(&log, "boom"), StageConfig::new()).unwrap();
    pipeline.add("r1", failing_stage(&log, "r1 down").on_error(), StageConfig::new()).unwrap();
    pipeline.add("skip", tracking_stage(&log), StageConfig::new()).unwrap();
    pipeline.add("r2", tracking_stage(&log).on_error(), StageConfig::new()).unwrap();

    let err = pipeline
        .run(&SettingsOverride::new(), sink(&events))
        .await
        .unwrap_err();

    assert_eq!(entries(&log), vec!["a", "r1", "r2"]);
    assert_eq!(pipeline.workspace.errors.len(), 2);
    assert_eq!(err.stage_fault().unwrap().stage, "a");
    assert_eq!(events.count("failed"), 1);
    // Recovery stages report their original index
    assert!(events.entries().contains(&"stage r2 3/4".to_string()));
}

#[tokio::test]
async fn test_forced_failure_on_recovery_stage() {
    let env = TestEnv::new();
    let log = run_log();
    let mut pipeline = env.pipeline("web");
    pipeline.add("a", failing_stage(&log, "boom"), StageConfig::new()).unwrap();
    pipeline
        .add(
            "notify",
            tracking_stage(&log).on_error(),
            stage_config(json!({ "forceFailure": true })),
        )
        .unwrap();

    pipeline.run(&SettingsOverride::new(), None).await.unwrap_err();

    assert_eq!(entries(&log), vec!["a"]);
    assert_eq!(pipeline.workspace.errors.len(), 2);
    assert!(pipeline.workspace.errors[1].forced);
}

#[tokio::test]
async fn test_empty_pipeline_succeeds() {
    let env = TestEnv::new();
    let events = EventLog::new();
    let mut pipeline = env.pipeline("empty");

    pipeline.run(&SettingsOverride::new(), sink(&events)).await.unwrap();

    assert!(pipeline.workspace.errors.is_empty());
    assert_eq!(pipeline.state(), RunState::Succeeded);
    assert_eq!(env.latest("empty").await.status, BuildStatus::Success);
    assert_eq!(events.entries(), vec!["start 0.0.1", "success"]);
}

#[tokio::test]
async fn test_status_transitions_and_single_snapshot() {
    let env = TestEnv::new();
    let log = run_log();

    let mut ok = env.pipeline("web");
    ok.add("a", tracking_stage(&log), StageConfig::new()).unwrap();
    ok.run(&SettingsOverride::new(), None).await.unwrap();
    assert_eq!(env.store.statuses(), vec![BuildStatus::Success]);
    assert_eq!(env.store.save_count(), 1);

    let mut failing = env.pipeline("web");
    failing.add("a", failing_stage(&log, "boom"), StageConfig::new()).unwrap();
    failing.add("n", tracking_stage(&log).on_error(), StageConfig::new()).unwrap();
    failing.run(&SettingsOverride::new(), None).await.unwrap_err();

    assert_eq!(env.store.statuses(), vec![BuildStatus::Success, BuildStatus::Failed]);
    assert_eq!(env.store.save_count(), 2);

    let build = env.latest("web").await;
    assert_eq!(build.version.to_string(), "0.0.2");
    assert!(build.started.is_some() && build.finished.is_some());
}

#[tokio::test]
async fn test_async_stages_never_overlap() {
    let env = TestEnv::new();
    let log = run_log();
    let in_flight = Arc::new(AtomicBool::new(false));
    let mut pipeline = env.pipeline("web");

    for (name, fail) in [("fetch", false), ("build", true), ("cleanup", false)] {
        let stage = SlowStage {
            log: log.clone(),
            in_flight: in_flight.clone(),
            delay: Duration::from_millis(20),
            fail,
        };
        pipeline.add(name, StageSource::inline(stage), StageConfig::new()).unwrap();
    }

    let err = pipeline.run(&SettingsOverride::new(), None).await.unwrap_err();

    // An async failure takes the same path as a sync one
    assert_eq!(err.stage_fault().unwrap().stage, "build");
    assert_eq!(err.stage_fault().unwrap().message, "build timed out");
    assert_eq!(entries(&log), vec!["fetch", "build"]);
    assert_eq!(pipeline.get_stage("fetch").unwrap().1.config["slept_ms"], json!(20));
}

#[tokio::test]
async fn test_snapshot_failure_on_failure_path_keeps_stage_fault() {
    let env = TestEnv::with_store(CountingStore::failing_saves());
    let log = run_log();
    let mut pipeline = env.pipeline("web");
    pipeline.add("a", failing_stage(&log, "boom"), StageConfig::new()).unwrap();

    let err = pipeline.run(&SettingsOverride::new(), None).await.unwrap_err();

    assert!(matches!(err, PipelineError::Stage(_)));
    assert_eq!(env.store.save_count(), 1);
}

#[tokio::test]
async fn test_snapshot_failure_on_success_path_is_store_error() {
    let env = TestEnv::with_store(CountingStore::failing_saves());
    let log = run_log();
    let mut pipeline = env.pipeline("web");
    pipeline.add("a", tracking_stage(&log), StageConfig::new()).unwrap();

    let err = pipeline.run(&SettingsOverride::new(), None).await.unwrap_err();

    assert!(matches!(err, PipelineError::Store(_)));
    assert_eq!(env.latest("web").await.status, BuildStatus::Success);
}

#[tokio::test]
async fn test_success_status_failure_settles_run_as_failed() {
    let env = TestEnv::with_store(CountingStore::failing_success_status());
    let log = run_log();
    let events = EventLog::new();
    let mut pipeline = env.pipeline("web");
    pipeline.add("a", tracking_stage(&log), StageConfig::new()).unwrap();

    let err = pipeline
        .run(&SettingsOverride::new(), sink(&events))
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Store(_)));
    assert!(err.to_string().contains("db down"));
    assert_eq!(pipeline.state(), RunState::Failed);
    assert!(pipeline.state().is_terminal());
    assert_eq!(
        env.store.statuses(),
        vec![BuildStatus::Success, BuildStatus::Failed]
    );
    assert_eq!(env.latest("web").await.status, BuildStatus::Failed);
    assert_eq!(events.count("success"), 0);
}

#[tokio::test]
async fn test_event_handler_error_propagates() {
    let env = TestEnv::new();
    let log = run_log();
    let events = Arc::new(EventLog {
        fail_on_stage: Some("b".into()),
        ..Default::default()
    });
    let mut pipeline = env.pipeline("web");
    pipeline.add("a", tracking_stage(&log), StageConfig::new()).unwrap();
    pipeline.add("b", tracking_stage(&log), StageConfig::new()).unwrap();
    pipeline.add("n", tracking_stage(&log).on_error(), StageConfig::new()).unwrap();

    let err = pipeline.run(&SettingsOverride::new(), sink(&events)).await.unwrap_err();

    assert!(matches!(err, PipelineError::Event(_)));
    assert_eq!(entries(&log), vec!["a"]);
    assert!(pipeline.workspace.errors.is_empty());
    assert_eq!(events.count("failed"), 0);
}

#[tokio::test]
async fn test_pipeline_runs_once() {
    let env = TestEnv::new();
    let mut pipeline = env.pipeline("web");
    pipeline.run(&SettingsOverride::new(), None).await.unwrap();

    let err = pipeline.run(&SettingsOverride::new(), None).await.unwrap_err();
    assert!(matches!(err, PipelineError::AlreadyRun(ref id) if id == "web"));
}
