//! Test: Stage registry - name-keyed mutation and lookup

use crate::helpers::*;
use cascade::core::{stage_config, StageConfig, StageSource};
use cascade::{PipelineError, SettingsOverride};
use serde_json::json;

#[test]
fn test_add_twice_keeps_single_tail_stage() {
    let env = TestEnv::new();
    let log = run_log();

    for name in ["a", "b", "c"] {
        let mut pipeline = env.pipeline("web");
        for other in ["a", "b", "c"] {
            pipeline
                .add(other, tracking_stage(&log), stage_config(json!({ "round": 1 })))
                .unwrap();
        }

        pipeline
            .add(name, tracking_stage(&log), stage_config(json!({ "round": 2 })))
            .unwrap();

        assert_eq!(pipeline.stage_count(), 3);
        assert_eq!(pipeline.stage_names().iter().filter(|n| **n == name).count(), 1);
        assert_eq!(pipeline.index_of(name), Some(2));
        assert_eq!(pipeline.get_stage(name).unwrap().1.config["round"], json!(2));
    }
}

#[test]
fn test_replace_in_place_or_append() {
    let env = TestEnv::new();
    let log = run_log();
    let mut pipeline = env.pipeline("web");
    for name in ["checkout", "build", "deploy"] {
        pipeline.add(name, tracking_stage(&log), StageConfig::new()).unwrap();
    }

    pipeline
        .replace("build", "shell", stage_config(json!({ "command": "make" })))
        .unwrap();
    assert_eq!(pipeline.index_of("build"), Some(1));
    assert_eq!(pipeline.get_stage("build").unwrap().1.uses, "shell");

    pipeline.replace("notify", "notify", StageConfig::new()).unwrap();
    assert_eq!(pipeline.index_of("notify"), Some(3));
    assert!(pipeline.get_stage("notify").unwrap().1.run_on_error);
}

#[test]
fn test_missing_anchor_falls_back() {
    let env = TestEnv::new();
    let log = run_log();
    let mut pipeline = env.pipeline("web");
    for name in ["a", "b", "c"] {
        pipeline.add(name, tracking_stage(&log), StageConfig::new()).unwrap();
    }

    pipeline
        .insert_after("missing", "x", tracking_stage(&log), StageConfig::new())
        .unwrap();
    assert_eq!(pipeline.stage_names(), vec!["x", "a", "b", "c"]);

    pipeline
        .insert_before("missing", "y", tracking_stage(&log), StageConfig::new())
        .unwrap();
    assert_eq!(pipeline.stage_names(), vec!["x", "a", "b", "c", "y"]);

    // Re-inserting an existing name moves it
    pipeline
        .insert_after("b", "x", tracking_stage(&log), StageConfig::new())
        .unwrap();
    assert_eq!(pipeline.stage_names(), vec!["a", "b", "x", "c", "y"]);
}

#[test]
fn test_override_config_unknown_stage_is_noop() {
    let env = TestEnv::new();
    let log = run_log();
    let mut pipeline = env.pipeline("web");
    pipeline
        .add("deploy", tracking_stage(&log), stage_config(json!({ "host": "a" })))
        .unwrap();

    let overrides: SettingsOverride =
        serde_json::from_value(json!({ "stages": { "unknown": { "a": 1 } } })).unwrap();
    pipeline.override_config(&overrides);

    assert_eq!(pipeline.stage_names(), vec!["deploy"]);
    assert_eq!(
        pipeline.get_stage("deploy").unwrap().1.config,
        stage_config(json!({ "host": "a" }))
    );
}

#[test]
fn test_override_config_is_shallow() {
    let env = TestEnv::new();
    let mut pipeline = env.pipeline("web");
    pipeline
        .add(
            "deploy",
            "message",
            stage_config(json!({ "text": "hi", "target": { "host": "a", "port": 21 } })),
        )
        .unwrap();

    let mut overrides = SettingsOverride::new();
    overrides.set_stage_value("deploy", "target", json!({ "host": "b" }));
    pipeline.override_config(&overrides);

    let config = &pipeline.get_stage("deploy").unwrap().1.config;
    assert_eq!(config["target"], json!({ "host": "b" }));
    assert_eq!(config["text"], json!("hi"));
}

#[test]
fn test_logical_references_resolve_through_catalog() {
    let env = TestEnv::new();
    let mut pipeline = env.pipeline("web");

    pipeline.add("notify", StageSource::default(), StageConfig::new()).unwrap();
    pipeline.add("build", "shell", StageConfig::new()).unwrap();

    let err = pipeline.add("upload", "ftp", StageConfig::new()).unwrap_err();
    assert!(matches!(err, PipelineError::UnknownStage { .. }));
    assert_eq!(pipeline.stage_names(), vec!["notify", "build"]);
}

#[test]
fn test_stage_progress_is_index_based() {
    let env = TestEnv::new();
    let log = run_log();
    let mut pipeline = env.pipeline("web");
    let names = ["a", "b", "c", "d", "e"];
    for name in names {
        pipeline.add(name, tracking_stage(&log), StageConfig::new()).unwrap();
    }

    let n = names.len();
    let last = &pipeline.stages()[n - 1];
    assert_eq!(pipeline.stage_progress(last), (n - 1) as f64 / n as f64);
    assert!(pipeline
        .stages()
        .iter()
        .all(|stage| pipeline.stage_progress(stage) < 1.0));
}
