//! Bulk loader runs against a simulated loader
//!
//! `sh -c <script>` stands in for the loader executable; the generated
//! `control=...` style arguments land in the script's positional
//! parameters and are ignored.
#![cfg(unix)]

use rowpipe_engine::steps::bulk_loader::{BulkLoaderConfig, FieldMapping, LoadMethod};
use rowpipe_engine::steps::{GeneratorConfig, GeneratorField};
use rowpipe_engine::{
    EngineSettings, EngineState, ExecutionResult, StepConfig, StepKind, TransformationConfig,
    TransformationEngine, ValueType,
};
use std::path::Path;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn loader(dir: &Path, script: &str) -> BulkLoaderConfig {
    let mut config = BulkLoaderConfig::new("orders");
    config.loader = "sh".into();
    config.loader_args = vec!["-c".into(), script.into()];
    config.control_file = dir.join("control${copy_nr}.cfg").display().to_string();
    config.data_file = dir.join("load${copy_nr}.dat").display().to_string();
    config.mappings = vec![FieldMapping::new("id"), FieldMapping::new("region")];
    config
}

fn transformation(rows: u64, loader: BulkLoaderConfig) -> TransformationConfig {
    TransformationConfig::new("load")
        .with_step(StepConfig::new(
            "gen",
            StepKind::Generator(GeneratorConfig {
                limit: rows,
                fields: vec![GeneratorField {
                    name: "region".into(),
                    value_type: ValueType::String,
                    value: Some("north".into()),
                    length: 10,
                    precision: -1,
                }],
                sequence_field: Some("id".into()),
            }),
        ))
        .with_step(StepConfig::new("load", StepKind::BulkLoader(loader)))
        .with_hop("gen", "load")
}

async fn run(config: TransformationConfig) -> (TransformationEngine, ExecutionResult) {
    let mut engine = TransformationEngine::new(config, EngineSettings::default());
    let result = engine.run().await.unwrap();
    (engine, result)
}

#[tokio::test]
async fn test_warning_exit_is_tolerated() {
    let dir = TempDir::new().unwrap();
    let config = loader(
        dir.path(),
        "echo '10 Rows successfully loaded.'; exit 2",
    );

    let (engine, result) = run(transformation(10, config)).await;
    assert_eq!(engine.state(), EngineState::Finished);
    assert!(result.result);
    assert_eq!(result.nr_errors, 0);
    assert_eq!(result.lines_output, 10);
    assert!(result
        .log_text
        .as_deref()
        .unwrap()
        .contains("warning exit code 2"));
}

#[tokio::test]
async fn test_warning_exit_fails_when_configured() {
    let dir = TempDir::new().unwrap();
    let mut config = loader(dir.path(), "exit 2");
    config.fail_on_warning = true;

    let (engine, result) = run(transformation(10, config)).await;
    assert_eq!(engine.state(), EngineState::Errored);
    assert!(!result.result);
    assert!(result.nr_errors >= 1);
    assert_eq!(result.exit_status, 1);
}

#[tokio::test]
async fn test_error_exit_fails() {
    let dir = TempDir::new().unwrap();
    let config = loader(dir.path(), "exit 1");

    let (_, result) = run(transformation(3, config)).await;
    assert!(!result.result);
    assert!(result.log_text.as_deref().unwrap().contains("exit code 1"));
}

#[tokio::test]
async fn test_load_files_are_erased() {
    let dir = TempDir::new().unwrap();
    let config = loader(dir.path(), "exit 0");

    let (_, result) = run(transformation(5, config)).await;
    assert!(result.result);
    assert_eq!(result.lines_output, 5);
    assert!(!dir.path().join("control0.cfg").exists());
    assert!(!dir.path().join("load0.dat").exists());
}

#[tokio::test]
async fn test_manual_load_keeps_files() {
    let dir = TempDir::new().unwrap();
    let mut config = loader(dir.path(), "exit 1");
    config.load_method = LoadMethod::Manual;

    let (_, result) = run(transformation(4, config)).await;
    assert!(result.result);
    assert_eq!(result.lines_output, 4);

    let data = std::fs::read_to_string(dir.path().join("load0.dat")).unwrap();
    assert_eq!(data.lines().count(), 4);
    assert!(data.starts_with("1,north"));
    assert!(dir.path().join("control0.cfg").exists());
    assert_eq!(result.result_files.len(), 2);
}

#[tokio::test]
async fn test_concurrent_load_streams_rows() {
    let dir = TempDir::new().unwrap();
    let mut config = loader(
        dir.path(),
        "n=$(wc -l); echo \"$n Rows successfully loaded.\"",
    );
    config.load_method = LoadMethod::AutoConcurrent;

    let (_, result) = run(transformation(25, config)).await;
    assert!(result.result);
    assert_eq!(result.lines_output, 25);
    assert!(!dir.path().join("load0.dat").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_kills_the_loader() {
    let dir = TempDir::new().unwrap();
    let config = loader(dir.path(), "sleep 30");

    let mut engine = TransformationEngine::new(transformation(2, config), EngineSettings::default());
    let stop = engine.stop_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        stop.stop();
    });

    let started = Instant::now();
    let result = engine.run().await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(engine.state(), EngineState::Stopped);
    assert!(result.stopped);
    assert_eq!(result.exit_status, 2);
}
