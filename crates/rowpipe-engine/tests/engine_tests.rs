//! End-to-end tests for the transformation engine
//!
//! Every test builds a small transformation, runs it to completion and
//! inspects the aggregate result and the per-copy reports.

use rowpipe_engine::steps::{FilterConfig, FilterOperator, GeneratorConfig, GeneratorField};
use rowpipe_engine::{
    Distribution, EngineError, EngineSettings, EngineState, ExecutionResult, StepConfig,
    StepKind, StepStatus, TransformationConfig, TransformationEngine, ValueType,
};
use std::time::Duration;

fn generator(limit: u64) -> StepKind {
    StepKind::Generator(GeneratorConfig {
        limit,
        fields: vec![GeneratorField {
            name: "region".into(),
            value_type: ValueType::String,
            value: Some("north".into()),
            length: 10,
            precision: -1,
        }],
        sequence_field: Some("id".into()),
    })
}

fn filter(field: &str, operator: FilterOperator, value: &str) -> FilterConfig {
    FilterConfig {
        field: field.into(),
        operator,
        value: Some(value.into()),
        send_true_to: None,
        send_false_to: None,
    }
}

fn lines_read(engine: &TransformationEngine, step: &str) -> Vec<u64> {
    engine
        .reports()
        .iter()
        .filter(|r| r.copy.step == step)
        .map(|r| r.result.lines_read)
        .collect()
}

// ============================================================================
// Happy Path
// ============================================================================

#[tokio::test]
async fn test_generator_to_sink_through_small_rowset() {
    let config = TransformationConfig::new("generate")
        .with_step(StepConfig::new("gen", generator(1000)))
        .with_step(StepConfig::new("out", StepKind::Sink))
        .with_hop("gen", "out");
    let settings = EngineSettings::default()
        .with_rowset_size(10)
        .with_batch_size(7);

    let mut engine = TransformationEngine::new(config, settings);
    let result = engine.run().await.unwrap();

    assert_eq!(engine.state(), EngineState::Finished);
    assert_eq!(lines_read(&engine, "out"), vec![1000]);
    assert_eq!(result.nr_errors, 0);
    assert!(result.result);
    assert!(!result.stopped);
    assert_eq!(result.exit_status, 0);
    assert!(result
        .log_text
        .as_deref()
        .unwrap()
        .contains("Transformation lines read: 1000"));
    assert!(engine
        .step_statuses()
        .iter()
        .all(|(_, status)| *status == StepStatus::Finished));
}

#[tokio::test]
async fn test_result_rows_survive_xml() {
    let config = TransformationConfig::new("collect")
        .with_step(StepConfig::new("gen", generator(5)))
        .with_step(StepConfig::new("rows", StepKind::RowsToResult))
        .with_hop("gen", "rows");

    let mut engine = TransformationEngine::new(config, EngineSettings::default());
    let result = engine.run().await.unwrap();
    assert_eq!(result.rows.len(), 5);
    assert_eq!(result.rows[4].field("id").unwrap().to_text().as_deref(), Some("5"));

    let xml = result.to_xml();
    let parsed = ExecutionResult::from_xml(&xml).unwrap();
    assert_eq!(parsed.rows.len(), 5);
    assert_eq!(parsed.to_xml(), xml);
}

#[tokio::test]
async fn test_definition_from_yaml() {
    let yaml = r#"
name: yaml
steps:
  - name: gen
    type: generator
    limit: 20
    sequence_field: id
  - name: even
    type: filter
    field: id
    operator: ">"
    value: "15"
  - name: out
    type: sink
hops:
  - from: gen
    to: even
  - from: even
    to: out
"#;
    let config = TransformationConfig::from_yaml(yaml).unwrap();
    let mut engine = TransformationEngine::new(config, EngineSettings::default());
    let result = engine.run().await.unwrap();
    assert_eq!(lines_read(&engine, "out"), vec![5]);
    assert_eq!(result.lines_rejected, 15);
    assert!(result.result);
}

// ============================================================================
// Copies and Distribution
// ============================================================================

#[tokio::test]
async fn test_fan_out_round_robin() {
    let config = TransformationConfig::new("fan-out")
        .with_step(StepConfig::new("gen", generator(30)))
        .with_step(StepConfig::new("out", StepKind::Sink).with_copies(3))
        .with_hop("gen", "out");

    let mut engine = TransformationEngine::new(config, EngineSettings::default());
    engine.run().await.unwrap();
    assert_eq!(lines_read(&engine, "out"), vec![10, 10, 10]);
}

#[tokio::test]
async fn test_copies_wire_one_to_one_and_fan_in() {
    let config = TransformationConfig::new("copies")
        .with_step(StepConfig::new("gen", generator(8)).with_copies(2))
        .with_step(
            StepConfig::new("keep", StepKind::Filter(filter("id", FilterOperator::Greater, "0")))
                .with_copies(2),
        )
        .with_step(StepConfig::new("out", StepKind::Sink))
        .with_hop("gen", "keep")
        .with_hop("keep", "out");

    let mut engine = TransformationEngine::new(config, EngineSettings::default());
    let result = engine.run().await.unwrap();
    assert_eq!(lines_read(&engine, "keep"), vec![8, 8]);
    assert_eq!(lines_read(&engine, "out"), vec![16]);
    assert!(result.result);

    let order: Vec<(String, usize)> = engine
        .reports()
        .iter()
        .map(|r| (r.copy.step.clone(), r.copy.copy))
        .collect();
    assert_eq!(
        order,
        vec![
            ("gen".to_string(), 0),
            ("gen".to_string(), 1),
            ("keep".to_string(), 0),
            ("keep".to_string(), 1),
            ("out".to_string(), 0),
        ]
    );
}

#[tokio::test]
async fn test_copy_distribution_sends_every_row_everywhere() {
    let config = TransformationConfig::new("broadcast")
        .with_step(
            StepConfig::new("gen", generator(12)).with_distribution(Distribution::Copy),
        )
        .with_step(StepConfig::new("a", StepKind::Sink))
        .with_step(StepConfig::new("b", StepKind::Sink))
        .with_hop("gen", "a")
        .with_hop("gen", "b");

    let mut engine = TransformationEngine::new(config, EngineSettings::default());
    engine.run().await.unwrap();
    assert_eq!(lines_read(&engine, "a"), vec![12]);
    assert_eq!(lines_read(&engine, "b"), vec![12]);
}

#[tokio::test]
async fn test_filter_targets() {
    let mut routed = filter("id", FilterOperator::LessOrEqual, "4");
    routed.send_true_to = Some("low".into());
    routed.send_false_to = Some("high".into());

    let config = TransformationConfig::new("route")
        .with_step(StepConfig::new("gen", generator(10)))
        .with_step(StepConfig::new("split", StepKind::Filter(routed)))
        .with_step(StepConfig::new("low", StepKind::Sink))
        .with_step(StepConfig::new("high", StepKind::Sink))
        .with_hop("gen", "split")
        .with_hop("split", "low")
        .with_hop("split", "high");

    let mut engine = TransformationEngine::new(config, EngineSettings::default());
    let result = engine.run().await.unwrap();
    assert_eq!(lines_read(&engine, "low"), vec![4]);
    assert_eq!(lines_read(&engine, "high"), vec![6]);
    assert_eq!(result.lines_rejected, 0);
}

// ============================================================================
// Stop and Failure
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_ends_run_as_stopped() {
    let config = TransformationConfig::new("endless")
        .with_step(StepConfig::new("gen", generator(u64::MAX)))
        .with_step(StepConfig::new("out", StepKind::Sink))
        .with_hop("gen", "out");
    let settings = EngineSettings::default()
        .with_rowset_size(10)
        .with_grace_period(Duration::from_secs(5));

    let mut engine = TransformationEngine::new(config, settings);
    let stop = engine.stop_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        stop.stop();
    });

    let result = tokio::time::timeout(Duration::from_secs(5), engine.run())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(engine.state(), EngineState::Stopped);
    assert!(result.stopped);
    assert!(!result.result);
    assert_eq!(result.exit_status, 2);
    assert_eq!(result.nr_errors, 0);
    assert!(engine
        .step_statuses()
        .iter()
        .all(|(_, status)| status.is_terminal()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_step_failure_stops_the_rest() {
    let config = TransformationConfig::new("broken")
        .with_step(StepConfig::new("gen", generator(u64::MAX)))
        .with_step(StepConfig::new(
            "check",
            StepKind::Filter(filter("missing", FilterOperator::Equal, "1")),
        ))
        .with_step(StepConfig::new("out", StepKind::Sink))
        .with_hop("gen", "check")
        .with_hop("check", "out");
    let settings = EngineSettings::default().with_rowset_size(10);

    let mut engine = TransformationEngine::new(config, settings);
    let result = tokio::time::timeout(Duration::from_secs(5), engine.run())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(engine.state(), EngineState::Errored);
    assert!(result.nr_errors >= 1);
    assert!(!result.result);
    assert_eq!(result.exit_status, 1);
    assert!(result.log_text.as_deref().unwrap().contains("missing"));

    let check = engine
        .reports()
        .iter()
        .find(|r| r.copy.step == "check")
        .unwrap();
    assert_eq!(check.status, StepStatus::Error);
    let gen = engine
        .reports()
        .iter()
        .find(|r| r.copy.step == "gen")
        .unwrap();
    assert_eq!(gen.status, StepStatus::Stopped);
}

// ============================================================================
// Configuration Errors
// ============================================================================

#[tokio::test]
async fn test_invalid_graph_fails_before_running() {
    let config = TransformationConfig::new("bad")
        .with_step(StepConfig::new("gen", generator(1)))
        .with_step(StepConfig::new("out", StepKind::Sink))
        .with_hop("gen", "out")
        .with_hop("out", "gen");

    let mut engine = TransformationEngine::new(config, EngineSettings::default());
    assert!(matches!(
        engine.run().await,
        Err(EngineError::Configuration(_))
    ));
    assert_eq!(engine.state(), EngineState::Configured);
    assert!(engine.reports().is_empty());
}

#[tokio::test]
async fn test_filter_target_needs_hop() {
    let mut routed = filter("id", FilterOperator::Equal, "1");
    routed.send_true_to = Some("elsewhere".into());
    let config = TransformationConfig::new("bad")
        .with_step(StepConfig::new("gen", generator(1)))
        .with_step(StepConfig::new("split", StepKind::Filter(routed)))
        .with_step(StepConfig::new("out", StepKind::Sink))
        .with_hop("gen", "split")
        .with_hop("split", "out");

    let engine = TransformationEngine::new(config, EngineSettings::default());
    let err = engine.validate().unwrap_err();
    assert!(err.to_string().contains("elsewhere"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_with_unbounded_grace_period() {
    let config = TransformationConfig::new("endless")
        .with_step(StepConfig::new("gen", generator(u64::MAX)))
        .with_step(StepConfig::new("out", StepKind::Sink))
        .with_hop("gen", "out");
    let settings = EngineSettings::default()
        .with_rowset_size(10)
        .with_grace_period(Duration::from_secs(u64::MAX));
    settings.validate().unwrap();

    let mut engine = TransformationEngine::new(config, settings);
    let stop = engine.stop_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        stop.stop();
    });

    let result = tokio::time::timeout(Duration::from_secs(5), engine.run())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(engine.state(), EngineState::Stopped);
    assert!(result.stopped);
    assert_eq!(result.exit_status, 2);
}

#[tokio::test]
async fn test_run_on_its_own_task() {
    let config = TransformationConfig::new("spawned")
        .with_step(StepConfig::new("gen", generator(50)))
        .with_step(StepConfig::new("out", StepKind::Sink))
        .with_hop("gen", "out");

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let mut engine = TransformationEngine::new(config.clone(), EngineSettings::default());
            tokio::spawn(async move { engine.run().await })
        })
        .collect();

    for handle in handles {
        let result = handle.await.unwrap().unwrap();
        assert!(result.result);
        assert_eq!(result.lines_read, 50);
    }
}

#[tokio::test]
async fn test_oversized_rowset_is_a_configuration_error() {
    let settings = EngineSettings::default().with_rowset_size(usize::MAX);
    let config = TransformationConfig::new("t")
        .with_step(StepConfig::new("gen", generator(1)))
        .with_step(StepConfig::new("out", StepKind::Sink))
        .with_hop("gen", "out");
    let mut engine = TransformationEngine::new(config, settings);

    assert!(matches!(engine.prepare(), Err(EngineError::Configuration(_))));
    assert_eq!(engine.state(), EngineState::Configured);
}
