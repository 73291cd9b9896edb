//! Transformation engine
//!
//! The engine turns a [`TransformationConfig`] into running workers:
//!
//! 1. `prepare` validates the graph, expands step copies and wires one
//!    [`RowSet`] per connected pair of copies
//! 2. `run` spawns one task per copy and supervises them; the first failing
//!    step cancels the others, which get `grace_period` to wind down before
//!    their tasks are aborted
//! 3. the per-copy results are folded, in step order, into one aggregate
//!    [`ExecutionResult`]

use crate::catalog::TableCatalog;
use crate::config::{EngineSettings, TransformationConfig};
use crate::error::{EngineError, Result};
use crate::result::ExecutionResult;
use crate::rowset::{RowSet, StepCopy};
use crate::step::{run_step, StatusHandle, Step, StepContext, StepReport, StepStatus};
use crate::steps::{bulk_loader, CheckRemark, CheckStatus, StepKind};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

/// Lifecycle of one engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Configured,
    Prepared,
    Running,
    Finished,
    Stopped,
    Errored,
}

impl EngineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineState::Configured => "configured",
            EngineState::Prepared => "prepared",
            EngineState::Running => "running",
            EngineState::Finished => "finished",
            EngineState::Stopped => "stopped",
            EngineState::Errored => "errored",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EngineState::Finished | EngineState::Stopped | EngineState::Errored
        )
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requests a cooperative stop of a running transformation.
///
/// Cloneable so it can be handed to a signal handler while `run` holds the
/// engine.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    token: CancellationToken,
    requested: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.requested.store(true, Ordering::Release);
        self.token.cancel();
    }

    /// Whether a stop was requested from outside the engine
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }
}

type Worker = (Box<dyn Step>, StepContext);

pub struct TransformationEngine {
    config: TransformationConfig,
    settings: EngineSettings,
    run_id: Uuid,
    state: EngineState,
    stop: StopHandle,
    workers: Vec<Worker>,
    statuses: Vec<(StepCopy, StatusHandle)>,
    reports: Vec<StepReport>,
    result: Option<ExecutionResult>,
}

impl TransformationEngine {
    pub fn new(config: TransformationConfig, settings: EngineSettings) -> Self {
        Self {
            config,
            settings,
            run_id: Uuid::new_v4(),
            state: EngineState::Configured,
            stop: StopHandle::default(),
            workers: Vec::new(),
            statuses: Vec::new(),
            reports: Vec::new(),
            result: None,
        }
    }

    pub fn config(&self) -> &TransformationConfig {
        &self.config
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Ask every worker to stop at its next batch boundary.
    pub fn stop(&self) {
        tracing::info!(transformation = %self.config.name, "stop requested");
        self.stop.stop();
    }

    /// Current status of every step copy, in wiring order.
    pub fn step_statuses(&self) -> Vec<(StepCopy, StepStatus)> {
        self.statuses
            .iter()
            .map(|(copy, status)| (copy.clone(), status.get()))
            .collect()
    }

    /// Final per-copy reports, available once the run ended.
    pub fn reports(&self) -> &[StepReport] {
        &self.reports
    }

    /// Aggregate result, available once the run ended.
    pub fn result(&self) -> Option<&ExecutionResult> {
        self.result.as_ref()
    }

    /// Check the graph without wiring anything.
    pub fn validate(&self) -> Result<()> {
        self.settings.validate()?;
        validate_graph(&self.config)
    }

    /// Validate the graph, expand step copies and wire the row sets.
    pub fn prepare(&mut self) -> Result<()> {
        if self.state != EngineState::Configured {
            return Err(EngineError::InvalidState {
                expected: EngineState::Configured.as_str(),
                actual: self.state.as_str(),
            });
        }
        self.validate()?;

        let shutdown = self.stop.token.clone();
        let steps = &self.config.steps;
        let index: HashMap<&str, usize> = steps
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name.as_str(), i))
            .collect();

        let mut contexts: Vec<Vec<StepContext>> = steps
            .iter()
            .map(|step| {
                (0..step.copies)
                    .map(|copy| {
                        StepContext::new(
                            StepCopy::new(&step.name, copy),
                            &self.config.name,
                            shutdown.clone(),
                        )
                        .with_distribution(step.distribution)
                        .with_batch_size(self.settings.batch_size)
                    })
                    .collect()
            })
            .collect();

        let mut rowsets = 0usize;
        for hop in self.config.enabled_hops() {
            let (Some(&from), Some(&to)) =
                (index.get(hop.from.as_str()), index.get(hop.to.as_str()))
            else {
                return Err(EngineError::config(format!(
                    "hop {} -> {} references an unknown step",
                    hop.from, hop.to
                )));
            };
            for (i, j) in copy_pairs(steps[from].copies, steps[to].copies) {
                let rowset = Arc::new(RowSet::new(
                    StepCopy::new(&hop.from, i),
                    StepCopy::new(&hop.to, j),
                    self.settings.rowset_size,
                    shutdown.clone(),
                ));
                contexts[from][i].add_output(Arc::clone(&rowset));
                contexts[to][j].add_input(rowset);
                rowsets += 1;
            }
        }

        for (step, copies) in steps.iter().zip(contexts) {
            for ctx in copies {
                self.statuses
                    .push((ctx.copy().clone(), ctx.status().clone()));
                self.workers.push((step.kind.build(), ctx));
            }
        }

        tracing::info!(
            transformation = %self.config.name,
            run_id = %self.run_id,
            steps = steps.len(),
            copies = self.workers.len(),
            rowsets,
            "transformation prepared"
        );
        self.state = EngineState::Prepared;
        Ok(())
    }

    /// Run the transformation to completion and return the aggregate result.
    ///
    /// Prepares first when that has not happened yet.
    pub async fn run(&mut self) -> Result<ExecutionResult> {
        if self.state == EngineState::Configured {
            self.prepare()?;
        }
        if self.state != EngineState::Prepared {
            return Err(EngineError::InvalidState {
                expected: EngineState::Prepared.as_str(),
                actual: self.state.as_str(),
            });
        }

        let span = tracing::info_span!(
            "transformation",
            name = %self.config.name,
            run_id = %self.run_id
        );
        self.execute().instrument(span).await
    }

    async fn execute(&mut self) -> Result<ExecutionResult> {
        self.state = EngineState::Running;
        let started = Instant::now();
        tracing::info!("transformation started");

        let mut tasks = JoinSet::new();
        for (step, ctx) in self.workers.drain(..) {
            tasks.spawn(run_step(step, ctx));
        }

        let (mut reports, failures) =
            supervise(tasks, self.stop.token.clone(), self.settings.grace_period).await;
        self.add_missing_reports(&mut reports);

        let order: HashMap<&str, usize> = self
            .config
            .steps
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name.as_str(), i))
            .collect();
        reports.sort_by_key(|r| {
            (
                order.get(r.copy.step.as_str()).copied().unwrap_or(usize::MAX),
                r.copy.copy,
            )
        });

        let mut total = ExecutionResult::new();
        for report in &reports {
            total.add(&report.result);
        }
        total.log_text = None;
        for report in &reports {
            if let Some(text) = &report.result.log_text {
                total.append_log(format!("{}: {text}", report.copy));
            }
        }
        for failure in &failures {
            total.nr_errors += 1;
            total.append_log(failure);
        }

        let errored = total.nr_errors > 0
            || reports.iter().any(|r| r.status == StepStatus::Error);
        let stopped = !errored
            && (self.stop.is_requested()
                || reports.iter().any(|r| r.status == StepStatus::Stopped));
        self.state = if errored {
            EngineState::Errored
        } else if stopped {
            EngineState::Stopped
        } else {
            EngineState::Finished
        };

        total.stopped = stopped;
        total.result = total.nr_errors == 0 && !stopped;
        total.exit_status = match self.state {
            EngineState::Errored => 1,
            EngineState::Stopped => 2,
            _ => 0,
        };
        total.log_channel_id = Some(self.run_id.to_string());
        let seconds = started.elapsed().as_secs().max(1);
        if let Some(summary) = total.read_write_throughput(seconds) {
            total.append_log(summary);
        }

        tracing::info!(
            state = %self.state,
            lines_read = total.lines_read,
            lines_written = total.lines_written,
            lines_output = total.lines_output,
            lines_rejected = total.lines_rejected,
            errors = total.nr_errors,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "transformation ended"
        );

        self.reports = reports;
        self.result = Some(total.clone());
        Ok(total)
    }

    /// Copies whose task was aborted or panicked end as stopped.
    fn add_missing_reports(&self, reports: &mut Vec<StepReport>) {
        let reported: HashSet<StepCopy> = reports.iter().map(|r| r.copy.clone()).collect();
        for (copy, status) in &self.statuses {
            if reported.contains(copy) {
                continue;
            }
            status.advance(StepStatus::Stopped);
            tracing::warn!(step = %copy, "step did not report, marking it stopped");
            reports.push(StepReport {
                copy: copy.clone(),
                status: StepStatus::Stopped,
                result: ExecutionResult {
                    stopped: true,
                    ..ExecutionResult::new()
                },
            });
        }
    }

    /// Validation remarks for the graph and for every bulk loader.
    pub async fn check(&self, catalog: &dyn TableCatalog) -> Vec<CheckRemark> {
        let mut remarks = vec![match self.validate() {
            Ok(()) => CheckRemark::new(
                CheckStatus::Ok,
                &self.config.name,
                "transformation graph is valid",
            ),
            Err(e) => CheckRemark::new(CheckStatus::Error, &self.config.name, e.to_string()),
        }];

        let predecessors = self.config.predecessors();
        for step in &self.config.steps {
            if let StepKind::BulkLoader(config) = &step.kind {
                let input = self.config.input_layout(&step.name);
                remarks.extend(
                    bulk_loader::check(
                        config,
                        &step.name,
                        input.as_ref(),
                        predecessors.contains_key(step.name.as_str()),
                        catalog,
                    )
                    .await,
                );
            }
        }
        remarks
    }

    /// DDL each bulk loader target needs, as `(step, sql)` pairs.
    pub async fn sql_statements(&self, catalog: &dyn TableCatalog) -> Result<Vec<(String, String)>> {
        let mut statements = Vec::new();
        for step in &self.config.steps {
            if let StepKind::BulkLoader(config) = &step.kind {
                let input = self.config.input_layout(&step.name);
                let sql = bulk_loader::sql_statements(config, input.as_ref(), catalog)
                    .await
                    .map_err(|source| EngineError::Step {
                        step: step.name.clone(),
                        source,
                    })?;
                if let Some(sql) = sql {
                    statements.push((step.name.clone(), sql));
                }
            }
        }
        Ok(statements)
    }
}

/// Collect worker reports. After the first failure or stop request the
/// remaining workers get `grace_period`, then their tasks are aborted. A
/// grace period too large to form a deadline waits for every worker.
async fn supervise(
    mut tasks: JoinSet<StepReport>,
    shutdown: CancellationToken,
    grace_period: Duration,
) -> (Vec<StepReport>, Vec<String>) {
    let mut reports = Vec::new();
    let mut failures = Vec::new();
    let mut draining = false;
    let mut deadline: Option<Instant> = None;

    loop {
        if !draining && shutdown.is_cancelled() {
            draining = true;
            deadline = Instant::now().checked_add(grace_period);
            if deadline.is_none() {
                tracing::warn!(
                    grace_period_secs = grace_period.as_secs(),
                    "grace period out of range, waiting for workers without a deadline"
                );
            }
        }
        let joined = match (draining, deadline) {
            (false, _) => tokio::select! {
                joined = tasks.join_next() => joined,
                _ = shutdown.cancelled() => continue,
            },
            (true, None) => tasks.join_next().await,
            (true, Some(deadline)) => {
                match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        tracing::warn!(
                            remaining = tasks.len(),
                            grace_period_secs = grace_period.as_secs(),
                            "grace period expired, aborting workers"
                        );
                        tasks.abort_all();
                        while let Some(joined) = tasks.join_next().await {
                            if let Ok(report) = joined {
                                reports.push(report);
                            }
                        }
                        break;
                    },
                }
            },
        };

        let Some(joined) = joined else {
            break;
        };
        match joined {
            Ok(report) => {
                if report.status == StepStatus::Error && !shutdown.is_cancelled() {
                    tracing::error!(step = %report.copy, "step failed, stopping transformation");
                    shutdown.cancel();
                }
                reports.push(report);
            },
            Err(e) if e.is_cancelled() => {},
            Err(e) => {
                let error = EngineError::Worker(e.to_string());
                tracing::error!(error = %error, "worker task panicked");
                failures.push(error.to_string());
                shutdown.cancel();
            },
        }
    }

    (reports, failures)
}

/// Copy-to-copy wiring of one hop between steps with `from` and `to` copies.
fn copy_pairs(from: usize, to: usize) -> Vec<(usize, usize)> {
    if from == to {
        (0..from).map(|i| (i, i)).collect()
    } else if from == 1 {
        (0..to).map(|j| (0, j)).collect()
    } else {
        (0..from).map(|i| (i, 0)).collect()
    }
}

fn validate_graph(config: &TransformationConfig) -> Result<()> {
    if config.steps.is_empty() {
        return Err(EngineError::config(format!(
            "transformation '{}' has no steps",
            config.name
        )));
    }

    let mut names = HashSet::new();
    for step in &config.steps {
        if step.name.trim().is_empty() {
            return Err(EngineError::config("step name must not be empty"));
        }
        if !names.insert(step.name.as_str()) {
            return Err(EngineError::config(format!(
                "duplicate step name '{}'",
                step.name
            )));
        }
        if step.copies == 0 {
            return Err(EngineError::config(format!(
                "step '{}' needs at least one copy",
                step.name
            )));
        }
    }

    let mut seen = HashSet::new();
    for hop in config.enabled_hops() {
        for end in [&hop.from, &hop.to] {
            if !names.contains(end.as_str()) {
                return Err(EngineError::config(format!(
                    "hop {} -> {} references unknown step '{end}'",
                    hop.from, hop.to
                )));
            }
        }
        if !seen.insert((hop.from.as_str(), hop.to.as_str())) {
            return Err(EngineError::config(format!(
                "duplicate hop {} -> {}",
                hop.from, hop.to
            )));
        }
        let (from, to) = match (config.step(&hop.from), config.step(&hop.to)) {
            (Some(from), Some(to)) => (from.copies, to.copies),
            _ => continue,
        };
        if from > 1 && to > 1 && from != to {
            return Err(EngineError::config(format!(
                "hop {} -> {} connects {from} copies to {to} copies",
                hop.from, hop.to
            )));
        }
    }

    reject_cycles(config)?;

    for step in &config.steps {
        let inputs = config.enabled_hops().filter(|h| h.to == step.name).count();
        let outputs: Vec<&str> = config
            .enabled_hops()
            .filter(|h| h.from == step.name)
            .map(|h| h.to.as_str())
            .collect();
        let arity = step.kind.arity();
        if !arity.accepts_inputs(inputs) {
            return Err(EngineError::config(format!(
                "step '{}' ({}) cannot take {inputs} input hop(s)",
                step.name,
                step.kind.name()
            )));
        }
        if !arity.allows_outputs && !outputs.is_empty() {
            return Err(EngineError::config(format!(
                "step '{}' ({}) cannot have output hops",
                step.name,
                step.kind.name()
            )));
        }

        let step_error = |source| EngineError::Step {
            step: step.name.clone(),
            source,
        };
        match &step.kind {
            StepKind::Filter(filter) => {
                filter.validate().map_err(step_error)?;
                if let Some(target) = filter.targets().find(|t| !outputs.contains(t)) {
                    return Err(EngineError::config(format!(
                        "filter '{}' sends rows to '{target}' without a hop to it",
                        step.name
                    )));
                }
            },
            StepKind::Generator(generator) => {
                generator.layout().map_err(step_error)?;
            },
            StepKind::BulkLoader(loader) => loader.validate().map_err(step_error)?,
            StepKind::Sink | StepKind::RowsToResult => {},
        }
    }
    Ok(())
}

/// Kahn's algorithm; whatever cannot be ordered sits on a cycle.
fn reject_cycles(config: &TransformationConfig) -> Result<()> {
    let mut incoming: HashMap<&str, usize> =
        config.steps.iter().map(|s| (s.name.as_str(), 0)).collect();
    for hop in config.enabled_hops() {
        *incoming.entry(hop.to.as_str()).or_default() += 1;
    }

    let mut ready: VecDeque<&str> = incoming
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(name, _)| *name)
        .collect();
    let mut ordered = 0;
    while let Some(name) = ready.pop_front() {
        ordered += 1;
        for hop in config.enabled_hops().filter(|h| h.from == name) {
            if let Some(count) = incoming.get_mut(hop.to.as_str()) {
                *count -= 1;
                if *count == 0 {
                    ready.push_back(hop.to.as_str());
                }
            }
        }
    }

    if ordered < config.steps.len() {
        let mut cyclic: Vec<&str> = incoming
            .into_iter()
            .filter(|(_, count)| *count > 0)
            .map(|(name, _)| name)
            .collect();
        cyclic.sort_unstable();
        return Err(EngineError::config(format!(
            "hops form a cycle through: {}",
            cyclic.join(", ")
        )));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::StepConfig;
    use crate::error::StepError;
    use crate::step::BatchOutcome;
    use crate::steps::{FilterConfig, FilterOperator, GeneratorConfig};
    use async_trait::async_trait;

    /// Never finishes a batch and never looks at the stop token.
    struct Stuck;

    #[async_trait]
    impl Step for Stuck {
        fn kind(&self) -> &'static str {
            "stuck"
        }

        async fn process_one_batch(
            &mut self,
            _ctx: &mut StepContext,
        ) -> std::result::Result<BatchOutcome, StepError> {
            std::future::pending().await
        }
    }

    fn report(step: &str) -> StepReport {
        StepReport {
            copy: StepCopy::new(step, 0),
            status: StepStatus::Finished,
            result: ExecutionResult::new(),
        }
    }

    fn generator(limit: u64) -> StepKind {
        StepKind::Generator(GeneratorConfig {
            limit,
            sequence_field: Some("id".into()),
            ..GeneratorConfig::default()
        })
    }

    fn pipeline() -> TransformationConfig {
        TransformationConfig::new("t")
            .with_step(StepConfig::new("gen", generator(10)))
            .with_step(StepConfig::new("out", StepKind::Sink))
            .with_hop("gen", "out")
    }

    fn config_error(config: TransformationConfig) -> String {
        match validate_graph(&config) {
            Err(EngineError::Configuration(msg)) => msg,
            other => panic!("expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn test_copy_pairs() {
        assert_eq!(copy_pairs(2, 2), vec![(0, 0), (1, 1)]);
        assert_eq!(copy_pairs(1, 3), vec![(0, 0), (0, 1), (0, 2)]);
        assert_eq!(copy_pairs(3, 1), vec![(0, 0), (1, 0), (2, 0)]);
    }

    #[test]
    fn test_valid_pipeline() {
        validate_graph(&pipeline()).unwrap();
    }

    #[test]
    fn test_rejects_duplicate_names() {
        let config = pipeline().with_step(StepConfig::new("out", StepKind::Sink));
        assert!(config_error(config).contains("duplicate step name"));
    }

    #[test]
    fn test_rejects_unknown_endpoint() {
        let config = pipeline().with_hop("gen", "nowhere");
        assert!(config_error(config).contains("unknown step 'nowhere'"));
    }

    #[test]
    fn test_rejects_cycles() {
        let filter = |name: &str| {
            StepConfig::new(
                name,
                StepKind::Filter(FilterConfig {
                    field: "id".into(),
                    operator: FilterOperator::IsNotNull,
                    value: None,
                    send_true_to: None,
                    send_false_to: None,
                }),
            )
        };
        let config = TransformationConfig::new("t")
            .with_step(StepConfig::new("gen", generator(1)))
            .with_step(filter("a"))
            .with_step(filter("b"))
            .with_hop("gen", "a")
            .with_hop("a", "b")
            .with_hop("b", "a");
        let msg = config_error(config);
        assert!(msg.contains("cycle"));
        assert!(msg.contains("a, b"));
    }

    #[test]
    fn test_rejects_mismatched_copies() {
        let config = TransformationConfig::new("t")
            .with_step(StepConfig::new("gen", generator(1)).with_copies(2))
            .with_step(StepConfig::new("out", StepKind::Sink).with_copies(3))
            .with_hop("gen", "out");
        assert!(config_error(config).contains("2 copies to 3 copies"));
    }

    #[test]
    fn test_rejects_wrong_arity() {
        let config = TransformationConfig::new("t")
            .with_step(StepConfig::new("out", StepKind::Sink));
        assert!(config_error(config).contains("cannot take 0 input"));

        let config = pipeline()
            .with_step(StepConfig::new("more", StepKind::Sink))
            .with_hop("out", "more");
        assert!(config_error(config).contains("cannot have output hops"));
    }

    #[test]
    fn test_disabled_hops_are_ignored() {
        let mut config = pipeline().with_hop("out", "gen");
        config.hops[1].enabled = false;
        validate_graph(&config).unwrap();
    }

    #[test]
    fn test_prepare_wires_copies() {
        let config = TransformationConfig::new("t")
            .with_step(StepConfig::new("gen", generator(1)))
            .with_step(StepConfig::new("out", StepKind::Sink).with_copies(3))
            .with_hop("gen", "out");
        let mut engine = TransformationEngine::new(config, EngineSettings::default());
        engine.prepare().unwrap();
        assert_eq!(engine.state(), EngineState::Prepared);
        assert_eq!(engine.step_statuses().len(), 4);
        assert!(engine
            .step_statuses()
            .iter()
            .all(|(_, s)| *s == StepStatus::NotStarted));
        assert!(matches!(
            engine.prepare(),
            Err(EngineError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn test_run_folds_results() {
        let mut engine = TransformationEngine::new(pipeline(), EngineSettings::default());
        let result = engine.run().await.unwrap();
        assert_eq!(engine.state(), EngineState::Finished);
        assert!(result.result);
        assert_eq!(result.exit_status, 0);
        assert_eq!(result.lines_written, 10);
        assert_eq!(result.lines_read, 10);
        assert_eq!(
            result.log_channel_id.as_deref(),
            Some(engine.run_id().to_string().as_str())
        );
        assert_eq!(engine.reports()[0].copy.step, "gen");
        assert!(matches!(
            engine.run().await,
            Err(EngineError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_run_future_is_send() {
        fn assert_send<T: Send>(_: &T) {}
        let mut engine = TransformationEngine::new(pipeline(), EngineSettings::default());
        let run = engine.run();
        assert_send(&run);
    }

    #[tokio::test]
    async fn test_supervise_aborts_workers_after_grace_period() {
        let shutdown = CancellationToken::new();
        let (alive, aborted) = tokio::sync::oneshot::channel::<()>();
        let mut tasks = JoinSet::new();
        tasks.spawn(async move {
            let _alive = alive;
            std::future::pending::<StepReport>().await
        });
        tasks.spawn(async { report("quick") });
        shutdown.cancel();

        let (reports, failures) =
            supervise(tasks, shutdown, Duration::from_millis(20)).await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].copy.step, "quick");
        assert!(failures.is_empty());
        assert!(aborted.await.is_err());
    }

    #[tokio::test]
    async fn test_supervise_without_deadline_waits_for_workers() {
        let shutdown = CancellationToken::new();
        let mut tasks = JoinSet::new();
        tasks.spawn(async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            report("slow")
        });
        shutdown.cancel();

        let (reports, _) = supervise(tasks, shutdown, Duration::MAX).await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].copy.step, "slow");
    }

    #[tokio::test]
    async fn test_stuck_step_is_aborted_and_reported_stopped() {
        let settings = EngineSettings::default().with_grace_period(Duration::from_millis(20));
        let mut engine = TransformationEngine::new(pipeline(), settings);
        engine.prepare().unwrap();
        let stuck = engine
            .workers
            .iter()
            .position(|(_, ctx)| ctx.copy().step == "out")
            .unwrap();
        engine.workers[stuck].0 = Box::new(Stuck);

        let stop = engine.stop_handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
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

        let out = engine
            .reports()
            .iter()
            .find(|r| r.copy.step == "out")
            .unwrap();
        assert_eq!(out.status, StepStatus::Stopped);
        assert!(out.result.stopped);
        assert!(engine
            .step_statuses()
            .iter()
            .any(|(copy, status)| copy.step == "out" && *status == StepStatus::Stopped));
    }
}
