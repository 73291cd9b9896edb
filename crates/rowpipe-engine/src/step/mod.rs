//! Step lifecycle: the [`Step`] trait, status tracking and the worker loop
//!
//! Every step copy runs [`run_step`] on its own tokio task. The loop calls
//! `init`, then `process_one_batch` until the step reports
//! [`BatchOutcome::Finished`], fails, or observes a stop request, and always
//! ends by marking the outputs done and calling `dispose`.

mod context;

pub use context::{Distribution, StepContext};

use crate::error::StepError;
use crate::result::ExecutionResult;
use crate::rowset::StepCopy;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tracing::Instrument;

/// What a step reports after one unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    HasMore,
    Finished,
}

/// Lifecycle status of one step copy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    NotStarted = 0,
    Running = 1,
    Finished = 2,
    Stopped = 3,
    Error = 4,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Finished | StepStatus::Stopped | StepStatus::Error
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::NotStarted => "not_started",
            StepStatus::Running => "running",
            StepStatus::Finished => "finished",
            StepStatus::Stopped => "stopped",
            StepStatus::Error => "error",
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => StepStatus::NotStarted,
            1 => StepStatus::Running,
            2 => StepStatus::Finished,
            3 => StepStatus::Stopped,
            _ => StepStatus::Error,
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared view of a step copy's status
///
/// Transitions only move forward: `NotStarted → Running → terminal`, and a
/// terminal status never changes again.
#[derive(Debug, Clone, Default)]
pub struct StatusHandle(Arc<AtomicU8>);

impl StatusHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> StepStatus {
        StepStatus::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move to `next`; returns `false` when the transition is not allowed.
    pub fn advance(&self, next: StepStatus) -> bool {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                let current = StepStatus::from_u8(raw);
                let allowed = match (current, next) {
                    (StepStatus::NotStarted, StepStatus::Running) => true,
                    (StepStatus::NotStarted | StepStatus::Running, n) => n.is_terminal(),
                    _ => false,
                };
                allowed.then_some(next as u8)
            })
            .is_ok()
    }
}

/// A unit of work in a transformation
///
/// Implementations read rows through [`StepContext::get_row`], write them
/// through [`StepContext::put_row`] and record counters on
/// [`StepContext::result_mut`].
#[async_trait]
pub trait Step: Send {
    /// Short type name used in logs
    fn kind(&self) -> &'static str;

    /// Prepare resources. A failure here ends the step in error.
    async fn init(&mut self, _ctx: &mut StepContext) -> Result<(), StepError> {
        Ok(())
    }

    /// Do a bounded amount of work.
    ///
    /// Return [`BatchOutcome::Finished`] once every input reached
    /// end-of-stream and nothing is left buffered.
    async fn process_one_batch(&mut self, ctx: &mut StepContext)
        -> Result<BatchOutcome, StepError>;

    /// Release resources; called exactly once whenever `init` ran.
    async fn dispose(&mut self, _ctx: &mut StepContext) {}
}

/// Final report of one step copy
#[derive(Debug, Clone)]
pub struct StepReport {
    pub copy: StepCopy,
    pub status: StepStatus,
    pub result: ExecutionResult,
}

/// Drive one step copy from `init` to a terminal status.
pub async fn run_step(mut step: Box<dyn Step>, mut ctx: StepContext) -> StepReport {
    let span = tracing::info_span!(
        "step",
        step = %ctx.copy().step,
        copy = ctx.copy().copy,
        kind = step.kind()
    );

    async move {
        ctx.status().advance(StepStatus::Running);
        tracing::debug!("step started");

        let status = match step.init(&mut ctx).await {
            Ok(()) => drive(step.as_mut(), &mut ctx).await,
            Err(e) => ctx.fail(e),
        };

        ctx.set_outputs_done();
        step.dispose(&mut ctx).await;
        ctx.status().advance(status);

        let copy = ctx.copy().clone();
        let mut result = ctx.into_result();
        result.result = status == StepStatus::Finished && result.nr_errors == 0;
        result.stopped = status == StepStatus::Stopped;

        tracing::info!(
            status = %status,
            lines_read = result.lines_read,
            lines_written = result.lines_written,
            lines_output = result.lines_output,
            lines_rejected = result.lines_rejected,
            errors = result.nr_errors,
            "step ended"
        );

        StepReport {
            copy,
            status,
            result,
        }
    }
    .instrument(span)
    .await
}

async fn drive(step: &mut dyn Step, ctx: &mut StepContext) -> StepStatus {
    loop {
        if ctx.is_stopped() {
            return StepStatus::Stopped;
        }
        match step.process_one_batch(ctx).await {
            Ok(BatchOutcome::HasMore) => {},
            Ok(BatchOutcome::Finished) => return StepStatus::Finished,
            Err(e) if !e.is_fatal() && !matches!(e, StepError::Interrupted) => {
                tracing::warn!(error = %e, "step reported a warning");
                ctx.result_mut().append_log(e.to_string());
            },
            Err(e) => return ctx.fail(e),
        }
    }
}
