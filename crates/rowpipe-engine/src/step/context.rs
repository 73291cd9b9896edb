//! Per step copy runtime state

use super::{StatusHandle, StepStatus};
use crate::error::{RowFormatError, StepError};
use crate::result::ExecutionResult;
use crate::row::{Row, RowMeta};
use crate::rowset::{RowSet, StepCopy};
use futures::future::select_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// How a step spreads its rows over several outputs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Distribution {
    /// Each row goes to the next output in turn
    #[default]
    RoundRobin,
    /// Each row goes to every output
    Copy,
}

struct Input {
    rowset: Arc<RowSet>,
    layout: Option<Arc<RowMeta>>,
}

pub struct StepContext {
    copy: StepCopy,
    transformation: String,
    inputs: Vec<Input>,
    outputs: Vec<Arc<RowSet>>,
    distribution: Distribution,
    next_output: usize,
    batch_size: usize,
    result: ExecutionResult,
    status: StatusHandle,
    shutdown: CancellationToken,
}

impl StepContext {
    pub fn new(
        copy: StepCopy,
        transformation: impl Into<String>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            copy,
            transformation: transformation.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            distribution: Distribution::default(),
            next_output: 0,
            batch_size: 1,
            result: ExecutionResult::new(),
            status: StatusHandle::new(),
            shutdown,
        }
    }

    pub fn with_distribution(mut self, distribution: Distribution) -> Self {
        self.distribution = distribution;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn add_input(&mut self, rowset: Arc<RowSet>) {
        self.inputs.push(Input {
            rowset,
            layout: None,
        });
    }

    pub fn add_output(&mut self, rowset: Arc<RowSet>) {
        self.outputs.push(rowset);
    }

    pub fn copy(&self) -> &StepCopy {
        &self.copy
    }

    pub fn step_name(&self) -> &str {
        &self.copy.step
    }

    pub fn copy_nr(&self) -> usize {
        self.copy.copy
    }

    pub fn transformation(&self) -> &str {
        &self.transformation
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn status(&self) -> &StatusHandle {
        &self.status
    }

    /// Inputs that have not reached end-of-stream yet
    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    /// Schema of the first row seen on any input
    pub fn input_layout(&self) -> Option<&Arc<RowMeta>> {
        self.inputs.iter().find_map(|i| i.layout.as_ref())
    }

    pub fn result(&self) -> &ExecutionResult {
        &self.result
    }

    pub fn result_mut(&mut self) -> &mut ExecutionResult {
        &mut self.result
    }

    pub fn into_result(self) -> ExecutionResult {
        self.result
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn shutdown(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Next row from any input, `None` once every input is exhausted.
    ///
    /// Each input must keep the layout of its first row; a change fails
    /// with [`RowFormatError::SchemaChanged`].
    pub async fn get_row(&mut self) -> Result<Option<Row>, StepError> {
        loop {
            if self.inputs.is_empty() {
                return Ok(None);
            }

            let (outcome, index) = {
                let pending = self.inputs.iter().map(|i| Box::pin(i.rowset.get()));
                let (outcome, index, _) = select_all(pending).await;
                (outcome, index)
            };

            match outcome? {
                Some(row) => {
                    self.check_layout(index, &row)?;
                    self.result.lines_read += 1;
                    return Ok(Some(row));
                },
                None => {
                    let finished = self.inputs.remove(index);
                    tracing::trace!(rowset = %finished.rowset.name(), "input exhausted");
                },
            }
        }
    }

    fn check_layout(&mut self, index: usize, row: &Row) -> Result<(), RowFormatError> {
        let input = &mut self.inputs[index];
        match &input.layout {
            None => {
                input.layout = Some(row.meta().clone());
                Ok(())
            },
            Some(layout) if Arc::ptr_eq(layout, row.meta()) || layout == row.meta() => Ok(()),
            Some(layout) => Err(RowFormatError::SchemaChanged {
                rowset: input.rowset.name().to_string(),
                expected: layout.layout(),
                actual: row.meta().layout(),
            }),
        }
    }

    /// Hand a row to the outputs according to the distribution mode.
    /// Without outputs the row is discarded.
    pub async fn put_row(&mut self, row: Row) -> Result<(), StepError> {
        if self.outputs.is_empty() {
            return Ok(());
        }
        match self.distribution {
            Distribution::Copy => {
                let (last, rest) = self
                    .outputs
                    .split_last()
                    .ok_or_else(|| StepError::internal("no outputs"))?;
                for output in rest {
                    output.put(row.clone()).await?;
                }
                last.put(row).await?;
            },
            Distribution::RoundRobin => {
                let output = &self.outputs[self.next_output % self.outputs.len()];
                self.next_output = self.next_output.wrapping_add(1);
                output.put(row).await?;
            },
        }
        self.result.lines_written += 1;
        Ok(())
    }

    /// Send a row only to the copies of step `target`, in turn.
    pub async fn put_row_to(&mut self, target: &str, row: Row) -> Result<(), StepError> {
        let targets: Vec<&Arc<RowSet>> = self
            .outputs
            .iter()
            .filter(|o| o.destination().step == target)
            .collect();
        if targets.is_empty() {
            return Err(StepError::Configuration(format!(
                "step '{}' has no hop to '{target}'",
                self.copy.step
            )));
        }
        let output = targets[self.next_output % targets.len()];
        self.next_output = self.next_output.wrapping_add(1);
        output.put(row).await?;
        self.result.lines_written += 1;
        Ok(())
    }

    pub fn set_outputs_done(&self) {
        for output in &self.outputs {
            output.set_done();
        }
    }

    /// Record a step error and return the terminal status it leads to.
    pub(crate) fn fail(&mut self, error: StepError) -> StepStatus {
        if matches!(error, StepError::Interrupted) {
            tracing::debug!("step interrupted");
            return StepStatus::Stopped;
        }
        tracing::error!(error = %error, "step failed");
        self.result.nr_errors += 1;
        self.result.append_log(error.to_string());
        StepStatus::Error
    }
}
