//! Terminal steps: discard rows, or keep them as result rows

use crate::error::StepError;
use crate::step::{BatchOutcome, Step, StepContext};
use async_trait::async_trait;

/// Reads and counts every row, keeping nothing
#[derive(Debug, Default)]
pub struct SinkStep;

#[async_trait]
impl Step for SinkStep {
    fn kind(&self) -> &'static str {
        "sink"
    }

    async fn process_one_batch(
        &mut self,
        ctx: &mut StepContext,
    ) -> Result<BatchOutcome, StepError> {
        for _ in 0..ctx.batch_size() {
            if ctx.get_row().await?.is_none() {
                return Ok(BatchOutcome::Finished);
            }
        }
        Ok(BatchOutcome::HasMore)
    }
}

/// Copies every row into the step's result rows
#[derive(Debug, Default)]
pub struct RowsToResultStep;

#[async_trait]
impl Step for RowsToResultStep {
    fn kind(&self) -> &'static str {
        "rows_to_result"
    }

    async fn process_one_batch(
        &mut self,
        ctx: &mut StepContext,
    ) -> Result<BatchOutcome, StepError> {
        match ctx.get_row().await? {
            Some(row) => {
                ctx.result_mut().rows.push(row);
                Ok(BatchOutcome::HasMore)
            },
            None => Ok(BatchOutcome::Finished),
        }
    }
}
