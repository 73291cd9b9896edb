//! CLI command implementations
//!
//! Each subcommand has its own module with a `run` function.

pub mod check;
pub mod result;
pub mod run;
pub mod validate;

use rowpipe_engine::ExecutionResult;
use serde_json::json;

/// Counters and outcome of a result as JSON
pub(crate) fn result_json(result: &ExecutionResult) -> serde_json::Value {
    json!({
        "lines_input": result.lines_input,
        "lines_output": result.lines_output,
        "lines_read": result.lines_read,
        "lines_written": result.lines_written,
        "lines_updated": result.lines_updated,
        "lines_deleted": result.lines_deleted,
        "lines_rejected": result.lines_rejected,
        "nr_errors": result.nr_errors,
        "nr_files_retrieved": result.nr_files_retrieved,
        "result": result.result,
        "exit_status": result.exit_status,
        "stopped": result.stopped,
        "log_channel_id": result.log_channel_id,
        "log_text": result.log_text,
        "rows": result.rows.len(),
        "files": result
            .result_files_list()
            .iter()
            .map(|f| f.path.as_str())
            .collect::<Vec<_>>(),
    })
}
