//! `rowpipe result` command implementation

use super::result_json;
use crate::error::Result;
use colored::Colorize;
use rowpipe_engine::ExecutionResult;
use std::path::Path;

pub async fn run(file: &Path, json: bool) -> Result<()> {
    let xml = tokio::fs::read_to_string(file).await?;
    let result = ExecutionResult::from_xml(&xml)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result_json(&result))?);
        return Ok(());
    }

    let headline = if result.result {
        result.to_string().green()
    } else {
        result.to_string().red()
    };
    println!("{headline}");
    println!("  Read:     {}", result.lines_read);
    println!("  Written:  {}", result.lines_written);
    println!("  Input:    {}", result.lines_input);
    println!("  Output:   {}", result.lines_output);
    println!("  Rejected: {}", result.lines_rejected);
    println!("  Rows:     {}", result.rows.len());
    for file in result.result_files_list() {
        println!("  File:     {} ({})", file.path, file.file_type.code());
    }
    if let Some(log) = &result.log_text {
        println!();
        println!("{log}");
    }
    Ok(())
}
