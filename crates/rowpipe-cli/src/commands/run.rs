//! `rowpipe run` command implementation
//!
//! Runs a transformation file and writes the aggregate result.

use super::result_json;
use crate::error::Result;
use crate::OutputFormat;
use colored::Colorize;
use rowpipe_engine::{EngineSettings, ExecutionResult, TransformationConfig, TransformationEngine};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub file: PathBuf,
    pub output: Option<PathBuf>,
    pub format: OutputFormat,
    pub rowset_size: Option<usize>,
    pub batch_size: Option<usize>,
    pub grace_period: Option<u64>,
}

/// Run the transformation; returns its exit status.
pub async fn run(options: RunOptions) -> Result<i32> {
    let config = TransformationConfig::from_path(&options.file)?;
    let settings = settings(&options)?;

    let mut engine = TransformationEngine::new(config, settings);
    let stop = engine.stop_handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping transformation");
            stop.stop();
        }
    });
    let outcome = engine.run().await;
    interrupt.abort();
    let result = outcome?;

    let rendered = render(&result, options.format)?;
    match &options.output {
        Some(path) => {
            std::fs::write(path, rendered)?;
            let status = if result.result {
                "✓".green()
            } else {
                "✗".red()
            };
            eprintln!("{status} {result}");
            eprintln!("  Result written to {}", path.display());
        },
        None => print!("{rendered}"),
    }
    Ok(result.exit_status)
}

fn settings(options: &RunOptions) -> Result<EngineSettings> {
    let mut settings = EngineSettings::from_env()?;
    if let Some(size) = options.rowset_size {
        settings = settings.with_rowset_size(size);
    }
    if let Some(size) = options.batch_size {
        settings = settings.with_batch_size(size);
    }
    if let Some(secs) = options.grace_period {
        settings = settings.with_grace_period(Duration::from_secs(secs));
    }
    settings.validate()?;
    Ok(settings)
}

fn render(result: &ExecutionResult, format: OutputFormat) -> Result<String> {
    Ok(match format {
        OutputFormat::Xml => result.to_xml(),
        OutputFormat::Json => format!("{}\n", serde_json::to_string_pretty(&result_json(result))?),
        OutputFormat::Summary => {
            let mut text = format!("{result}\n");
            if let Some(log) = &result.log_text {
                text.push_str(log);
                text.push('\n');
            }
            text
        },
    })
}
