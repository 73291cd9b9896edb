//! Rowpipe CLI - Main entry point

use anyhow::Context;
use clap::Parser;
use rowpipe_cli::commands::{self, run::RunOptions};
use rowpipe_cli::{Cli, Commands};
use rowpipe_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use std::process::ExitCode;
use tracing::error;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.markdown_help {
        println!("{}", clap_markdown::help_markdown::<Cli>());
        return ExitCode::SUCCESS;
    }

    let Some(command) = cli.command else {
        eprintln!("Error: A subcommand is required");
        eprintln!();
        eprintln!("For more information, try '--help'.");
        return ExitCode::from(2);
    };

    // logs go to stderr so results on stdout stay clean
    let log_config = LogConfig::builder()
        .level(if cli.verbose {
            LogLevel::Debug
        } else {
            LogLevel::Warn
        })
        .output(LogOutput::Console)
        .log_file_prefix("rowpipe")
        .build();
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);
    let _guard = init_logging(&log_config).ok();

    match execute(command).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

async fn execute(command: Commands) -> anyhow::Result<u8> {
    match command {
        Commands::Run {
            file,
            output,
            format,
            rowset_size,
            batch_size,
            grace_period,
        } => {
            let context = format!("failed to run {}", file.display());
            let status = commands::run::run(RunOptions {
                file,
                output,
                format,
                rowset_size,
                batch_size,
                grace_period,
            })
            .await
            .context(context)?;
            Ok(u8::try_from(status).unwrap_or(1))
        },

        Commands::Validate { file } => {
            commands::validate::run(&file).await?;
            Ok(0)
        },

        Commands::Check { file, catalog, sql } => {
            commands::check::run(&file, catalog.as_deref(), sql).await?;
            Ok(0)
        },

        Commands::Result { file, json } => {
            commands::result::run(&file, json)
                .await
                .with_context(|| format!("failed to read {}", file.display()))?;
            Ok(0)
        },
    }
}
