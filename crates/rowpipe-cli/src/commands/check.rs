//! `rowpipe check` command implementation
//!
//! Prints the check remarks of every bulk loader, optionally with the DDL
//! its target table needs.

use crate::catalog;
use crate::error::{CliError, Result};
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Table};
use rowpipe_engine::{
    CheckStatus, EngineSettings, InMemoryCatalog, TransformationConfig, TransformationEngine,
};
use std::path::Path;

pub async fn run(file: &Path, catalog_file: Option<&Path>, sql: bool) -> Result<()> {
    let config = TransformationConfig::from_path(file)?;
    let catalog = match catalog_file {
        Some(path) => catalog::load(path)?,
        None => InMemoryCatalog::new(),
    };
    let engine = TransformationEngine::new(config, EngineSettings::default());

    let remarks = engine.check(&catalog).await;
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Status", "Step", "Remark"]);
    for remark in &remarks {
        let status = match remark.status {
            CheckStatus::Ok => remark.status.to_string().green(),
            CheckStatus::Warning => remark.status.to_string().yellow(),
            CheckStatus::Error => remark.status.to_string().red(),
        };
        table.add_row(vec![status.to_string(), remark.step.clone(), remark.message.clone()]);
    }
    println!("{table}");

    if sql {
        let statements = engine.sql_statements(&catalog).await?;
        if statements.is_empty() {
            println!("No DDL needed.");
        }
        for (step, statement) in statements {
            println!("-- {step}");
            println!("{statement}");
        }
    }

    let failed = remarks
        .iter()
        .filter(|r| r.status == CheckStatus::Error)
        .count();
    if failed > 0 {
        return Err(CliError::CheckFailed(failed));
    }
    Ok(())
}
