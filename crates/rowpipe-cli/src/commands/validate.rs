//! `rowpipe validate` command implementation

use crate::error::Result;
use colored::Colorize;
use rowpipe_engine::{EngineSettings, TransformationConfig, TransformationEngine};
use std::path::Path;

/// Load the definition and validate its graph.
pub async fn run(file: &Path) -> Result<()> {
    let config = TransformationConfig::from_path(file)?;
    let steps = config.steps.len();
    let copies: usize = config.steps.iter().map(|s| s.copies).sum();
    let hops = config.enabled_hops().count();

    let engine = TransformationEngine::new(config, EngineSettings::default());
    engine.validate()?;

    println!(
        "{} {} is valid",
        "✓".green(),
        engine.config().name.bold()
    );
    println!("  Steps:  {steps} ({copies} copies)");
    println!("  Hops:   {hops}");
    Ok(())
}
