//! Build automation tasks for Rowpipe
//!
//! - Generating the CLI reference from the clap definitions

use anyhow::Context;
use clap::Parser;
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Build automation tasks for Rowpipe", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Parser)]
enum Command {
    /// Generate the CLI reference in markdown
    GenerateCliDocs {
        /// Output directory for generated documentation
        #[arg(short, long, default_value = "docs")]
        output_dir: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::GenerateCliDocs { output_dir } => generate_cli_docs(&output_dir)?,
    }

    Ok(())
}

fn generate_cli_docs(output_dir: &str) -> anyhow::Result<()> {
    println!("Generating CLI documentation...");

    let markdown = clap_markdown::help_markdown::<rowpipe_cli::Cli>();

    let content = format!(
        r#"# Rowpipe CLI Reference

This documentation is auto-generated from the CLI source code. Last updated: {}.

## Quick Start

```bash
# Check a definition
rowpipe validate orders.yaml

# Run it and keep the result document
rowpipe run orders.yaml --output result.xml

# Inspect the stored result
rowpipe result result.xml
```

## Commands

{}

## Environment Variables

- `ROWPIPE_ROWSET_SIZE` - Rows buffered per row set (default: `10000`)
- `ROWPIPE_BATCH_SIZE` - Rows per batch (default: `1000`)
- `ROWPIPE_GRACE_PERIOD_SECS` - Seconds workers get to stop before they are aborted (default: `10`)
- `ROWPIPE_LOG_LEVEL`, `ROWPIPE_LOG_OUTPUT`, `ROWPIPE_LOG_FORMAT`, `ROWPIPE_LOG_DIR` - Logging

## Transformation Files

```yaml
name: orders
steps:
  - name: gen
    type: generator
    limit: 1000
    sequence_field: id
  - name: recent
    type: filter
    field: id
    operator: ">"
    value: "500"
  - name: load
    type: bulk_loader
    table: orders
    mappings:
      - stream_field: id
        table_field: order_id
hops:
  - from: gen
    to: recent
  - from: recent
    to: load
```

---

*To update, run `cargo xtask generate-cli-docs`.*
"#,
        chrono::Utc::now().format("%Y-%m-%d"),
        markdown
    );

    let output_path = PathBuf::from(output_dir);
    fs::create_dir_all(&output_path)
        .with_context(|| format!("failed to create {}", output_path.display()))?;

    let file_path = output_path.join("cli-reference.md");
    fs::write(&file_path, content)?;

    println!("✅ Generated CLI documentation at: {}", file_path.display());
    Ok(())
}
