//! Bulk load step driving an external loader executable
//!
//! Rows are encoded as delimited records and either streamed to the
//! loader's stdin while they arrive (`AUTO_CONCURRENT`), collected in a
//! data file that is loaded once the input ends (`AUTO_END`), or only
//! written out for a later manual load (`MANUAL`). The loader's exit code
//! and report decide the step outcome.

pub mod config;
mod control;
mod process;

pub use config::{
    BulkLoaderConfig, DateMask, ExitClass, ExitCodes, FieldMapping, LoadAction, LoadMethod,
    LoaderConnection,
};
pub use control::{control_file_contents, RecordEncoder};
pub use process::{LoadReport, LoaderExit, LoaderProcess};

use super::{CheckRemark, CheckStatus};
use crate::catalog::{ddl_for, TableCatalog};
use crate::error::{RowFormatError, StepError};
use crate::result::{ResultFile, ResultFileType};
use crate::row::{RowMeta, ValueMeta};
use crate::step::{BatchOutcome, Step, StepContext};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};

/// Files of one load, with `${copy_nr}` already substituted
#[derive(Debug, Clone)]
struct LoadPaths {
    control: PathBuf,
    data: PathBuf,
    log: Option<PathBuf>,
    bad: Option<PathBuf>,
    discard: Option<PathBuf>,
}

impl LoadPaths {
    fn resolve(config: &BulkLoaderConfig, copy_nr: usize) -> Self {
        Self {
            control: config.control_path(copy_nr),
            data: config.data_path(copy_nr),
            log: config.log_path(copy_nr),
            bad: config.bad_path(copy_nr),
            discard: config.discard_path(copy_nr),
        }
    }
}

pub struct BulkLoaderStep {
    config: BulkLoaderConfig,
    encoder: RecordEncoder,
    paths: Option<LoadPaths>,
    data_file: Option<BufWriter<File>>,
    process: Option<LoaderProcess>,
    rows_sent: u64,
}

impl BulkLoaderStep {
    pub fn new(config: BulkLoaderConfig) -> Self {
        let encoder = RecordEncoder::new(&config);
        Self {
            config,
            encoder,
            paths: None,
            data_file: None,
            process: None,
            rows_sent: 0,
        }
    }

    fn paths(&self) -> Result<&LoadPaths, StepError> {
        self.paths
            .as_ref()
            .ok_or_else(|| StepError::internal("bulk loader used before init"))
    }

    fn spawn_loader(&self, pipe_stdin: bool) -> Result<LoaderProcess, StepError> {
        let paths = self.paths()?;
        let args = process::loader_args(
            &self.config,
            &paths.control,
            paths.log.as_deref(),
            paths.bad.as_deref(),
            paths.discard.as_deref(),
        );
        LoaderProcess::spawn(&self.config, &args, pipe_stdin)
    }

    async fn write_records(&mut self, ctx: &StepContext, records: &[u8]) -> Result<(), StepError> {
        if records.is_empty() {
            return Ok(());
        }
        if let Some(file) = self.data_file.as_mut() {
            file.write_all(records).await?;
            return Ok(());
        }

        let process = self
            .process
            .as_mut()
            .ok_or_else(|| StepError::internal("no loader to receive rows"))?;
        let program = process.program().to_string();
        let stdin = process
            .stdin()
            .ok_or_else(|| StepError::internal("loader stdin already closed"))?;
        tokio::select! {
            biased;
            _ = ctx.shutdown().cancelled() => Err(StepError::Interrupted),
            written = stdin.write_all(records) => written.map_err(|e| {
                StepError::ExternalProcessError {
                    program,
                    message: format!("loader stopped reading its input: {e}"),
                }
            }),
        }
    }

    /// Input is exhausted: run or collect the loader and judge its outcome.
    async fn finish(&mut self, ctx: &mut StepContext) -> Result<(), StepError> {
        if let Some(mut file) = self.data_file.take() {
            file.flush().await?;
            file.shutdown().await?;
        }

        let process = match self.config.load_method {
            LoadMethod::Manual => {
                ctx.result_mut().lines_output += self.rows_sent;
                self.register_files(ctx, true).await;
                tracing::info!(rows = self.rows_sent, "files written for manual load");
                return Ok(());
            },
            LoadMethod::AutoEnd => self.spawn_loader(false)?,
            LoadMethod::AutoConcurrent => self
                .process
                .take()
                .ok_or_else(|| StepError::internal("loader was not started"))?,
        };

        let program = process.program().to_string();
        let exit = process.wait(ctx.shutdown()).await?;
        self.judge(ctx, &program, exit).await
    }

    async fn judge(
        &mut self,
        ctx: &mut StepContext,
        program: &str,
        exit: LoaderExit,
    ) -> Result<(), StepError> {
        let paths = self.paths()?.clone();
        let mut report_text = exit.output;
        if let Some(log) = &paths.log {
            if let Ok(text) = tokio::fs::read_to_string(log).await {
                report_text.push_str(&text);
            }
        }
        tracing::debug!(output = %report_text, "loader output");

        let report = LoadReport::parse(&report_text)
            .map_err(|e| StepError::internal(format!("invalid report pattern: {e}")))?;
        let result = ctx.result_mut();
        result.lines_output += report.loaded.unwrap_or(self.rows_sent);
        result.lines_rejected += report.rejected;

        self.register_files(ctx, !self.config.erase_files).await;

        let Some(code) = exit.code else {
            return Err(StepError::ExternalProcessError {
                program: program.to_string(),
                message: "terminated by a signal".into(),
            });
        };

        match self.config.exit_codes.classify(code) {
            ExitClass::Ok => {
                tracing::info!(
                    code,
                    loaded = ?report.loaded,
                    rejected = report.rejected,
                    "loader finished"
                );
                Ok(())
            },
            ExitClass::Warning => {
                let warning = StepError::ExternalProcessWarning {
                    program: program.to_string(),
                    code,
                };
                if self.config.fail_on_warning {
                    return Err(warning.promote());
                }
                tracing::warn!(code, "loader finished with a warning");
                ctx.result_mut().append_log(warning.to_string());
                Ok(())
            },
            ExitClass::Error => Err(StepError::ExternalProcessError {
                program: program.to_string(),
                message: format!("exit code {code}"),
            }),
        }
    }

    /// Register the load files that still exist as result files.
    async fn register_files(&self, ctx: &mut StepContext, include_inputs: bool) {
        let Some(paths) = &self.paths else {
            return;
        };
        let mut files: Vec<(&Path, ResultFileType)> = Vec::new();
        if include_inputs {
            files.push((&paths.control, ResultFileType::General));
            if self.config.load_method != LoadMethod::AutoConcurrent {
                files.push((&paths.data, ResultFileType::General));
            }
        }
        if let Some(log) = &paths.log {
            files.push((log, ResultFileType::Log));
        }
        if let Some(bad) = &paths.bad {
            files.push((bad, ResultFileType::ErrorLine));
        }
        if let Some(discard) = &paths.discard {
            files.push((discard, ResultFileType::General));
        }

        let parent = ctx.transformation().to_string();
        let origin = ctx.step_name().to_string();
        for (path, file_type) in files {
            if tokio::fs::try_exists(path).await.unwrap_or(false) {
                ctx.result_mut().add_result_file(ResultFile::new(
                    file_type,
                    path,
                    Some(parent.clone()),
                    Some(origin.clone()),
                ));
            }
        }
    }
}

#[async_trait]
impl Step for BulkLoaderStep {
    fn kind(&self) -> &'static str {
        "bulk_loader"
    }

    async fn init(&mut self, ctx: &mut StepContext) -> Result<(), StepError> {
        self.config.validate()?;
        let paths = LoadPaths::resolve(&self.config, ctx.copy_nr());

        let contents = control_file_contents(
            &self.config,
            &paths.data,
            paths.bad.as_deref(),
            paths.discard.as_deref(),
        );
        tokio::fs::write(&paths.control, contents).await?;
        tracing::debug!(control_file = %paths.control.display(), "control file written");

        let method = self.config.load_method;
        if method != LoadMethod::AutoConcurrent {
            self.data_file = Some(BufWriter::new(File::create(&paths.data).await?));
        }
        self.paths = Some(paths);
        if method == LoadMethod::AutoConcurrent {
            self.process = Some(self.spawn_loader(true)?);
        }
        Ok(())
    }

    async fn process_one_batch(
        &mut self,
        ctx: &mut StepContext,
    ) -> Result<BatchOutcome, StepError> {
        let mut records = Vec::new();
        let mut exhausted = false;
        for _ in 0..ctx.batch_size() {
            match ctx.get_row().await? {
                Some(row) => {
                    records.extend_from_slice(&self.encoder.encode(&row)?);
                    self.rows_sent += 1;
                },
                None => {
                    exhausted = true;
                    break;
                },
            }
        }
        self.write_records(ctx, &records).await?;

        if exhausted {
            self.finish(ctx).await?;
            Ok(BatchOutcome::Finished)
        } else {
            Ok(BatchOutcome::HasMore)
        }
    }

    async fn dispose(&mut self, _ctx: &mut StepContext) {
        // a loader still held here is killed on drop
        if self.process.take().is_some() {
            tracing::warn!("loader abandoned before it finished");
        }
        self.data_file.take();

        if !self.config.erase_files || self.config.load_method == LoadMethod::Manual {
            return;
        }
        if let Some(paths) = &self.paths {
            for path in [&paths.control, &paths.data] {
                match tokio::fs::remove_file(path).await {
                    Ok(()) => tracing::debug!(file = %path.display(), "erased load file"),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
                    Err(e) => tracing::warn!(file = %path.display(), error = %e, "failed to erase load file"),
                }
            }
        }
    }
}

fn has_field(meta: &RowMeta, name: &str) -> bool {
    meta.fields()
        .iter()
        .any(|f| f.name.eq_ignore_ascii_case(name))
}

/// Validate a bulk loader definition against the target database and the
/// layout arriving from upstream.
pub async fn check(
    config: &BulkLoaderConfig,
    step: &str,
    input: Option<&RowMeta>,
    has_input: bool,
    catalog: &dyn TableCatalog,
) -> Vec<CheckRemark> {
    let mut remarks = Vec::new();
    let remark = |status, message: String| CheckRemark::new(status, step, message);

    if config.table.trim().is_empty() {
        remarks.push(remark(CheckStatus::Error, "no target table specified".into()));
    } else {
        remarks.push(remark(CheckStatus::Ok, "target table name is set".into()));
        match catalog.table_fields(&config.schema, &config.table).await {
            Ok(Some(fields)) => {
                remarks.push(remark(CheckStatus::Ok, "target table exists".into()));
                let missing: Vec<&str> = config
                    .mappings
                    .iter()
                    .map(FieldMapping::table_field)
                    .filter(|f| !has_field(&fields, f))
                    .collect();
                remarks.push(if missing.is_empty() {
                    remark(
                        CheckStatus::Ok,
                        "all fields to load were found in the target table".into(),
                    )
                } else {
                    remark(
                        CheckStatus::Error,
                        format!("fields missing in the target table: {}", missing.join(", ")),
                    )
                });
            },
            Ok(None) => remarks.push(remark(
                CheckStatus::Error,
                format!("could not read the layout of table '{}'", config.table),
            )),
            Err(e) => remarks.push(remark(CheckStatus::Error, format!("database error: {e}"))),
        }
    }

    match input.filter(|meta| !meta.is_empty()) {
        Some(meta) => {
            remarks.push(remark(
                CheckStatus::Ok,
                format!("step receives {} fields", meta.len()),
            ));
            let missing: Vec<&str> = config
                .mappings
                .iter()
                .map(|m| m.stream_field.as_str())
                .filter(|f| !has_field(meta, f))
                .collect();
            remarks.push(if missing.is_empty() {
                remark(
                    CheckStatus::Ok,
                    "all stream fields were found in the input".into(),
                )
            } else {
                remark(
                    CheckStatus::Error,
                    format!("fields missing in the input: {}", missing.join(", ")),
                )
            });
        },
        None => remarks.push(remark(
            CheckStatus::Error,
            "no fields received from previous steps".into(),
        )),
    }

    remarks.push(if has_input {
        remark(CheckStatus::Ok, "step receives rows from other steps".into())
    } else {
        remark(CheckStatus::Error, "no input received from other steps".into())
    });

    if config.load_method == LoadMethod::Manual {
        remarks.push(remark(
            CheckStatus::Warning,
            "load method MANUAL writes the control and data files but never runs the loader"
                .into(),
        ));
    }

    remarks
}

/// DDL needed before the load can run, `None` when the table already fits.
pub async fn sql_statements(
    config: &BulkLoaderConfig,
    input: Option<&RowMeta>,
    catalog: &dyn TableCatalog,
) -> Result<Option<String>, StepError> {
    let input = input
        .filter(|meta| !meta.is_empty())
        .ok_or_else(|| StepError::Configuration("step is not receiving any fields".into()))?;

    let fields = config
        .mappings
        .iter()
        .map(|m| -> Result<ValueMeta, StepError> {
            let source = input
                .search(&m.stream_field)
                .ok_or_else(|| RowFormatError::MissingField(m.stream_field.clone()))?;
            Ok(ValueMeta {
                name: m.table_field().to_string(),
                ..source.clone()
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    if config.table.trim().is_empty() {
        return Err(StepError::Configuration("no target table specified".into()));
    }

    let existing = catalog.table_fields(&config.schema, &config.table).await?;
    Ok(ddl_for(
        &config.schema,
        &config.table,
        existing.as_ref(),
        &RowMeta::new(fields),
    ))
}

/// Run the DDL from [`sql_statements`], if any. Returns the executed SQL.
pub async fn prepare_table(
    config: &BulkLoaderConfig,
    input: Option<&RowMeta>,
    catalog: &dyn TableCatalog,
) -> Result<Option<String>, StepError> {
    let sql = sql_statements(config, input, catalog).await?;
    if let Some(sql) = &sql {
        catalog.execute_ddl(sql).await?;
    }
    Ok(sql)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryCatalog;
    use crate::row::ValueType;

    fn config() -> BulkLoaderConfig {
        let mut config = BulkLoaderConfig::new("orders");
        config.mappings = vec![
            FieldMapping::new("id"),
            FieldMapping {
                stream_field: "customer".into(),
                table_field: Some("customer_name".into()),
                date_mask: None,
            },
        ];
        config
    }

    fn input() -> RowMeta {
        RowMeta::new(vec![
            ValueMeta::new("id", ValueType::Integer),
            ValueMeta::new("customer", ValueType::String).with_length(30, -1),
        ])
    }

    #[tokio::test]
    async fn test_check_reports_missing_table_fields() {
        let catalog = InMemoryCatalog::new().with_table(
            "",
            "orders",
            RowMeta::new(vec![ValueMeta::new("ID", ValueType::Integer)]),
        );
        let remarks = check(&config(), "load", Some(&input()), true, &catalog).await;

        let errors: Vec<&CheckRemark> = remarks
            .iter()
            .filter(|r| r.status == CheckStatus::Error)
            .collect();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("customer_name"));
        assert!(remarks.iter().all(|r| r.step == "load"));
    }

    #[tokio::test]
    async fn test_check_without_input_or_table() {
        let catalog = InMemoryCatalog::new();
        let remarks = check(&config(), "load", None, false, &catalog).await;
        let errors = remarks
            .iter()
            .filter(|r| r.status == CheckStatus::Error)
            .count();
        assert_eq!(errors, 3);
    }

    #[tokio::test]
    async fn test_check_warns_about_manual_load() {
        let catalog = InMemoryCatalog::new().with_table(
            "",
            "orders",
            RowMeta::new(vec![
                ValueMeta::new("id", ValueType::Integer),
                ValueMeta::new("customer_name", ValueType::String),
            ]),
        );
        let remarks = check(&config(), "load", Some(&input()), true, &catalog).await;
        assert!(remarks.iter().all(|r| r.status == CheckStatus::Ok));

        let mut manual = config();
        manual.load_method = LoadMethod::Manual;
        let remarks = check(&manual, "load", Some(&input()), true, &catalog).await;
        let warnings: Vec<&CheckRemark> = remarks
            .iter()
            .filter(|r| r.status == CheckStatus::Warning)
            .collect();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.contains("MANUAL"));
        assert!(remarks.iter().all(|r| r.status != CheckStatus::Error));
    }

    #[tokio::test]
    async fn test_sql_statements_create_missing_table() {
        let catalog = InMemoryCatalog::new();
        let sql = sql_statements(&config(), Some(&input()), &catalog)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            sql,
            "CREATE TABLE orders\n(\n  id BIGINT,\n  customer_name VARCHAR(30)\n);\n"
        );

        let executed = prepare_table(&config(), Some(&input()), &catalog)
            .await
            .unwrap();
        assert_eq!(executed.as_deref(), Some(sql.as_str()));
        assert_eq!(catalog.executed(), vec![sql]);
    }

    #[tokio::test]
    async fn test_sql_statements_need_input_fields() {
        let catalog = InMemoryCatalog::new();
        assert!(matches!(
            sql_statements(&config(), None, &catalog).await,
            Err(StepError::Configuration(_))
        ));
        let partial = RowMeta::new(vec![ValueMeta::new("id", ValueType::Integer)]);
        assert!(matches!(
            sql_statements(&config(), Some(&partial), &catalog).await,
            Err(StepError::RowFormat(RowFormatError::MissingField(_)))
        ));
    }
}
