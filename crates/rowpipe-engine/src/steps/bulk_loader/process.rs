//! Running the external loader and reading its report

use super::config::BulkLoaderConfig;
use crate::error::StepError;
use regex::Regex;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const LOADED_PATTERN: &str = r"(?m)(\d+)\s+Rows?\s+successfully\s+loaded";

const REJECTED_PATTERN: &str = r"(?m)(\d+)\s+Rows?\s+not\s+loaded\s+(?:due\s+to\s+data\s+errors|because\s+all\s+WHEN\s+clauses\s+were\s+failed)";

/// Row counts reported by the loader
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// `None` when the loader printed no load summary
    pub loaded: Option<u64>,
    pub rejected: u64,
}

impl LoadReport {
    /// Sum the counts found in loader output.
    pub fn parse(text: &str) -> Result<Self, regex::Error> {
        let loaded = Regex::new(LOADED_PATTERN)?;
        let rejected = Regex::new(REJECTED_PATTERN)?;
        Ok(Self {
            loaded: sum_counts(&loaded, text),
            rejected: sum_counts(&rejected, text).unwrap_or(0),
        })
    }
}

fn sum_counts(pattern: &Regex, text: &str) -> Option<u64> {
    let counts: Vec<u64> = pattern
        .captures_iter(text)
        .filter_map(|c| c.get(1)?.as_str().parse().ok())
        .collect();
    (!counts.is_empty()).then(|| counts.iter().sum())
}

/// Loader argument list: user arguments first, then the generated ones.
pub fn loader_args(
    config: &BulkLoaderConfig,
    control_file: &Path,
    log_file: Option<&Path>,
    bad_file: Option<&Path>,
    discard_file: Option<&Path>,
) -> Vec<String> {
    let mut args = config.loader_args.clone();
    args.push(format!("control={}", control_file.display()));
    if let Some(log) = log_file {
        args.push(format!("log={}", log.display()));
    }
    if let Some(bad) = bad_file {
        args.push(format!("bad={}", bad.display()));
    }
    if let Some(discard) = discard_file {
        args.push(format!("discard={}", discard.display()));
    }
    if let Some(userid) = userid(config, false) {
        args.push(format!("userid={userid}"));
    }
    args
}

/// `user/password@database`, with the password masked for logging.
fn userid(config: &BulkLoaderConfig, masked: bool) -> Option<String> {
    let conn = &config.connection;
    let user = conn.user.as_deref().filter(|u| !u.is_empty())?;
    let mut userid = user.to_string();
    if let Some(password) = conn.password.as_deref().filter(|p| !p.is_empty()) {
        userid.push('/');
        if masked {
            userid.push_str("******");
        } else {
            userid.push_str(password);
        }
    }
    let database = config
        .db_name_override
        .as_deref()
        .filter(|d| !d.is_empty())
        .or(conn.database.as_deref().filter(|d| !d.is_empty()));
    if let Some(database) = database {
        userid.push('@');
        userid.push_str(database);
    }
    Some(userid)
}

/// Command line as it may appear in logs
pub fn display_command(config: &BulkLoaderConfig, args: &[String]) -> String {
    let secret = userid(config, false).map(|u| format!("userid={u}"));
    let shown = userid(config, true).map(|u| format!("userid={u}"));
    std::iter::once(config.loader.clone())
        .chain(args.iter().map(|a| match (&secret, &shown) {
            (Some(secret), Some(shown)) if a == secret => shown.clone(),
            _ => a.clone(),
        }))
        .collect::<Vec<_>>()
        .join(" ")
}

/// A running loader with its output being collected
pub struct LoaderProcess {
    program: String,
    child: Child,
    stdout: Option<JoinHandle<String>>,
    stderr: Option<JoinHandle<String>>,
}

/// Exit of a loader run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderExit {
    /// `None` when the process was ended by a signal
    pub code: Option<i32>,
    pub output: String,
}

impl LoaderProcess {
    /// Start the loader. Stdin is piped only when rows are streamed to it.
    pub fn spawn(
        config: &BulkLoaderConfig,
        args: &[String],
        pipe_stdin: bool,
    ) -> Result<Self, StepError> {
        tracing::info!(command = %display_command(config, args), "starting loader");
        let mut child = Command::new(&config.loader)
            .args(args)
            .stdin(if pipe_stdin {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| StepError::ExternalProcessError {
                program: config.loader.clone(),
                message: format!("failed to start: {e}"),
            })?;

        let stdout = child.stdout.take().map(collect);
        let stderr = child.stderr.take().map(collect);
        Ok(Self {
            program: config.loader.clone(),
            child,
            stdout,
            stderr,
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn stdin(&mut self) -> Option<&mut tokio::process::ChildStdin> {
        self.child.stdin.as_mut()
    }

    /// Close stdin so the loader sees the end of its input.
    pub fn close_stdin(&mut self) {
        self.child.stdin.take();
    }

    /// Wait for the loader to exit; a stop request kills it.
    pub async fn wait(mut self, shutdown: &CancellationToken) -> Result<LoaderExit, StepError> {
        self.close_stdin();
        let status = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                tracing::warn!(program = %self.program, "stopping loader");
                let _ = self.child.kill().await;
                return Err(StepError::Interrupted);
            }
            status = self.child.wait() => status?,
        };

        let mut output = String::new();
        for handle in [self.stdout.take(), self.stderr.take()].into_iter().flatten() {
            match handle.await {
                Ok(text) => output.push_str(&text),
                Err(e) => tracing::warn!(error = %e, "failed to collect loader output"),
            }
        }

        Ok(LoaderExit {
            code: status.code(),
            output,
        })
    }
}

fn collect<R>(mut reader: R) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buffer = Vec::new();
        if let Err(e) = reader.read_to_end(&mut buffer).await {
            tracing::debug!(error = %e, "loader output closed early");
        }
        String::from_utf8_lossy(&buffer).into_owned()
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::steps::bulk_loader::config::LoaderConnection;
    use std::path::PathBuf;

    const LOG: &str = "\
Table ORDERS:
  998 Rows successfully loaded.
  2 Rows not loaded due to data errors.
  0 Rows not loaded because all WHEN clauses were failed.
  0 Rows not loaded because all fields were null.
";

    #[test]
    fn test_parse_report() {
        let report = LoadReport::parse(LOG).unwrap();
        assert_eq!(report.loaded, Some(998));
        assert_eq!(report.rejected, 2);
    }

    #[test]
    fn test_parse_report_sums_tables_and_handles_silence() {
        let twice = format!("{LOG}{LOG}");
        assert_eq!(LoadReport::parse(&twice).unwrap().loaded, Some(1996));
        assert_eq!(
            LoadReport::parse("nothing here").unwrap(),
            LoadReport::default()
        );
    }

    #[test]
    fn test_args_follow_user_arguments_and_mask_password() {
        let mut config = BulkLoaderConfig::new("orders");
        config.loader_args = vec!["-c".into(), "exit 0".into()];
        config.connection = LoaderConnection {
            user: Some("scott".into()),
            password: Some("tiger".into()),
            database: Some("orcl".into()),
        };
        let args = loader_args(
            &config,
            &PathBuf::from("control0.cfg"),
            Some(&PathBuf::from("load0.log")),
            None,
            None,
        );
        assert_eq!(
            args,
            vec![
                "-c",
                "exit 0",
                "control=control0.cfg",
                "log=load0.log",
                "userid=scott/tiger@orcl"
            ]
        );
        let shown = display_command(&config, &args);
        assert!(shown.ends_with("userid=scott/******@orcl"));
        assert!(!shown.contains("tiger"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_wait_collects_output_and_code() {
        let mut config = BulkLoaderConfig::new("orders");
        config.loader = "sh".into();
        let args = vec![
            "-c".to_string(),
            "echo '5 Rows successfully loaded.'; exit 2".to_string(),
        ];
        let process = LoaderProcess::spawn(&config, &args, false).unwrap();
        let exit = process.wait(&CancellationToken::new()).await.unwrap();
        assert_eq!(exit.code, Some(2));
        assert_eq!(LoadReport::parse(&exit.output).unwrap().loaded, Some(5));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_kills_loader() {
        let mut config = BulkLoaderConfig::new("orders");
        config.loader = "sh".into();
        let args = vec!["-c".to_string(), "sleep 30".to_string()];
        let process = LoaderProcess::spawn(&config, &args, false).unwrap();
        let token = CancellationToken::new();
        token.cancel();
        assert!(matches!(
            process.wait(&token).await,
            Err(StepError::Interrupted)
        ));
    }

    #[test]
    fn test_spawn_failure_is_fatal() {
        let mut config = BulkLoaderConfig::new("orders");
        config.loader = "/definitely/not/a/loader".into();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let err = runtime
            .block_on(async { LoaderProcess::spawn(&config, &[], false).map(|_| ()) })
            .unwrap_err();
        assert!(err.is_fatal());
    }
}
