//! Secure Executor
//!
//! Runs a sanitized argv array as a child process without a shell. The child
//! gets a cleared environment, its own process group, a hard deadline and a
//! cap on captured output. Failures never escape as errors: every path ends
//! in an [`ExecutionResult`] unless the batch was cancelled.

use super::process::{kill_group, terminate_tree};
use super::sanitizer::{prepare_environment, CommandRequest, CommandSanitizer};
use super::timeout::ExecutionTimeout;
use super::validator::{validate_command_safety, ValidationError};
use crate::metrics::{self, InFlightGuard};
use crate::resolve::chain::ChainVariables;
use crate::resolve::preset::{PresetError, PresetResolver};
use crate::result::{ExecutionResult, RETURN_CODE_INTERNAL_FAILURE};
use std::collections::BTreeMap;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command as TokioCommand;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default timeout for template execution in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Maximum captured size per stream in bytes (1 MiB)
pub const MAX_OUTPUT_SIZE: usize = 1024 * 1024;

/// Default wait between SIGTERM and SIGKILL
pub const DEFAULT_KILL_GRACE_MS: u64 = 2000;

/// Appended to a stream that hit the output cap
pub const TRUNCATION_MARKER: &str = "\n... [output truncated]";

const READ_CHUNK_SIZE: usize = 8192;

static NO_ENTRIES: BTreeMap<String, String> = BTreeMap::new();

/// Configuration for template execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Deadline for templates that do not set one (default: 300 seconds)
    pub default_timeout: Duration,

    /// Cap per output stream in bytes (default: 1 MiB)
    pub max_output_size: usize,

    /// Wait between graceful and forced termination (default: 2 seconds)
    pub kill_grace: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_output_size: MAX_OUTPUT_SIZE,
            kill_grace: Duration::from_millis(DEFAULT_KILL_GRACE_MS),
        }
    }
}

impl ExecutorConfig {
    /// Set the default timeout in seconds
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.default_timeout = Duration::from_secs(timeout_secs);
        self
    }

    /// Set the per-stream output cap
    pub fn with_max_output_size(mut self, size: usize) -> Self {
        self.max_output_size = size;
        self
    }

    /// Set the termination grace period
    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }
}

/// Parameters of one template execution
#[derive(Debug, Clone, Copy)]
pub struct ExecutionRequest<'a> {
    pub template_name: &'a str,
    pub tool: &'a str,
    pub args: &'a [String],
    pub target: &'a str,
    pub env: &'a BTreeMap<String, String>,
    pub wordlist: Option<&'a str>,
    /// Template deadline in seconds; `None` uses the executor default
    pub timeout_secs: Option<u64>,
    pub preset: Option<&'a str>,
    pub variables: &'a BTreeMap<String, String>,
    pub chain_variables: Option<&'a ChainVariables>,
    pub presets: Option<&'a PresetResolver>,
}

impl<'a> ExecutionRequest<'a> {
    /// Request with no env, variables, wordlist, preset or chain values
    pub fn new(template_name: &'a str, tool: &'a str, args: &'a [String], target: &'a str) -> Self {
        Self {
            template_name,
            tool,
            args,
            target,
            env: &NO_ENTRIES,
            wordlist: None,
            timeout_secs: None,
            preset: None,
            variables: &NO_ENTRIES,
            chain_variables: None,
            presets: None,
        }
    }
}

/// How an execution ended
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// A result exists: success, failure or timeout
    Finished(ExecutionResult),
    /// Stopped by the batch's cancellation token; no result
    Cancelled,
}

impl ExecutionOutcome {
    /// The result, if the execution was not cancelled
    pub fn into_result(self) -> Option<ExecutionResult> {
        match self {
            Self::Finished(result) => Some(result),
            Self::Cancelled => None,
        }
    }
}

/// Why a command could not be built
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PreparationError {
    #[error(transparent)]
    Preset(#[from] PresetError),

    #[error("Template references preset '{0}' but no preset configuration is loaded")]
    MissingPresetResolver(String),

    #[error("Template has no arguments and its preset resolved to none")]
    NoArguments,

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),
}

#[derive(Debug, Default)]
struct CapturedOutput {
    data: Vec<u8>,
    truncated: bool,
}

impl CapturedOutput {
    fn decode(self) -> String {
        let mut text = String::from_utf8_lossy(&self.data).into_owned();
        if self.truncated {
            text.push_str(TRUNCATION_MARKER);
        }
        text
    }
}

type ReaderTask = JoinHandle<std::io::Result<CapturedOutput>>;

enum Waited {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

/// Template executor
///
/// Holds only its sanitizer and fixed defaults, so one instance can serve
/// every concurrent task in a batch.
#[derive(Debug, Clone, Default)]
pub struct SecureExecutor {
    sanitizer: CommandSanitizer,
    config: ExecutorConfig,
}

impl SecureExecutor {
    /// Create an executor with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an executor with custom configuration
    pub fn with_config(config: ExecutorConfig) -> Self {
        Self {
            sanitizer: CommandSanitizer::new(),
            config,
        }
    }

    /// Get a reference to the config
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Resolve the preset, sanitize, and run the final safety gate
    ///
    /// # Errors
    ///
    /// Fails when the preset is missing, the template has nothing to run, or
    /// any value breaks a validation rule.
    pub fn prepare_command(
        &self,
        request: &ExecutionRequest<'_>,
    ) -> Result<Vec<String>, PreparationError> {
        let preset_args = match request.preset {
            Some(name) => {
                let resolver = request
                    .presets
                    .ok_or_else(|| PreparationError::MissingPresetResolver(name.to_string()))?;
                resolver.resolve_preset(name)?
            }
            None => Vec::new(),
        };

        if request.args.is_empty() && preset_args.is_empty() {
            return Err(PreparationError::NoArguments);
        }

        let no_chain = ChainVariables::new();
        let command = self.sanitizer.sanitize_command(&CommandRequest {
            tool: request.tool,
            args: request.args,
            target: request.target,
            wordlist: request.wordlist,
            preset_args: &preset_args,
            variables: request.variables,
            chain_variables: request.chain_variables.unwrap_or(&no_chain),
        })?;

        validate_command_safety(&command)?;
        Ok(command)
    }

    /// Execute one template
    ///
    /// Returns [`ExecutionOutcome::Cancelled`] only when `cancel` fires
    /// before the process finishes; the process tree is terminated first.
    pub async fn execute_template(
        &self,
        request: &ExecutionRequest<'_>,
        cancel: &CancellationToken,
    ) -> ExecutionOutcome {
        let start = Instant::now();

        let command = match self.prepare_command(request) {
            Ok(command) => command,
            Err(e) => {
                if let PreparationError::Validation(ref rejected) = e {
                    metrics::record_rejection(rejected.rule());
                    warn!(
                        template = request.template_name,
                        rule = rejected.rule(),
                        "Template rejected by validation"
                    );
                } else {
                    warn!(template = request.template_name, "Template preparation failed: {}", e);
                }
                return self.finish(ExecutionResult::failure(
                    request.template_name,
                    request.tool,
                    request.target,
                    e.to_string(),
                    start.elapsed().as_secs_f64(),
                ));
            }
        };

        if cancel.is_cancelled() {
            return ExecutionOutcome::Cancelled;
        }

        let timeout = ExecutionTimeout::for_template(request.timeout_secs, self.config.default_timeout);
        self.run(request, &command, timeout, start, cancel).await
    }

    async fn run(
        &self,
        request: &ExecutionRequest<'_>,
        command: &[String],
        timeout: ExecutionTimeout,
        start: Instant,
        cancel: &CancellationToken,
    ) -> ExecutionOutcome {
        let env = prepare_environment(request.env);

        let mut process = TokioCommand::new(&command[0]);
        process
            .args(&command[1..])
            .env_clear()
            .envs(&env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        process.process_group(0);

        info!(
            template = request.template_name,
            tool = request.tool,
            args = command.len() - 1,
            timeout_secs = timeout.duration().as_secs(),
            "Executing template"
        );

        let mut child = match process.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(tool = request.tool, "Failed to spawn process: {}", e);
                return self.finish(ExecutionResult::failure(
                    request.template_name,
                    request.tool,
                    request.target,
                    format!("Failed to spawn process '{}': {}", request.tool, e),
                    start.elapsed().as_secs_f64(),
                ));
            }
        };
        let _in_flight = InFlightGuard::new();
        let pid = child.id();

        let limit = self.config.max_output_size;
        let stdout_task = child
            .stdout
            .take()
            .map(|out| tokio::spawn(read_capped(out, limit)));
        let stderr_task = child
            .stderr
            .take()
            .map(|err| tokio::spawn(read_capped(err, limit)));

        let waited = tokio::select! {
            status = child.wait() => Waited::Exited(status),
            _ = tokio::time::sleep(timeout.duration()) => Waited::TimedOut,
            _ = cancel.cancelled() => Waited::Cancelled,
        };

        match waited {
            Waited::Cancelled => {
                info!(template = request.template_name, "Execution cancelled, terminating process tree");
                terminate_tree(&mut child, self.config.kill_grace).await;
                for task in [stdout_task, stderr_task].into_iter().flatten() {
                    task.abort();
                }
                ExecutionOutcome::Cancelled
            }
            Waited::TimedOut => {
                warn!(
                    template = request.template_name,
                    "Execution timed out after {:?}",
                    timeout.duration()
                );
                terminate_tree(&mut child, self.config.kill_grace).await;
                let (stdout, stderr) = self.collect_output(pid, stdout_task, stderr_task).await;
                self.finish(ExecutionResult::timeout(
                    request.template_name,
                    request.tool,
                    request.target,
                    stdout,
                    stderr,
                    timeout.duration().as_secs(),
                    start.elapsed().as_secs_f64(),
                ))
            }
            Waited::Exited(Ok(status)) => {
                let (stdout, stderr) = self.collect_output(pid, stdout_task, stderr_task).await;
                // Background members of the group must not outlive the template
                if let Some(pid) = pid {
                    kill_group(pid);
                }
                let return_code = exit_code(status);
                if return_code == 0 {
                    info!(template = request.template_name, "Template completed");
                } else {
                    warn!(template = request.template_name, return_code, "Template exited with failure");
                }
                self.finish(ExecutionResult::exited(
                    request.template_name,
                    request.tool,
                    request.target,
                    return_code,
                    stdout,
                    stderr,
                    start.elapsed().as_secs_f64(),
                ))
            }
            Waited::Exited(Err(e)) => {
                warn!(template = request.template_name, "Failed to wait for process: {}", e);
                terminate_tree(&mut child, self.config.kill_grace).await;
                let (stdout, stderr) = self.collect_output(pid, stdout_task, stderr_task).await;
                self.finish(ExecutionResult {
                    stdout,
                    stderr,
                    ..ExecutionResult::failure(
                        request.template_name,
                        request.tool,
                        request.target,
                        format!("Failed to wait for process: {}", e),
                        start.elapsed().as_secs_f64(),
                    )
                })
            }
        }
    }

    /// Wait for both readers to hit EOF
    ///
    /// A background grandchild can keep the pipes open after the child
    /// exits. If the readers do not finish within the grace period the
    /// process group is killed; if they still hang, they are aborted.
    async fn collect_output(
        &self,
        pid: Option<u32>,
        stdout_task: Option<ReaderTask>,
        stderr_task: Option<ReaderTask>,
    ) -> (String, String) {
        let aborts: Vec<_> = [&stdout_task, &stderr_task]
            .into_iter()
            .flatten()
            .map(|task| task.abort_handle())
            .collect();

        let readers = async { tokio::join!(join_reader(stdout_task), join_reader(stderr_task)) };
        tokio::pin!(readers);

        let grace = self.config.kill_grace;
        let (stdout, stderr) = match tokio::time::timeout(grace, &mut readers).await {
            Ok(captured) => captured,
            Err(_) => {
                debug!("Output pipes still open after exit, killing process group");
                if let Some(pid) = pid {
                    kill_group(pid);
                }
                match tokio::time::timeout(grace, &mut readers).await {
                    Ok(captured) => captured,
                    Err(_) => {
                        warn!("Abandoning output readers that never reached EOF");
                        for abort in aborts {
                            abort.abort();
                        }
                        (CapturedOutput::default(), CapturedOutput::default())
                    }
                }
            }
        };

        (stdout.decode(), stderr.decode())
    }

    fn finish(&self, result: ExecutionResult) -> ExecutionOutcome {
        metrics::record_result(&result);
        ExecutionOutcome::Finished(result)
    }
}

/// Read a stream to EOF, keeping at most `limit` bytes
///
/// Keeps draining past the limit so the child never blocks on a full pipe.
async fn read_capped<R>(mut reader: R, limit: usize) -> std::io::Result<CapturedOutput>
where
    R: AsyncRead + Unpin,
{
    let mut captured = CapturedOutput {
        data: Vec::with_capacity(limit.min(64 * 1024)),
        truncated: false,
    };
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        let read = reader.read(&mut chunk).await?;
        if read == 0 {
            break;
        }
        let room = limit.saturating_sub(captured.data.len());
        if read > room {
            captured.truncated = true;
        }
        captured.data.extend_from_slice(&chunk[..read.min(room)]);
    }

    Ok(captured)
}

async fn join_reader(task: Option<ReaderTask>) -> CapturedOutput {
    let Some(task) = task else {
        return CapturedOutput::default();
    };
    match task.await {
        Ok(Ok(captured)) => captured,
        Ok(Err(e)) => {
            debug!("Output read failed: {}", e);
            CapturedOutput::default()
        }
        Err(e) => {
            debug!("Output reader task ended abnormally: {}", e);
            CapturedOutput::default()
        }
    }
}

/// Exit code, or `128 + signal` for a child killed by a signal
fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    RETURN_CODE_INTERNAL_FAILURE
}
