//! Execution Result
//!
//! One record per template execution attempt. Created once, then handed by
//! shared reference to persistence and status reporting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Return code for internal failures: validation, spawn errors, timeouts
pub const RETURN_CODE_INTERNAL_FAILURE: i32 = -1;

/// Return code for templates skipped because they need elevated privileges
pub const RETURN_CODE_SKIPPED_PRIVILEGES: i32 = -2;

/// Terminal state of a finished template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Completed,
    Failed,
    TimedOut,
    Skipped,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Skipped => "skipped",
        };
        f.write_str(label)
    }
}

/// Result of one template execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Template that produced this result
    pub template_name: String,

    /// Executable that was (or would have been) run
    pub tool: String,

    /// Target the template ran against
    pub target: String,

    /// `true` iff `return_code == 0`
    pub success: bool,

    /// Captured stdout, truncated with a marker when over the cap
    pub stdout: String,

    /// Captured stderr, truncated with a marker when over the cap
    pub stderr: String,

    /// Process exit code, or one of the `RETURN_CODE_*` sentinels
    pub return_code: i32,

    /// Wall-clock time in seconds
    pub execution_time: f64,

    /// When the result was created
    pub timestamp: DateTime<Utc>,

    /// Why the execution failed, when it did not run to a normal exit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Whether the deadline expired
    #[serde(default)]
    pub timed_out: bool,
}

impl ExecutionResult {
    /// Result for a process that ran to exit
    pub fn exited(
        template_name: &str,
        tool: &str,
        target: &str,
        return_code: i32,
        stdout: String,
        stderr: String,
        execution_time: f64,
    ) -> Self {
        Self {
            template_name: template_name.to_string(),
            tool: tool.to_string(),
            target: target.to_string(),
            success: return_code == 0,
            stdout,
            stderr,
            return_code,
            execution_time: execution_time.max(0.0),
            timestamp: Utc::now(),
            error_message: None,
            timed_out: false,
        }
    }

    /// Result for a template that failed before or while spawning
    pub fn failure(
        template_name: &str,
        tool: &str,
        target: &str,
        message: impl Into<String>,
        execution_time: f64,
    ) -> Self {
        Self {
            template_name: template_name.to_string(),
            tool: tool.to_string(),
            target: target.to_string(),
            success: false,
            stdout: String::new(),
            stderr: String::new(),
            return_code: RETURN_CODE_INTERNAL_FAILURE,
            execution_time: execution_time.max(0.0),
            timestamp: Utc::now(),
            error_message: Some(message.into()),
            timed_out: false,
        }
    }

    /// Result for a process killed at its deadline
    pub fn timeout(
        template_name: &str,
        tool: &str,
        target: &str,
        stdout: String,
        stderr: String,
        timeout_secs: u64,
        execution_time: f64,
    ) -> Self {
        Self {
            stdout,
            stderr,
            timed_out: true,
            ..Self::failure(
                template_name,
                tool,
                target,
                format!("Execution timed out after {}s", timeout_secs),
                execution_time,
            )
        }
    }

    /// Result for a template skipped for lack of privileges; nothing was spawned
    pub fn skipped_privileges(template_name: &str, tool: &str, target: &str) -> Self {
        Self {
            return_code: RETURN_CODE_SKIPPED_PRIVILEGES,
            ..Self::failure(
                template_name,
                tool,
                target,
                "Skipped: template requires elevated privileges",
                0.0,
            )
        }
    }

    /// Terminal state derived from the return code and timeout flag
    pub fn status(&self) -> ExecutionStatus {
        if self.success {
            ExecutionStatus::Completed
        } else if self.timed_out {
            ExecutionStatus::TimedOut
        } else if self.return_code == RETURN_CODE_SKIPPED_PRIVILEGES {
            ExecutionStatus::Skipped
        } else {
            ExecutionStatus::Failed
        }
    }

    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        match self.status() {
            ExecutionStatus::Completed => format!(
                "{} ({}): success in {:.2}s, {} bytes output",
                self.template_name,
                self.tool,
                self.execution_time,
                self.stdout.len()
            ),
            ExecutionStatus::TimedOut => format!(
                "{} ({}): timeout after {:.2}s",
                self.template_name, self.tool, self.execution_time
            ),
            ExecutionStatus::Skipped => format!(
                "{} ({}): skipped, requires elevated privileges",
                self.template_name, self.tool
            ),
            ExecutionStatus::Failed => format!(
                "{} ({}): failed with code {}{}",
                self.template_name,
                self.tool,
                self.return_code,
                self.error_message
                    .as_deref()
                    .map(|m| format!(": {}", m))
                    .unwrap_or_default()
            ),
        }
    }
}
