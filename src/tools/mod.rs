//! Tool Execution Subsystem
//!
//! Turns untrusted values into safe argv arrays and runs them as
//! unprivileged subprocesses.
//!
//! # Security Features
//!
//! - **Validation**: Targets, arguments, wordlist paths and substituted
//!   values are checked against shell metacharacters, traversal, encoded
//!   escapes, control characters and blocked extensions
//! - **List Invocation**: Commands are executed as argv arrays, never through a shell
//! - **Timeout Enforcement**: Every template has a hard wall-clock deadline
//! - **Output Caps**: Captured stdout and stderr are bounded per stream
//! - **Tree Termination**: Timeouts and cancellation kill the whole process group
//!
//! # Architecture
//!
//! - `validator.rs`: Predicates and checked validation errors
//! - `sanitizer.rs`: Placeholder substitution and child environment
//! - `executor.rs`: Subprocess execution with timeout and output capture
//! - `process.rs`: Process-group and descendant termination
//! - `timeout.rs`: Deadline clamping
//!
//! # Example
//!
//! ```no_run
//! use scanrig_orchestrator::tools::{ExecutionRequest, SecureExecutor};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let executor = SecureExecutor::new();
//!     let args = vec!["-sV".to_string(), "{{target}}".to_string()];
//!     let request = ExecutionRequest::new("service-scan", "nmap", &args, "scanme.example.com");
//!
//!     if let Some(result) = executor
//!         .execute_template(&request, &CancellationToken::new())
//!         .await
//!         .into_result()
//!     {
//!         println!("{}", result.summary());
//!     }
//! }
//! ```

mod executor;
pub mod process;
mod sanitizer;
mod timeout;
mod validator;

pub use executor::{
    ExecutionOutcome, ExecutionRequest, ExecutorConfig, PreparationError, SecureExecutor,
    DEFAULT_KILL_GRACE_MS, DEFAULT_TIMEOUT_SECS, MAX_OUTPUT_SIZE, TRUNCATION_MARKER,
};
pub use sanitizer::{prepare_environment, CommandRequest, CommandSanitizer, MAX_ENV_VALUE_LENGTH};
pub use timeout::{ExecutionTimeout, MAX_TIMEOUT_SECS, MIN_TIMEOUT_SECS};
pub use validator::{
    check_argument, check_target, check_tool_name, check_variable_name, check_variable_value,
    check_wordlist_path, is_valid_env_name, sanitize_argument, sanitize_target,
    validate_argument, validate_command_safety, validate_target, ValidationError,
    MAX_ARGUMENTS, MAX_ARGUMENT_LENGTH, MAX_TARGET_LENGTH, MAX_VALUE_LENGTH,
};
