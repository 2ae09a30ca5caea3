//! ScanRig Orchestrator Library
//!
//! Secure template execution for security-scanning tools: validation and
//! sanitization of every substituted value, shell-free subprocess execution
//! with deadlines and output caps, preset and chain-variable resolution, and
//! a concurrency-bounded batch orchestrator.

pub mod config;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod resolve;
pub mod result;
pub mod template;
pub mod tools;

pub use orchestrator::{BatchReport, OrchestratorError, TemplateOrchestrator};
pub use result::{ExecutionResult, ExecutionStatus};
pub use template::{Template, TemplateSpec};
pub use tools::{ExecutionOutcome, ExecutionRequest, SecureExecutor};
