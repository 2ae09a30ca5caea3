//! Template Orchestrator
//!
//! Drives a batch of templates against one target:
//!
//! 1. Expand multi-tool declarations and check each template's structure
//! 2. Skip templates that need elevated privileges when not running as root
//! 3. Run the rest under a shared concurrency limit, each holding its slot
//!    from wordlist resolution through result persistence
//! 4. Persist and report each result as soon as it exists
//!
//! Errors while preparing one template become a failed result for that
//! template only. Cancellation stops admission, kills running process
//! trees and returns the results that were already finalized.

pub mod hooks;

use crate::resolve::chain::{
    extract_discovered_domains, generate_chain_variables, resolve_target_ip, ChainVariables,
};
use crate::resolve::preset::PresetResolver;
use crate::result::ExecutionResult;
use crate::template::{Template, TemplateSpec, AUTO_WORDLIST};
use crate::tools::process::is_privileged;
use crate::tools::{ExecutionOutcome, ExecutionRequest, ExecutionTimeout, SecureExecutor};
use hooks::{ResultSink, StatusReporter, TracingReporter, WordlistContext, WordlistResolver};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub use hooks::{
    CachingWordlistResolver, FixedWordlistResolver, JsonLinesSink, MemorySink,
};

/// Default number of templates executing at once
pub const DEFAULT_MAX_CONCURRENT: usize = 10;

/// Upper bound for the concurrency limit
pub const MAX_CONCURRENT_LIMIT: usize = 100;

/// Deadline for one wordlist selection
const WORDLIST_RESOLUTION_TIMEOUT_SECS: u64 = 30;

const WORDLIST_PLACEHOLDER: &str = "{{wordlist}}";

/// Batch-wide failures
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Concurrency limit must be between 1 and {max}, got {0}", max = MAX_CONCURRENT_LIMIT)]
    InvalidConcurrency(usize),

    #[error("Batch cancelled; {} result(s) were finalized before the stop", .completed.len())]
    Cancelled { completed: Vec<ExecutionResult> },
}

/// Results of one batch
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub target: String,
    /// In completion order
    pub results: Vec<ExecutionResult>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }
}

/// Runs batches of templates
#[derive(Clone)]
pub struct TemplateOrchestrator {
    executor: Arc<SecureExecutor>,
    presets: Arc<PresetResolver>,
    wordlists: Option<Arc<dyn WordlistResolver>>,
    sinks: Vec<Arc<dyn ResultSink>>,
    reporter: Arc<dyn StatusReporter>,
    max_concurrent: usize,
    default_wordlist: Option<String>,
    privileged: bool,
}

impl TemplateOrchestrator {
    /// Create an orchestrator allowing `max_concurrent` templates at once
    ///
    /// # Errors
    ///
    /// Fails when `max_concurrent` is outside `1..=MAX_CONCURRENT_LIMIT`.
    pub fn new(executor: SecureExecutor, max_concurrent: usize) -> Result<Self, OrchestratorError> {
        if !(1..=MAX_CONCURRENT_LIMIT).contains(&max_concurrent) {
            return Err(OrchestratorError::InvalidConcurrency(max_concurrent));
        }
        Ok(Self {
            executor: Arc::new(executor),
            presets: Arc::new(PresetResolver::default()),
            wordlists: None,
            sinks: Vec::new(),
            reporter: Arc::new(TracingReporter),
            max_concurrent,
            default_wordlist: None,
            privileged: is_privileged(),
        })
    }

    pub fn with_presets(mut self, presets: PresetResolver) -> Self {
        self.presets = Arc::new(presets);
        self
    }

    pub fn with_wordlist_resolver(mut self, resolver: Arc<dyn WordlistResolver>) -> Self {
        self.wordlists = Some(resolver);
        self
    }

    /// Add a sink; every result goes to every sink
    pub fn with_sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn StatusReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Path used when wordlist selection fails or no resolver is set
    pub fn with_default_wordlist(mut self, path: impl Into<String>) -> Self {
        self.default_wordlist = Some(path.into());
        self
    }

    /// Override privilege detection
    pub fn with_privileged(mut self, privileged: bool) -> Self {
        self.privileged = privileged;
        self
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Run one batch against `target`
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Cancelled`] carrying the finalized
    /// results when `cancel` fires before the batch completes.
    pub async fn run_batch(
        &self,
        target: &str,
        templates: Vec<TemplateSpec>,
        chain_variables: &ChainVariables,
        cancel: &CancellationToken,
    ) -> Result<BatchReport, OrchestratorError> {
        let batch_id = Uuid::new_v4();
        let start = Instant::now();
        let mut results = Vec::new();

        let (runnable, rejected) = prepare_templates(templates, target);
        for result in rejected {
            self.publish(&result).await;
            results.push(result);
        }

        let (privileged, runnable): (Vec<Template>, Vec<Template>) =
            runnable.into_iter().partition(|t| t.requires_sudo);

        let mut runnable = runnable;
        if !privileged.is_empty() {
            if self.privileged {
                self.reporter.privileged_running(privileged.len());
                runnable.extend(privileged);
            } else {
                self.reporter.privileged_skipped(privileged.len());
                for template in &privileged {
                    let result = ExecutionResult::skipped_privileges(&template.name, &template.tool, target);
                    self.publish(&result).await;
                    results.push(result);
                }
            }
        }

        info!(
            batch = %batch_id,
            templates = runnable.len(),
            max_concurrent = self.max_concurrent,
            "Starting batch"
        );

        let limiter = Arc::new(Semaphore::new(self.max_concurrent));
        let target: Arc<str> = Arc::from(target);
        let chain = Arc::new(chain_variables.clone());
        let mut tasks = JoinSet::new();

        for template in runnable {
            let orchestrator = self.clone();
            let limiter = Arc::clone(&limiter);
            let target = Arc::clone(&target);
            let chain = Arc::clone(&chain);
            let cancel = cancel.clone();

            tasks.spawn(async move {
                let _permit = tokio::select! {
                    permit = limiter.acquire_owned() => permit.ok()?,
                    _ = cancel.cancelled() => return None,
                };

                orchestrator
                    .reporter
                    .template_starting(&template.tool, &template.name, &target);

                match orchestrator.execute_one(&template, &target, &chain, &cancel).await {
                    ExecutionOutcome::Finished(result) => {
                        orchestrator.publish(&result).await;
                        Some(result)
                    }
                    ExecutionOutcome::Cancelled => {
                        debug!(template = %template.name, "Template cancelled in flight");
                        None
                    }
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Some(result)) => results.push(result),
                Ok(None) => {}
                Err(e) => error!("Template task failed: {}", e),
            }
        }

        if cancel.is_cancelled() {
            warn!(batch = %batch_id, finalized = results.len(), "Batch cancelled");
            return Err(OrchestratorError::Cancelled { completed: results });
        }

        let report = BatchReport {
            batch_id,
            target: target.to_string(),
            results,
        };
        info!(
            batch = %batch_id,
            succeeded = report.succeeded(),
            failed = report.failed(),
            "Batch finished in {:.2}s",
            start.elapsed().as_secs_f64()
        );
        Ok(report)
    }

    /// Run phases in order, feeding each phase's discoveries to the next
    ///
    /// A phase starts only after the previous one has fully completed.
    pub async fn run_chained(
        &self,
        target: &str,
        phases: Vec<Vec<TemplateSpec>>,
        cancel: &CancellationToken,
    ) -> Result<Vec<BatchReport>, OrchestratorError> {
        let mut chain = ChainVariables::new();
        let mut reports: Vec<BatchReport> = Vec::new();
        let phase_count = phases.len();

        for (index, phase) in phases.into_iter().enumerate() {
            info!(phase = index + 1, of = phase_count, chain_variables = chain.len(), "Starting phase");

            let report = match self.run_batch(target, phase, &chain, cancel).await {
                Ok(report) => report,
                Err(OrchestratorError::Cancelled { completed }) => {
                    let mut finalized: Vec<ExecutionResult> =
                        reports.into_iter().flat_map(|r| r.results).collect();
                    finalized.extend(completed);
                    return Err(OrchestratorError::Cancelled { completed: finalized });
                }
                Err(e) => return Err(e),
            };

            if index + 1 < phase_count {
                let host = target.to_string();
                let ip = match tokio::task::spawn_blocking(move || resolve_target_ip(&host)).await {
                    Ok(ip) => ip,
                    Err(e) => {
                        warn!("Target resolution task failed: {}", e);
                        None
                    }
                };
                let domains = extract_discovered_domains(&report.results, ip);
                chain = generate_chain_variables(&domains);
            }
            reports.push(report);
        }

        Ok(reports)
    }

    async fn execute_one(
        &self,
        template: &Template,
        target: &str,
        chain: &ChainVariables,
        cancel: &CancellationToken,
    ) -> ExecutionOutcome {
        let mut args = template.args.clone();
        let mut wordlist = template.wordlist.clone();

        if template.wants_auto_wordlist() {
            let selected = tokio::select! {
                selected = self.select_wordlist(template, target) => selected,
                _ = cancel.cancelled() => return ExecutionOutcome::Cancelled,
            };
            for arg in args.iter_mut().filter(|arg| arg.as_str() == AUTO_WORDLIST) {
                *arg = WORDLIST_PLACEHOLDER.to_string();
            }
            wordlist = selected;
        }

        let request = ExecutionRequest {
            template_name: &template.name,
            tool: &template.tool,
            args: &args,
            target,
            env: &template.env,
            wordlist: wordlist.as_deref(),
            timeout_secs: template.timeout,
            preset: template.preset.as_deref(),
            variables: &template.variables,
            chain_variables: Some(chain),
            presets: Some(&self.presets),
        };
        self.executor.execute_template(&request, cancel).await
    }

    /// Ask the resolver for a wordlist, falling back to the default path
    async fn select_wordlist(&self, template: &Template, target: &str) -> Option<String> {
        let Some(resolver) = &self.wordlists else {
            return self.default_wordlist.clone();
        };

        let context = WordlistContext {
            template_name: template.name.clone(),
            tags: template.tags.clone(),
        };
        let lookup = resolver.resolve(target, &template.tool, template.wordlist_hint.as_deref(), &context);

        match ExecutionTimeout::from_secs(WORDLIST_RESOLUTION_TIMEOUT_SECS).run(lookup).await {
            Ok(path) => match path.to_str() {
                Some(path) => {
                    debug!(template = %template.name, "Wordlist selected");
                    Some(path.to_string())
                }
                None => {
                    warn!(template = %template.name, "Selected wordlist path is not UTF-8, using default");
                    self.default_wordlist.clone()
                }
            },
            Err(e) => {
                warn!(template = %template.name, "Wordlist selection failed, using default: {:#}", e);
                self.default_wordlist.clone()
            }
        }
    }

    async fn publish(&self, result: &ExecutionResult) {
        for sink in &self.sinks {
            if let Err(e) = sink.persist(result).await {
                error!(template = %result.template_name, "Failed to persist result: {:#}", e);
            }
        }
        self.reporter.update_progress(result);
    }
}

/// Expand and check declarations; structural errors become failed results
fn prepare_templates(specs: Vec<TemplateSpec>, target: &str) -> (Vec<Template>, Vec<ExecutionResult>) {
    let mut runnable = Vec::new();
    let mut rejected = Vec::new();

    for spec in specs {
        let name = spec.name().to_string();
        let expanded = match spec.expand() {
            Ok(expanded) => expanded,
            Err(e) => {
                warn!(template = %name, "Template rejected: {}", e);
                rejected.push(ExecutionResult::failure(&name, "", target, e.to_string(), 0.0));
                continue;
            }
        };
        for template in expanded {
            match template.validate() {
                Ok(()) => runnable.push(template),
                Err(e) => {
                    warn!("Template rejected: {}", e);
                    rejected.push(ExecutionResult::failure(
                        &template.name,
                        &template.tool,
                        target,
                        e.to_string(),
                        0.0,
                    ));
                }
            }
        }
    }

    (runnable, rejected)
}
