//! Collaborator contracts
//!
//! The orchestrator talks to wordlist selection, result persistence and
//! status display only through these traits.

use crate::result::ExecutionResult;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Template facts passed along with a wordlist request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WordlistContext {
    pub template_name: String,
    pub tags: Vec<String>,
}

/// Picks a wordlist for a template
///
/// The returned path is treated as untrusted and validated before use.
#[async_trait]
pub trait WordlistResolver: Send + Sync {
    async fn resolve(
        &self,
        target: &str,
        tool: &str,
        hint: Option<&str>,
        context: &WordlistContext,
    ) -> Result<PathBuf>;
}

/// Always answers with the same path
#[derive(Debug, Clone)]
pub struct FixedWordlistResolver {
    path: PathBuf,
}

impl FixedWordlistResolver {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl WordlistResolver for FixedWordlistResolver {
    async fn resolve(
        &self,
        _target: &str,
        _tool: &str,
        _hint: Option<&str>,
        _context: &WordlistContext,
    ) -> Result<PathBuf> {
        Ok(self.path.clone())
    }
}

type SelectionKey = (String, String, Option<String>);

/// Memoizes another resolver by `(target, tool, hint)`
///
/// The cache lives as long as this value. Build one per run.
pub struct CachingWordlistResolver<R> {
    inner: R,
    cache: Mutex<HashMap<SelectionKey, PathBuf>>,
}

impl<R: WordlistResolver> CachingWordlistResolver<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Number of cached selections
    pub fn cached(&self) -> usize {
        self.cache.lock().map(|cache| cache.len()).unwrap_or(0)
    }
}

#[async_trait]
impl<R: WordlistResolver> WordlistResolver for CachingWordlistResolver<R> {
    async fn resolve(
        &self,
        target: &str,
        tool: &str,
        hint: Option<&str>,
        context: &WordlistContext,
    ) -> Result<PathBuf> {
        let key = (target.to_string(), tool.to_string(), hint.map(str::to_string));

        let cached = self.cache.lock().ok().and_then(|cache| cache.get(&key).cloned());
        if let Some(path) = cached {
            debug!(tool, "Wordlist selection served from cache");
            return Ok(path);
        }

        let path = self.inner.resolve(target, tool, hint, context).await?;
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(key, path.clone());
        }
        Ok(path)
    }
}

/// Receives every finalized result as soon as it exists
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn persist(&self, result: &ExecutionResult) -> Result<()>;
}

/// Keeps results in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    results: Mutex<Vec<ExecutionResult>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything persisted so far, in arrival order
    pub fn results(&self) -> Vec<ExecutionResult> {
        self.results
            .lock()
            .map(|results| results.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ResultSink for MemorySink {
    async fn persist(&self, result: &ExecutionResult) -> Result<()> {
        self.results
            .lock()
            .map_err(|_| anyhow::anyhow!("Result store lock poisoned"))?
            .push(result.clone());
        Ok(())
    }
}

/// Appends one JSON object per line and flushes after each
pub struct JsonLinesSink {
    path: PathBuf,
    file: tokio::sync::Mutex<tokio::fs::File>,
}

impl JsonLinesSink {
    /// Open `path` for appending, creating it if needed
    pub async fn create(path: &Path) -> Result<Self> {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("Failed to open results file: {:?}", path))?;
        Ok(Self {
            path: path.to_path_buf(),
            file: tokio::sync::Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ResultSink for JsonLinesSink {
    async fn persist(&self, result: &ExecutionResult) -> Result<()> {
        let mut line = serde_json::to_vec(result).context("Failed to serialize result")?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line)
            .await
            .with_context(|| format!("Failed to write result to {:?}", self.path))?;
        file.flush().await?;
        Ok(())
    }
}

/// Progress notifications for a status display
pub trait StatusReporter: Send + Sync {
    fn template_starting(&self, tool: &str, name: &str, target: &str);

    fn update_progress(&self, result: &ExecutionResult);

    fn privileged_skipped(&self, count: usize);

    fn privileged_running(&self, count: usize);
}

/// Reports progress through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl StatusReporter for TracingReporter {
    fn template_starting(&self, tool: &str, name: &str, target: &str) {
        info!(tool, template = name, target, "Starting template");
    }

    fn update_progress(&self, result: &ExecutionResult) {
        if result.success {
            info!("{}", result.summary());
        } else {
            warn!("{}", result.summary());
        }
    }

    fn privileged_skipped(&self, count: usize) {
        warn!(
            "Skipping {} template(s) that require elevated privileges; re-run as root to include them",
            count
        );
    }

    fn privileged_running(&self, count: usize) {
        info!("Running {} template(s) with elevated privileges", count);
    }
}
