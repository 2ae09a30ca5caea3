//! Execution Timeout Management
//!
//! Per-template deadlines are hard wall-clock limits clamped to a fixed range.

use std::time::Duration;
use tokio::time;

/// Smallest accepted template timeout in seconds
pub const MIN_TIMEOUT_SECS: u64 = 1;

/// Largest accepted template timeout in seconds
pub const MAX_TIMEOUT_SECS: u64 = 300;

/// Execution timeout configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionTimeout {
    /// The timeout duration
    duration: Duration,
}

impl Default for ExecutionTimeout {
    fn default() -> Self {
        Self::new(Duration::from_secs(MAX_TIMEOUT_SECS))
    }
}

impl ExecutionTimeout {
    /// Create a new execution timeout
    ///
    /// # Example
    ///
    /// ```
    /// use std::time::Duration;
    /// use scanrig_orchestrator::tools::ExecutionTimeout;
    ///
    /// let timeout = ExecutionTimeout::new(Duration::from_secs(30));
    /// assert_eq!(timeout.duration(), Duration::from_secs(30));
    /// ```
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    /// Get the timeout duration
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Create a timeout from seconds
    pub fn from_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// Deadline for one template
    ///
    /// Uses the template's own value when present, otherwise `default`.
    /// Either way the result is clamped to `MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS`.
    pub fn for_template(template_secs: Option<u64>, default: Duration) -> Self {
        let secs = template_secs.unwrap_or_else(|| default.as_secs());
        Self::from_secs(secs.clamp(MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS))
    }

    /// Execute a future with a timeout
    ///
    /// Returns the future's result if it completes in time, or an error
    /// naming the deadline.
    pub async fn run<F, T>(&self, future: F) -> anyhow::Result<T>
    where
        F: std::future::Future<Output = anyhow::Result<T>>,
    {
        match time::timeout(self.duration, future).await {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!(
                "Operation timed out after {:?}",
                self.duration
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_default() {
        let timeout = ExecutionTimeout::default();
        assert_eq!(timeout.duration(), Duration::from_secs(300));
    }

    #[test]
    fn test_for_template_uses_template_value() {
        let timeout = ExecutionTimeout::for_template(Some(45), Duration::from_secs(300));
        assert_eq!(timeout.duration(), Duration::from_secs(45));
    }

    #[test]
    fn test_for_template_falls_back_to_default() {
        let timeout = ExecutionTimeout::for_template(None, Duration::from_secs(120));
        assert_eq!(timeout.duration(), Duration::from_secs(120));
    }

    #[test]
    fn test_for_template_clamps() {
        assert_eq!(
            ExecutionTimeout::for_template(Some(0), Duration::from_secs(10)).duration(),
            Duration::from_secs(1)
        );
        assert_eq!(
            ExecutionTimeout::for_template(Some(10_000), Duration::from_secs(10)).duration(),
            Duration::from_secs(300)
        );
        assert_eq!(
            ExecutionTimeout::for_template(None, Duration::from_secs(3600)).duration(),
            Duration::from_secs(300)
        );
    }

    #[tokio::test]
    async fn test_timeout_run_success() {
        let timeout = ExecutionTimeout::from_secs(5);
        let result = timeout
            .run(async { Ok::<String, anyhow::Error>("value".to_string()) })
            .await;
        assert_eq!(result.unwrap(), "value");
    }

    #[tokio::test]
    async fn test_timeout_run_timeout() {
        let timeout = ExecutionTimeout::from_secs(1);

        let result = timeout
            .run(async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                Ok::<(), anyhow::Error>(())
            })
            .await;

        assert!(result.unwrap_err().to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_timeout_run_future_error() {
        let timeout = ExecutionTimeout::from_secs(5);

        let result = timeout
            .run(async { Err::<(), anyhow::Error>(anyhow::anyhow!("Test error")) })
            .await;

        assert!(result.unwrap_err().to_string().contains("Test error"));
    }
}
