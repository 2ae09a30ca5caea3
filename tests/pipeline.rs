//! End-to-end tests of the template pipeline with real subprocesses

use scanrig_orchestrator::orchestrator::hooks::{MemorySink, StatusReporter};
use scanrig_orchestrator::resolve::{ChainVariables, PresetConfig, PresetResolver};
use scanrig_orchestrator::result::{ExecutionStatus, RETURN_CODE_INTERNAL_FAILURE, RETURN_CODE_SKIPPED_PRIVILEGES};
use scanrig_orchestrator::template::{MultiToolTemplate, ToolInvocation};
use scanrig_orchestrator::tools::{ExecutorConfig, TRUNCATION_MARKER};
use scanrig_orchestrator::{
    ExecutionRequest, ExecutionResult, SecureExecutor, Template, TemplateOrchestrator, TemplateSpec,
};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

fn orchestrator(max: usize) -> (TemplateOrchestrator, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let orchestrator = TemplateOrchestrator::new(
        SecureExecutor::with_config(ExecutorConfig::default().with_kill_grace(Duration::from_millis(500))),
        max,
    )
    .unwrap()
    .with_sink(sink.clone())
    .with_privileged(false);
    (orchestrator, sink)
}

#[tokio::test]
async fn test_timeout_enforcement() {
    let executor = SecureExecutor::new();
    let args = strings(&["5"]);
    let mut request = ExecutionRequest::new("slow", "sleep", &args, "example.com");
    request.timeout_secs = Some(1);

    let started = Instant::now();
    let result = executor
        .execute_template(&request, &CancellationToken::new())
        .await
        .into_result()
        .unwrap();

    assert!(!result.success);
    assert!(result.timed_out);
    assert_eq!(result.return_code, RETURN_CODE_INTERNAL_FAILURE);
    assert_eq!(result.status(), ExecutionStatus::TimedOut);
    assert!(result.execution_time < 4.0, "took {}s", result.execution_time);
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[tokio::test]
async fn test_output_bounding() {
    let executor = SecureExecutor::new();
    let args = strings(&["-c", "2097152", "/dev/zero"]);
    let result = executor
        .execute_template(
            &ExecutionRequest::new("flood", "head", &args, "example.com"),
            &CancellationToken::new(),
        )
        .await
        .into_result()
        .unwrap();

    assert!(result.success);
    assert_eq!(result.stdout.len(), 1024 * 1024 + TRUNCATION_MARKER.len());
    assert!(result.stdout.ends_with(TRUNCATION_MARKER));
    assert!(result.stderr.is_empty());
}

#[tokio::test]
async fn test_privileged_template_never_spawns() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("spawned");
    let marker_arg = marker.to_string_lossy().into_owned();

    let mut template = Template::new("syn-scan", "touch", &[marker_arg.as_str()]);
    template.requires_sudo = true;

    let (orchestrator, sink) = orchestrator(2);
    let report = orchestrator
        .run_batch(
            "example.com",
            vec![TemplateSpec::Single(template)],
            &ChainVariables::new(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].return_code, RETURN_CODE_SKIPPED_PRIVILEGES);
    assert!(!report.results[0].success);
    assert!(!marker.exists());
    assert_eq!(sink.results().len(), 1);
}

#[tokio::test]
async fn test_template_timeout_does_not_abort_siblings() {
    let mut slow = Template::new("slow", "sleep", &["5"]);
    slow.timeout = Some(1);

    let (orchestrator, _) = orchestrator(4);
    let report = orchestrator
        .run_batch(
            "example.com",
            vec![
                TemplateSpec::Single(slow),
                TemplateSpec::Single(Template::new("fast", "echo", &["{{target}}"])),
            ],
            &ChainVariables::new(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let slow = report.results.iter().find(|r| r.template_name == "slow").unwrap();
    let fast = report.results.iter().find(|r| r.template_name == "fast").unwrap();
    assert!(slow.timed_out);
    assert!(fast.success);
    assert_eq!(fast.stdout, "example.com\n");
}

/// Tracks how many templates are between start and published result
#[derive(Default)]
struct PeakTracker {
    running: AtomicI64,
    peak: AtomicI64,
    started: AtomicUsize,
}

impl StatusReporter for PeakTracker {
    fn template_starting(&self, _tool: &str, _name: &str, _target: &str) {
        self.started.fetch_add(1, Ordering::SeqCst);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn update_progress(&self, _result: &ExecutionResult) {
        self.running.fetch_sub(1, Ordering::SeqCst);
    }

    fn privileged_skipped(&self, _count: usize) {}

    fn privileged_running(&self, _count: usize) {}
}

#[tokio::test]
async fn test_concurrency_limit_bounds_running_templates() {
    let tracker = Arc::new(PeakTracker::default());
    let (orchestrator, _) = orchestrator(2);
    let orchestrator = orchestrator.with_reporter(tracker.clone());
    let templates = (0..5)
        .map(|i| TemplateSpec::Single(Template::new(&format!("nap-{}", i), "sleep", &["0.3"])))
        .collect();

    let report = orchestrator
        .run_batch("example.com", templates, &ChainVariables::new(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.succeeded(), 5);
    assert_eq!(tracker.started.load(Ordering::SeqCst), 5);
    assert_eq!(tracker.peak.load(Ordering::SeqCst), 2);
    assert_eq!(tracker.running.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_multi_tool_template_with_presets() {
    let presets = PresetResolver::new(
        PresetConfig::new()
            .with_tool_preset("echo", "tagged", &["[scan]"])
            .with_global_preset("quiet", &["-n"]),
    );
    let (orchestrator, _) = orchestrator(2);
    let orchestrator = orchestrator.with_presets(presets);

    let spec = TemplateSpec::Multi(MultiToolTemplate {
        name: "recon".to_string(),
        tools: vec![
            ToolInvocation {
                tool: "echo".to_string(),
                args: strings(&["{{target}}"]),
                preset: Some("echo.tagged".to_string()),
                ..Default::default()
            },
            ToolInvocation {
                tool: "echo".to_string(),
                args: strings(&["{{port}}"]),
                preset: Some("quiet".to_string()),
                variables: [("port".to_string(), "8443".to_string())].into_iter().collect(),
                ..Default::default()
            },
        ],
        ..Default::default()
    });

    let report = orchestrator
        .run_batch("example.com", vec![spec], &ChainVariables::new(), &CancellationToken::new())
        .await
        .unwrap();

    let first = report.results.iter().find(|r| r.template_name == "recon_echo").unwrap();
    let second = report.results.iter().find(|r| r.template_name == "recon_echo_2").unwrap();
    assert_eq!(first.stdout, "[scan] example.com\n");
    assert_eq!(second.stdout, "8443");
}

#[cfg(unix)]
#[tokio::test]
async fn test_chained_phases_round_trip() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::Builder::new()
        .prefix("scanrig")
        .tempdir_in("/tmp")
        .unwrap();
    let script = dir.path().join("gobuster");
    std::fs::write(
        &script,
        "#!/bin/sh\n\
         echo 'Found: api.example.com (Status: 200) [Size: 512]'\n\
         echo 'Found: old.example.com (Status: 301) [Size: 0]'\n",
    )
    .unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    let tool = script.to_string_lossy().into_owned();

    let (orchestrator, sink) = orchestrator(2);
    let phases = vec![
        vec![TemplateSpec::Single(Template::new("discover", &tool, &["dir"]))],
        vec![TemplateSpec::Single(Template::new(
            "follow",
            "echo",
            &[
                "{{chain.primary_domain}}",
                "{{chain.domain_count}}",
                "{{chain.redirect_domains}}",
            ],
        ))],
    ];

    let reports = orchestrator
        .run_chained("127.0.0.1", phases, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(reports.len(), 2);
    assert!(reports[0].results[0].success, "{:?}", reports[0].results[0]);
    assert_eq!(
        reports[1].results[0].stdout,
        "api.example.com 2 old.example.com\n"
    );
    assert_eq!(sink.results().len(), 2);
}
