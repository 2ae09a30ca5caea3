// ScanRig - Main Entry Point
//
// Runs batches of scanning templates against a target:
// - Loads configuration and templates
// - Executes them under a concurrency limit
// - Streams results to a JSON-lines file

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use scanrig_orchestrator::config::Config;
use scanrig_orchestrator::orchestrator::hooks::{JsonLinesSink, ResultSink};
use scanrig_orchestrator::orchestrator::{OrchestratorError, TemplateOrchestrator};
use scanrig_orchestrator::resolve::ChainVariables;
use scanrig_orchestrator::template::load_template_file;
use scanrig_orchestrator::tools::{check_target, SecureExecutor};
use scanrig_orchestrator::{logging, metrics};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// ScanRig: secure template execution for security scanners
#[derive(Parser, Debug)]
#[command(name = "scanrig")]
#[command(author = "ScanRig Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Run scanning tool templates against a target without a shell", long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (default: ~/.config/scanrig/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run templates against a target
    Run {
        /// IP address, DNS name or URL
        #[arg(long)]
        target: String,

        /// Template files (.json or .toml)
        #[arg(long = "template", required = true)]
        templates: Vec<PathBuf>,

        /// Templates executing at once (overrides configuration)
        #[arg(long)]
        concurrency: Option<usize>,

        /// Append results as JSON lines to this file
        #[arg(long)]
        output: Option<PathBuf>,

        /// Print Prometheus metrics after the run
        #[arg(long)]
        metrics: bool,
    },
    /// Check whether a target is acceptable
    CheckTarget {
        target: String,
    },
    /// List configured presets
    Presets {
        /// Only presets for this tool
        #[arg(long)]
        tool: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!("Config file not found: {:?}", path);
            }
            Config::load_from_path(path)?
        }
        None => Config::load()?,
    };

    logging::init(&config.logging, args.verbose)?;

    match args.command {
        Some(Commands::Run {
            target,
            templates,
            concurrency,
            output,
            metrics,
        }) => run(&config, target, templates, concurrency, output, metrics).await?,
        Some(Commands::CheckTarget { target }) => check(&target)?,
        Some(Commands::Presets { tool }) => list_presets(&config, tool.as_deref()),
        None => {
            info!("No command specified. Use \"scanrig --help\" for usage.");
        }
    }

    Ok(())
}

async fn run(
    config: &Config,
    target: String,
    template_paths: Vec<PathBuf>,
    concurrency: Option<usize>,
    output: Option<PathBuf>,
    print_metrics: bool,
) -> Result<()> {
    check_target(&target).context("Invalid target")?;
    metrics::init().map_err(|e| anyhow::anyhow!("Failed to register metrics: {}", e))?;

    let specs = template_paths
        .iter()
        .map(|path| load_template_file(path))
        .collect::<Result<Vec<_>>>()?;
    info!("Loaded {} template declaration(s)", specs.len());

    let max_concurrent = concurrency.unwrap_or(config.orchestrator.max_concurrent);
    let mut orchestrator = TemplateOrchestrator::new(
        SecureExecutor::with_config(config.executor_config()),
        max_concurrent,
    )?
    .with_presets(config.preset_resolver());

    if let Some(default_wordlist) = &config.orchestrator.default_wordlist {
        orchestrator = orchestrator.with_default_wordlist(default_wordlist.clone());
    }
    if let Some(path) = &output {
        let sink: Arc<dyn ResultSink> = Arc::new(JsonLinesSink::create(path).await?);
        orchestrator = orchestrator.with_sink(sink);
    }

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling batch");
            interrupt.cancel();
        }
    });

    let outcome = orchestrator
        .run_batch(&target, specs, &ChainVariables::new(), &cancel)
        .await;

    let results = match outcome {
        Ok(report) => {
            for result in &report.results {
                println!("{}", result.summary());
            }
            println!(
                "{} succeeded, {} failed (batch {})",
                report.succeeded(),
                report.failed(),
                report.batch_id
            );
            Ok(())
        }
        Err(OrchestratorError::Cancelled { completed }) => {
            for result in &completed {
                println!("{}", result.summary());
            }
            error!("Batch cancelled with {} finalized result(s)", completed.len());
            Err(anyhow::anyhow!("Batch cancelled"))
        }
        Err(e) => Err(e.into()),
    };

    if print_metrics {
        print!("{}", metrics::gather_metrics()?);
    }
    results
}

fn check(target: &str) -> Result<()> {
    match check_target(target) {
        Ok(()) => {
            println!("Target is valid");
            Ok(())
        }
        Err(e) => anyhow::bail!("Target rejected: {}", e),
    }
}

fn list_presets(config: &Config, tool: Option<&str>) {
    let resolver = config.preset_resolver();
    let tools = match tool {
        Some(tool) => vec![tool.to_string()],
        None => resolver.tools_with_presets(),
    };

    for tool in tools {
        for name in resolver.list_presets_for_tool(&tool) {
            let args = resolver.get_preset(&name).unwrap_or_default();
            println!("{} = {:?}", name, args);
        }
    }
    for name in resolver.list_global_presets() {
        let args = resolver.get_preset(&name).unwrap_or_default();
        println!("{} = {:?}", name, args);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_args_parsing() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_run_arguments() {
        let args = Args::parse_from([
            "scanrig",
            "run",
            "--target",
            "example.com",
            "--template",
            "a.json",
            "--template",
            "b.toml",
            "--concurrency",
            "3",
        ]);
        match args.command {
            Some(Commands::Run {
                target,
                templates,
                concurrency,
                ..
            }) => {
                assert_eq!(target, "example.com");
                assert_eq!(templates.len(), 2);
                assert_eq!(concurrency, Some(3));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
