use crate::output;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, ValueEnum};
use color_eyre::Result;
use tracing::{debug, info};

use verigate_service::cache::{CacheCoordinator, CacheStatus};
use verigate_service::execution::events::progress_channel;
use verigate_service::execution::executor::format_duration;
use verigate_service::execution::sequencer::StepStatus;
use verigate_service::{CargoRunner, ExecutionEvent, PipelineExecutor, PipelineReport, TriggerEvent};

use super::{load_workflow, open_store};

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    Push,
    PullRequest,
}

/// Run a verification workflow locally
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Workflow file (default: built-in Rust workflow)
    #[arg(env = "VERIGATE_WORKFLOW")]
    pub workflow: Option<PathBuf>,

    /// Run only this target or configuration name (can be repeated)
    #[arg(long = "target", short = 't', value_name = "TARGET")]
    pub targets: Vec<String>,

    /// Only run if the workflow's triggers accept this event
    #[arg(long, value_enum)]
    pub event: Option<EventKind>,

    /// Branch pushed to, or base branch of the pull request
    #[arg(long, default_value = "main", requires = "event")]
    pub branch: String,

    /// Project directory
    #[arg(long, short = 'w', value_name = "DIR")]
    pub working_dir: Option<PathBuf>,

    /// Cache directory (default: ~/.verigate/cache)
    #[arg(long, value_name = "DIR", env = "VERIGATE_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Neither restore nor save build state
    #[arg(long)]
    pub no_cache: bool,

    /// Maximum configurations running at once (0 = unlimited)
    #[arg(long, value_name = "N")]
    pub max_parallel: Option<usize>,

    /// Timeout in seconds for steps that do not set their own
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Toolchain version for cache keys instead of asking rustc
    #[arg(long, value_name = "VERSION")]
    pub toolchain: Option<String>,

    /// Print the final report as JSON on stdout
    #[arg(long)]
    pub json: bool,
}

impl RunArgs {
    fn trigger_event(&self) -> Option<TriggerEvent> {
        self.event.map(|kind| match kind {
            EventKind::Push => TriggerEvent::Push {
                branch: self.branch.clone(),
            },
            EventKind::PullRequest => TriggerEvent::PullRequest {
                base: self.branch.clone(),
            },
        })
    }
}

pub async fn execute(args: RunArgs) -> Result<()> {
    let workflow = load_workflow(args.workflow.as_deref())?;

    if let Some(event) = args.trigger_event() {
        if !workflow.on.matches(&event) {
            output::info(&format!(
                "Workflow '{}' is not triggered by {}",
                workflow.name, event
            ));
            return Ok(());
        }
    }

    let working_dir = match &args.working_dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()?,
    };

    debug!("Working directory {}", working_dir.display());

    let cache = if args.no_cache || !workflow.cache.enabled {
        info!("Build state cache disabled for this run");
        CacheCoordinator::disabled()
    } else {
        CacheCoordinator::new(Arc::new(open_store(args.cache_dir.clone())))
            .with_prefix(workflow.cache.prefix.clone())
    };

    let runner = CargoRunner::new().with_default_timeout(args.timeout.map(Duration::from_secs));

    let mut executor = PipelineExecutor::from_workflow(&workflow)?
        .only(&args.targets)?
        .with_runner(Arc::new(runner))
        .with_cache(cache);

    let config = executor.config_mut();
    config.working_dir = working_dir;
    if let Some(max_parallel) = args.max_parallel {
        config.max_parallel = max_parallel;
    }
    if args.toolchain.is_some() {
        config.toolchain = args.toolchain.clone();
    }
    debug!(
        "Executor settings: max_parallel={}, toolchain={}",
        config.max_parallel,
        config.toolchain.as_deref().unwrap_or("(from rustc)")
    );

    output::info(&format!(
        "Workflow '{}': {} configurations, {} steps",
        workflow.name,
        executor.configurations().len(),
        executor.steps().len()
    ));

    let (tx, mut rx) = progress_channel();
    let executor = executor.with_progress(tx);

    // Spawn execution in background
    let exec_handle = tokio::spawn(async move { executor.execute().await });

    // Process events in the foreground
    while let Some(event) = rx.recv().await {
        if !args.json {
            print_event(&event);
        }
    }

    let report = exec_handle.await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report);
    }

    if !report.success() {
        std::process::exit(1);
    }

    Ok(())
}

fn print_event(event: &ExecutionEvent) {
    match event {
        ExecutionEvent::PipelineStarted {
            pipeline_name,
            total_configurations,
        } => {
            eprintln!();
            output::header(&format!(
                "Pipeline '{}' ({} configurations)",
                pipeline_name, total_configurations
            ));
        }

        ExecutionEvent::PipelineCompleted {
            success, duration, ..
        } => {
            eprintln!();
            if *success {
                output::success(&format!(
                    "Pipeline completed successfully in {}",
                    format_duration(*duration)
                ));
            } else {
                output::failure(&format!("Pipeline failed after {}", format_duration(*duration)));
            }
        }

        ExecutionEvent::ConfigurationStarted {
            configuration,
            host,
            total_steps,
            ..
        } => {
            output::step_line(
                configuration,
                &format!("started on {} ({} steps)", host, total_steps),
            );
        }

        ExecutionEvent::ConfigurationCompleted {
            configuration,
            state,
            duration,
        } => {
            output::step_line(
                configuration,
                &format!("{} ({})", state, format_duration(*duration)),
            );
        }

        ExecutionEvent::CacheRestored {
            configuration,
            key,
            status,
        } => {
            let line = format!("cache {}: {}", output::cache_status_label(*status), key);
            if *status == CacheStatus::Unavailable {
                output::warning(&format!("[{}] {}", configuration, line));
            } else {
                output::step_line(configuration, &line);
            }
        }

        ExecutionEvent::CachePersisted {
            configuration,
            key,
            saved,
            message,
        } => {
            if *saved {
                output::step_line(configuration, &format!("cache saved: {}", key));
            } else if let Some(message) = message {
                output::warning(&format!("[{}] cache not saved: {}", configuration, message));
            }
        }

        ExecutionEvent::StepStarted {
            configuration,
            step_name,
            step_number,
            command,
        } => {
            output::step_line(
                configuration,
                &format!("[Step {}] {}: {}", step_number, step_name, command),
            );
        }

        ExecutionEvent::StepOutput {
            configuration,
            output: text,
            is_error,
            ..
        } => {
            for line in text.lines() {
                output::step_output(configuration, line, *is_error);
            }
        }

        ExecutionEvent::StepCompleted {
            configuration,
            step_number,
            status,
            duration,
            exit_code,
            ..
        } => {
            let exit_info = match exit_code {
                Some(code) if *code != 0 => format!(" (exit code: {})", code),
                _ => String::new(),
            };
            output::step_line(
                configuration,
                &format!(
                    "[Step {}] {} ({}){}",
                    step_number,
                    output::step_status_label(*status),
                    format_duration(*duration),
                    exit_info
                ),
            );
        }

        ExecutionEvent::StepSkipped {
            configuration,
            step_name,
            step_number,
            reason,
        } => {
            output::step_line(
                configuration,
                &format!(
                    "[Step {}] {} {}: {}",
                    step_number,
                    step_name,
                    output::step_status_label(StepStatus::Skipped),
                    reason
                ),
            );
        }

        ExecutionEvent::StepCancelled {
            configuration,
            step_name,
            step_number,
        } => {
            output::step_line(
                configuration,
                &format!(
                    "[Step {}] {} {}",
                    step_number,
                    step_name,
                    output::step_status_label(StepStatus::Cancelled)
                ),
            );
        }
    }
}

fn print_summary(report: &PipelineReport) {
    eprintln!();
    for result in &report.configurations {
        let line = format!(
            "{:<32} {:<20} cache {:<11} {}",
            result.configuration().name(),
            result.state().to_string(),
            output::cache_status_label(result.cache_status()),
            format_duration(result.duration())
        );
        if result.succeeded() {
            output::check(&line);
        } else {
            output::failure(&line);
        }
    }

    if let Some(failure) = report.first_failure() {
        eprintln!();
        output::error(&failure.to_string());
    }
}
