// Step Sequencer
// Runs one configuration's steps in order with inclusion predicates and fail-fast

use crate::cache::coordinator::CacheStatus;
use crate::cache::entry::CacheEntry;
use crate::cache::key::CacheKey;
use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::execution::matrix::TargetConfiguration;
use crate::execution::step::Step;
use crate::runners::{Runner, StepContext};

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Lifecycle of one configuration's step sequence
///
/// Step numbers are 1-based; `Failed(0)` means the run aborted before any step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "step", rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Running(usize),
    Succeeded,
    Failed(usize),
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Succeeded | RunState::Failed(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, RunState::Failed(_))
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Pending => write!(f, "pending"),
            RunState::Running(step) => write!(f, "running step {}", step),
            RunState::Succeeded => write!(f, "succeeded"),
            RunState::Failed(0) => write!(f, "aborted"),
            RunState::Failed(step) => write!(f, "failed at step {}", step),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    Failed,
    /// Predicate was false for this configuration
    Skipped,
    /// An earlier step failed
    Cancelled,
}

/// What happened to one declared step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    pub number: usize,
    pub name: String,
    pub status: StepStatus,
    /// Skip reason or failure detail
    pub detail: Option<String>,
    pub exit_code: Option<i32>,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
}

impl StepRecord {
    fn without_run(number: usize, step: &Step, status: StepStatus, detail: Option<String>) -> Self {
        Self {
            number,
            name: step.name.clone(),
            status,
            detail,
            exit_code: None,
            duration: Duration::ZERO,
        }
    }
}

/// Finalized outcome of one configuration
///
/// Built once by the sequencer; read-only afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    configuration: TargetConfiguration,
    state: RunState,
    steps: Vec<StepRecord>,
    cache: CacheStatus,
    /// Why the configuration stopped without a failing step
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip)]
    entry: CacheEntry,
    #[serde(with = "duration_millis")]
    duration: Duration,
}

impl RunResult {
    pub fn configuration(&self) -> &TargetConfiguration {
        &self.configuration
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn succeeded(&self) -> bool {
        self.state == RunState::Succeeded
    }

    pub fn steps(&self) -> &[StepRecord] {
        &self.steps
    }

    /// The first (and only) failed step
    pub fn failed_step(&self) -> Option<&StepRecord> {
        match self.state {
            RunState::Failed(number) => number.checked_sub(1).and_then(|i| self.steps.get(i)),
            _ => None,
        }
    }

    pub fn cache_status(&self) -> CacheStatus {
        self.cache
    }

    /// Set when the run ended before any step could fail
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Build state after the run
    pub fn entry(&self) -> &CacheEntry {
        &self.entry
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Result for a configuration whose task died before producing one
    pub(crate) fn aborted(configuration: TargetConfiguration, reason: impl Into<String>) -> Self {
        let key = CacheKey::from_raw(configuration.name());
        Self {
            configuration,
            state: RunState::Failed(0),
            steps: Vec::new(),
            cache: CacheStatus::Disabled,
            error: Some(reason.into()),
            entry: CacheEntry::new(key),
            duration: Duration::ZERO,
        }
    }

    pub(crate) fn with_cache_status(mut self, cache: CacheStatus) -> Self {
        self.cache = cache;
        self
    }
}

/// Runs a step list against one configuration
pub struct StepSequencer<'a> {
    runner: &'a dyn Runner,
    working_dir: PathBuf,
    env: HashMap<String, String>,
    events: Option<ProgressSender>,
}

impl<'a> StepSequencer<'a> {
    pub fn new(runner: &'a dyn Runner, working_dir: impl AsRef<Path>) -> Self {
        Self {
            runner,
            working_dir: working_dir.as_ref().to_path_buf(),
            env: HashMap::new(),
            events: None,
        }
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_progress(mut self, events: Option<ProgressSender>) -> Self {
        self.events = events;
        self
    }

    /// Execute `steps` in order on `config`
    ///
    /// A false predicate records the step as skipped without invoking the
    /// runner. The first failing step ends the sequence; every later step is
    /// recorded as cancelled and never invoked.
    pub async fn run(
        &self,
        config: &TargetConfiguration,
        steps: &[Step],
        mut state: CacheEntry,
    ) -> RunResult {
        let start = Instant::now();
        let mut run_state = RunState::Pending;
        let mut records = Vec::with_capacity(steps.len());

        self.events.send_event(ExecutionEvent::ConfigurationStarted {
            configuration: config.name().to_string(),
            target: config.target().to_string(),
            host: config.host().to_string(),
            total_steps: steps.len(),
        });

        for (index, step) in steps.iter().enumerate() {
            let number = index + 1;

            if run_state.is_failed() {
                self.events.send_event(ExecutionEvent::StepCancelled {
                    configuration: config.name().to_string(),
                    step_name: step.name.clone(),
                    step_number: number,
                });
                records.push(StepRecord::without_run(
                    number,
                    step,
                    StepStatus::Cancelled,
                    None,
                ));
                continue;
            }

            if !step.applies_to(config) {
                let reason = format!("skipped: requires {}", step.include);
                debug!("{}: step {} '{}' {}", config.name(), number, step.name, reason);
                self.events.send_event(ExecutionEvent::StepSkipped {
                    configuration: config.name().to_string(),
                    step_name: step.name.clone(),
                    step_number: number,
                    reason: reason.clone(),
                });
                records.push(StepRecord::without_run(
                    number,
                    step,
                    StepStatus::Skipped,
                    Some(reason),
                ));
                continue;
            }

            run_state = RunState::Running(number);
            self.events.send_event(ExecutionEvent::StepStarted {
                configuration: config.name().to_string(),
                step_name: step.name.clone(),
                step_number: number,
                command: step.action.describe(config),
            });

            let step_start = Instant::now();
            let ctx = StepContext {
                config,
                step,
                step_number: number,
                working_dir: &self.working_dir,
                env: &self.env,
                events: &self.events,
            };
            let outcome = self.runner.run(&ctx, &mut state).await;
            let duration = step_start.elapsed();

            let status = if outcome.success {
                StepStatus::Succeeded
            } else {
                run_state = RunState::Failed(number);
                StepStatus::Failed
            };

            self.events.send_event(ExecutionEvent::StepCompleted {
                configuration: config.name().to_string(),
                step_name: step.name.clone(),
                step_number: number,
                status,
                duration,
                exit_code: outcome.exit_code,
            });

            records.push(StepRecord {
                number,
                name: step.name.clone(),
                status,
                detail: outcome.message,
                exit_code: outcome.exit_code,
                duration,
            });
        }

        if !run_state.is_failed() {
            run_state = RunState::Succeeded;
        }

        let duration = start.elapsed();
        info!("{}: {} in {:.2}s", config, run_state, duration.as_secs_f64());
        self.events.send_event(ExecutionEvent::ConfigurationCompleted {
            configuration: config.name().to_string(),
            state: run_state,
            duration,
        });

        RunResult {
            configuration: config.clone(),
            state: run_state,
            steps: records,
            cache: CacheStatus::Disabled,
            error: None,
            entry: state,
            duration,
        }
    }
}

mod duration_millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::execution::events::progress_channel;
    use crate::execution::matrix::TargetDescriptor;
    use crate::execution::predicate::Predicate;
    use crate::runners::StepOutcome;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Records invocations; fails the steps named in `failing`
    #[derive(Default)]
    pub(crate) struct ScriptedRunner {
        pub failing: HashSet<String>,
        pub invoked: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedRunner {
        pub fn failing(names: &[&str]) -> Self {
            Self {
                failing: names.iter().map(|n| n.to_string()).collect(),
                invoked: Mutex::new(Vec::new()),
            }
        }

        pub fn invoked_steps(&self, configuration: &str) -> Vec<String> {
            self.invoked
                .lock()
                .unwrap()
                .iter()
                .filter(|(c, _)| c == configuration)
                .map(|(_, s)| s.clone())
                .collect()
        }
    }

    #[async_trait::async_trait]
    impl Runner for ScriptedRunner {
        async fn run(&self, ctx: &StepContext<'_>, state: &mut CacheEntry) -> StepOutcome {
            self.invoked
                .lock()
                .unwrap()
                .push((ctx.config.name().to_string(), ctx.step.name.clone()));
            state.record(format!("ran:{}", ctx.step.name));
            if self.failing.contains(&ctx.step.name) {
                StepOutcome::failed(Some(1), "scripted failure")
            } else {
                StepOutcome::succeeded(Some(0))
            }
        }
    }

    fn config(target: &str) -> TargetConfiguration {
        TargetConfiguration::from(&TargetDescriptor::new(target, "ubuntu-latest"))
    }

    fn fresh() -> CacheEntry {
        CacheEntry::new(CacheKey::from_raw("test"))
    }

    fn steps() -> Vec<Step> {
        vec![
            Step::script("S1", "true"),
            Step::script("S2", "true"),
            Step::script("S3", "true"),
        ]
    }

    #[tokio::test]
    async fn test_all_steps_succeed() {
        let runner = ScriptedRunner::default();
        let sequencer = StepSequencer::new(&runner, ".");

        let result = sequencer.run(&config("x"), &steps(), fresh()).await;

        assert_eq!(result.state(), RunState::Succeeded);
        assert!(result.failed_step().is_none());
        assert_eq!(runner.invoked_steps("x"), vec!["S1", "S2", "S3"]);
        assert!(result
            .steps()
            .iter()
            .all(|s| s.status == StepStatus::Succeeded));
    }

    #[tokio::test]
    async fn test_fail_fast() {
        let runner = ScriptedRunner::failing(&["S2"]);
        let sequencer = StepSequencer::new(&runner, ".");

        let result = sequencer.run(&config("x"), &steps(), fresh()).await;

        assert_eq!(result.state(), RunState::Failed(2));
        assert_eq!(result.failed_step().unwrap().name, "S2");
        assert_eq!(runner.invoked_steps("x"), vec!["S1", "S2"]);
        assert_eq!(result.steps()[2].status, StepStatus::Cancelled);
        assert_eq!(result.steps().len(), 3);
    }

    #[tokio::test]
    async fn test_predicate_skips_without_invoking() {
        let only_x = vec![
            Step::script("Build", "true"),
            Step::script("Test", "true").when(Predicate::TargetIs("x".into())),
        ];
        let runner = ScriptedRunner::default();
        let sequencer = StepSequencer::new(&runner, ".");

        let on_y = sequencer.run(&config("y"), &only_x, fresh()).await;
        assert_eq!(on_y.state(), RunState::Succeeded);
        assert_eq!(on_y.steps()[1].status, StepStatus::Skipped);
        assert!(on_y.steps()[1].detail.as_ref().unwrap().contains("target is x"));
        assert_eq!(runner.invoked_steps("y"), vec!["Build"]);

        let on_x = sequencer.run(&config("x"), &only_x, fresh()).await;
        assert_eq!(on_x.steps()[1].status, StepStatus::Succeeded);
        assert_eq!(runner.invoked_steps("x"), vec!["Build", "Test"]);
    }

    #[tokio::test]
    async fn test_skipped_step_that_would_fail_does_not_fail_run() {
        let steps = vec![
            Step::script("Build", "true"),
            Step::script("Test", "true").when(Predicate::HasCapability("kvm".into())),
        ];
        let runner = ScriptedRunner::failing(&["Test"]);
        let result = StepSequencer::new(&runner, ".")
            .run(&config("x"), &steps, fresh())
            .await;
        assert!(result.succeeded());
    }

    #[tokio::test]
    async fn test_state_is_threaded_through() {
        let runner = ScriptedRunner::default();
        let mut restored = fresh();
        restored.record("from-cache");

        let result = StepSequencer::new(&runner, ".")
            .run(&config("x"), &steps(), restored)
            .await;

        assert!(result.entry().is_registered("from-cache"));
        assert!(result.entry().is_registered("ran:S3"));
    }

    #[tokio::test]
    async fn test_empty_step_list_succeeds() {
        let runner = ScriptedRunner::default();
        let result = StepSequencer::new(&runner, ".")
            .run(&config("x"), &[], fresh())
            .await;
        assert!(result.succeeded());
    }

    #[tokio::test]
    async fn test_event_order() {
        let runner = ScriptedRunner::failing(&["S1"]);
        let (tx, mut rx) = progress_channel();
        StepSequencer::new(&runner, ".")
            .with_progress(Some(tx))
            .run(&config("x"), &steps(), fresh())
            .await;

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(match event {
                ExecutionEvent::ConfigurationStarted { .. } => "config-start",
                ExecutionEvent::StepStarted { .. } => "start",
                ExecutionEvent::StepCompleted { .. } => "done",
                ExecutionEvent::StepCancelled { .. } => "cancel",
                ExecutionEvent::ConfigurationCompleted { .. } => "config-done",
                _ => "other",
            });
        }
        assert_eq!(
            kinds,
            vec!["config-start", "start", "done", "cancel", "cancel", "config-done"]
        );
    }

    #[test]
    fn test_run_state_display() {
        assert_eq!(RunState::Failed(2).to_string(), "failed at step 2");
        assert_eq!(RunState::Failed(0).to_string(), "aborted");
        assert!(RunState::Succeeded.is_terminal());
        assert!(!RunState::Running(1).is_terminal());
    }
}
