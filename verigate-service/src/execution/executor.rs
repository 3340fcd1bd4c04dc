// Pipeline Executor
// Runs every matrix configuration in parallel, each with its own cached state

use crate::cache::coordinator::{CacheCoordinator, CacheLookup, CachePersistOutcome};
use crate::cache::entry::CacheEntry;
use crate::cache::key::{hash_lockfile, CacheKey, LockfileHash};
use crate::error::{ServiceError, ServiceResult};
use crate::execution::aggregator::{PipelineReport, ResultAggregator};
use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::execution::matrix::{MatrixExpander, TargetConfiguration};
use crate::execution::sequencer::{RunResult, StepSequencer};
use crate::execution::step::Step;
use crate::parser::models::Workflow;
use crate::parser::workflow::WorkflowValidator;
use crate::runners::cargo::CargoRunner;
use crate::runners::toolchain::resolve_toolchain_version;
use crate::runners::Runner;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

/// Toolchain version used in keys when it cannot be determined
pub const UNKNOWN_TOOLCHAIN: &str = "unknown";

/// Configuration for pipeline execution
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum configurations running at once (0 = unlimited)
    pub max_parallel: usize,
    /// Directory the project lives in
    pub working_dir: PathBuf,
    /// Extra environment for every step
    pub env: HashMap<String, String>,
    /// Use this instead of asking rustc
    pub toolchain: Option<String>,
    /// Lock file, relative to `working_dir`
    pub lockfile: PathBuf,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_parallel: 0,
            working_dir: PathBuf::from("."),
            env: HashMap::new(),
            toolchain: None,
            lockfile: PathBuf::from("Cargo.lock"),
        }
    }
}

/// Inputs shared by every configuration's cache key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyInputs {
    pub toolchain: String,
    pub lockfile_hash: Option<LockfileHash>,
}

/// Pipeline executor
pub struct PipelineExecutor {
    name: String,
    configurations: Vec<TargetConfiguration>,
    steps: Arc<Vec<Step>>,
    runner: Arc<dyn Runner>,
    cache: CacheCoordinator,
    config: ExecutorConfig,
    event_tx: Option<ProgressSender>,
}

impl PipelineExecutor {
    pub fn new(
        name: impl Into<String>,
        configurations: Vec<TargetConfiguration>,
        steps: Vec<Step>,
    ) -> Self {
        Self {
            name: name.into(),
            configurations,
            steps: Arc::new(steps),
            runner: Arc::new(CargoRunner::new()),
            cache: CacheCoordinator::disabled(),
            config: ExecutorConfig::default(),
            event_tx: None,
        }
    }

    /// Validate a workflow and build an executor for its full matrix
    ///
    /// Workflow-level settings (parallelism, toolchain override, lock file,
    /// key prefix) are applied; the cache store is attached separately with
    /// [`with_cache`](Self::with_cache).
    pub fn from_workflow(workflow: &Workflow) -> ServiceResult<Self> {
        WorkflowValidator::validate(workflow).map_err(|errors| {
            ServiceError::Invalid(errors.iter().map(ToString::to_string).collect())
        })?;
        let steps = workflow.to_steps().map_err(|errors| {
            ServiceError::Invalid(errors.iter().map(ToString::to_string).collect())
        })?;

        let mut executor = Self::new(
            workflow.name.clone(),
            MatrixExpander::expand(&workflow.matrix),
            steps,
        );
        executor.config.max_parallel = workflow.max_parallel;
        executor.config.toolchain = workflow.toolchain.clone();
        executor.config.lockfile = PathBuf::from(&workflow.cache.lockfile);
        executor.cache = executor.cache.with_prefix(workflow.cache.prefix.clone());
        Ok(executor)
    }

    /// Set executor configuration
    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Set progress event sender
    pub fn with_progress(mut self, tx: ProgressSender) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn with_runner(mut self, runner: Arc<dyn Runner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_cache(mut self, cache: CacheCoordinator) -> Self {
        self.cache = cache;
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut ExecutorConfig {
        &mut self.config
    }

    pub fn cache(&self) -> &CacheCoordinator {
        &self.cache
    }

    /// Restrict the run to configurations whose target or name is listed
    pub fn only(mut self, selection: &[String]) -> ServiceResult<Self> {
        if selection.is_empty() {
            return Ok(self);
        }
        if let Some(unknown) = selection.iter().find(|s| {
            !self
                .configurations
                .iter()
                .any(|c| c.target() == s.as_str() || c.name() == s.as_str())
        }) {
            return Err(ServiceError::UnknownTarget(unknown.clone()));
        }
        self.configurations.retain(|c| {
            selection
                .iter()
                .any(|s| c.target() == s.as_str() || c.name() == s.as_str())
        });
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn configurations(&self) -> &[TargetConfiguration] {
        &self.configurations
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Resolve the toolchain version and lock-file hash
    ///
    /// Neither failure is fatal: an unknown toolchain still yields stable
    /// keys, and an unreadable lock file turns caching off for the run.
    pub async fn key_inputs(&self) -> KeyInputs {
        let toolchain = match &self.config.toolchain {
            Some(version) => version.clone(),
            None => match resolve_toolchain_version(&self.config.working_dir).await {
                Ok(version) => version,
                Err(e) => {
                    warn!("Could not resolve toolchain version: {}", e);
                    UNKNOWN_TOOLCHAIN.to_string()
                }
            },
        };

        let lockfile = self.config.working_dir.join(&self.config.lockfile);
        let lockfile_hash = match hash_lockfile(&lockfile) {
            Ok(hash) => Some(hash),
            Err(e) => {
                warn!("Cannot hash {}, caching disabled: {}", lockfile.display(), e);
                None
            }
        };

        KeyInputs {
            toolchain,
            lockfile_hash,
        }
    }

    /// The cache key each configuration would use
    pub async fn cache_keys(&self) -> Vec<(TargetConfiguration, Option<CacheKey>)> {
        let inputs = self.key_inputs().await;
        self.configurations
            .iter()
            .map(|config| {
                let key = inputs
                    .lockfile_hash
                    .as_ref()
                    .map(|hash| self.cache.compute_key(config, &inputs.toolchain, hash));
                (config.clone(), key)
            })
            .collect()
    }

    /// Execute every configuration and aggregate the outcome
    pub async fn execute(&self) -> PipelineReport {
        let start = Instant::now();

        self.event_tx.send_event(ExecutionEvent::pipeline_started(
            &self.name,
            self.configurations.len(),
        ));

        let inputs = self.key_inputs().await;
        let cache = if inputs.lockfile_hash.is_some() {
            self.cache.clone()
        } else {
            CacheCoordinator::disabled()
        };

        let semaphore = (self.config.max_parallel > 0)
            .then(|| Arc::new(Semaphore::new(self.config.max_parallel)));

        let mut handles = Vec::with_capacity(self.configurations.len());
        for config in &self.configurations {
            let job = ConfigurationJob {
                config: config.clone(),
                steps: self.steps.clone(),
                runner: self.runner.clone(),
                cache: cache.clone(),
                key: inputs
                    .lockfile_hash
                    .as_ref()
                    .map(|hash| cache.compute_key(config, &inputs.toolchain, hash)),
                working_dir: self.config.working_dir.clone(),
                env: self.config.env.clone(),
                events: self.event_tx.clone(),
            };
            let semaphore = semaphore.clone();

            let handle = tokio::spawn(async move {
                // Closed semaphores are never produced here, so a permit error
                // just means "run unbounded"
                let _permit = match &semaphore {
                    Some(semaphore) => semaphore.clone().acquire_owned().await.ok(),
                    None => None,
                };
                job.run().await
            });
            handles.push((config.clone(), handle));
        }

        let mut aggregator = ResultAggregator::new();
        for (config, handle) in handles {
            match handle.await {
                Ok(result) => aggregator.record(result),
                Err(e) => {
                    let reason = format!("runner task aborted: {}", e);
                    error!("{}: {}", config, reason);
                    aggregator.record(RunResult::aborted(config, reason));
                }
            }
        }

        let duration = start.elapsed();
        let report = aggregator.finish(&self.name, duration);

        info!(
            "Pipeline '{}' {} ({} configurations, {:.2}s)",
            self.name,
            report.status,
            report.configurations.len(),
            duration.as_secs_f64()
        );
        self.event_tx.send_event(ExecutionEvent::pipeline_completed(
            &self.name,
            report.success(),
            duration,
        ));

        report
    }
}

/// Everything one spawned configuration run owns
struct ConfigurationJob {
    config: TargetConfiguration,
    steps: Arc<Vec<Step>>,
    runner: Arc<dyn Runner>,
    cache: CacheCoordinator,
    key: Option<CacheKey>,
    working_dir: PathBuf,
    env: HashMap<String, String>,
    events: Option<ProgressSender>,
}

impl ConfigurationJob {
    async fn run(self) -> RunResult {
        let name = self.config.name().to_string();

        let (lookup, entry) = match &self.key {
            Some(key) => {
                let lookup = self.cache.lookup(key).await;
                self.events.send_event(ExecutionEvent::CacheRestored {
                    configuration: name.clone(),
                    key: key.to_string(),
                    status: lookup.status(),
                });
                let entry = match &lookup {
                    CacheLookup::Hit(entry) => entry.clone(),
                    _ => CacheEntry::new(key.clone()),
                };
                (lookup, entry)
            }
            None => (
                CacheLookup::Disabled,
                CacheEntry::new(CacheKey::from_raw(name.clone())),
            ),
        };

        let result = StepSequencer::new(self.runner.as_ref(), &self.working_dir)
            .with_env(self.env.clone())
            .with_progress(self.events.clone())
            .run(&self.config, &self.steps, entry)
            .await
            .with_cache_status(lookup.status());

        // A failed run's state is not worth reusing
        if let (Some(key), true) = (&self.key, result.succeeded()) {
            if self.cache.is_enabled() {
                let outcome = self.cache.persist(key, result.entry().clone()).await;
                let (saved, message) = match outcome {
                    CachePersistOutcome::Saved => (true, None),
                    CachePersistOutcome::Failed(message) => (false, Some(message)),
                    CachePersistOutcome::Disabled => (false, None),
                };
                self.events.send_event(ExecutionEvent::CachePersisted {
                    configuration: name,
                    key: key.to_string(),
                    saved,
                    message,
                });
            }
        }

        result
    }
}

/// Round a duration for display
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs_f64();
    if secs < 60.0 {
        format!("{:.2}s", secs)
    } else {
        format!("{}m{:02}s", duration.as_secs() / 60, duration.as_secs() % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::coordinator::CacheStatus;
    use crate::cache::store::{CacheStore, MemoryCacheStore};
    use crate::error::CacheError;
    use crate::execution::aggregator::PipelineStatus;
    use crate::execution::events::progress_channel;
    use crate::execution::matrix::TargetDescriptor;
    use crate::execution::predicate::Predicate;
    use crate::execution::sequencer::tests::ScriptedRunner;
    use crate::execution::sequencer::{RunState, StepStatus};
    use crate::runners::{StepContext, StepOutcome};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn configurations() -> Vec<TargetConfiguration> {
        MatrixExpander::expand(&[
            TargetDescriptor::new("x86_64-unknown-linux-gnu", "ubuntu-latest")
                .with_capability("kvm"),
            TargetDescriptor::new("aarch64-unknown-linux-gnu", "ubuntu-24.04-arm"),
            TargetDescriptor::new("aarch64-apple-darwin", "macos-latest"),
        ])
    }

    fn steps() -> Vec<Step> {
        vec![
            Step::script("Build", "cargo build"),
            Step::script("Test", "cargo test").when(Predicate::HasCapability("kvm".into())),
            Step::script("Clippy", "cargo clippy"),
        ]
    }

    fn executor(dir: &TempDir, runner: Arc<dyn Runner>) -> PipelineExecutor {
        PipelineExecutor::new("rust", configurations(), steps())
            .with_runner(runner)
            .with_config(ExecutorConfig {
                working_dir: dir.path().to_path_buf(),
                toolchain: Some("1.80.0".to_string()),
                ..Default::default()
            })
    }

    #[tokio::test]
    async fn test_failure_is_isolated_per_configuration() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(ScriptedRunner::failing(&["Build"]));

        // Only fail on one configuration
        struct FailOnArm(Arc<ScriptedRunner>);
        #[async_trait::async_trait]
        impl Runner for FailOnArm {
            async fn run(&self, ctx: &StepContext<'_>, state: &mut CacheEntry) -> StepOutcome {
                let outcome = self.0.run(ctx, state).await;
                if ctx.config.target() == "aarch64-unknown-linux-gnu" {
                    outcome
                } else {
                    StepOutcome::succeeded(Some(0))
                }
            }
        }

        let report = executor(&dir, Arc::new(FailOnArm(runner.clone())))
            .execute()
            .await;

        assert_eq!(report.status, PipelineStatus::Failed);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].target, "aarch64-unknown-linux-gnu");
        assert_eq!(report.failures[0].step_number, 1);

        // Siblings ran to completion
        assert_eq!(
            runner.invoked_steps("x86_64-unknown-linux-gnu"),
            vec!["Build", "Test", "Clippy"]
        );
        assert_eq!(
            runner.invoked_steps("aarch64-apple-darwin"),
            vec!["Build", "Clippy"]
        );
        assert_eq!(
            runner.invoked_steps("aarch64-unknown-linux-gnu"),
            vec!["Build"]
        );
    }

    #[tokio::test]
    async fn test_cache_miss_then_hit() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("Cargo.lock"), "version = 3").unwrap();
        let store = Arc::new(MemoryCacheStore::new());
        let runner = Arc::new(ScriptedRunner::default());

        let first = executor(&dir, runner.clone())
            .with_cache(CacheCoordinator::new(store.clone()))
            .execute()
            .await;
        assert!(first.success());
        assert!(first
            .configurations
            .iter()
            .all(|r| r.cache_status() == CacheStatus::Miss));
        assert_eq!(store.list().await.unwrap().len(), 3);

        let second = executor(&dir, runner)
            .with_cache(CacheCoordinator::new(store.clone()))
            .execute()
            .await;
        assert!(second
            .configurations
            .iter()
            .all(|r| r.cache_status() == CacheStatus::Hit));
    }

    #[tokio::test]
    async fn test_failed_configuration_is_not_persisted() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryCacheStore::new());

        let report = executor(&dir, Arc::new(ScriptedRunner::failing(&["Clippy"])))
            .with_cache(CacheCoordinator::new(store.clone()))
            .execute()
            .await;

        assert!(!report.success());
        assert!(store.list().await.unwrap().is_empty());
    }

    struct OfflineStore;

    #[async_trait::async_trait]
    impl CacheStore for OfflineStore {
        async fn load(&self, _key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
            Err(CacheError::Unavailable("offline".into()))
        }
        async fn save(&self, _entry: &CacheEntry) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("offline".into()))
        }
        async fn list(&self) -> Result<Vec<CacheEntry>, CacheError> {
            Err(CacheError::Unavailable("offline".into()))
        }
        async fn remove(&self, _key: &CacheKey) -> Result<bool, CacheError> {
            Err(CacheError::Unavailable("offline".into()))
        }
        async fn clear(&self) -> Result<usize, CacheError> {
            Err(CacheError::Unavailable("offline".into()))
        }
    }

    #[tokio::test]
    async fn test_unavailable_store_does_not_fail_run() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(ScriptedRunner::default());
        let (tx, mut rx) = progress_channel();

        let report = executor(&dir, runner.clone())
            .with_cache(CacheCoordinator::new(Arc::new(OfflineStore)))
            .with_progress(tx)
            .execute()
            .await;

        assert!(report.success());
        assert!(report
            .configurations
            .iter()
            .all(|r| r.cache_status() == CacheStatus::Unavailable));
        assert_eq!(
            runner.invoked_steps("x86_64-unknown-linux-gnu"),
            vec!["Build", "Test", "Clippy"]
        );

        let mut failed_saves = 0;
        while let Ok(event) = rx.try_recv() {
            if let ExecutionEvent::CachePersisted { saved: false, .. } = event {
                failed_saves += 1;
            }
        }
        assert_eq!(failed_saves, 3);
    }

    #[tokio::test]
    async fn test_panicking_runner_becomes_aborted_failure() {
        struct PanicOnMac;
        #[async_trait::async_trait]
        impl Runner for PanicOnMac {
            async fn run(&self, ctx: &StepContext<'_>, _state: &mut CacheEntry) -> StepOutcome {
                if ctx.config.target() == "aarch64-apple-darwin" {
                    panic!("runner crashed");
                }
                StepOutcome::succeeded(Some(0))
            }
        }

        let dir = TempDir::new().unwrap();
        let report = executor(&dir, Arc::new(PanicOnMac)).execute().await;

        assert_eq!(report.status, PipelineStatus::Failed);
        assert_eq!(report.configurations.len(), 3);
        assert_eq!(report.failures.len(), 1);

        let failure = &report.failures[0];
        assert_eq!(failure.target, "aarch64-apple-darwin");
        assert_eq!(failure.step_number, 0);
        let message = failure.to_string();
        assert!(message.contains("aborted before completing"));
        assert!(message.contains("runner task aborted"));
        assert!(!message.contains("step 0"));
    }

    #[tokio::test]
    async fn test_lockfile_change_invalidates() {
        let dir = TempDir::new().unwrap();
        let lock = dir.path().join("Cargo.lock");
        std::fs::write(&lock, "v1").unwrap();
        let exec = executor(&dir, Arc::new(ScriptedRunner::default()));

        let before = exec.cache_keys().await;
        std::fs::write(&lock, "v2").unwrap();
        let after = exec.cache_keys().await;

        assert_eq!(before.len(), 3);
        for ((_, a), (_, b)) in before.iter().zip(after.iter()) {
            assert_ne!(a, b);
        }
    }

    #[tokio::test]
    async fn test_max_parallel_bounds_concurrency() {
        struct Counting {
            in_flight: AtomicUsize,
            peak: AtomicUsize,
        }
        #[async_trait::async_trait]
        impl Runner for Counting {
            async fn run(&self, _ctx: &StepContext<'_>, _state: &mut CacheEntry) -> StepOutcome {
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                StepOutcome::succeeded(Some(0))
            }
        }

        let dir = TempDir::new().unwrap();
        let runner = Arc::new(Counting {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let mut exec = executor(&dir, runner.clone());
        exec.config_mut().max_parallel = 1;

        assert!(exec.execute().await.success());
        assert_eq!(runner.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_only_selects_configurations() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(ScriptedRunner::default());
        let exec = executor(&dir, runner.clone())
            .only(&["aarch64-apple-darwin".to_string()])
            .unwrap();

        let report = exec.execute().await;
        assert_eq!(report.configurations.len(), 1);
        assert!(runner.invoked_steps("x86_64-unknown-linux-gnu").is_empty());

        let err = executor(&dir, runner)
            .only(&["riscv64gc-unknown-linux-gnu".to_string()])
            .err()
            .unwrap();
        assert!(matches!(err, ServiceError::UnknownTarget(_)));
    }

    #[tokio::test]
    async fn test_events_bracket_the_run() {
        let dir = TempDir::new().unwrap();
        let (tx, mut rx) = progress_channel();
        let report = executor(&dir, Arc::new(ScriptedRunner::default()))
            .with_progress(tx)
            .execute()
            .await;
        assert!(report.success());

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert!(matches!(
            events.first(),
            Some(ExecutionEvent::PipelineStarted {
                total_configurations: 3,
                ..
            })
        ));
        assert!(matches!(
            events.last(),
            Some(ExecutionEvent::PipelineCompleted { success: true, .. })
        ));
        let skipped = events
            .iter()
            .filter(|e| matches!(e, ExecutionEvent::StepSkipped { .. }))
            .count();
        assert_eq!(skipped, 2);
    }

    #[tokio::test]
    async fn test_from_workflow() {
        let workflow = Workflow::default_rust();
        let exec = PipelineExecutor::from_workflow(&workflow).unwrap();
        assert_eq!(exec.configurations().len(), 3);
        assert_eq!(exec.steps().len(), 5);

        let mut broken = workflow;
        broken.matrix.clear();
        assert!(matches!(
            PipelineExecutor::from_workflow(&broken),
            Err(ServiceError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_skipped_steps_recorded_in_report() {
        let dir = TempDir::new().unwrap();
        let report = executor(&dir, Arc::new(ScriptedRunner::default()))
            .execute()
            .await;

        let mac = report
            .configurations
            .iter()
            .find(|r| r.configuration().target() == "aarch64-apple-darwin")
            .unwrap();
        assert_eq!(mac.state(), RunState::Succeeded);
        assert_eq!(mac.steps()[1].status, StepStatus::Skipped);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m05s");
    }
}
