// Workflow Models
// Serde representation of a verification workflow file

use crate::cache::key::DEFAULT_KEY_PREFIX;
use crate::execution::matrix::TargetDescriptor;
use crate::execution::predicate::Predicate;
use crate::execution::step::{BuiltinAction, Step, StepAction};
use crate::parser::error::ValidationError;
use crate::parser::trigger::Triggers;

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A verification workflow: target matrix, ordered steps, triggers, cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Workflow {
    pub name: String,

    #[serde(default)]
    pub on: Triggers,

    /// Overrides the version reported by `rustc --version` in cache keys
    #[serde(default)]
    pub toolchain: Option<String>,

    /// Maximum configurations running at once (0 = unbounded)
    #[serde(default)]
    pub max_parallel: usize,

    #[serde(default)]
    pub cache: CacheSettings,

    pub matrix: Vec<TargetDescriptor>,

    pub steps: Vec<StepDefinition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Lock file whose contents key the cache, relative to the working dir
    #[serde(default = "default_lockfile")]
    pub lockfile: String,
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            lockfile: default_lockfile(),
            prefix: default_prefix(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_lockfile() -> String {
    "Cargo.lock".to_string()
}

fn default_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}

/// A step as written in the workflow file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepDefinition {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uses: Option<BuiltinAction>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<Predicate>,

    /// Per-step timeout in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

impl StepDefinition {
    pub fn uses(name: impl Into<String>, action: BuiltinAction) -> Self {
        Self {
            name: name.into(),
            uses: Some(action),
            run: None,
            when: None,
            timeout: None,
        }
    }

    pub fn when(mut self, predicate: Predicate) -> Self {
        self.when = Some(predicate);
        self
    }

    /// Convert into an executable step; `path` locates errors
    pub fn to_step(&self, path: &str) -> Result<Step, ValidationError> {
        let action = match (&self.uses, &self.run) {
            (Some(action), None) => StepAction::Builtin(*action),
            (None, Some(script)) if !script.trim().is_empty() => StepAction::Script(script.clone()),
            (None, Some(_)) => {
                return Err(ValidationError::new("'run' script is empty", path))
            }
            (Some(_), Some(_)) => {
                return Err(ValidationError::new(
                    "step has both 'uses' and 'run'",
                    path,
                )
                .with_suggestion("split it into two steps"))
            }
            (None, None) => {
                return Err(ValidationError::new(
                    "step needs either 'uses' or 'run'",
                    path,
                )
                .with_suggestion("built-in actions are: register-target, build, fmt, test, clippy"))
            }
        };

        let mut step = Step::new(self.name.clone(), action);
        if let Some(predicate) = &self.when {
            step = step.when(predicate.clone());
        }
        if let Some(seconds) = self.timeout {
            step = step.with_timeout(Duration::from_secs(seconds));
        }
        Ok(step)
    }
}

impl Workflow {
    /// The canonical workflow: three targets, the full check list, and the
    /// test step gated on hardware virtualization support
    pub fn default_rust() -> Self {
        Self {
            name: "rust".to_string(),
            on: Triggers::main_line("main"),
            toolchain: None,
            max_parallel: 0,
            cache: CacheSettings::default(),
            matrix: vec![
                TargetDescriptor::new("x86_64-unknown-linux-gnu", "ubuntu-latest")
                    .with_capability("kvm"),
                TargetDescriptor::new("aarch64-unknown-linux-gnu", "ubuntu-24.04-arm"),
                TargetDescriptor::new("aarch64-apple-darwin", "macos-latest")
                    .with_capability("hvf"),
            ],
            steps: vec![
                StepDefinition::uses("Register target", BuiltinAction::RegisterTarget),
                StepDefinition::uses("Build", BuiltinAction::Build),
                StepDefinition::uses("Format", BuiltinAction::Fmt),
                StepDefinition::uses("Test", BuiltinAction::Test).when(Predicate::Any(vec![
                    Predicate::HasCapability("kvm".to_string()),
                    Predicate::HasCapability("hvf".to_string()),
                ])),
                StepDefinition::uses("Clippy", BuiltinAction::Clippy),
            ],
        }
    }

    /// Executable steps in declared order
    pub fn to_steps(&self) -> Result<Vec<Step>, Vec<ValidationError>> {
        let mut steps = Vec::with_capacity(self.steps.len());
        let mut errors = Vec::new();
        for (i, definition) in self.steps.iter().enumerate() {
            match definition.to_step(&format!("steps[{}]", i)) {
                Ok(step) => steps.push(step),
                Err(e) => errors.push(e),
            }
        }
        if errors.is_empty() {
            Ok(steps)
        } else {
            Err(errors)
        }
    }
}
