// Runners Module
// Executes step actions against the external toolchain

pub mod cargo;
pub mod process;
pub mod toolchain;

pub use cargo::CargoRunner;
pub use process::{run_streaming, OutputCallback, ProcessOutput, ProcessSpec};
pub use toolchain::{parse_rustc_version, resolve_toolchain_version};

use crate::cache::entry::CacheEntry;
use crate::execution::events::ProgressSender;
use crate::execution::matrix::TargetConfiguration;
use crate::execution::step::Step;

use std::collections::HashMap;
use std::path::Path;

/// Everything a runner needs to execute one step
pub struct StepContext<'a> {
    pub config: &'a TargetConfiguration,
    pub step: &'a Step,
    /// 1-based position of the step in the workflow
    pub step_number: usize,
    pub working_dir: &'a Path,
    pub env: &'a HashMap<String, String>,
    pub events: &'a Option<ProgressSender>,
}

/// Result of executing one step action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub success: bool,
    pub exit_code: Option<i32>,
    /// Failure detail, or a note such as "reused from cache"
    pub message: Option<String>,
}

impl StepOutcome {
    pub fn succeeded(exit_code: Option<i32>) -> Self {
        Self {
            success: true,
            exit_code,
            message: None,
        }
    }

    pub fn failed(exit_code: Option<i32>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            exit_code,
            message: Some(message.into()),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Trait for step runners
///
/// `state` is the configuration's build state: restored from the cache (or
/// fresh) before the first step, persisted after the last.
#[async_trait::async_trait]
pub trait Runner: Send + Sync {
    async fn run(&self, ctx: &StepContext<'_>, state: &mut CacheEntry) -> StepOutcome;
}
