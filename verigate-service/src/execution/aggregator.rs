// Result Aggregation
// Folds per-configuration results into one pipeline verdict

use crate::execution::sequencer::{RunResult, RunState};

use serde::Serialize;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Succeeded,
    Failed,
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineStatus::Succeeded => write!(f, "succeeded"),
            PipelineStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Where a configuration first failed
///
/// `step_number` is 0 when the configuration aborted before any step failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureSummary {
    pub configuration: String,
    pub target: String,
    pub step_number: usize,
    pub step_name: String,
    pub detail: Option<String>,
}

impl fmt::Display for FailureSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.step_number == 0 {
            write!(f, "{}: aborted before completing", self.configuration)?;
        } else {
            write!(
                f,
                "{}: step {} '{}' failed",
                self.configuration, self.step_number, self.step_name
            )?;
        }
        if let Some(detail) = &self.detail {
            write!(f, " ({})", detail)?;
        }
        Ok(())
    }
}

/// Collects one [`RunResult`] per configuration
#[derive(Debug, Default)]
pub struct ResultAggregator {
    results: Vec<RunResult>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, result: RunResult) {
        self.results.push(result);
    }

    /// Failed if any configuration failed
    pub fn status(&self) -> PipelineStatus {
        if self.results.iter().any(|r| r.state().is_failed()) {
            PipelineStatus::Failed
        } else {
            PipelineStatus::Succeeded
        }
    }

    pub fn failures(&self) -> Vec<FailureSummary> {
        self.results
            .iter()
            .filter_map(|result| {
                let RunState::Failed(number) = result.state() else {
                    return None;
                };
                let step = result.failed_step();
                Some(FailureSummary {
                    configuration: result.configuration().name().to_string(),
                    target: result.configuration().target().to_string(),
                    step_number: number,
                    step_name: step.map(|s| s.name.clone()).unwrap_or_default(),
                    detail: step
                        .and_then(|s| s.detail.clone())
                        .or_else(|| result.error().map(String::from)),
                })
            })
            .collect()
    }

    pub fn results(&self) -> &[RunResult] {
        &self.results
    }

    /// Finalize into a report
    pub fn finish(mut self, pipeline_name: impl Into<String>, duration: Duration) -> PipelineReport {
        // Configurations finish in any order; report them by name
        self.results
            .sort_by(|a, b| a.configuration().name().cmp(b.configuration().name()));
        PipelineReport {
            pipeline: pipeline_name.into(),
            status: self.status(),
            failures: self.failures(),
            duration_ms: duration.as_millis() as u64,
            configurations: self.results,
        }
    }
}

/// Final, serialisable pipeline outcome
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub pipeline: String,
    pub status: PipelineStatus,
    pub failures: Vec<FailureSummary>,
    pub duration_ms: u64,
    pub configurations: Vec<RunResult>,
}

impl PipelineReport {
    pub fn success(&self) -> bool {
        self.status == PipelineStatus::Succeeded
    }

    /// First failure in configuration name order
    pub fn first_failure(&self) -> Option<&FailureSummary> {
        self.failures.first()
    }
}
