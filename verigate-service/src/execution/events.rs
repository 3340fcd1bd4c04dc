// Execution Events
// Progress reporting and event types for pipeline execution

use crate::cache::coordinator::CacheStatus;
use crate::execution::sequencer::{RunState, StepStatus};

use std::time::Duration;
use tokio::sync::mpsc;

/// Sender for execution progress events
pub type ProgressSender = mpsc::UnboundedSender<ExecutionEvent>;

/// Receiver for execution progress events
pub type ProgressReceiver = mpsc::UnboundedReceiver<ExecutionEvent>;

/// Create a new progress channel
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// Events emitted during pipeline execution
///
/// Events of different configurations interleave arbitrarily; events of one
/// configuration arrive in step order.
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    /// Pipeline execution started
    PipelineStarted {
        pipeline_name: String,
        total_configurations: usize,
    },

    /// Pipeline execution completed
    PipelineCompleted {
        pipeline_name: String,
        success: bool,
        duration: Duration,
    },

    /// A configuration's step sequence started
    ConfigurationStarted {
        configuration: String,
        target: String,
        host: String,
        total_steps: usize,
    },

    /// A configuration's step sequence reached a terminal state
    ConfigurationCompleted {
        configuration: String,
        state: RunState,
        duration: Duration,
    },

    /// Cache lookup finished before the compile step
    CacheRestored {
        configuration: String,
        key: String,
        status: CacheStatus,
    },

    /// Cache save attempted after the run
    CachePersisted {
        configuration: String,
        key: String,
        saved: bool,
        message: Option<String>,
    },

    /// Step execution started
    StepStarted {
        configuration: String,
        step_name: String,
        step_number: usize,
        command: String,
    },

    /// Step output (stdout/stderr)
    StepOutput {
        configuration: String,
        step_number: usize,
        output: String,
        is_error: bool,
    },

    /// Step execution completed
    StepCompleted {
        configuration: String,
        step_name: String,
        step_number: usize,
        status: StepStatus,
        duration: Duration,
        exit_code: Option<i32>,
    },

    /// Step excluded by its predicate
    StepSkipped {
        configuration: String,
        step_name: String,
        step_number: usize,
        reason: String,
    },

    /// Step not run because an earlier step failed
    StepCancelled {
        configuration: String,
        step_name: String,
        step_number: usize,
    },
}

impl ExecutionEvent {
    /// Create a pipeline started event
    pub fn pipeline_started(name: impl Into<String>, total_configurations: usize) -> Self {
        Self::PipelineStarted {
            pipeline_name: name.into(),
            total_configurations,
        }
    }

    /// Create a pipeline completed event
    pub fn pipeline_completed(name: impl Into<String>, success: bool, duration: Duration) -> Self {
        Self::PipelineCompleted {
            pipeline_name: name.into(),
            success,
            duration,
        }
    }

    pub fn step_output(
        configuration: impl Into<String>,
        step_number: usize,
        output: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self::StepOutput {
            configuration: configuration.into(),
            step_number,
            output: output.into(),
            is_error,
        }
    }

    /// Name of the configuration this event belongs to, if any
    pub fn configuration(&self) -> Option<&str> {
        match self {
            Self::PipelineStarted { .. } | Self::PipelineCompleted { .. } => None,
            Self::ConfigurationStarted { configuration, .. }
            | Self::ConfigurationCompleted { configuration, .. }
            | Self::CacheRestored { configuration, .. }
            | Self::CachePersisted { configuration, .. }
            | Self::StepStarted { configuration, .. }
            | Self::StepOutput { configuration, .. }
            | Self::StepCompleted { configuration, .. }
            | Self::StepSkipped { configuration, .. }
            | Self::StepCancelled { configuration, .. } => Some(configuration),
        }
    }
}

/// Helper trait for sending events, ignoring errors (fire-and-forget)
pub trait EventSender {
    fn send_event(&self, event: ExecutionEvent);
}

impl EventSender for ProgressSender {
    fn send_event(&self, event: ExecutionEvent) {
        let _ = self.send(event);
    }
}

impl EventSender for Option<ProgressSender> {
    fn send_event(&self, event: ExecutionEvent) {
        if let Some(sender) = self {
            let _ = sender.send(event);
        }
    }
}
