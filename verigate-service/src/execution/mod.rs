// Execution Engine Module
// Matrix expansion, step sequencing, parallel execution, and aggregation

pub mod aggregator;
pub mod events;
pub mod executor;
pub mod matrix;
pub mod predicate;
pub mod sequencer;
pub mod step;

// Re-export key types
pub use aggregator::{FailureSummary, PipelineReport, PipelineStatus, ResultAggregator};
pub use events::{progress_channel, EventSender, ExecutionEvent, ProgressReceiver, ProgressSender};
pub use executor::{format_duration, ExecutorConfig, KeyInputs, PipelineExecutor};
pub use matrix::{Capability, MatrixExpander, TargetConfiguration, TargetDescriptor, LOCAL_HOST};
pub use predicate::{CustomPredicate, Predicate};
pub use sequencer::{RunResult, RunState, StepRecord, StepSequencer, StepStatus};
pub use step::{BuiltinAction, Step, StepAction};
