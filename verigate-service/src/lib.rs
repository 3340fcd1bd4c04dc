// Verigate Service Library
// Core library for matrix verification pipelines over Rust targets

pub mod cache;
pub mod error;
pub mod execution;
pub mod parser;
pub mod runners;

// Re-export commonly used types
pub use error::{CacheError, ServiceError, ServiceResult, ToolError};

// Re-export parser types
pub use parser::{
    ParseError, ParseErrorKind, ParseResult, TriggerEvent, Triggers, ValidationError, Workflow,
    WorkflowParser, WorkflowValidator,
};

// Re-export execution types
pub use execution::{
    ExecutionEvent, ExecutorConfig, MatrixExpander, PipelineExecutor, PipelineReport,
    PipelineStatus, Predicate, ProgressSender, RunResult, RunState, Step, StepAction,
    TargetConfiguration, TargetDescriptor,
};

// Re-export cache types
pub use cache::{CacheCoordinator, CacheEntry, CacheKey, CacheStore, FsCacheStore, MemoryCacheStore};

// Re-export runner types
pub use runners::{CargoRunner, Runner, StepContext, StepOutcome};
