// Parser module for verification workflows
// Provides YAML parsing, validation, and trigger matching

pub mod error;
pub mod models;
pub mod trigger;
pub mod workflow;

pub use error::{ParseError, ParseErrorKind, ParseResult, ValidationError};
pub use models::{CacheSettings, StepDefinition, Workflow};
pub use trigger::{BranchFilter, TriggerEvent, Triggers};
pub use workflow::{WorkflowParser, WorkflowValidator};
