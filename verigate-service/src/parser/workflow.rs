// Workflow YAML Parser
// Parses verification workflow files and checks them for semantic errors

use crate::parser::error::{ParseError, ParseErrorKind, ParseResult, ValidationError};
use crate::parser::models::Workflow;

use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Workflow file parser
pub struct WorkflowParser;

impl WorkflowParser {
    /// Parse a workflow from YAML
    pub fn parse(content: &str) -> ParseResult<Workflow> {
        serde_yaml::from_str(content).map_err(|e| ParseError::from_yaml_error(&e, content))
    }

    /// Parse a workflow file
    pub fn parse_file<P: AsRef<Path>>(path: P) -> ParseResult<Workflow> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            ParseError::io_error(format!("failed to read {}: {}", path.display(), e))
        })?;

        Self::parse(&content)
    }

    /// Parse and validate, folding validation errors into one `ParseError`
    pub fn load<P: AsRef<Path>>(path: P) -> ParseResult<Workflow> {
        let workflow = Self::parse_file(path)?;
        WorkflowValidator::validate(&workflow).map_err(|errors| {
            let message = errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("\n");
            ParseError::new(message, 0, 0).with_kind(ParseErrorKind::ValidationError)
        })?;
        Ok(workflow)
    }
}

/// Semantic checks the YAML schema cannot express
pub struct WorkflowValidator;

impl WorkflowValidator {
    /// Validate a parsed workflow, collecting every error
    pub fn validate(workflow: &Workflow) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if workflow.name.trim().is_empty() {
            errors.push(ValidationError::new("workflow name is empty", "name"));
        }

        if workflow.matrix.is_empty() {
            errors.push(
                ValidationError::new("matrix has no targets", "matrix")
                    .with_suggestion("add at least one '- target: <triple>' entry"),
            );
        }

        let mut names = HashSet::new();
        for (i, descriptor) in workflow.matrix.iter().enumerate() {
            let path = format!("matrix[{}]", i);
            if descriptor.target.trim().is_empty() {
                errors.push(ValidationError::new("target is empty", &path));
            }
            if !names.insert(descriptor.resolved_name()) {
                errors.push(
                    ValidationError::new(
                        format!("duplicate configuration '{}'", descriptor.resolved_name()),
                        &path,
                    )
                    .with_suggestion("give one of them a distinct 'name:'"),
                );
            }
        }

        if workflow.steps.is_empty() {
            errors.push(ValidationError::new("workflow has no steps", "steps"));
        }

        let mut step_names = HashSet::new();
        for (i, step) in workflow.steps.iter().enumerate() {
            let path = format!("steps[{}]", i);
            if !step_names.insert(step.name.as_str()) {
                errors.push(ValidationError::new(
                    format!("duplicate step name '{}'", step.name),
                    &path,
                ));
            }
            if step.timeout == Some(0) {
                errors.push(ValidationError::new("timeout must be at least 1 second", &path));
            }
        }

        if let Err(step_errors) = workflow.to_steps() {
            errors.extend(step_errors);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
