use crate::output;

use std::path::PathBuf;

use clap::Args;
use color_eyre::Result;

use verigate_service::{MatrixExpander, Workflow, WorkflowParser, WorkflowValidator};

/// Validate a workflow file
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Workflow file (default: built-in Rust workflow)
    #[arg(env = "VERIGATE_WORKFLOW")]
    pub workflow: Option<PathBuf>,
}

pub fn execute(args: ValidateArgs) -> Result<()> {
    let workflow = match &args.workflow {
        Some(path) => {
            if !path.exists() {
                color_eyre::eyre::bail!("Workflow file not found: {}", path.display());
            }
            output::status("Validating", &format!("{}", path.display()));

            match WorkflowParser::parse_file(path) {
                Ok(workflow) => workflow,
                Err(e) => {
                    output::error(&format!("Parse error: {}", e.message));
                    if e.line > 0 {
                        output::info(&format!("  at line {}, column {}", e.line, e.column));
                    }
                    if let Some(suggestion) = &e.suggestion {
                        output::info(&format!("  Suggestion: {}", suggestion));
                    }
                    std::process::exit(1);
                }
            }
        }
        None => {
            output::status("Validating", "built-in Rust workflow");
            Workflow::default_rust()
        }
    };

    output::check("YAML syntax valid");

    if let Err(errors) = WorkflowValidator::validate(&workflow) {
        output::error(&format!("{} validation error(s):", errors.len()));
        for error in &errors {
            output::error(&format!("  - [{}] {}", error.path, error.message));
            if let Some(suggestion) = &error.suggestion {
                output::info(&format!("    Suggestion: {}", suggestion));
            }
        }
        std::process::exit(1);
    }
    output::check("Semantic validation passed");

    // Validation succeeded, so conversion cannot fail here
    let steps = workflow
        .to_steps()
        .map_err(|errors| color_eyre::eyre::eyre!("{} invalid step(s)", errors.len()))?;
    let configurations = MatrixExpander::expand(&workflow.matrix);

    output::check(&format!(
        "Structure: {} configurations, {} steps",
        configurations.len(),
        steps.len()
    ));

    // Inclusion table on stdout
    println!();
    for config in &configurations {
        let capabilities = config
            .capabilities()
            .iter()
            .map(|c| c.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        if capabilities.is_empty() {
            println!("{} ({})", config.name(), config.host());
        } else {
            println!("{} ({}) [{}]", config.name(), config.host(), capabilities);
        }

        for (index, step) in steps.iter().enumerate() {
            if step.applies_to(config) {
                println!("  {}. {:<24} run", index + 1, step.name);
            } else {
                println!(
                    "  {}. {:<24} skip (requires {})",
                    index + 1,
                    step.name,
                    step.include
                );
            }
        }
    }
    println!();

    output::success(&format!("Workflow '{}' is valid", workflow.name));

    Ok(())
}
