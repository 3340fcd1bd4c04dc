// Subcommand implementations

pub mod cache;
pub mod run;
pub mod validate;

use std::path::{Path, PathBuf};

use color_eyre::Result;
use tracing::debug;
use verigate_service::cache::{default_cache_dir, FsCacheStore};
use verigate_service::{Workflow, WorkflowParser};

use crate::output;

/// Load a workflow file, or the built-in workflow when none is given
pub fn load_workflow(path: Option<&Path>) -> Result<Workflow> {
    let Some(path) = path else {
        output::info("No workflow file given, using the built-in Rust workflow");
        return Ok(Workflow::default_rust());
    };

    if !path.exists() {
        color_eyre::eyre::bail!("Workflow file not found: {}", path.display());
    }

    debug!("Loading workflow {}", path.display());
    Ok(WorkflowParser::load(path)?)
}

/// The on-disk cache, at `dir` or the default location
pub fn open_store(dir: Option<PathBuf>) -> FsCacheStore {
    let dir = dir.unwrap_or_else(default_cache_dir);
    debug!("Using cache directory {}", dir.display());
    FsCacheStore::new(dir)
}
