// Toolchain Resolution
// Determines the rustc version that feeds into cache keys

use crate::error::ToolError;
use crate::runners::process::{run_streaming, ProcessSpec};

use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Extract the version from `rustc --version` output
///
/// `rustc 1.80.0 (051478957 2024-07-21)` yields `1.80.0 (051478957 2024-07-21)`.
pub fn parse_rustc_version(output: &str) -> Option<String> {
    let line = output.lines().next()?.trim();
    let version = line.strip_prefix("rustc ")?.trim();
    if version.is_empty() {
        None
    } else {
        Some(version.to_string())
    }
}

/// Ask the `rustc` on PATH (honouring rust-toolchain files in
/// `working_dir`) for its version
pub async fn resolve_toolchain_version(working_dir: &Path) -> Result<String, ToolError> {
    let rustc = which::which("rustc").map_err(|_| ToolError::NotFound("rustc".to_string()))?;

    let spec = ProcessSpec::new(rustc.to_string_lossy(), working_dir).args(["--version"]);
    let output = run_streaming(&spec, Arc::new(|_, _| {})).await?;
    if !output.success() {
        return Err(ToolError::NonZeroExit {
            program: "rustc".to_string(),
            code: output.exit_code,
        });
    }

    let version = parse_rustc_version(&output.stdout).ok_or_else(|| {
        ToolError::UnexpectedOutput {
            program: "rustc".to_string(),
            output: output.stdout.clone(),
        }
    })?;
    debug!("Resolved toolchain version {}", version);
    Ok(version)
}
