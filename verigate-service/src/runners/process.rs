// Process Runner
// Spawns external tools and scripts, streaming their output line by line

use crate::error::ToolError;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::debug;

/// Callback for handling output lines in real-time: `(line, is_stderr)`
pub type OutputCallback = Arc<dyn Fn(&str, bool) + Send + Sync>;

/// Platform shell used for `run:` scripts
pub fn shell_command() -> (&'static str, &'static [&'static str]) {
    if cfg!(target_os = "windows") {
        ("cmd", &["/C"])
    } else {
        ("sh", &["-c"])
    }
}

/// A fully resolved invocation
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub working_dir: PathBuf,
    pub timeout: Option<Duration>,
}

impl ProcessSpec {
    pub fn new(program: impl Into<String>, working_dir: impl AsRef<Path>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: HashMap::new(),
            working_dir: working_dir.as_ref().to_path_buf(),
            timeout: None,
        }
    }

    /// Run `script` through the platform shell
    pub fn script(script: &str, working_dir: impl AsRef<Path>) -> Self {
        let (shell, shell_args) = shell_command();
        let mut spec = Self::new(shell, working_dir);
        spec.args = shell_args.iter().map(|a| a.to_string()).collect();
        spec.args.push(script.to_string());
        spec
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn envs(mut self, env: &HashMap<String, String>) -> Self {
        self.env
            .extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Output collected during execution
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Run a process to completion, forwarding each line to `on_output`
///
/// Returns `Err` only if the process could not be started or timed out; a
/// non-zero exit is reported through [`ProcessOutput::exit_code`].
pub async fn run_streaming(
    spec: &ProcessSpec,
    on_output: OutputCallback,
) -> Result<ProcessOutput, ToolError> {
    debug!(
        "Running {} {} in {}",
        spec.program,
        spec.args.join(" "),
        spec.working_dir.display()
    );

    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args);
    cmd.current_dir(&spec.working_dir);
    cmd.envs(&spec.env);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|source| ToolError::Spawn {
        program: spec.program.clone(),
        source,
    })?;

    let stdout_handle = child
        .stdout
        .take()
        .map(|out| collect_lines(out, on_output.clone(), false));
    let stderr_handle = child
        .stderr
        .take()
        .map(|err| collect_lines(err, on_output, true));

    let wait_result = if let Some(timeout) = spec.timeout {
        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(result) => result,
            Err(_) => {
                let _ = child.kill().await;
                return Err(ToolError::TimedOut {
                    program: spec.program.clone(),
                    seconds: timeout.as_secs(),
                });
            }
        }
    } else {
        child.wait().await
    };

    let exit_code = wait_result.ok().and_then(|s| s.code());

    Ok(ProcessOutput {
        stdout: join_output(stdout_handle).await,
        stderr: join_output(stderr_handle).await,
        exit_code,
    })
}

fn collect_lines<R>(reader: R, on_output: OutputCallback, is_error: bool) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        let mut output = String::new();
        while let Ok(Some(line)) = lines.next_line().await {
            on_output(&line, is_error);
            if !output.is_empty() {
                output.push('\n');
            }
            output.push_str(&line);
        }
        output
    })
}

async fn join_output(handle: Option<JoinHandle<String>>) -> String {
    match handle {
        Some(handle) => handle.await.unwrap_or_default(),
        None => String::new(),
    }
}
