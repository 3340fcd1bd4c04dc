// Cargo Runner
// Runs built-in cargo/rustup actions and `run:` scripts for one configuration

use crate::cache::entry::CacheEntry;
use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::execution::step::{BuiltinAction, StepAction};
use crate::runners::process::{run_streaming, OutputCallback, ProcessSpec};
use crate::runners::{Runner, StepContext, StepOutcome};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Key under which a registered target is recorded in the build state
pub fn target_record(target: &str) -> String {
    format!("target:{}", target)
}

/// Runner that invokes the real toolchain
#[derive(Debug, Clone, Default)]
pub struct CargoRunner {
    /// Applied to steps that do not declare their own timeout
    default_timeout: Option<Duration>,
}

impl CargoRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Environment every step sees, on top of the caller's
    pub fn step_env(ctx: &StepContext<'_>) -> HashMap<String, String> {
        let mut env = ctx.env.clone();
        env.insert("VERIGATE_CONFIGURATION".into(), ctx.config.name().into());
        env.insert("VERIGATE_TARGET".into(), ctx.config.target().into());
        env.insert("VERIGATE_HOST".into(), ctx.config.host().into());
        env.insert("CARGO_BUILD_TARGET".into(), ctx.config.target().into());
        env
    }

    fn process_spec(&self, ctx: &StepContext<'_>) -> ProcessSpec {
        let env = Self::step_env(ctx);
        let timeout = ctx.step.timeout.or(self.default_timeout);

        let spec = match &ctx.step.action {
            StepAction::Builtin(action) => {
                let (program, args) = action.command(ctx.config.target());
                let program = which::which(program)
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_else(|_| program.to_string());
                ProcessSpec::new(program, ctx.working_dir).args(args)
            }
            StepAction::Script(script) => ProcessSpec::script(script, ctx.working_dir),
        };

        spec.envs(&env).timeout(timeout)
    }

    fn output_callback(ctx: &StepContext<'_>) -> OutputCallback {
        let events: Option<ProgressSender> = ctx.events.clone();
        let configuration = ctx.config.name().to_string();
        let step_number = ctx.step_number;
        Arc::new(move |line: &str, is_error: bool| {
            events.send_event(ExecutionEvent::step_output(
                configuration.clone(),
                step_number,
                line,
                is_error,
            ));
        })
    }
}

#[async_trait::async_trait]
impl Runner for CargoRunner {
    async fn run(&self, ctx: &StepContext<'_>, state: &mut CacheEntry) -> StepOutcome {
        let registers_target = ctx.step.action == StepAction::Builtin(BuiltinAction::RegisterTarget);
        let record = target_record(ctx.config.target());

        if registers_target && state.is_registered(&record) {
            debug!(
                "Target {} already registered under {}",
                ctx.config.target(),
                state.key
            );
            return StepOutcome::succeeded(None).with_message("target already installed (cached)");
        }

        let spec = self.process_spec(ctx);
        match run_streaming(&spec, Self::output_callback(ctx)).await {
            Ok(output) if output.success() => {
                if registers_target {
                    state.record(record);
                }
                StepOutcome::succeeded(output.exit_code)
            }
            Ok(output) => StepOutcome::failed(
                output.exit_code,
                match output.exit_code {
                    Some(code) => format!("{} exited with status {}", spec.program, code),
                    None => format!("{} was terminated by a signal", spec.program),
                },
            ),
            Err(e) => StepOutcome::failed(None, e.to_string()),
        }
    }
}
