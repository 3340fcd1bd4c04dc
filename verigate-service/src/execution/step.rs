// Pipeline Steps
// Named units of work with an action and an inclusion predicate

use crate::execution::matrix::TargetConfiguration;
use crate::execution::predicate::Predicate;

use serde::{Deserialize, Serialize};

use std::fmt;
use std::time::Duration;

/// Built-in actions, parameterised only by the configuration's target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuiltinAction {
    /// `rustup target add <target>`
    RegisterTarget,
    /// `cargo build --target <target>`
    Build,
    /// `cargo fmt --all -- --check`
    Fmt,
    /// `cargo test --target <target>`
    Test,
    /// `cargo clippy --target <target> -- -D warnings`
    Clippy,
}

impl BuiltinAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuiltinAction::RegisterTarget => "register-target",
            BuiltinAction::Build => "build",
            BuiltinAction::Fmt => "fmt",
            BuiltinAction::Test => "test",
            BuiltinAction::Clippy => "clippy",
        }
    }

    /// Program and arguments for this action on `target`
    pub fn command(&self, target: &str) -> (&'static str, Vec<String>) {
        let args: Vec<String> = match self {
            BuiltinAction::RegisterTarget => vec!["target".into(), "add".into(), target.into()],
            BuiltinAction::Build => vec!["build".into(), "--target".into(), target.into()],
            BuiltinAction::Fmt => vec![
                "fmt".into(),
                "--all".into(),
                "--".into(),
                "--check".into(),
            ],
            BuiltinAction::Test => vec!["test".into(), "--target".into(), target.into()],
            BuiltinAction::Clippy => vec![
                "clippy".into(),
                "--target".into(),
                target.into(),
                "--".into(),
                "-D".into(),
                "warnings".into(),
            ],
        };
        let program = match self {
            BuiltinAction::RegisterTarget => "rustup",
            _ => "cargo",
        };
        (program, args)
    }
}

impl fmt::Display for BuiltinAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a step does when it runs
#[derive(Debug, Clone, PartialEq)]
pub enum StepAction {
    Builtin(BuiltinAction),
    /// Shell script run through the platform shell
    Script(String),
}

impl StepAction {
    /// Short human description, e.g. `cargo build --target x`
    pub fn describe(&self, config: &TargetConfiguration) -> String {
        match self {
            StepAction::Builtin(action) => {
                let (program, args) = action.command(config.target());
                format!("{} {}", program, args.join(" "))
            }
            StepAction::Script(script) => script.lines().next().unwrap_or_default().to_string(),
        }
    }
}

/// An ordered unit of pipeline work
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub name: String,
    pub action: StepAction,
    pub include: Predicate,
    pub timeout: Option<Duration>,
}

impl Step {
    pub fn new(name: impl Into<String>, action: StepAction) -> Self {
        Self {
            name: name.into(),
            action,
            include: Predicate::Always,
            timeout: None,
        }
    }

    pub fn builtin(name: impl Into<String>, action: BuiltinAction) -> Self {
        Self::new(name, StepAction::Builtin(action))
    }

    pub fn script(name: impl Into<String>, script: impl Into<String>) -> Self {
        Self::new(name, StepAction::Script(script.into()))
    }

    pub fn when(mut self, predicate: Predicate) -> Self {
        self.include = predicate;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn applies_to(&self, config: &TargetConfiguration) -> bool {
        self.include.evaluate(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::matrix::TargetDescriptor;

    #[test]
    fn test_builtin_commands() {
        let (program, args) = BuiltinAction::RegisterTarget.command("aarch64-apple-darwin");
        assert_eq!(program, "rustup");
        assert_eq!(args, vec!["target", "add", "aarch64-apple-darwin"]);

        let (program, args) = BuiltinAction::Fmt.command("aarch64-apple-darwin");
        assert_eq!(program, "cargo");
        assert!(!args.iter().any(|a| a == "aarch64-apple-darwin"));

        let (_, args) = BuiltinAction::Clippy.command("x86_64-unknown-linux-gnu");
        assert_eq!(args[..3], ["clippy", "--target", "x86_64-unknown-linux-gnu"]);
    }

    #[test]
    fn test_builtin_deserialize() {
        let action: BuiltinAction = serde_yaml::from_str("register-target").unwrap();
        assert_eq!(action, BuiltinAction::RegisterTarget);
        assert!(serde_yaml::from_str::<BuiltinAction>("deploy").is_err());
    }

    #[test]
    fn test_applies_to() {
        let config = TargetConfiguration::from(&TargetDescriptor::new(
            "aarch64-unknown-linux-gnu",
            "ubuntu-24.04-arm",
        ));
        let step = Step::builtin("Test", BuiltinAction::Test)
            .when(Predicate::TargetIsNot("aarch64-unknown-linux-gnu".into()));
        assert!(!step.applies_to(&config));
        assert!(Step::builtin("Build", BuiltinAction::Build).applies_to(&config));
    }

    #[test]
    fn test_describe() {
        let config =
            TargetConfiguration::from(&TargetDescriptor::new("aarch64-apple-darwin", "macos"));
        assert_eq!(
            StepAction::Builtin(BuiltinAction::Build).describe(&config),
            "cargo build --target aarch64-apple-darwin"
        );
        assert_eq!(
            StepAction::Script("cargo doc\ncargo package".into()).describe(&config),
            "cargo doc"
        );
    }
}
