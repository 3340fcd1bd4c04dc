// Trigger Conditions
// Decides whether a repository event activates a workflow

use serde::{Deserialize, Serialize};
use std::fmt;

/// An event the pipeline may react to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerEvent {
    /// Direct update of `branch`
    Push { branch: String },
    /// Change proposed against `base`
    PullRequest { base: String },
}

impl fmt::Display for TriggerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerEvent::Push { branch } => write!(f, "push to {}", branch),
            TriggerEvent::PullRequest { base } => write!(f, "pull request into {}", base),
        }
    }
}

/// Branch filter for one event kind
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BranchFilter {
    /// Branch names; a trailing `*` matches any suffix. Empty matches all.
    #[serde(default)]
    pub branches: Vec<String>,
}

impl BranchFilter {
    pub fn branches(branches: &[&str]) -> Self {
        Self {
            branches: branches.iter().map(|b| b.to_string()).collect(),
        }
    }

    pub fn matches(&self, branch: &str) -> bool {
        self.branches.is_empty()
            || self.branches.iter().any(|pattern| match pattern.strip_suffix('*') {
                Some(prefix) => branch.starts_with(prefix),
                None => pattern == branch,
            })
    }
}

/// The workflow's `on:` block
///
/// An absent block means the workflow runs for every event.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Triggers {
    #[serde(default)]
    pub push: Option<BranchFilter>,
    #[serde(default)]
    pub pull_request: Option<BranchFilter>,
}

impl Triggers {
    /// Push to and pull requests against `branch`
    pub fn main_line(branch: &str) -> Self {
        Self {
            push: Some(BranchFilter::branches(&[branch])),
            pull_request: Some(BranchFilter::branches(&[branch])),
        }
    }

    pub fn is_unrestricted(&self) -> bool {
        self.push.is_none() && self.pull_request.is_none()
    }

    pub fn matches(&self, event: &TriggerEvent) -> bool {
        if self.is_unrestricted() {
            return true;
        }
        match event {
            TriggerEvent::Push { branch } => {
                self.push.as_ref().is_some_and(|f| f.matches(branch))
            }
            TriggerEvent::PullRequest { base } => self
                .pull_request
                .as_ref()
                .is_some_and(|f| f.matches(base)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push(branch: &str) -> TriggerEvent {
        TriggerEvent::Push {
            branch: branch.to_string(),
        }
    }

    fn pr(base: &str) -> TriggerEvent {
        TriggerEvent::PullRequest {
            base: base.to_string(),
        }
    }

    #[test]
    fn test_main_line() {
        let triggers = Triggers::main_line("main");
        assert!(triggers.matches(&push("main")));
        assert!(triggers.matches(&pr("main")));
        assert!(!triggers.matches(&push("feature/x")));
        assert!(!triggers.matches(&pr("release")));
    }

    #[test]
    fn test_push_only() {
        let triggers = Triggers {
            push: Some(BranchFilter::branches(&["main"])),
            pull_request: None,
        };
        assert!(triggers.matches(&push("main")));
        assert!(!triggers.matches(&pr("main")));
    }

    #[test]
    fn test_unrestricted() {
        let triggers = Triggers::default();
        assert!(triggers.matches(&push("anything")));
        assert!(triggers.matches(&pr("anything")));
    }

    #[test]
    fn test_wildcard_and_empty_filter() {
        let filter = BranchFilter::branches(&["release/*"]);
        assert!(filter.matches("release/1.0"));
        assert!(!filter.matches("main"));
        assert!(BranchFilter::default().matches("main"));
    }

    #[test]
    fn test_deserialize() {
        let yaml = "push:\n  branches: [main]\npull_request:\n  branches: [main]\n";
        let triggers: Triggers = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(triggers, Triggers::main_line("main"));
    }
}
