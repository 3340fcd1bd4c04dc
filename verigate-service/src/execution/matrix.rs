// Matrix Expansion
// Expands declared target descriptors into concrete target configurations

use serde::{Deserialize, Serialize};

use std::collections::BTreeSet;
use std::fmt;

/// Host label used when a descriptor does not name one
pub const LOCAL_HOST: &str = "local";

/// A host feature a step may depend on (e.g. `kvm`)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capability(String);

impl Capability {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Capability {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// One entry of a workflow's `matrix:` list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetDescriptor {
    /// Target triple, e.g. `aarch64-unknown-linux-gnu`
    pub target: String,
    /// Runner label the target must execute on
    #[serde(default)]
    pub host: Option<String>,
    /// Display name; defaults to the target triple
    #[serde(default)]
    pub name: Option<String>,
    /// Features the host provides
    #[serde(default)]
    pub capabilities: Vec<Capability>,
}

impl TargetDescriptor {
    pub fn new(target: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            host: Some(host.into()),
            name: None,
            capabilities: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_capability(mut self, capability: impl Into<Capability>) -> Self {
        self.capabilities.push(capability.into());
        self
    }

    /// Name the resulting configuration will carry
    pub fn resolved_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.target)
    }
}

/// A single expanded platform/architecture/host combination
///
/// Fields are private so a configuration cannot change once the matrix has
/// been expanded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TargetConfiguration {
    name: String,
    target: String,
    host: String,
    capabilities: BTreeSet<Capability>,
}

impl TargetConfiguration {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn capabilities(&self) -> &BTreeSet<Capability> {
        &self.capabilities
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c.as_str() == capability)
    }
}

impl From<&TargetDescriptor> for TargetConfiguration {
    fn from(descriptor: &TargetDescriptor) -> Self {
        Self {
            name: descriptor.resolved_name().to_string(),
            target: descriptor.target.clone(),
            host: descriptor
                .host
                .clone()
                .unwrap_or_else(|| LOCAL_HOST.to_string()),
            capabilities: descriptor.capabilities.iter().cloned().collect(),
        }
    }
}

impl fmt::Display for TargetConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name == self.target {
            write!(f, "{} on {}", self.target, self.host)
        } else {
            write!(f, "{} ({} on {})", self.name, self.target, self.host)
        }
    }
}

/// Matrix expander for workflow target lists
pub struct MatrixExpander;

impl MatrixExpander {
    /// Expand descriptors into configurations, one per descriptor, in
    /// declaration order
    pub fn expand(descriptors: &[TargetDescriptor]) -> Vec<TargetConfiguration> {
        descriptors.iter().map(TargetConfiguration::from).collect()
    }
}
