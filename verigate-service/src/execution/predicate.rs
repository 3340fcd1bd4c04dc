// Step Inclusion Predicates
// Typed conditions evaluated once per configuration before a step runs

use crate::execution::matrix::TargetConfiguration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use std::fmt;
use std::sync::Arc;

/// Decides whether a step runs on a given configuration
///
/// Evaluation is a pure function of the [`TargetConfiguration`]. In YAML a
/// predicate is a bare name (`always`) or a single-key map
/// (`has_capability: kvm`, `any: [...]`).
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Predicate {
    #[default]
    Always,
    Never,
    TargetIs(String),
    TargetIsNot(String),
    HostIs(String),
    HostIsNot(String),
    HasCapability(String),
    Not(Box<Predicate>),
    All(Vec<Predicate>),
    Any(Vec<Predicate>),
    /// Programmatic predicate; cannot appear in workflow files
    Custom(CustomPredicate),
}

/// Serde shape of [`Predicate`], read and written as singleton maps
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum PredicateRepr {
    Always,
    Never,
    TargetIs(String),
    TargetIsNot(String),
    HostIs(String),
    HostIsNot(String),
    HasCapability(String),
    Not(Box<PredicateRepr>),
    All(Vec<PredicateRepr>),
    Any(Vec<PredicateRepr>),
}

impl From<PredicateRepr> for Predicate {
    fn from(repr: PredicateRepr) -> Self {
        match repr {
            PredicateRepr::Always => Predicate::Always,
            PredicateRepr::Never => Predicate::Never,
            PredicateRepr::TargetIs(t) => Predicate::TargetIs(t),
            PredicateRepr::TargetIsNot(t) => Predicate::TargetIsNot(t),
            PredicateRepr::HostIs(h) => Predicate::HostIs(h),
            PredicateRepr::HostIsNot(h) => Predicate::HostIsNot(h),
            PredicateRepr::HasCapability(c) => Predicate::HasCapability(c),
            PredicateRepr::Not(inner) => Predicate::Not(Box::new(Predicate::from(*inner))),
            PredicateRepr::All(all) => Predicate::All(all.into_iter().map(Into::into).collect()),
            PredicateRepr::Any(any) => Predicate::Any(any.into_iter().map(Into::into).collect()),
        }
    }
}

impl PredicateRepr {
    /// `None` if the tree contains a custom predicate
    fn from_predicate(predicate: &Predicate) -> Option<Self> {
        let collect = |list: &[Predicate]| {
            list.iter()
                .map(PredicateRepr::from_predicate)
                .collect::<Option<Vec<_>>>()
        };
        Some(match predicate {
            Predicate::Always => PredicateRepr::Always,
            Predicate::Never => PredicateRepr::Never,
            Predicate::TargetIs(t) => PredicateRepr::TargetIs(t.clone()),
            Predicate::TargetIsNot(t) => PredicateRepr::TargetIsNot(t.clone()),
            Predicate::HostIs(h) => PredicateRepr::HostIs(h.clone()),
            Predicate::HostIsNot(h) => PredicateRepr::HostIsNot(h.clone()),
            Predicate::HasCapability(c) => PredicateRepr::HasCapability(c.clone()),
            Predicate::Not(inner) => PredicateRepr::Not(Box::new(Self::from_predicate(inner)?)),
            Predicate::All(all) => PredicateRepr::All(collect(all)?),
            Predicate::Any(any) => PredicateRepr::Any(collect(any)?),
            Predicate::Custom(_) => return None,
        })
    }
}

impl<'de> Deserialize<'de> for Predicate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_yaml::with::singleton_map_recursive::deserialize::<PredicateRepr, D>(deserializer)
            .map(Predicate::from)
    }
}

impl Serialize for Predicate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let repr = PredicateRepr::from_predicate(self).ok_or_else(|| {
            serde::ser::Error::custom(format!("custom predicate '{}' cannot be serialized", self))
        })?;
        serde_yaml::with::singleton_map_recursive::serialize(&repr, serializer)
    }
}

impl Predicate {
    /// Build a predicate from an arbitrary function
    pub fn custom<F>(description: impl Into<String>, func: F) -> Self
    where
        F: Fn(&TargetConfiguration) -> bool + Send + Sync + 'static,
    {
        Self::Custom(CustomPredicate {
            description: description.into(),
            func: Arc::new(func),
        })
    }

    pub fn evaluate(&self, config: &TargetConfiguration) -> bool {
        match self {
            Predicate::Always => true,
            Predicate::Never => false,
            Predicate::TargetIs(target) => config.target() == target,
            Predicate::TargetIsNot(target) => config.target() != target,
            Predicate::HostIs(host) => config.host() == host,
            Predicate::HostIsNot(host) => config.host() != host,
            Predicate::HasCapability(capability) => config.has_capability(capability),
            Predicate::Not(inner) => !inner.evaluate(config),
            Predicate::All(all) => all.iter().all(|p| p.evaluate(config)),
            Predicate::Any(any) => any.iter().any(|p| p.evaluate(config)),
            Predicate::Custom(custom) => (custom.func)(config),
        }
    }

    pub fn is_always(&self) -> bool {
        matches!(self, Predicate::Always)
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Always => write!(f, "always"),
            Predicate::Never => write!(f, "never"),
            Predicate::TargetIs(target) => write!(f, "target is {}", target),
            Predicate::TargetIsNot(target) => write!(f, "target is not {}", target),
            Predicate::HostIs(host) => write!(f, "host is {}", host),
            Predicate::HostIsNot(host) => write!(f, "host is not {}", host),
            Predicate::HasCapability(capability) => write!(f, "host provides {}", capability),
            Predicate::Not(inner) => write!(f, "not ({})", inner),
            Predicate::All(all) => write_joined(f, all, " and "),
            Predicate::Any(any) => write_joined(f, any, " or "),
            Predicate::Custom(custom) => write!(f, "{}", custom.description),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, predicates: &[Predicate], sep: &str) -> fmt::Result {
    if predicates.is_empty() {
        // Empty all() is vacuously true, empty any() is false
        return write!(f, "{}", if sep == " and " { "always" } else { "never" });
    }
    write!(f, "(")?;
    for (i, predicate) in predicates.iter().enumerate() {
        if i > 0 {
            write!(f, "{}", sep)?;
        }
        write!(f, "{}", predicate)?;
    }
    write!(f, ")")
}

/// Function-backed predicate
#[derive(Clone)]
pub struct CustomPredicate {
    description: String,
    func: Arc<dyn Fn(&TargetConfiguration) -> bool + Send + Sync>,
}

impl fmt::Debug for CustomPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomPredicate")
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

impl PartialEq for CustomPredicate {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.func, &other.func)
    }
}
