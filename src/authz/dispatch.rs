//! Ownership probes for dynamic `person` rules.
//!
//! A probe name expands into an ordered list of candidate operations. The
//! first candidate the resource supports decides the outcome:
//!
//! - `is_owner`: `is_owner(s)`, `is_owner?(s)`, `owner == s`, `owner?(s)`, `owners.exists(s)`
//! - `is_manager?`: `is_manager?(s)`, `manager?(s)`
//! - anything else, e.g. `has_member`: `has_member(s)`

use std::fmt;

use inflector::string::pluralize::to_plural;

use crate::authz::errors::EvaluationError;
use crate::authz::resource::Resource;
use crate::authz::types::Subject;

/// How a candidate operation is applied to the resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// `op(subject)` returning a boolean.
    DirectCall,
    /// `op?(subject)` returning a boolean.
    PredicateCall,
    /// `op()` compared with the subject.
    EqualityGetter,
    /// `op.exists(subject)` on a collection.
    CollectionMembership,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub operation: String,
    pub strategy: Strategy,
}

impl Candidate {
    fn new(operation: impl Into<String>, strategy: Strategy) -> Self {
        Self {
            operation: operation.into(),
            strategy,
        }
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.strategy {
            Strategy::CollectionMembership => write!(f, "{}.exists", self.operation),
            _ => write!(f, "{}", self.operation),
        }
    }
}

/// A probe name and its resolved candidate sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    name: String,
    candidates: Vec<Candidate>,
}

impl Probe {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let candidates = candidates_for(&name);
        Self { name, candidates }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    /// Applies the first supported candidate to `resource`.
    ///
    /// `target` only names the context variable for error reporting. A
    /// missing resource, or one that supports none of the candidates, is an
    /// error rather than a non-match.
    pub fn evaluate(
        &self,
        target: &str,
        resource: Option<&dyn Resource>,
        subject: &Subject,
    ) -> Result<bool, EvaluationError> {
        if let Some(resource) = resource {
            for candidate in &self.candidates {
                if !resource.supports(&candidate.operation) {
                    continue;
                }
                let op = candidate.operation.as_str();
                return Ok(match candidate.strategy {
                    Strategy::DirectCall | Strategy::PredicateCall => resource.call(op, subject),
                    Strategy::EqualityGetter => resource.attribute(op).as_ref() == Some(subject),
                    Strategy::CollectionMembership => resource.includes(op, subject),
                });
            }
        }

        Err(EvaluationError::UnsupportedProbe {
            target: target.to_string(),
            resource: resource.map_or_else(|| "nil".to_string(), |r| format!("{r:?}")),
            attempted: self
                .candidates
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", "),
        })
    }
}

impl fmt::Display for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

fn candidates_for(name: &str) -> Vec<Candidate> {
    let Some(base) = owned_name(name) else {
        return vec![Candidate::new(name, Strategy::DirectCall)];
    };

    if let Some(stem) = base.strip_suffix('?') {
        return vec![
            Candidate::new(name, Strategy::PredicateCall),
            Candidate::new(format!("{stem}?"), Strategy::PredicateCall),
        ];
    }

    vec![
        Candidate::new(name, Strategy::DirectCall),
        Candidate::new(format!("{name}?"), Strategy::PredicateCall),
        Candidate::new(base, Strategy::EqualityGetter),
        Candidate::new(format!("{base}?"), Strategy::PredicateCall),
        Candidate::new(to_plural(base), Strategy::CollectionMembership),
    ]
}

/// `is_owner` -> `owner`, `is_manager?` -> `manager?`; `None` for other shapes.
fn owned_name(name: &str) -> Option<&str> {
    let rest = name.strip_prefix("is_")?;
    let stem = rest.strip_suffix('?').unwrap_or(rest);
    let valid = !stem.is_empty()
        && stem
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    valid.then_some(rest)
}
