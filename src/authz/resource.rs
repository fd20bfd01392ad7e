use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::authz::errors::EvaluationError;
use crate::authz::types::{ResourceKey, Subject};

/// Anything a role can be granted on, and that ownership probes can ask about.
///
/// The probe hooks default to "unsupported"; a resource opts in to each
/// operation name by answering `supports`.
pub trait Resource: fmt::Debug + Send + Sync {
    /// Stable type tag, shared by every variant of a polymorphic family.
    fn resource_type(&self) -> &str;

    fn resource_id(&self) -> String;

    fn key(&self) -> ResourceKey {
        ResourceKey::new(self.resource_type(), self.resource_id())
    }

    /// Whether the resource exposes the named operation.
    fn supports(&self, _operation: &str) -> bool {
        false
    }

    /// Calls a boolean operation with the subject, e.g. `is_owner(subject)`.
    fn call(&self, _operation: &str, _subject: &Subject) -> bool {
        false
    }

    /// Reads a subject-valued attribute, e.g. `owner`.
    fn attribute(&self, _operation: &str) -> Option<Subject> {
        None
    }

    /// Tests membership in a subject collection, e.g. `owners`.
    fn includes(&self, _collection: &str, _subject: &Subject) -> bool {
        false
    }
}

impl Resource for ResourceKey {
    fn resource_type(&self) -> &str {
        &self.resource_type
    }

    fn resource_id(&self) -> String {
        self.resource_id.clone()
    }
}

type PredicateFn = dyn Fn(&Subject) -> bool + Send + Sync;

/// A resource whose probe operations are declared in tables instead of code.
#[derive(Clone)]
pub struct ResourceRecord {
    key: ResourceKey,
    predicates: HashMap<String, Arc<PredicateFn>>,
    attributes: HashMap<String, Option<Subject>>,
    collections: HashMap<String, Vec<Subject>>,
}

impl ResourceRecord {
    pub fn new(resource_type: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self {
            key: ResourceKey::new(resource_type, resource_id),
            predicates: HashMap::new(),
            attributes: HashMap::new(),
            collections: HashMap::new(),
        }
    }

    pub fn with_predicate<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Subject) -> bool + Send + Sync + 'static,
    {
        self.predicates.insert(name.into(), Arc::new(f));
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: Option<Subject>) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    pub fn with_collection(mut self, name: impl Into<String>, members: Vec<Subject>) -> Self {
        self.collections.insert(name.into(), members);
        self
    }
}

impl fmt::Debug for ResourceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ops: Vec<&str> = self
            .predicates
            .keys()
            .chain(self.attributes.keys())
            .chain(self.collections.keys())
            .map(String::as_str)
            .collect();
        ops.sort_unstable();
        f.debug_struct("ResourceRecord")
            .field("key", &self.key.to_string())
            .field("operations", &ops)
            .finish()
    }
}

impl Resource for ResourceRecord {
    fn resource_type(&self) -> &str {
        &self.key.resource_type
    }

    fn resource_id(&self) -> String {
        self.key.resource_id.clone()
    }

    fn supports(&self, operation: &str) -> bool {
        self.predicates.contains_key(operation)
            || self.attributes.contains_key(operation)
            || self.collections.contains_key(operation)
    }

    fn call(&self, operation: &str, subject: &Subject) -> bool {
        self.predicates
            .get(operation)
            .is_some_and(|f| f(subject))
    }

    fn attribute(&self, operation: &str) -> Option<Subject> {
        self.attributes.get(operation).cloned().flatten()
    }

    fn includes(&self, collection: &str, subject: &Subject) -> bool {
        self.collections
            .get(collection)
            .is_some_and(|members| members.contains(subject))
    }
}

/// Named resources visible to a rule during evaluation.
///
/// A variable may be declared with no value; that is distinct from not
/// being declared at all.
#[derive(Debug, Clone, Default)]
pub struct Context {
    vars: HashMap<String, Option<Arc<dyn Resource>>>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, resource: impl Resource + 'static) -> Self {
        self.insert(name, Some(Arc::new(resource)));
        self
    }

    pub fn with_shared(mut self, name: impl Into<String>, resource: Arc<dyn Resource>) -> Self {
        self.insert(name, Some(resource));
        self
    }

    pub fn with_nil(mut self, name: impl Into<String>) -> Self {
        self.insert(name, None);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, resource: Option<Arc<dyn Resource>>) {
        self.vars.insert(name.into(), resource);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn resolve(&self, name: &str) -> Result<Option<&dyn Resource>, EvaluationError> {
        self.vars
            .get(name)
            .map(|r| r.as_deref())
            .ok_or_else(|| EvaluationError::UndeclaredVariable(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_operations() {
        let bob = Subject::person("bob");
        let team = ResourceRecord::new("Team", "7")
            .with_predicate("is_member", |s| s.id() == Some("bob"))
            .with_attribute("owner", Some(bob.clone()))
            .with_collection("managers", vec![bob.clone()]);

        assert_eq!(team.key(), ResourceKey::new("Team", "7"));
        assert!(team.supports("is_member"));
        assert!(team.supports("owner"));
        assert!(team.supports("managers"));
        assert!(!team.supports("is_owner"));

        assert!(team.call("is_member", &bob));
        assert!(!team.call("is_member", &Subject::person("eve")));
        assert_eq!(team.attribute("owner"), Some(bob.clone()));
        assert!(team.includes("managers", &bob));
    }

    #[test]
    fn test_context_resolve() {
        let ctx = Context::new()
            .with("project", ResourceKey::new("Project", "1"))
            .with_nil("parent");

        let project = ctx.resolve("project").unwrap().unwrap();
        assert_eq!(project.key().to_string(), "Project/1");
        assert!(ctx.resolve("parent").unwrap().is_none());

        let err = ctx.resolve("oops").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Target resource `oops` did not exist in the given context"
        );
    }

    #[test]
    fn test_bare_key_supports_nothing() {
        let key = ResourceKey::new("Project", "1");
        assert!(!key.supports("is_owner"));
        assert_eq!(key.resource_type(), "Project");
    }
}
