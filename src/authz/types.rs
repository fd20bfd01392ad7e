use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::StoreError;

/// Reserved role: any authenticated subject, optionally probed against resources.
pub const PERSON: &str = "person";
/// Reserved role: an unauthenticated subject.
pub const GUEST: &str = "guest";
/// Reserved role: anyone at all.
pub const EVERYONE: &str = "everyone";
/// Reserved action matching every action.
pub const ALL_ACTIONS: &str = "all";

pub(crate) const RESERVED_ROLES: [&str; 3] = [PERSON, GUEST, EVERYONE];

/// The entity being authorized.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Subject {
    /// No persisted identity; never holds grants.
    Guest,
    Person { id: String },
}

impl Subject {
    pub fn person(id: impl Into<String>) -> Self {
        Subject::Person { id: id.into() }
    }

    pub fn guest() -> Self {
        Subject::Guest
    }

    pub fn is_guest(&self) -> bool {
        matches!(self, Subject::Guest)
    }

    /// The persisted identity, `None` for guests.
    pub fn id(&self) -> Option<&str> {
        match self {
            Subject::Guest => None,
            Subject::Person { id } => Some(id),
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::Guest => write!(f, "guest"),
            Subject::Person { id } => write!(f, "person/{id}"),
        }
    }
}

/// Reference to a resource: "Type/id" e.g. "Project/1"
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceKey {
    pub resource_type: String,
    pub resource_id: String,
}

impl ResourceKey {
    pub fn new(resource_type: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let (t, id) = s.split_once('/')?;
        if t.is_empty() || id.is_empty() {
            return None;
        }
        Some(Self::new(t, id))
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.resource_type, self.resource_id)
    }
}

/// A persisted role definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Role {
    pub id: i32,
    /// Always lower-cased.
    pub key: String,
    pub name: String,
    pub description: Option<String>,
    pub requires_resource: bool,
    pub authorize_resource: bool,
}

impl Role {
    /// Prepares a key for storage or lookup.
    pub fn normalize_key(key: &str) -> String {
        key.to_lowercase()
    }

    /// Checks that a grant of this role on `resource` is allowed by the role's flags.
    pub fn check_resource(&self, resource: Option<&ResourceKey>) -> Result<(), StoreError> {
        match resource {
            None if self.requires_resource => Err(StoreError::InvalidGrant(format!(
                "role `{}` requires a resource",
                self.key
            ))),
            Some(r) if !self.authorize_resource => Err(StoreError::InvalidGrant(format!(
                "specific resources may not be granted for role `{}` (got {r})",
                self.key
            ))),
            _ => Ok(()),
        }
    }
}

/// Input for creating a role. Both resource flags default to `true`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRole {
    pub key: String,
    pub name: String,
    pub description: Option<String>,
    pub requires_resource: bool,
    pub authorize_resource: bool,
}

impl NewRole {
    pub fn new(key: &str, name: impl Into<String>) -> Self {
        Self {
            key: Role::normalize_key(key),
            name: name.into(),
            description: None,
            requires_resource: true,
            authorize_resource: true,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Grants may name a resource but do not have to.
    pub fn optional_resource(mut self) -> Self {
        self.requires_resource = false;
        self.authorize_resource = true;
        self
    }

    /// Grants never name a resource.
    pub fn without_resource(mut self) -> Self {
        self.requires_resource = false;
        self.authorize_resource = false;
        self
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        if self.key.trim().is_empty() {
            return Err(StoreError::InvalidRole("key can't be blank".into()));
        }
        if self.name.trim().is_empty() {
            return Err(StoreError::InvalidRole(format!(
                "name can't be blank for role `{}`",
                self.key
            )));
        }
        if self.requires_resource && !self.authorize_resource {
            return Err(StoreError::InvalidRole(format!(
                "role `{}`: requires_resource cannot be true if authorize_resource is false",
                self.key
            )));
        }
        Ok(())
    }
}

/// A persisted subject/role/resource assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub id: i32,
    pub subject_id: String,
    pub role_id: i32,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Grant {
    pub fn resource(&self) -> Option<ResourceKey> {
        match (&self.resource_type, &self.resource_id) {
            (Some(t), Some(id)) => Some(ResourceKey::new(t.clone(), id.clone())),
            _ => None,
        }
    }
}

/// Input for creating a grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewGrant {
    pub subject_id: String,
    pub role: Role,
    pub resource: Option<ResourceKey>,
}

impl NewGrant {
    /// Fails for guests and for resources the role's flags do not allow.
    pub fn new(
        subject: &Subject,
        role: Role,
        resource: Option<ResourceKey>,
    ) -> Result<Self, StoreError> {
        let subject_id = subject
            .id()
            .ok_or_else(|| StoreError::InvalidGrant("guests cannot hold grants".into()))?;
        role.check_resource(resource.as_ref())?;
        Ok(Self {
            subject_id: subject_id.to_string(),
            role,
            resource,
        })
    }
}

/// A role given either as a resolved [`Role`] or as a key to look up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleRef {
    Role(Role),
    Key(String),
}

impl fmt::Display for RoleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoleRef::Role(role) => write!(f, "{}", role.key),
            RoleRef::Key(key) => write!(f, "{key}"),
        }
    }
}

impl From<&str> for RoleRef {
    fn from(key: &str) -> Self {
        RoleRef::Key(key.to_string())
    }
}

impl From<String> for RoleRef {
    fn from(key: String) -> Self {
        RoleRef::Key(key)
    }
}

impl From<Role> for RoleRef {
    fn from(role: Role) -> Self {
        RoleRef::Role(role)
    }
}

impl From<&Role> for RoleRef {
    fn from(role: &Role) -> Self {
        RoleRef::Role(role.clone())
    }
}

/// One or more role references.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleRefs(pub Vec<RoleRef>);

impl RoleRefs {
    pub fn iter(&self) -> std::slice::Iter<'_, RoleRef> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for RoleRefs {
    fn from(key: &str) -> Self {
        RoleRefs(vec![key.into()])
    }
}

impl From<String> for RoleRefs {
    fn from(key: String) -> Self {
        RoleRefs(vec![key.into()])
    }
}

impl From<Role> for RoleRefs {
    fn from(role: Role) -> Self {
        RoleRefs(vec![role.into()])
    }
}

impl From<&Role> for RoleRefs {
    fn from(role: &Role) -> Self {
        RoleRefs(vec![role.into()])
    }
}

impl<T: Into<RoleRef>> From<Vec<T>> for RoleRefs {
    fn from(refs: Vec<T>) -> Self {
        RoleRefs(refs.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<RoleRef>, const N: usize> From<[T; N]> for RoleRefs {
    fn from(refs: [T; N]) -> Self {
        RoleRefs(refs.into_iter().map(Into::into).collect())
    }
}

/// Resource selector for grant queries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceMatch {
    /// Any resource, including none.
    Any,
    /// Grants without a resource.
    Nil,
    Exact(ResourceKey),
}

impl From<ResourceKey> for ResourceMatch {
    fn from(key: ResourceKey) -> Self {
        ResourceMatch::Exact(key)
    }
}

impl From<&ResourceKey> for ResourceMatch {
    fn from(key: &ResourceKey) -> Self {
        ResourceMatch::Exact(key.clone())
    }
}

impl From<Option<ResourceKey>> for ResourceMatch {
    fn from(key: Option<ResourceKey>) -> Self {
        key.map_or(ResourceMatch::Nil, ResourceMatch::Exact)
    }
}

impl From<Option<&ResourceKey>> for ResourceMatch {
    fn from(key: Option<&ResourceKey>) -> Self {
        key.cloned().into()
    }
}

/// Plain names given to rule builders: roles and actions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Names(pub Vec<String>);

impl Names {
    /// Drops blanks and repeats, keeping first-seen order.
    pub(crate) fn compact(self) -> Vec<String> {
        let mut out: Vec<String> = Vec::with_capacity(self.0.len());
        for name in self.0 {
            if !name.is_empty() && !out.contains(&name) {
                out.push(name);
            }
        }
        out
    }
}

impl From<&str> for Names {
    fn from(name: &str) -> Self {
        Names(vec![name.to_string()])
    }
}

impl From<String> for Names {
    fn from(name: String) -> Self {
        Names(vec![name])
    }
}

impl<T: Into<String>> From<Vec<T>> for Names {
    fn from(names: Vec<T>) -> Self {
        Names(names.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<String>, const N: usize> From<[T; N]> for Names {
    fn from(names: [T; N]) -> Self {
        Names(names.into_iter().map(Into::into).collect())
    }
}

/// A rule target: the name of a context variable, or one of the `any`/nil selectors.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    Var(String),
    Any,
    Nil,
}

impl Target {
    pub fn var(name: impl Into<String>) -> Self {
        Target::Var(name.into())
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Var(name) => write!(f, "{name}"),
            Target::Any => write!(f, "any"),
            Target::Nil => write!(f, "nil"),
        }
    }
}

impl From<&str> for Target {
    fn from(name: &str) -> Self {
        Target::Var(name.to_string())
    }
}

impl From<String> for Target {
    fn from(name: String) -> Self {
        Target::Var(name)
    }
}

/// One or more targets given to `of`/`on`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Targets(pub Vec<Target>);

impl From<Target> for Targets {
    fn from(target: Target) -> Self {
        Targets(vec![target])
    }
}

impl From<&str> for Targets {
    fn from(name: &str) -> Self {
        Targets(vec![name.into()])
    }
}

impl From<String> for Targets {
    fn from(name: String) -> Self {
        Targets(vec![name.into()])
    }
}

impl<T: Into<Target>> From<Vec<T>> for Targets {
    fn from(targets: Vec<T>) -> Self {
        Targets(targets.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Target>, const N: usize> From<[T; N]> for Targets {
    fn from(targets: [T; N]) -> Self {
        Targets(targets.into_iter().map(Into::into).collect())
    }
}
