//! Persistence seams for roles and grants, and the subject-facing
//! authorization API built on top of them.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::authz::condition::{authorization_conditions, Predicate};
use crate::authz::types::{
    Grant, NewGrant, NewRole, ResourceKey, ResourceMatch, Role, RoleRef, RoleRefs, Subject,
};
use crate::errors::StoreError;

/// Role definitions by key or id.
#[async_trait]
pub trait RoleLookup: Send + Sync {
    /// `key` must already be normalized.
    async fn find_by_key(&self, key: &str) -> Result<Option<Role>, StoreError>;

    async fn find_by_id(&self, id: i32) -> Result<Option<Role>, StoreError>;

    /// Fails with [`StoreError::Duplicate`] if the key is taken.
    async fn create_role(&self, role: NewRole) -> Result<Role, StoreError>;

    async fn roles(&self) -> Result<Vec<Role>, StoreError>;
}

/// Grant storage queried through [`Predicate`]s.
#[async_trait]
pub trait GrantStore: Send + Sync {
    async fn exists(&self, predicate: &Predicate) -> Result<bool, StoreError>;

    async fn find(&self, predicate: &Predicate) -> Result<Vec<Grant>, StoreError>;

    /// Inserts every grant the subject does not already hold, or none of
    /// them if any grant is invalid. Held grants and repeats within
    /// `grants` are skipped inside the same write. Returns the inserted rows.
    async fn create_all(&self, grants: Vec<NewGrant>) -> Result<Vec<Grant>, StoreError>;

    /// Deletes matching grants and returns how many were removed.
    async fn delete_all(&self, predicate: &Predicate) -> Result<u64, StoreError>;

    /// Deletes matching grants and returns them.
    async fn remove_all(&self, predicate: &Predicate) -> Result<Vec<Grant>, StoreError>;

    async fn create(
        &self,
        subject: &Subject,
        role: &Role,
        resource: Option<&ResourceKey>,
    ) -> Result<Grant, StoreError> {
        let grant = NewGrant::new(subject, role.clone(), resource.cloned())?;
        self.create_all(vec![grant]).await?.pop().ok_or_else(|| {
            StoreError::Duplicate(format!("grant of `{}` to `{subject}`", role.key))
        })
    }
}

/// Filter for the association queries on [`Authority`].
///
/// Defaults to every grant: any subject, any role, any resource.
#[derive(Debug, Clone)]
pub struct GrantQuery {
    pub subject: Option<Subject>,
    pub roles: Option<RoleRefs>,
    pub resource: ResourceMatch,
}

impl Default for GrantQuery {
    fn default() -> Self {
        Self {
            subject: None,
            roles: None,
            resource: ResourceMatch::Any,
        }
    }
}

impl GrantQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subject(mut self, subject: &Subject) -> Self {
        self.subject = Some(subject.clone());
        self
    }

    pub fn roles(mut self, roles: impl Into<RoleRefs>) -> Self {
        self.roles = Some(roles.into());
        self
    }

    pub fn resource(mut self, resource: impl Into<ResourceMatch>) -> Self {
        self.resource = resource.into();
        self
    }
}

/// Role and grant stores bound together.
#[derive(Clone)]
pub struct Authority {
    roles: Arc<dyn RoleLookup>,
    grants: Arc<dyn GrantStore>,
}

impl fmt::Debug for Authority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authority").finish_non_exhaustive()
    }
}

impl Authority {
    pub fn new(roles: Arc<dyn RoleLookup>, grants: Arc<dyn GrantStore>) -> Self {
        Self { roles, grants }
    }

    /// Uses one store for both roles and grants.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: RoleLookup + GrantStore + 'static,
    {
        Self {
            roles: store.clone(),
            grants: store,
        }
    }

    pub fn grant_store(&self) -> &dyn GrantStore {
        self.grants.as_ref()
    }

    pub fn role_lookup(&self) -> &dyn RoleLookup {
        self.roles.as_ref()
    }

    /// Looks a role up by key, ignoring case.
    pub async fn find_role(&self, key: &str) -> Result<Option<Role>, StoreError> {
        self.roles.find_by_key(&Role::normalize_key(key)).await
    }

    pub async fn role(&self, role: &RoleRef) -> Result<Option<Role>, StoreError> {
        match role {
            RoleRef::Role(role) => Ok(Some(role.clone())),
            RoleRef::Key(key) => self.find_role(key).await,
        }
    }

    /// Resolves every reference, silently dropping unknown keys.
    pub async fn resolve_roles(&self, refs: &RoleRefs) -> Result<Vec<Role>, StoreError> {
        let mut roles = Vec::with_capacity(refs.0.len());
        for r in refs.iter() {
            if let Some(role) = self.role(r).await? {
                if !roles.contains(&role) {
                    roles.push(role);
                }
            }
        }
        Ok(roles)
    }

    pub async fn create_role(&self, role: NewRole) -> Result<Role, StoreError> {
        role.validate()?;
        let created = self.roles.create_role(role).await?;
        tracing::debug!(role = %created.key, id = created.id, "Created role");
        Ok(created)
    }

    pub async fn list_roles(&self) -> Result<Vec<Role>, StoreError> {
        self.roles.roles().await
    }

    /// True if `subject` holds any of `roles` on `resource`. Unknown roles
    /// are skipped; guests are never authorized.
    pub async fn authorized(
        &self,
        subject: &Subject,
        roles: impl Into<RoleRefs>,
        resource: impl Into<ResourceMatch>,
    ) -> Result<bool, StoreError> {
        if subject.is_guest() {
            return Ok(false);
        }
        let resource: [ResourceMatch; 1] = [resource.into()];
        let roles: RoleRefs = roles.into();
        for r in roles.iter() {
            let Some(role) = self.role(r).await? else {
                continue;
            };
            let predicate =
                authorization_conditions(Some(std::slice::from_ref(&role)), &resource, Some(subject));
            if self.grants.exists(&predicate).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// True if `subject` holds every one of `roles` on `resource`. Any
    /// unknown role makes the answer false.
    pub async fn authorized_all(
        &self,
        subject: &Subject,
        roles: impl Into<RoleRefs>,
        resource: impl Into<ResourceMatch>,
    ) -> Result<bool, StoreError> {
        if subject.is_guest() {
            return Ok(false);
        }
        let resource: [ResourceMatch; 1] = [resource.into()];
        let roles: RoleRefs = roles.into();
        for r in roles.iter() {
            let Some(role) = self.role(r).await? else {
                return Ok(false);
            };
            let predicate =
                authorization_conditions(Some(std::slice::from_ref(&role)), &resource, Some(subject));
            if !self.grants.exists(&predicate).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Single existence query over every role key and resource selector.
    /// Used by named-role rules.
    pub async fn authorized_any(
        &self,
        subject: &Subject,
        role_keys: &[String],
        resources: &[ResourceMatch],
    ) -> Result<bool, StoreError> {
        if subject.is_guest() {
            return Ok(false);
        }
        let refs = RoleRefs(role_keys.iter().cloned().map(RoleRef::Key).collect());
        let roles = self.resolve_roles(&refs).await?;
        if roles.is_empty() {
            return Ok(false);
        }
        let predicate = authorization_conditions(Some(&roles), resources, Some(subject));
        self.grants.exists(&predicate).await
    }

    /// Grants `roles` on `resource` and returns the grants that were new.
    /// Grants the subject already holds are skipped by the store inside its
    /// write, so overlapping calls stay idempotent. An unknown role or a
    /// resource the role's flags reject fails the whole call.
    pub async fn authorize(
        &self,
        subject: &Subject,
        roles: impl Into<RoleRefs>,
        resource: Option<&ResourceKey>,
    ) -> Result<Vec<Grant>, StoreError> {
        let roles: RoleRefs = roles.into();
        let mut pending: Vec<NewGrant> = Vec::new();
        for r in roles.iter() {
            let role = self
                .role(r)
                .await?
                .ok_or_else(|| StoreError::UnknownRole(r.to_string()))?;
            if pending.iter().any(|g| g.role.id == role.id) {
                continue;
            }
            pending.push(NewGrant::new(subject, role, resource.cloned())?);
        }

        if pending.is_empty() {
            return Ok(Vec::new());
        }
        let created = self.grants.create_all(pending).await?;
        tracing::debug!(
            subject = %subject,
            created = created.len(),
            "Authorized roles"
        );
        Ok(created)
    }

    /// Removes the subject's grants for `roles` on `resource` and returns
    /// them. `ResourceMatch::Any` removes them on every resource.
    pub async fn revoke(
        &self,
        subject: &Subject,
        roles: impl Into<RoleRefs>,
        resource: impl Into<ResourceMatch>,
    ) -> Result<Vec<Grant>, StoreError> {
        let predicate = self
            .revocation_predicate(subject, roles.into(), resource.into())
            .await?;
        let removed = self.grants.remove_all(&predicate).await?;
        tracing::debug!(subject = %subject, removed = removed.len(), "Revoked roles");
        Ok(removed)
    }

    /// Like [`Authority::revoke`] but only reports the count.
    pub async fn revoke_count(
        &self,
        subject: &Subject,
        roles: impl Into<RoleRefs>,
        resource: impl Into<ResourceMatch>,
    ) -> Result<u64, StoreError> {
        let predicate = self
            .revocation_predicate(subject, roles.into(), resource.into())
            .await?;
        let removed = self.grants.delete_all(&predicate).await?;
        tracing::debug!(subject = %subject, removed, "Revoked roles");
        Ok(removed)
    }

    async fn revocation_predicate(
        &self,
        subject: &Subject,
        roles: RoleRefs,
        resource: ResourceMatch,
    ) -> Result<Predicate, StoreError> {
        let roles = self.resolve_roles(&roles).await?;
        Ok(authorization_conditions(
            Some(&roles),
            &[resource],
            Some(subject),
        ))
    }

    pub async fn grants(&self, query: &GrantQuery) -> Result<Vec<Grant>, StoreError> {
        let roles = match &query.roles {
            Some(refs) => Some(self.resolve_roles(refs).await?),
            None => None,
        };
        let predicate = authorization_conditions(
            roles.as_deref(),
            std::slice::from_ref(&query.resource),
            query.subject.as_ref(),
        );
        self.grants.find(&predicate).await
    }

    /// Distinct subjects holding a matching grant.
    pub async fn subjects(&self, query: &GrantQuery) -> Result<Vec<Subject>, StoreError> {
        let mut out: Vec<Subject> = Vec::new();
        for grant in self.grants(query).await? {
            let subject = Subject::person(grant.subject_id);
            if !out.contains(&subject) {
                out.push(subject);
            }
        }
        Ok(out)
    }

    /// Distinct roles of the matching grants.
    pub async fn roles_of(&self, query: &GrantQuery) -> Result<Vec<Role>, StoreError> {
        let mut ids: Vec<i32> = Vec::new();
        for grant in self.grants(query).await? {
            if !ids.contains(&grant.role_id) {
                ids.push(grant.role_id);
            }
        }
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(role) = self.roles.find_by_id(id).await? {
                out.push(role);
            }
        }
        Ok(out)
    }

    /// Distinct resources of the matching grants. Grants without a resource
    /// contribute nothing.
    pub async fn resources(&self, query: &GrantQuery) -> Result<Vec<ResourceKey>, StoreError> {
        let mut out: Vec<ResourceKey> = Vec::new();
        for grant in self.grants(query).await? {
            if let Some(key) = grant.resource() {
                if !out.contains(&key) {
                    out.push(key);
                }
            }
        }
        Ok(out)
    }
}
