use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use crate::authz::condition::Predicate;
use crate::authz::store::{GrantStore, RoleLookup};
use crate::authz::types::{Grant, NewGrant, NewRole, Role};
use crate::errors::StoreError;

#[derive(Debug, Default)]
struct Inner {
    roles: Vec<Role>,
    grants: Vec<Grant>,
    next_role_id: i32,
    next_grant_id: i32,
}

impl Inner {
    fn holds(&self, grant: &NewGrant) -> bool {
        let (resource_type, resource_id) = match &grant.resource {
            Some(key) => (Some(key.resource_type.as_str()), Some(key.resource_id.as_str())),
            None => (None, None),
        };
        self.grants.iter().any(|g| {
            g.subject_id == grant.subject_id
                && g.role_id == grant.role.id
                && g.resource_type.as_deref() == resource_type
                && g.resource_id.as_deref() == resource_id
        })
    }
}

/// In-process role and grant store.
///
/// Each call takes the lock once, so multi-grant writes are atomic with
/// respect to other callers.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoleLookup for MemoryStore {
    async fn find_by_key(&self, key: &str) -> Result<Option<Role>, StoreError> {
        Ok(self.inner.read().roles.iter().find(|r| r.key == key).cloned())
    }

    async fn find_by_id(&self, id: i32) -> Result<Option<Role>, StoreError> {
        Ok(self.inner.read().roles.iter().find(|r| r.id == id).cloned())
    }

    async fn create_role(&self, role: NewRole) -> Result<Role, StoreError> {
        role.validate()?;
        let mut inner = self.inner.write();
        let key = Role::normalize_key(&role.key);
        if inner.roles.iter().any(|r| r.key == key) {
            return Err(StoreError::Duplicate(format!("role `{key}`")));
        }
        inner.next_role_id += 1;
        let created = Role {
            id: inner.next_role_id,
            key,
            name: role.name,
            description: role.description,
            requires_resource: role.requires_resource,
            authorize_resource: role.authorize_resource,
        };
        inner.roles.push(created.clone());
        Ok(created)
    }

    async fn roles(&self) -> Result<Vec<Role>, StoreError> {
        Ok(self.inner.read().roles.clone())
    }
}

#[async_trait]
impl GrantStore for MemoryStore {
    async fn exists(&self, predicate: &Predicate) -> Result<bool, StoreError> {
        Ok(self.inner.read().grants.iter().any(|g| predicate.matches(g)))
    }

    async fn find(&self, predicate: &Predicate) -> Result<Vec<Grant>, StoreError> {
        Ok(self
            .inner
            .read()
            .grants
            .iter()
            .filter(|g| predicate.matches(g))
            .cloned()
            .collect())
    }

    async fn create_all(&self, grants: Vec<NewGrant>) -> Result<Vec<Grant>, StoreError> {
        let mut inner = self.inner.write();

        // validate everything before touching state
        let mut fresh: Vec<NewGrant> = Vec::with_capacity(grants.len());
        for grant in grants {
            if !inner.roles.iter().any(|r| r.id == grant.role.id) {
                return Err(StoreError::UnknownRole(grant.role.key.clone()));
            }
            grant.role.check_resource(grant.resource.as_ref())?;
            if !inner.holds(&grant) && !fresh.contains(&grant) {
                fresh.push(grant);
            }
        }

        let now = Utc::now().timestamp();
        let mut created = Vec::with_capacity(fresh.len());
        for grant in fresh {
            inner.next_grant_id += 1;
            let (resource_type, resource_id) = match grant.resource {
                Some(key) => (Some(key.resource_type), Some(key.resource_id)),
                None => (None, None),
            };
            let row = Grant {
                id: inner.next_grant_id,
                subject_id: grant.subject_id,
                role_id: grant.role.id,
                resource_type,
                resource_id,
                created_at: now,
                updated_at: now,
            };
            inner.grants.push(row.clone());
            created.push(row);
        }
        Ok(created)
    }

    async fn delete_all(&self, predicate: &Predicate) -> Result<u64, StoreError> {
        Ok(self.remove_all(predicate).await?.len() as u64)
    }

    async fn remove_all(&self, predicate: &Predicate) -> Result<Vec<Grant>, StoreError> {
        let mut inner = self.inner.write();
        let (removed, kept): (Vec<Grant>, Vec<Grant>) = std::mem::take(&mut inner.grants)
            .into_iter()
            .partition(|g| predicate.matches(g));
        inner.grants = kept;
        Ok(removed)
    }
}
