use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, Database, DatabaseConnection,
    EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use tokio::sync::Mutex;

use crate::authz::condition::{resource_condition, Field, Literal, Predicate};
use crate::authz::store::{GrantStore, RoleLookup};
use crate::authz::types::{Grant, NewGrant, NewRole, Role};
use crate::entities;
use crate::errors::StoreError;
use crate::settings::Database as DbCfg;

pub async fn init(cfg: &DbCfg) -> Result<DatabaseConnection, StoreError> {
    let db = Database::connect(&cfg.url).await?;
    Ok(db)
}

impl From<entities::role::Model> for Role {
    fn from(m: entities::role::Model) -> Self {
        Self {
            id: m.id,
            key: m.key,
            name: m.name,
            description: m.description,
            requires_resource: m.requires_resource,
            authorize_resource: m.authorize_resource,
        }
    }
}

impl From<entities::authorization::Model> for Grant {
    fn from(m: entities::authorization::Model) -> Self {
        Self {
            id: m.id,
            subject_id: m.subject_id,
            role_id: m.role_id,
            resource_type: m.resource_type,
            resource_id: m.resource_id,
            created_at: m.created_at,
            updated_at: m.updated_at,
        }
    }
}

fn column(field: Field) -> entities::authorization::Column {
    use entities::authorization::Column;
    match field {
        Field::SubjectId => Column::SubjectId,
        Field::RoleId => Column::RoleId,
        Field::ResourceType => Column::ResourceType,
        Field::ResourceId => Column::ResourceId,
    }
}

fn value(literal: &Literal) -> sea_orm::Value {
    match literal {
        Literal::Int(n) => (*n).into(),
        Literal::Str(s) => s.clone().into(),
    }
}

/// Translate a grant predicate into a SeaORM condition on `authorizations`.
pub fn compile(predicate: &Predicate) -> Condition {
    match predicate {
        Predicate::And(parts) => parts
            .iter()
            .fold(Condition::all(), |cond, p| cond.add(compile(p))),
        Predicate::Or(parts) => parts
            .iter()
            .fold(Condition::any(), |cond, p| cond.add(compile(p))),
        Predicate::Eq(field, literal) => Condition::all().add(column(*field).eq(value(literal))),
        Predicate::In(field, literals) => {
            Condition::all().add(column(*field).is_in(literals.iter().map(value)))
        }
        Predicate::IsNull(field) => Condition::all().add(column(*field).is_null()),
    }
}

/// Role and grant store over a SeaORM connection.
///
/// Multi-grant writes run in one transaction; an error drops the
/// transaction and rolls everything back. Grant inserts from one store
/// (and its clones) are serialized so the held-grant check and the insert
/// see the same rows.
#[derive(Debug, Clone)]
pub struct SeaOrmStore {
    db: DatabaseConnection,
    grant_writes: Arc<Mutex<()>>,
}

impl SeaOrmStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            db,
            grant_writes: Arc::new(Mutex::new(())),
        }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }
}

async fn find_grants<C: ConnectionTrait>(
    conn: &C,
    predicate: &Predicate,
) -> Result<Vec<Grant>, StoreError> {
    use entities::authorization::{Column, Entity};

    if predicate.is_unsatisfiable() {
        return Ok(Vec::new());
    }
    let models = Entity::find()
        .filter(compile(predicate))
        .order_by_asc(Column::Id)
        .all(conn)
        .await?;
    Ok(models.into_iter().map(Grant::from).collect())
}

#[async_trait]
impl RoleLookup for SeaOrmStore {
    async fn find_by_key(&self, key: &str) -> Result<Option<Role>, StoreError> {
        use entities::role::{Column, Entity};

        let model = Entity::find()
            .filter(Column::Key.eq(key))
            .one(&self.db)
            .await?;
        Ok(model.map(Role::from))
    }

    async fn find_by_id(&self, id: i32) -> Result<Option<Role>, StoreError> {
        let model = entities::role::Entity::find_by_id(id).one(&self.db).await?;
        Ok(model.map(Role::from))
    }

    async fn create_role(&self, role: NewRole) -> Result<Role, StoreError> {
        role.validate()?;
        let key = Role::normalize_key(&role.key);
        if self.find_by_key(&key).await?.is_some() {
            return Err(StoreError::Duplicate(format!("role `{key}`")));
        }

        let model = entities::role::ActiveModel {
            id: Default::default(),
            key: Set(key),
            name: Set(role.name),
            description: Set(role.description),
            requires_resource: Set(role.requires_resource),
            authorize_resource: Set(role.authorize_resource),
        }
        .insert(&self.db)
        .await?;
        Ok(model.into())
    }

    async fn roles(&self) -> Result<Vec<Role>, StoreError> {
        use entities::role::{Column, Entity};

        let models = Entity::find().order_by_asc(Column::Key).all(&self.db).await?;
        Ok(models.into_iter().map(Role::from).collect())
    }
}

#[async_trait]
impl GrantStore for SeaOrmStore {
    async fn exists(&self, predicate: &Predicate) -> Result<bool, StoreError> {
        if predicate.is_unsatisfiable() {
            return Ok(false);
        }
        let found = entities::authorization::Entity::find()
            .filter(compile(predicate))
            .one(&self.db)
            .await?;
        Ok(found.is_some())
    }

    async fn find(&self, predicate: &Predicate) -> Result<Vec<Grant>, StoreError> {
        find_grants(&self.db, predicate).await
    }

    async fn create_all(&self, grants: Vec<NewGrant>) -> Result<Vec<Grant>, StoreError> {
        let _writing = self.grant_writes.lock().await;
        let txn = self.db.begin().await?;
        let now = Utc::now().timestamp();
        let mut created: Vec<Grant> = Vec::with_capacity(grants.len());

        for grant in grants {
            if entities::role::Entity::find_by_id(grant.role.id)
                .one(&txn)
                .await?
                .is_none()
            {
                return Err(StoreError::UnknownRole(grant.role.key.clone()));
            }
            grant.role.check_resource(grant.resource.as_ref())?;

            // also covers NULL resources, which the unique index lets through
            let mut same = vec![
                Predicate::Eq(Field::SubjectId, Literal::Str(grant.subject_id.clone())),
                Predicate::Eq(Field::RoleId, Literal::Int(i64::from(grant.role.id))),
            ];
            same.extend(resource_condition(&[grant.resource.clone().into()]));
            if !find_grants(&txn, &Predicate::And(same)).await?.is_empty() {
                continue;
            }

            let (resource_type, resource_id) = match grant.resource {
                Some(key) => (Some(key.resource_type), Some(key.resource_id)),
                None => (None, None),
            };
            let model = entities::authorization::ActiveModel {
                id: Default::default(),
                subject_id: Set(grant.subject_id),
                role_id: Set(grant.role.id),
                resource_type: Set(resource_type),
                resource_id: Set(resource_id),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(&txn)
            .await?;
            created.push(Grant::from(model));
        }

        txn.commit().await?;
        Ok(created)
    }

    async fn delete_all(&self, predicate: &Predicate) -> Result<u64, StoreError> {
        if predicate.is_unsatisfiable() {
            return Ok(0);
        }
        let txn = self.db.begin().await?;
        let res = entities::authorization::Entity::delete_many()
            .filter(compile(predicate))
            .exec(&txn)
            .await?;
        txn.commit().await?;
        Ok(res.rows_affected)
    }

    async fn remove_all(&self, predicate: &Predicate) -> Result<Vec<Grant>, StoreError> {
        use entities::authorization::{Column, Entity};

        let txn = self.db.begin().await?;
        let removed = find_grants(&txn, predicate).await?;
        if !removed.is_empty() {
            Entity::delete_many()
                .filter(Column::Id.is_in(removed.iter().map(|g| g.id)))
                .exec(&txn)
                .await?;
        }
        txn.commit().await?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::condition::authorization_conditions;
    use crate::authz::types::{ResourceKey, ResourceMatch, Subject};
    use sea_orm::{DbBackend, QueryTrait};

    fn role(id: i32) -> Role {
        Role {
            id,
            key: "admin".into(),
            name: "Admin".into(),
            description: None,
            requires_resource: true,
            authorize_resource: true,
        }
    }

    fn sql(predicate: &Predicate) -> String {
        entities::authorization::Entity::find()
            .filter(compile(predicate))
            .build(DbBackend::Sqlite)
            .to_string()
    }

    #[test]
    fn test_compile_exact_resource() {
        let p = authorization_conditions(
            Some(&[role(3)]),
            &[ResourceKey::new("Project", "1").into()],
            Some(&Subject::person("bob")),
        );
        let q = sql(&p);
        assert!(q.contains(r#""authorizations"."subject_id" = 'bob'"#), "{q}");
        assert!(q.contains(r#""authorizations"."role_id" IN (3)"#), "{q}");
        assert!(q.contains(r#""authorizations"."resource_type" = 'Project'"#), "{q}");
        assert!(q.contains(r#""authorizations"."resource_id" = '1'"#), "{q}");
    }

    #[test]
    fn test_compile_nil_or_exact() {
        let p = authorization_conditions(
            None,
            &[ResourceMatch::Nil, ResourceKey::new("Team", "2").into()],
            None,
        );
        let q = sql(&p);
        let (_, filter) = q.split_once(" WHERE ").expect("where clause");
        assert!(filter.contains(" OR "), "{q}");
        assert!(filter.contains(r#""authorizations"."resource_type" IS NULL"#), "{q}");
        // no role constraint, only the selected column
        assert!(!filter.contains("role_id"), "{q}");
    }
}
