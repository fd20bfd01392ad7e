use permit::authz::{Authority, NewRole, ResourceRecord, Role, Subject};

/// Builder for creating test roles
pub struct RoleBuilder {
    role: NewRole,
}

impl RoleBuilder {
    pub fn new(key: &str) -> Self {
        Self {
            role: NewRole::new(key, key.to_uppercase()),
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.role = self.role.with_description(description);
        self
    }

    pub fn optional_resource(mut self) -> Self {
        self.role = self.role.optional_resource();
        self
    }

    pub fn without_resource(mut self) -> Self {
        self.role = self.role.without_resource();
        self
    }

    pub async fn create(self, authority: &Authority) -> Role {
        authority
            .create_role(self.role)
            .await
            .expect("Failed to create test role")
    }
}

/// A project resource whose `owner` attribute is `owner`.
pub fn project(id: &str, owner: Option<&Subject>) -> ResourceRecord {
    ResourceRecord::new("Project", id).with_attribute("owner", owner.cloned())
}
