use permit::authz::Authority;
use permit::storage::SeaOrmStore;
use sea_orm::{Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use std::sync::Arc;
use tempfile::NamedTempFile;

/// Migrated SQLite database in a temp file, removed on drop
pub struct TestDb {
    connection: DatabaseConnection,
    _temp_file: NamedTempFile,
}

impl TestDb {
    pub async fn new() -> Self {
        let temp_file = NamedTempFile::new().expect("temp file");
        let db_url = format!(
            "sqlite://{}?mode=rwc",
            temp_file.path().to_str().expect("utf-8 temp path")
        );

        let connection = Database::connect(&db_url).await.expect("connect test db");
        migration::Migrator::up(&connection, None)
            .await
            .expect("apply migrations");

        Self {
            connection,
            _temp_file: temp_file,
        }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.connection
    }

    /// Role and grant stores over this database
    pub fn authority(&self) -> Authority {
        Authority::from_store(Arc::new(SeaOrmStore::new(self.connection.clone())))
    }
}
