use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Enable foreign keys for SQLite
        if manager.get_database_backend() == sea_orm::DatabaseBackend::Sqlite {
            manager
                .get_connection()
                .execute_unprepared("PRAGMA foreign_keys = ON")
                .await?;
        }

        manager
            .create_table(
                Table::create()
                    .table(Roles::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Roles::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Roles::Key).string().not_null())
                    .col(ColumnDef::new(Roles::Name).string().not_null())
                    .col(ColumnDef::new(Roles::Description).string())
                    .col(
                        ColumnDef::new(Roles::RequiresResource)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Roles::AuthorizeResource)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .to_owned(),
            )
            .await?;

        // Keys are stored lower-cased, so a plain unique index is case-insensitive
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_roles_key")
                    .table(Roles::Table)
                    .col(Roles::Key)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Authorizations::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Authorizations::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Authorizations::SubjectId).string().not_null())
                    .col(ColumnDef::new(Authorizations::RoleId).integer().not_null())
                    .col(ColumnDef::new(Authorizations::ResourceType).string())
                    .col(ColumnDef::new(Authorizations::ResourceId).string())
                    .col(
                        ColumnDef::new(Authorizations::CreatedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Authorizations::UpdatedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_authorizations_role")
                            .from(Authorizations::Table, Authorizations::RoleId)
                            .to(Roles::Table, Roles::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_authorizations_subject")
                    .table(Authorizations::Table)
                    .col(Authorizations::SubjectId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_authorizations_role")
                    .table(Authorizations::Table)
                    .col(Authorizations::RoleId)
                    .to_owned(),
            )
            .await?;

        // NULL resources compare distinct here; the store checks those before inserting
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_authorizations_uniq")
                    .table(Authorizations::Table)
                    .col(Authorizations::SubjectId)
                    .col(Authorizations::RoleId)
                    .col(Authorizations::ResourceType)
                    .col(Authorizations::ResourceId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Authorizations::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Roles::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Roles {
    Table,
    Id,
    Key,
    Name,
    Description,
    RequiresResource,
    AuthorizeResource,
}

#[derive(DeriveIden)]
enum Authorizations {
    Table,
    Id,
    SubjectId,
    RoleId,
    ResourceType,
    ResourceId,
    CreatedAt,
    UpdatedAt,
}
