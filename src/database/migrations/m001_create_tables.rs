use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(MigrationProjects::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(MigrationProjects::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(MigrationProjects::Name).text().not_null())
                    .col(
                        ColumnDef::new(MigrationProjects::SourceConnectionId)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MigrationProjects::DestinationConnectionId)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MigrationProjects::Status)
                            .text()
                            .not_null()
                            .default("scheduled"),
                    )
                    .col(
                        ColumnDef::new(MigrationProjects::Strategy)
                            .text()
                            .not_null()
                            .default("full"),
                    )
                    .col(ColumnDef::new(MigrationProjects::Schedule).text())
                    .col(
                        ColumnDef::new(MigrationProjects::TotalRecords)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(MigrationProjects::MigratedRecords)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(MigrationProjects::FailedRecords)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(MigrationProjects::Error).text())
                    .col(
                        ColumnDef::new(MigrationProjects::CreatedAt)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MigrationProjects::UpdatedAt)
                            .text()
                            .not_null(),
                    )
                    .col(ColumnDef::new(MigrationProjects::StartedAt).text())
                    .col(ColumnDef::new(MigrationProjects::CompletedAt).text())
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(ObjectTypes::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ObjectTypes::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ObjectTypes::ProjectId).integer().not_null())
                    .col(ColumnDef::new(ObjectTypes::Name).text().not_null())
                    .col(
                        ColumnDef::new(ObjectTypes::Status)
                            .text()
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(ObjectTypes::TotalRecords)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ObjectTypes::ProcessedRecords)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ObjectTypes::FailedRecords)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(ObjectTypes::Cursor).text())
                    .col(ColumnDef::new(ObjectTypes::UpdatedAt).text().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_object_types_project_id")
                            .from(ObjectTypes::Table, ObjectTypes::ProjectId)
                            .to(MigrationProjects::Table, MigrationProjects::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(FieldMappings::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(FieldMappings::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(FieldMappings::ObjectTypeId)
                            .integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(FieldMappings::SourceField).text().not_null())
                    .col(
                        ColumnDef::new(FieldMappings::DestinationField)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(FieldMappings::Required)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(FieldMappings::Transform).text())
                    .col(ColumnDef::new(FieldMappings::Confidence).float())
                    .col(ColumnDef::new(FieldMappings::CreatedAt).text().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_field_mappings_object_type_id")
                            .from(FieldMappings::Table, FieldMappings::ObjectTypeId)
                            .to(ObjectTypes::Table, ObjectTypes::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(MigrationErrors::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(MigrationErrors::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(MigrationErrors::ProjectId)
                            .integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(MigrationErrors::ObjectTypeId).integer())
                    .col(
                        ColumnDef::new(MigrationErrors::Kind)
                            .text()
                            .not_null()
                            .default("unknown"),
                    )
                    .col(
                        ColumnDef::new(MigrationErrors::Severity)
                            .text()
                            .not_null()
                            .default("medium"),
                    )
                    .col(ColumnDef::new(MigrationErrors::Message).text().not_null())
                    .col(ColumnDef::new(MigrationErrors::RecordId).text())
                    .col(ColumnDef::new(MigrationErrors::RecordData).text())
                    .col(ColumnDef::new(MigrationErrors::BatchCursor).text())
                    .col(
                        ColumnDef::new(MigrationErrors::Retryable)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(MigrationErrors::Attempts)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(MigrationErrors::MaxAttempts)
                            .integer()
                            .not_null()
                            .default(3),
                    )
                    .col(ColumnDef::new(MigrationErrors::Remediation).text())
                    .col(
                        ColumnDef::new(MigrationErrors::Resolved)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(MigrationErrors::CreatedAt)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MigrationErrors::UpdatedAt)
                            .text()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_migration_errors_project_id")
                            .from(MigrationErrors::Table, MigrationErrors::ProjectId)
                            .to(MigrationProjects::Table, MigrationProjects::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_object_types_project_id")
                    .table(ObjectTypes::Table)
                    .col(ObjectTypes::ProjectId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_field_mappings_object_type_id")
                    .table(FieldMappings::Table)
                    .col(FieldMappings::ObjectTypeId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_migration_errors_project_id")
                    .table(MigrationErrors::Table)
                    .col(MigrationErrors::ProjectId)
                    .col(MigrationErrors::Resolved)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(MigrationErrors::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(FieldMappings::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ObjectTypes::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(MigrationProjects::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(Iden)]
enum MigrationProjects {
    Table,
    Id,
    Name,
    SourceConnectionId,
    DestinationConnectionId,
    Status,
    Strategy,
    Schedule,
    TotalRecords,
    MigratedRecords,
    FailedRecords,
    Error,
    CreatedAt,
    UpdatedAt,
    StartedAt,
    CompletedAt,
}

#[derive(Iden)]
enum ObjectTypes {
    Table,
    Id,
    ProjectId,
    Name,
    Status,
    TotalRecords,
    ProcessedRecords,
    FailedRecords,
    Cursor,
    UpdatedAt,
}

#[derive(Iden)]
enum FieldMappings {
    Table,
    Id,
    ObjectTypeId,
    SourceField,
    DestinationField,
    Required,
    Transform,
    Confidence,
    CreatedAt,
}

#[derive(Iden)]
enum MigrationErrors {
    Table,
    Id,
    ProjectId,
    ObjectTypeId,
    Kind,
    Severity,
    Message,
    RecordId,
    RecordData,
    BatchCursor,
    Retryable,
    Attempts,
    MaxAttempts,
    Remediation,
    Resolved,
    CreatedAt,
    UpdatedAt,
}
