use sea_orm_migration::prelude::*;

use crate::m20261001_000002_create_requests::Requests;

/// Durable queue of scheduled `pending -> activated` transitions.
#[derive(DeriveIden)]
enum ActivationJobs {
    Table,
    Id,
    RequestId,
    DueAt,
    Attempts,
    ClaimedAt,
    CompletedAt,
    LastError,
    CreatedAt,
}

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ActivationJobs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ActivationJobs::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ActivationJobs::RequestId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ActivationJobs::DueAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ActivationJobs::Attempts)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(ActivationJobs::ClaimedAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(ActivationJobs::CompletedAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(ActivationJobs::LastError).text())
                    .col(
                        ColumnDef::new(ActivationJobs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_activation_jobs_request")
                            .from(ActivationJobs::Table, ActivationJobs::RequestId)
                            .to(Requests::Table, Requests::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::NoAction),
                    )
                    .to_owned(),
            )
            .await?;

        // 轮询条件: completed_at IS NULL AND due_at <= now
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_activation_jobs_due")
                    .table(ActivationJobs::Table)
                    .col(ActivationJobs::CompletedAt)
                    .col(ActivationJobs::DueAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(
                Table::drop()
                    .if_exists()
                    .table(ActivationJobs::Table)
                    .to_owned(),
            )
            .await
    }
}
