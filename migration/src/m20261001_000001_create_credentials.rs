use sea_orm_migration::prelude::*;

/// Leasable phone + access code pairs.
#[derive(DeriveIden)]
pub(crate) enum Credentials {
    Table,
    Id,
    Phone,
    AccessCode,
    IsUsed,
    UsedAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Credentials::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Credentials::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Credentials::Phone).string_len(32).not_null())
                    .col(
                        ColumnDef::new(Credentials::AccessCode)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Credentials::IsUsed)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Credentials::UsedAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(Credentials::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Credentials::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // 同一手机号可以有多个访问码，但 (phone, access_code) 必须唯一
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_credentials_phone_code_unique")
                    .table(Credentials::Table)
                    .col(Credentials::Phone)
                    .col(Credentials::AccessCode)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().if_exists().table(Credentials::Table).to_owned())
            .await
    }
}
