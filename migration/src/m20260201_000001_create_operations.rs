//! Migration to create the operations table for relayed user operations
//!
//! One row per accepted submission, keyed by the issued op hash.

use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Operations::Table)
                    .if_not_exists()
                    .col(string(Operations::Id).primary_key())
                    // JSON snapshot of the operation as accepted
                    .col(text(Operations::UserOp))
                    .col(string(Operations::Status))
                    // JSON receipt, only for completed operations
                    .col(text_null(Operations::Receipt))
                    .col(string_null(Operations::TxHash))
                    .col(string_null(Operations::ErrorCode))
                    .col(text_null(Operations::ErrorMessage))
                    // Epoch seconds
                    .col(big_integer(Operations::CreatedAt))
                    .col(big_integer(Operations::UpdatedAt))
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Operations::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Operations {
    Table,
    Id,
    UserOp,
    Status,
    Receipt,
    TxHash,
    ErrorCode,
    ErrorMessage,
    CreatedAt,
    UpdatedAt,
}
