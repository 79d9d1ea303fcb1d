//! Initial schema: every table the sync and labeling engine owns.
//!
//! - `connections`: links to financial institutions
//! - `accounts`: provider accounts of a connection
//! - `sync_states`: resumable cursor and status per account
//! - `transactions`: provider transactions, soft-deleted via `removed_at`
//! - `budgets`: user budgets and their labeling status
//! - `transaction_budgets`: budget association set
//! - `categorization_rules`: per-user classifier rules

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

// ─────────────────────────────────────────────────────────────────────────────
// Table identifiers
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Iden)]
enum Connections {
    Table,
    Id,
    UserId,
    InstitutionName,
    Environment,
    CredentialHandle,
    Status,
    LastError,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum Accounts {
    Table,
    Id,
    UserId,
    ConnectionId,
    ExternalId,
    Name,
    AccountType,
    Subtype,
    CurrentBalance,
    AvailableBalance,
    LastSyncedAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum SyncStates {
    Table,
    AccountId,
    Cursor,
    Status,
    TotalSynced,
    LastError,
    LastAttemptedAt,
    LastSyncedAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum Transactions {
    Table,
    Id,
    UserId,
    ConnectionId,
    AccountId,
    Date,
    Name,
    MerchantName,
    Amount,
    ProviderCategory,
    Pending,
    Category,
    CategorizedAt,
    AccountName,
    InstitutionName,
    RemovedAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum Budgets {
    Table,
    Id,
    UserId,
    Name,
    Description,
    FilterRevision,
    Amount,
    Period,
    RollingDays,
    AnchorDate,
    Archived,
    ProcessingStatus,
    LastError,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum TransactionBudgets {
    Table,
    TransactionId,
    BudgetId,
}

#[derive(Iden)]
enum CategorizationRules {
    Table,
    UserId,
    Rules,
    UpdatedAt,
}

// ─────────────────────────────────────────────────────────────────────────────
// Migration implementation
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // ───────────────────────────────────────────────────────────────────
        // 1. Connections
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(Connections::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Connections::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Connections::UserId).string().not_null())
                    .col(
                        ColumnDef::new(Connections::InstitutionName)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Connections::Environment).string().not_null())
                    .col(
                        ColumnDef::new(Connections::CredentialHandle)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Connections::Status).string().not_null())
                    .col(ColumnDef::new(Connections::LastError).string())
                    .col(
                        ColumnDef::new(Connections::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Connections::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-connections-user_id")
                    .table(Connections::Table)
                    .col(Connections::UserId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-connections-environment")
                    .table(Connections::Table)
                    .col(Connections::Environment)
                    .to_owned(),
            )
            .await?;

        // ───────────────────────────────────────────────────────────────────
        // 2. Accounts
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(Accounts::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Accounts::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Accounts::UserId).string().not_null())
                    .col(ColumnDef::new(Accounts::ConnectionId).uuid().not_null())
                    .col(ColumnDef::new(Accounts::ExternalId).string().not_null())
                    .col(ColumnDef::new(Accounts::Name).string().not_null())
                    .col(ColumnDef::new(Accounts::AccountType).string().not_null())
                    .col(ColumnDef::new(Accounts::Subtype).string())
                    .col(ColumnDef::new(Accounts::CurrentBalance).big_integer())
                    .col(ColumnDef::new(Accounts::AvailableBalance).big_integer())
                    .col(ColumnDef::new(Accounts::LastSyncedAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(Accounts::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Accounts::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-accounts-connection_id")
                            .from(Accounts::Table, Accounts::ConnectionId)
                            .to(Connections::Table, Connections::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-accounts-connection_id")
                    .table(Accounts::Table)
                    .col(Accounts::ConnectionId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-accounts-user_id-external_id")
                    .table(Accounts::Table)
                    .col(Accounts::UserId)
                    .col(Accounts::ExternalId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // ───────────────────────────────────────────────────────────────────
        // 3. Sync states
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(SyncStates::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SyncStates::AccountId)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(SyncStates::Cursor).string())
                    .col(ColumnDef::new(SyncStates::Status).string().not_null())
                    .col(
                        ColumnDef::new(SyncStates::TotalSynced)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(SyncStates::LastError).string())
                    .col(ColumnDef::new(SyncStates::LastAttemptedAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(SyncStates::LastSyncedAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(SyncStates::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SyncStates::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-sync_states-account_id")
                            .from(SyncStates::Table, SyncStates::AccountId)
                            .to(Accounts::Table, Accounts::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // ───────────────────────────────────────────────────────────────────
        // 4. Transactions
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(Transactions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Transactions::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Transactions::UserId).string().not_null())
                    .col(ColumnDef::new(Transactions::ConnectionId).uuid().not_null())
                    .col(ColumnDef::new(Transactions::AccountId).uuid().not_null())
                    .col(ColumnDef::new(Transactions::Date).date().not_null())
                    .col(ColumnDef::new(Transactions::Name).string().not_null())
                    .col(ColumnDef::new(Transactions::MerchantName).string())
                    .col(ColumnDef::new(Transactions::Amount).big_integer().not_null())
                    .col(ColumnDef::new(Transactions::ProviderCategory).string())
                    .col(
                        ColumnDef::new(Transactions::Pending)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Transactions::Category).string())
                    .col(ColumnDef::new(Transactions::CategorizedAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(Transactions::AccountName).string())
                    .col(ColumnDef::new(Transactions::InstitutionName).string())
                    .col(ColumnDef::new(Transactions::RemovedAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(Transactions::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Transactions::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-transactions-account_id")
                            .from(Transactions::Table, Transactions::AccountId)
                            .to(Accounts::Table, Accounts::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-transactions-account_id")
                    .table(Transactions::Table)
                    .col(Transactions::AccountId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-transactions-connection_id")
                    .table(Transactions::Table)
                    .col(Transactions::ConnectionId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-transactions-user_id-date")
                    .table(Transactions::Table)
                    .col(Transactions::UserId)
                    .col(Transactions::Date)
                    .to_owned(),
            )
            .await?;

        // ───────────────────────────────────────────────────────────────────
        // 5. Budgets
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(Budgets::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Budgets::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Budgets::UserId).string().not_null())
                    .col(ColumnDef::new(Budgets::Name).string().not_null())
                    .col(ColumnDef::new(Budgets::Description).string().not_null())
                    .col(
                        ColumnDef::new(Budgets::FilterRevision)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(Budgets::Amount).big_integer().not_null())
                    .col(ColumnDef::new(Budgets::Period).string().not_null())
                    .col(ColumnDef::new(Budgets::RollingDays).integer())
                    .col(ColumnDef::new(Budgets::AnchorDate).date())
                    .col(
                        ColumnDef::new(Budgets::Archived)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Budgets::ProcessingStatus)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Budgets::LastError).string())
                    .col(
                        ColumnDef::new(Budgets::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Budgets::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-budgets-user_id")
                    .table(Budgets::Table)
                    .col(Budgets::UserId)
                    .to_owned(),
            )
            .await?;

        // ───────────────────────────────────────────────────────────────────
        // 6. Budget association set
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(TransactionBudgets::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(TransactionBudgets::TransactionId)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(TransactionBudgets::BudgetId).uuid().not_null())
                    .primary_key(
                        Index::create()
                            .col(TransactionBudgets::TransactionId)
                            .col(TransactionBudgets::BudgetId),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-transaction_budgets-transaction_id")
                            .from(TransactionBudgets::Table, TransactionBudgets::TransactionId)
                            .to(Transactions::Table, Transactions::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-transaction_budgets-budget_id")
                            .from(TransactionBudgets::Table, TransactionBudgets::BudgetId)
                            .to(Budgets::Table, Budgets::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-transaction_budgets-budget_id")
                    .table(TransactionBudgets::Table)
                    .col(TransactionBudgets::BudgetId)
                    .to_owned(),
            )
            .await?;

        // ───────────────────────────────────────────────────────────────────
        // 7. Categorization rules
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(CategorizationRules::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CategorizationRules::UserId)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(CategorizationRules::Rules).string().not_null())
                    .col(
                        ColumnDef::new(CategorizationRules::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Reverse order of creation.
        manager
            .drop_table(Table::drop().table(CategorizationRules::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(TransactionBudgets::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Budgets::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Transactions::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(SyncStates::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Accounts::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Connections::Table).to_owned())
            .await?;
        Ok(())
    }
}
