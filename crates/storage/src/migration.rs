use sea_orm::sea_query::{ColumnDef, ForeignKey, Index, IndexCreateStatement, Table, TableCreateStatement};
use sea_orm::{ConnectionTrait, DatabaseBackend, DatabaseConnection};

use crate::entity::{activations, countries, phone_numbers, services, sms_messages};
use crate::errors::db_error;
use sms_pool_domain::storage::StorageResult;

pub async fn run_migrations(db: &DatabaseConnection) -> StorageResult<()> {
    let backend = db.get_database_backend();

    let countries_table = Table::create()
        .table(countries::Entity)
        .col(
            ColumnDef::new(countries::Column::Id)
                .big_integer()
                .not_null()
                .auto_increment()
                .primary_key(),
        )
        .col(
            ColumnDef::new(countries::Column::Code)
                .string_len(16)
                .not_null()
                .unique_key(),
        )
        .col(ColumnDef::new(countries::Column::Name).string().not_null())
        .to_owned();
    create_table(db, backend, countries_table).await?;

    let services_table = Table::create()
        .table(services::Entity)
        .col(
            ColumnDef::new(services::Column::Id)
                .big_integer()
                .not_null()
                .auto_increment()
                .primary_key(),
        )
        .col(
            ColumnDef::new(services::Column::Code)
                .string_len(16)
                .not_null()
                .unique_key(),
        )
        .col(ColumnDef::new(services::Column::Name).string().not_null())
        .to_owned();
    create_table(db, backend, services_table).await?;

    let numbers_table = Table::create()
        .table(phone_numbers::Entity)
        .col(
            ColumnDef::new(phone_numbers::Column::Id)
                .big_integer()
                .not_null()
                .auto_increment()
                .primary_key(),
        )
        .col(
            ColumnDef::new(phone_numbers::Column::Number)
                .big_integer()
                .not_null()
                .unique_key(),
        )
        .col(
            ColumnDef::new(phone_numbers::Column::CountryId)
                .big_integer()
                .not_null(),
        )
        .col(
            ColumnDef::new(phone_numbers::Column::Operator)
                .string_len(64)
                .not_null(),
        )
        .col(
            ColumnDef::new(phone_numbers::Column::Available)
                .boolean()
                .not_null()
                .default(true),
        )
        .foreign_key(
            ForeignKey::create()
                .from(phone_numbers::Entity, phone_numbers::Column::CountryId)
                .to(countries::Entity, countries::Column::Id),
        )
        .to_owned();
    create_table(db, backend, numbers_table).await?;

    let activations_table = Table::create()
        .table(activations::Entity)
        .col(
            ColumnDef::new(activations::Column::Id)
                .big_integer()
                .not_null()
                .auto_increment()
                .primary_key(),
        )
        .col(
            ColumnDef::new(activations::Column::NumberId)
                .big_integer()
                .not_null(),
        )
        .col(
            ColumnDef::new(activations::Column::ServiceId)
                .big_integer()
                .not_null(),
        )
        .col(
            ColumnDef::new(activations::Column::Status)
                .integer()
                .not_null()
                .default(0),
        )
        .col(ColumnDef::new(activations::Column::Sum).double().not_null())
        .col(
            ColumnDef::new(activations::Column::CreatedAt)
                .timestamp_with_time_zone()
                .not_null(),
        )
        .col(
            ColumnDef::new(activations::Column::FinishedAt)
                .timestamp_with_time_zone()
                .null(),
        )
        .foreign_key(
            ForeignKey::create()
                .from(activations::Entity, activations::Column::NumberId)
                .to(phone_numbers::Entity, phone_numbers::Column::Id),
        )
        .foreign_key(
            ForeignKey::create()
                .from(activations::Entity, activations::Column::ServiceId)
                .to(services::Entity, services::Column::Id),
        )
        .to_owned();
    create_table(db, backend, activations_table).await?;

    let sms_table = Table::create()
        .table(sms_messages::Entity)
        .col(
            ColumnDef::new(sms_messages::Column::Id)
                .big_integer()
                .not_null()
                .auto_increment()
                .primary_key(),
        )
        .col(
            ColumnDef::new(sms_messages::Column::ActivationId)
                .big_integer()
                .not_null(),
        )
        .col(ColumnDef::new(sms_messages::Column::Text).text().not_null())
        .col(
            ColumnDef::new(sms_messages::Column::ReceivedAt)
                .timestamp_with_time_zone()
                .not_null(),
        )
        .foreign_key(
            ForeignKey::create()
                .from(sms_messages::Entity, sms_messages::Column::ActivationId)
                .to(activations::Entity, activations::Column::Id),
        )
        .to_owned();
    create_table(db, backend, sms_table).await?;

    create_index(
        db,
        backend,
        Index::create()
            .name("idx_phone_numbers_lookup")
            .table(phone_numbers::Entity)
            .col(phone_numbers::Column::CountryId)
            .col(phone_numbers::Column::Operator)
            .col(phone_numbers::Column::Available)
            .to_owned(),
    )
    .await?;
    create_index(
        db,
        backend,
        Index::create()
            .name("idx_activations_number")
            .table(activations::Entity)
            .col(activations::Column::NumberId)
            .to_owned(),
    )
    .await?;
    create_index(
        db,
        backend,
        Index::create()
            .name("idx_sms_messages_activation")
            .table(sms_messages::Entity)
            .col(sms_messages::Column::ActivationId)
            .col(sms_messages::Column::ReceivedAt)
            .to_owned(),
    )
    .await?;

    Ok(())
}

async fn create_table(
    db: &DatabaseConnection,
    backend: DatabaseBackend,
    mut statement: TableCreateStatement,
) -> StorageResult<()> {
    statement.if_not_exists();
    db.execute(backend.build(&statement))
        .await
        .map_err(db_error)?;
    Ok(())
}

async fn create_index(
    db: &DatabaseConnection,
    backend: DatabaseBackend,
    mut statement: IndexCreateStatement,
) -> StorageResult<()> {
    statement.if_not_exists();
    db.execute(backend.build(&statement))
        .await
        .map_err(db_error)?;
    Ok(())
}
