use sea_orm::sea_query::{
    Alias, Expr, Func, OnConflict, Order, PostgresQueryBuilder, Query, SelectStatement,
    SqliteQueryBuilder, UpdateStatement,
};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseBackend, DatabaseTransaction,
    EntityTrait, FromQueryResult, QueryFilter, Set, Statement, TransactionTrait,
};
use sms_pool_domain::model::{
    ActivationId, ActivationRecord, AvailabilityCount, NewActivation, NewPhoneNumber, NumberId,
    PhoneNumber, PhoneNumberRecord, ReservedNumber, TerminalStatuses, STATUS_PENDING,
};
use sms_pool_domain::storage::{NumberReservation, NumberStore, StorageResult};
use tracing::debug;

use crate::activation_store::activation_to_record;
use crate::entity::{activations, countries, phone_numbers};
use crate::errors::{db_error, StorageError};
use crate::SeaOrmStorage;

#[async_trait::async_trait]
impl NumberStore for SeaOrmStorage {
    async fn insert_number(&self, number: NewPhoneNumber) -> StorageResult<bool> {
        let country = countries::Entity::find()
            .filter(countries::Column::Code.eq(number.country_code.as_str()))
            .one(self.connection())
            .await
            .map_err(db_error)?
            .ok_or_else(|| {
                StorageError::Database(format!("unknown country `{}`", number.country_code))
            })?;

        let model = phone_numbers::ActiveModel {
            number: Set(to_column(number.number)?),
            country_id: Set(country.id),
            operator: Set(number.operator),
            available: Set(true),
            ..Default::default()
        };
        let inserted = phone_numbers::Entity::insert(model)
            .on_conflict(
                OnConflict::column(phone_numbers::Column::Number)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(self.connection())
            .await
            .map_err(db_error)?;
        Ok(inserted > 0)
    }

    async fn reserve_number(
        &self,
        country: &str,
        operator: &str,
    ) -> StorageResult<Option<Box<dyn NumberReservation>>> {
        let backend = self.connection().get_database_backend();
        let txn = self.connection().begin().await.map_err(db_error)?;

        let mut query = Query::update();
        query.table(phone_numbers::Entity);
        query.value(phone_numbers::Column::Available, false);
        query.and_where(Expr::col(phone_numbers::Column::Id).in_subquery(random_candidate(country, operator)));
        query.and_where(phone_numbers::Column::Available.eq(true));
        query.returning_all();

        let maybe_row = txn
            .query_one(build_update(backend, &query))
            .await
            .map_err(db_error)?;
        let Some(row) = maybe_row else {
            txn.rollback().await.map_err(db_error)?;
            return Ok(None);
        };
        let claimed = phone_numbers::Model::from_query_result(&row, "").map_err(db_error)?;

        debug!(number = claimed.number, "number reserved");
        Ok(Some(Box::new(SeaOrmReservation {
            txn,
            number: ReservedNumber {
                id: NumberId::new(claimed.id),
                number: from_column(claimed.number)?,
            },
        })))
    }

    async fn release_number(
        &self,
        number_id: NumberId,
        released_by: ActivationId,
        terminal: &TerminalStatuses,
    ) -> StorageResult<bool> {
        let backend = self.connection().get_database_backend();

        let other_holders = Query::select()
            .expr(Expr::val(1))
            .from(activations::Entity)
            .and_where(activations::Column::NumberId.eq(number_id.get()))
            .and_where(activations::Column::Id.ne(released_by.get()))
            .and_where(activations::Column::Status.is_not_in(terminal.iter()))
            .to_owned();

        let mut query = Query::update();
        query.table(phone_numbers::Entity);
        query.value(phone_numbers::Column::Available, true);
        query.and_where(phone_numbers::Column::Id.eq(number_id.get()));
        query.and_where(Expr::exists(other_holders).not());

        let result = self
            .connection()
            .execute(build_update(backend, &query))
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_number(&self, number: PhoneNumber) -> StorageResult<Option<PhoneNumberRecord>> {
        let maybe = phone_numbers::Entity::find()
            .filter(phone_numbers::Column::Number.eq(to_column(number)?))
            .one(self.connection())
            .await
            .map_err(db_error)?;
        maybe.map(number_to_record).transpose()
    }

    async fn availability(&self) -> StorageResult<Vec<AvailabilityCount>> {
        let backend = self.connection().get_database_backend();
        let query = Query::select()
            .expr_as(
                Expr::col((countries::Entity, countries::Column::Code)),
                Alias::new("country_code"),
            )
            .expr_as(
                Expr::col((phone_numbers::Entity, phone_numbers::Column::Operator)),
                Alias::new("operator"),
            )
            .expr_as(
                Expr::col((phone_numbers::Entity, phone_numbers::Column::Id)).count(),
                Alias::new("available"),
            )
            .from(phone_numbers::Entity)
            .inner_join(
                countries::Entity,
                Expr::col((countries::Entity, countries::Column::Id))
                    .equals((phone_numbers::Entity, phone_numbers::Column::CountryId)),
            )
            .and_where(Expr::col((phone_numbers::Entity, phone_numbers::Column::Available)).eq(true))
            .group_by_col((countries::Entity, countries::Column::Code))
            .group_by_col((phone_numbers::Entity, phone_numbers::Column::Operator))
            .order_by((countries::Entity, countries::Column::Code), Order::Asc)
            .order_by((phone_numbers::Entity, phone_numbers::Column::Operator), Order::Asc)
            .to_owned();

        let rows = AvailabilityRow::find_by_statement(backend.build(&query))
            .all(self.connection())
            .await
            .map_err(db_error)?;
        Ok(rows
            .into_iter()
            .map(|row| AvailabilityCount {
                country_code: row.country_code,
                operator: row.operator,
                available: row.available.max(0) as u64,
            })
            .collect())
    }
}

/// Open write transaction holding one freshly claimed number.
struct SeaOrmReservation {
    txn: DatabaseTransaction,
    number: ReservedNumber,
}

#[async_trait::async_trait]
impl NumberReservation for SeaOrmReservation {
    fn number(&self) -> ReservedNumber {
        self.number
    }

    async fn activate(
        self: Box<Self>,
        activation: NewActivation,
    ) -> StorageResult<ActivationRecord> {
        let Self { txn, .. } = *self;
        let model = activations::ActiveModel {
            number_id: Set(activation.number_id.get()),
            service_id: Set(activation.service_id),
            status: Set(STATUS_PENDING),
            sum: Set(activation.sum),
            created_at: Set(activation.created_at),
            finished_at: Set(None),
            ..Default::default()
        };
        let created = model.insert(&txn).await.map_err(db_error)?;
        txn.commit().await.map_err(db_error)?;
        Ok(activation_to_record(created))
    }

    async fn abandon(self: Box<Self>) -> StorageResult<()> {
        self.txn.rollback().await.map_err(db_error)
    }
}

#[derive(Debug, FromQueryResult)]
struct AvailabilityRow {
    country_code: String,
    operator: String,
    available: i64,
}

fn random_candidate(country: &str, operator: &str) -> SelectStatement {
    Query::select()
        .column((phone_numbers::Entity, phone_numbers::Column::Id))
        .from(phone_numbers::Entity)
        .inner_join(
            countries::Entity,
            Expr::col((countries::Entity, countries::Column::Id))
                .equals((phone_numbers::Entity, phone_numbers::Column::CountryId)),
        )
        .and_where(Expr::col((countries::Entity, countries::Column::Code)).eq(country))
        .and_where(Expr::col((phone_numbers::Entity, phone_numbers::Column::Operator)).eq(operator))
        .and_where(Expr::col((phone_numbers::Entity, phone_numbers::Column::Available)).eq(true))
        .order_by_expr(Func::random().into(), Order::Asc)
        .limit(1)
        .to_owned()
}

fn build_update(backend: DatabaseBackend, query: &UpdateStatement) -> Statement {
    let (sql, values) = match backend {
        DatabaseBackend::Sqlite => query.build(SqliteQueryBuilder),
        DatabaseBackend::Postgres => query.build(PostgresQueryBuilder),
        DatabaseBackend::MySql => unreachable!("mysql backend is not supported"),
    };
    Statement::from_sql_and_values(backend, sql, values)
}

fn to_column(number: PhoneNumber) -> StorageResult<i64> {
    i64::try_from(number.get())
        .map_err(|_| StorageError::Database(format!("phone number {number} out of range")))
}

fn from_column(value: i64) -> StorageResult<PhoneNumber> {
    u64::try_from(value)
        .map(PhoneNumber::new)
        .map_err(|_| StorageError::Database(format!("negative phone number {value}")))
}

fn number_to_record(model: phone_numbers::Model) -> StorageResult<PhoneNumberRecord> {
    Ok(PhoneNumberRecord {
        id: NumberId::new(model.id),
        number: from_column(model.number)?,
        country_id: model.country_id,
        operator: model.operator,
        available: model.available,
    })
}
