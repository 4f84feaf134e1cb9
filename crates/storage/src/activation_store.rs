use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, Set,
    TransactionTrait,
};
use sms_pool_domain::model::{ActivationId, ActivationRecord, NumberId, StatusChange};
use sms_pool_domain::storage::{ActivationStore, StorageResult};

use crate::entity::activations;
use crate::errors::db_error;
use crate::SeaOrmStorage;

#[async_trait::async_trait]
impl ActivationStore for SeaOrmStorage {
    async fn find_activation(&self, id: ActivationId) -> StorageResult<Option<ActivationRecord>> {
        let maybe = activations::Entity::find_by_id(id.get())
            .one(self.connection())
            .await
            .map_err(db_error)?;
        Ok(maybe.map(activation_to_record))
    }

    async fn activation_exists(&self, id: ActivationId) -> StorageResult<bool> {
        let count = activations::Entity::find()
            .filter(activations::Column::Id.eq(id.get()))
            .count(self.connection())
            .await
            .map_err(db_error)?;
        Ok(count > 0)
    }

    async fn update_status(
        &self,
        id: ActivationId,
        status: i32,
        finished_at: Option<DateTime<Utc>>,
    ) -> StorageResult<Option<StatusChange>> {
        let txn = self.connection().begin().await.map_err(db_error)?;
        let Some(model) = activations::Entity::find_by_id(id.get())
            .one(&txn)
            .await
            .map_err(db_error)?
        else {
            txn.rollback().await.map_err(db_error)?;
            return Ok(None);
        };

        let previous_status = model.status;
        let stamp = if model.finished_at.is_none() {
            finished_at
        } else {
            None
        };

        let mut active: activations::ActiveModel = model.into();
        active.status = Set(status);
        if let Some(at) = stamp {
            active.finished_at = Set(Some(at));
        }
        let updated = active.update(&txn).await.map_err(db_error)?;
        txn.commit().await.map_err(db_error)?;

        Ok(Some(StatusChange {
            previous_status,
            activation: activation_to_record(updated),
        }))
    }
}

pub(crate) fn activation_to_record(model: activations::Model) -> ActivationRecord {
    ActivationRecord {
        id: ActivationId::new(model.id),
        number_id: NumberId::new(model.number_id),
        service_id: model.service_id,
        status: model.status,
        sum: model.sum,
        created_at: model.created_at,
        finished_at: model.finished_at,
    }
}
