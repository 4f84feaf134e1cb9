use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use sms_pool_domain::model::{ActivationId, NewSms, SmsRecord};
use sms_pool_domain::storage::{SmsStore, StorageResult};

use crate::entity::sms_messages;
use crate::errors::db_error;
use crate::SeaOrmStorage;

#[async_trait::async_trait]
impl SmsStore for SeaOrmStorage {
    async fn append_sms(&self, sms: NewSms) -> StorageResult<SmsRecord> {
        let model = sms_messages::ActiveModel {
            activation_id: Set(sms.activation_id.get()),
            text: Set(sms.text),
            received_at: Set(sms.received_at),
            ..Default::default()
        };
        let created = model
            .insert(self.connection())
            .await
            .map_err(db_error)?;
        Ok(sms_to_record(created))
    }

    async fn list_sms(&self, activation_id: ActivationId) -> StorageResult<Vec<SmsRecord>> {
        let rows = sms_messages::Entity::find()
            .filter(sms_messages::Column::ActivationId.eq(activation_id.get()))
            .order_by_asc(sms_messages::Column::ReceivedAt)
            .order_by_asc(sms_messages::Column::Id)
            .all(self.connection())
            .await
            .map_err(db_error)?;
        Ok(rows.into_iter().map(sms_to_record).collect())
    }
}

fn sms_to_record(model: sms_messages::Model) -> SmsRecord {
    SmsRecord {
        id: model.id,
        activation_id: ActivationId::new(model.activation_id),
        text: model.text,
        received_at: model.received_at,
    }
}
