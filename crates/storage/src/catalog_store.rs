use sea_orm::sea_query::OnConflict;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use sms_pool_domain::model::{CountryRecord, NewCountry, NewService, ServiceRecord};
use sms_pool_domain::storage::{CatalogStore, StorageResult};

use crate::entity::{countries, services};
use crate::errors::db_error;
use crate::SeaOrmStorage;

#[async_trait::async_trait]
impl CatalogStore for SeaOrmStorage {
    async fn insert_country(&self, country: NewCountry) -> StorageResult<bool> {
        let model = countries::ActiveModel {
            code: Set(country.code),
            name: Set(country.name),
            ..Default::default()
        };
        let inserted = countries::Entity::insert(model)
            .on_conflict(
                OnConflict::column(countries::Column::Code)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(self.connection())
            .await
            .map_err(db_error)?;
        Ok(inserted > 0)
    }

    async fn insert_service(&self, service: NewService) -> StorageResult<bool> {
        let model = services::ActiveModel {
            code: Set(service.code),
            name: Set(service.name),
            ..Default::default()
        };
        let inserted = services::Entity::insert(model)
            .on_conflict(
                OnConflict::column(services::Column::Code)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(self.connection())
            .await
            .map_err(db_error)?;
        Ok(inserted > 0)
    }

    async fn find_service(&self, code: &str) -> StorageResult<Option<ServiceRecord>> {
        let maybe = services::Entity::find()
            .filter(services::Column::Code.eq(code))
            .one(self.connection())
            .await
            .map_err(db_error)?;
        Ok(maybe.map(service_to_record))
    }

    async fn list_services(&self) -> StorageResult<Vec<ServiceRecord>> {
        let rows = services::Entity::find()
            .order_by_asc(services::Column::Id)
            .all(self.connection())
            .await
            .map_err(db_error)?;
        Ok(rows.into_iter().map(service_to_record).collect())
    }

    async fn list_countries(&self) -> StorageResult<Vec<CountryRecord>> {
        let rows = countries::Entity::find()
            .order_by_asc(countries::Column::Id)
            .all(self.connection())
            .await
            .map_err(db_error)?;
        Ok(rows
            .into_iter()
            .map(|model| CountryRecord {
                id: model.id,
                code: model.code,
                name: model.name,
            })
            .collect())
    }
}

fn service_to_record(model: services::Model) -> ServiceRecord {
    ServiceRecord {
        id: model.id,
        code: model.code,
        name: model.name,
    }
}
