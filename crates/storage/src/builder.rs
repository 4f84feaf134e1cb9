use sms_pool_domain::storage::StorageResult;

use crate::{errors::StorageError, open, prepare_connection, SeaOrmStorage};

pub struct StorageBuilder {
    database_url: Option<String>,
    migrate: bool,
}

impl StorageBuilder {
    pub fn new() -> Self {
        Self {
            database_url: None,
            migrate: true,
        }
    }

    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    /// Skips pragmas and schema creation, for databases managed elsewhere.
    pub fn skip_migrations(mut self) -> Self {
        self.migrate = false;
        self
    }

    pub async fn build(self) -> StorageResult<SeaOrmStorage> {
        let url = self
            .database_url
            .ok_or_else(|| StorageError::Database("missing database url".into()))?;
        let db = open(&url).await?;
        if self.migrate {
            prepare_connection(&db).await?;
        }
        Ok(SeaOrmStorage::from_connection(db))
    }
}

impl Default for StorageBuilder {
    fn default() -> Self {
        Self::new()
    }
}
