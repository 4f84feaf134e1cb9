//! Entry point that wires the store into the allocation and lifecycle
//! engines and exposes the inbound operations.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::PoolConfig;
use crate::model::{ActivationId, ActivationRecord, Allocation, AllocationRequest, SmsRecord};
use crate::services::allocation::AllocationEngine;
use crate::services::cache::{CacheInvalidator, ServiceCatalogCache};
use crate::services::catalog::CatalogSnapshot;
use crate::services::error::PoolResult;
use crate::services::lifecycle::LifecycleManager;
use crate::services::retry::RetryExecutor;
use crate::services::writer::DeferredWriter;
use crate::storage::PoolStore;

#[derive(Clone)]
pub struct NumberPool<S> {
    store: S,
    retry: RetryExecutor,
    allocation: AllocationEngine<S>,
    lifecycle: LifecycleManager<S>,
}

impl<S: PoolStore> NumberPool<S> {
    /// Builds the engines and starts the deferred writer. The returned handle
    /// completes once every clone of the pool has been dropped and queued
    /// writes are done.
    pub fn start(store: S, config: &PoolConfig) -> (Self, JoinHandle<()>) {
        let retry = RetryExecutor::new(config.retry.clone());
        let cache = ServiceCatalogCache::with_capacity(config.service_cache_capacity);
        let (writer, writer_task) =
            DeferredWriter::spawn(store.clone(), retry.clone(), config.terminal_statuses.clone());

        let pool = Self {
            allocation: AllocationEngine::new(store.clone(), cache, retry.clone()),
            lifecycle: LifecycleManager::new(
                store.clone(),
                retry.clone(),
                writer,
                config.terminal_statuses.clone(),
                config.stamp_policy,
            ),
            store,
            retry,
        };
        (pool, writer_task)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn cache_invalidator(&self) -> CacheInvalidator {
        self.allocation.cache().invalidator()
    }

    pub async fn catalog_snapshot(&self, cancel: &CancellationToken) -> PoolResult<CatalogSnapshot> {
        let counts = self
            .retry
            .run("availability", cancel, || self.store.availability())
            .await?;
        let services = self
            .retry
            .run("list_services", cancel, || self.store.list_services())
            .await?;
        Ok(CatalogSnapshot::build(counts, &services))
    }

    pub async fn allocate(
        &self,
        request: &AllocationRequest,
        cancel: &CancellationToken,
    ) -> PoolResult<Allocation> {
        self.allocation.allocate(request, cancel).await
    }

    pub async fn finish(
        &self,
        id: ActivationId,
        status: i32,
        cancel: &CancellationToken,
    ) -> PoolResult<ActivationRecord> {
        self.lifecycle.finish(id, status, cancel).await
    }

    pub async fn record_sms(
        &self,
        id: ActivationId,
        text: String,
        cancel: &CancellationToken,
    ) -> PoolResult<()> {
        self.lifecycle.record_sms(id, text, cancel).await
    }

    pub async fn list_sms(
        &self,
        id: ActivationId,
        cancel: &CancellationToken,
    ) -> PoolResult<Vec<SmsRecord>> {
        self.lifecycle.list_sms(id, cancel).await
    }

    pub async fn activation(
        &self,
        id: ActivationId,
        cancel: &CancellationToken,
    ) -> PoolResult<ActivationRecord> {
        self.lifecycle.activation(id, cancel).await
    }

    /// Waits until deferred releases and SMS writes queued so far are stored.
    pub async fn flush(&self) -> PoolResult<()> {
        self.lifecycle.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::STATUS_FINISHED;
    use crate::services::error::PoolError;
    use crate::testing::MemoryStore;

    fn request() -> AllocationRequest {
        AllocationRequest {
            country: "rus".into(),
            operator: "any".into(),
            service: "tg".into(),
            sum: 20.0,
            excluded_prefixes: Vec::new(),
        }
    }

    #[tokio::test]
    async fn allocate_finish_reallocate() {
        let store = MemoryStore::with_demo_numbers(&[79157891133]);
        let (pool, _writer) = NumberPool::start(store.clone(), &PoolConfig::default());
        let cancel = CancellationToken::new();

        let first = pool.allocate(&request(), &cancel).await.unwrap();
        assert!(first.number.digits().starts_with('7'));
        assert_eq!(
            pool.allocate(&request(), &cancel).await,
            Err(PoolError::no_match())
        );

        pool.finish(first.activation_id, STATUS_FINISHED, &cancel)
            .await
            .unwrap();
        pool.flush().await.unwrap();

        let second = pool.allocate(&request(), &cancel).await.unwrap();
        assert_eq!(second.number, first.number);
        assert_ne!(second.activation_id, first.activation_id);
    }

    #[tokio::test]
    async fn snapshot_reflects_allocations() {
        let store = MemoryStore::with_demo_numbers(&[79000000001, 79000000002]);
        let (pool, _writer) = NumberPool::start(store, &PoolConfig::default());
        let cancel = CancellationToken::new();

        let before = pool.catalog_snapshot(&cancel).await.unwrap();
        assert_eq!(before.countries[0].operators["any"]["tg"], 2);

        pool.allocate(&request(), &cancel).await.unwrap();
        let after = pool.catalog_snapshot(&cancel).await.unwrap();
        assert_eq!(after.countries[0].operators["any"]["wa"], 1);
    }

    #[tokio::test]
    async fn writer_stops_when_pool_is_dropped() {
        let store = MemoryStore::with_demo_numbers(&[]);
        let (pool, writer) = NumberPool::start(store, &PoolConfig::default());
        drop(pool);
        writer.await.expect("writer exits cleanly");
    }
}
