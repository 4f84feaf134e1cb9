//! Number allocation.
//!
//! A number is claimed with a single conditional update inside a store
//! transaction (see [`NumberStore::reserve_number`]), so two concurrent
//! callers can never walk away with the same number. Everything that can
//! still reject the request after the claim (excluded prefix, unknown
//! service, failed insert) rolls the transaction back, which puts the number
//! back in the pool and leaves no activation behind. The same holds when the
//! caller drops the future halfway: the uncommitted transaction is discarded.

use chrono::Utc;
use metrics::counter;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::model::{Allocation, AllocationRequest, NewActivation, ServiceRecord};
use crate::services::cache::ServiceCatalogCache;
use crate::services::error::{PoolError, PoolResult};
use crate::services::retry::RetryExecutor;
use crate::storage::{PoolStore, StorageResult};

#[derive(Debug)]
enum Attempt {
    Allocated(Allocation),
    NoMatch,
    Excluded,
    UnknownService,
}

#[derive(Clone)]
pub struct AllocationEngine<S> {
    store: S,
    cache: ServiceCatalogCache,
    retry: RetryExecutor,
}

impl<S: PoolStore> AllocationEngine<S> {
    pub fn new(store: S, cache: ServiceCatalogCache, retry: RetryExecutor) -> Self {
        Self {
            store,
            cache,
            retry,
        }
    }

    pub fn cache(&self) -> &ServiceCatalogCache {
        &self.cache
    }

    /// Claims one random available number for `country`/`operator` and opens
    /// an activation on it for `service`.
    ///
    /// Failure precedence follows the request flow: no matching number,
    /// then excluded prefix, then unknown service.
    pub async fn allocate(
        &self,
        request: &AllocationRequest,
        cancel: &CancellationToken,
    ) -> PoolResult<Allocation> {
        validate(request)?;

        // Resolved before the transaction opens: the store may serve a single
        // connection, which the open transaction would hold.
        let service = self
            .retry
            .run("resolve_service", cancel, || {
                self.cache.get_or_load(&self.store, &request.service)
            })
            .await?;

        let outcome = self
            .retry
            .run("allocate_number", cancel, || {
                self.try_allocate(request, service.as_ref())
            })
            .await
            .inspect_err(|err| {
                counter!("pool_allocations_total", "result" => err.kind().as_ref().to_owned())
                    .increment(1);
            })?;

        match outcome {
            Attempt::Allocated(allocation) => {
                counter!("pool_allocations_total", "result" => "success").increment(1);
                info!(
                    country = %request.country,
                    operator = %request.operator,
                    service = %request.service,
                    number = %allocation.number,
                    activation_id = %allocation.activation_id,
                    "number allocated"
                );
                Ok(allocation)
            }
            Attempt::NoMatch => {
                counter!("pool_allocations_total", "result" => "no_match").increment(1);
                Err(PoolError::no_match())
            }
            Attempt::Excluded => {
                counter!("pool_allocations_total", "result" => "excluded_by_prefix").increment(1);
                Err(PoolError::excluded())
            }
            Attempt::UnknownService => {
                counter!("pool_allocations_total", "result" => "unknown_service").increment(1);
                Err(PoolError::UnknownService(request.service.clone()))
            }
        }
    }

    async fn try_allocate(
        &self,
        request: &AllocationRequest,
        service: Option<&ServiceRecord>,
    ) -> StorageResult<Attempt> {
        let Some(reservation) = self
            .store
            .reserve_number(&request.country, &request.operator)
            .await?
        else {
            return Ok(Attempt::NoMatch);
        };
        let candidate = reservation.number();

        if let Some(prefix) = candidate.number.excluded_by(&request.excluded_prefixes) {
            debug!(number = %candidate.number, prefix, "candidate excluded by prefix");
            reservation.abandon().await?;
            return Ok(Attempt::Excluded);
        }

        let Some(service) = service else {
            reservation.abandon().await?;
            return Ok(Attempt::UnknownService);
        };

        let activation = reservation
            .activate(NewActivation {
                number_id: candidate.id,
                service_id: service.id,
                sum: request.sum,
                created_at: Utc::now(),
            })
            .await?;

        Ok(Attempt::Allocated(Allocation {
            number: candidate.number,
            activation_id: activation.id,
            flashcall: true,
            voice: false,
        }))
    }
}

fn validate(request: &AllocationRequest) -> PoolResult<()> {
    if request.country.trim().is_empty() {
        return Err(PoolError::InvalidArgument("country code is empty".into()));
    }
    if request.operator.trim().is_empty() {
        return Err(PoolError::InvalidArgument("operator is empty".into()));
    }
    if request.service.trim().is_empty() {
        return Err(PoolError::InvalidArgument("service code is empty".into()));
    }
    if !request.sum.is_finite() {
        return Err(PoolError::InvalidArgument(format!(
            "sum must be a finite number, got {}",
            request.sum
        )));
    }
    Ok(())
}
