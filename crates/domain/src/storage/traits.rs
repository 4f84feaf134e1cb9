use async_trait::async_trait;
use thiserror::Error;

use crate::model::{
    ActivationId, ActivationRecord, AvailabilityCount, CountryRecord, NewActivation, NewCountry,
    NewPhoneNumber, NewService, NewSms, NumberId, PhoneNumber, PhoneNumberRecord, ReservedNumber,
    ServiceRecord, SmsRecord, StatusChange, TerminalStatuses,
};
use chrono::{DateTime, Utc};

/// Common result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The store reported lock contention (`SQLITE_BUSY` and friends).
    #[error("database busy: {0}")]
    Busy(String),
    #[error("database call timed out after {0} ms")]
    Timeout(u64),
    #[error("database error: {0}")]
    Database(String),
}

impl StorageError {
    pub fn from_source(err: impl std::fmt::Display) -> Self {
        Self::Database(err.to_string())
    }

    /// Transient failures are expected to clear on their own and are worth
    /// retrying; everything else is surfaced as-is.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Busy(_) | Self::Timeout(_))
    }
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Inserts the country unless its code already exists. Returns `true`
    /// when a row was written.
    async fn insert_country(&self, country: NewCountry) -> StorageResult<bool>;
    async fn insert_service(&self, service: NewService) -> StorageResult<bool>;
    async fn find_service(&self, code: &str) -> StorageResult<Option<ServiceRecord>>;
    async fn list_services(&self) -> StorageResult<Vec<ServiceRecord>>;
    async fn list_countries(&self) -> StorageResult<Vec<CountryRecord>>;
}

/// An open claim on one number. The number stays unavailable only if the
/// reservation is turned into an activation; dropping or abandoning it puts
/// the number back.
#[async_trait]
pub trait NumberReservation: Send {
    fn number(&self) -> ReservedNumber;

    async fn activate(self: Box<Self>, activation: NewActivation)
        -> StorageResult<ActivationRecord>;

    async fn abandon(self: Box<Self>) -> StorageResult<()>;
}

#[async_trait]
pub trait NumberStore: Send + Sync {
    /// Inserts the number unless it already exists. Fails when the country
    /// code is unknown.
    async fn insert_number(&self, number: NewPhoneNumber) -> StorageResult<bool>;

    /// Atomically flips one random available number of `country`/`operator`
    /// to unavailable and hands it back inside a reservation.
    async fn reserve_number(
        &self,
        country: &str,
        operator: &str,
    ) -> StorageResult<Option<Box<dyn NumberReservation>>>;

    /// Marks the number available again unless an activation other than
    /// `released_by` still holds it with a non-terminal status.
    async fn release_number(
        &self,
        number_id: NumberId,
        released_by: ActivationId,
        terminal: &TerminalStatuses,
    ) -> StorageResult<bool>;

    async fn find_number(&self, number: PhoneNumber) -> StorageResult<Option<PhoneNumberRecord>>;

    async fn availability(&self) -> StorageResult<Vec<AvailabilityCount>>;
}

#[async_trait]
pub trait ActivationStore: Send + Sync {
    async fn find_activation(&self, id: ActivationId) -> StorageResult<Option<ActivationRecord>>;
    async fn activation_exists(&self, id: ActivationId) -> StorageResult<bool>;

    /// Writes `status` and, when `finished_at` is given and the row has no
    /// finish time yet, stamps it. Returns `None` for an unknown id.
    async fn update_status(
        &self,
        id: ActivationId,
        status: i32,
        finished_at: Option<DateTime<Utc>>,
    ) -> StorageResult<Option<StatusChange>>;
}

#[async_trait]
pub trait SmsStore: Send + Sync {
    async fn append_sms(&self, sms: NewSms) -> StorageResult<SmsRecord>;
    async fn list_sms(&self, activation_id: ActivationId) -> StorageResult<Vec<SmsRecord>>;
}

/// Everything the engines need from a backing store.
pub trait PoolStore:
    CatalogStore + NumberStore + ActivationStore + SmsStore + Clone + 'static
{
}

impl<T> PoolStore for T where
    T: CatalogStore + NumberStore + ActivationStore + SmsStore + Clone + 'static
{
}
