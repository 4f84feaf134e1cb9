//! In-memory store used by the engine unit tests.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::model::{
    ActivationId, ActivationRecord, AvailabilityCount, CountryRecord, NewActivation, NewCountry,
    NewPhoneNumber, NewService, NewSms, NumberId, PhoneNumber, PhoneNumberRecord, ReservedNumber,
    ServiceRecord, SmsRecord, StatusChange, TerminalStatuses, STATUS_PENDING,
};
use crate::storage::{
    ActivationStore, CatalogStore, NumberReservation, NumberStore, SmsStore, StorageError,
    StorageResult,
};

#[derive(Default)]
struct State {
    countries: Vec<CountryRecord>,
    services: Vec<ServiceRecord>,
    numbers: Vec<PhoneNumberRecord>,
    activations: Vec<ActivationRecord>,
    sms: Vec<SmsRecord>,
}

#[derive(Clone, Default)]
pub(crate) struct MemoryStore {
    state: Arc<Mutex<State>>,
    failing_writes: Arc<AtomicU32>,
    service_lookups: Arc<AtomicUsize>,
}

impl MemoryStore {
    /// Country `rus`, services `tg`/`wa` and the given numbers under the
    /// `any` operator, all available.
    pub(crate) fn with_demo_numbers(numbers: &[u64]) -> Self {
        let store = Self::default();
        {
            let mut state = store.lock();
            state.countries.push(CountryRecord {
                id: 1,
                code: "rus".into(),
                name: "Russia".into(),
            });
            state.services.push(ServiceRecord {
                id: 1,
                code: "tg".into(),
                name: "Telegram".into(),
            });
            state.services.push(ServiceRecord {
                id: 2,
                code: "wa".into(),
                name: "WhatsApp".into(),
            });
            for (index, number) in numbers.iter().enumerate() {
                state.numbers.push(PhoneNumberRecord {
                    id: NumberId::new(index as i64 + 1),
                    number: PhoneNumber::new(*number),
                    country_id: 1,
                    operator: "any".into(),
                    available: true,
                });
            }
        }
        store
    }

    /// Takes `number` out of the pool and opens a pending activation on it.
    pub(crate) fn open_activation(&self, number: u64) -> ActivationId {
        let mut state = self.lock();
        let record = state
            .numbers
            .iter_mut()
            .find(|record| record.number.get() == number)
            .expect("number seeded");
        record.available = false;
        let number_id = record.id;
        let id = ActivationId::new(state.activations.len() as i64 + 1);
        state.activations.push(ActivationRecord {
            id,
            number_id,
            service_id: 1,
            status: STATUS_PENDING,
            sum: 20.0,
            created_at: Utc::now(),
            finished_at: None,
        });
        id
    }

    /// The next `count` write calls fail with a busy error.
    pub(crate) fn fail_next_writes(&self, count: u32) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    pub(crate) fn number_available(&self, number: u64) -> bool {
        self.lock()
            .numbers
            .iter()
            .find(|record| record.number.get() == number)
            .map(|record| record.available)
            .expect("number seeded")
    }

    pub(crate) fn number_id(&self, number: u64) -> NumberId {
        self.lock()
            .numbers
            .iter()
            .find(|record| record.number.get() == number)
            .map(|record| record.id)
            .expect("number seeded")
    }

    pub(crate) fn activation(&self, id: ActivationId) -> ActivationRecord {
        self.lock()
            .activations
            .iter()
            .find(|record| record.id == id)
            .cloned()
            .expect("activation exists")
    }

    pub(crate) fn activation_count(&self) -> usize {
        self.lock().activations.len()
    }

    pub(crate) fn sms_texts(&self, id: ActivationId) -> Vec<String> {
        self.lock()
            .sms
            .iter()
            .filter(|sms| sms.activation_id == id)
            .map(|sms| sms.text.clone())
            .collect()
    }

    pub(crate) fn service_lookups(&self) -> usize {
        self.service_lookups.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("state lock")
    }

    fn check_write(&self) -> StorageResult<()> {
        let injected = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1));
        match injected {
            Ok(_) => Err(StorageError::Busy("database is locked".into())),
            Err(_) => Ok(()),
        }
    }

    fn set_available(&self, id: NumberId, available: bool) {
        if let Some(record) = self.lock().numbers.iter_mut().find(|record| record.id == id) {
            record.available = available;
        }
    }
}

struct MemoryReservation {
    store: MemoryStore,
    number: ReservedNumber,
    settled: bool,
}

#[async_trait]
impl NumberReservation for MemoryReservation {
    fn number(&self) -> ReservedNumber {
        self.number
    }

    async fn activate(
        mut self: Box<Self>,
        activation: NewActivation,
    ) -> StorageResult<ActivationRecord> {
        self.store.check_write()?;
        self.settled = true;
        let mut state = self.store.lock();
        let record = ActivationRecord {
            id: ActivationId::new(state.activations.len() as i64 + 1),
            number_id: activation.number_id,
            service_id: activation.service_id,
            status: STATUS_PENDING,
            sum: activation.sum,
            created_at: activation.created_at,
            finished_at: None,
        };
        state.activations.push(record.clone());
        Ok(record)
    }

    async fn abandon(mut self: Box<Self>) -> StorageResult<()> {
        self.settled = true;
        self.store.set_available(self.number.id, true);
        Ok(())
    }
}

impl Drop for MemoryReservation {
    fn drop(&mut self) {
        if !self.settled {
            self.store.set_available(self.number.id, true);
        }
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn insert_country(&self, country: NewCountry) -> StorageResult<bool> {
        let mut state = self.lock();
        if state.countries.iter().any(|known| known.code == country.code) {
            return Ok(false);
        }
        let id = state.countries.len() as i64 + 1;
        state.countries.push(CountryRecord {
            id,
            code: country.code,
            name: country.name,
        });
        Ok(true)
    }

    async fn insert_service(&self, service: NewService) -> StorageResult<bool> {
        let mut state = self.lock();
        if state.services.iter().any(|known| known.code == service.code) {
            return Ok(false);
        }
        let id = state.services.len() as i64 + 1;
        state.services.push(ServiceRecord {
            id,
            code: service.code,
            name: service.name,
        });
        Ok(true)
    }

    async fn find_service(&self, code: &str) -> StorageResult<Option<ServiceRecord>> {
        self.service_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .lock()
            .services
            .iter()
            .find(|service| service.code == code)
            .cloned())
    }

    async fn list_services(&self) -> StorageResult<Vec<ServiceRecord>> {
        Ok(self.lock().services.clone())
    }

    async fn list_countries(&self) -> StorageResult<Vec<CountryRecord>> {
        Ok(self.lock().countries.clone())
    }
}

#[async_trait]
impl NumberStore for MemoryStore {
    async fn insert_number(&self, number: NewPhoneNumber) -> StorageResult<bool> {
        let mut state = self.lock();
        let Some(country_id) = state
            .countries
            .iter()
            .find(|country| country.code == number.country_code)
            .map(|country| country.id)
        else {
            return Err(StorageError::Database(format!(
                "unknown country `{}`",
                number.country_code
            )));
        };
        if state.numbers.iter().any(|known| known.number == number.number) {
            return Ok(false);
        }
        let id = NumberId::new(state.numbers.len() as i64 + 1);
        state.numbers.push(PhoneNumberRecord {
            id,
            number: number.number,
            country_id,
            operator: number.operator,
            available: true,
        });
        Ok(true)
    }

    async fn reserve_number(
        &self,
        country: &str,
        operator: &str,
    ) -> StorageResult<Option<Box<dyn NumberReservation>>> {
        self.check_write()?;
        let mut state = self.lock();
        let Some(country_id) = state
            .countries
            .iter()
            .find(|known| known.code == country)
            .map(|known| known.id)
        else {
            return Ok(None);
        };
        let Some(record) = state.numbers.iter_mut().find(|record| {
            record.available && record.country_id == country_id && record.operator == operator
        }) else {
            return Ok(None);
        };
        record.available = false;
        let number = ReservedNumber {
            id: record.id,
            number: record.number,
        };
        drop(state);

        Ok(Some(Box::new(MemoryReservation {
            store: self.clone(),
            number,
            settled: false,
        })))
    }

    async fn release_number(
        &self,
        number_id: NumberId,
        released_by: ActivationId,
        terminal: &TerminalStatuses,
    ) -> StorageResult<bool> {
        self.check_write()?;
        let mut state = self.lock();
        let still_held = state.activations.iter().any(|activation| {
            activation.number_id == number_id
                && activation.id != released_by
                && !terminal.contains(activation.status)
        });
        if still_held {
            return Ok(false);
        }
        match state.numbers.iter_mut().find(|record| record.id == number_id) {
            Some(record) => {
                record.available = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn find_number(&self, number: PhoneNumber) -> StorageResult<Option<PhoneNumberRecord>> {
        Ok(self
            .lock()
            .numbers
            .iter()
            .find(|record| record.number == number)
            .cloned())
    }

    async fn availability(&self) -> StorageResult<Vec<AvailabilityCount>> {
        let state = self.lock();
        let mut counts: Vec<AvailabilityCount> = Vec::new();
        for record in state.numbers.iter().filter(|record| record.available) {
            let Some(country) = state
                .countries
                .iter()
                .find(|country| country.id == record.country_id)
            else {
                continue;
            };
            match counts
                .iter_mut()
                .find(|count| count.country_code == country.code && count.operator == record.operator)
            {
                Some(count) => count.available += 1,
                None => counts.push(AvailabilityCount {
                    country_code: country.code.clone(),
                    operator: record.operator.clone(),
                    available: 1,
                }),
            }
        }
        Ok(counts)
    }
}

#[async_trait]
impl ActivationStore for MemoryStore {
    async fn find_activation(&self, id: ActivationId) -> StorageResult<Option<ActivationRecord>> {
        Ok(self
            .lock()
            .activations
            .iter()
            .find(|record| record.id == id)
            .cloned())
    }

    async fn activation_exists(&self, id: ActivationId) -> StorageResult<bool> {
        Ok(self.lock().activations.iter().any(|record| record.id == id))
    }

    async fn update_status(
        &self,
        id: ActivationId,
        status: i32,
        finished_at: Option<DateTime<Utc>>,
    ) -> StorageResult<Option<StatusChange>> {
        self.check_write()?;
        let mut state = self.lock();
        let Some(record) = state.activations.iter_mut().find(|record| record.id == id) else {
            return Ok(None);
        };
        let previous_status = record.status;
        record.status = status;
        if record.finished_at.is_none() {
            record.finished_at = finished_at;
        }
        Ok(Some(StatusChange {
            previous_status,
            activation: record.clone(),
        }))
    }
}

#[async_trait]
impl SmsStore for MemoryStore {
    async fn append_sms(&self, sms: NewSms) -> StorageResult<SmsRecord> {
        self.check_write()?;
        let mut state = self.lock();
        let record = SmsRecord {
            id: state.sms.len() as i64 + 1,
            activation_id: sms.activation_id,
            text: sms.text,
            received_at: sms.received_at,
        };
        state.sms.push(record.clone());
        Ok(record)
    }

    async fn list_sms(&self, activation_id: ActivationId) -> StorageResult<Vec<SmsRecord>> {
        let mut found: Vec<SmsRecord> = self
            .lock()
            .sms
            .iter()
            .filter(|sms| sms.activation_id == activation_id)
            .cloned()
            .collect();
        found.sort_by(|left, right| {
            left.received_at
                .cmp(&right.received_at)
                .then(left.id.cmp(&right.id))
        });
        Ok(found)
    }
}
