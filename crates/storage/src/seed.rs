//! Idempotent provisioning of countries, services and numbers.

use sms_pool_domain::model::{NewCountry, NewPhoneNumber, NewService, PhoneNumber};
use sms_pool_domain::services::CacheInvalidator;
use sms_pool_domain::storage::{CatalogStore, NumberStore, StorageResult};
use tracing::info;

const DEMO_OPERATOR: &str = "any";
const DEMO_NUMBERS_PER_COUNTRY: u64 = 25;
const DEMO_STRIDE: u64 = 7_919_113;

/// Catalog and number inventory to load into a store. Applying the same
/// bundle twice leaves the store unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedData {
    pub countries: Vec<NewCountry>,
    pub services: Vec<NewService>,
    pub numbers: Vec<NewPhoneNumber>,
}

/// Rows actually written by [`SeedData::apply`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub countries: usize,
    pub services: usize,
    pub numbers: usize,
}

impl SeedData {
    /// Three countries, five services and a deterministic block of numbers
    /// per country under the `any` operator.
    pub fn demo() -> Self {
        let countries = [
            ("rus", "Russia", 79_000_000_000u64),
            ("uzb", "Uzbekistan", 998_000_000_000),
            ("bel", "Belarus", 375_000_000_000),
        ];
        let services = [
            ("vk", "VKontakte"),
            ("ok", "Odnoklassniki"),
            ("wa", "WhatsApp"),
            ("tg", "Telegram"),
            ("fb", "Facebook"),
        ];

        let mut numbers = Vec::new();
        for (code, _, base) in countries {
            for index in 0..DEMO_NUMBERS_PER_COUNTRY {
                numbers.push(NewPhoneNumber {
                    number: PhoneNumber::new(base + 1_000_000 + index * DEMO_STRIDE),
                    country_code: code.to_string(),
                    operator: DEMO_OPERATOR.to_string(),
                });
            }
        }

        Self {
            countries: countries
                .iter()
                .map(|(code, name, _)| NewCountry {
                    code: code.to_string(),
                    name: name.to_string(),
                })
                .collect(),
            services: services
                .iter()
                .map(|(code, name)| NewService {
                    code: code.to_string(),
                    name: name.to_string(),
                })
                .collect(),
            numbers,
        }
    }

    /// Inserts every row that is not present yet, countries first so numbers
    /// can resolve their country code. `invalidator` is cleared afterwards
    /// when any service was added.
    pub async fn apply<S>(
        &self,
        store: &S,
        invalidator: Option<&CacheInvalidator>,
    ) -> StorageResult<SeedReport>
    where
        S: CatalogStore + NumberStore,
    {
        let mut report = SeedReport::default();
        for country in &self.countries {
            if store.insert_country(country.clone()).await? {
                report.countries += 1;
            }
        }
        for service in &self.services {
            if store.insert_service(service.clone()).await? {
                report.services += 1;
            }
        }
        for number in &self.numbers {
            if store.insert_number(number.clone()).await? {
                report.numbers += 1;
            }
        }

        if report.services > 0 {
            if let Some(invalidator) = invalidator {
                invalidator.invalidate();
            }
        }
        info!(
            countries = report.countries,
            services = report.services,
            numbers = report.numbers,
            "seed data applied"
        );
        Ok(report)
    }
}
