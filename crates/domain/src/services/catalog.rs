//! Availability snapshot served to callers that want to know what can be
//! allocated right now.

use std::collections::BTreeMap;

use crate::model::{AvailabilityCount, ServiceRecord};

/// Service code → available numbers.
pub type ServiceCounts = BTreeMap<String, u64>;

/// Per-country view: operator → service counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountryAvailability {
    pub country: String,
    pub operators: BTreeMap<String, ServiceCounts>,
}

/// Countries in code order. Every number can be rented for any service, so
/// each service of the catalog reports the full operator count.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CatalogSnapshot {
    pub countries: Vec<CountryAvailability>,
}

impl CatalogSnapshot {
    /// Folds raw per-operator counts into the nested view. Pairs without
    /// available numbers are left out.
    pub fn build(counts: Vec<AvailabilityCount>, services: &[ServiceRecord]) -> Self {
        let mut by_country: BTreeMap<String, BTreeMap<String, ServiceCounts>> = BTreeMap::new();
        for count in counts.into_iter().filter(|count| count.available > 0) {
            let per_service = services
                .iter()
                .map(|service| (service.code.clone(), count.available))
                .collect();
            by_country
                .entry(count.country_code)
                .or_default()
                .insert(count.operator, per_service);
        }

        Self {
            countries: by_country
                .into_iter()
                .map(|(country, operators)| CountryAvailability { country, operators })
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.countries.is_empty()
    }
}
