//! Data structures shared across the storage adapters, engines and the HTTP
//! binary.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use hex::encode as hex_encode;
use sha3::{Digest, Sha3_256};

/// Store-assigned identifier of an activation row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActivationId(i64);

impl ActivationId {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for ActivationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Store-assigned identifier of a phone number row (not the number itself).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NumberId(i64);

impl NumberId {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for NumberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A phone number in its full international digit form, e.g. `79157891133`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PhoneNumber(u64);

impl PhoneNumber {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }

    /// Decimal digit string used for prefix matching. No normalization is
    /// applied: what is stored is what gets compared.
    pub fn digits(self) -> String {
        self.0.to_string()
    }

    /// Returns the first prefix in `prefixes` that the number starts with.
    pub fn excluded_by<'a, I>(self, prefixes: I) -> Option<&'a str>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let digits = self.digits();
        prefixes
            .into_iter()
            .map(String::as_str)
            .find(|prefix| digits.starts_with(prefix))
    }
}

impl fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Activation status reported right after allocation.
pub const STATUS_PENDING: i32 = 0;
/// Status the upstream protocol uses to report a finished activation.
pub const STATUS_FINISHED: i32 = 3;

/// Set of status values that end an activation and release its number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalStatuses(BTreeSet<i32>);

impl TerminalStatuses {
    pub fn new(statuses: impl IntoIterator<Item = i32>) -> Self {
        Self(statuses.into_iter().collect())
    }

    pub fn contains(&self, status: i32) -> bool {
        self.0.contains(&status)
    }

    pub fn iter(&self) -> impl Iterator<Item = i32> + '_ {
        self.0.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for TerminalStatuses {
    fn default() -> Self {
        Self::new([STATUS_FINISHED])
    }
}

/// Controls when `finished_at` is written by a status update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FinishStampPolicy {
    /// Stamp only when the new status is terminal.
    #[default]
    TerminalOnly,
    /// Stamp on every status update, terminal or not.
    Always,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountryRecord {
    pub id: i64,
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    pub id: i64,
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhoneNumberRecord {
    pub id: NumberId,
    pub number: PhoneNumber,
    pub country_id: i64,
    pub operator: String,
    pub available: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActivationRecord {
    pub id: ActivationId,
    pub number_id: NumberId,
    pub service_id: i64,
    pub status: i32,
    pub sum: f64,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmsRecord {
    pub id: i64,
    pub activation_id: ActivationId,
    pub text: String,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCountry {
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewService {
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPhoneNumber {
    pub number: PhoneNumber,
    pub country_code: String,
    pub operator: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewActivation {
    pub number_id: NumberId,
    pub service_id: i64,
    pub sum: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSms {
    pub activation_id: ActivationId,
    pub text: String,
    pub received_at: DateTime<Utc>,
}

/// A number claimed by an open reservation, not yet bound to an activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservedNumber {
    pub id: NumberId,
    pub number: PhoneNumber,
}

/// Outcome of a status update: the row after the write plus the status it
/// held before.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    pub previous_status: i32,
    pub activation: ActivationRecord,
}

/// Available-number count for one country/operator pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilityCount {
    pub country_code: String,
    pub operator: String,
    pub available: u64,
}

/// Caller input for a number allocation.
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationRequest {
    pub country: String,
    pub operator: String,
    pub service: String,
    pub sum: f64,
    pub excluded_prefixes: Vec<String>,
}

/// Successful allocation as reported back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub number: PhoneNumber,
    pub activation_id: ActivationId,
    pub flashcall: bool,
    pub voice: bool,
}

/// Shared secret guarding the HTTP surface. Only the SHA3-256 digest is kept
/// so comparisons run over fixed-length values.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey {
    digest: [u8; 32],
}

impl ApiKey {
    pub fn new(secret: &str) -> Self {
        Self {
            digest: digest(secret),
        }
    }

    pub fn matches(&self, candidate: &str) -> bool {
        let other = digest(candidate);
        self.digest
            .iter()
            .zip(other.iter())
            .fold(0u8, |acc, (left, right)| acc | (left ^ right))
            == 0
    }

    /// Short hex fingerprint that is safe to log.
    pub fn fingerprint(&self) -> String {
        hex_encode(&self.digest[..6])
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKey")
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

fn digest(value: &str) -> [u8; 32] {
    let mut hasher = Sha3_256::new();
    hasher.update(value.as_bytes());
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prefixes(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn prefix_matching_uses_full_digit_string() {
        let number = PhoneNumber::new(79157891133);
        assert_eq!(number.excluded_by(&prefixes(&["791"])), Some("791"));
        assert_eq!(number.excluded_by(&prefixes(&["7918"])), None);
        assert_eq!(number.excluded_by(&prefixes(&["918"])), None);
        assert_eq!(number.excluded_by(&prefixes(&["7915"])), Some("7915"));
    }

    #[test]
    fn empty_prefix_list_never_excludes() {
        let number = PhoneNumber::new(998901234567);
        assert_eq!(number.excluded_by(&Vec::<String>::new()), None);
    }

    #[test]
    fn terminal_statuses_default_to_finished() {
        let terminal = TerminalStatuses::default();
        assert!(terminal.contains(STATUS_FINISHED));
        assert!(!terminal.contains(STATUS_PENDING));
        assert!(!terminal.contains(8));
    }

    #[test]
    fn api_key_compares_by_digest() {
        let key = ApiKey::new("qwerty123");
        assert!(key.matches("qwerty123"));
        assert!(!key.matches("qwerty124"));
        assert!(!key.matches(""));
        assert_eq!(key.fingerprint().len(), 12);
        assert!(!format!("{key:?}").contains("qwerty"));
    }
}
