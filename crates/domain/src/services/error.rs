use strum_macros::AsRefStr;
use thiserror::Error;

use crate::model::ActivationId;

/// Why an allocation found nothing to hand out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum NoNumbersReason {
    /// No available number matches the country/operator pair.
    NoMatch,
    /// The picked candidate starts with one of the caller's excluded prefixes.
    ExcludedByPrefix,
}

/// Errors surfaced by the allocation and lifecycle engines.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PoolError {
    #[error("no numbers available ({})", .reason.as_ref())]
    NoNumbersAvailable { reason: NoNumbersReason },
    #[error("unknown service `{0}`")]
    UnknownService(String),
    #[error("activation {0} not found")]
    ActivationNotFound(ActivationId),
    #[error("store still busy after {attempts} attempts")]
    StoreBusy { attempts: u32 },
    #[error("store failure: {0}")]
    Store(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("operation cancelled by caller")]
    Cancelled,
}

/// Flat discriminant of [`PoolError`], handy for metric labels and for
/// adapters that map kinds onto wire codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    NoNumbersAvailable,
    UnknownService,
    ActivationNotFound,
    StoreBusy,
    Store,
    InvalidArgument,
    Cancelled,
}

impl PoolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoNumbersAvailable { .. } => ErrorKind::NoNumbersAvailable,
            Self::UnknownService(_) => ErrorKind::UnknownService,
            Self::ActivationNotFound(_) => ErrorKind::ActivationNotFound,
            Self::StoreBusy { .. } => ErrorKind::StoreBusy,
            Self::Store(_) => ErrorKind::Store,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub(crate) fn no_match() -> Self {
        Self::NoNumbersAvailable {
            reason: NoNumbersReason::NoMatch,
        }
    }

    pub(crate) fn excluded() -> Self {
        Self::NoNumbersAvailable {
            reason: NoNumbersReason::ExcludedByPrefix,
        }
    }
}

pub type PoolResult<T> = Result<T, PoolError>;
