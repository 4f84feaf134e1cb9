//! Core of the SMS number pool: data model, storage traits and the engines
//! that allocate numbers and drive activations to completion.
//!
//! Storage backends live in `sms_pool_storage`; the HTTP surface in
//! `sms_pool_api`. Everything here is transport-agnostic.

pub mod config;
pub mod model;
pub mod services;
pub mod storage;

#[cfg(test)]
mod testing;

pub use config::*;
pub use model::*;
pub use services::*;
pub use storage::*;
