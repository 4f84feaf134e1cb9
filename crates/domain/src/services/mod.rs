//! Engines and shared service helpers: allocation, lifecycle, retry,
//! caching, deferred writes and telemetry wiring.

pub mod allocation;
pub mod cache;
pub mod catalog;
pub mod error;
pub mod lifecycle;
pub mod pool;
pub mod retry;
pub mod telemetry;
pub mod writer;

pub use allocation::*;
pub use cache::*;
pub use catalog::*;
pub use error::*;
pub use lifecycle::*;
pub use pool::*;
pub use retry::*;
pub use telemetry::*;
pub use writer::*;
