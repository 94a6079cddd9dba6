//! # Job Store
//!
//! The durable, state-transitioning collection of job records the worker
//! pool drains. [`JobStore`] is the contract; [`InMemoryJobStore`] and
//! [`PgJobStore`] are the providers.

pub mod errors;
pub mod in_memory;
pub mod postgres;
pub mod traits;

pub use errors::{StoreError, StoreResult};
pub use in_memory::InMemoryJobStore;
pub use postgres::PgJobStore;
pub use traits::{JobStore, JobTransition};
