//! Per-recipient dispatch routing.

pub mod router;

pub use router::{method_for, DispatchError, DispatchRouter};
