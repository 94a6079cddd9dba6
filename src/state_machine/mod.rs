// State machine module for job delivery
//
// Every store implementation routes its transitions through `guards::transition`
// so that idempotence and terminal-state conflicts behave identically everywhere.

pub mod events;
pub mod guards;
pub mod states;

pub use events::JobEvent;
pub use guards::{transition, TransitionError, TransitionOutcome};
pub use states::JobState;
