//! # System Constants
//!
//! Event names and default values shared by the engine, the CLI and the
//! configuration loader.

/// Names of the events published by the engine
pub mod events {
    pub const JOB_PROCESSED: &str = "processed";
    pub const JOB_FAILED: &str = "failed";
    pub const JOB_RETRYING: &str = "retrying";
    pub const QUEUE_DRAINED: &str = "drained";
}

/// Defaults applied when configuration leaves a value unset
pub mod defaults {
    pub const QUEUE_NAME: &str = "broadcast";
    pub const PROCESSES: usize = 1;
    pub const JOB_ATTEMPTS: u32 = 3;
    pub const MAX_CALLS_PER_SECOND: u32 = 30;
    pub const REQUEST_TIMEOUT_MS: u64 = 30_000;
    pub const POLL_INTERVAL_MS: u64 = 100;
    pub const STALLED_AFTER_MS: u64 = 300_000;
    pub const EVENT_CAPACITY: usize = 1024;
    /// Flood-control code of the Bot API
    pub const RETRY_CODES: [i64; 1] = [429];
    pub const RETRY_AT_OR_ABOVE: i64 = 500;
}
