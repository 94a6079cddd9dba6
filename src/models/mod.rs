//! # Models
//!
//! Job records and the operation sum type they carry.

pub mod job;
pub mod operation;

pub use job::{JobData, JobId, JobOptions, JobRecord, RecipientId};
pub use operation::{
    ChatAction, CopySource, ExtraOptions, MediaGroupItem, MediaGroupKind, Operation, OperationKind,
};
