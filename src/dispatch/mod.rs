//! Single and batch nudge dispatch.

pub mod batch;
pub mod engine;
pub mod outcome;

#[cfg(test)]
pub(crate) mod testing;

pub use batch::{
    BatchCancel, BatchError, BatchOrchestrator, BatchProgress, BatchResult, BatchTarget,
    ItemStatus,
};
pub use engine::DispatchEngine;
pub use outcome::{DispatchOutcome, DispatchRequest, OwnerProfile, SkipReason};
