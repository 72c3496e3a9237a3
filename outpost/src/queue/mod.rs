//! Persistent publishing job queue.
//!
//! Jobs move through `pending -> running -> completed | failed`, with
//! retryable failures returning to `pending` after an exponential backoff.

pub mod backoff;
pub mod job;
pub mod store;

pub use backoff::RetryPolicy;
pub use job::{EnqueueRequest, FailureOutcome, Job, JobPage};
pub use store::JobStore;
