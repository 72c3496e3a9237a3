//! Repository layer for database access.
//!
//! Repositories do raw row access only; validation, backoff and failure
//! policy live in the queue layer above them.

pub mod job;

pub use job::*;
