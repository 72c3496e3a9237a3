//! Database models for outpost.
//!
//! These models map directly to the database schema. JSON payloads are kept
//! as text here and decoded by the queue layer.

pub mod job;

pub use job::*;
