//! outpost library crate.
//!
//! A persistent publishing job queue with idempotent enqueue, a scheduler
//! that enforces per-channel concurrency and blackout windows, and
//! dispatchers that call external platforms through per-service circuit
//! breakers.

pub mod breaker;
pub mod config;
pub mod database;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod panic_hook;
pub mod queue;
pub mod scheduler;
pub mod utils;

pub use error::{Error, Result};
