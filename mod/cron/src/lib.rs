//! Periodic task scheduler.
//!
//! A small in-process companion to the background-task connector: an
//! in-memory table of schedule rules (absolute trigger time plus optional
//! day/hour/minute intervals) driven by a single ticker.

pub mod scheduler;

pub use scheduler::{CallbackFuture, PeriodicScheduler, Schedule, DEFAULT_TICK_INTERVAL_MS};
