//! Scheduler loop
//!
//! Drives the coordinator from the wall clock until shutdown is requested.

pub mod ticker;

pub use ticker::RunTicker;
