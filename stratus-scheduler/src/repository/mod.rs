//! Repository Module
//!
//! Data access layer of the scheduler.
//! Each repository handles database operations for a specific table.

pub mod measurement;
pub mod run;

// Re-export for convenience
pub use measurement as measurement_repository;
pub use run as run_repository;
