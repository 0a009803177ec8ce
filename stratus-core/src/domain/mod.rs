//! Core domain types
//!
//! These types are shared between the scheduler (which owns and persists them)
//! and the CLI (which renders them).

pub mod location;
pub mod observation;
pub mod run;
pub mod step;
